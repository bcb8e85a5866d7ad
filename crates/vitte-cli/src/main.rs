//! vitte-cli/src/main.rs
//!
//! Binary entry point: set up error reporting and logging, then hand off
//! to `vitte_cli::run()`.

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install color-eyre: {e}");
    }
    tracing_subscriber::fmt::init();

    if let Err(err) = vitte_cli::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}
