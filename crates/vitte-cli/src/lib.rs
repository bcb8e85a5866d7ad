//! vitte-cli/src/lib.rs — CLI library for Vitte
//!
//! Subcommands:
//!   - run     : load a precompiled `.vitbc` code object and execute it
//!   - disasm  : print a human-readable listing of a `.vitbc` file
//!
//! There is no source compiler in this workspace: `.vitbc` files are
//! bincode-encoded `vitte_core::CodeObject`s produced upstream.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vitte_core::CodeObject;
use vitte_vm::{Vm, VmOptions};

/// Entry point, called from `src/main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run { file, trace, gas } => cmd_run(file, trace, gas),
        Cmd::Disasm { file } => cmd_disasm(file),
    }
}

#[derive(Parser, Debug)]
#[command(name = "vitte", version, about = "Vitte language bytecode VM")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Execute a precompiled `.vitbc` code object.
    Run {
        /// Path to a bincode-encoded CodeObject.
        file: PathBuf,
        /// Log every dispatched instruction at DEBUG level.
        #[arg(long)]
        trace: bool,
        /// Abort with UnexpectedError after this many dispatched instructions.
        #[arg(long)]
        gas: Option<u64>,
    },
    /// Disassemble a `.vitbc` code object.
    Disasm {
        file: PathBuf,
    },
}

fn load_code(file: &PathBuf) -> Result<CodeObject> {
    let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let code: CodeObject = bincode::deserialize(&bytes).with_context(|| "decoding code object")?;
    Ok(code)
}

fn cmd_run(file: PathBuf, trace: bool, gas: Option<u64>) -> Result<()> {
    let code = load_code(&file)?;
    let options = VmOptions::default().with_trace(trace).with_gas_limit(gas);
    let vm = Vm::with_options(options);
    match vm.exec(Rc::new(code), None) {
        Some(_) => Ok(()),
        None => anyhow::bail!("script raised; traceback printed above"),
    }
}

fn cmd_disasm(file: PathBuf) -> Result<()> {
    let code = load_code(&file)?;
    let vm = Vm::with_options(VmOptions::default());
    println!("{}", vm.disassemble(&code));
    Ok(())
}
