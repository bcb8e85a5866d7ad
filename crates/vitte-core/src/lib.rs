//! vitte-core — bytecode format and error taxonomy for the Vitte VM.
//!
//! This crate knows nothing about live values or dispatch; it only
//! describes the shape of a compiled program (`bytecode::CodeObject`,
//! `bytecode::Op`) and the VM's flat error taxonomy (`error::VmError`).
//! `vitte-vm` depends on this crate for both.
//!
//! ## Modules
//! - `bytecode` — `Op`, `CodeObject`, constant-pool literals, blocks.
//! - `error` — `VmError`, frame snapshots, the 8-snapshot cap.
//!
//! ## Features
//! - `serde` — (de)serialization for `Op`/`CodeObject`, used by the CLI to
//!   load a precompiled program from disk.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod bytecode;
pub mod error;

pub use bytecode::{BinOp, BitwiseOp, BlockKind, CodeObject, CompareOp, ConstLiteral, Mode, Op, Scope};
pub use error::{Snapshot, VmError, VmResult, MAX_SNAPSHOTS};

/// Crate version, for embedders that want to print a banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use crate::bytecode::{CodeObject, Op};
    pub use crate::error::{VmError, VmResult};
}
