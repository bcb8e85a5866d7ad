//! Bytecode format: opcodes and the code object they run against.

pub mod code;
pub mod ops;

pub use code::{Block, BlockKind, CodeObject, ConstLiteral, Instr, Mode, Scope};
pub use ops::{BinOp, BitwiseOp, BlockIx, CompareOp, ConstIx, NameIx, Op};
