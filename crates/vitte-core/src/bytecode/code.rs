//! code.rs — the code object: the unit the VM loads and runs.
//!
//! Produced by an external compiler (out of scope for this crate) and
//! consumed verbatim by `vitte-vm`. Nothing here knows about `Value`;
//! `ConstLiteral` is a compile-time-only constant descriptor, materialized
//! into a live value exactly once per load so that small-int interning and
//! `is`-identity stay correct (two separate `ConstLiteral::Int(1000)`
//! entries become two distinct, non-interned runtime values).

use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bytecode::ops::Op;

/// Scope a `NameRef` resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Scope {
    Local,
    Global,
}

/// How a code object's frame is expected to leave its evaluation stack,
/// and how its final value (if any) is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Mode {
    Exec,
    Eval,
    Json,
    Repl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BlockKind {
    Loop,
    With,
}

/// A lexical control-flow region, addressed by index from `Op::LoopBreak`,
/// `Op::LoopContinue`, and `Op::ForIter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Block {
    pub start: u32,
    pub end: u32,
    pub kind: BlockKind,
}

/// One bytecode instruction plus the source line it was compiled from,
/// used to build a frame's snapshot on error.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instr {
    pub op: Op,
    pub line: i32,
}

/// A constant-pool entry. Functions nest a whole `CodeObject`; the VM
/// wraps it into a live `Function` value with the defining frame's module
/// at load/closure time, not here.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConstLiteral {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Code(Box<CodeObject>),
}

/// A self-contained, already-compiled unit of code: a module body, a
/// function body, or a REPL/eval snippet.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CodeObject {
    pub name: String,
    pub filename: String,
    pub mode: Mode,
    pub co_code: Vec<Instr>,
    pub co_consts: Vec<ConstLiteral>,
    pub co_names: Vec<(String, Scope)>,
    pub co_blocks: Vec<Block>,
    pub co_labels: HashMap<String, u32>,
    /// Positional parameter names, in declaration order (functions only).
    pub co_params: Vec<String>,
    /// Keyword parameters with defaults, in declaration order.
    pub co_kwparams: Vec<(String, ConstLiteral)>,
    /// Name of the `*args` catch-all parameter, if declared.
    pub co_varargs: Option<String>,
}

impl CodeObject {
    pub fn new(name: impl Into<String>, filename: impl Into<String>, mode: Mode) -> Self {
        CodeObject {
            name: name.into(),
            filename: filename.into(),
            mode,
            co_code: Vec::new(),
            co_consts: Vec::new(),
            co_names: Vec::new(),
            co_blocks: Vec::new(),
            co_labels: HashMap::new(),
            co_params: Vec::new(),
            co_kwparams: Vec::new(),
            co_varargs: None,
        }
    }

    pub fn push(&mut self, op: Op, line: i32) -> u32 {
        let ix = self.co_code.len() as u32;
        self.co_code.push(Instr { op, line });
        ix
    }

    pub fn add_const(&mut self, lit: ConstLiteral) -> u32 {
        self.co_consts.push(lit);
        (self.co_consts.len() - 1) as u32
    }

    pub fn add_name(&mut self, name: impl Into<String>, scope: Scope) -> u32 {
        self.co_names.push((name.into(), scope));
        (self.co_names.len() - 1) as u32
    }

    pub fn add_block(&mut self, start: u32, end: u32, kind: BlockKind) -> u16 {
        self.co_blocks.push(Block { start, end, kind });
        (self.co_blocks.len() - 1) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_indexes() {
        let mut co = CodeObject::new("<module>", "a.vit", Mode::Exec);
        let k = co.add_const(ConstLiteral::Int(42));
        co.push(Op::LoadConst(k), 1);
        co.push(Op::PrintExpr, 1);
        assert_eq!(co.co_code.len(), 2);
        assert_eq!(co.co_consts[k as usize], ConstLiteral::Int(42));
    }

    #[test]
    fn nested_code_object_in_consts() {
        let mut outer = CodeObject::new("<module>", "a.vit", Mode::Exec);
        let inner = CodeObject::new("f", "a.vit", Mode::Exec);
        let k = outer.add_const(ConstLiteral::Code(Box::new(inner)));
        match &outer.co_consts[k as usize] {
            ConstLiteral::Code(c) => assert_eq!(c.name, "f"),
            _ => panic!("expected nested code object"),
        }
    }
}
