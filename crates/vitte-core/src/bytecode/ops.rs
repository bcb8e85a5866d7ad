//! ops.rs — the VM's opcode set.
//!
//! Names are contracts, not an encoding: each `Op` variant carries its own
//! immediate operand(s) directly rather than an index into a separate
//! operand table, which keeps the dispatcher's `match` exhaustive and the
//! disassembler simple. Compat: this crate has no external bytecode
//! consumers yet, so variants may be reordered freely; if that changes,
//! freeze the order the way the teacher's original chunk format did.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub type ConstIx = u32;
pub type NameIx = u32;
pub type BlockIx = u16;

/// Binary/compare/bitwise operator selector, resolved by the interpreter
/// to a canonical special-method name (`__add__`, `__lt__`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinOp {
    Add, Sub, Mul, Div, FloorDiv, Mod, Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CompareOp {
    Lt, Le, Eq, Ne, Gt, Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BitwiseOp {
    And, Or, Xor, Shl, Shr,
}

/// The VM's instruction set (spec §4.3). `Call`'s `(argc, kwargc)` are
/// kept as two plain fields rather than packed into one integer, since
/// Rust has no use for the original's bit-packing trick once the opcode
/// is a struct-like enum variant instead of a flat `(op, arg)` pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Op {
    NoOp,
    PopTop,
    DupTop,

    LoadConst(ConstIx),
    LoadNone,
    LoadTrue,
    LoadFalse,
    LoadEllipsis,
    LoadName(NameIx),
    LoadNameRef(NameIx),
    StoreNameRef(NameIx),
    LoadLambda(ConstIx),
    LoadEvalFn,

    BuildAttrRef(NameIx),
    BuildIndexRef,
    StoreRef,
    DeleteRef,

    BuildList(u32),
    BuildMap(u32),
    BuildSet(u32),
    BuildSlice,
    BuildSmartTuple(u32),
    BuildString(u32),

    BinaryOp(BinOp),
    CompareOp(CompareOp),
    BitwiseOp(BitwiseOp),
    IsOp { negate: bool },
    ContainsOp { negate: bool },
    UnaryNegative,
    UnaryNot,

    PopJumpIfFalse(u32),
    JumpAbsolute(u32),
    SafeJumpAbsolute(u32),
    JumpIfTrueOrPop(u32),
    JumpIfFalseOrPop(u32),
    Goto,

    Call { argc: u16, kwargc: u16 },

    LoopContinue(BlockIx),
    LoopBreak(BlockIx),
    ForIter(BlockIx),
    GetIter,
    WithEnter,
    WithExit,

    StoreFunction,
    BuildClass(NameIx),

    ReturnValue,
    RaiseError,
    Assert,

    ImportName(NameIx),
    PrintExpr,
}

impl Op {
    /// Whether this opcode unconditionally or conditionally changes `ip`.
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Op::PopJumpIfFalse(_)
                | Op::JumpAbsolute(_)
                | Op::SafeJumpAbsolute(_)
                | Op::JumpIfTrueOrPop(_)
                | Op::JumpIfFalseOrPop(_)
                | Op::Goto
        )
    }

    pub fn mnemonic(&self) -> &'static str {
        use Op::*;
        match self {
            NoOp => "no_op",
            PopTop => "pop_top",
            DupTop => "dup_top",
            LoadConst(_) => "load_const",
            LoadNone => "load_none",
            LoadTrue => "load_true",
            LoadFalse => "load_false",
            LoadEllipsis => "load_ellipsis",
            LoadName(_) => "load_name",
            LoadNameRef(_) => "load_name_ref",
            StoreNameRef(_) => "store_name_ref",
            LoadLambda(_) => "load_lambda",
            LoadEvalFn => "load_eval_fn",
            BuildAttrRef(_) => "build_attr_ref",
            BuildIndexRef => "build_index_ref",
            StoreRef => "store_ref",
            DeleteRef => "delete_ref",
            BuildList(_) => "build_list",
            BuildMap(_) => "build_map",
            BuildSet(_) => "build_set",
            BuildSlice => "build_slice",
            BuildSmartTuple(_) => "build_smart_tuple",
            BuildString(_) => "build_string",
            BinaryOp(_) => "binary_op",
            CompareOp(_) => "compare_op",
            BitwiseOp(_) => "bitwise_op",
            IsOp { .. } => "is_op",
            ContainsOp { .. } => "contains_op",
            UnaryNegative => "unary_negative",
            UnaryNot => "unary_not",
            PopJumpIfFalse(_) => "pop_jump_if_false",
            JumpAbsolute(_) => "jump_absolute",
            SafeJumpAbsolute(_) => "safe_jump_absolute",
            JumpIfTrueOrPop(_) => "jump_if_true_or_pop",
            JumpIfFalseOrPop(_) => "jump_if_false_or_pop",
            Goto => "goto",
            Call { .. } => "call",
            LoopContinue(_) => "loop_continue",
            LoopBreak(_) => "loop_break",
            ForIter(_) => "for_iter",
            GetIter => "get_iter",
            WithEnter => "with_enter",
            WithExit => "with_exit",
            StoreFunction => "store_function",
            BuildClass(_) => "build_class",
            ReturnValue => "return_value",
            RaiseError => "raise_error",
            Assert => "assert",
            ImportName(_) => "import_name",
            PrintExpr => "print_expr",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            Op::LoadConst(i) | Op::LoadLambda(i) => write!(f, " {i}"),
            Op::LoadName(i) | Op::LoadNameRef(i) | Op::StoreNameRef(i) => write!(f, " {i}"),
            Op::BuildAttrRef(i) | Op::BuildClass(i) | Op::ImportName(i) => write!(f, " {i}"),
            Op::BuildList(n) | Op::BuildMap(n) | Op::BuildSet(n) | Op::BuildSmartTuple(n) | Op::BuildString(n) => {
                write!(f, " {n}")
            }
            Op::PopJumpIfFalse(t)
            | Op::JumpAbsolute(t)
            | Op::SafeJumpAbsolute(t)
            | Op::JumpIfTrueOrPop(t)
            | Op::JumpIfFalseOrPop(t) => write!(f, " {t}"),
            Op::Call { argc, kwargc } => write!(f, " argc={argc} kwargc={kwargc}"),
            Op::LoopContinue(b) | Op::LoopBreak(b) | Op::ForIter(b) => write!(f, " block={b}"),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_are_stable() {
        assert_eq!(Op::NoOp.mnemonic(), "no_op");
        assert_eq!(Op::Call { argc: 2, kwargc: 0 }.mnemonic(), "call");
    }

    #[test]
    fn jump_classification() {
        assert!(Op::JumpAbsolute(4).is_jump());
        assert!(!Op::PopTop.is_jump());
    }

    #[test]
    fn display_is_human() {
        assert_eq!(Op::LoadConst(3).to_string(), "load_const 3");
        assert_eq!(Op::Call { argc: 1, kwargc: 2 }.to_string(), "call argc=1 kwargc=2");
    }
}
