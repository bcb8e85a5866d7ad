//! frame.rs — one call's evaluation state (spec §4.1).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use vitte_core::{CodeObject, Snapshot};

use crate::reference::Reference;
use crate::value::Value;

/// An evaluation-stack entry: a value, or a first-class l-value. The
/// interpreter dereferences a `Ref` slot wherever the spec requires an
/// r-value; a handful of opcodes (store, delete, `for`-iter binding,
/// smart-tuple packing) work with the `Ref` directly instead.
pub enum Slot {
    Val(Value),
    Ref(Reference),
}

impl Slot {
    pub fn expect_val(self) -> Value {
        match self {
            Slot::Val(v) => v,
            Slot::Ref(_) => panic!("expected a dereferenced value on the stack"),
        }
    }
}

pub struct Frame {
    pub code: Rc<CodeObject>,
    /// `f_globals`: the module this frame's code was loaded/defined into.
    pub module: Value,
    pub locals: RefCell<HashMap<String, Value>>,
    pub stack: RefCell<Vec<Slot>>,
    pub ip: Cell<usize>,
}

impl Frame {
    pub fn new(code: Rc<CodeObject>, module: Value) -> Self {
        Frame {
            code,
            module,
            locals: RefCell::new(HashMap::new()),
            stack: RefCell::new(Vec::new()),
            ip: Cell::new(0),
        }
    }

    pub fn push(&self, slot: Slot) {
        self.stack.borrow_mut().push(slot);
    }

    pub fn push_value(&self, v: Value) {
        self.push(Slot::Val(v));
    }

    pub fn pop(&self) -> Option<Slot> {
        self.stack.borrow_mut().pop()
    }

    pub fn top(&self) -> Option<Slot> {
        self.stack.borrow().last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Returns the top `n` entries in original (bottom-to-top source) order,
    /// without dereferencing.
    pub fn pop_n_reversed(&self, n: usize) -> Vec<Slot> {
        let mut stack = self.stack.borrow_mut();
        let at = stack.len() - n;
        stack.split_off(at)
    }

    pub fn jump_abs(&self, target: u32) {
        self.ip.set(target as usize);
    }

    /// A short textual record of this frame's current source location,
    /// used to build an error's snapshot stack.
    pub fn curr_snapshot(&self) -> Snapshot {
        let ip = self.ip.get();
        let (line, mnemonic) = self
            .code
            .co_code
            .get(ip)
            .map(|instr| (instr.line, instr.op.mnemonic().to_string()))
            .unwrap_or((-1, "<end>".to_string()));
        Snapshot {
            file: self.code.filename.clone(),
            line,
            source: format!("{} ({})", self.code.name, mnemonic),
        }
    }
}

impl Clone for Slot {
    fn clone(&self) -> Self {
        match self {
            Slot::Val(v) => Slot::Val(v.clone()),
            Slot::Ref(r) => Slot::Ref(r.clone()),
        }
    }
}
