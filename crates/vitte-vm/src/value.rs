//! value.rs — the runtime value model.
//!
//! Every value is `Rc<PyObject>`; `Value`'s `PartialEq` is `Rc::ptr_eq`, so
//! it directly implements the guest language's `is` operator. Payload
//! mutability (list/dict/set/attribs) goes through `RefCell`, the same
//! `Gc<T> = Rc<RefCell<T>>` shape the teacher's own VM uses for its `Value`
//! variants — here split one level further since a `PyObject` carries a
//! type pointer alongside its payload.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::reference::Reference;
use vitte_core::CodeObject;

/// A callable implemented in Rust, taking the VM and already-bound args.
pub type NativeFn = Rc<dyn Fn(&crate::Vm, &[Value]) -> crate::VmResult<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeVal {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceVal {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: i64,
}

/// A user-defined function: name, parameter shape, and its code body.
/// `module` is the defining module, used for globals resolution regardless
/// of the caller's own module (spec §4.4).
pub struct FunctionVal {
    pub name: String,
    pub code: Rc<CodeObject>,
    pub module: Value,
    pub params: Vec<String>,
    pub kwparams: Vec<(String, Value)>,
    pub varargs: Option<String>,
}

impl fmt::Debug for FunctionVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionVal").field("name", &self.name).finish()
    }
}

/// A user or builtin type object: `__name__`, its single base (`None` for
/// the `object` sentinel), and its members live in the owning
/// `PyObject::attribs`.
#[derive(Debug)]
pub struct TypeVal {
    pub name: String,
    pub base: Option<Value>,
}

pub enum Payload {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(RefCell<Vec<Value>>),
    Tuple(Vec<Value>),
    Dict(RefCell<Vec<(Value, Value)>>),
    Set(RefCell<Vec<Value>>),
    Range(RangeVal),
    Slice(SliceVal),
    Function(Rc<FunctionVal>),
    Native(NativeFn),
    BoundMethod { receiver: Value, func: Value },
    Iterator(RefCell<IterState>),
    Module,
    Type(TypeVal),
    Super { receiver: Value, depth: u32 },
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Unit => write!(f, "Unit"),
            Payload::Bool(b) => write!(f, "Bool({b})"),
            Payload::Int(i) => write!(f, "Int({i})"),
            Payload::Float(x) => write!(f, "Float({x})"),
            Payload::Str(s) => write!(f, "Str({s:?})"),
            Payload::List(_) => write!(f, "List"),
            Payload::Tuple(_) => write!(f, "Tuple"),
            Payload::Dict(_) => write!(f, "Dict"),
            Payload::Set(_) => write!(f, "Set"),
            Payload::Range(r) => write!(f, "Range({r:?})"),
            Payload::Slice(s) => write!(f, "Slice({s:?})"),
            Payload::Function(v) => write!(f, "Function({})", v.name),
            Payload::Native(_) => write!(f, "Native"),
            Payload::BoundMethod { .. } => write!(f, "BoundMethod"),
            Payload::Iterator(_) => write!(f, "Iterator"),
            Payload::Module => write!(f, "Module"),
            Payload::Type(t) => write!(f, "Type({})", t.name),
            Payload::Super { .. } => write!(f, "Super"),
        }
    }
}

/// Iterator state for the two built-in iterators (spec §4.5). `var` is the
/// reference `FOR_ITER` rebinds on each step.
pub enum IterState {
    Range { cur: i64, stop: i64, step: i64, var: Option<Reference> },
    Str { chars: Vec<char>, pos: usize, var: Option<Reference> },
    Seq { items: Vec<Value>, pos: usize, var: Option<Reference> },
}

impl IterState {
    pub fn bind(&mut self, r: Reference) {
        match self {
            IterState::Range { var, .. } | IterState::Str { var, .. } | IterState::Seq { var, .. } => {
                *var = Some(r)
            }
        }
    }

    pub fn var(&self) -> Option<&Reference> {
        match self {
            IterState::Range { var, .. } | IterState::Str { var, .. } | IterState::Seq { var, .. } => {
                var.as_ref()
            }
        }
    }
}

pub struct PyObject {
    /// Weak: the owning type object is kept alive by `Vm::types`, so a
    /// strong back-edge here would leak every instance's type forever.
    pub ty: Weak<PyObject>,
    pub payload: Payload,
    pub attribs: RefCell<HashMap<String, Value>>,
}

#[derive(Clone)]
pub struct Value(pub Rc<PyObject>);

impl Value {
    pub fn new(ty: &Value, payload: Payload) -> Self {
        Value(Rc::new(PyObject {
            ty: Rc::downgrade(&ty.0),
            payload,
            attribs: RefCell::new(HashMap::new()),
        }))
    }

    /// Used only to build the two bootstrap roots (`type`, `object`),
    /// whose type pointer must refer to an object still under construction.
    pub fn new_cyclic(f: impl FnOnce(&Weak<PyObject>) -> Payload) -> Self {
        Value(Rc::new_cyclic(|weak| PyObject {
            ty: weak.clone(),
            payload: f(weak),
            attribs: RefCell::new(HashMap::new()),
        }))
    }

    pub fn with_type_weak(ty: Weak<PyObject>, payload: Payload) -> Self {
        Value(Rc::new(PyObject { ty, payload, attribs: RefCell::new(HashMap::new()) }))
    }

    pub fn type_obj(&self) -> Option<Value> {
        self.0.ty.upgrade().map(Value)
    }

    pub fn is_truthy_fast(&self) -> Option<bool> {
        match &self.0.payload {
            Payload::Bool(b) => Some(*b),
            Payload::Unit => Some(false),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.0.payload {
            Payload::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.0.payload {
            Payload::Float(x) => Some(*x),
            Payload::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.0.payload {
            Payload::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", self.0.payload)
    }
}
