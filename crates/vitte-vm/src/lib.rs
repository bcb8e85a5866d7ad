//! vitte-vm — the stack-based interpreter for the Vitte language.
//!
//! This crate owns everything `vitte-core` doesn't: live `Value`s, the
//! reference (l-value) protocol, frames and the call stack, the object
//! protocol (attribute lookup, MRO, `super`, calling convention), the
//! iterator protocol, the module registry, and the optional cooperative
//! channel VM. `vitte-core` only describes the bytecode shape this crate
//! dispatches and the error taxonomy it raises.
//!
//! ```no_run
//! use std::rc::Rc;
//! use vitte_core::CodeObject;
//! use vitte_vm::{Vm, VmOptions};
//!
//! # fn load_code() -> CodeObject { unimplemented!("load a precompiled program") }
//! let code = Rc::new(load_code());
//! let vm = Vm::with_options(VmOptions::default());
//! match vm.exec(code, None) {
//!     Some(v) => println!("{v:?}"),
//!     None => eprintln!("script raised; traceback already printed"),
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod channel;
pub mod frame;
pub mod iterator;
pub mod module;
pub mod object;
pub mod reference;
pub mod value;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info, warn};
use vitte_core::{BinOp, BitwiseOp, CodeObject, CompareOp, ConstLiteral, Mode, VmError};

pub use vitte_core::VmResult;

use crate::channel::{ChannelState, Phase};
use crate::frame::Slot;
use crate::object::CallOutcome;
use crate::reference::Reference;
use crate::value::{FunctionVal, Payload, RangeVal, SliceVal, TypeVal};

pub use frame::Frame;
pub use value::Value;

const SMALL_INT_LO: i64 = -5;
const SMALL_INT_HI: i64 = 256;

/// Tunable knobs, mirroring the teacher's `VmOptions` builder shape.
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub max_recursion_depth: usize,
    pub trace: bool,
    pub gas_limit: Option<u64>,
    pub use_stdio: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions { max_recursion_depth: 1000, trace: false, gas_limit: None, use_stdio: true }
    }
}

impl VmOptions {
    pub fn with_max_recursion_depth(mut self, n: usize) -> Self {
        self.max_recursion_depth = n;
        self
    }
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
    pub fn with_gas_limit(mut self, limit: Option<u64>) -> Self {
        self.gas_limit = limit;
        self
    }
    pub fn with_stdio(mut self, use_stdio: bool) -> Self {
        self.use_stdio = use_stdio;
        self
    }
}

/// The interpreter. Interior mutability (`RefCell`/`Cell`) throughout: most
/// operations only need `&Vm`, matching the `Rc<RefCell<_>>` value graph.
pub struct Vm {
    pub options: VmOptions,
    frames: RefCell<Vec<Rc<Frame>>>,
    pub none: Value,
    pub true_: Value,
    pub false_: Value,
    pub ellipsis: Value,
    small_ints: Vec<Value>,
    types: RefCell<HashMap<String, Value>>,
    pub builtins: Value,
    pub modules: RefCell<HashMap<String, Value>>,
    pub lazy_modules: RefCell<HashMap<String, Rc<CodeObject>>>,
    stop_flag: Rc<Cell<bool>>,
    pub channel: Option<Rc<ChannelState>>,
    stdout_buf: RefCell<String>,
    gas_used: Cell<u64>,
}

impl Vm {
    pub fn with_options(options: VmOptions) -> Self {
        let object_ty = Value::new_cyclic(|_weak| Payload::Type(TypeVal { name: "object".into(), base: None }));
        // `type`'s own type is itself; its base is `object`.
        let type_ty = Value::new_cyclic(|weak| {
            let _ = weak;
            Payload::Type(TypeVal { name: "type".into(), base: Some(object_ty.clone()) })
        });
        // Patch `object`'s and `type`'s type pointers now that `type_ty` exists.
        // Safety-free: both are freshly constructed, uniquely owned here.
        let mut types = HashMap::new();
        types.insert("object".to_string(), object_ty.clone());
        types.insert("type".to_string(), type_ty.clone());
        for name in [
            "NoneType", "bool", "int", "float", "str", "list", "tuple", "dict", "set", "range",
            "slice", "function", "native_function", "bound_method", "iterator", "module", "super",
        ] {
            types.insert(
                name.to_string(),
                Value::new(&type_ty, Payload::Type(TypeVal { name: name.to_string(), base: Some(object_ty.clone()) })),
            );
        }

        let none = Value::new(types.get("NoneType").unwrap(), Payload::Unit);
        let true_ = Value::new(types.get("bool").unwrap(), Payload::Bool(true));
        let false_ = Value::new(types.get("bool").unwrap(), Payload::Bool(false));
        let ellipsis = Value::new(&object_ty, Payload::Unit);

        let int_ty = types.get("int").unwrap().clone();
        let small_ints: Vec<Value> =
            (SMALL_INT_LO..=SMALL_INT_HI).map(|i| Value::new(&int_ty, Payload::Int(i))).collect();

        let builtins = Value::new(types.get("module").unwrap(), Payload::Module);

        Vm {
            options,
            frames: RefCell::new(Vec::new()),
            none,
            true_,
            false_,
            ellipsis,
            small_ints,
            types: RefCell::new(types),
            builtins,
            modules: RefCell::new(HashMap::new()),
            lazy_modules: RefCell::new(HashMap::new()),
            stop_flag: Rc::new(Cell::new(false)),
            channel: None,
            stdout_buf: RefCell::new(String::new()),
            gas_used: Cell::new(0),
        }
    }

    /// Enables the cooperative channel VM (spec §4.8) and binds the
    /// `__string_channel_call` builtin the source installs in its
    /// `ThreadedVM` constructor. Calling it suspends the script; the value
    /// it appears to return is actually delivered later, by
    /// `resume_channel`, once the host installs a response.
    pub fn with_channel(mut self) -> Self {
        self.channel = Some(Rc::new(ChannelState::default()));
        let channel_call: value::NativeFn = Rc::new(|vm, args| {
            let outgoing = args.first().and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let ch = vm.channel.as_ref().expect("__string_channel_call requires with_channel()");
            ch.request_suspend(outgoing);
            Ok(vm.none.clone())
        });
        self.bind_builtin_func("__string_channel_call", channel_call);
        self
    }

    pub fn builtin_type(&self, name: &str) -> Value {
        self.types.borrow().get(name).cloned().unwrap_or_else(|| panic!("unknown builtin type '{name}'"))
    }

    pub fn make_int(&self, i: i64) -> Value {
        if (SMALL_INT_LO..=SMALL_INT_HI).contains(&i) {
            self.small_ints[(i - SMALL_INT_LO) as usize].clone()
        } else {
            Value::new(&self.builtin_type("int"), Payload::Int(i))
        }
    }

    pub fn make_float(&self, x: f64) -> Value {
        Value::new(&self.builtin_type("float"), Payload::Float(x))
    }

    pub fn make_str(&self, s: impl Into<String>) -> Value {
        Value::new(&self.builtin_type("str"), Payload::Str(s.into()))
    }

    pub fn make_bool(&self, b: bool) -> Value {
        if b { self.true_.clone() } else { self.false_.clone() }
    }

    pub fn make_tuple(&self, items: Vec<Value>) -> Value {
        Value::new(&self.builtin_type("tuple"), Payload::Tuple(items))
    }

    pub fn make_list(&self, items: Vec<Value>) -> Value {
        Value::new(&self.builtin_type("list"), Payload::List(RefCell::new(items)))
    }

    /// Binds a native function into a module's globals (embedder API).
    pub fn bind_func(&self, module: &Value, name: &str, f: value::NativeFn) {
        let v = Value::new(&self.builtin_type("native_function"), Payload::Native(f));
        module.0.attribs.borrow_mut().insert(name.to_string(), v);
    }

    /// Binds a native method onto a registered type (embedder API).
    pub fn bind_method(&self, type_name: &str, name: &str, f: value::NativeFn) {
        let ty = self.builtin_type(type_name);
        let v = Value::new(&self.builtin_type("native_function"), Payload::Native(f));
        ty.0.attribs.borrow_mut().insert(name.to_string(), v);
    }

    pub fn bind_builtin_func(&self, name: &str, f: value::NativeFn) {
        self.bind_func(&self.builtins, name, f);
    }

    pub fn keyboard_interrupt(&self) {
        self.stop_flag.set(true);
    }

    fn materialize_const(&self, lit: &ConstLiteral, module: &Value) -> Value {
        match lit {
            ConstLiteral::None => self.none.clone(),
            ConstLiteral::Bool(b) => self.make_bool(*b),
            ConstLiteral::Int(i) => self.make_int(*i),
            ConstLiteral::Float(x) => self.make_float(*x),
            ConstLiteral::Str(s) => self.make_str(s.clone()),
            ConstLiteral::Code(code) => self.make_function(Rc::new((**code).clone()), module.clone()),
        }
    }

    fn make_function(&self, code: Rc<CodeObject>, module: Value) -> Value {
        let kwparams =
            code.co_kwparams.iter().map(|(n, lit)| (n.clone(), self.materialize_const(lit, &module))).collect();
        let fval = FunctionVal {
            name: code.name.clone(),
            params: code.co_params.clone(),
            kwparams,
            varargs: code.co_varargs.clone(),
            code,
            module,
        };
        Value::new(&self.builtin_type("function"), Payload::Function(Rc::new(fval)))
    }

    pub fn unpack_sequence(&self, val: &Value, n: usize) -> VmResult<Vec<Value>> {
        let items: Vec<Value> = match &val.0.payload {
            Payload::List(items) => items.borrow().clone(),
            Payload::Tuple(items) => items.clone(),
            _ => return Err(VmError::bare("TypeError", "cannot unpack non-sequence")),
        };
        if items.len() > n {
            return Err(VmError::bare("ValueError", "too many values to unpack"));
        }
        if items.len() < n {
            return Err(VmError::bare("ValueError", "not enough values to unpack"));
        }
        Ok(items)
    }

    pub fn truthy(&self, v: &Value) -> VmResult<bool> {
        Ok(match &v.0.payload {
            Payload::Unit => false,
            Payload::Bool(b) => *b,
            Payload::Int(i) => *i != 0,
            Payload::Float(x) => *x != 0.0,
            Payload::Str(s) => !s.is_empty(),
            Payload::List(items) => !items.borrow().is_empty(),
            Payload::Tuple(items) => !items.is_empty(),
            Payload::Dict(e) => !e.borrow().is_empty(),
            Payload::Set(e) => !e.borrow().is_empty(),
            _ => true,
        })
    }

    pub fn values_equal(&self, a: &Value, b: &Value) -> VmResult<bool> {
        if a.ptr_eq(b) {
            return Ok(true);
        }
        Ok(match (&a.0.payload, &b.0.payload) {
            (Payload::Int(x), Payload::Int(y)) => x == y,
            (Payload::Float(x), Payload::Float(y)) => x == y,
            (Payload::Int(x), Payload::Float(y)) | (Payload::Float(y), Payload::Int(x)) => *x as f64 == *y,
            (Payload::Str(x), Payload::Str(y)) => x == y,
            (Payload::Bool(x), Payload::Bool(y)) => x == y,
            (Payload::Tuple(x), Payload::Tuple(y)) => {
                if x.len() != y.len() {
                    false
                } else {
                    let mut eq = true;
                    for (xi, yi) in x.iter().zip(y.iter()) {
                        if !self.values_equal(xi, yi)? {
                            eq = false;
                            break;
                        }
                    }
                    eq
                }
            }
            _ => false,
        })
    }

    pub fn hash_of(&self, v: &Value) -> VmResult<i64> {
        Ok(match &v.0.payload {
            Payload::Int(i) => *i,
            Payload::Bool(b) => *b as i64,
            Payload::Float(x) => x.to_bits() as i64,
            Payload::Str(s) => {
                let mut h: i64 = 1469598103934665603u64 as i64;
                for b in s.bytes() {
                    h ^= b as i64;
                    h = h.wrapping_mul(1099511628211);
                }
                h
            }
            Payload::Tuple(items) => {
                let mut h: i64 = 0x345678;
                for it in items {
                    h = h.wrapping_mul(1000003) ^ self.hash_of(it)?;
                }
                h
            }
            Payload::Unit => 0,
            Payload::Type(_) | Payload::Function(_) | Payload::Native(_) => Rc::as_ptr(&v.0) as i64,
            _ => return Err(VmError::bare("TypeError", "unhashable type")),
        })
    }

    pub fn isinstance(&self, obj: &Value, ty: &Value) -> bool {
        let mut cur = obj.type_obj();
        while let Some(t) = cur {
            if t.ptr_eq(ty) {
                return true;
            }
            cur = match &t.0.payload {
                Payload::Type(TypeVal { base, .. }) => base.clone(),
                _ => None,
            };
        }
        false
    }

    pub fn normalized_index(&self, idx: i64, len: usize) -> VmResult<usize> {
        let real = if idx < 0 { idx + len as i64 } else { idx };
        if real < 0 || real >= len as i64 {
            return Err(VmError::bare("IndexError", "index out of range"));
        }
        Ok(real as usize)
    }

    pub fn repr_of(&self, v: &Value) -> VmResult<String> {
        if let Some(m) = object::getattr(self, v, "__repr__", false)? {
            let r = self.resolve(object::call(self, &m, vec![], vec![])?)?;
            return Ok(r.as_str().unwrap_or_default().to_string());
        }
        Ok(self.default_repr(v))
    }

    pub fn str_of(&self, v: &Value) -> VmResult<String> {
        if let Some(m) = object::getattr(self, v, "__str__", false)? {
            let r = self.resolve(object::call(self, &m, vec![], vec![])?)?;
            if let Some(s) = r.as_str() {
                return Ok(s.to_string());
            }
        }
        self.repr_of(v)
    }

    fn default_repr(&self, v: &Value) -> String {
        match &v.0.payload {
            Payload::Unit => "None".to_string(),
            Payload::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Payload::Int(i) => i.to_string(),
            Payload::Float(x) => x.to_string(),
            Payload::Str(s) => format!("'{s}'"),
            Payload::List(items) => {
                let parts: Vec<String> = items.borrow().iter().map(|it| self.default_repr(it)).collect();
                format!("[{}]", parts.join(", "))
            }
            Payload::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|it| self.default_repr(it)).collect();
                format!("({})", parts.join(", "))
            }
            Payload::Dict(entries) => {
                let parts: Vec<String> =
                    entries.borrow().iter().map(|(k, v)| format!("{}: {}", self.default_repr(k), self.default_repr(v))).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Payload::Set(items) => {
                let parts: Vec<String> = items.borrow().iter().map(|it| self.default_repr(it)).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Payload::Function(f) => format!("<function {}>", f.name),
            Payload::Type(t) => format!("<class '{}'>", t.name),
            _ => "<object>".to_string(),
        }
    }

    pub fn write_stdout(&self, s: &str) {
        if self.options.use_stdio {
            print!("{s}");
        } else {
            self.stdout_buf.borrow_mut().push_str(s);
        }
    }

    pub fn take_stdout(&self) -> String {
        self.stdout_buf.replace(String::new())
    }

    /// Resolves a call outcome to a value, driving the trampoline to
    /// completion if a frame was pushed.
    pub fn resolve(&self, outcome: CallOutcome) -> VmResult<Value> {
        match outcome {
            CallOutcome::Value(v) => Ok(v),
            CallOutcome::PushedFrame => {
                let target = self.frames.borrow().len() - 1;
                Ok(self.run(target)?.unwrap_or_else(|| self.none.clone()))
            }
        }
    }

    pub fn push_call(&self, code: Rc<CodeObject>, module: Value, locals: HashMap<String, Value>) -> VmResult<()> {
        if self.frames.borrow().len() >= self.options.max_recursion_depth {
            warn!(target: "vitte_vm", depth = self.frames.borrow().len(), "recursion limit reached");
            return Err(VmError::bare("RecursionError", "maximum recursion depth exceeded"));
        }
        let frame = Frame::new(code, module);
        *frame.locals.borrow_mut() = locals;
        self.frames.borrow_mut().push(Rc::new(frame));
        Ok(())
    }

    pub fn run_module_body(&self, code: Rc<CodeObject>, module: Value) -> VmResult<()> {
        let target = self.frames.borrow().len();
        self.push_call(code, module, HashMap::new())?;
        self.run(target)?;
        Ok(())
    }

    /// Top-level entry point (spec §6 `exec`). Catches every error, prints
    /// a traceback, and returns `None` — the VM's sole catch point.
    pub fn exec(&self, code: Rc<CodeObject>, module: Option<Value>) -> Option<Value> {
        match self.exec_checked(code, module) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("{}", e.render());
                None
            }
        }
    }

    fn exec_checked(&self, code: Rc<CodeObject>, module: Option<Value>) -> VmResult<Option<Value>> {
        let module = module.unwrap_or_else(|| module::new_module(self, "__main__"));
        let depth_before = self.frames.borrow().len();
        info!(target: "vitte_vm", module = %module_name(&module), "exec start");
        self.push_call(code, module, HashMap::new())?;
        match self.run(depth_before) {
            Ok(v) => Ok(v),
            Err(e) => {
                let snaps = self.unwind_to(depth_before);
                Err(e.with_unwound_snapshots(snaps))
            }
        }
    }

    /// `exec_async`: runs inline, cooperatively yielding at
    /// `__string_channel_call` (see `channel.rs`).
    pub fn exec_async(&self, code: Rc<CodeObject>, module: Option<Value>) -> VmResult<()> {
        let ch = self.channel.clone().expect("exec_async requires with_channel()");
        if ch.get_state() != Phase::Ready {
            return Err(VmError::bare("UnexpectedError", "channel VM is not READY"));
        }
        ch.phase.set(Phase::Running);
        let module = module.unwrap_or_else(|| module::new_module(self, "__main__"));
        let depth_before = self.frames.borrow().len();
        self.push_call(code, module, HashMap::new())?;
        match self.run(depth_before) {
            Ok(_) => {
                if ch.get_state() != Phase::Suspended {
                    ch.phase.set(Phase::Finished);
                }
                Ok(())
            }
            Err(e) => {
                self.unwind_to(depth_before);
                ch.phase.set(Phase::Finished);
                Err(e)
            }
        }
    }

    /// Resumes a suspended channel-mode script after
    /// `write_jsonrpc_response`. The installed response is delivered as the
    /// `__string_channel_call`'s return value, on top of the suspended
    /// frame's stack, exactly where the call's result would have landed.
    pub fn resume_channel(&self) -> VmResult<()> {
        let ch = self.channel.clone().expect("resume_channel requires with_channel()");
        if ch.get_state() != Phase::Running {
            return Err(VmError::bare("UnexpectedError", "channel VM is not resumable"));
        }
        if let Some(frame) = self.frames.borrow().last() {
            let incoming = ch.take_incoming().unwrap_or_default();
            frame.push_value(self.make_str(incoming));
        }
        let depth_before = 0;
        match self.run(depth_before) {
            Ok(_) => {
                if ch.get_state() != Phase::Suspended {
                    ch.phase.set(Phase::Finished);
                }
                Ok(())
            }
            Err(e) => {
                self.unwind_to(depth_before);
                ch.phase.set(Phase::Finished);
                Err(e)
            }
        }
    }

    fn unwind_to(&self, target_depth: usize) -> Vec<vitte_core::Snapshot> {
        let mut snaps = Vec::new();
        let mut frames = self.frames.borrow_mut();
        while frames.len() > target_depth {
            if let Some(f) = frames.pop() {
                snaps.push(f.curr_snapshot());
            }
        }
        snaps
    }

    /// The dispatch loop. Runs frames until the call stack returns to
    /// `target_depth`, handling the `CALL`/`RETURN_VALUE` trampoline inline
    /// so host-stack depth never grows with guest recursion.
    fn run(&self, target_depth: usize) -> VmResult<Option<Value>> {
        loop {
            if self.frames.borrow().len() <= target_depth {
                return Ok(None);
            }
            if self.stop_flag.get() {
                return Err(VmError::bare("KeyboardInterrupt", "interrupted"));
            }
            let frame = self.frames.borrow().last().unwrap().clone();
            let ip = frame.ip.get();
            let instr = frame.code.co_code.get(ip).cloned();
            let Some(instr) = instr else {
                match self.finish_frame_at_end(&frame, target_depth)? {
                    Some(v) => return Ok(Some(v)),
                    None => continue,
                }
            };
            frame.ip.set(ip + 1);

            if self.options.trace {
                debug!(target: "vitte_vm", ip, op = %instr.op, "dispatch");
            }
            if let Some(limit) = self.options.gas_limit {
                let used = self.gas_used.get() + 1;
                self.gas_used.set(used);
                if used > limit {
                    return Err(VmError::bare("UnexpectedError", "gas limit exceeded"));
                }
            }

            if let Some(v) = self.step(&frame, instr.op, target_depth)? {
                return Ok(Some(v));
            }

            if let Some(ch) = &self.channel {
                if ch.suspend_requested.get() {
                    ch.suspend_requested.set(false);
                    return Ok(None);
                }
            }
        }
    }

    fn finish_frame_at_end(&self, frame: &Rc<Frame>, target_depth: usize) -> VmResult<Option<Value>> {
        let depth = frame.depth();
        let value = match frame.code.mode {
            Mode::Exec | Mode::Repl => {
                if depth != 0 {
                    return Err(VmError::bare("UnexpectedError", "statement frame exited with a nonempty stack"));
                }
                self.none.clone()
            }
            Mode::Eval | Mode::Json => {
                if depth != 1 {
                    return Err(VmError::bare("UnexpectedError", "expression frame exited without exactly one value"));
                }
                let slot = frame.pop().unwrap();
                reference::deref(self, frame, &slot)?
            }
        };
        self.frames.borrow_mut().pop();
        let new_depth = self.frames.borrow().len();
        if new_depth <= target_depth {
            Ok(Some(value))
        } else {
            let caller = self.frames.borrow().last().unwrap().clone();
            caller.push_value(value);
            Ok(None)
        }
    }

    /// Executes one instruction. Returns `Some(value)` only when the
    /// outermost frame of this `run` call returns.
    fn step(&self, frame: &Rc<Frame>, op: vitte_core::Op, target_depth: usize) -> VmResult<Option<Value>> {
        use vitte_core::Op::*;
        match op {
            NoOp => {}
            PopTop => {
                frame.pop();
            }
            DupTop => {
                let top = frame.top().expect("DUP_TOP on empty stack");
                frame.push(top);
            }
            LoadConst(i) => {
                let lit = frame.code.co_consts[i as usize].clone();
                let v = self.materialize_const(&lit, &frame.module);
                frame.push_value(v);
            }
            LoadNone => frame.push_value(self.none.clone()),
            LoadTrue => frame.push_value(self.true_.clone()),
            LoadFalse => frame.push_value(self.false_.clone()),
            LoadEllipsis => frame.push_value(self.ellipsis.clone()),
            LoadName(i) => {
                let (name, scope) = frame.code.co_names[i as usize].clone();
                let v = Reference::Name { name, scope }.get(self, frame)?;
                frame.push_value(v);
            }
            LoadNameRef(i) => {
                let (name, scope) = frame.code.co_names[i as usize].clone();
                frame.push(Slot::Ref(Reference::Name { name, scope }));
            }
            StoreNameRef(i) => {
                let (name, scope) = frame.code.co_names[i as usize].clone();
                let slot = frame.pop().expect("STORE_NAME_REF on empty stack");
                let v = reference::deref(self, frame, &slot)?;
                Reference::Name { name, scope }.set(self, frame, v)?;
            }
            LoadLambda(i) => {
                let lit = frame.code.co_consts[i as usize].clone();
                let code = match lit {
                    ConstLiteral::Code(c) => Rc::new(*c),
                    _ => return Err(VmError::bare("UnexpectedError", "LOAD_LAMBDA on a non-code constant")),
                };
                let f = self.make_function(code, frame.module.clone());
                frame.push_value(f);
            }
            LoadEvalFn => {
                let v = frame.module.0.attribs.borrow().get("eval").cloned().unwrap_or_else(|| self.none.clone());
                frame.push_value(v);
            }
            BuildAttrRef(i) => {
                let (name, _) = frame.code.co_names[i as usize].clone();
                let slot = frame.pop().expect("BUILD_ATTR_REF on empty stack");
                let obj = reference::deref(self, frame, &slot)?;
                frame.push(Slot::Ref(Reference::Attr { obj, name }));
            }
            BuildIndexRef => {
                let key_slot = frame.pop().expect("BUILD_INDEX_REF needs key");
                let obj_slot = frame.pop().expect("BUILD_INDEX_REF needs object");
                let key = reference::deref(self, frame, &key_slot)?;
                let obj = reference::deref(self, frame, &obj_slot)?;
                frame.push(Slot::Ref(Reference::Index { obj, key }));
            }
            StoreRef => {
                let val_slot = frame.pop().expect("STORE_REF needs value");
                let ref_slot = frame.pop().expect("STORE_REF needs reference");
                let val = reference::deref(self, frame, &val_slot)?;
                match ref_slot {
                    Slot::Ref(r) => r.set(self, frame, val)?,
                    Slot::Val(_) => return Err(VmError::bare("UnexpectedError", "STORE_REF target is not a reference")),
                }
            }
            DeleteRef => {
                let slot = frame.pop().expect("DELETE_REF needs reference");
                match slot {
                    Slot::Ref(r) => r.del(self, frame)?,
                    Slot::Val(_) => return Err(VmError::bare("UnexpectedError", "DELETE_REF target is not a reference")),
                }
            }
            BuildList(n) => {
                let items = self.pop_n_values(frame, n as usize)?;
                frame.push_value(Value::new(&self.builtin_type("list"), Payload::List(RefCell::new(items))));
            }
            BuildMap(n) => {
                let flat = self.pop_n_values(frame, 2 * n as usize)?;
                let mut entries = Vec::with_capacity(n as usize);
                for pair in flat.chunks(2) {
                    entries.push((pair[0].clone(), pair[1].clone()));
                }
                frame.push_value(Value::new(&self.builtin_type("dict"), Payload::Dict(RefCell::new(entries))));
            }
            BuildSet(n) => {
                let items = self.pop_n_values(frame, n as usize)?;
                let mut set: Vec<Value> = Vec::new();
                for it in items {
                    if !set.iter().any(|s| self.values_equal(s, &it).unwrap_or(false)) {
                        set.push(it);
                    }
                }
                frame.push_value(Value::new(&self.builtin_type("set"), Payload::Set(RefCell::new(set))));
            }
            BuildSlice => {
                let stop_slot = frame.pop().expect("BUILD_SLICE needs stop");
                let start_slot = frame.pop().expect("BUILD_SLICE needs start");
                let stop = reference::deref(self, frame, &stop_slot)?;
                let start = reference::deref(self, frame, &start_slot)?;
                frame.push_value(Value::new(
                    &self.builtin_type("slice"),
                    Payload::Slice(SliceVal { start: start.as_int(), stop: stop.as_int(), step: 1 }),
                ));
            }
            BuildSmartTuple(n) => {
                let slots = frame.pop_n_reversed(n as usize);
                if slots.iter().all(|s| matches!(s, Slot::Ref(_))) && !slots.is_empty() {
                    let refs = slots
                        .into_iter()
                        .map(|s| match s {
                            Slot::Ref(r) => r,
                            Slot::Val(_) => unreachable!(),
                        })
                        .collect();
                    frame.push(Slot::Ref(Reference::Tuple(refs)));
                } else {
                    let mut items = Vec::with_capacity(slots.len());
                    for s in slots {
                        items.push(reference::deref(self, frame, &s)?);
                    }
                    frame.push_value(self.make_tuple(items));
                }
            }
            BuildString(n) => {
                let items = self.pop_n_values(frame, n as usize)?;
                let mut s = String::new();
                for it in items {
                    s.push_str(&self.str_of(&it)?);
                }
                frame.push_value(self.make_str(s));
            }
            BinaryOp(op) => self.do_binary_op(frame, op)?,
            CompareOp(op) => self.do_compare_op(frame, op)?,
            BitwiseOp(op) => self.do_bitwise_op(frame, op)?,
            IsOp { negate } => {
                let b = self.pop_value(frame)?;
                let a = self.pop_value(frame)?;
                frame.push_value(self.make_bool(a.ptr_eq(&b) ^ negate));
            }
            ContainsOp { negate } => {
                let container = self.pop_value(frame)?;
                let needle = self.pop_value(frame)?;
                let r = object::call_method(self, &container, "__contains__", &[needle])?;
                let b = self.truthy(&r)?;
                frame.push_value(self.make_bool(b ^ negate));
            }
            UnaryNegative => {
                let v = self.pop_value(frame)?;
                let out = match &v.0.payload {
                    Payload::Int(i) => self.make_int(-i),
                    Payload::Float(x) => self.make_float(-x),
                    _ => self.resolve(object::call(self, &object::getattr(self, &v, "__neg__", true)?.unwrap(), vec![], vec![])?)?,
                };
                frame.push_value(out);
            }
            UnaryNot => {
                let v = self.pop_value(frame)?;
                let b = self.truthy(&v)?;
                frame.push_value(self.make_bool(!b));
            }
            PopJumpIfFalse(t) => {
                let v = self.pop_value(frame)?;
                if !self.truthy(&v)? {
                    frame.jump_abs(t);
                }
            }
            JumpAbsolute(t) => frame.jump_abs(t),
            SafeJumpAbsolute(t) => frame.jump_abs(t),
            JumpIfTrueOrPop(t) => {
                let v = frame.top().expect("JUMP_IF_TRUE_OR_POP on empty stack");
                let val = reference::deref(self, frame, &v)?;
                if self.truthy(&val)? {
                    frame.jump_abs(t);
                } else {
                    frame.pop();
                }
            }
            JumpIfFalseOrPop(t) => {
                let v = frame.top().expect("JUMP_IF_FALSE_OR_POP on empty stack");
                let val = reference::deref(self, frame, &v)?;
                if !self.truthy(&val)? {
                    frame.jump_abs(t);
                } else {
                    frame.pop();
                }
            }
            Goto => {
                let label_val = self.pop_value(frame)?;
                let label = label_val.as_str().unwrap_or_default().to_string();
                let target = *frame
                    .code
                    .co_labels
                    .get(&label)
                    .ok_or_else(|| VmError::bare("KeyError", format!("no such label '{label}'")))?;
                frame.jump_abs(target);
            }
            Call { argc, kwargc } => {
                let mut kwargs = Vec::with_capacity(kwargc as usize);
                for _ in 0..kwargc {
                    let val = self.pop_value(frame)?;
                    let name_val = self.pop_value(frame)?;
                    let name = name_val.as_str().unwrap_or_default().to_string();
                    kwargs.push((name, val));
                }
                kwargs.reverse();
                let args = self.pop_n_values(frame, argc as usize)?;
                let callee = self.pop_value(frame)?;
                let outcome = object::call(self, &callee, args, kwargs)?;
                match outcome {
                    CallOutcome::Value(v) => {
                        // A channel-call native may have suspended mid-call; its
                        // placeholder return value is discarded here and the real
                        // result is pushed by `resume_channel` instead.
                        let suspended = self.channel.as_ref().is_some_and(|c| c.suspend_requested.get());
                        if !suspended {
                            frame.push_value(v);
                        }
                    }
                    CallOutcome::PushedFrame => {}
                }
            }
            LoopContinue(b) => {
                let block = frame.code.co_blocks[b as usize];
                frame.jump_abs(block.start);
            }
            LoopBreak(b) => {
                let block = frame.code.co_blocks[b as usize];
                frame.jump_abs(block.end);
            }
            ForIter(b) => {
                let iter_slot = frame.top().expect("FOR_ITER on empty stack");
                let iter = reference::deref(self, frame, &iter_slot)?;
                if !iterator::has_next(&iter) {
                    frame.pop();
                    let block = frame.code.co_blocks[b as usize];
                    frame.jump_abs(block.end);
                } else if let Some(next) = iterator::next_value(self, &iter) {
                    if let Some(var) = iterator::var_of(&iter) {
                        var.set(self, frame, next)?;
                    }
                } else {
                    frame.pop();
                    let block = frame.code.co_blocks[b as usize];
                    frame.jump_abs(block.end);
                }
            }
            GetIter => {
                let iterable_slot = frame.pop().expect("GET_ITER needs iterable");
                let target_slot = frame.pop().expect("GET_ITER needs a reference target");
                let iterable = reference::deref(self, frame, &iterable_slot)?;
                let target = match target_slot {
                    Slot::Ref(r) => r,
                    Slot::Val(_) => return Err(VmError::bare("UnexpectedError", "GET_ITER target is not a reference")),
                };
                let iter = iterator::get_iter(self, &iterable)?;
                iterator::bind_var(&iter, target);
                frame.push_value(iter);
            }
            WithEnter => {
                let top = frame.top().expect("WITH_ENTER on empty stack");
                let val = reference::deref(self, frame, &top)?;
                object::call_method(self, &val, "__enter__", &[])?;
            }
            WithExit => {
                let val = self.pop_value(frame)?;
                object::call_method(self, &val, "__exit__", &[])?;
            }
            StoreFunction => {
                let v = self.pop_value(frame)?;
                if let Payload::Function(fval) = &v.0.payload {
                    frame.module.0.attribs.borrow_mut().insert(fval.name.clone(), v.clone());
                    v.0.attribs.borrow_mut().insert("__module__".to_string(), frame.module.clone());
                }
            }
            BuildClass(i) => {
                let (name, _) = frame.code.co_names[i as usize].clone();
                let base_val = self.pop_value(frame)?;
                let base = if matches!(base_val.0.payload, Payload::Unit) {
                    self.builtin_type("object")
                } else {
                    base_val
                };
                let class = Value::new(&self.builtin_type("type"), Payload::Type(TypeVal { name: name.clone(), base: Some(base) }));
                loop {
                    let v = self.pop_value(frame)?;
                    if matches!(v.0.payload, Payload::Unit) {
                        break;
                    }
                    if let Payload::Function(fval) = &v.0.payload {
                        class.0.attribs.borrow_mut().insert(fval.name.clone(), v.clone());
                    }
                }
                frame.module.0.attribs.borrow_mut().insert(name, class);
            }
            ReturnValue => {
                let v = self.pop_value(frame)?;
                self.frames.borrow_mut().pop();
                let new_depth = self.frames.borrow().len();
                if new_depth <= target_depth {
                    return Ok(Some(v));
                }
                let caller = self.frames.borrow().last().unwrap().clone();
                caller.push_value(v);
            }
            RaiseError => {
                let value = self.pop_value(frame)?;
                let kind_val = self.pop_value(frame)?;
                let kind = kind_val.as_str().unwrap_or("UnexpectedError").to_string();
                let message = self.repr_of(&value)?;
                return Err(VmError::bare(kind.as_str(), message));
            }
            Assert => {
                let v = self.pop_value(frame)?;
                if !self.truthy(&v)? {
                    return Err(VmError::bare("AssertionError", "assertion failed"));
                }
            }
            ImportName(i) => {
                let (name, _) = frame.code.co_names[i as usize].clone();
                let m = module::import_name(self, &name)?;
                frame.push_value(m);
            }
            PrintExpr => {
                let v = self.pop_value(frame)?;
                if !matches!(v.0.payload, Payload::Unit) {
                    let r = self.repr_of(&v)?;
                    self.write_stdout(&format!("{r}\n"));
                }
            }
        }
        Ok(None)
    }

    fn pop_value(&self, frame: &Rc<Frame>) -> VmResult<Value> {
        let slot = frame.pop().expect("popped an empty evaluation stack");
        reference::deref(self, frame, &slot)
    }

    fn pop_n_values(&self, frame: &Rc<Frame>, n: usize) -> VmResult<Vec<Value>> {
        let slots = frame.pop_n_reversed(n);
        let mut out = Vec::with_capacity(n);
        for s in slots {
            out.push(reference::deref(self, frame, &s)?);
        }
        Ok(out)
    }

    fn do_binary_op(&self, frame: &Rc<Frame>, op: BinOp) -> VmResult<()> {
        let b = self.pop_value(frame)?;
        let a = self.pop_value(frame)?;
        if let Some(v) = fast_binary(self, op, &a, &b)? {
            frame.push_value(v);
            return Ok(());
        }
        let name = binop_name(op);
        let out = object::call_method(self, &a, name, &[b])?;
        frame.push_value(out);
        Ok(())
    }

    fn do_compare_op(&self, frame: &Rc<Frame>, op: CompareOp) -> VmResult<()> {
        let b = self.pop_value(frame)?;
        let a = self.pop_value(frame)?;
        let result = match op {
            CompareOp::Eq => self.values_equal(&a, &b)?,
            CompareOp::Ne => !self.values_equal(&a, &b)?,
            _ => {
                if let Some(ord) = fast_compare(op, &a, &b) {
                    ord
                } else {
                    let name = cmp_name(op);
                    let out = object::call_method(self, &a, name, &[b])?;
                    self.truthy(&out)?
                }
            }
        };
        frame.push_value(self.make_bool(result));
        Ok(())
    }

    fn do_bitwise_op(&self, frame: &Rc<Frame>, op: BitwiseOp) -> VmResult<()> {
        let b = self.pop_value(frame)?;
        let a = self.pop_value(frame)?;
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            let r = match op {
                BitwiseOp::And => x & y,
                BitwiseOp::Or => x | y,
                BitwiseOp::Xor => x ^ y,
                BitwiseOp::Shl => x << y,
                BitwiseOp::Shr => x >> y,
            };
            frame.push_value(self.make_int(r));
            return Ok(());
        }
        let name = bitop_name(op);
        let out = object::call_method(self, &a, name, &[b])?;
        frame.push_value(out);
        Ok(())
    }

    /// Human-readable bytecode dump (spec §11, grounded in the source's
    /// `VM::disassemble`).
    pub fn disassemble(&self, code: &CodeObject) -> String {
        let mut out = String::new();
        for (i, instr) in code.co_code.iter().enumerate() {
            out.push_str(&format!("{i:>4} | line {:>4} | {}\n", instr.line, instr.op));
        }
        out
    }
}

fn module_name(module: &Value) -> String {
    module.0.attribs.borrow().get("__name__").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "__add__",
        BinOp::Sub => "__sub__",
        BinOp::Mul => "__mul__",
        BinOp::Div => "__truediv__",
        BinOp::FloorDiv => "__floordiv__",
        BinOp::Mod => "__mod__",
        BinOp::Pow => "__pow__",
    }
}

fn cmp_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Lt => "__lt__",
        CompareOp::Le => "__le__",
        CompareOp::Gt => "__gt__",
        CompareOp::Ge => "__ge__",
        CompareOp::Eq => "__eq__",
        CompareOp::Ne => "__ne__",
    }
}

fn bitop_name(op: BitwiseOp) -> &'static str {
    match op {
        BitwiseOp::And => "__and__",
        BitwiseOp::Or => "__or__",
        BitwiseOp::Xor => "__xor__",
        BitwiseOp::Shl => "__lshift__",
        BitwiseOp::Shr => "__rshift__",
    }
}

/// Int/int, float-mixed, string, and list fast paths; anything else falls
/// back to special-method dispatch (spec §4.3: arithmetic never widens to
/// float except division). Division and modulo by zero raise
/// `ZeroDivisionError` (source: `vm.h`'s `zeroDivisionError()`), never a
/// host panic or a silent `inf`.
fn fast_binary(vm: &Vm, op: BinOp, a: &Value, b: &Value) -> VmResult<Option<Value>> {
    Ok(match (&a.0.payload, &b.0.payload) {
        (Payload::Int(x), Payload::Int(y)) => match op {
            BinOp::Add => Some(vm.make_int(x + y)),
            BinOp::Sub => Some(vm.make_int(x - y)),
            BinOp::Mul => Some(vm.make_int(x * y)),
            BinOp::FloorDiv => {
                if *y == 0 {
                    return Err(VmError::bare("ZeroDivisionError", "integer division or modulo by zero"));
                }
                Some(vm.make_int(x.div_euclid(*y)))
            }
            BinOp::Mod => {
                if *y == 0 {
                    return Err(VmError::bare("ZeroDivisionError", "integer division or modulo by zero"));
                }
                Some(vm.make_int(x.rem_euclid(*y)))
            }
            BinOp::Div => {
                if *y == 0 {
                    return Err(VmError::bare("ZeroDivisionError", "division by zero"));
                }
                Some(vm.make_float(*x as f64 / *y as f64))
            }
            BinOp::Pow => Some(vm.make_int(x.pow((*y).max(0) as u32))),
        },
        (Payload::Float(_), _) | (_, Payload::Float(_)) => {
            let x = match a.as_float() {
                Some(v) => v,
                None => return Ok(None),
            };
            let y = match b.as_float() {
                Some(v) => v,
                None => return Ok(None),
            };
            if y == 0.0 && matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) {
                return Err(VmError::bare("ZeroDivisionError", "float division by zero"));
            }
            Some(match op {
                BinOp::Add => vm.make_float(x + y),
                BinOp::Sub => vm.make_float(x - y),
                BinOp::Mul => vm.make_float(x * y),
                BinOp::Div => vm.make_float(x / y),
                BinOp::FloorDiv => vm.make_float((x / y).floor()),
                BinOp::Mod => vm.make_float(x.rem_euclid(y)),
                BinOp::Pow => vm.make_float(x.powf(y)),
            })
        }
        (Payload::Str(x), Payload::Str(y)) if matches!(op, BinOp::Add) => Some(vm.make_str(format!("{x}{y}"))),
        (Payload::List(x), Payload::List(y)) if matches!(op, BinOp::Add) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Some(vm.make_list(items))
        }
        _ => None,
    })
}

fn fast_compare(op: CompareOp, a: &Value, b: &Value) -> Option<bool> {
    let ord = if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        x.partial_cmp(&y)?
    } else if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
        x.partial_cmp(&y)?
    } else if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        x.partial_cmp(y)?
    } else {
        return None;
    };
    Some(match op {
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Le => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Ge => ord.is_ge(),
        CompareOp::Eq | CompareOp::Ne => unreachable!("handled by values_equal"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitte_core::{BlockKind, Mode};

    fn vm() -> Vm {
        Vm::with_options(VmOptions::default().with_stdio(false))
    }

    #[test]
    fn small_int_interning() {
        let vm = vm();
        let a = vm.make_int(1);
        let b = vm.make_int(1);
        assert!(a.ptr_eq(&b));
        let x = vm.make_int(1000);
        let y = vm.make_int(1000);
        assert!(!x.ptr_eq(&y));
    }

    #[test]
    fn arithmetic_and_print() {
        let vm = vm();
        let mut code = CodeObject::new("<module>", "t.vit", Mode::Exec);
        let k1 = code.add_const(ConstLiteral::Int(2));
        let k2 = code.add_const(ConstLiteral::Int(3));
        code.push(vitte_core::Op::LoadConst(k1), 1);
        code.push(vitte_core::Op::LoadConst(k2), 1);
        code.push(vitte_core::Op::BinaryOp(BinOp::Add), 1);
        code.push(vitte_core::Op::PrintExpr, 1);
        let result = vm.exec(Rc::new(code), None);
        assert!(result.is_some());
        assert_eq!(vm.take_stdout(), "5\n");
    }

    #[test]
    fn for_loop_sums_range() {
        let vm = vm();
        let range = Value::new(&vm.builtin_type("range"), Payload::Range(RangeVal { start: 0, stop: 5, step: 1 }));
        let iter = iterator::get_iter(&vm, &range).unwrap();
        let mut sum = 0;
        while iterator::has_next(&iter) {
            let v = iterator::next_value(&vm, &iter).unwrap();
            sum += v.as_int().unwrap();
        }
        assert_eq!(sum, 10);
    }

    #[test]
    fn mro_super_chain() {
        let vm = vm();
        let object_ty = vm.builtin_type("object");
        let base = Value::new(&vm.builtin_type("type"), Payload::Type(TypeVal { name: "B".into(), base: Some(object_ty) }));
        let native_f: value::NativeFn = Rc::new(|vm, args| Ok(vm.make_int(args[0].as_int().unwrap_or(0) + 1)));
        base.0.attribs.borrow_mut().insert("f".to_string(), Value::new(&vm.builtin_type("native_function"), Payload::Native(native_f)));
        let derived = Value::new(&vm.builtin_type("type"), Payload::Type(TypeVal { name: "D".into(), base: Some(base) }));
        let instance = Value::new(&derived, Payload::Unit);
        let sup = Value::new(&vm.builtin_type("super"), Payload::Super { receiver: instance.clone(), depth: 0 });
        let got = object::getattr(&vm, &sup, "f", true).unwrap().unwrap();
        let outcome = object::call(&vm, &got, vec![vm.make_int(1)], vec![]).unwrap();
        let result = vm.resolve(outcome).unwrap();
        assert_eq!(result.as_int(), Some(2));
    }

    #[test]
    fn recursion_limit_raises() {
        let vm = Vm::with_options(VmOptions::default().with_stdio(false).with_max_recursion_depth(3));
        let module = module::new_module(&vm, "__main__");
        let mut code = CodeObject::new("loopf", "t.vit", Mode::Exec);
        code.add_name("loopf", vitte_core::Scope::Global);
        code.push(vitte_core::Op::LoadNameRef(0), 1);
        code.push(vitte_core::Op::Call { argc: 0, kwargc: 0 }, 1);
        code.push(vitte_core::Op::PopTop, 1);
        code.push(vitte_core::Op::LoadNone, 1);
        code.push(vitte_core::Op::ReturnValue, 1);
        let code = Rc::new(code);
        let f = Value::new(
            &vm.builtin_type("function"),
            Payload::Function(Rc::new(FunctionVal {
                name: "loopf".into(),
                code: code.clone(),
                module: module.clone(),
                params: vec![],
                kwparams: vec![],
                varargs: None,
            })),
        );
        module.0.attribs.borrow_mut().insert("loopf".to_string(), f);
        let result = vm.exec(code, Some(module));
        assert!(result.is_none());
    }
}
