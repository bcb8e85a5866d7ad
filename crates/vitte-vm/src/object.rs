//! object.rs — attribute lookup, MRO walk, `super`, and the calling
//! convention (spec §4.4).

use std::collections::HashSet;

use vitte_core::VmError;
use vitte_core::VmResult;

use crate::value::{Payload, TypeVal, Value};
use crate::Vm;

/// What invoking a callable produced. `PushedFrame` means a user-function
/// frame now sits on top of `vm`'s call stack; the interpreter keeps
/// dispatching there instead of recursing the host stack (the trampoline).
pub enum CallOutcome {
    Value(Value),
    PushedFrame,
}

/// Walks `start`'s `__base__` chain, returning the first `attribs[name]`
/// found, unbound.
fn mro_lookup(start: &Value, name: &str) -> Option<Value> {
    let mut cur = start.clone();
    loop {
        if let Some(v) = cur.0.attribs.borrow().get(name) {
            return Some(v.clone());
        }
        let next = match &cur.0.payload {
            Payload::Type(TypeVal { base: Some(b), .. }) => b.clone(),
            _ => return None,
        };
        cur = next;
    }
}

fn is_callable_attr(v: &Value) -> bool {
    matches!(v.0.payload, Payload::Function(_) | Payload::Native(_))
}

/// `getattr(obj, name, throw?)`. Returns `Ok(None)` only when `!throw` and
/// nothing was found.
pub fn getattr(vm: &Vm, obj: &Value, name: &str, throw: bool) -> VmResult<Option<Value>> {
    if let Payload::Super { receiver, depth } = &obj.0.payload {
        let (recv, total_depth) = unwrap_super_chain(receiver.clone(), *depth);
        if let Some(v) = recv.0.attribs.borrow().get(name) {
            return Ok(Some(v.clone()));
        }
        let mut search = recv.type_obj().and_then(|t| base_of(&t));
        for _ in 0..total_depth {
            search = search.and_then(|t| base_of(&t));
        }
        if let Some(start) = search {
            if let Some(found) = mro_lookup(&start, name) {
                if is_callable_attr(&found) {
                    return Ok(Some(Value::new(
                        &vm.builtin_type("bound_method"),
                        Payload::BoundMethod { receiver: recv, func: found },
                    )));
                }
                return Ok(Some(found));
            }
        }
        return finish_miss(vm, obj, name, throw);
    }

    if let Some(v) = obj.0.attribs.borrow().get(name) {
        return Ok(Some(v.clone()));
    }
    if let Some(ty) = obj.type_obj() {
        if let Some(found) = mro_lookup(&ty, name) {
            if is_callable_attr(&found) {
                return Ok(Some(Value::new(
                    &vm.builtin_type("bound_method"),
                    Payload::BoundMethod { receiver: obj.clone(), func: found },
                )));
            }
            return Ok(Some(found));
        }
    }
    finish_miss(vm, obj, name, throw)
}

fn finish_miss(vm: &Vm, obj: &Value, name: &str, throw: bool) -> VmResult<Option<Value>> {
    if throw {
        let tyname = obj.type_obj().map(|t| type_name(&t)).unwrap_or_else(|| "?".into());
        let _ = vm;
        Err(VmError::bare("AttributeError", format!("'{tyname}' object has no attribute '{name}'")))
    } else {
        Ok(None)
    }
}

fn type_name(ty: &Value) -> String {
    match &ty.0.payload {
        Payload::Type(t) => t.name.clone(),
        _ => "?".to_string(),
    }
}

fn base_of(ty: &Value) -> Option<Value> {
    match &ty.0.payload {
        Payload::Type(TypeVal { base, .. }) => base.clone(),
        _ => None,
    }
}

fn unwrap_super_chain(mut receiver: Value, mut depth: u32) -> (Value, u32) {
    loop {
        let next = match &receiver.0.payload {
            Payload::Super { receiver: inner, depth: d } => Some((inner.clone(), *d)),
            _ => None,
        };
        match next {
            Some((inner, d)) => {
                depth += d;
                receiver = inner;
            }
            None => return (receiver, depth),
        }
    }
}

pub fn setattr(_vm: &Vm, obj: &Value, name: &str, value: Value) -> VmResult<()> {
    obj.0.attribs.borrow_mut().insert(name.to_string(), value);
    Ok(())
}

/// `fast_call`: resolves `name` via `args[0]`'s MRO directly (no bound
/// method allocated) and prepends the receiver, then calls.
pub fn fast_call(vm: &Vm, name: &str, args: &[Value]) -> VmResult<CallOutcome> {
    let recv = args.first().cloned().ok_or_else(|| {
        VmError::bare("TypeError", format!("fast_call '{name}' requires a receiver"))
    })?;
    let found = recv
        .0
        .attribs
        .borrow()
        .get(name)
        .cloned()
        .or_else(|| recv.type_obj().and_then(|t| mro_lookup(&t, name)));
    match found {
        Some(f) => call(vm, &f, args.to_vec(), Vec::new()),
        None => {
            let tyname = recv.type_obj().map(|t| type_name(&t)).unwrap_or_default();
            Err(VmError::bare("AttributeError", format!("'{tyname}' object has no attribute '{name}'")))
        }
    }
}

/// Calls `callable` fully, driving the trampoline to completion and
/// returning its value. Used where the caller needs a synchronous result
/// (e.g. `__getitem__` from the reference protocol).
pub fn call_method(vm: &Vm, obj: &Value, name: &str, args: &[Value]) -> VmResult<Value> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(obj.clone());
    full.extend_from_slice(args);
    let found = getattr(vm, obj, name, true)?.expect("throw=true");
    // getattr already bound the receiver if it was a plain function; don't
    // double-prepend in that case.
    let outcome = if matches!(found.0.payload, Payload::BoundMethod { .. }) {
        call(vm, &found, args.to_vec(), Vec::new())?
    } else {
        call(vm, &found, full, Vec::new())?
    };
    vm.resolve(outcome)
}

/// The four calling cases (spec §4.4).
pub fn call(vm: &Vm, callee: &Value, mut args: Vec<Value>, kwargs: Vec<(String, Value)>) -> VmResult<CallOutcome> {
    match &callee.0.payload {
        Payload::Type(_) => {
            let new_hook = mro_lookup(callee, "__new__");
            let instance = if let Some(new_fn) = new_hook {
                let mut new_args = vec![callee.clone()];
                new_args.extend(args.clone());
                vm.resolve(call(vm, &new_fn, new_args, Vec::new())?)?
            } else {
                Value::new(callee, Payload::Unit)
            };
            if let Some(init_fn) = mro_lookup(callee, "__init__") {
                let mut init_args = vec![instance.clone()];
                init_args.extend(args);
                vm.resolve(call(vm, &init_fn, init_args, kwargs)?)?;
            }
            Ok(CallOutcome::Value(instance))
        }
        Payload::BoundMethod { receiver, func } => {
            let mut new_args = vec![receiver.clone()];
            new_args.append(&mut args);
            call(vm, func, new_args, kwargs)
        }
        Payload::Native(f) => Ok(CallOutcome::Value(f(vm, &args)?)),
        Payload::Function(fval) => {
            let locals = bind_user_args(vm, fval, &args, &kwargs)?;
            vm.push_call(fval.code.clone(), fval.module.clone(), locals)?;
            Ok(CallOutcome::PushedFrame)
        }
        _ => Err(VmError::bare(
            "TypeError",
            format!("'{}' object is not callable", callee.type_obj().map(|t| type_name(&t)).unwrap_or_default()),
        )),
    }
}

fn bind_user_args(
    vm: &Vm,
    fval: &crate::value::FunctionVal,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> VmResult<std::collections::HashMap<String, Value>> {
    let mut locals = std::collections::HashMap::new();
    let mut filled: HashSet<String> = HashSet::new();

    let nparams = fval.params.len();
    let take = args.len().min(nparams);
    for i in 0..take {
        locals.insert(fval.params[i].clone(), args[i].clone());
        filled.insert(fval.params[i].clone());
    }
    let overflow = &args[take..];

    if let Some(va_name) = &fval.varargs {
        locals.insert(va_name.clone(), vm.make_tuple(overflow.to_vec()));
        for (kn, kdefault) in &fval.kwparams {
            locals.insert(kn.clone(), kdefault.clone());
        }
    } else {
        if overflow.len() > fval.kwparams.len() {
            return Err(VmError::bare("TypeError", "too many positional arguments"));
        }
        for (i, (kn, kdefault)) in fval.kwparams.iter().enumerate() {
            if i < overflow.len() {
                locals.insert(kn.clone(), overflow[i].clone());
                filled.insert(kn.clone());
            } else {
                locals.insert(kn.clone(), kdefault.clone());
            }
        }
    }

    for (kname, kval) in kwargs {
        let is_param = fval.params.contains(kname) || fval.kwparams.iter().any(|(n, _)| n == kname);
        if !is_param {
            return Err(VmError::bare("TypeError", format!("unexpected keyword argument '{kname}'")));
        }
        if filled.contains(kname) {
            return Err(VmError::bare("TypeError", format!("multiple values for argument '{kname}'")));
        }
        locals.insert(kname.clone(), kval.clone());
        filled.insert(kname.clone());
    }

    for p in &fval.params {
        if !locals.contains_key(p) {
            return Err(VmError::bare("TypeError", format!("missing positional argument '{p}'")));
        }
    }

    Ok(locals)
}
