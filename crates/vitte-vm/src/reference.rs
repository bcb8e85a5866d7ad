//! reference.rs — the l-value protocol (spec §4.2).
//!
//! Kept as a tagged sum distinct from `Value`/`Payload`, per the design
//! note: references live on the frame's evaluation stack as `Slot::Ref`,
//! never folded into `Payload`, so `try_deref` is a plain match instead of
//! a downcast.

use vitte_core::{Scope, VmError, VmResult};

use crate::object;
use crate::value::Value;
use crate::{Frame, Vm};

#[derive(Clone)]
pub enum Reference {
    Name { name: String, scope: Scope },
    Attr { obj: Value, name: String },
    Index { obj: Value, key: Value },
    Tuple(Vec<Reference>),
}

impl Reference {
    pub fn get(&self, vm: &Vm, frame: &Frame) -> VmResult<Value> {
        match self {
            Reference::Name { name, .. } => lookup_name(vm, frame, name),
            Reference::Attr { obj, name } => object::getattr(vm, obj, name, true)
                .map(|v| v.expect("throw=true always yields Some or Err")),
            Reference::Index { obj, key } => object::call_method(vm, obj, "__getitem__", &[key.clone()]),
            Reference::Tuple(refs) => {
                let mut items = Vec::with_capacity(refs.len());
                for r in refs {
                    items.push(r.get(vm, frame)?);
                }
                Ok(vm.make_tuple(items))
            }
        }
    }

    pub fn set(&self, vm: &Vm, frame: &Frame, val: Value) -> VmResult<()> {
        match self {
            Reference::Name { name, scope } => set_name(vm, frame, name, *scope, val),
            Reference::Attr { obj, name } => object::setattr(vm, obj, name, val),
            Reference::Index { obj, key } => {
                object::call_method(vm, obj, "__setitem__", &[key.clone(), val]).map(|_| ())
            }
            Reference::Tuple(refs) => {
                let items = vm.unpack_sequence(&val, refs.len())?;
                for (r, v) in refs.iter().zip(items.into_iter()) {
                    r.set(vm, frame, v)?;
                }
                Ok(())
            }
        }
    }

    pub fn del(&self, vm: &Vm, frame: &Frame) -> VmResult<()> {
        match self {
            Reference::Name { name, .. } => del_name(frame, name),
            Reference::Attr { .. } => {
                Err(VmError::bare("TypeError", "cannot delete attribute"))
            }
            Reference::Index { obj, key } => {
                object::call_method(vm, obj, "__delitem__", &[key.clone()]).map(|_| ())
            }
            Reference::Tuple(refs) => {
                for r in refs {
                    r.del(vm, frame)?;
                }
                Ok(())
            }
        }
    }
}

/// Dereferences a value: references resolve via `get`, everything else
/// passes through unchanged (spec invariant 4).
pub fn deref(vm: &Vm, frame: &Frame, slot: &crate::frame::Slot) -> VmResult<Value> {
    match slot {
        crate::frame::Slot::Val(v) => Ok(v.clone()),
        crate::frame::Slot::Ref(r) => r.get(vm, frame),
    }
}

fn lookup_name(vm: &Vm, frame: &Frame, name: &str) -> VmResult<Value> {
    if let Some(v) = frame.locals.borrow().get(name) {
        return Ok(v.clone());
    }
    if let Some(v) = frame.module.0.attribs.borrow().get(name) {
        return Ok(v.clone());
    }
    if let Some(v) = vm.builtins.0.attribs.borrow().get(name) {
        return Ok(v.clone());
    }
    Err(VmError::bare("NameError", format!("name '{name}' is not defined")))
}

fn set_name(_vm: &Vm, frame: &Frame, name: &str, scope: Scope, val: Value) -> VmResult<()> {
    match scope {
        Scope::Local => {
            frame.locals.borrow_mut().insert(name.to_string(), val);
        }
        Scope::Global => {
            if frame.locals.borrow().contains_key(name) {
                frame.locals.borrow_mut().insert(name.to_string(), val);
            } else {
                frame.module.0.attribs.borrow_mut().insert(name.to_string(), val);
            }
        }
    }
    Ok(())
}

fn del_name(frame: &Frame, name: &str) -> VmResult<()> {
    if frame.locals.borrow_mut().remove(name).is_some() {
        return Ok(());
    }
    if frame.module.0.attribs.borrow_mut().remove(name).is_some() {
        return Ok(());
    }
    Err(VmError::bare("NameError", format!("name '{name}' is not defined")))
}
