//! iterator.rs — `GET_ITER`/`FOR_ITER` support (spec §4.5).
//!
//! Only `range` and `str` are named as built-in iterables by the spec;
//! `list`/`tuple`/`dict`/`set` reuse the same sequential-index shape since
//! nothing about their iteration order is unspecified beyond "ordered".

use vitte_core::VmError;
use vitte_core::VmResult;

use crate::reference::Reference;
use crate::value::{IterState, Payload, RangeVal, Value};
use crate::Vm;

pub fn get_iter(vm: &Vm, val: &Value) -> VmResult<Value> {
    let state = match &val.0.payload {
        Payload::Range(RangeVal { start, stop, step }) => {
            IterState::Range { cur: *start, stop: *stop, step: *step, var: None }
        }
        Payload::Str(s) => IterState::Str { chars: s.chars().collect(), pos: 0, var: None },
        Payload::List(items) => IterState::Seq { items: items.borrow().clone(), pos: 0, var: None },
        Payload::Tuple(items) => IterState::Seq { items: items.clone(), pos: 0, var: None },
        Payload::Set(items) => IterState::Seq { items: items.borrow().clone(), pos: 0, var: None },
        Payload::Dict(entries) => {
            IterState::Seq { items: entries.borrow().iter().map(|(k, _)| k.clone()).collect(), pos: 0, var: None }
        }
        _ => return Err(VmError::bare("TypeError", "object is not iterable")),
    };
    Ok(Value::new(&vm.builtin_type("iterator"), Payload::Iterator(std::cell::RefCell::new(state))))
}

pub fn bind_var(iter: &Value, r: Reference) {
    if let Payload::Iterator(state) = &iter.0.payload {
        state.borrow_mut().bind(r);
    }
}

pub fn has_next(iter: &Value) -> bool {
    match &iter.0.payload {
        Payload::Iterator(state) => match &*state.borrow() {
            IterState::Range { cur, stop, step, .. } => {
                if *step >= 0 {
                    cur < stop
                } else {
                    cur > stop
                }
            }
            IterState::Str { chars, pos, .. } => *pos < chars.len(),
            IterState::Seq { items, pos, .. } => *pos < items.len(),
        },
        _ => false,
    }
}

/// Advances the iterator and returns the next value, or `None` once
/// exhausted.
pub fn next_value(vm: &Vm, iter: &Value) -> Option<Value> {
    match &iter.0.payload {
        Payload::Iterator(state) => {
            let mut s = state.borrow_mut();
            match &mut *s {
                IterState::Range { cur, stop, step, .. } => {
                    let has = if *step >= 0 { *cur < *stop } else { *cur > *stop };
                    if !has {
                        return None;
                    }
                    let v = *cur;
                    *cur += *step;
                    Some(vm.make_int(v))
                }
                IterState::Str { chars, pos, .. } => {
                    if *pos >= chars.len() {
                        return None;
                    }
                    let c = chars[*pos];
                    *pos += 1;
                    Some(vm.make_str(c.to_string()))
                }
                IterState::Seq { items, pos, .. } => {
                    if *pos >= items.len() {
                        return None;
                    }
                    let v = items[*pos].clone();
                    *pos += 1;
                    Some(v)
                }
            }
        }
        _ => None,
    }
}

pub fn var_of(iter: &Value) -> Option<Reference> {
    match &iter.0.payload {
        Payload::Iterator(state) => state.borrow().var().cloned(),
        _ => None,
    }
}
