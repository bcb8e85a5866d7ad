//! module.rs — the eager/lazy module registry (spec §4.7).
//!
//! There is no source compiler in this workspace (Non-goal), so a "lazy"
//! module here is registered as a precompiled `CodeObject` rather than raw
//! source text — the embedder is expected to have compiled it upstream.
//! Materializing it (running its body in a fresh module) is unchanged.

use std::rc::Rc;

use vitte_core::{CodeObject, VmError, VmResult};

use crate::value::{Payload, Value};
use crate::Vm;

pub fn new_module(vm: &Vm, name: &str) -> Value {
    let module = Value::new(&vm.builtin_type("module"), Payload::Module);
    module.0.attribs.borrow_mut().insert("__name__".to_string(), vm.make_str(name.to_string()));
    vm.modules.borrow_mut().insert(name.to_string(), module.clone());
    module
}

pub fn add_lazy_module(vm: &Vm, name: &str, code: Rc<CodeObject>) {
    vm.lazy_modules.borrow_mut().insert(name.to_string(), code);
}

/// `IMPORT_NAME`: eager table, then lazy (compile+exec then cache), else
/// `ImportError`.
pub fn import_name(vm: &Vm, name: &str) -> VmResult<Value> {
    if let Some(m) = vm.modules.borrow().get(name) {
        return Ok(m.clone());
    }
    let lazy_code = vm.lazy_modules.borrow_mut().remove(name);
    if let Some(code) = lazy_code {
        let module = Value::new(&vm.builtin_type("module"), Payload::Module);
        module.0.attribs.borrow_mut().insert("__name__".to_string(), vm.make_str(name.to_string()));
        vm.run_module_body(code, module.clone())?;
        vm.modules.borrow_mut().insert(name.to_string(), module.clone());
        return Ok(module);
    }
    Err(VmError::bare("ImportError", format!("no module named '{name}'")))
}
