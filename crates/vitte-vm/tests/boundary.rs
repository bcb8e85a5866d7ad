//! Whole-VM boundary scenarios (see `spec.md` §8), hand-assembled since
//! there is no compiler in this workspace.

use std::rc::Rc;

use vitte_core::{BinOp, CodeObject, ConstLiteral, Mode, Op, Scope};
use vitte_vm::value::{Payload, Value};
use vitte_vm::{Vm, VmOptions};

fn vm() -> Vm {
    Vm::with_options(VmOptions::default().with_stdio(false))
}

#[test]
fn interning_boundary() {
    let vm = vm();
    let mut code = CodeObject::new("<module>", "t.vit", Mode::Exec);
    let one = code.add_const(ConstLiteral::Int(1));
    let two = code.add_const(ConstLiteral::Int(2));
    let thousand = code.add_const(ConstLiteral::Int(1000));

    // print(1 + 1 is 2)
    code.push(Op::LoadConst(one), 1);
    code.push(Op::LoadConst(one), 1);
    code.push(Op::BinaryOp(BinOp::Add), 1);
    code.push(Op::LoadConst(two), 1);
    code.push(Op::IsOp { negate: false }, 1);
    code.push(Op::PrintExpr, 1);

    // print(1000 is 1000)
    code.push(Op::LoadConst(thousand), 2);
    code.push(Op::LoadConst(thousand), 2);
    code.push(Op::IsOp { negate: false }, 2);
    code.push(Op::PrintExpr, 2);

    let result = vm.exec(Rc::new(code), None);
    assert!(result.is_some());
    assert_eq!(vm.take_stdout(), "True\nFalse\n");
}

#[test]
fn tuple_unpack_ok() {
    let vm = vm();
    let mut code = CodeObject::new("<module>", "t.vit", Mode::Exec);
    let a = code.add_name("a", Scope::Local);
    let b = code.add_name("b", Scope::Local);
    let one = code.add_const(ConstLiteral::Int(1));
    let two = code.add_const(ConstLiteral::Int(2));

    // target = (a, b) as a tuple of references
    code.push(Op::LoadNameRef(a), 1);
    code.push(Op::LoadNameRef(b), 1);
    code.push(Op::BuildSmartTuple(2), 1);
    // rhs = (1, 2) as a value tuple
    code.push(Op::LoadConst(one), 1);
    code.push(Op::LoadConst(two), 1);
    code.push(Op::BuildSmartTuple(2), 1);
    code.push(Op::StoreRef, 1);

    // print(a + b)
    code.push(Op::LoadName(a), 2);
    code.push(Op::LoadName(b), 2);
    code.push(Op::BinaryOp(BinOp::Add), 2);
    code.push(Op::PrintExpr, 2);

    let result = vm.exec(Rc::new(code), None);
    assert!(result.is_some());
    assert_eq!(vm.take_stdout(), "3\n");
}

#[test]
fn tuple_unpack_too_many_values() {
    let vm = vm();
    let mut code = CodeObject::new("<module>", "t.vit", Mode::Exec);
    let a = code.add_name("a", Scope::Local);
    let b = code.add_name("b", Scope::Local);
    let one = code.add_const(ConstLiteral::Int(1));
    let two = code.add_const(ConstLiteral::Int(2));
    let three = code.add_const(ConstLiteral::Int(3));

    code.push(Op::LoadNameRef(a), 1);
    code.push(Op::LoadNameRef(b), 1);
    code.push(Op::BuildSmartTuple(2), 1);
    code.push(Op::LoadConst(one), 1);
    code.push(Op::LoadConst(two), 1);
    code.push(Op::LoadConst(three), 1);
    code.push(Op::BuildSmartTuple(3), 1);
    code.push(Op::StoreRef, 1);

    let result = vm.exec(Rc::new(code), None);
    assert!(result.is_none());
}

#[test]
fn for_loop_sums_range_via_bytecode() {
    let vm = vm();
    let range_fn: vitte_vm::value::NativeFn =
        Rc::new(|vm, _args| Ok(Value::new(&vm.builtin_type("range"), Payload::Range(vitte_vm::value::RangeVal { start: 0, stop: 5, step: 1 }))));
    vm.bind_builtin_func("make_range_0_5", range_fn);

    let mut code = CodeObject::new("<module>", "t.vit", Mode::Exec);
    let s = code.add_name("s", Scope::Local);
    let i = code.add_name("i", Scope::Local);
    let range_name = code.add_name("make_range_0_5", Scope::Local);
    let zero = code.add_const(ConstLiteral::Int(0));

    code.push(Op::LoadConst(zero), 1);
    code.push(Op::StoreNameRef(s), 1);

    code.push(Op::LoadNameRef(i), 2);
    code.push(Op::LoadName(range_name), 2);
    code.push(Op::Call { argc: 0, kwargc: 0 }, 2);
    code.push(Op::GetIter, 2);

    let loop_start = code.push(Op::NoOp, 2);
    let block_ix = code.add_block(loop_start, 0, vitte_core::BlockKind::Loop);
    code.push(Op::ForIter(block_ix), 2);
    code.push(Op::LoadNameRef(s), 2);
    code.push(Op::LoadName(s), 2);
    code.push(Op::LoadName(i), 2);
    code.push(Op::BinaryOp(BinOp::Add), 2);
    code.push(Op::StoreRef, 2);
    code.push(Op::LoopContinue(block_ix), 2);
    let loop_end = code.push(Op::LoadName(s), 3);
    code.co_blocks[block_ix as usize].end = loop_end;
    code.push(Op::PrintExpr, 3);

    let result = vm.exec(Rc::new(code), None);
    assert!(result.is_some());
    assert_eq!(vm.take_stdout(), "10\n");
}

#[test]
fn channel_round_trip() {
    use vitte_vm::channel::Phase;

    // `__string_channel_call` is bound by `with_channel()` itself; the test
    // only supplies the host side of the protocol (reading the outgoing
    // message, installing a response).
    let vm = vm().with_channel();
    let ch = vm.channel.clone().unwrap();

    let mut code = CodeObject::new("<module>", "t.vit", Mode::Exec);
    let call_name = code.add_name("__string_channel_call", Scope::Local);
    let result_name = code.add_name("result", Scope::Local);
    let msg = code.add_const(ConstLiteral::Str("ping".to_string()));
    code.push(Op::LoadName(call_name), 1);
    code.push(Op::LoadConst(msg), 1);
    code.push(Op::Call { argc: 1, kwargc: 0 }, 1);
    code.push(Op::StoreNameRef(result_name), 1);
    code.push(Op::LoadName(result_name), 2);
    code.push(Op::PrintExpr, 2);

    vm.exec_async(Rc::new(code), None).unwrap();
    assert_eq!(ch.get_state(), Phase::Suspended);
    assert_eq!(ch.take_incoming(), Some("ping".to_string()));

    ch.write_jsonrpc_response("pong".to_string());
    vm.resume_channel().unwrap();
    assert_eq!(ch.get_state(), Phase::Finished);
    // PrintExpr echoes via repr(), so a string result prints quoted.
    assert_eq!(vm.take_stdout(), "'pong'\n");
}
