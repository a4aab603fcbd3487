//! Integration tests for interpreter
//!
//! Tests interaction between the dispatch loop, frames, upvalues, natives
//! and the collector.

use std::sync::Arc;

use bytecode_system::{Chunk, ChunkBuilder, Constant, Opcode, SlotId, UpvalueDescriptor};
use core_types::{ErrorKind, Value};
use interpreter::{HeapConfig, VmConfig, VM};

/// `fn <name>() { return <name>() }`, looked up through a global
fn self_recursive(name: &str) -> Chunk {
    let mut f = ChunkBuilder::new(name);
    let global = f.add_name(name);
    f.emit(Opcode::LoadGlobal(global));
    f.emit(Opcode::Call(0));
    f.emit(Opcode::Return);
    f.build()
}

/// main: define global `name` = closure over `function`, then call it with `args`
fn define_and_call(name: &str, function: Chunk, args: &[f64]) -> Arc<Chunk> {
    let mut main = ChunkBuilder::new("main");
    let proto = main.add_constant(function);
    let global = main.add_name(name);
    main.emit(Opcode::Closure(proto));
    main.emit(Opcode::StoreGlobal(global));
    main.emit(Opcode::LoadGlobal(global));
    for arg in args {
        main.emit(Opcode::LoadNumber(*arg));
    }
    main.emit(Opcode::Call(args.len() as u8));
    main.emit(Opcode::Return);
    Arc::new(main.build())
}

#[test]
fn test_unbounded_recursion_overflows() {
    let mut vm = VM::with_config(VmConfig {
        max_frames: 64,
        ..VmConfig::default()
    });
    let err = vm
        .run(define_and_call("f", self_recursive("f"), &[]), &[])
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::StackOverflow { .. }));
    assert_eq!(err.stack.len(), 64);
    assert_eq!(vm.call_depth(), 0);

    // The VM is still usable afterwards
    let mut ok = ChunkBuilder::new("ok");
    ok.emit(Opcode::LoadTrue);
    ok.emit(Opcode::Return);
    assert_eq!(vm.run(Arc::new(ok.build()), &[]).unwrap(), Value::Bool(true));
}

#[test]
fn test_native_recursion_counts_against_limit() {
    let mut vm = VM::with_config(VmConfig {
        max_frames: 1,
        ..VmConfig::default()
    });
    vm.register_native("id", 1, |args| Ok(args[0])).unwrap();
    let mut main = ChunkBuilder::new("main");
    let id = main.add_name("id");
    main.emit(Opcode::LoadGlobal(id));
    main.emit(Opcode::LoadNumber(1.0));
    main.emit(Opcode::Call(1));
    main.emit(Opcode::Return);
    let err = vm.run(Arc::new(main.build()), &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow { depth: 1 });
}

#[test]
fn test_tail_calls_do_not_grow_the_stack() {
    // count(n): if n == 0 { return 0 } return count(n - 1)
    let mut count = ChunkBuilder::new("count").arity(1).slots(1);
    let name = count.add_name("count");
    for op in [
        Opcode::LoadLocal(SlotId(0)),
        Opcode::LoadNumber(0.0),
        Opcode::Equal,
        Opcode::JumpIfFalse(6),
        Opcode::LoadNumber(0.0),
        Opcode::Return,
        Opcode::LoadGlobal(name),
        Opcode::LoadLocal(SlotId(0)),
        Opcode::LoadNumber(1.0),
        Opcode::Sub,
        Opcode::TailCall(1),
    ] {
        count.emit(op);
    }

    let mut vm = VM::with_config(VmConfig {
        max_frames: 16,
        ..VmConfig::default()
    });
    let result = vm.run(define_and_call("count", count.build(), &[1000.0]), &[]);
    assert_eq!(result.unwrap(), Value::Number(0.0));
}

#[test]
fn test_tail_call_without_base_case_loops_until_cancelled() {
    let mut vm = VM::new();
    let handle = vm.cancel_handle();
    vm.register_native("stop", 0, move |_| {
        handle.cancel();
        Ok(Value::Nil)
    })
    .unwrap();

    let mut spin = ChunkBuilder::new("spin");
    let stop = spin.add_name("stop");
    let name = spin.add_name("spin");
    spin.emit(Opcode::LoadGlobal(stop));
    spin.emit(Opcode::Call(0));
    spin.emit(Opcode::Pop);
    spin.emit(Opcode::LoadGlobal(name));
    spin.emit(Opcode::TailCall(0));

    let err = vm.run(define_and_call("spin", spin.build(), &[]), &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(err.stack[0].function, "spin");
}

/// make(): local n = 0
///   get = fn() { return n }
///   inc = fn() { n = n + 1 }
///   return [get, inc]
fn shared_cell_program() -> Arc<Chunk> {
    let mut get = ChunkBuilder::new("get");
    get.add_upvalue(UpvalueDescriptor::new(true, 0));
    get.emit(Opcode::LoadUpvalue(0));
    get.emit(Opcode::Return);

    let mut inc = ChunkBuilder::new("inc");
    inc.add_upvalue(UpvalueDescriptor::new(true, 0));
    inc.emit(Opcode::LoadUpvalue(0));
    inc.emit(Opcode::LoadNumber(1.0));
    inc.emit(Opcode::Add);
    inc.emit(Opcode::StoreUpvalue(0));
    inc.emit(Opcode::LoadNil);
    inc.emit(Opcode::Return);

    let mut make = ChunkBuilder::new("make").slots(1);
    let get = make.add_constant(get.build());
    let inc = make.add_constant(inc.build());
    make.emit(Opcode::LoadNumber(0.0));
    make.emit(Opcode::StoreLocal(SlotId(0)));
    make.emit(Opcode::Closure(get));
    make.emit(Opcode::Closure(inc));
    make.emit(Opcode::NewArray(2));
    make.emit(Opcode::Return);
    Arc::new(make.build())
}

#[test]
fn test_closures_share_closed_cell() {
    let mut vm = VM::new();
    let pair = vm.run(shared_cell_program(), &[]).unwrap();
    vm.pin(pair);
    let fns = vm.array_values(&pair).unwrap().to_vec();
    let (get, inc) = (fns[0], fns[1]);

    vm.call(inc, &[]).unwrap();
    vm.call(inc, &[]).unwrap();
    assert_eq!(vm.call(get, &[]).unwrap(), Value::Number(2.0));

    // A second instance gets its own cell
    let other = vm.run(shared_cell_program(), &[]).unwrap();
    let other_get = vm.array_values(&other).unwrap()[0];
    assert_eq!(vm.call(other_get, &[]).unwrap(), Value::Number(0.0));
    assert_eq!(vm.call(get, &[]).unwrap(), Value::Number(2.0));
}

#[test]
fn test_open_cell_sees_frame_writes() {
    // main: local x = 1; f = fn() { return x }; x = 5; return f()
    let mut f = ChunkBuilder::new("f");
    f.add_upvalue(UpvalueDescriptor::new(true, 0));
    f.emit(Opcode::LoadUpvalue(0));
    f.emit(Opcode::Return);

    let mut main = ChunkBuilder::new("main").slots(2);
    let proto = main.add_constant(f.build());
    for op in [
        Opcode::LoadNumber(1.0),
        Opcode::StoreLocal(SlotId(0)),
        Opcode::Closure(proto),
        Opcode::StoreLocal(SlotId(1)),
        Opcode::LoadNumber(5.0),
        Opcode::StoreLocal(SlotId(0)),
        Opcode::LoadLocal(SlotId(1)),
        Opcode::Call(0),
        Opcode::Return,
    ] {
        main.emit(op);
    }
    assert_eq!(VM::new().run(Arc::new(main.build()), &[]).unwrap(), Value::Number(5.0));
}

#[test]
fn test_close_upvalues_in_loop_body() {
    // Each iteration captures a fresh cell for slot 1 and closes it before
    // the next iteration, so the closures remember 0, 1, 2.
    let mut f = ChunkBuilder::new("f");
    f.add_upvalue(UpvalueDescriptor::new(true, 1));
    f.emit(Opcode::LoadUpvalue(0));
    f.emit(Opcode::Return);

    let mut main = ChunkBuilder::new("main").slots(3);
    let proto = main.add_constant(f.build());
    for op in [
        // slot0 = 0 (i), slot2 = [] (closures)
        Opcode::LoadNumber(0.0),
        Opcode::StoreLocal(SlotId(0)),
        Opcode::NewArray(0),
        Opcode::StoreLocal(SlotId(2)),
        // 4: while i < 3
        Opcode::LoadLocal(SlotId(0)),
        Opcode::LoadNumber(3.0),
        Opcode::Less,
        Opcode::JumpIfFalse(20),
        // slot1 = i; closures[i] = closure
        Opcode::LoadLocal(SlotId(0)),
        Opcode::StoreLocal(SlotId(1)),
        Opcode::LoadLocal(SlotId(2)),
        Opcode::LoadLocal(SlotId(0)),
        Opcode::Closure(proto),
        Opcode::SetIndex,
        Opcode::CloseUpvalues(SlotId(1)),
        // i = i + 1
        Opcode::LoadLocal(SlotId(0)),
        Opcode::LoadNumber(1.0),
        Opcode::Add,
        Opcode::StoreLocal(SlotId(0)),
        Opcode::Jump(4),
        // 20: return closures
        Opcode::LoadLocal(SlotId(2)),
        Opcode::Return,
    ] {
        main.emit(op);
    }

    let mut vm = VM::new();
    let closures = vm.run(Arc::new(main.build()), &[]).unwrap();
    vm.pin(closures);
    let fns = vm.array_values(&closures).unwrap().to_vec();
    assert_eq!(fns.len(), 3);
    for (i, f) in fns.into_iter().enumerate() {
        assert_eq!(vm.call(f, &[]).unwrap(), Value::Number(i as f64));
    }
}

#[test]
fn test_nested_capture_through_enclosing_closure() {
    // outer(): local v = 7; mid = fn() { return fn() { return v } }; return mid()()
    let mut inner = ChunkBuilder::new("inner");
    inner.add_upvalue(UpvalueDescriptor::new(false, 0));
    inner.emit(Opcode::LoadUpvalue(0));
    inner.emit(Opcode::Return);

    let mut mid = ChunkBuilder::new("mid");
    mid.add_upvalue(UpvalueDescriptor::new(true, 0));
    let inner = mid.add_constant(inner.build());
    mid.emit(Opcode::Closure(inner));
    mid.emit(Opcode::Return);

    let mut outer = ChunkBuilder::new("outer").slots(1);
    let mid = outer.add_constant(mid.build());
    for op in [
        Opcode::LoadNumber(7.0),
        Opcode::StoreLocal(SlotId(0)),
        Opcode::Closure(mid),
        Opcode::Call(0),
        Opcode::Call(0),
        Opcode::Return,
    ] {
        outer.emit(op);
    }
    assert_eq!(VM::new().run(Arc::new(outer.build()), &[]).unwrap(), Value::Number(7.0));
}

#[test]
fn test_short_lived_strings_are_reclaimed() {
    let mut vm = VM::with_config(VmConfig {
        heap: HeapConfig {
            initial_threshold: 4 * 1024,
            growth_factor: 2.0,
            max_heap_bytes: 64 * 1024,
        },
        ..VmConfig::default()
    });

    // for i in 0..10000 { let s = "tmp" + "!" }
    let mut main = ChunkBuilder::new("main").slots(2);
    let tmp = main.add_constant("tmp");
    let bang = main.add_constant("!");
    for op in [
        Opcode::LoadNumber(0.0),
        Opcode::StoreLocal(SlotId(0)),
        Opcode::LoadLocal(SlotId(0)),
        Opcode::LoadNumber(10_000.0),
        Opcode::Less,
        Opcode::JumpIfFalse(15),
        Opcode::LoadConstant(tmp),
        Opcode::LoadConstant(bang),
        Opcode::Add,
        Opcode::StoreLocal(SlotId(1)),
        Opcode::LoadLocal(SlotId(0)),
        Opcode::LoadNumber(1.0),
        Opcode::Add,
        Opcode::StoreLocal(SlotId(0)),
        Opcode::Jump(2),
        Opcode::LoadNil,
        Opcode::Return,
    ] {
        main.emit(op);
    }

    let baseline = vm.heap().live_objects();
    assert_eq!(vm.run(Arc::new(main.build()), &[]).unwrap(), Value::Nil);
    assert!(vm.heap().stats().collections > 0);
    vm.collect_garbage();
    assert_eq!(vm.heap().live_objects(), baseline);
}

#[test]
fn test_out_of_memory_is_fatal_kind() {
    let mut vm = VM::with_config(VmConfig {
        heap: HeapConfig {
            initial_threshold: 1024,
            growth_factor: 2.0,
            max_heap_bytes: 2048,
        },
        ..VmConfig::default()
    });

    // Keep appending to one array until the heap refuses
    let mut main = ChunkBuilder::new("main").slots(1);
    let s = main.add_constant("0123456789");
    for op in [
        Opcode::NewArray(0),
        Opcode::StoreLocal(SlotId(0)),
        Opcode::LoadLocal(SlotId(0)),
        Opcode::LoadLocal(SlotId(0)),
        Opcode::Len,
        Opcode::LoadConstant(s),
        Opcode::SetIndex,
        Opcode::Jump(2),
    ] {
        main.emit(op);
    }
    let err = vm.run(Arc::new(main.build()), &[]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::OutOfMemory { limit: 2048, .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_string_constants_survive_collection_mid_expression() {
    let mut vm = VM::with_config(VmConfig {
        heap: HeapConfig {
            initial_threshold: 1,
            growth_factor: 0.0,
            ..HeapConfig::default()
        },
        ..VmConfig::default()
    });
    let mut main = ChunkBuilder::new("main");
    let a = main.add_constant(Constant::Str("left".to_string()));
    let b = main.add_constant(Constant::Str("right".to_string()));
    main.emit(Opcode::LoadConstant(a));
    main.emit(Opcode::LoadConstant(b));
    main.emit(Opcode::Nop);
    main.emit(Opcode::Add);
    main.emit(Opcode::Return);

    let result = vm.run(Arc::new(main.build()), &[]).unwrap();
    assert_eq!(vm.string_value(&result), Some("leftright"));
    assert!(vm.heap().stats().collections >= 4);
}

/// main: bind each `(name, function)` as a global closure
fn with_globals(functions: Vec<(&str, Chunk)>) -> (ChunkBuilder, Vec<u32>) {
    let mut main = ChunkBuilder::new("main").slots(1);
    let mut names = Vec::new();
    for (name, function) in functions {
        let proto = main.add_constant(function);
        let global = main.add_name(name);
        main.emit(Opcode::Closure(proto));
        main.emit(Opcode::StoreGlobal(global));
        names.push(global);
    }
    (main, names)
}

#[test]
fn test_throw_across_frames_closes_upvalues() {
    // thrower(x) { get = || x; throw x }
    let mut get = ChunkBuilder::new("get");
    get.add_upvalue(UpvalueDescriptor::new(true, 0));
    get.emit(Opcode::LoadUpvalue(0));
    get.emit(Opcode::Return);

    let mut thrower = ChunkBuilder::new("thrower").arity(1).slots(1);
    let proto = thrower.add_constant(get.build());
    let get_name = thrower.add_name("get");
    thrower.emit(Opcode::Closure(proto));
    thrower.emit(Opcode::StoreGlobal(get_name));
    thrower.emit(Opcode::LoadLocal(SlotId(0)));
    thrower.emit(Opcode::Throw);

    // try { thrower(7) } catch (e) { return get() + e }
    let (mut main, names) = with_globals(vec![("thrower", thrower.build())]);
    let get_global = main.add_name("get");
    for op in [
        Opcode::SetupTry(7),
        Opcode::LoadGlobal(names[0]),
        Opcode::LoadNumber(7.0),
        Opcode::Call(1),
        Opcode::Return,
        Opcode::StoreLocal(SlotId(0)),
        Opcode::LoadGlobal(get_global),
        Opcode::Call(0),
        Opcode::LoadLocal(SlotId(0)),
        Opcode::Add,
        Opcode::Return,
    ] {
        main.emit(op);
    }

    let mut vm = VM::new();
    assert_eq!(vm.run(Arc::new(main.build()), &[]).unwrap(), Value::Number(14.0));
    assert_eq!(vm.open_upvalue_count(), 0);
    assert_eq!(vm.active_handlers(), 0);
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn test_rethrow_from_catch_reaches_outer_handler() {
    let mut main = ChunkBuilder::new("main");
    for op in [
        Opcode::SetupTry(7),
        Opcode::SetupTry(4),
        Opcode::LoadNumber(1.0),
        Opcode::Throw,
        Opcode::LoadNumber(10.0),
        Opcode::Add,
        Opcode::Throw,
        Opcode::LoadNumber(100.0),
        Opcode::Add,
        Opcode::Return,
    ] {
        main.emit(op);
    }
    let mut vm = VM::new();
    assert_eq!(vm.run(Arc::new(main.build()), &[]).unwrap(), Value::Number(111.0));
}

#[test]
fn test_handler_does_not_outlive_its_frame() {
    // f() { try { return nil } ... } leaves its handler registered on return
    let mut f = ChunkBuilder::new("f");
    f.emit(Opcode::SetupTry(2));
    f.emit(Opcode::LoadNil);
    f.emit(Opcode::Return);

    let (mut main, names) = with_globals(vec![("f", f.build())]);
    let boom = main.add_constant("boom");
    for op in [
        Opcode::LoadGlobal(names[0]),
        Opcode::Call(0),
        Opcode::Pop,
        Opcode::LoadConstant(boom),
        Opcode::Throw,
    ] {
        main.emit(op);
    }

    let mut vm = VM::new();
    let err = vm.run(Arc::new(main.build()), &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Uncaught("boom".to_string()));
    assert_eq!(err.stack[0].function, "main");
    assert_eq!(vm.active_handlers(), 0);
}

#[test]
fn test_tail_call_drops_callers_handler() {
    let mut g = ChunkBuilder::new("g");
    g.emit(Opcode::LoadNumber(5.0));
    g.emit(Opcode::Throw);

    let mut f = ChunkBuilder::new("f");
    let g_name = f.add_name("g");
    f.emit(Opcode::SetupTry(4));
    f.emit(Opcode::LoadGlobal(g_name));
    f.emit(Opcode::TailCall(0));
    f.emit(Opcode::Return);
    f.emit(Opcode::LoadNumber(-1.0));
    f.emit(Opcode::Return);

    let (mut main, names) = with_globals(vec![("f", f.build()), ("g", g.build())]);
    for op in [
        Opcode::SetupTry(8),
        Opcode::LoadGlobal(names[0]),
        Opcode::Call(0),
        Opcode::Return,
        Opcode::LoadNumber(1.0),
        Opcode::Add,
        Opcode::Return,
    ] {
        main.emit(op);
    }

    let mut vm = VM::new();
    assert_eq!(vm.run(Arc::new(main.build()), &[]).unwrap(), Value::Number(6.0));
}

#[test]
fn test_runtime_errors_skip_handlers() {
    let mut main = ChunkBuilder::new("main");
    main.emit(Opcode::SetupTry(3));
    main.emit(Opcode::LoadNil);
    main.emit(Opcode::Neg);
    main.emit(Opcode::Return);

    let mut vm = VM::new();
    let err = vm.run(Arc::new(main.build()), &[]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    assert_eq!(vm.active_handlers(), 0);
}
