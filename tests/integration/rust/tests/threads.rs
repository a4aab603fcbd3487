//! Multi-VM and cancellation tests
//!
//! Each thread owns its VM; chunks and native registries are shared.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use core_types::{ErrorKind, Value};
use integration_tests::{call_add, init_tracing, spin, sum_below};
use interpreter::{NativeRegistry, VmConfig, VM};

#[test]
fn test_vms_on_worker_threads_share_chunks() {
    init_tracing();
    let chunk = sum_below();
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let chunk = Arc::clone(&chunk);
            thread::spawn(move || {
                let mut vm = VM::new();
                let n = 100.0 * (worker + 1) as f64;
                vm.run(chunk, &[Value::Number(n)]).unwrap()
            })
        })
        .collect();

    let results: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(
        results,
        vec![
            Value::Number(4_950.0),
            Value::Number(19_900.0),
            Value::Number(44_850.0),
            Value::Number(79_800.0),
        ]
    );
}

#[test]
fn test_registry_installed_on_every_thread() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = NativeRegistry::new();
    let seen = Arc::clone(&calls);
    registry.register("add", 2, move |args| {
        seen.fetch_add(1, Ordering::SeqCst);
        match (args[0], args[1]) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            _ => Ok(Value::Nil),
        }
    });

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                let mut vm = VM::new();
                vm.install(&registry).unwrap();
                let add = vm.get_global("add").unwrap();
                vm.call(add, &[Value::Number(1.0), Value::Number(2.0)]).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Value::Number(3.0));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_cancel_from_another_thread() {
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut vm = VM::new();
        tx.send(vm.cancel_handle()).unwrap();
        let err = vm.run(spin(), &[]).unwrap_err();

        // The flag was consumed; the VM runs normally afterwards
        let after = vm.run(call_add(&[2.0, 3.0]), &[]);
        (err, after)
    });

    let handle = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    handle.cancel();

    let (err, after) = worker.join().unwrap();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(err.stack[0].function, "spin");
    assert_eq!(after.unwrap(), Value::Number(5.0));
}

#[test]
fn test_cancel_interrupts_compiled_loops() {
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        // The backend owns thread-local code memory, so it is built here
        let backend = jit_compiler::CraneliftBackend::new().ok()?;
        let mut config = VmConfig::default();
        config.jit.loop_threshold = 2;
        config.jit.fuel = 1_000;
        let mut vm = VM::with_backend(config, Box::new(backend));
        tx.send(vm.cancel_handle()).ok()?;
        let err = vm.run(spin(), &[]).unwrap_err();
        Some((err, vm.jit_stats().interrupts))
    });

    if let Ok(handle) = rx.recv() {
        thread::sleep(Duration::from_millis(20));
        handle.cancel();
    }

    if let Some((err, interrupts)) = worker.join().unwrap() {
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(interrupts > 0);
    }
}
