//! Memory Manager and Interpreter Integration Tests
//!
//! Verifies that the VM's safe-point collections keep everything reachable
//! and reclaim everything else.

use std::collections::{HashMap, HashSet};

use core_types::{ErrorKind, ObjectRef, Value};
use integration_tests::{init_tracing, string_churn};
use interpreter::{HeapConfig, VmConfig, VM};
use memory_manager::{Heap, Object};
use proptest::prelude::*;

fn small_heap(max_heap_bytes: usize) -> VmConfig {
    VmConfig {
        heap: HeapConfig {
            initial_threshold: 4 * 1024,
            growth_factor: 2.0,
            max_heap_bytes,
        },
        ..VmConfig::default()
    }
}

#[test]
fn test_ten_thousand_strings_in_bounded_heap() {
    init_tracing();
    let mut vm = VM::with_config(small_heap(64 * 1024));
    let baseline = vm.heap().live_objects();

    let last = vm.run(string_churn(), &[Value::Number(10_000.0)]).unwrap();
    assert_eq!(vm.string_value(&last), Some("item-x"));
    assert!(vm.heap().stats().collections > 0);
    assert!(vm.heap().bytes_allocated() <= 64 * 1024);

    vm.collect_garbage();
    assert_eq!(vm.heap().live_objects(), baseline);
}

#[test]
fn test_pinned_result_survives_later_runs() {
    let mut vm = VM::with_config(small_heap(64 * 1024));
    let kept = vm.new_string("keep me").unwrap();
    vm.pin(kept);

    vm.run(string_churn(), &[Value::Number(2_000.0)]).unwrap();
    vm.collect_garbage();
    assert_eq!(vm.string_value(&kept), Some("keep me"));

    vm.unpin(kept);
    vm.collect_garbage();
    assert_eq!(vm.string_value(&kept), None);
}

#[test]
fn test_heap_limit_is_fatal() {
    let mut vm = VM::with_config(VmConfig {
        heap: HeapConfig {
            initial_threshold: 512,
            growth_factor: 2.0,
            max_heap_bytes: 1024,
        },
        ..VmConfig::default()
    });
    // Pinned strings cannot be reclaimed, so the heap eventually refuses
    let mut items = Vec::new();
    let err = loop {
        match vm.new_string("0123456789abcdef") {
            Ok(value) => {
                vm.pin(value);
                items.push(value);
            }
            Err(err) => break err,
        }
    };
    assert!(matches!(err.kind, ErrorKind::OutOfMemory { limit: 1024, .. }));
    assert!(err.is_fatal());
    assert!(!items.is_empty());
}

#[test]
fn test_threshold_equal_to_limit_still_collects() {
    let mut vm = VM::with_config(VmConfig {
        heap: HeapConfig {
            initial_threshold: 4096,
            growth_factor: 2.0,
            max_heap_bytes: 4096,
        },
        ..VmConfig::default()
    });
    let last = vm.run(string_churn(), &[Value::Number(1_000.0)]).unwrap();
    assert_eq!(vm.string_value(&last), Some("item-x"));
    assert!(vm.heap().stats().collections > 0);
    assert!(vm.heap().bytes_allocated() <= 4096);
}

#[test]
fn test_large_live_global_leaves_room_for_garbage() {
    let mut vm = VM::with_config(VmConfig {
        heap: HeapConfig {
            initial_threshold: 2048,
            growth_factor: 2.0,
            max_heap_bytes: 4096,
        },
        ..VmConfig::default()
    });
    let big = vm.new_string("x".repeat(2100)).unwrap();
    vm.set_global("big", big);

    let last = vm.run(string_churn(), &[Value::Number(1_000.0)]).unwrap();
    assert_eq!(vm.string_value(&last), Some("item-x"));
    assert!(vm.heap().stats().collections > 1);
    assert_eq!(vm.string_value(&big).map(str::len), Some(2100));
}

#[test]
fn test_stale_handle_is_dangling_not_aliased() {
    let mut heap = Heap::new();
    let first = heap.allocate(Object::String("first".to_string())).unwrap();
    heap.collect(std::iter::empty());
    let second = heap.allocate(Object::String("second".to_string())).unwrap();

    assert_eq!(first.index(), second.index());
    assert_ne!(first, second);
    assert_eq!(heap.get(first).unwrap_err(), ErrorKind::DanglingReference(first));
    assert_eq!(heap.get(second).unwrap().as_string(), Some("second"));
}

#[derive(Debug, Clone)]
enum Step {
    String,
    /// Array holding the live object at this position, if any
    Array(usize),
    /// Drop the root at this position
    Forget(usize),
    Collect,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::String),
        2 => any::<usize>().prop_map(Step::Array),
        2 => any::<usize>().prop_map(Step::Forget),
        1 => Just(Step::Collect),
    ]
}

proptest! {
    /// Under any interleaving of allocation and collection, objects reachable
    /// from the roots stay valid and nothing else survives a collection.
    #[test]
    fn reachable_objects_survive_collection(steps in prop::collection::vec(step(), 1..200)) {
        let mut heap = Heap::new();
        let mut roots: Vec<ObjectRef> = Vec::new();
        let mut contents: Vec<(ObjectRef, Option<ObjectRef>)> = Vec::new();

        for step in steps {
            match step {
                Step::String => {
                    let r = heap.allocate(Object::String(format!("s{}", roots.len()))).unwrap();
                    roots.push(r);
                    contents.push((r, None));
                }
                Step::Array(at) => {
                    let child = roots.get(at % roots.len().max(1)).copied();
                    let items = child.map(Value::Object).into_iter().collect();
                    let r = heap.allocate(Object::Array(items)).unwrap();
                    roots.push(r);
                    contents.push((r, child));
                }
                Step::Forget(at) => {
                    if !roots.is_empty() {
                        roots.remove(at % roots.len());
                    }
                }
                Step::Collect => {
                    heap.collect(roots.iter().copied().map(Value::Object));
                    let children: HashMap<ObjectRef, Option<ObjectRef>> =
                        contents.iter().copied().collect();
                    let mut reachable = HashSet::new();
                    let mut work = roots.clone();
                    while let Some(r) = work.pop() {
                        if reachable.insert(r) {
                            if let Some(Some(child)) = children.get(&r) {
                                work.push(*child);
                            }
                        }
                    }
                    for r in &reachable {
                        prop_assert!(heap.contains(*r));
                    }
                    prop_assert_eq!(heap.live_objects(), reachable.len());
                    contents.retain(|(r, _)| heap.contains(*r));
                }
            }
        }
    }
}
