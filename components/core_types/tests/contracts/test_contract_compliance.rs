//! Contract compliance tests for core_types
//!
//! These tests pin the public surface the other components rely on.

use core_types::{ErrorKind, ObjectRef, StackFrame, Value, VmError};

/// Contract: Value has exactly the four tags Nil, Bool, Number, Object
#[test]
fn test_value_variants() {
    let values = [
        Value::Nil,
        Value::Bool(true),
        Value::Number(1.0),
        Value::Object(ObjectRef::new(0, 0)),
    ];
    let names: Vec<_> = values.iter().map(|v| v.type_name()).collect();
    assert_eq!(names, vec!["nil", "bool", "number", "object"]);
}

/// Contract: Value stays a small Copy datum
#[test]
fn test_value_is_fixed_size() {
    assert!(std::mem::size_of::<Value>() <= 16);
    fn assert_copy<T: Copy>() {}
    assert_copy::<Value>();
}

/// Contract: Value and VmError can cross thread boundaries
#[test]
fn test_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Value>();
    assert_send_sync::<VmError>();
}

/// Contract: VmError exposes kind and stack publicly
#[test]
fn test_vm_error_fields() {
    let err = VmError {
        kind: ErrorKind::Cancelled,
        stack: vec![StackFrame {
            function: "main".to_string(),
            offset: 0,
            line: None,
        }],
    };
    assert_eq!(err.stack.len(), 1);
    assert!(matches!(err.kind, ErrorKind::Cancelled));
}
