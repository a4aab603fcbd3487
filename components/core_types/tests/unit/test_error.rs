//! Unit tests for ErrorKind and VmError

use core_types::{ErrorKind, ObjectRef, StackFrame, VmError};

#[test]
fn test_every_kind_has_a_message() {
    let kinds = vec![
        ErrorKind::ArityMismatch {
            callee: "f".to_string(),
            expected: 1,
            got: 0,
        },
        ErrorKind::type_mismatch("neg", "number", "string"),
        ErrorKind::UndefinedGlobal("g".to_string()),
        ErrorKind::IndexOutOfBounds { index: 5.0, len: 2 },
        ErrorKind::StackOverflow { depth: 256 },
        ErrorKind::malformed("constant index 9 out of range"),
        ErrorKind::OutOfMemory {
            requested: 64,
            limit: 32,
        },
        ErrorKind::Cancelled,
        ErrorKind::NotCallable("number"),
        ErrorKind::DanglingReference(ObjectRef::new(1, 2)),
        ErrorKind::Native {
            name: "print".to_string(),
            message: "closed".to_string(),
        },
        ErrorKind::Uncaught("boom".to_string()),
    ];
    for kind in kinds {
        assert!(!kind.to_string().is_empty());
    }
}

#[test]
fn test_kinds_are_distinguishable() {
    assert_ne!(
        ErrorKind::UndefinedGlobal("a".to_string()),
        ErrorKind::UndefinedGlobal("b".to_string())
    );
    assert_ne!(ErrorKind::Cancelled, ErrorKind::NotCallable("nil"));
}

#[test]
fn test_uncaught_is_recoverable() {
    let kind = ErrorKind::Uncaught("boom".to_string());
    assert_eq!(kind.to_string(), "uncaught exception: boom");
    assert!(!kind.is_fatal());
}

#[test]
fn test_error_location_is_innermost_frame() {
    let err = VmError::new(ErrorKind::StackOverflow { depth: 3 }).with_stack(vec![
        StackFrame {
            function: "f".to_string(),
            offset: 1,
            line: None,
        },
        StackFrame {
            function: "main".to_string(),
            offset: 8,
            line: Some(1),
        },
    ]);
    assert_eq!(err.location().map(|f| f.function.as_str()), Some("f"));
    assert_eq!(err.to_string(), "stack overflow at depth 3");
}

#[test]
fn test_vm_error_is_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&VmError::new(ErrorKind::Cancelled));
}
