//! Unit tests for StackFrame

use core_types::StackFrame;

#[test]
fn test_stack_frame_display_with_line() {
    let frame = StackFrame {
        function: "loop".to_string(),
        offset: 33,
        line: Some(12),
    };
    assert_eq!(frame.to_string(), "loop (offset 33, line 12)");
}

#[test]
fn test_stack_frame_equality() {
    let a = StackFrame {
        function: "f".to_string(),
        offset: 0,
        line: None,
    };
    assert_eq!(a.clone(), a);
}
