//! Stack frame records for error reporting.

use std::fmt;

/// Represents a single frame in a meow call stack.
///
/// Produced when a runtime error unwinds, innermost frame first.
///
/// # Examples
///
/// ```
/// use core_types::StackFrame;
///
/// let frame = StackFrame {
///     function: "fib".to_string(),
///     offset: 12,
///     line: Some(4),
/// };
///
/// assert_eq!(frame.to_string(), "fib (offset 12, line 4)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Name of the executing chunk
    pub function: String,
    /// Instruction offset within the chunk
    pub offset: usize,
    /// Source line from the chunk's debug info, if present
    pub line: Option<u32>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (offset {}, line {})", self.function, self.offset, line),
            None => write!(f, "{} (offset {})", self.function, self.offset),
        }
    }
}
