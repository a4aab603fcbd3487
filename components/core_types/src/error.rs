//! Runtime error types.
//!
//! Every failure the engine can report is one [`ErrorKind`]. The kind is
//! wrapped in a [`VmError`] together with the call stack that was live when
//! the failure happened.

use crate::{ObjectRef, StackFrame};

/// The kind of runtime error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    /// A call passed the wrong number of arguments
    #[error("{callee} expects {expected} argument(s) but got {got}")]
    ArityMismatch {
        /// Name of the callee
        callee: String,
        /// Declared parameter count
        expected: usize,
        /// Number of arguments supplied
        got: usize,
    },
    /// An operand had the wrong type for an instruction
    #[error("type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Operation that rejected the operand
        operation: &'static str,
        /// Accepted operand type(s)
        expected: &'static str,
        /// Actual operand type
        found: &'static str,
    },
    /// A global was read before being defined
    #[error("undefined global '{0}'")]
    UndefinedGlobal(String),
    /// An index was outside the bounds of a collection
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index
        index: f64,
        /// Length of the indexed collection
        len: usize,
    },
    /// The call depth or value stack limit was exceeded
    #[error("stack overflow at depth {depth}")]
    StackOverflow {
        /// Depth at which the limit was hit
        depth: usize,
    },
    /// The chunk referenced something outside its own bounds
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),
    /// An allocation could not be satisfied even after a collection
    #[error("out of memory: requested {requested} bytes with limit {limit}")]
    OutOfMemory {
        /// Size of the failed request
        requested: usize,
        /// Configured heap limit
        limit: usize,
    },
    /// The host cancelled execution
    #[error("execution cancelled")]
    Cancelled,
    /// A call targeted a value that is not callable
    #[error("value of type {0} is not callable")]
    NotCallable(&'static str),
    /// A handle referred to a reclaimed heap slot
    #[error("dangling reference {0}")]
    DanglingReference(ObjectRef),
    /// A native function reported a failure
    #[error("native '{name}' failed: {message}")]
    Native {
        /// Native function name
        name: String,
        /// Failure description
        message: String,
    },
    /// A thrown value reached the host without meeting a handler
    #[error("uncaught exception: {0}")]
    Uncaught(String),
}

impl ErrorKind {
    /// Fatal kinds leave the VM in an unspecified state
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::OutOfMemory { .. } | ErrorKind::DanglingReference(_)
        )
    }

    /// Shorthand for a type mismatch
    pub fn type_mismatch(operation: &'static str, expected: &'static str, found: &'static str) -> Self {
        ErrorKind::TypeMismatch {
            operation,
            expected,
            found,
        }
    }

    /// Shorthand for a malformed chunk
    pub fn malformed(reason: impl Into<String>) -> Self {
        ErrorKind::MalformedChunk(reason.into())
    }
}

/// A runtime error with the call stack at the point of failure.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, StackFrame, VmError};
///
/// let error = VmError::new(ErrorKind::Cancelled).with_stack(vec![StackFrame {
///     function: "main".to_string(),
///     offset: 4,
///     line: Some(2),
/// }]);
///
/// assert_eq!(error.kind, ErrorKind::Cancelled);
/// assert_eq!(error.location().map(|f| f.offset), Some(4));
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct VmError {
    /// The kind of error
    pub kind: ErrorKind,
    /// Live frames at the time of the error, innermost first
    pub stack: Vec<StackFrame>,
}

impl VmError {
    /// Create an error without stack information
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            stack: Vec::new(),
        }
    }

    /// Attach a captured call stack
    pub fn with_stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.stack = stack;
        self
    }

    /// Innermost frame, where the failing instruction lives
    pub fn location(&self) -> Option<&StackFrame> {
        self.stack.first()
    }

    /// See [`ErrorKind::is_fatal`]
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Render the error followed by one line per frame
    pub fn render(&self) -> String {
        let mut out = self.kind.to_string();
        for frame in &self.stack {
            out.push_str("\n    at ");
            out.push_str(&frame.to_string());
        }
        out
    }
}

impl From<ErrorKind> for VmError {
    fn from(kind: ErrorKind) -> Self {
        VmError::new(kind)
    }
}
