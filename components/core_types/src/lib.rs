//! Core value and error types for the meow virtual machine.
//!
//! This crate provides the foundational types shared by every layer of the
//! execution engine: the fixed-size value representation, the handle type used
//! to reach heap objects, and the typed error taxonomy surfaced by `run`.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of meow values
//! - [`ObjectRef`] - Generation-checked handle into the object heap
//! - [`VmError`] - Runtime error with a captured call stack
//! - [`ErrorKind`] - Distinguishable failure kinds
//! - [`StackFrame`] - Call stack frame information
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, Value, VmError};
//!
//! let num = Value::Number(42.0);
//! assert!(num.is_truthy());
//! assert_eq!(num.type_name(), "number");
//!
//! let error = VmError::new(ErrorKind::UndefinedGlobal("print".to_string()));
//! assert!(!error.is_fatal());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod source;
mod value;

pub use error::{ErrorKind, VmError};
pub use source::StackFrame;
pub use value::{format_number, ObjectRef, Value};
