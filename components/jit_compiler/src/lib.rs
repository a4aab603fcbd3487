//! Cranelift backend for the meow VM JIT tier
//!
//! This crate provides:
//! - Analysis: which instructions reachable from an entry point can be compiled
//! - Codegen: translation of the numeric subset into Cranelift IR
//! - [`CraneliftBackend`]: a [`interpreter::JitBackend`] producing native code
//!
//! Compiled code works on unboxed numbers only. Anything it cannot represent
//! sends control back to the interpreter through a bail-out.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytecode_system::{ChunkBuilder, Opcode};
//! use core_types::Value;
//! use interpreter::{VmConfig, VM};
//! use jit_compiler::CraneliftBackend;
//!
//! let mut builder = ChunkBuilder::new("answer");
//! builder.emit(Opcode::LoadNumber(40.0));
//! builder.emit(Opcode::LoadNumber(2.0));
//! builder.emit(Opcode::Add);
//! builder.emit(Opcode::Return);
//! let chunk = Arc::new(builder.build());
//!
//! let mut vm = match CraneliftBackend::new() {
//!     Ok(backend) => VM::with_backend(VmConfig::default(), Box::new(backend)),
//!     Err(_) => VM::new(),
//! };
//! for _ in 0..200 {
//!     assert_eq!(vm.run(Arc::clone(&chunk), &[]).unwrap(), Value::Number(42.0));
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod codegen;
pub mod cranelift_backend;

pub use cranelift_backend::{CompiledFunction, CraneliftBackend};

use thiserror::Error;

/// Why an entry point was not compiled
///
/// Never surfaced to programs; the backend logs it and declines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    /// A reachable instruction is outside the compiled subset
    #[error("unsupported instruction {opcode} at offset {offset}")]
    Unsupported {
        /// Instruction offset
        offset: usize,
        /// Instruction mnemonic
        opcode: &'static str,
    },
    /// Two paths reach an offset with different operand depths
    #[error("operand depth mismatch at offset {offset}: {expected} vs {found}")]
    StackMismatch {
        /// Instruction offset
        offset: usize,
        /// Depth seen first
        expected: usize,
        /// Conflicting depth
        found: usize,
    },
    /// An instruction pops more operands than the path pushed
    #[error("operand stack underflow at offset {offset}")]
    Underflow {
        /// Instruction offset
        offset: usize,
    },
    /// The operand stack grows without bound
    #[error("operand stack too deep at offset {offset}")]
    TooDeep {
        /// Instruction offset
        offset: usize,
    },
    /// A jump leaves the chunk
    #[error("jump at offset {offset} targets {target} outside the chunk")]
    BadTarget {
        /// Instruction offset
        offset: usize,
        /// Jump target
        target: usize,
    },
    /// A loop entry whose body never jumps back to it
    #[error("no back-edge reaches loop entry {entry}")]
    NoLoop {
        /// Loop header offset
        entry: usize,
    },
    /// Cranelift could not set up or finish compilation
    #[error("code generation failed: {0}")]
    Backend(String),
}
