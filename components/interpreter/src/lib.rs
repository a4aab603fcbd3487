//! Bytecode interpreter for the meow VM
//!
//! This crate provides the execution engine:
//! - Shared value stack with per-frame local slots and a bounded frame stack
//! - Exhaustive opcode dispatch with a safe point before every instruction
//! - Heap-boxed upvalue cells shared between closures
//! - Try blocks that catch values raised by `THROW`
//! - Native function registration
//! - Hotness counters and a pluggable JIT backend seam
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytecode_system::{ChunkBuilder, Constant, Opcode};
//! use core_types::Value;
//! use interpreter::VM;
//!
//! let mut vm = VM::new();
//! let mut builder = ChunkBuilder::new("main");
//!
//! let idx = builder.add_constant(Constant::Number(42.0));
//! builder.emit(Opcode::LoadConstant(idx));
//! builder.emit(Opcode::Return);
//!
//! let result = vm.run(Arc::new(builder.build()), &[]).unwrap();
//! assert_eq!(result, Value::Number(42.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call_frame;
pub mod cancel;
pub mod config;
pub mod dispatch;
mod exception;
pub mod gc_integration;
pub mod natives;
pub mod profile;
pub mod tier;
pub mod upvalue;
pub mod vm;

// Re-export main types at crate root
pub use call_frame::{CallFrame, CallStack};
pub use cancel::CancelHandle;
pub use config::{JitConfig, VmConfig};
pub use memory_manager::{Arity, HeapConfig};
pub use natives::NativeRegistry;
pub use profile::ProfileData;
pub use tier::{
    BailoutReason, CompiledEntry, JitBackend, JitExit, JitFrame, JitStats, JitTier, NativeCode,
    NoopBackend,
};
pub use vm::VM;
