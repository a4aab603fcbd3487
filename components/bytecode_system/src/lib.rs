//! Bytecode system for the meow VM
//!
//! This crate provides the instruction set, the immutable [`Chunk`] unit the
//! interpreter executes, and the binary image format chunks are persisted in.
//!
//! # Features
//!
//! - Stack-based instruction set with per-frame local slots
//! - Chunks double as function prototypes (name, arity, slots, upvalues)
//! - Run-length debug line table with binary-search lookup
//! - Binary serialization support
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Chunk, ChunkBuilder, Constant, Opcode};
//!
//! let mut builder = ChunkBuilder::new("main");
//!
//! // Add constants
//! let one = builder.add_constant(Constant::Number(1.0));
//! let two = builder.add_constant(Constant::Number(2.0));
//!
//! // Emit instructions
//! builder.emit(Opcode::LoadConstant(one));
//! builder.emit(Opcode::LoadConstant(two));
//! builder.emit(Opcode::Add);
//! builder.emit(Opcode::Return);
//! let chunk = builder.build();
//!
//! // Serialize
//! let bytes = chunk.to_bytes();
//! let restored = Chunk::from_bytes(&bytes).unwrap();
//! assert_eq!(restored.len(), 4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod constant;
pub mod debug_info;
pub mod image;
pub mod opcode;

// Re-export main types at crate root
pub use chunk::{Chunk, ChunkBuilder};
pub use constant::Constant;
pub use debug_info::LineInfo;
pub use image::DecodeError;
pub use opcode::{Opcode, SlotId, UpvalueDescriptor};
