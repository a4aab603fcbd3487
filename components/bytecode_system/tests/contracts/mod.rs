//! Contract compliance tests for bytecode_system
//!
//! The interpreter and the JIT rely on these properties of the chunk format.

use std::sync::Arc;

use bytecode_system::{Chunk, ChunkBuilder, Constant, DecodeError, Opcode, SlotId};

/// Contract: chunks are immutable once built and only expose read accessors
#[test]
fn test_chunk_read_accessors() {
    let mut b = ChunkBuilder::new("f").arity(1).slots(2);
    b.emit_at(Opcode::LoadLocal(SlotId(0)), 1, 1);
    b.emit(Opcode::Return);
    let chunk = b.build();

    let instructions: &[Opcode] = chunk.instructions();
    let constants: &[Constant] = chunk.constants();
    assert_eq!(instructions.len(), 2);
    assert!(constants.is_empty());
    assert_eq!(chunk.lines().len(), 1);
}

/// Contract: out-of-range lookups return None instead of panicking
#[test]
fn test_out_of_range_access_is_checked() {
    let chunk = ChunkBuilder::new("empty").build();
    assert_eq!(chunk.instruction(0), None);
    assert_eq!(chunk.constant(usize::MAX), None);
    assert!(chunk.line_info(0).is_none());
}

/// Contract: a chunk can be shared read-only across threads
#[test]
fn test_chunk_shared_across_threads() {
    let mut b = ChunkBuilder::new("main");
    b.emit(Opcode::LoadNumber(7.0));
    b.emit(Opcode::Return);
    let chunk = Arc::new(b.build());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let chunk = Arc::clone(&chunk);
            std::thread::spawn(move || chunk.instruction(0))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), Some(Opcode::LoadNumber(7.0)));
    }
}

/// Contract: images decode back to an equal chunk and reject garbage
#[test]
fn test_image_contract() {
    let mut b = ChunkBuilder::new("main");
    let k = b.add_constant("k");
    b.emit(Opcode::LoadGlobal(k));
    b.emit(Opcode::Return);
    let chunk = b.build();

    assert_eq!(Chunk::from_bytes(&chunk.to_bytes()), Ok(chunk));
    assert_eq!(Chunk::from_bytes(b""), Err(DecodeError::Truncated(0)));
}
