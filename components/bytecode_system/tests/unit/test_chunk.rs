//! Tests for Chunk and ChunkBuilder

use std::sync::Arc;

use bytecode_system::{Chunk, ChunkBuilder, Constant, Opcode, SlotId, UpvalueDescriptor};

#[test]
fn test_chunk_creation() {
    let chunk = ChunkBuilder::new("main").build();
    assert_eq!(chunk.len(), 0);
    assert_eq!(chunk.constants().len(), 0);
    assert_eq!(chunk.slot_count(), 0);
    assert_eq!(chunk.arity(), 0);
}

#[test]
fn test_chunk_emit_returns_offsets() {
    let mut b = ChunkBuilder::new("main");
    assert_eq!(b.emit(Opcode::LoadNil), 0);
    assert_eq!(b.emit(Opcode::LoadTrue), 1);
    assert_eq!(b.emit(Opcode::LoadFalse), 2);
    assert_eq!(b.build().len(), 3);
}

#[test]
fn test_chunk_add_constant_kinds() {
    let mut b = ChunkBuilder::new("main");
    assert_eq!(b.add_constant(42.0), 0);
    assert_eq!(b.add_constant("text"), 1);
    assert_eq!(b.add_constant(Constant::Nil), 2);
    let chunk = b.build();
    assert_eq!(chunk.constant(0), Some(&Constant::Number(42.0)));
    assert_eq!(chunk.constant(1).and_then(Constant::as_str), Some("text"));
    assert_eq!(chunk.constant(3), None);
}

#[test]
fn test_nested_function_shared_by_arc() {
    let inner = Arc::new(ChunkBuilder::new("inner").arity(1).build());
    let mut b = ChunkBuilder::new("main");
    b.add_constant(Constant::Function(Arc::clone(&inner)));
    let outer = b.build();
    let shared = outer.constant(0).and_then(Constant::as_function).unwrap();
    assert!(Arc::ptr_eq(shared, &inner));
}

#[test]
fn test_upvalue_descriptors() {
    let mut b = ChunkBuilder::new("closure");
    assert_eq!(b.add_upvalue(UpvalueDescriptor::new(true, 2)), 0);
    assert_eq!(b.add_upvalue(UpvalueDescriptor::new(false, 0)), 1);
    let chunk = b.build();
    assert_eq!(chunk.upvalues().len(), 2);
    assert!(!chunk.upvalues()[1].is_local);
}

#[test]
fn test_line_info_lookup() {
    let mut b = ChunkBuilder::new("main");
    b.emit_at(Opcode::LoadLocal(SlotId(0)), 10, 2);
    b.emit(Opcode::Dup);
    b.emit_at(Opcode::Add, 11, 7);
    let chunk = b.build();
    assert_eq!(chunk.line_info(0).map(|l| l.line), Some(10));
    assert_eq!(chunk.line_info(1).map(|l| l.line), Some(10));
    assert_eq!(chunk.line_info(2).map(|l| l.line), Some(11));
}

#[test]
fn test_chunk_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Chunk>();
    assert_send_sync::<Arc<Chunk>>();
}
