//! Chunk: an immutable compiled function
//!
//! A [`Chunk`] carries the instruction stream, the constant pool, the debug
//! line table and the prototype metadata (name, arity, slot count, upvalue
//! descriptors) the interpreter needs to call it. Chunks are assembled with
//! [`ChunkBuilder`] and never change afterwards, so they can be shared behind
//! an `Arc` by any number of closures and VM instances.

use crate::constant::Constant;
use crate::debug_info::{self, LineInfo};
use crate::opcode::{Opcode, UpvalueDescriptor};

/// Compiled function: instructions, constants and debug metadata
///
/// # Examples
///
/// ```
/// use bytecode_system::{ChunkBuilder, Constant, Opcode};
///
/// let mut builder = ChunkBuilder::new("main");
/// let idx = builder.add_constant(Constant::Number(42.0));
/// builder.emit_at(Opcode::LoadConstant(idx), 1, 1);
/// builder.emit(Opcode::Return);
/// let chunk = builder.build();
///
/// assert_eq!(chunk.len(), 2);
/// assert_eq!(chunk.line_info(1).map(|l| l.line), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    name: String,
    arity: u8,
    slot_count: u32,
    upvalues: Vec<UpvalueDescriptor>,
    instructions: Vec<Opcode>,
    constants: Vec<Constant>,
    lines: Vec<LineInfo>,
    source_files: Vec<String>,
}

impl Chunk {
    /// Function name used in stack traces
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter count
    pub fn arity(&self) -> usize {
        self.arity as usize
    }

    /// Number of local slots a frame reserves, parameters included
    pub fn slot_count(&self) -> usize {
        self.slot_count as usize
    }

    /// Captured variable descriptors for closures built from this chunk
    pub fn upvalues(&self) -> &[UpvalueDescriptor] {
        &self.upvalues
    }

    /// The instruction stream
    pub fn instructions(&self) -> &[Opcode] {
        &self.instructions
    }

    /// Instruction at `offset`, if in bounds
    #[inline]
    pub fn instruction(&self, offset: usize) -> Option<Opcode> {
        self.instructions.get(offset).copied()
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if the chunk has no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The constant pool
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Constant at `index`, if in bounds
    #[inline]
    pub fn constant(&self, index: usize) -> Option<&Constant> {
        self.constants.get(index)
    }

    /// The debug line table
    pub fn lines(&self) -> &[LineInfo] {
        &self.lines
    }

    /// Source position covering the instruction at `offset`
    pub fn line_info(&self, offset: usize) -> Option<&LineInfo> {
        debug_info::lookup(&self.lines, offset)
    }

    /// Source file names referenced by the line table
    pub fn source_files(&self) -> &[String] {
        &self.source_files
    }

    /// Source file name for a line table entry
    pub fn source_file(&self, info: &LineInfo) -> Option<&str> {
        self.source_files.get(info.file as usize).map(String::as_str)
    }

    pub(crate) fn from_parts(parts: ChunkParts) -> Self {
        let slot_count = parts.slot_count.max(parts.arity as u32);
        Self {
            name: parts.name,
            arity: parts.arity,
            slot_count,
            upvalues: parts.upvalues,
            instructions: parts.instructions,
            constants: parts.constants,
            lines: parts.lines,
            source_files: parts.source_files,
        }
    }
}

/// Raw fields of a chunk, used by the builder and the image decoder
#[derive(Debug, Default)]
pub(crate) struct ChunkParts {
    pub name: String,
    pub arity: u8,
    pub slot_count: u32,
    pub upvalues: Vec<UpvalueDescriptor>,
    pub instructions: Vec<Opcode>,
    pub constants: Vec<Constant>,
    pub lines: Vec<LineInfo>,
    pub source_files: Vec<String>,
}

/// Assembles a [`Chunk`]
///
/// `build` raises the slot count to at least the arity; nothing else is
/// validated here. Out-of-range operands surface as `MalformedChunk` when the
/// interpreter executes them.
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    parts: ChunkParts,
    current_file: u16,
}

impl ChunkBuilder {
    /// Create a builder for a function named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            parts: ChunkParts {
                name: name.into(),
                ..ChunkParts::default()
            },
            current_file: 0,
        }
    }

    /// Set the declared parameter count
    pub fn arity(mut self, arity: u8) -> Self {
        self.parts.arity = arity;
        self
    }

    /// Set the number of local slots, parameters included
    pub fn slots(mut self, slot_count: u32) -> Self {
        self.parts.slot_count = slot_count;
        self
    }

    /// Emit an instruction and return its offset
    pub fn emit(&mut self, opcode: Opcode) -> usize {
        self.parts.instructions.push(opcode);
        self.parts.instructions.len() - 1
    }

    /// Emit an instruction tagged with a source position
    pub fn emit_at(&mut self, opcode: Opcode, line: u32, column: u32) -> usize {
        let offset = self.parts.instructions.len() as u32;
        let info = LineInfo::new(offset, line, column, self.current_file);
        let starts_run = self
            .parts
            .lines
            .last()
            .map_or(true, |last| !last.same_position(&info));
        if starts_run {
            self.parts.lines.push(info);
        }
        self.emit(opcode)
    }

    /// Offset the next emitted instruction will have
    pub fn next_offset(&self) -> usize {
        self.parts.instructions.len()
    }

    /// Rewrite the jump target of a previously emitted jump
    pub fn patch_jump(&mut self, offset: usize, target: usize) {
        if let Some(op) = self.parts.instructions.get_mut(offset) {
            let target = target as u32;
            *op = match *op {
                Opcode::Jump(_) => Opcode::Jump(target),
                Opcode::JumpIfFalse(_) => Opcode::JumpIfFalse(target),
                Opcode::JumpIfTrue(_) => Opcode::JumpIfTrue(target),
                other => other,
            };
        }
    }

    /// Add a constant and return its index
    pub fn add_constant(&mut self, constant: impl Into<Constant>) -> u32 {
        self.parts.constants.push(constant.into());
        (self.parts.constants.len() - 1) as u32
    }

    /// Add a string constant, reusing an existing identical one
    pub fn add_name(&mut self, name: &str) -> u32 {
        if let Some(idx) = self
            .parts
            .constants
            .iter()
            .position(|c| c.as_str() == Some(name))
        {
            return idx as u32;
        }
        self.add_constant(Constant::Str(name.to_string()))
    }

    /// Declare a captured variable and return its upvalue index
    pub fn add_upvalue(&mut self, descriptor: UpvalueDescriptor) -> u32 {
        self.parts.upvalues.push(descriptor);
        (self.parts.upvalues.len() - 1) as u32
    }

    /// Switch the source file for subsequent `emit_at` calls
    pub fn set_source_file(&mut self, file: impl Into<String>) {
        let file = file.into();
        let idx = match self.parts.source_files.iter().position(|f| *f == file) {
            Some(idx) => idx,
            None => {
                self.parts.source_files.push(file);
                self.parts.source_files.len() - 1
            }
        };
        self.current_file = idx as u16;
    }

    /// Finish the chunk
    pub fn build(self) -> Chunk {
        Chunk::from_parts(self.parts)
    }
}
