//! Binary chunk image
//!
//! Serialized form of a [`Chunk`] for hosts that persist assembler output.
//! Layout (little endian):
//!
//! ```text
//! "MEOW" version:u8 chunk
//! chunk := name:str arity:u8 slots:u32
//!          upvalue_count:u32 (is_local:u8 index:u32)*
//!          const_count:u32 constant*
//!          inst_count:u32 instruction*
//!          line_count:u32 (offset:u32 line:u32 column:u32 file:u16)*
//!          file_count:u32 str*
//! str   := len:u32 utf8-bytes
//! ```

use std::sync::Arc;

use crate::chunk::{Chunk, ChunkParts};
use crate::constant::Constant;
use crate::debug_info::LineInfo;
use crate::opcode::{Opcode, SlotId, UpvalueDescriptor};

const MAGIC: &[u8; 4] = b"MEOW";
const VERSION: u8 = 1;
const MAX_NESTING: usize = 64;

/// Failure to decode a chunk image
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Image does not start with the magic number
    #[error("invalid magic number")]
    BadMagic,
    /// Image was written by an unknown format version
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),
    /// Image ended in the middle of a field
    #[error("unexpected end of image at byte {0}")]
    Truncated(usize),
    /// Unknown opcode tag
    #[error("unknown opcode tag {tag} at byte {at}")]
    UnknownOpcode {
        /// Tag byte
        tag: u8,
        /// Position in the image
        at: usize,
    },
    /// Unknown constant tag
    #[error("unknown constant tag {tag} at byte {at}")]
    UnknownConstant {
        /// Tag byte
        tag: u8,
        /// Position in the image
        at: usize,
    },
    /// A string field was not valid UTF-8
    #[error("invalid utf-8 string at byte {0}")]
    InvalidUtf8(usize),
    /// Function constants nested too deeply
    #[error("function nesting deeper than {0}")]
    TooDeep(usize),
    /// Bytes left over after the chunk
    #[error("{0} trailing bytes after chunk")]
    TrailingBytes(usize),
}

impl Chunk {
    /// Serialize chunk to binary format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        write_chunk(&mut bytes, self);
        bytes
    }

    /// Deserialize chunk from binary format
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::{Chunk, ChunkBuilder, Opcode};
    ///
    /// let mut builder = ChunkBuilder::new("main");
    /// builder.emit(Opcode::LoadNumber(1.0));
    /// builder.emit(Opcode::Return);
    /// let chunk = builder.build();
    ///
    /// let restored = Chunk::from_bytes(&chunk.to_bytes()).unwrap();
    /// assert_eq!(restored, chunk);
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.take(4)? != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = reader.u8()?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let chunk = reader.chunk(0)?;
        let rest = bytes.len() - reader.pos;
        if rest != 0 {
            return Err(DecodeError::TrailingBytes(rest));
        }
        Ok(chunk)
    }
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn write_chunk(out: &mut Vec<u8>, chunk: &Chunk) {
    write_str(out, chunk.name());
    out.push(chunk.arity() as u8);
    write_u32(out, chunk.slot_count() as u32);

    write_u32(out, chunk.upvalues().len() as u32);
    for uv in chunk.upvalues() {
        out.push(uv.is_local as u8);
        write_u32(out, uv.index);
    }

    write_u32(out, chunk.constants().len() as u32);
    for constant in chunk.constants() {
        match constant {
            Constant::Nil => out.push(0),
            Constant::Bool(b) => {
                out.push(1);
                out.push(*b as u8);
            }
            Constant::Number(n) => {
                out.push(2);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Constant::Str(s) => {
                out.push(3);
                write_str(out, s);
            }
            Constant::Function(inner) => {
                out.push(4);
                write_chunk(out, inner);
            }
        }
    }

    write_u32(out, chunk.len() as u32);
    for op in chunk.instructions() {
        write_opcode(out, op);
    }

    write_u32(out, chunk.lines().len() as u32);
    for info in chunk.lines() {
        write_u32(out, info.offset);
        write_u32(out, info.line);
        write_u32(out, info.column);
        out.extend_from_slice(&info.file.to_le_bytes());
    }

    write_u32(out, chunk.source_files().len() as u32);
    for file in chunk.source_files() {
        write_str(out, file);
    }
}

fn write_opcode(out: &mut Vec<u8>, op: &Opcode) {
    let (tag, operand): (u8, Option<u32>) = match *op {
        Opcode::Nop => (0, None),
        Opcode::LoadConstant(i) => (1, Some(i)),
        Opcode::LoadNil => (2, None),
        Opcode::LoadTrue => (3, None),
        Opcode::LoadFalse => (4, None),
        Opcode::LoadNumber(n) => {
            out.push(5);
            out.extend_from_slice(&n.to_le_bytes());
            return;
        }
        Opcode::Pop => (6, None),
        Opcode::Dup => (7, None),
        Opcode::LoadLocal(s) => (8, Some(s.0)),
        Opcode::StoreLocal(s) => (9, Some(s.0)),
        Opcode::LoadGlobal(i) => (10, Some(i)),
        Opcode::StoreGlobal(i) => (11, Some(i)),
        Opcode::LoadUpvalue(i) => (12, Some(i)),
        Opcode::StoreUpvalue(i) => (13, Some(i)),
        Opcode::CloseUpvalues(s) => (14, Some(s.0)),
        Opcode::Add => (15, None),
        Opcode::Sub => (16, None),
        Opcode::Mul => (17, None),
        Opcode::Div => (18, None),
        Opcode::Mod => (19, None),
        Opcode::Pow => (20, None),
        Opcode::Neg => (21, None),
        Opcode::Not => (22, None),
        Opcode::BitAnd => (23, None),
        Opcode::BitOr => (24, None),
        Opcode::BitXor => (25, None),
        Opcode::BitNot => (26, None),
        Opcode::ShiftLeft => (27, None),
        Opcode::ShiftRight => (28, None),
        Opcode::Equal => (29, None),
        Opcode::NotEqual => (30, None),
        Opcode::Less => (31, None),
        Opcode::LessEqual => (32, None),
        Opcode::Greater => (33, None),
        Opcode::GreaterEqual => (34, None),
        Opcode::Jump(t) => (35, Some(t)),
        Opcode::JumpIfFalse(t) => (36, Some(t)),
        Opcode::JumpIfTrue(t) => (37, Some(t)),
        Opcode::Call(argc) => (38, Some(argc as u32)),
        Opcode::TailCall(argc) => (39, Some(argc as u32)),
        Opcode::Return => (40, None),
        Opcode::Closure(i) => (41, Some(i)),
        Opcode::NewArray(n) => (42, Some(n as u32)),
        Opcode::NewMap(n) => (43, Some(n as u32)),
        Opcode::GetIndex => (44, None),
        Opcode::SetIndex => (45, None),
        Opcode::GetKeys => (46, None),
        Opcode::GetValues => (47, None),
        Opcode::Len => (48, None),
        Opcode::Throw => (49, None),
        Opcode::SetupTry(t) => (50, Some(t)),
        Opcode::PopTry => (51, None),
    };
    out.push(tag);
    if let Some(v) = operand {
        write_u32(out, v);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_le_bytes(raw))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let at = self.pos;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(at))
    }

    /// Element count, capped by the bytes left so a corrupt count cannot
    /// trigger a huge allocation
    fn count(&mut self) -> Result<usize, DecodeError> {
        let n = self.u32()? as usize;
        Ok(n.min(self.bytes.len() - self.pos))
    }

    fn chunk(&mut self, depth: usize) -> Result<Chunk, DecodeError> {
        if depth > MAX_NESTING {
            return Err(DecodeError::TooDeep(MAX_NESTING));
        }
        let mut parts = ChunkParts {
            name: self.string()?,
            arity: self.u8()?,
            slot_count: self.u32()?,
            ..ChunkParts::default()
        };

        let n = self.count()?;
        for _ in 0..n {
            let is_local = self.u8()? != 0;
            let index = self.u32()?;
            parts.upvalues.push(UpvalueDescriptor::new(is_local, index));
        }

        let n = self.count()?;
        for _ in 0..n {
            let at = self.pos;
            let constant = match self.u8()? {
                0 => Constant::Nil,
                1 => Constant::Bool(self.u8()? != 0),
                2 => Constant::Number(self.f64()?),
                3 => Constant::Str(self.string()?),
                4 => Constant::Function(Arc::new(self.chunk(depth + 1)?)),
                tag => return Err(DecodeError::UnknownConstant { tag, at }),
            };
            parts.constants.push(constant);
        }

        let n = self.count()?;
        for _ in 0..n {
            parts.instructions.push(self.opcode()?);
        }

        let n = self.count()?;
        for _ in 0..n {
            let offset = self.u32()?;
            let line = self.u32()?;
            let column = self.u32()?;
            let file = self.u16()?;
            parts.lines.push(LineInfo::new(offset, line, column, file));
        }

        let n = self.count()?;
        for _ in 0..n {
            parts.source_files.push(self.string()?);
        }

        Ok(Chunk::from_parts(parts))
    }

    fn opcode(&mut self) -> Result<Opcode, DecodeError> {
        let at = self.pos;
        let tag = self.u8()?;
        let op = match tag {
            0 => Opcode::Nop,
            1 => Opcode::LoadConstant(self.u32()?),
            2 => Opcode::LoadNil,
            3 => Opcode::LoadTrue,
            4 => Opcode::LoadFalse,
            5 => Opcode::LoadNumber(self.f64()?),
            6 => Opcode::Pop,
            7 => Opcode::Dup,
            8 => Opcode::LoadLocal(SlotId(self.u32()?)),
            9 => Opcode::StoreLocal(SlotId(self.u32()?)),
            10 => Opcode::LoadGlobal(self.u32()?),
            11 => Opcode::StoreGlobal(self.u32()?),
            12 => Opcode::LoadUpvalue(self.u32()?),
            13 => Opcode::StoreUpvalue(self.u32()?),
            14 => Opcode::CloseUpvalues(SlotId(self.u32()?)),
            15 => Opcode::Add,
            16 => Opcode::Sub,
            17 => Opcode::Mul,
            18 => Opcode::Div,
            19 => Opcode::Mod,
            20 => Opcode::Pow,
            21 => Opcode::Neg,
            22 => Opcode::Not,
            23 => Opcode::BitAnd,
            24 => Opcode::BitOr,
            25 => Opcode::BitXor,
            26 => Opcode::BitNot,
            27 => Opcode::ShiftLeft,
            28 => Opcode::ShiftRight,
            29 => Opcode::Equal,
            30 => Opcode::NotEqual,
            31 => Opcode::Less,
            32 => Opcode::LessEqual,
            33 => Opcode::Greater,
            34 => Opcode::GreaterEqual,
            35 => Opcode::Jump(self.u32()?),
            36 => Opcode::JumpIfFalse(self.u32()?),
            37 => Opcode::JumpIfTrue(self.u32()?),
            38 => Opcode::Call(self.u32()? as u8),
            39 => Opcode::TailCall(self.u32()? as u8),
            40 => Opcode::Return,
            41 => Opcode::Closure(self.u32()?),
            42 => Opcode::NewArray(self.u32()? as u16),
            43 => Opcode::NewMap(self.u32()? as u16),
            44 => Opcode::GetIndex,
            45 => Opcode::SetIndex,
            46 => Opcode::GetKeys,
            47 => Opcode::GetValues,
            48 => Opcode::Len,
            49 => Opcode::Throw,
            50 => Opcode::SetupTry(self.u32()?),
            51 => Opcode::PopTry,
            tag => return Err(DecodeError::UnknownOpcode { tag, at }),
        };
        Ok(op)
    }
}
