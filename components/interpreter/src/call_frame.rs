//! Call frames and the value stack
//!
//! One value stack is shared by every frame. A frame owns the window that
//! starts at its `base`: first `slot_count` local slots (parameters first),
//! then its operand stack. The slot just below `base` holds the callee, which
//! the return sequence overwrites with the result.

use std::sync::Arc;

use bytecode_system::Chunk;
use core_types::{ErrorKind, ObjectRef, Value};

/// Call frame representing a function invocation
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Chunk being executed
    pub chunk: Arc<Chunk>,
    /// Offset of the next instruction
    pub ip: usize,
    /// Absolute value stack index of local slot 0
    pub base: usize,
    /// Closure object being executed
    pub closure: ObjectRef,
}

impl CallFrame {
    /// Create a new call frame starting at offset 0
    pub fn new(chunk: Arc<Chunk>, base: usize, closure: ObjectRef) -> Self {
        Self {
            chunk,
            ip: 0,
            base,
            closure,
        }
    }

    /// First value stack index of this frame's operand stack
    #[inline]
    pub fn floor(&self) -> usize {
        self.base + self.chunk.slot_count()
    }
}

/// Frame stack plus the value stack the frames index into
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<CallFrame>,
    values: Vec<Value>,
    max_frames: usize,
    max_values: usize,
}

impl CallStack {
    /// Create an empty stack with the given limits
    pub fn new(max_frames: usize, max_values: usize) -> Self {
        Self {
            frames: Vec::with_capacity(max_frames.min(64)),
            values: Vec::with_capacity(max_values.min(1024)),
            max_frames,
            max_values,
        }
    }

    /// Push a frame whose arguments already sit at `values[base..]`.
    ///
    /// Reserves the remaining local slots as `Nil`. Fails with
    /// `StackOverflow` without pushing when either limit would be exceeded.
    pub fn push_frame(
        &mut self,
        closure: ObjectRef,
        chunk: Arc<Chunk>,
        base: usize,
    ) -> Result<(), ErrorKind> {
        if self.frames.len() >= self.max_frames {
            return Err(ErrorKind::StackOverflow {
                depth: self.frames.len(),
            });
        }
        let top = base + chunk.slot_count();
        if top > self.max_values {
            return Err(ErrorKind::StackOverflow {
                depth: self.frames.len(),
            });
        }
        if self.values.len() < top {
            self.values.resize(top, Value::Nil);
        }
        self.frames.push(CallFrame::new(chunk, base, closure));
        Ok(())
    }

    /// Pop the current frame and drop its window and callee slot
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        let frame = self.frames.pop()?;
        self.values.truncate(frame.base.saturating_sub(1));
        Some(frame)
    }

    /// The executing frame
    #[inline]
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// The executing frame, mutably
    #[inline]
    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    pub(crate) fn frame(&self) -> Result<&CallFrame, ErrorKind> {
        self.frames
            .last()
            .ok_or_else(|| ErrorKind::malformed("no active frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut CallFrame, ErrorKind> {
        self.frames
            .last_mut()
            .ok_or_else(|| ErrorKind::malformed("no active frame"))
    }

    /// Number of active frames
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// All active frames, outermost first
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Every live value stack entry across all frames
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Absolute index of the current frame's local `index`
    #[inline]
    fn slot_index(&self, index: usize) -> Result<usize, ErrorKind> {
        let frame = self.frame()?;
        if index >= frame.chunk.slot_count() {
            return Err(ErrorKind::malformed(format!(
                "local slot {} out of range for {} slot(s)",
                index,
                frame.chunk.slot_count()
            )));
        }
        Ok(frame.base + index)
    }

    /// Read local slot `index` of the current frame
    #[inline]
    pub fn slot(&self, index: usize) -> Result<Value, ErrorKind> {
        let at = self.slot_index(index)?;
        Ok(self.values[at])
    }

    /// Write local slot `index` of the current frame
    #[inline]
    pub fn set_slot(&mut self, index: usize, value: Value) -> Result<(), ErrorKind> {
        let at = self.slot_index(index)?;
        self.values[at] = value;
        Ok(())
    }

    /// Read an absolute value stack entry
    #[inline]
    pub fn get(&self, at: usize) -> Option<Value> {
        self.values.get(at).copied()
    }

    /// Write an absolute value stack entry
    #[inline]
    pub fn put(&mut self, at: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(at) {
            *slot = value;
        }
    }

    /// Lowest index the current frame may pop down to
    #[inline]
    fn floor(&self) -> usize {
        self.frames.last().map_or(0, CallFrame::floor)
    }

    /// Number of operands on the current frame's operand stack
    pub fn operand_depth(&self) -> usize {
        self.values.len().saturating_sub(self.floor())
    }

    /// Push an operand
    #[inline]
    pub fn push(&mut self, value: Value) -> Result<(), ErrorKind> {
        if self.values.len() >= self.max_values {
            return Err(ErrorKind::StackOverflow {
                depth: self.frames.len(),
            });
        }
        self.values.push(value);
        Ok(())
    }

    /// Pop an operand; popping into the locals is a malformed chunk
    #[inline]
    pub fn pop(&mut self) -> Result<Value, ErrorKind> {
        if self.values.len() <= self.floor() {
            return Err(ErrorKind::malformed("operand stack underflow"));
        }
        self.values
            .pop()
            .ok_or_else(|| ErrorKind::malformed("operand stack underflow"))
    }

    /// Pop `n` operands, preserving their order
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ErrorKind> {
        if self.values.len() < self.floor() + n {
            return Err(ErrorKind::malformed("operand stack underflow"));
        }
        let at = self.values.len() - n;
        Ok(self.values.split_off(at))
    }

    /// Read the operand `distance` entries below the top
    #[inline]
    pub fn peek(&self, distance: usize) -> Result<Value, ErrorKind> {
        let len = self.values.len();
        if len < self.floor() + distance + 1 {
            return Err(ErrorKind::malformed("operand stack underflow"));
        }
        Ok(self.values[len - 1 - distance])
    }

    /// Current value stack length
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the value stack is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Shrink the value stack
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Drop frames above `depth`
    pub fn unwind_to(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Replace the current frame's code, keeping its base (tail calls)
    pub(crate) fn reuse_frame(
        &mut self,
        closure: ObjectRef,
        chunk: Arc<Chunk>,
    ) -> Result<(), ErrorKind> {
        let depth = self.frames.len();
        let max_values = self.max_values;
        let frame = self.frame_mut()?;
        let top = frame.base + chunk.slot_count();
        if top > max_values {
            return Err(ErrorKind::StackOverflow { depth });
        }
        frame.chunk = chunk;
        frame.closure = closure;
        frame.ip = 0;
        self.values.resize(top, Value::Nil);
        Ok(())
    }
}
