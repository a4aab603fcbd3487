//! Upvalue support for closures
//!
//! Captured variables are heap cells ([`UpvalueCell`]). A cell stays open,
//! aliasing its value stack slot, while the declaring frame is live; closing
//! moves the slot's current value into the cell. The VM keeps every open cell
//! in a list sorted by slot so capture can reuse an existing cell and closing
//! only walks the tail of the list.

use core_types::{ErrorKind, ObjectRef, Value};
use memory_manager::{Object, UpvalueCell};

use crate::vm::VM;

impl VM {
    /// Find or create the open cell for an absolute slot
    pub(crate) fn capture_upvalue(&mut self, at: usize) -> Result<ObjectRef, ErrorKind> {
        match self
            .open_upvalues
            .binary_search_by_key(&at, |(slot, _)| *slot)
        {
            Ok(i) => Ok(self.open_upvalues[i].1),
            Err(i) => {
                let cell = self.heap.allocate(Object::Upvalue(UpvalueCell::Open(at)))?;
                self.open_upvalues.insert(i, (at, cell));
                Ok(cell)
            }
        }
    }

    /// Close every open cell aliasing a slot at or above `from`
    pub(crate) fn close_upvalues(&mut self, from: usize) -> Result<(), ErrorKind> {
        while let Some(&(at, cell)) = self.open_upvalues.last() {
            if at < from {
                break;
            }
            self.open_upvalues.pop();
            let value = self.stack.get(at).unwrap_or(Value::Nil);
            match self.heap.get_mut(cell)? {
                Object::Upvalue(state) => *state = UpvalueCell::Closed(value),
                other => {
                    return Err(ErrorKind::malformed(format!(
                        "open upvalue list holds a {}",
                        other.kind_name()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Number of cells still aliasing stack slots
    pub fn open_upvalue_count(&self) -> usize {
        self.open_upvalues.len()
    }

    fn upvalue_cell(&self, index: u32) -> Result<ObjectRef, ErrorKind> {
        let closure = self.stack.frame()?.closure;
        match self.heap.get(closure)? {
            Object::Closure(c) => c.upvalues.get(index as usize).copied().ok_or_else(|| {
                ErrorKind::malformed(format!(
                    "upvalue {} out of range for '{}' ({} captured)",
                    index,
                    c.chunk.name(),
                    c.upvalues.len()
                ))
            }),
            other => Err(ErrorKind::malformed(format!(
                "frame runs a {} instead of a closure",
                other.kind_name()
            ))),
        }
    }

    pub(crate) fn read_upvalue(&self, index: u32) -> Result<Value, ErrorKind> {
        let cell = self.upvalue_cell(index)?;
        match self.heap.get(cell)? {
            Object::Upvalue(UpvalueCell::Open(at)) => self
                .stack
                .get(*at)
                .ok_or_else(|| ErrorKind::malformed("open upvalue outlived its slot")),
            Object::Upvalue(UpvalueCell::Closed(value)) => Ok(*value),
            other => Err(ErrorKind::malformed(format!(
                "upvalue handle refers to a {}",
                other.kind_name()
            ))),
        }
    }

    pub(crate) fn write_upvalue(&mut self, index: u32, value: Value) -> Result<(), ErrorKind> {
        let cell = self.upvalue_cell(index)?;
        match self.heap.get_mut(cell)? {
            Object::Upvalue(UpvalueCell::Open(at)) => {
                let at = *at;
                self.stack.put(at, value);
            }
            Object::Upvalue(UpvalueCell::Closed(slot)) => *slot = value,
            other => {
                return Err(ErrorKind::malformed(format!(
                    "upvalue handle refers to a {}",
                    other.kind_name()
                )))
            }
        }
        Ok(())
    }
}
