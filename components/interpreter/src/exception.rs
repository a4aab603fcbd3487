//! Structured exception handling
//!
//! `SETUP_TRY` registers a handler for the current frame, `POP_TRY` removes
//! it and `THROW` transfers the thrown value to the innermost handler of the
//! running invocation. Catching unwinds every frame above the handler's,
//! closes the upvalues those frames left open and drops operands pushed since
//! the handler was registered. The thrown value is then pushed and execution
//! resumes at the handler's catch offset.
//!
//! Runtime faults raised by the VM itself are not catchable; only `THROW`
//! reaches a handler.

use core_types::{ErrorKind, Value};

use crate::vm::VM;

/// An active try block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TryHandler {
    /// Offset the owning frame resumes at
    pub catch_ip: usize,
    /// Frame count when the handler was registered, owning frame included
    pub frame_depth: usize,
    /// Value stack length when the handler was registered
    pub stack_height: usize,
}

impl VM {
    pub(crate) fn setup_try(&mut self, target: u32) -> Result<(), ErrorKind> {
        let frame = self.stack.frame()?;
        if target as usize > frame.chunk.len() {
            return Err(ErrorKind::malformed(format!(
                "catch target {} beyond end of '{}' ({} instructions)",
                target,
                frame.chunk.name(),
                frame.chunk.len()
            )));
        }
        if self.handlers.len() >= self.config.max_stack_slots {
            return Err(ErrorKind::StackOverflow {
                depth: self.stack.depth(),
            });
        }
        self.handlers.push(TryHandler {
            catch_ip: target as usize,
            frame_depth: self.stack.depth(),
            stack_height: self.stack.len(),
        });
        Ok(())
    }

    pub(crate) fn pop_try(&mut self) -> Result<(), ErrorKind> {
        let depth = self.stack.depth();
        match self.handlers.last() {
            Some(handler) if handler.frame_depth == depth => {
                self.handlers.pop();
                Ok(())
            }
            _ => Err(ErrorKind::malformed("POP_TRY without an active try block in this frame")),
        }
    }

    /// Hand `value` to the innermost handler of this invocation
    pub(crate) fn throw(&mut self, value: Value) -> Result<(), ErrorKind> {
        let handler = match self.handlers.last() {
            Some(handler) if handler.frame_depth > self.entry_depth => *handler,
            _ => return Err(ErrorKind::Uncaught(self.display(&value))),
        };
        self.handlers.pop();
        tracing::debug!(
            frames = self.stack.depth() - handler.frame_depth,
            catch_ip = handler.catch_ip,
            "caught thrown value"
        );
        self.close_upvalues(handler.stack_height)?;
        self.stack.unwind_to(handler.frame_depth);
        self.stack.truncate(handler.stack_height);
        self.stack.push(value)?;
        self.stack.frame_mut()?.ip = handler.catch_ip;
        Ok(())
    }

    /// Forget handlers registered by frames above `depth`
    pub(crate) fn drop_handlers_above(&mut self, depth: usize) {
        while self
            .handlers
            .last()
            .is_some_and(|handler| handler.frame_depth > depth)
        {
            self.handlers.pop();
        }
    }

    /// Number of registered try blocks
    pub fn active_handlers(&self) -> usize {
        self.handlers.len()
    }
}
