//! Virtual Machine for bytecode execution
//!
//! Main entry point for executing meow chunks. A [`VM`] is an explicitly
//! constructed value owning its heap, globals, frame stack and JIT tier, so
//! any number of isolated instances can coexist in one process.

use std::collections::HashMap;
use std::sync::Arc;

use bytecode_system::Chunk;
use core_types::{ErrorKind, ObjectRef, StackFrame, Value, VmError};
use memory_manager::{Closure, Heap, Object};

use crate::call_frame::CallStack;
use crate::cancel::CancelHandle;
use crate::config::VmConfig;
use crate::exception::TryHandler;
use crate::tier::{JitBackend, JitStats, JitTier, NoopBackend};

/// Virtual Machine for executing meow bytecode
///
/// The VM manages the execution state including:
/// - Global namespace (natives live here too)
/// - Frame stack and the shared value stack
/// - Object heap and its collector
/// - Open upvalue cells, sorted by the slot they alias
/// - Active try blocks, innermost last
/// - JIT tier counters and compiled entries
pub struct VM {
    pub(crate) heap: Heap,
    pub(crate) globals: HashMap<String, Value>,
    pub(crate) stack: CallStack,
    /// (absolute slot, cell) pairs sorted by slot
    pub(crate) open_upvalues: Vec<(usize, ObjectRef)>,
    pub(crate) handlers: Vec<TryHandler>,
    pub(crate) config: VmConfig,
    pub(crate) cancel: CancelHandle,
    pub(crate) jit: JitTier,
    pub(crate) native_depth: usize,
    /// Frame depth at which the current invocation returns to the host
    pub(crate) entry_depth: usize,
}

impl VM {
    /// Create a VM with default limits and no JIT backend
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Create a VM with explicit limits and no JIT backend
    pub fn with_config(config: VmConfig) -> Self {
        Self::with_backend(config, Box::new(NoopBackend))
    }

    /// Create a VM with explicit limits and a JIT backend
    pub fn with_backend(config: VmConfig, backend: Box<dyn JitBackend>) -> Self {
        Self {
            heap: Heap::with_config(config.heap.clone()),
            globals: HashMap::new(),
            stack: CallStack::new(config.max_frames, config.max_stack_slots),
            open_upvalues: Vec::new(),
            handlers: Vec::new(),
            jit: JitTier::new(backend, config.jit.clone()),
            config,
            cancel: CancelHandle::new(),
            native_depth: 0,
            entry_depth: 0,
        }
    }

    /// Execute a chunk as a function called with `args`
    ///
    /// # Arguments
    ///
    /// * `chunk` - Top-level chunk; its arity must match `args`
    /// * `args` - Argument values placed in the first local slots
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - The value returned by the outermost frame
    /// * `Err(VmError)` - The failure kind plus the frames that were live
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use bytecode_system::{ChunkBuilder, Opcode};
    /// use core_types::Value;
    /// use interpreter::VM;
    ///
    /// let mut vm = VM::new();
    /// let mut builder = ChunkBuilder::new("main");
    /// builder.emit(Opcode::LoadNumber(1.0));
    /// builder.emit(Opcode::LoadNumber(2.0));
    /// builder.emit(Opcode::Add);
    /// builder.emit(Opcode::Return);
    ///
    /// let result = vm.run(Arc::new(builder.build()), &[]).unwrap();
    /// assert_eq!(result, Value::Number(3.0));
    /// ```
    pub fn run(&mut self, chunk: Arc<Chunk>, args: &[Value]) -> Result<Value, VmError> {
        if !chunk.upvalues().is_empty() {
            return Err(ErrorKind::malformed("top-level chunk cannot capture upvalues").into());
        }
        let closure = self
            .allocate_at_rest(
                Object::Closure(Closure {
                    chunk,
                    upvalues: Vec::new(),
                }),
                args,
            )
            .map_err(VmError::new)?;
        self.invoke(Value::Object(closure), args)
    }

    /// Call a function value (closure or native) from the host
    pub fn call(&mut self, callee: Value, args: &[Value]) -> Result<Value, VmError> {
        self.invoke(callee, args)
    }

    fn invoke(&mut self, callee: Value, args: &[Value]) -> Result<Value, VmError> {
        let base_len = self.stack.len();
        let base_depth = self.stack.depth();
        let saved_entry = self.entry_depth;
        self.entry_depth = base_depth;
        let result = self.invoke_inner(callee, args);
        self.entry_depth = saved_entry;
        result.map_err(|kind| self.unwind(kind, base_depth, base_len))
    }

    fn invoke_inner(&mut self, callee: Value, args: &[Value]) -> Result<Value, ErrorKind> {
        self.stack.push(callee)?;
        for arg in args {
            self.stack.push(*arg)?;
        }
        self.call_value(callee, args.len())?;
        if self.stack.depth() == self.entry_depth {
            // Natives finish inside the call
            return self.stack.pop();
        }
        if let Some(value) = self.on_function_entry()? {
            return Ok(value);
        }
        self.execute()
    }

    /// Turn a failure into a `VmError` and drop everything the failed
    /// invocation left on the stacks
    fn unwind(&mut self, kind: ErrorKind, depth: usize, len: usize) -> VmError {
        let trace = self.capture_stack(depth);
        tracing::debug!(error = %kind, frames = trace.len(), "unwinding after runtime error");
        if let Err(close_error) = self.close_upvalues(len) {
            tracing::warn!(error = %close_error, "failed to close upvalues while unwinding");
            self.open_upvalues.retain(|(slot, _)| *slot < len);
        }
        self.drop_handlers_above(depth);
        self.stack.unwind_to(depth);
        self.stack.truncate(len);
        self.native_depth = 0;
        if kind == ErrorKind::Cancelled {
            self.cancel.reset();
        }
        VmError::new(kind).with_stack(trace)
    }

    /// Frames above `depth`, innermost first
    fn capture_stack(&self, depth: usize) -> Vec<StackFrame> {
        self.stack.frames()[depth.min(self.stack.depth())..]
            .iter()
            .rev()
            .map(|frame| {
                let offset = frame.ip.saturating_sub(1);
                StackFrame {
                    function: frame.chunk.name().to_string(),
                    offset,
                    line: frame.chunk.line_info(offset).map(|info| info.line),
                }
            })
            .collect()
    }

    /// Get a global variable by name
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    /// Set a global variable
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Handle that cancels this VM from any thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The object heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Active configuration
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// JIT tier counters
    pub fn jit_stats(&self) -> &JitStats {
        self.jit.stats()
    }

    /// Name of the installed JIT backend
    pub fn jit_backend(&self) -> &str {
        self.jit.backend_name()
    }

    /// Current call depth (zero between runs)
    pub fn call_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Allocate a string the host can pass into `run`
    pub fn new_string(&mut self, text: impl Into<String>) -> Result<Value, VmError> {
        let r = self.allocate_at_rest(Object::String(text.into()), &[])?;
        Ok(Value::Object(r))
    }

    /// Allocate an array the host can pass into `run`
    pub fn new_array(&mut self, items: Vec<Value>) -> Result<Value, VmError> {
        let r = self.allocate_at_rest(Object::Array(items), &[])?;
        Ok(Value::Object(r))
    }

    /// Keep an object value alive across collections
    pub fn pin(&mut self, value: Value) {
        if let Value::Object(r) = value {
            self.heap.pin(r);
        }
    }

    /// Release a pin taken with [`VM::pin`]
    pub fn unpin(&mut self, value: Value) {
        if let Value::Object(r) = value {
            self.heap.unpin(r);
        }
    }

    /// String payload of a value, if it is a live string
    pub fn string_value(&self, value: &Value) -> Option<&str> {
        value
            .as_object()
            .and_then(|r| self.heap.get(r).ok())
            .and_then(Object::as_string)
    }

    /// Element list of a value, if it is a live array
    pub fn array_values(&self, value: &Value) -> Option<&[Value]> {
        value
            .as_object()
            .and_then(|r| self.heap.get(r).ok())
            .and_then(Object::as_array)
    }

    /// Render a value for diagnostics, following strings and collections
    pub fn display(&self, value: &Value) -> String {
        let mut out = String::new();
        self.display_into(value, &mut out, 0);
        out
    }

    fn display_into(&self, value: &Value, out: &mut String, depth: usize) {
        let Value::Object(r) = value else {
            out.push_str(&value.to_string());
            return;
        };
        let Ok(object) = self.heap.get(*r) else {
            out.push_str("<dangling>");
            return;
        };
        if depth > 8 {
            out.push_str("...");
            return;
        }
        match object {
            Object::String(s) => out.push_str(s),
            Object::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.display_into(item, out, depth + 1);
                }
                out.push(']');
            }
            Object::Map(entries) => {
                out.push('{');
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(key);
                    out.push_str(": ");
                    self.display_into(item, out, depth + 1);
                }
                out.push('}');
            }
            Object::Closure(c) => {
                out.push_str("<fn ");
                out.push_str(c.chunk.name());
                out.push('>');
            }
            Object::Native(n) => {
                out.push_str("<native ");
                out.push_str(&n.name);
                out.push('>');
            }
            Object::Upvalue(_) => out.push_str("<upvalue>"),
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VM {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VM")
            .field("globals", &self.globals.len())
            .field("depth", &self.stack.depth())
            .field("live_objects", &self.heap.live_objects())
            .field("jit_backend", &self.jit.backend_name())
            .finish()
    }
}
