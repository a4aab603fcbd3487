//! JIT tier seam
//!
//! The interpreter counts arrivals at function starts and loop headers. Once
//! an entry point is hot it asks the installed [`JitBackend`] for compiled
//! code. Compiled code runs against a [`JitFrame`] of unboxed numbers and
//! either returns a number or bails out, describing where the interpreter
//! should resume and how many operands it left behind.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytecode_system::Chunk;
use core_types::{ErrorKind, Value};

use crate::config::JitConfig;
use crate::profile::ProfileData;
use crate::vm::VM;

/// Why compiled code handed control back to the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BailoutReason {
    /// Fuel ran out at a back-edge
    Interrupt,
    /// A local held a value the compiled code does not represent
    TypeGuard,
    /// Control left the compiled region
    Exit,
}

/// How compiled code finished
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JitExit {
    /// The function returned this number
    Returned(f64),
    /// Resume interpretation at `resume_at` with `stack[..depth]` as operands
    BailOut {
        /// Instruction offset to resume at
        resume_at: usize,
        /// Number of operands left in [`JitFrame::stack`]
        depth: usize,
        /// Why control came back
        reason: BailoutReason,
    },
}

/// Unboxed view of an interpreter frame handed to compiled code
#[derive(Debug, Clone, PartialEq)]
pub struct JitFrame {
    /// Local slots as numbers; meaningful where `known` is non-zero
    pub locals: Vec<f64>,
    /// 1 where the local holds a number, 0 otherwise
    pub known: Vec<u8>,
    /// Operand buffer, filled on bail-out and return
    pub stack: Vec<f64>,
    /// Back-edges left before an `Interrupt` bail-out
    pub fuel: u64,
}

impl JitFrame {
    /// Create a frame with every local unknown
    pub fn new(locals: usize, max_stack: usize, fuel: u64) -> Self {
        Self {
            locals: vec![0.0; locals],
            known: vec![0; locals],
            stack: vec![0.0; max_stack.max(1)],
            fuel,
        }
    }
}

/// Executable code produced by a backend
pub trait NativeCode {
    /// Run the compiled code against `frame`
    fn execute(&self, frame: &mut JitFrame) -> JitExit;
}

/// Compiled code for one entry point
#[derive(Clone)]
pub struct CompiledEntry {
    code: Arc<dyn NativeCode>,
    entry: usize,
    max_stack: usize,
}

impl CompiledEntry {
    /// Wrap compiled code entered at instruction `entry`
    pub fn new(code: Arc<dyn NativeCode>, entry: usize, max_stack: usize) -> Self {
        Self {
            code,
            entry,
            max_stack,
        }
    }

    /// Instruction offset this code is entered at
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Operand slots the code may use
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Run the compiled code
    pub fn execute(&self, frame: &mut JitFrame) -> JitExit {
        self.code.execute(frame)
    }
}

impl std::fmt::Debug for CompiledEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledEntry")
            .field("entry", &self.entry)
            .field("max_stack", &self.max_stack)
            .finish_non_exhaustive()
    }
}

/// Code generator plugged into the tier
///
/// Declining is never an error; the interpreter just keeps interpreting.
pub trait JitBackend {
    /// Backend name for diagnostics
    fn name(&self) -> &str;

    /// Compile `chunk` for entry at instruction `entry`, or decline
    fn maybe_compile(&mut self, chunk: &Chunk, entry: usize) -> Option<CompiledEntry>;
}

/// Backend that declines everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

impl JitBackend for NoopBackend {
    fn name(&self) -> &str {
        "noop"
    }

    fn maybe_compile(&mut self, _chunk: &Chunk, _entry: usize) -> Option<CompiledEntry> {
        None
    }
}

/// Tier counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitStats {
    /// Entry points compiled
    pub compiled: u64,
    /// Entry points the backend declined
    pub declined: u64,
    /// Times compiled code was entered
    pub entries: u64,
    /// Compiled runs that returned directly
    pub returns: u64,
    /// Bail-outs by reason
    pub interrupts: u64,
    /// Type-guard bail-outs
    pub type_guards: u64,
    /// Exits from the compiled region
    pub exits: u64,
    /// Compiled entries dropped after too many type-guard bail-outs
    pub discarded: u64,
}

enum EntryStatus {
    Counting,
    Compiled(CompiledEntry),
    Declined,
}

struct EntryState {
    // Holds the allocation, not the chunk, so the key's address stays unique
    // until `prune` drops the entry
    chunk: Weak<Chunk>,
    profile: ProfileData,
    status: EntryStatus,
}

/// Hotness counters and compiled code cache, keyed by chunk and entry
pub struct JitTier {
    backend: Box<dyn JitBackend>,
    config: JitConfig,
    entries: HashMap<(usize, usize), EntryState>,
    stats: JitStats,
}

impl JitTier {
    /// Create a tier around `backend`
    pub fn new(backend: Box<dyn JitBackend>, config: JitConfig) -> Self {
        Self {
            backend,
            config,
            entries: HashMap::new(),
            stats: JitStats::default(),
        }
    }

    /// Installed backend name
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Tier counters
    pub fn stats(&self) -> &JitStats {
        &self.stats
    }

    /// Number of entry points being tracked
    pub fn tracked_entries(&self) -> usize {
        self.entries.len()
    }

    /// Forget entry points whose chunk has been dropped
    pub(crate) fn prune(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, state| state.chunk.strong_count() > 0);
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::trace!(pruned, "dropped entry points of released chunks");
        }
    }

    /// Count an arrival at `entry` and return compiled code if there is any
    fn lookup(&mut self, chunk: &Arc<Chunk>, entry: usize, threshold: u32) -> Option<CompiledEntry> {
        if !self.config.enabled || chunk.slot_count() > self.config.max_locals {
            return None;
        }
        let key = (Arc::as_ptr(chunk) as usize, entry);
        let state = self.entries.entry(key).or_insert_with(|| EntryState {
            chunk: Arc::downgrade(chunk),
            profile: ProfileData::new(),
            status: EntryStatus::Counting,
        });
        match &state.status {
            EntryStatus::Compiled(code) => return Some(code.clone()),
            EntryStatus::Declined => return None,
            EntryStatus::Counting => {}
        }
        state.profile.record_execution();
        if !state.profile.should_compile(threshold) {
            return None;
        }
        match self.backend.maybe_compile(chunk, entry) {
            Some(code) if code.max_stack() <= self.config.max_stack => {
                tracing::info!(
                    chunk = chunk.name(),
                    entry,
                    backend = self.backend.name(),
                    "compiled hot entry point"
                );
                self.stats.compiled += 1;
                state.status = EntryStatus::Compiled(code.clone());
                Some(code)
            }
            _ => {
                tracing::debug!(
                    chunk = chunk.name(),
                    entry,
                    backend = self.backend.name(),
                    "backend declined entry point"
                );
                self.stats.declined += 1;
                state.status = EntryStatus::Declined;
                None
            }
        }
    }

    fn record_bailout(&mut self, chunk: &Arc<Chunk>, entry: usize, reason: BailoutReason) {
        match reason {
            BailoutReason::Interrupt => self.stats.interrupts += 1,
            BailoutReason::Exit => self.stats.exits += 1,
            BailoutReason::TypeGuard => self.stats.type_guards += 1,
        }
        if reason != BailoutReason::TypeGuard {
            return;
        }
        let key = (Arc::as_ptr(chunk) as usize, entry);
        if let Some(state) = self.entries.get_mut(&key) {
            state.profile.record_bailout();
            if state.profile.should_discard(self.config.max_bailouts) {
                tracing::debug!(
                    chunk = chunk.name(),
                    entry,
                    bailouts = state.profile.bailouts,
                    "discarding compiled entry point"
                );
                self.stats.discarded += 1;
                state.status = EntryStatus::Declined;
            }
        }
    }
}

impl VM {
    /// Hook run right after a bytecode frame is pushed
    pub(crate) fn on_function_entry(&mut self) -> Result<Option<Value>, ErrorKind> {
        let threshold = self.config.jit.call_threshold;
        self.enter_compiled(0, threshold)
    }

    /// Hook run after a backward jump landed on `target`
    pub(crate) fn on_back_edge(&mut self, target: usize) -> Result<Option<Value>, ErrorKind> {
        let threshold = self.config.jit.loop_threshold;
        self.enter_compiled(target, threshold)
    }

    fn enter_compiled(&mut self, entry: usize, threshold: u32) -> Result<Option<Value>, ErrorKind> {
        if !self.config.jit.enabled || self.stack.operand_depth() != 0 {
            return Ok(None);
        }
        let (chunk, base) = {
            let frame = self.stack.frame()?;
            (Arc::clone(&frame.chunk), frame.base)
        };
        let Some(code) = self.jit.lookup(&chunk, entry, threshold) else {
            return Ok(None);
        };

        let slots = chunk.slot_count();
        let mut frame = JitFrame::new(slots, code.max_stack(), self.config.jit.fuel);
        for i in 0..slots {
            if let Some(Value::Number(n)) = self.stack.get(base + i) {
                frame.locals[i] = n;
                frame.known[i] = 1;
            }
        }
        self.jit.stats.entries += 1;
        let exit = code.execute(&mut frame);
        for i in 0..slots {
            if frame.known[i] != 0 {
                self.stack.put(base + i, Value::Number(frame.locals[i]));
            }
        }

        match exit {
            JitExit::Returned(n) => {
                self.jit.stats.returns += 1;
                self.stack.push(Value::Number(n))?;
                self.do_return()
            }
            JitExit::BailOut {
                resume_at,
                depth,
                reason,
            } => {
                if resume_at > chunk.len() || depth > frame.stack.len() {
                    return Err(ErrorKind::malformed(format!(
                        "compiled code for '{}' bailed out to offset {} with {} operand(s)",
                        chunk.name(),
                        resume_at,
                        depth
                    )));
                }
                for n in &frame.stack[..depth] {
                    self.stack.push(Value::Number(*n))?;
                }
                self.stack.frame_mut()?.ip = resume_at;
                tracing::debug!(chunk = chunk.name(), entry, resume_at, ?reason, "bailed out to interpreter");
                self.jit.record_bailout(&chunk, entry, reason);
                Ok(None)
            }
        }
    }
}
