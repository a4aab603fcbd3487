//! Cranelift-based JIT compiler backend
//!
//! Provides real native code generation using Cranelift for meow bytecode.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use bytecode_system::Chunk;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use interpreter::{BailoutReason, CompiledEntry, JitBackend, JitExit, JitFrame, NativeCode};
use target_lexicon::Triple;

use crate::analysis::{self, EntryKind};
use crate::codegen::{self, INTERRUPT, RETURNED, TYPE_GUARD};
use crate::JitError;

type EntryFn = unsafe extern "C" fn(*mut f64, *mut u8, *mut f64, i64) -> i64;

fn backend_error(e: impl std::fmt::Display) -> JitError {
    JitError::Backend(e.to_string())
}

/// Owns the executable memory; released once the backend and all code are gone
struct CodeMemory {
    module: Option<JITModule>,
}

impl Drop for CodeMemory {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: every CompiledFunction holds an Rc to this memory, so no
            // pointer into it can outlive this drop.
            unsafe { module.free_memory() };
        }
    }
}

/// Native code for one entry point
pub struct CompiledFunction {
    func: EntryFn,
    entry: usize,
    locals: usize,
    max_stack: usize,
    _memory: Rc<RefCell<CodeMemory>>,
}

impl CompiledFunction {
    /// Instruction offset the code is entered at
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Operand slots the code may spill
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }
}

impl NativeCode for CompiledFunction {
    fn execute(&self, frame: &mut JitFrame) -> JitExit {
        if frame.locals.len() < self.locals
            || frame.known.len() < self.locals
            || frame.stack.len() < self.max_stack.max(1)
        {
            return JitExit::BailOut {
                resume_at: self.entry,
                depth: 0,
                reason: BailoutReason::Exit,
            };
        }
        let fuel = i64::try_from(frame.fuel).unwrap_or(i64::MAX);
        // SAFETY: the buffers were checked against the slot and operand counts
        // the code was generated for, and the code memory is kept alive by
        // `_memory`.
        let status = unsafe {
            (self.func)(
                frame.locals.as_mut_ptr(),
                frame.known.as_mut_ptr(),
                frame.stack.as_mut_ptr(),
                fuel,
            )
        };
        let (kind, depth, resume_at) = codegen::unpack(status);
        let reason = match kind {
            RETURNED => return JitExit::Returned(frame.stack[0]),
            INTERRUPT => BailoutReason::Interrupt,
            TYPE_GUARD => BailoutReason::TypeGuard,
            _ => BailoutReason::Exit,
        };
        JitExit::BailOut {
            resume_at,
            depth,
            reason,
        }
    }
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("entry", &self.entry)
            .field("locals", &self.locals)
            .field("max_stack", &self.max_stack)
            .finish_non_exhaustive()
    }
}

/// Cranelift-based JIT compiler backend
///
/// Compiles the numeric subset of meow bytecode to native machine code.
pub struct CraneliftBackend {
    memory: Rc<RefCell<CodeMemory>>,
    ctx: Context,
    builder_ctx: FunctionBuilderContext,
    triple: Triple,
    func_counter: u32,
}

impl CraneliftBackend {
    /// Create a backend for the host machine
    pub fn new() -> Result<Self, JitError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("opt_level", "speed").map_err(backend_error)?;
        flag_builder.set("is_pic", "false").map_err(backend_error)?;

        let isa_builder = cranelift_native::builder().map_err(backend_error)?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(backend_error)?;
        let triple = isa.triple().clone();

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        tracing::debug!(target_triple = %triple, "cranelift backend ready");

        Ok(Self {
            memory: Rc::new(RefCell::new(CodeMemory {
                module: Some(module),
            })),
            ctx,
            builder_ctx: FunctionBuilderContext::new(),
            triple,
            func_counter: 0,
        })
    }

    /// Target the backend generates code for
    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    /// Compile `chunk` entered at instruction `entry`
    ///
    /// Offset 0 compiles the whole function; any other offset must be a loop
    /// header.
    pub fn compile(&mut self, chunk: &Chunk, entry: usize) -> Result<CompiledFunction, JitError> {
        if u32::try_from(chunk.len()).is_err() {
            return Err(JitError::TooDeep { offset: chunk.len() });
        }
        let plan = analysis::analyze(chunk, entry, EntryKind::for_offset(entry))?;

        let mut memory = self.memory.borrow_mut();
        let module = memory
            .module
            .as_mut()
            .ok_or_else(|| JitError::Backend("code memory released".to_string()))?;

        let pointer = module.target_config().pointer_type();
        self.ctx.func.signature = codegen::signature(module.make_signature(), pointer);
        if let Err(e) = codegen::translate(&mut self.ctx.func, &mut self.builder_ctx, chunk, &plan) {
            module.clear_context(&mut self.ctx);
            return Err(e);
        }

        let name = format!("meow_{}_{}", self.func_counter, entry);
        self.func_counter += 1;
        let declared = module.declare_function(&name, Linkage::Local, &self.ctx.func.signature);
        let defined = declared.and_then(|id| module.define_function(id, &mut self.ctx).map(|_| id));
        module.clear_context(&mut self.ctx);
        let id = defined.map_err(backend_error)?;
        module.finalize_definitions().map_err(backend_error)?;

        let code = module.get_finalized_function(id);
        // SAFETY: `id` was declared with the signature `codegen::signature` builds,
        // which matches `EntryFn` under the host's default calling convention.
        let func = unsafe { std::mem::transmute::<*const u8, EntryFn>(code) };
        drop(memory);

        Ok(CompiledFunction {
            func,
            entry,
            locals: chunk.slot_count(),
            max_stack: plan.max_stack,
            _memory: Rc::clone(&self.memory),
        })
    }
}

impl JitBackend for CraneliftBackend {
    fn name(&self) -> &str {
        "cranelift"
    }

    fn maybe_compile(&mut self, chunk: &Chunk, entry: usize) -> Option<CompiledEntry> {
        match self.compile(chunk, entry) {
            Ok(function) => {
                let max_stack = function.max_stack();
                #[allow(clippy::arc_with_non_send_sync)]
                let code: Arc<dyn NativeCode> = Arc::new(function);
                Some(CompiledEntry::new(code, entry, max_stack))
            }
            Err(e) => {
                tracing::debug!(chunk = chunk.name(), entry, error = %e, "cranelift declined");
                None
            }
        }
    }
}
