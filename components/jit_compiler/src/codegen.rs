//! Translation of the numeric subset into Cranelift IR
//!
//! Compiled functions have the signature
//! `extern "C" fn(locals: *mut f64, known: *mut u8, stack: *mut f64, fuel: i64) -> i64`.
//! Operands live in Cranelift variables, one per operand depth; locals stay in
//! memory so a bail-out leaves them where the interpreter expects them. The
//! returned status packs the exit kind, operand depth and resume offset.

use std::collections::HashMap;

use bytecode_system::{Chunk, Constant, Opcode};
use cranelift_codegen::entity::EntityRef;
use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{types, AbiParam, Block, Function, InstBuilder, MemFlags, Signature, Type, Value};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};

use crate::analysis::Plan;
use crate::JitError;

/// Status kind: returned, result in `stack[0]`
pub const RETURNED: u64 = 0;
/// Status kind: fuel ran out at a back-edge
pub const INTERRUPT: u64 = 1;
/// Status kind: a local was not a number
pub const TYPE_GUARD: u64 = 2;
/// Status kind: control left the compiled region
pub const EXIT: u64 = 3;

/// Pack an exit status
///
/// # Examples
///
/// ```
/// use jit_compiler::codegen::{pack, unpack, TYPE_GUARD};
///
/// assert_eq!(unpack(pack(TYPE_GUARD, 3, 17)), (TYPE_GUARD, 3, 17));
/// ```
pub fn pack(kind: u64, depth: usize, ip: usize) -> i64 {
    ((kind << 62) | ((depth as u64 & 0x3FFF_FFFF) << 32) | (ip as u64 & 0xFFFF_FFFF)) as i64
}

/// Split a status into kind, operand depth and resume offset
pub fn unpack(status: i64) -> (u64, usize, usize) {
    let bits = status as u64;
    (
        bits >> 62,
        ((bits >> 32) & 0x3FFF_FFFF) as usize,
        (bits & 0xFFFF_FFFF) as usize,
    )
}

/// Fill in the compiled function signature
pub fn signature(mut sig: Signature, pointer: Type) -> Signature {
    sig.params.push(AbiParam::new(pointer));
    sig.params.push(AbiParam::new(pointer));
    sig.params.push(AbiParam::new(pointer));
    sig.params.push(AbiParam::new(types::I64));
    sig.returns.push(AbiParam::new(types::I64));
    sig
}

fn byte_offset(index: usize, size: usize) -> Result<i32, JitError> {
    index
        .checked_mul(size)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or(JitError::TooDeep { offset: index })
}

struct Translator<'a, 'f> {
    builder: FunctionBuilder<'f>,
    chunk: &'a Chunk,
    plan: &'a Plan,
    blocks: HashMap<usize, Block>,
    operands: Vec<Variable>,
    fuel: Variable,
    locals: Value,
    known: Value,
    stack: Value,
    depth: usize,
    back_edges: Vec<(Block, usize, usize)>,
}

impl Translator<'_, '_> {
    fn push(&mut self, value: Value) {
        self.builder.def_var(self.operands[self.depth], value);
        self.depth += 1;
    }

    fn pop(&mut self) -> Value {
        self.depth -= 1;
        self.builder.use_var(self.operands[self.depth])
    }

    fn top(&mut self) -> Value {
        self.builder.use_var(self.operands[self.depth - 1])
    }

    fn block(&self, offset: usize) -> Result<Block, JitError> {
        self.blocks.get(&offset).copied().ok_or(JitError::BadTarget {
            offset,
            target: offset,
        })
    }

    /// Block to branch to for the edge `from -> to`
    fn edge(&mut self, from: usize, to: usize) -> Result<Block, JitError> {
        if to > from {
            return self.block(to);
        }
        let block = self.builder.create_block();
        self.back_edges.push((block, to, self.depth));
        Ok(block)
    }

    fn fall_through(&mut self, offset: usize) -> Result<(), JitError> {
        let next = self.block(offset + 1)?;
        self.builder.ins().jump(next, &[]);
        Ok(())
    }

    /// Spill operands and leave with `kind`
    fn bail(&mut self, kind: u64, resume_at: usize) -> Result<(), JitError> {
        for k in 0..self.depth {
            let value = self.builder.use_var(self.operands[k]);
            let at = byte_offset(k, 8)?;
            self.builder.ins().store(MemFlags::trusted(), value, self.stack, at);
        }
        let status = self.builder.ins().iconst(types::I64, pack(kind, self.depth, resume_at));
        self.builder.ins().return_(&[status]);
        Ok(())
    }

    fn binary(&mut self, offset: usize, op: Opcode) -> Result<(), JitError> {
        let b = self.pop();
        let a = self.pop();
        let ins = self.builder.ins();
        let result = match op {
            Opcode::Add => ins.fadd(a, b),
            Opcode::Sub => ins.fsub(a, b),
            Opcode::Mul => ins.fmul(a, b),
            _ => ins.fdiv(a, b),
        };
        self.push(result);
        self.fall_through(offset)
    }

    /// Comparison followed by the conditional jump it feeds
    fn fused(&mut self, offset: usize, op: Opcode) -> Result<(), JitError> {
        let cc = match op {
            Opcode::Equal => FloatCC::Equal,
            Opcode::NotEqual => FloatCC::NotEqual,
            Opcode::Less => FloatCC::LessThan,
            Opcode::LessEqual => FloatCC::LessThanOrEqual,
            Opcode::Greater => FloatCC::GreaterThan,
            _ => FloatCC::GreaterThanOrEqual,
        };
        let b = self.pop();
        let a = self.pop();
        let cond = self.builder.ins().fcmp(cc, a, b);
        let jump_at = offset + 1;
        match self.chunk.instruction(jump_at) {
            Some(Opcode::JumpIfFalse(target)) => {
                let taken = self.edge(jump_at, target as usize)?;
                let next = self.block(jump_at + 1)?;
                self.builder.ins().brif(cond, next, &[], taken, &[]);
            }
            Some(Opcode::JumpIfTrue(target)) => {
                let taken = self.edge(jump_at, target as usize)?;
                let next = self.block(jump_at + 1)?;
                self.builder.ins().brif(cond, taken, &[], next, &[]);
            }
            _ => {
                return Err(JitError::Unsupported {
                    offset,
                    opcode: op.mnemonic(),
                })
            }
        }
        Ok(())
    }

    fn truthy(&mut self) -> Value {
        let value = self.pop();
        let zero = self.builder.ins().f64const(0.0);
        self.builder.ins().fcmp(FloatCC::OrderedNotEqual, value, zero)
    }

    fn instruction(&mut self, offset: usize, op: Opcode) -> Result<(), JitError> {
        if self.plan.fused.contains(&offset) {
            return self.fused(offset, op);
        }
        match op {
            Opcode::Nop => self.fall_through(offset),
            Opcode::LoadNumber(n) => {
                let value = self.builder.ins().f64const(n);
                self.push(value);
                self.fall_through(offset)
            }
            Opcode::LoadConstant(index) => {
                let Some(Constant::Number(n)) = self.chunk.constant(index as usize) else {
                    return Err(JitError::Unsupported {
                        offset,
                        opcode: op.mnemonic(),
                    });
                };
                let value = self.builder.ins().f64const(*n);
                self.push(value);
                self.fall_through(offset)
            }
            Opcode::LoadLocal(slot) => {
                let slot = slot.0 as usize;
                let flag = self.builder.ins().load(
                    types::I8,
                    MemFlags::trusted(),
                    self.known,
                    byte_offset(slot, 1)?,
                );
                let ok = self.builder.create_block();
                let guard = self.builder.create_block();
                self.builder.ins().brif(flag, ok, &[], guard, &[]);

                self.builder.switch_to_block(guard);
                self.bail(TYPE_GUARD, offset)?;

                self.builder.switch_to_block(ok);
                let value = self.builder.ins().load(
                    types::F64,
                    MemFlags::trusted(),
                    self.locals,
                    byte_offset(slot, 8)?,
                );
                self.push(value);
                self.fall_through(offset)
            }
            Opcode::StoreLocal(slot) => {
                let slot = slot.0 as usize;
                let value = self.pop();
                self.builder
                    .ins()
                    .store(MemFlags::trusted(), value, self.locals, byte_offset(slot, 8)?);
                let one = self.builder.ins().iconst(types::I8, 1);
                self.builder
                    .ins()
                    .store(MemFlags::trusted(), one, self.known, byte_offset(slot, 1)?);
                self.fall_through(offset)
            }
            Opcode::Pop => {
                self.pop();
                self.fall_through(offset)
            }
            Opcode::Dup => {
                let value = self.top();
                self.push(value);
                self.fall_through(offset)
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => self.binary(offset, op),
            Opcode::Neg => {
                let value = self.pop();
                let negated = self.builder.ins().fneg(value);
                self.push(negated);
                self.fall_through(offset)
            }
            Opcode::Jump(target) => {
                let block = self.edge(offset, target as usize)?;
                self.builder.ins().jump(block, &[]);
                Ok(())
            }
            Opcode::JumpIfFalse(target) => {
                let cond = self.truthy();
                let taken = self.edge(offset, target as usize)?;
                let next = self.block(offset + 1)?;
                self.builder.ins().brif(cond, next, &[], taken, &[]);
                Ok(())
            }
            Opcode::JumpIfTrue(target) => {
                let cond = self.truthy();
                let taken = self.edge(offset, target as usize)?;
                let next = self.block(offset + 1)?;
                self.builder.ins().brif(cond, taken, &[], next, &[]);
                Ok(())
            }
            Opcode::Return => {
                let value = self.pop();
                self.builder.ins().store(MemFlags::trusted(), value, self.stack, 0);
                let status = self.builder.ins().iconst(types::I64, pack(RETURNED, 1, offset));
                self.builder.ins().return_(&[status]);
                Ok(())
            }
            other => Err(JitError::Unsupported {
                offset,
                opcode: other.mnemonic(),
            }),
        }
    }

    /// Back-edges burn one unit of fuel or bail out with `Interrupt`
    fn back_edge(&mut self, block: Block, target: usize, depth: usize) -> Result<(), JitError> {
        self.builder.switch_to_block(block);
        self.depth = depth;
        let fuel = self.builder.use_var(self.fuel);
        let empty = self.builder.ins().icmp_imm(IntCC::SignedLessThanOrEqual, fuel, 0);
        let out = self.builder.create_block();
        let go = self.builder.create_block();
        self.builder.ins().brif(empty, out, &[], go, &[]);

        self.builder.switch_to_block(out);
        self.bail(INTERRUPT, target)?;

        self.builder.switch_to_block(go);
        let left = self.builder.ins().iadd_imm(fuel, -1);
        self.builder.def_var(self.fuel, left);
        let header = self.block(target)?;
        self.builder.ins().jump(header, &[]);
        Ok(())
    }
}

/// Build `func` from `plan`
///
/// `func.signature` must already come from [`signature`].
pub fn translate(
    func: &mut Function,
    builder_ctx: &mut FunctionBuilderContext,
    chunk: &Chunk,
    plan: &Plan,
) -> Result<(), JitError> {
    let mut builder = FunctionBuilder::new(func, builder_ctx);
    let start = builder.create_block();
    builder.append_block_params_for_function_params(start);
    builder.switch_to_block(start);
    let params = builder.block_params(start).to_vec();
    let [locals, known, stack, fuel_in] = params[..] else {
        return Err(JitError::Backend(format!(
            "expected 4 parameters, found {}",
            params.len()
        )));
    };

    let fuel = Variable::new(0);
    builder.declare_var(fuel, types::I64);
    builder.def_var(fuel, fuel_in);
    let operands: Vec<Variable> = (0..plan.max_stack)
        .map(|k| {
            let var = Variable::new(k + 1);
            builder.declare_var(var, types::F64);
            var
        })
        .collect();

    let blocks: HashMap<usize, Block> = plan
        .reachable()
        .map(|(offset, _)| (offset, builder.create_block()))
        .collect();

    let mut t = Translator {
        builder,
        chunk,
        plan,
        blocks,
        operands,
        fuel,
        locals,
        known,
        stack,
        depth: 0,
        back_edges: Vec::new(),
    };
    let first = t.block(plan.entry)?;
    t.builder.ins().jump(first, &[]);

    for (offset, depth) in plan.reachable() {
        let block = t.block(offset)?;
        t.builder.switch_to_block(block);
        t.depth = depth;
        match chunk.instruction(offset) {
            Some(op) if !plan.exits.contains(&offset) => t.instruction(offset, op)?,
            _ => t.bail(EXIT, offset)?,
        }
    }

    let pending = std::mem::take(&mut t.back_edges);
    for (block, target, depth) in pending {
        t.back_edge(block, target, depth)?;
    }

    t.builder.seal_all_blocks();
    t.builder.finalize();
    Ok(())
}
