//! Compilability analysis
//!
//! Walks every instruction reachable from an entry point, tracking operand
//! stack depth. The result tells the code generator which offsets it emits
//! code for, which become exit stubs, and which comparisons are fused with
//! the conditional jump that follows them.

use std::collections::BTreeSet;

use bytecode_system::{Chunk, Constant, Opcode};

use crate::JitError;

/// Deepest operand stack the analysis accepts
const MAX_DEPTH: usize = 1 << 16;

/// What kind of entry point is being compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Function start; every reachable instruction must be supported
    Function,
    /// Loop header; unsupported instructions turn into exits
    Loop,
}

impl EntryKind {
    /// Offset 0 is always a function entry
    pub fn for_offset(entry: usize) -> Self {
        if entry == 0 {
            EntryKind::Function
        } else {
            EntryKind::Loop
        }
    }
}

/// Per-offset facts gathered by [`analyze`]
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Entry offset
    pub entry: usize,
    /// Operand depth on arrival, `None` where unreachable; one extra slot for the end
    pub depth_at: Vec<Option<usize>>,
    /// Offsets that hand control back to the interpreter
    pub exits: BTreeSet<usize>,
    /// Comparisons fused with the conditional jump right after them
    pub fused: BTreeSet<usize>,
    /// Deepest operand stack on any path
    pub max_stack: usize,
}

impl Plan {
    /// Reachable offsets in ascending order
    pub fn reachable(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.depth_at
            .iter()
            .enumerate()
            .filter_map(|(offset, depth)| depth.map(|d| (offset, d)))
    }
}

/// Whether the code generator can translate `op` on its own
fn supported(chunk: &Chunk, op: Opcode) -> bool {
    match op {
        Opcode::Nop
        | Opcode::LoadNumber(_)
        | Opcode::Pop
        | Opcode::Dup
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Neg
        | Opcode::Jump(_)
        | Opcode::JumpIfFalse(_)
        | Opcode::JumpIfTrue(_)
        | Opcode::Return => true,
        Opcode::LoadConstant(index) => {
            matches!(chunk.constant(index as usize), Some(Constant::Number(_)))
        }
        Opcode::LoadLocal(slot) | Opcode::StoreLocal(slot) => (slot.0 as usize) < chunk.slot_count(),
        _ => false,
    }
}

fn fusable(chunk: &Chunk, offset: usize) -> bool {
    matches!(
        chunk.instruction(offset + 1),
        Some(Opcode::JumpIfFalse(_) | Opcode::JumpIfTrue(_))
    )
}

struct Walk<'a> {
    chunk: &'a Chunk,
    plan: Plan,
    work: Vec<usize>,
}

impl Walk<'_> {
    fn reach(&mut self, from: usize, to: usize, depth: usize) -> Result<(), JitError> {
        if to > self.chunk.len() {
            return Err(JitError::BadTarget { offset: from, target: to });
        }
        if depth > MAX_DEPTH {
            return Err(JitError::TooDeep { offset: from });
        }
        match self.plan.depth_at[to] {
            Some(known) if known != depth => Err(JitError::StackMismatch {
                offset: to,
                expected: known,
                found: depth,
            }),
            Some(_) => Ok(()),
            None => {
                self.plan.depth_at[to] = Some(depth);
                self.plan.max_stack = self.plan.max_stack.max(depth);
                self.work.push(to);
                Ok(())
            }
        }
    }
}

/// Decide how code entered at `entry` would be compiled
///
/// # Examples
///
/// ```
/// use bytecode_system::{ChunkBuilder, Opcode};
/// use jit_compiler::analysis::{analyze, EntryKind};
///
/// let mut builder = ChunkBuilder::new("f");
/// builder.emit(Opcode::LoadNumber(1.0));
/// builder.emit(Opcode::LoadNumber(2.0));
/// builder.emit(Opcode::Add);
/// builder.emit(Opcode::Return);
///
/// let plan = analyze(&builder.build(), 0, EntryKind::Function).unwrap();
/// assert_eq!(plan.max_stack, 2);
/// assert!(plan.exits.is_empty());
/// ```
pub fn analyze(chunk: &Chunk, entry: usize, kind: EntryKind) -> Result<Plan, JitError> {
    let len = chunk.len();
    if entry >= len {
        return Err(JitError::BadTarget { offset: entry, target: entry });
    }
    let mut walk = Walk {
        chunk,
        plan: Plan {
            entry,
            depth_at: vec![None; len + 1],
            exits: BTreeSet::new(),
            fused: BTreeSet::new(),
            max_stack: 0,
        },
        work: Vec::new(),
    };
    walk.plan.depth_at[entry] = Some(0);
    walk.work.push(entry);
    let mut loops_back = false;

    while let Some(offset) = walk.work.pop() {
        let depth = walk.plan.depth_at[offset].unwrap_or_default();
        let Some(op) = chunk.instruction(offset) else {
            walk.plan.exits.insert(offset);
            continue;
        };

        let comparison = op.is_comparison() && fusable(chunk, offset);
        if !comparison && !supported(chunk, op) {
            if kind == EntryKind::Function {
                return Err(JitError::Unsupported {
                    offset,
                    opcode: op.mnemonic(),
                });
            }
            walk.plan.exits.insert(offset);
            continue;
        }

        let (pops, pushes) = op.stack_effect();
        if depth < pops {
            return Err(JitError::Underflow { offset });
        }
        let after = depth - pops + pushes;

        let mut edges = Vec::with_capacity(2);
        if comparison {
            walk.plan.fused.insert(offset);
            let next = offset + 1;
            if let Some(target) = chunk.instruction(next).and_then(|j| j.jump_target()) {
                edges.push((next, next + 1, depth - 2));
                edges.push((next, target, depth - 2));
            }
        } else {
            match op {
                Opcode::Return => {}
                Opcode::Jump(target) => edges.push((offset, target as usize, after)),
                Opcode::JumpIfFalse(target) | Opcode::JumpIfTrue(target) => {
                    edges.push((offset, offset + 1, after));
                    edges.push((offset, target as usize, after));
                }
                _ => edges.push((offset, offset + 1, after)),
            }
        }

        for (from, to, depth) in edges {
            if to == entry && from >= entry {
                loops_back = true;
            }
            walk.reach(from, to, depth)?;
        }
    }

    if kind == EntryKind::Loop && !loops_back {
        return Err(JitError::NoLoop { entry });
    }
    Ok(walk.plan)
}
