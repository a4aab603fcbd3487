//! Bytecode dispatch loop
//!
//! One exhaustive `match` over [`Opcode`] per instruction. The loop checks for
//! cancellation and pending collection before every fetch; that check is the
//! only safe point, so handlers may hold `&mut Object` borrows freely.
//!
//! An instruction whose allocation fails is rewound to its operands, the heap
//! is collected at the safe point and the instruction runs once more. Only a
//! second failure surfaces as `OutOfMemory`.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytecode_system::{Chunk, Constant, Opcode};
use core_types::{ErrorKind, Value};
use memory_manager::{Closure, Object};

use crate::vm::VM;

/// Result of one instruction: `Some` once the entry frame has returned
type Step = Result<Option<Value>, ErrorKind>;

/// Stack state needed to run an allocating instruction again
struct Rewind {
    len: usize,
    operands: Vec<Value>,
}

fn constant(chunk: &Chunk, index: u32) -> Result<&Constant, ErrorKind> {
    chunk.constant(index as usize).ok_or_else(|| {
        ErrorKind::malformed(format!(
            "constant index {} out of range ({} constants)",
            index,
            chunk.constants().len()
        ))
    })
}

fn constant_name(chunk: &Chunk, index: u32) -> Result<&str, ErrorKind> {
    let c = constant(chunk, index)?;
    c.as_str().ok_or_else(|| {
        ErrorKind::malformed(format!(
            "constant {} is a {}, expected a name",
            index,
            c.kind_name()
        ))
    })
}

/// Integral value of a finite number with no fractional part
fn integral(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15).then_some(n as i64)
}

fn array_index(key: f64, len: usize) -> Result<usize, ErrorKind> {
    match integral(key) {
        Some(i) if i >= 0 && (i as usize) < len => Ok(i as usize),
        _ => Err(ErrorKind::IndexOutOfBounds { index: key, len }),
    }
}

impl VM {
    /// Run instructions until the entry frame returns
    pub(crate) fn execute(&mut self) -> Result<Value, ErrorKind> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ErrorKind::Cancelled);
            }
            if self.heap.should_collect() {
                self.collect_garbage();
            }

            let frame = self.stack.frame_mut()?;
            let ip = frame.ip;
            let Some(op) = frame.chunk.instruction(ip) else {
                // Falling off the end returns nil
                self.stack.push(Value::Nil)?;
                if let Some(value) = self.do_return()? {
                    return Ok(value);
                }
                continue;
            };
            frame.ip = ip + 1;

            let rewind = self.rewind_point(op);
            let step = match (self.dispatch(op, ip), rewind) {
                (Err(ErrorKind::OutOfMemory { requested, .. }), Some(rewind))
                    if !self.heap.is_paused() =>
                {
                    tracing::debug!(
                        opcode = op.mnemonic(),
                        requested,
                        "allocation failed, collecting before retry"
                    );
                    self.stack.truncate(rewind.len);
                    for value in rewind.operands {
                        self.stack.push(value)?;
                    }
                    self.collect_garbage();
                    self.dispatch(op, ip)
                }
                (step, _) => step,
            };
            if let Some(value) = step? {
                return Ok(value);
            }
        }
    }

    /// Snapshot the operands of an instruction that may allocate
    fn rewind_point(&self, op: Opcode) -> Option<Rewind> {
        if !op.may_allocate() {
            return None;
        }
        let (pops, _) = op.stack_effect();
        let values = self.stack.values();
        let len = values.len().checked_sub(pops)?;
        Some(Rewind {
            len,
            operands: values[len..].to_vec(),
        })
    }

    fn dispatch(&mut self, op: Opcode, ip: usize) -> Step {
        match op {
            Opcode::Nop => {}

            Opcode::LoadConstant(index) => {
                let c = constant(&self.stack.frame()?.chunk, index)?.clone();
                let value = self.materialize(c)?;
                self.stack.push(value)?;
            }
            Opcode::LoadNil => self.stack.push(Value::Nil)?,
            Opcode::LoadTrue => self.stack.push(Value::Bool(true))?,
            Opcode::LoadFalse => self.stack.push(Value::Bool(false))?,
            Opcode::LoadNumber(n) => self.stack.push(Value::Number(n))?,

            Opcode::Pop => {
                self.stack.pop()?;
            }
            Opcode::Dup => {
                let top = self.stack.peek(0)?;
                self.stack.push(top)?;
            }

            Opcode::LoadLocal(slot) => {
                let value = self.stack.slot(slot.0 as usize)?;
                self.stack.push(value)?;
            }
            Opcode::StoreLocal(slot) => {
                let value = self.stack.pop()?;
                self.stack.set_slot(slot.0 as usize, value)?;
            }

            Opcode::LoadGlobal(index) => {
                let name = constant_name(&self.stack.frame()?.chunk, index)?;
                let value = self
                    .globals
                    .get(name)
                    .copied()
                    .ok_or_else(|| ErrorKind::UndefinedGlobal(name.to_string()))?;
                self.stack.push(value)?;
            }
            Opcode::StoreGlobal(index) => {
                let value = self.stack.pop()?;
                let name = constant_name(&self.stack.frame()?.chunk, index)?;
                self.globals.insert(name.to_string(), value);
            }

            Opcode::LoadUpvalue(index) => {
                let value = self.read_upvalue(index)?;
                self.stack.push(value)?;
            }
            Opcode::StoreUpvalue(index) => {
                let value = self.stack.pop()?;
                self.write_upvalue(index, value)?;
            }
            Opcode::CloseUpvalues(slot) => {
                let frame = self.stack.frame()?;
                if slot.0 as usize >= frame.chunk.slot_count() {
                    return Err(ErrorKind::malformed(format!(
                        "close of slot {} beyond {} slot(s)",
                        slot.0,
                        frame.chunk.slot_count()
                    )));
                }
                let from = frame.base + slot.0 as usize;
                self.close_upvalues(from)?;
            }

            Opcode::Add => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                let result = self.add(a, b)?;
                self.stack.push(result)?;
            }
            Opcode::Sub => self.arithmetic("subtract", |a, b| a - b)?,
            Opcode::Mul => self.arithmetic("multiply", |a, b| a * b)?,
            Opcode::Div => self.arithmetic("divide", |a, b| a / b)?,
            Opcode::Mod => self.arithmetic("modulo", |a, b| a % b)?,
            Opcode::Pow => self.arithmetic("power", f64::powf)?,
            Opcode::Neg => {
                let n = self.pop_number("negate")?;
                self.stack.push(Value::Number(-n))?;
            }
            Opcode::Not => {
                let value = self.stack.pop()?;
                let truthy = self.is_truthy(value)?;
                self.stack.push(Value::Bool(!truthy))?;
            }

            Opcode::BitAnd => self.bitwise("bitwise and", |a, b| a & b)?,
            Opcode::BitOr => self.bitwise("bitwise or", |a, b| a | b)?,
            Opcode::BitXor => self.bitwise("bitwise xor", |a, b| a ^ b)?,
            Opcode::ShiftLeft => self.bitwise("shift left", |a, b| a.wrapping_shl((b & 63) as u32))?,
            Opcode::ShiftRight => self.bitwise("shift right", |a, b| a >> (b & 63))?,
            Opcode::BitNot => {
                let value = self.stack.pop()?;
                let n = value
                    .as_number()
                    .and_then(integral)
                    .ok_or_else(|| ErrorKind::type_mismatch("bitwise not", "integer", value.type_name()))?;
                self.stack.push(Value::Number(!n as f64))?;
            }

            Opcode::Equal => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                let equal = self.values_equal(a, b)?;
                self.stack.push(Value::Bool(equal))?;
            }
            Opcode::NotEqual => {
                let b = self.stack.pop()?;
                let a = self.stack.pop()?;
                let equal = self.values_equal(a, b)?;
                self.stack.push(Value::Bool(!equal))?;
            }
            Opcode::Less => self.compare("compare", |a, b| a < b)?,
            Opcode::LessEqual => self.compare("compare", |a, b| a <= b)?,
            Opcode::Greater => self.compare("compare", |a, b| a > b)?,
            Opcode::GreaterEqual => self.compare("compare", |a, b| a >= b)?,

            Opcode::Jump(target) => {
                self.jump(target)?;
                if (target as usize) <= ip {
                    return self.on_back_edge(target as usize);
                }
            }
            Opcode::JumpIfFalse(target) => {
                let value = self.stack.pop()?;
                if !self.is_truthy(value)? {
                    self.jump(target)?;
                    if (target as usize) <= ip {
                        return self.on_back_edge(target as usize);
                    }
                }
            }
            Opcode::JumpIfTrue(target) => {
                let value = self.stack.pop()?;
                if self.is_truthy(value)? {
                    self.jump(target)?;
                    if (target as usize) <= ip {
                        return self.on_back_edge(target as usize);
                    }
                }
            }

            Opcode::Call(argc) => {
                let depth = self.stack.depth();
                let callee = self.stack.peek(argc as usize)?;
                self.call_value(callee, argc as usize)?;
                if self.stack.depth() > depth {
                    return self.on_function_entry();
                }
            }
            Opcode::TailCall(argc) => return self.tail_call(argc as usize),
            Opcode::Return => return self.do_return(),

            Opcode::Throw => {
                let value = self.stack.pop()?;
                self.throw(value)?;
            }
            Opcode::SetupTry(target) => self.setup_try(target)?,
            Opcode::PopTry => self.pop_try()?,

            Opcode::Closure(index) => {
                let c = constant(&self.stack.frame()?.chunk, index)?;
                let chunk = c.as_function().cloned().ok_or_else(|| {
                    ErrorKind::malformed(format!(
                        "closure constant {} is a {}",
                        index,
                        c.kind_name()
                    ))
                })?;
                let value = self.make_closure(chunk)?;
                self.stack.push(value)?;
            }

            Opcode::NewArray(n) => {
                let items = self.stack.pop_n(n as usize)?;
                let r = self.heap.allocate(Object::Array(items))?;
                self.stack.push(Value::Object(r))?;
            }
            Opcode::NewMap(pairs) => {
                let flat = self.stack.pop_n(pairs as usize * 2)?;
                let mut entries = BTreeMap::new();
                for pair in flat.chunks_exact(2) {
                    let key = self.key_string(pair[0], "build map")?;
                    entries.insert(key, pair[1]);
                }
                let r = self.heap.allocate(Object::Map(entries))?;
                self.stack.push(Value::Object(r))?;
            }
            Opcode::GetIndex => {
                let key = self.stack.pop()?;
                let target = self.stack.pop()?;
                let value = self.get_index(target, key)?;
                self.stack.push(value)?;
            }
            Opcode::SetIndex => {
                let value = self.stack.pop()?;
                let key = self.stack.pop()?;
                let target = self.stack.pop()?;
                self.set_index(target, key, value)?;
            }
            Opcode::GetKeys => {
                let target = self.stack.pop()?;
                let keys = self.collection_keys(target)?;
                let r = self.heap.allocate(Object::Array(keys))?;
                self.stack.push(Value::Object(r))?;
            }
            Opcode::GetValues => {
                let target = self.stack.pop()?;
                let values = self.collection_values(target)?;
                let r = self.heap.allocate(Object::Array(values))?;
                self.stack.push(Value::Object(r))?;
            }
            Opcode::Len => {
                let target = self.stack.pop()?;
                let len = match self.object(target, "length of")? {
                    Object::String(s) => s.chars().count(),
                    Object::Array(items) => items.len(),
                    Object::Map(entries) => entries.len(),
                    other => {
                        return Err(ErrorKind::type_mismatch(
                            "length of",
                            "string, array or map",
                            other.kind_name(),
                        ))
                    }
                };
                self.stack.push(Value::Number(len as f64))?;
            }
        }
        Ok(None)
    }

    /// Turn a constant into a runtime value, allocating when needed
    fn materialize(&mut self, c: Constant) -> Result<Value, ErrorKind> {
        Ok(match c {
            Constant::Nil => Value::Nil,
            Constant::Bool(b) => Value::Bool(b),
            Constant::Number(n) => Value::Number(n),
            Constant::Str(s) => Value::Object(self.heap.allocate(Object::String(s))?),
            Constant::Function(chunk) => self.make_closure(chunk)?,
        })
    }

    fn jump(&mut self, target: u32) -> Result<(), ErrorKind> {
        let frame = self.stack.frame_mut()?;
        if target as usize > frame.chunk.len() {
            return Err(ErrorKind::malformed(format!(
                "jump target {} beyond end of '{}' ({} instructions)",
                target,
                frame.chunk.name(),
                frame.chunk.len()
            )));
        }
        frame.ip = target as usize;
        Ok(())
    }

    /// Call the value sitting `argc` entries below the top.
    ///
    /// Bytecode callees get a frame; natives run to completion and leave
    /// their result in place of the callee.
    pub(crate) fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), ErrorKind> {
        let callee_pos = self.stack.len() - argc - 1;
        let Value::Object(r) = callee else {
            return Err(ErrorKind::NotCallable(callee.type_name()));
        };
        match self.heap.get(r)? {
            Object::Closure(closure) => {
                let chunk = Arc::clone(&closure.chunk);
                if chunk.arity() != argc {
                    return Err(ErrorKind::ArityMismatch {
                        callee: chunk.name().to_string(),
                        expected: chunk.arity(),
                        got: argc,
                    });
                }
                self.stack.push_frame(r, chunk, callee_pos + 1)
            }
            Object::Native(native) => {
                let native = native.clone();
                if !native.arity.accepts(argc) {
                    return Err(ErrorKind::ArityMismatch {
                        callee: native.name.clone(),
                        expected: native.arity.expected(),
                        got: argc,
                    });
                }
                let depth = self.stack.depth() + self.native_depth;
                if depth + 1 > self.config.max_frames {
                    return Err(ErrorKind::StackOverflow { depth });
                }
                self.native_depth += 1;
                let result = (native.handler)(&self.stack.values()[callee_pos + 1..]);
                self.native_depth -= 1;
                let value = result.map_err(|e| e.kind)?;
                self.stack.truncate(callee_pos);
                self.stack.push(value)
            }
            other => Err(ErrorKind::NotCallable(other.kind_name())),
        }
    }

    fn tail_call(&mut self, argc: usize) -> Step {
        let callee = self.stack.peek(argc)?;
        let Value::Object(r) = callee else {
            return Err(ErrorKind::NotCallable(callee.type_name()));
        };
        let chunk = match self.heap.get(r)? {
            Object::Closure(closure) => Arc::clone(&closure.chunk),
            Object::Native(_) => {
                self.call_value(callee, argc)?;
                return self.do_return();
            }
            other => return Err(ErrorKind::NotCallable(other.kind_name())),
        };
        if chunk.arity() != argc {
            return Err(ErrorKind::ArityMismatch {
                callee: chunk.name().to_string(),
                expected: chunk.arity(),
                got: argc,
            });
        }

        let base = self.stack.frame()?.base;
        self.close_upvalues(base)?;
        self.drop_handlers_above(self.stack.depth().saturating_sub(1));
        let args = self.stack.pop_n(argc)?;
        self.stack.truncate(base - 1);
        self.stack.push(callee)?;
        for arg in args {
            self.stack.push(arg)?;
        }
        self.stack.reuse_frame(r, chunk)?;
        self.on_function_entry()
    }

    /// Pop the result, tear down the current frame and hand the result to
    /// the caller (or to the host when this was the entry frame)
    pub(crate) fn do_return(&mut self) -> Step {
        let result = self.stack.pop()?;
        let base = self.stack.frame()?.base;
        self.close_upvalues(base)?;
        self.stack.pop_frame();
        self.drop_handlers_above(self.stack.depth());
        if self.stack.depth() == self.entry_depth {
            return Ok(Some(result));
        }
        self.stack.push(result)?;
        Ok(None)
    }

    pub(crate) fn is_truthy(&self, value: Value) -> Result<bool, ErrorKind> {
        match value {
            Value::Object(r) => Ok(self.heap.get(r)?.is_truthy()),
            other => Ok(other.is_truthy()),
        }
    }

    /// Strings by content, other objects by identity, numbers by IEEE rules
    pub(crate) fn values_equal(&self, a: Value, b: Value) -> Result<bool, ErrorKind> {
        if let (Value::Object(x), Value::Object(y)) = (a, b) {
            if x == y {
                return Ok(true);
            }
            if let (Object::String(s), Object::String(t)) = (self.heap.get(x)?, self.heap.get(y)?) {
                return Ok(s == t);
            }
            return Ok(false);
        }
        Ok(a == b)
    }

    fn object(&self, value: Value, operation: &'static str) -> Result<&Object, ErrorKind> {
        match value {
            Value::Object(r) => self.heap.get(r),
            other => Err(ErrorKind::type_mismatch(operation, "object", other.type_name())),
        }
    }

    fn key_string(&self, key: Value, operation: &'static str) -> Result<String, ErrorKind> {
        match self.object(key, operation)? {
            Object::String(s) => Ok(s.clone()),
            other => Err(ErrorKind::type_mismatch(operation, "string key", other.kind_name())),
        }
    }

    fn add(&mut self, a: Value, b: Value) -> Result<Value, ErrorKind> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok(Value::Number(x + y)),
            (Value::Object(x), Value::Object(y)) => {
                let joined = match (self.heap.get(x)?, self.heap.get(y)?) {
                    (Object::String(s), Object::String(t)) => {
                        let mut joined = String::with_capacity(s.len() + t.len());
                        joined.push_str(s);
                        joined.push_str(t);
                        joined
                    }
                    (Object::String(_), other) | (other, _) => {
                        return Err(ErrorKind::type_mismatch("add", "string", other.kind_name()))
                    }
                };
                Ok(Value::Object(self.heap.allocate(Object::String(joined))?))
            }
            (Value::Number(_), other) | (other, _) => {
                Err(ErrorKind::type_mismatch("add", "number", other.type_name()))
            }
        }
    }

    fn pop_number(&mut self, operation: &'static str) -> Result<f64, ErrorKind> {
        let value = self.stack.pop()?;
        value
            .as_number()
            .ok_or_else(|| ErrorKind::type_mismatch(operation, "number", value.type_name()))
    }

    fn pop_numbers(&mut self, operation: &'static str) -> Result<(f64, f64), ErrorKind> {
        let b = self.pop_number(operation)?;
        let a = self.pop_number(operation)?;
        Ok((a, b))
    }

    fn arithmetic(&mut self, operation: &'static str, f: fn(f64, f64) -> f64) -> Result<(), ErrorKind> {
        let (a, b) = self.pop_numbers(operation)?;
        self.stack.push(Value::Number(f(a, b)))
    }

    fn compare(&mut self, operation: &'static str, f: fn(f64, f64) -> bool) -> Result<(), ErrorKind> {
        let (a, b) = self.pop_numbers(operation)?;
        self.stack.push(Value::Bool(f(a, b)))
    }

    fn bitwise(&mut self, operation: &'static str, f: fn(i64, i64) -> i64) -> Result<(), ErrorKind> {
        let (a, b) = self.pop_numbers(operation)?;
        let (Some(x), Some(y)) = (integral(a), integral(b)) else {
            return Err(ErrorKind::type_mismatch(operation, "integer", "number"));
        };
        self.stack.push(Value::Number(f(x, y) as f64))
    }

    fn get_index(&mut self, target: Value, key: Value) -> Result<Value, ErrorKind> {
        let ch = match self.object(target, "index")? {
            Object::Array(items) => {
                let n = key
                    .as_number()
                    .ok_or_else(|| ErrorKind::type_mismatch("index", "number", key.type_name()))?;
                return Ok(items[array_index(n, items.len())?]);
            }
            Object::Map(entries) => {
                let Value::Object(k) = key else {
                    return Err(ErrorKind::type_mismatch("index", "string key", key.type_name()));
                };
                return match self.heap.get(k)? {
                    Object::String(name) => Ok(entries.get(name).copied().unwrap_or(Value::Nil)),
                    other => Err(ErrorKind::type_mismatch("index", "string key", other.kind_name())),
                };
            }
            Object::String(s) => {
                let n = key
                    .as_number()
                    .ok_or_else(|| ErrorKind::type_mismatch("index", "number", key.type_name()))?;
                let len = s.chars().count();
                let at = array_index(n, len)?;
                s.chars().nth(at).map(String::from).unwrap_or_default()
            }
            other => {
                return Err(ErrorKind::type_mismatch(
                    "index",
                    "array, map or string",
                    other.kind_name(),
                ))
            }
        };
        Ok(Value::Object(self.heap.allocate(Object::String(ch))?))
    }

    fn set_index(&mut self, target: Value, key: Value, value: Value) -> Result<(), ErrorKind> {
        let Value::Object(r) = target else {
            return Err(ErrorKind::type_mismatch("assign index", "array or map", target.type_name()));
        };
        let map_key = match self.heap.get(r)? {
            Object::Map(_) => Some(self.key_string(key, "assign index")?),
            _ => None,
        };
        match self.heap.get_mut(r)? {
            Object::Array(items) => {
                let n = key.as_number().ok_or_else(|| {
                    ErrorKind::type_mismatch("assign index", "number", key.type_name())
                })?;
                let len = items.len();
                match integral(n) {
                    Some(i) if i >= 0 && (i as usize) < len => items[i as usize] = value,
                    Some(i) if i >= 0 && i as usize == len => items.push(value),
                    _ => return Err(ErrorKind::IndexOutOfBounds { index: n, len }),
                }
            }
            Object::Map(entries) => {
                if let Some(k) = map_key {
                    entries.insert(k, value);
                }
            }
            other => {
                return Err(ErrorKind::type_mismatch(
                    "assign index",
                    "array or map",
                    other.kind_name(),
                ))
            }
        }
        Ok(())
    }

    fn collection_keys(&mut self, target: Value) -> Result<Vec<Value>, ErrorKind> {
        let names: Vec<String> = match self.object(target, "keys of")? {
            Object::Map(entries) => entries.keys().cloned().collect(),
            Object::Array(items) => {
                return Ok((0..items.len()).map(|i| Value::Number(i as f64)).collect())
            }
            other => return Err(ErrorKind::type_mismatch("keys of", "map or array", other.kind_name())),
        };
        names
            .into_iter()
            .map(|name| Ok(Value::Object(self.heap.allocate(Object::String(name))?)))
            .collect()
    }

    fn collection_values(&self, target: Value) -> Result<Vec<Value>, ErrorKind> {
        match self.object(target, "values of")? {
            Object::Map(entries) => Ok(entries.values().copied().collect()),
            Object::Array(items) => Ok(items.clone()),
            other => Err(ErrorKind::type_mismatch("values of", "map or array", other.kind_name())),
        }
    }

    /// Build a closure for `chunk`, capturing from the current frame
    pub(crate) fn make_closure(&mut self, chunk: Arc<Chunk>) -> Result<Value, ErrorKind> {
        let (base, slot_count, enclosing) = {
            let frame = self.stack.frame()?;
            (frame.base, frame.chunk.slot_count(), frame.closure)
        };
        let mut upvalues = Vec::with_capacity(chunk.upvalues().len());
        for desc in chunk.upvalues() {
            let cell = if desc.is_local {
                if desc.index as usize >= slot_count {
                    return Err(ErrorKind::malformed(format!(
                        "'{}' captures slot {} beyond {} slot(s)",
                        chunk.name(),
                        desc.index,
                        slot_count
                    )));
                }
                self.capture_upvalue(base + desc.index as usize)?
            } else {
                match self.heap.get(enclosing)? {
                    Object::Closure(Closure { upvalues: outer, .. }) => {
                        outer.get(desc.index as usize).copied().ok_or_else(|| {
                            ErrorKind::malformed(format!(
                                "'{}' captures missing upvalue {}",
                                chunk.name(),
                                desc.index
                            ))
                        })?
                    }
                    other => {
                        return Err(ErrorKind::malformed(format!(
                            "enclosing frame runs a {}",
                            other.kind_name()
                        )))
                    }
                }
            };
            upvalues.push(cell);
        }
        let r = self.heap.allocate(Object::Closure(Closure { chunk, upvalues }))?;
        Ok(Value::Object(r))
    }
}
