//! GC integration for the VM
//!
//! The heap never collects on its own; the VM calls [`VM::collect_garbage`]
//! at the inter-instruction safe point and hands it every root it holds.

use core_types::{ErrorKind, ObjectRef, Value};
use memory_manager::Object;

use crate::vm::VM;

impl VM {
    /// Collect everything unreachable from the VM's roots
    ///
    /// Roots are every value stack entry (locals, operands, callees and
    /// native arguments), the closure of every live frame, every global and
    /// every open upvalue cell. Returns the number of reclaimed objects.
    pub fn collect_garbage(&mut self) -> usize {
        self.collect_with(Vec::new())
    }

    fn collect_with(&mut self, extra: Vec<Value>) -> usize {
        let roots = self
            .stack
            .values()
            .iter()
            .copied()
            .chain(self.stack.frames().iter().map(|f| Value::Object(f.closure)))
            .chain(self.globals.values().copied())
            .chain(self.open_upvalues.iter().map(|(_, cell)| Value::Object(*cell)))
            .chain(extra);
        let reclaimed = self.heap.collect(roots);
        self.jit.prune();
        reclaimed
    }

    /// Allocate on behalf of the host, between runs.
    ///
    /// When the object would not fit, collect first. The object's own
    /// references and `held` stay alive through that collection.
    pub(crate) fn allocate_at_rest(
        &mut self,
        object: Object,
        held: &[Value],
    ) -> Result<ObjectRef, ErrorKind> {
        if !self.heap.fits(object.size_hint()) && !self.heap.is_paused() {
            let mut refs = Vec::new();
            object.trace(&mut refs);
            let extra = refs
                .into_iter()
                .map(Value::Object)
                .chain(held.iter().copied())
                .collect();
            self.collect_with(extra);
        }
        self.heap.allocate(object)
    }

    /// Ask for a collection at the next safe point
    pub fn request_collection(&mut self) {
        self.heap.request_collection();
    }
}
