//! Mark-sweep collection over the object arena.
//!
//! Marking starts from the caller's roots plus pinned handles and follows
//! object fields with an explicit gray stack. Sweeping frees every unmarked
//! slot, bumps its generation and rebuilds the free list so the lowest free
//! indices are reused first.

use core_types::{ObjectRef, Value};

use crate::heap::{threshold_ceiling, Heap};

/// Collection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Completed collections
    pub collections: u64,
    /// Objects reclaimed across all collections
    pub total_reclaimed: u64,
    /// Objects reclaimed by the most recent collection
    pub last_reclaimed: usize,
    /// Objects surviving the most recent collection
    pub last_live: usize,
}

impl Heap {
    /// Collect everything unreachable from `roots` and the pinned set.
    ///
    /// Must only be called at a safe point: no `&mut Object` obtained from
    /// this heap may be outstanding, which the borrow checker enforces.
    /// Returns the number of reclaimed objects.
    pub fn collect<I>(&mut self, roots: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        let mut gray: Vec<ObjectRef> = roots
            .into_iter()
            .filter_map(|v| v.as_object())
            .collect();
        gray.extend(self.pinned.keys().copied());

        self.mark(gray);
        let reclaimed = self.sweep();

        let from_live = (self.bytes as f64 * self.config.growth_factor) as usize;
        self.threshold = from_live
            .max(self.config.initial_threshold)
            .min(threshold_ceiling(&self.config));
        self.requested = false;

        self.stats.collections += 1;
        self.stats.total_reclaimed += reclaimed as u64;
        self.stats.last_reclaimed = reclaimed;
        self.stats.last_live = self.live;

        tracing::debug!(
            reclaimed,
            live = self.live,
            bytes = self.bytes,
            next_threshold = self.threshold,
            "garbage collection finished"
        );
        reclaimed
    }

    fn mark(&mut self, mut gray: Vec<ObjectRef>) {
        let mut children = Vec::new();
        while let Some(r) = gray.pop() {
            let Some(slot) = self.slots.get_mut(r.index()) else {
                tracing::warn!(handle = %r, "root or field refers outside the heap");
                continue;
            };
            if slot.generation != r.generation() {
                tracing::warn!(handle = %r, "root or field refers to a reclaimed object");
                continue;
            }
            let Some(entry) = slot.entry.as_mut() else {
                continue;
            };
            if entry.marked {
                continue;
            }
            entry.marked = true;
            entry.object.trace(&mut children);
            gray.append(&mut children);
        }
    }

    fn sweep(&mut self) -> usize {
        let mut reclaimed = 0;
        let mut bytes = 0;
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot.entry.as_mut() {
                Some(entry) if entry.marked => {
                    entry.marked = false;
                    entry.size = entry.object.size_hint();
                    bytes += entry.size;
                }
                Some(_) => {
                    slot.entry = None;
                    slot.generation = slot.generation.wrapping_add(1);
                    reclaimed += 1;
                    self.free.push(index as u32);
                }
                None => self.free.push(index as u32),
            }
        }
        self.free.reverse();
        self.live -= reclaimed;
        self.bytes = bytes;
        reclaimed
    }
}
