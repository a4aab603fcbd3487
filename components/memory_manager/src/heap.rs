//! Object arena.
//!
//! Objects live in a vector of slots addressed by [`ObjectRef`]. A slot is
//! either occupied or on the free list; reclaiming a slot bumps its generation
//! so handles issued for the previous occupant stop resolving.

use std::collections::HashMap;

use core_types::{ErrorKind, ObjectRef};
use serde::{Deserialize, Serialize};

use crate::gc::GcStats;
use crate::object::Object;

/// Heap sizing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Bytes allocated before the first collection is requested
    pub initial_threshold: usize,
    /// Multiplier applied to live bytes to set the next threshold
    pub growth_factor: f64,
    /// Hard limit; allocations beyond it fail with `OutOfMemory`. The
    /// collection threshold never exceeds seven eighths of it.
    pub max_heap_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 1024 * 1024,
            growth_factor: 2.0,
            max_heap_bytes: 256 * 1024 * 1024,
        }
    }
}

impl HeapConfig {
    /// Parse a config from JSON; missing fields take their defaults
    ///
    /// # Examples
    ///
    /// ```
    /// use memory_manager::HeapConfig;
    ///
    /// let config = HeapConfig::from_json(r#"{ "max_heap_bytes": 65536 }"#).unwrap();
    /// assert_eq!(config.max_heap_bytes, 65536);
    /// assert_eq!(config.growth_factor, 2.0);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Highest collection threshold for `config`.
///
/// Kept below `max_heap_bytes` so a safe-point collection is due before the
/// hard limit is reached.
pub(crate) fn threshold_ceiling(config: &HeapConfig) -> usize {
    let reserve = (config.max_heap_bytes / 8).max(1);
    config.max_heap_bytes.saturating_sub(reserve)
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub object: Object,
    pub marked: bool,
    pub size: usize,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub generation: u32,
    pub entry: Option<Entry>,
}

/// Arena of heap objects with mark-sweep reclamation
///
/// # Examples
///
/// ```
/// use core_types::Value;
/// use memory_manager::{Heap, Object};
///
/// let mut heap = Heap::new();
/// let kept = heap.allocate(Object::String("kept".to_string())).unwrap();
/// let _lost = heap.allocate(Object::String("lost".to_string())).unwrap();
///
/// let reclaimed = heap.collect([Value::Object(kept)]);
/// assert_eq!(reclaimed, 1);
/// assert_eq!(heap.get(kept).unwrap().as_string(), Some("kept"));
/// ```
#[derive(Debug)]
pub struct Heap {
    pub(crate) slots: Vec<Slot>,
    /// Free slot indices, highest first so `pop` reuses the lowest
    pub(crate) free: Vec<u32>,
    pub(crate) live: usize,
    pub(crate) bytes: usize,
    pub(crate) threshold: usize,
    pub(crate) config: HeapConfig,
    pub(crate) pinned: HashMap<ObjectRef, usize>,
    pub(crate) pause_depth: usize,
    pub(crate) requested: bool,
    pub(crate) stats: GcStats,
}

impl Heap {
    /// Create a heap with default sizing
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Create a heap with explicit sizing
    pub fn with_config(config: HeapConfig) -> Self {
        let threshold = config.initial_threshold.min(threshold_ceiling(&config));
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            bytes: 0,
            threshold,
            config,
            pinned: HashMap::new(),
            pause_depth: 0,
            requested: false,
            stats: GcStats::default(),
        }
    }

    /// Place an object in the heap.
    ///
    /// Never collects; collection only happens when the owner calls
    /// [`Heap::collect`] at a safe point. Fails with `OutOfMemory` when the
    /// object would push the heap past `max_heap_bytes`; the owner is
    /// expected to collect and retry once before treating that as final.
    pub fn allocate(&mut self, object: Object) -> Result<ObjectRef, ErrorKind> {
        let size = object.size_hint();
        if !self.fits(size) {
            return Err(ErrorKind::OutOfMemory {
                requested: size,
                limit: self.config.max_heap_bytes,
            });
        }
        let entry = Entry {
            object,
            marked: false,
            size,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;
        self.bytes += size;
        Ok(ObjectRef::new(index, self.slots[index as usize].generation))
    }

    /// Check if `size` more bytes stay within `max_heap_bytes`
    #[inline]
    pub fn fits(&self, size: usize) -> bool {
        self.bytes.saturating_add(size) <= self.config.max_heap_bytes
    }

    fn slot(&self, r: ObjectRef) -> Option<&Entry> {
        self.slots
            .get(r.index())
            .filter(|slot| slot.generation == r.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Resolve a handle
    #[inline]
    pub fn get(&self, r: ObjectRef) -> Result<&Object, ErrorKind> {
        self.slot(r)
            .map(|entry| &entry.object)
            .ok_or(ErrorKind::DanglingReference(r))
    }

    /// Resolve a handle for mutation
    #[inline]
    pub fn get_mut(&mut self, r: ObjectRef) -> Result<&mut Object, ErrorKind> {
        self.slots
            .get_mut(r.index())
            .filter(|slot| slot.generation == r.generation())
            .and_then(|slot| slot.entry.as_mut())
            .map(|entry| &mut entry.object)
            .ok_or(ErrorKind::DanglingReference(r))
    }

    /// Check if a handle still resolves
    pub fn contains(&self, r: ObjectRef) -> bool {
        self.slot(r).is_some()
    }

    /// Number of live objects
    pub fn live_objects(&self) -> usize {
        self.live
    }

    /// Approximate bytes held by live objects
    pub fn bytes_allocated(&self) -> usize {
        self.bytes
    }

    /// Byte count at which a collection becomes due
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Active sizing parameters
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Collection statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Ask for a collection at the next safe point
    pub fn request_collection(&mut self) {
        self.requested = true;
    }

    /// Check if the owner should collect at this safe point
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.pause_depth == 0 && (self.requested || self.bytes >= self.threshold)
    }

    /// Suspend pressure-triggered collection; calls nest
    pub fn pause_collection(&mut self) {
        self.pause_depth += 1;
    }

    /// Undo one [`Heap::pause_collection`]
    pub fn resume_collection(&mut self) {
        self.pause_depth = self.pause_depth.saturating_sub(1);
    }

    /// Check if collection is paused
    pub fn is_paused(&self) -> bool {
        self.pause_depth > 0
    }

    /// Keep an object alive regardless of roots; pins nest
    pub fn pin(&mut self, r: ObjectRef) {
        *self.pinned.entry(r).or_insert(0) += 1;
    }

    /// Release one pin
    pub fn unpin(&mut self, r: ObjectRef) {
        if let Some(count) = self.pinned.get_mut(&r) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(&r);
            }
        }
    }

    /// Iterate over live handles
    pub fn handles(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.entry
                .as_ref()
                .map(|_| ObjectRef::new(i as u32, slot.generation))
        })
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
