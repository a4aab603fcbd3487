//! Memory Manager - object heap and garbage collector
//!
//! This component provides:
//! - An arena of heap objects addressed by generation-checked handles
//! - Object kinds: strings, closures, natives, arrays, maps, upvalue cells
//! - Mark-sweep reclamation driven by an allocation-pressure threshold
//! - Pinning for host-held handles and a pause counter for bulk work
//!
//! The heap never collects on its own. Its owner asks
//! [`Heap::should_collect`] at safe points and then calls [`Heap::collect`]
//! with the current roots.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gc;
pub mod heap;
pub mod object;

// Re-export main types
pub use gc::GcStats;
pub use heap::{Heap, HeapConfig};
pub use object::{Arity, Closure, NativeFn, NativeFunction, Object, UpvalueCell};
