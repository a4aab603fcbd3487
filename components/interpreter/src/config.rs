//! VM configuration
//!
//! All limits have defaults; hosts override them in code or load them from
//! JSON. Missing JSON fields keep their default values.

use memory_manager::HeapConfig;
use serde::{Deserialize, Serialize};

/// JIT tier tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Whether hot code is offered to the backend at all
    pub enabled: bool,
    /// Calls of a chunk before its entry is compiled
    pub call_threshold: u32,
    /// Back-edge hits of a loop header before it is compiled
    pub loop_threshold: u32,
    /// Back-edges compiled code may take before returning to a safe point
    pub fuel: u64,
    /// Type-guard bail-outs tolerated before an entry is discarded
    pub max_bailouts: u32,
    /// Largest local slot count a backend is asked to handle
    pub max_locals: usize,
    /// Largest operand stack depth a backend is asked to handle
    pub max_stack: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            call_threshold: 100,
            loop_threshold: 100,
            fuel: 10_000,
            max_bailouts: 10,
            max_locals: 64,
            max_stack: 64,
        }
    }
}

/// Limits and tuning for one VM instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum call depth, natives included
    pub max_frames: usize,
    /// Maximum number of values on the value stack
    pub max_stack_slots: usize,
    /// Heap sizing
    pub heap: HeapConfig,
    /// JIT tier tuning
    pub jit: JitConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: 256,
            max_stack_slots: 65_536,
            heap: HeapConfig::default(),
            jit: JitConfig::default(),
        }
    }
}

impl VmConfig {
    /// Parse a config from JSON
    ///
    /// # Examples
    ///
    /// ```
    /// use interpreter::VmConfig;
    ///
    /// let config = VmConfig::from_json(r#"{ "max_frames": 32, "jit": { "enabled": false } }"#).unwrap();
    /// assert_eq!(config.max_frames, 32);
    /// assert!(!config.jit.enabled);
    /// assert_eq!(config.jit.call_threshold, 100);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
