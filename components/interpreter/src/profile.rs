//! Profiling data collection for JIT compilation decisions
//!
//! Tracks execution counts and type-guard bail-outs per JIT entry point to
//! decide when to compile and when to give up on compiled code.

/// Profiling data for one entry point (function start or loop header)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileData {
    /// Number of times the entry point was reached
    pub execution_count: u64,
    /// Type-guard bail-outs taken by compiled code for this entry
    pub bailouts: u32,
}

impl ProfileData {
    /// Create new empty profile data
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one arrival at the entry point
    pub fn record_execution(&mut self) {
        self.execution_count += 1;
    }

    /// Record one type-guard bail-out
    pub fn record_bailout(&mut self) {
        self.bailouts += 1;
    }

    /// Check if the entry point is hot enough to compile
    pub fn should_compile(&self, threshold: u32) -> bool {
        self.execution_count >= u64::from(threshold)
    }

    /// Check if compiled code bailed out too often to keep
    pub fn should_discard(&self, max_bailouts: u32) -> bool {
        self.bailouts > max_bailouts
    }
}
