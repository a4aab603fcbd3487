//! Debug line information
//!
//! Source positions are stored as runs: one [`LineInfo`] marks the first
//! instruction of a run and covers every following instruction until the next
//! run begins. Runs are sorted by offset so lookup is a binary search.

/// Source position covering a run of instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInfo {
    /// First instruction offset of the run
    pub offset: u32,
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
    /// Index into the chunk's source file table
    pub file: u16,
}

impl LineInfo {
    /// Create a new line info entry
    pub fn new(offset: u32, line: u32, column: u32, file: u16) -> Self {
        Self {
            offset,
            line,
            column,
            file,
        }
    }

    /// Check if two entries describe the same source position
    pub fn same_position(&self, other: &LineInfo) -> bool {
        self.line == other.line && self.column == other.column && self.file == other.file
    }
}

/// Find the run covering `offset` in a sorted run table
pub fn lookup(lines: &[LineInfo], offset: usize) -> Option<&LineInfo> {
    let idx = lines.partition_point(|info| info.offset as usize <= offset);
    if idx == 0 {
        None
    } else {
        lines.get(idx - 1)
    }
}
