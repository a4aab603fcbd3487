//! Constant pool entries
//!
//! Constants are descriptors, not heap values: a string constant is turned
//! into a heap string when loaded, and a function constant is the prototype a
//! `Closure` instruction instantiates. This keeps chunks free of heap handles
//! so they can be shared across VM instances.

use std::sync::Arc;

use crate::chunk::Chunk;

/// Entry in a chunk's constant pool
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// nil
    Nil,
    /// Boolean literal
    Bool(bool),
    /// Number literal
    Number(f64),
    /// String literal
    Str(String),
    /// Nested function prototype
    Function(Arc<Chunk>),
}

impl Constant {
    /// Check if constant is a number
    pub fn is_number(&self) -> bool {
        matches!(self, Constant::Number(_))
    }

    /// Try to get the number value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Constant::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to get the string literal
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get the function prototype
    pub fn as_function(&self) -> Option<&Arc<Chunk>> {
        match self {
            Constant::Function(chunk) => Some(chunk),
            _ => None,
        }
    }

    /// Kind name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Nil => "nil",
            Constant::Bool(_) => "bool",
            Constant::Number(_) => "number",
            Constant::Str(_) => "string",
            Constant::Function(_) => "function",
        }
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Number(n)
    }
}

impl From<&str> for Constant {
    fn from(s: &str) -> Self {
        Constant::Str(s.to_string())
    }
}

impl From<Chunk> for Constant {
    fn from(chunk: Chunk) -> Self {
        Constant::Function(Arc::new(chunk))
    }
}
