//! meow value representation.
//!
//! A [`Value`] is a small `Copy` datum. Primitive values are stored inline,
//! reference types are reached through an [`ObjectRef`] handle owned by the
//! heap. A value never owns heap memory itself.

use std::fmt;

/// Handle to an object stored in the heap arena.
///
/// The `index` names an arena slot and the `generation` names one occupant of
/// that slot. When the collector reclaims a slot it bumps the generation, so a
/// stale handle can be detected instead of silently aliasing the next object
/// placed there.
///
/// # Examples
///
/// ```
/// use core_types::ObjectRef;
///
/// let a = ObjectRef::new(3, 0);
/// let b = ObjectRef::new(3, 1);
/// assert_ne!(a, b);
/// assert_eq!(a.index(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

impl ObjectRef {
    /// Create a handle from a slot index and generation
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot index
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot occupant this handle was issued for
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Represents any meow value.
///
/// Numbers are IEEE-754 doubles. Equality between two `Number`s follows
/// IEEE-754, so `NaN` is never equal to itself. Equality between two `Object`
/// values is handle identity; content comparison of strings requires the heap
/// and lives in the interpreter.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let nil = Value::Nil;
/// let number = Value::Number(42.0);
///
/// assert!(!nil.is_truthy());
/// assert!(number.is_truthy());
/// assert_ne!(Value::Number(f64::NAN), Value::Number(f64::NAN));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Nil,
    /// Boolean true or false
    Bool(bool),
    /// 64-bit floating point number
    Number(f64),
    /// Reference to a heap object
    Object(ObjectRef),
}

impl Value {
    /// Truthiness of values that can be decided without the heap.
    ///
    /// `Nil`, `false`, `0` and `NaN` are falsy. Object references report
    /// `true` here; the interpreter refines this for empty strings and
    /// collections.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Object(_) => true,
        }
    }

    /// Short type name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Object(_) => "object",
        }
    }

    /// Returns the number payload, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the object handle, if any
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(r) => Some(*r),
            _ => None,
        }
    }

    /// Check if this value is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Value::Object(r)
    }
}

/// Format a number the way meow prints it.
///
/// Integral values within the exactly representable range print without a
/// fractional part; everything else uses the shortest round-trip form.
///
/// # Examples
///
/// ```
/// use core_types::format_number;
///
/// assert_eq!(format_number(3.0), "3");
/// assert_eq!(format_number(0.5), "0.5");
/// assert_eq!(format_number(f64::NAN), "nan");
/// ```
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return format!("{}", n as i64);
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format_finite(n).to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Object(r) => write!(f, "<object {}>", r),
        }
    }
}
