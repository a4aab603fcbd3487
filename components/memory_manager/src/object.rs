//! Heap object kinds.
//!
//! Every reference-type payload lives in the heap as one [`Object`]. Objects
//! point at each other only through [`ObjectRef`] handles, which is what lets
//! the collector trace and reclaim cycles (a closure stored in an array it
//! captures, for example).

use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::sync::Arc;

use bytecode_system::Chunk;
use core_types::{ObjectRef, Value, VmError};

/// Host function signature for natives
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, VmError> + Send + Sync>;

/// Number of arguments a native accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many
    Exact(u8),
    /// Any number
    Variadic,
}

impl Arity {
    /// Check if `argc` arguments are acceptable
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => n as usize == argc,
            Arity::Variadic => true,
        }
    }

    /// Declared count for diagnostics (0 for variadic)
    pub fn expected(self) -> usize {
        match self {
            Arity::Exact(n) => n as usize,
            Arity::Variadic => 0,
        }
    }
}

impl From<u8> for Arity {
    fn from(n: u8) -> Self {
        Arity::Exact(n)
    }
}

/// A function instance: a chunk plus its captured cells
#[derive(Debug, Clone)]
pub struct Closure {
    /// Prototype shared with every closure built from it
    pub chunk: Arc<Chunk>,
    /// Handles to `Object::Upvalue` cells, in descriptor order
    pub upvalues: Vec<ObjectRef>,
}

/// A function implemented by the host
#[derive(Clone)]
pub struct NativeFunction {
    /// Name the native was registered under
    pub name: String,
    /// Accepted argument count
    pub arity: Arity,
    /// The host function
    pub handler: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Captured variable.
///
/// While the declaring frame is live the cell is `Open` and aliases an
/// absolute value stack slot; when that frame returns the current slot value
/// is moved into the cell and it becomes `Closed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueCell {
    /// Aliases the value stack slot at this absolute index
    Open(usize),
    /// Owns its value
    Closed(Value),
}

/// A heap object
#[derive(Debug, Clone)]
pub enum Object {
    /// Immutable string
    String(String),
    /// Bytecode function instance
    Closure(Closure),
    /// Host function
    Native(NativeFunction),
    /// Growable array
    Array(Vec<Value>),
    /// String-keyed map with ordered keys
    Map(BTreeMap<String, Value>),
    /// Captured variable cell
    Upvalue(UpvalueCell),
}

impl Object {
    /// Kind name used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::Closure(_) => "function",
            Object::Native(_) => "native",
            Object::Array(_) => "array",
            Object::Map(_) => "map",
            Object::Upvalue(_) => "upvalue",
        }
    }

    /// Push every handle this object references onto `out`
    pub fn trace(&self, out: &mut Vec<ObjectRef>) {
        fn value(v: &Value, out: &mut Vec<ObjectRef>) {
            if let Value::Object(r) = v {
                out.push(*r);
            }
        }
        match self {
            Object::String(_) | Object::Native(_) => {}
            Object::Closure(c) => out.extend_from_slice(&c.upvalues),
            Object::Array(items) => items.iter().for_each(|v| value(v, out)),
            Object::Map(entries) => entries.values().for_each(|v| value(v, out)),
            Object::Upvalue(UpvalueCell::Closed(v)) => value(v, out),
            Object::Upvalue(UpvalueCell::Open(_)) => {}
        }
    }

    /// Approximate number of bytes this object keeps alive
    pub fn size_hint(&self) -> usize {
        let payload = match self {
            Object::String(s) => s.capacity(),
            Object::Closure(c) => c.upvalues.capacity() * mem::size_of::<ObjectRef>(),
            Object::Native(n) => n.name.capacity(),
            Object::Array(items) => items.capacity() * mem::size_of::<Value>(),
            Object::Map(entries) => entries
                .keys()
                .map(|k| k.capacity() + mem::size_of::<String>() + mem::size_of::<Value>())
                .sum(),
            Object::Upvalue(_) => 0,
        };
        mem::size_of::<Object>() + payload
    }

    /// Borrow the string payload, if any
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the array payload, if any
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Object::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the map payload, if any
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Object::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Truthiness of the object: empty strings and collections are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Object::String(s) => !s.is_empty(),
            Object::Array(items) => !items.is_empty(),
            Object::Map(entries) => !entries.is_empty(),
            _ => true,
        }
    }
}
