//! Native function registration
//!
//! Natives are host closures stored in the heap and bound to a global name.
//! A [`NativeRegistry`] collects natives once and installs them into any
//! number of VMs, including VMs running on other threads.

use std::sync::Arc;

use core_types::{ErrorKind, Value, VmError};
use memory_manager::{Arity, NativeFunction, Object};
use parking_lot::RwLock;

use crate::vm::VM;

/// Shareable set of natives to install into VMs
///
/// # Examples
///
/// ```
/// use core_types::Value;
/// use interpreter::{NativeRegistry, VM};
///
/// let registry = NativeRegistry::new();
/// registry.register("two", 0, |_| Ok(Value::Number(2.0)));
///
/// let mut vm = VM::new();
/// vm.install(&registry).unwrap();
/// assert!(vm.get_global("two").is_some());
/// ```
#[derive(Clone, Default)]
pub struct NativeRegistry {
    entries: Arc<RwLock<Vec<NativeFunction>>>,
}

impl NativeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a native; a later registration under the same name wins
    pub fn register<F>(&self, name: impl Into<String>, arity: impl Into<Arity>, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        let native = NativeFunction {
            name: name.into(),
            arity: arity.into(),
            handler: Arc::new(handler),
        };
        let mut entries = self.entries.write();
        entries.retain(|existing| existing.name != native.name);
        entries.push(native);
    }

    /// Number of registered natives
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|n| n.name.clone()).collect()
    }

    fn snapshot(&self) -> Vec<NativeFunction> {
        self.entries.read().clone()
    }
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl VM {
    /// Bind a host function to a global name
    ///
    /// The handler runs without a bytecode frame but counts against the
    /// frame limit while it runs.
    pub fn register_native<F>(
        &mut self,
        name: impl Into<String>,
        arity: impl Into<Arity>,
        handler: F,
    ) -> Result<(), VmError>
    where
        F: Fn(&[Value]) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        self.define_native(NativeFunction {
            name: name.into(),
            arity: arity.into(),
            handler: Arc::new(handler),
        })
        .map_err(VmError::new)
    }

    /// Bind every native in `registry`
    pub fn install(&mut self, registry: &NativeRegistry) -> Result<(), VmError> {
        for native in registry.snapshot() {
            self.define_native(native).map_err(VmError::new)?;
        }
        Ok(())
    }

    fn define_native(&mut self, native: NativeFunction) -> Result<(), ErrorKind> {
        let name = native.name.clone();
        tracing::trace!(name = %name, arity = ?native.arity, "registering native");
        let r = self.heap.allocate(Object::Native(native))?;
        self.globals.insert(name, Value::Object(r));
        Ok(())
    }
}

/// Error for a native that received an argument of the wrong type
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, Value};
/// use interpreter::natives::expect_number;
///
/// assert_eq!(expect_number("sqrt", &Value::Number(4.0)).unwrap(), 4.0);
/// let err = expect_number("sqrt", &Value::Nil).unwrap_err();
/// assert!(matches!(err.kind, ErrorKind::Native { .. }));
/// ```
pub fn expect_number(native: &str, value: &Value) -> Result<f64, VmError> {
    value.as_number().ok_or_else(|| {
        VmError::new(ErrorKind::Native {
            name: native.to_string(),
            message: format!("expected a number, got {}", value.type_name()),
        })
    })
}
