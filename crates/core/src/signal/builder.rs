use super::registry::{self, SignalSpec};
use super::{AccumulatorFn, InvocationHint, SignalFlags, SignalId};
use crate::closure::{Callback, Closure, MarshalFn};
use crate::error::SignalError;
use crate::types::Type;
use crate::value::Value;
use std::sync::Arc;
use tracing::warn;

/// Describes a signal and registers it.
///
/// # Example
/// ```
/// use relay_core::signal::{SignalBuilder, SignalFlags, accumulator_true_handled};
/// use relay_core::Type;
///
/// let widget = Type::register_object("DocWidget", Type::OBJECT).unwrap();
/// let signal_id = SignalBuilder::new("key-pressed", widget)
///     .flags(SignalFlags::RUN_LAST)
///     .param(Type::UINT)
///     .return_type(Type::BOOL)
///     .accumulator(accumulator_true_handled)
///     .build();
/// assert!(signal_id.is_some());
/// ```
pub struct SignalBuilder {
    name: String,
    itype: Type,
    flags: SignalFlags,
    param_types: Vec<Type>,
    return_type: Type,
    class_closure: Option<Closure>,
    accumulator: Option<AccumulatorFn>,
    marshaller: Option<MarshalFn>,
}

impl SignalBuilder {
    /// Start describing signal `name` owned by `itype`.
    ///
    /// Names start with an ASCII letter followed by letters, digits, `-`
    /// or `_`. Underscores are stored as dashes.
    pub fn new(name: &str, itype: Type) -> Self {
        Self {
            name: name.to_owned(),
            itype,
            flags: SignalFlags::empty(),
            param_types: Vec::new(),
            return_type: Type::NONE,
            class_closure: None,
            accumulator: None,
            marshaller: None,
        }
    }

    /// Run stages and behavior flags
    pub fn flags(mut self, flags: SignalFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Parameter types, not counting the instance
    pub fn param_types(mut self, param_types: impl IntoIterator<Item = Type>) -> Self {
        self.param_types = param_types.into_iter().collect();
        self
    }

    /// Append one parameter type
    pub fn param(mut self, param_type: Type) -> Self {
        self.param_types.push(param_type);
        self
    }

    /// Emission return type, [`Type::NONE`] by default
    pub fn return_type(mut self, return_type: Type) -> Self {
        self.return_type = return_type;
        self
    }

    /// Default class closure, run in the stages the flags select
    pub fn class_closure(mut self, closure: Closure) -> Self {
        self.class_closure = Some(closure);
        self
    }

    /// [`SignalBuilder::class_closure`] from a plain callback
    pub fn class_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let handler: Callback = Arc::new(handler);
        self.class_closure(Closure::from_callback(handler))
    }

    /// Default class closure dispatching through the class slot `slot`.
    ///
    /// Emissions on instances whose class leaves the slot empty, and that
    /// nothing else observes, are skipped outright.
    pub fn class_vfunc(self, slot: &str) -> Self {
        let itype = self.itype;
        self.class_closure(Closure::class_vfunc(itype, slot))
    }

    /// Fold handler return values into the emission result.
    ///
    /// Returning `false` stops the emission.
    pub fn accumulator<F>(mut self, accumulator: F) -> Self
    where
        F: Fn(&InvocationHint, &mut Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.accumulator = Some(Arc::new(accumulator));
        self
    }

    /// Marshaller given to connected closures that have none;
    /// [`marshal::generic`](crate::closure::marshal::generic) by default
    pub fn marshaller(mut self, marshaller: MarshalFn) -> Self {
        self.marshaller = Some(marshaller);
        self
    }

    /// Register the signal
    pub fn try_build(self) -> Result<SignalId, SignalError> {
        let class_closure = self.class_closure;
        let result = registry::register(SignalSpec {
            name: self.name,
            itype: self.itype,
            flags: self.flags,
            class_closure: class_closure.clone(),
            accumulator: self.accumulator,
            c_marshaller: self.marshaller,
            return_type: self.return_type,
            param_types: self.param_types,
        });
        if result.is_err() {
            if let Some(closure) = class_closure {
                // Release the floating reference nobody claimed
                closure.sink();
            }
        }
        result
    }

    /// Register the signal, logging a refusal
    pub fn build(self) -> Option<SignalId> {
        self.try_build()
            .map_err(|err| warn!(%err, "signal registration refused"))
            .ok()
    }
}
