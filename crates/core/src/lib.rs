pub mod bsearch;
pub mod closure;
pub mod diagnostics;
pub mod error;
pub mod quark;
pub mod signal;
pub mod types;
pub mod value;

#[cfg(test)]
mod test_utils;

// Re-export commonly used items
pub use closure::{Callback, Closure, ClosureData};
pub use error::{ClosureError, SignalError, TypeError};
pub use quark::Quark;
pub use signal::{
    ConnectFlags, HandlerId, HookId, InvocationHint, MatchCriteria, MatchType, SignalBuilder,
    SignalFlags, SignalId, SignalQuery,
};
pub use types::{InstanceId, Object, Type};
pub use value::Value;
