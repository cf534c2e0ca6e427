use super::InvocationHint;
use crate::value::Value;
use std::sync::Arc;

/// Folds each invocation's result into the emission's return value.
///
/// Receives the running return value and the value the last closure
/// produced. Returning `false` stops the emission.
pub type AccumulatorFn = Arc<dyn Fn(&InvocationHint, &mut Value, &Value) -> bool + Send + Sync>;

/// Stores each boolean result and stops at the first `true`
pub fn accumulator_true_handled(
    _hint: &InvocationHint,
    return_accu: &mut Value,
    handler_return: &Value,
) -> bool {
    let handled = handler_return.get_bool().unwrap_or(false);
    *return_accu = Value::Bool(handled);
    !handled
}

/// Keeps the first result and stops
pub fn accumulator_first_wins(
    _hint: &InvocationHint,
    return_accu: &mut Value,
    handler_return: &Value,
) -> bool {
    *return_accu = handler_return.clone();
    false
}
