pub use relay_core::{
    Callback, Closure, ClosureData, ClosureError, InstanceId, Object, Quark, SignalError, Type,
    TypeError, Value,
    bsearch::{Keyed, SortedArray},
    closure::{Invocation, MarshalData, MarshalFn, NotifyFn, marshal},
    diagnostics::{self, DiagnosticsConfig},
    signal::{
        self, AccumulatorFn, ConnectFlags, DestroyNotify, EmissionHookFn, HandlerId, HookId,
        InvocationHint, MatchCriteria, MatchType, SignalBuilder, SignalFlags, SignalId,
        SignalQuery, accumulator_first_wins, accumulator_true_handled, add_emission_hook,
        chain_from_overridden, connect, connect_after, connect_closure, connect_closure_by_id,
        connect_data, emit, emit_by_name, emitv, get_invocation_hint, handler_block,
        handler_disconnect, handler_find, handler_is_connected, handler_unblock,
        handlers_block_matched, handlers_destroy, handlers_disconnect_matched,
        handlers_unblock_matched, has_handler_pending, remove_emission_hook, stop_emission,
        stop_emission_by_name,
    },
};

pub mod prelude {
    pub use super::*;
    pub use relay_core::signal::{lookup, override_class_handler, query};
}
