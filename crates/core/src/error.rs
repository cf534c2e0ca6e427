use crate::signal::{HandlerId, HookId, SignalId};
use crate::types::{InstanceId, Type};
use thiserror::Error;

/// Misuse of the type system
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("'{0}' is not a valid type name")]
    InvalidName(String),
    #[error("a type named '{0}' is already registered")]
    NameTaken(String),
    #[error("type '{0}' is not instantiatable")]
    NotInstantiatable(String),
    #[error("type '{0}' is not an interface")]
    NotAnInterface(String),
}

/// Misuse of the closure API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClosureError {
    #[error("attempt to override the marshal of closure {0:#x}")]
    MarshalOverride(usize),
    #[error("closure {0:#x} already has a meta marshal")]
    MetaMarshalSet(usize),
    #[error("closure {0:#x} is invalid")]
    Invalid(usize),
    #[error("closure {0:#x} is being marshalled")]
    InMarshal(usize),
    #[error("closure {0:#x} has no marshal")]
    NoMarshal(usize),
    #[error("no such {kind} notifier on closure {closure:#x}")]
    NotifierNotFound {
        kind: &'static str,
        closure: usize,
    },
    #[error("closure {0:#x} has no references left")]
    Dead(usize),
}

/// Misuse of the signal registry, handler registry or emission engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("'{0}' is not a valid signal name")]
    InvalidName(String),
    #[error("cannot create signal '{name}' on non-instantiatable type '{owner}'")]
    InvalidOwner { name: String, owner: Type },
    #[error("signal '{name}' already exists in the ancestry of '{owner}'")]
    AlreadyExists { name: String, owner: Type },
    #[error("signal '{name}' uses flags reserved for invocation hints")]
    ReservedFlags { name: String },
    #[error("signal '{name}' has an accumulator but returns nothing")]
    AccumulatorWithoutReturn { name: String },
    #[error("signal '{name}' returns a value but only runs its class closure first")]
    ReturnWithRunFirstOnly { name: String },
    #[error("parameter {index} of signal '{name}' has non-value type '{ty}'")]
    ParamNotValueType { name: String, index: usize, ty: Type },
    #[error("signal '{name}' has non-value return type '{ty}'")]
    ReturnNotValueType { name: String, ty: Type },
    #[error("no signal '{name}' on type '{itype}'")]
    UnknownSignal { name: String, itype: Type },
    #[error("no signal with id {0}")]
    InvalidId(SignalId),
    #[error("instance of type '{itype}' has no signal id {signal_id}")]
    NotOwnedBy { signal_id: SignalId, itype: Type },
    #[error("signal id {0} does not support details")]
    DetailNotSupported(SignalId),
    #[error("signal id {signal_id} expects {expected} parameters, got {got}")]
    ParamCount {
        signal_id: SignalId,
        expected: usize,
        got: usize,
    },
    #[error("parameter {index} of signal id {signal_id} expects '{expected}', got '{got}'")]
    ParamType {
        signal_id: SignalId,
        index: usize,
        expected: Type,
        got: Type,
    },
    #[error("first parameter of signal id {0} is not an instance")]
    MissingInstance(SignalId),
    #[error("type '{itype}' already has a class closure for signal id {signal_id}")]
    ClassClosureExists { signal_id: SignalId, itype: Type },
    #[error("type '{itype}' is not derived from the owner of signal id {signal_id}")]
    NotDerived { signal_id: SignalId, itype: Type },
    #[error("instance {instance} has no handler with id {handler_id}")]
    HandlerNotFound {
        instance: InstanceId,
        handler_id: HandlerId,
    },
    #[error("handler {0} is not blocked")]
    HandlerNotBlocked(HandlerId),
    #[error("bulk handler operation needs one of ID, CLOSURE, FUNC or DATA")]
    NoMatchCriteria,
    #[error("no emission of signal id {signal_id} in progress on instance {instance}")]
    NoEmission {
        signal_id: SignalId,
        instance: InstanceId,
    },
    #[error("emission of signal id {0} cannot be stopped from an emission hook")]
    StopFromHook(SignalId),
    #[error("no class closure to chain up to on instance {0}")]
    NoChainTarget(InstanceId),
    #[error("chain-up parameters do not start with an instance")]
    ChainWithoutInstance,
    #[error("signal id {0} does not support emission hooks")]
    HooksDisabled(SignalId),
    #[error("signal id {signal_id} has no emission hook {hook_id}")]
    HookNotFound { signal_id: SignalId, hook_id: HookId },
    #[error("signal id {0} is being emitted")]
    InEmission(SignalId),
    #[error(transparent)]
    Type(#[from] TypeError),
}
