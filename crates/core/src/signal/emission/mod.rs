//! Signal emission
//!
//! An emission runs through fixed stages:
//!
//! 1. the RUN_FIRST class closure
//! 2. emission hooks
//! 3. handlers connected before
//! 4. the RUN_LAST class closure
//! 5. handlers connected after
//! 6. the RUN_CLEANUP class closure, which runs even after a stop
//!
//! Each in-flight emission has a record on one of two stacks (no-recurse
//! signals and the rest) holding its state and invocation hint. Nested
//! emissions and other threads reach a running emission only through that
//! record: to stop it, to restart it, or to chain up from a class closure.
//!
//! The registry lock is held while walking handler lists and dropped around
//! every invocation. Handlers being walked are pinned with a reference so a
//! concurrent disconnect cannot free the list node under the cursor.


use super::registry::{self, ClassHandlerKind, SignalState, StateGuard, release};
use super::{AccumulatorFn, InvocationHint, SignalFlags, SignalId, report};
use crate::closure::Closure;
use crate::error::SignalError;
use crate::quark::Quark;
use crate::types::{InstanceId, Object, Type};
use crate::value::Value;
use parking_lot::MutexGuard;
use std::mem;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EmissionState {
    Stop,
    Run,
    /// Inside an emission hook
    Hook,
    /// A nested no-recurse emission asked for the handlers to be rescanned
    Restart,
}

pub(super) struct Emission {
    seq: u64,
    instance: InstanceId,
    hint: InvocationHint,
    state: EmissionState,
    /// Type whose class closure is running, for chaining up
    chain_type: Option<Type>,
}

#[derive(Default)]
pub(super) struct EmissionStacks {
    next_seq: u64,
    no_recurse: Vec<Emission>,
    recursive: Vec<Emission>,
}

impl EmissionStacks {
    fn push(&mut self, no_recurse: bool, instance: InstanceId, hint: InvocationHint) -> u64 {
        self.next_seq += 1;
        let emission = Emission {
            seq: self.next_seq,
            instance,
            hint,
            state: EmissionState::Stop,
            chain_type: None,
        };
        if no_recurse {
            self.no_recurse.push(emission);
        } else {
            self.recursive.push(emission);
        }
        self.next_seq
    }

    /// Records may be popped out of order when several threads emit
    fn pop(&mut self, seq: u64) {
        for stack in [&mut self.no_recurse, &mut self.recursive] {
            if let Some(index) = stack.iter().rposition(|e| e.seq == seq) {
                stack.remove(index);
                return;
            }
        }
    }

    fn get_mut(&mut self, seq: u64) -> Option<&mut Emission> {
        self.no_recurse
            .iter_mut()
            .chain(self.recursive.iter_mut())
            .find(|e| e.seq == seq)
    }

    fn find_mut(
        &mut self,
        no_recurse: bool,
        signal_id: SignalId,
        detail: Option<Quark>,
        instance: InstanceId,
    ) -> Option<&mut Emission> {
        let stack = if no_recurse {
            &mut self.no_recurse
        } else {
            &mut self.recursive
        };
        stack.iter_mut().rev().find(|e| {
            e.instance == instance && e.hint.signal_id == signal_id && e.hint.detail == detail
        })
    }

    /// The most recently started emission on `instance`
    fn innermost(&self, instance: InstanceId) -> Option<&Emission> {
        self.no_recurse
            .iter()
            .chain(self.recursive.iter())
            .filter(|e| e.instance == instance)
            .max_by_key(|e| e.seq)
    }

    fn no_recurse_running(&self, signal_id: SignalId, instance: InstanceId) -> bool {
        self.no_recurse
            .iter()
            .any(|e| e.instance == instance && e.hint.signal_id == signal_id)
    }

    pub(super) fn signal_in_emission(&self, signal_id: SignalId) -> bool {
        self.no_recurse
            .iter()
            .chain(self.recursive.iter())
            .any(|e| e.hint.signal_id == signal_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetch { restarted: bool },
    RunFirst,
    Hooks,
    Before,
    RunLast,
    After,
    Cleanup,
    Done,
}

/// One accepted emission, from record push to pop
struct Emitter<'a> {
    state: StateGuard,
    seq: u64,
    signal_id: SignalId,
    instance: InstanceId,
    instance_type: Type,
    detail: Option<Quark>,
    flags: SignalFlags,
    return_type: Type,
    accumulator: Option<AccumulatorFn>,
    class_closure: Option<Closure>,
    params: &'a [Value],
    emission_return: Value,
    accu: Value,
    /// Handlers with this id or higher were connected during the emission
    cutoff: u64,
    /// Pinned handler the handler stages start from
    pinned: Option<usize>,
}

impl Emitter<'_> {
    fn run(mut self) -> Value {
        let mut stage = Stage::Fetch { restarted: false };
        while stage != Stage::Done {
            trace!(
                signal_id = %self.signal_id,
                instance = %self.instance,
                ?stage,
                "emission stage"
            );
            stage = match stage {
                Stage::Fetch { restarted } => self.fetch(restarted),
                Stage::RunFirst => self.class_stage(SignalFlags::RUN_FIRST, Stage::Hooks),
                Stage::Hooks => self.hooks(),
                Stage::Before => self.handlers(false),
                Stage::RunLast => {
                    self.set_run_stage(SignalFlags::RUN_LAST);
                    self.class_stage(SignalFlags::RUN_LAST, Stage::After)
                }
                Stage::After => self.handlers(true),
                Stage::Cleanup => self.cleanup(),
                Stage::Done => Stage::Done,
            };
        }
        mem::take(&mut self.emission_return)
    }

    fn record(&mut self) -> &mut Emission {
        let seq = self.seq;
        self.state
            .emissions
            .get_mut(seq)
            .unwrap_or_else(|| panic!("emission record {seq} vanished"))
    }

    fn set_run_stage(&mut self, stage: SignalFlags) {
        let run_type = &mut self.record().hint.run_type;
        run_type.remove(SignalFlags::RUN_STAGES);
        run_type.insert(stage);
    }

    fn unpin(&mut self, slot: usize) {
        if let Some(closure) = self.state.handlers.unref(slot) {
            release(&mut self.state, vec![closure]);
        }
    }

    /// Take a fresh snapshot of the handler list and the cutoff
    fn fetch(&mut self, restarted: bool) -> Stage {
        if let Some(slot) = self.pinned.take() {
            self.unpin(slot);
        }
        self.pinned = self.state.handlers.head(self.instance, self.signal_id);
        if let Some(slot) = self.pinned {
            self.state.handlers.add_ref(slot);
        }
        self.cutoff = self.state.handlers.next_seq;
        if restarted {
            self.set_run_stage(SignalFlags::RUN_FIRST);
            Stage::Before
        } else {
            Stage::RunFirst
        }
    }

    /// Where to go once a stage that ran something is over
    fn next_after(&mut self, next: Stage) -> Stage {
        match self.record().state {
            EmissionState::Stop => Stage::Cleanup,
            EmissionState::Restart => Stage::Fetch { restarted: true },
            EmissionState::Run | EmissionState::Hook => next,
        }
    }

    /// Invoke `closure` with the lock released and fold its result.
    ///
    /// With `scratch`, an unaccumulated result is discarded instead of
    /// landing in the emission's return value.
    fn invoke(&mut self, closure: &Closure, scratch: bool) {
        let mut hint = self.record().hint;
        let has_return = self.return_type != Type::NONE;
        let return_type = self.return_type;
        let params = self.params;
        let accumulator = self.accumulator.clone();
        let accu = &mut self.accu;
        let emission_return = &mut self.emission_return;

        let keep_going = MutexGuard::unlocked(&mut self.state, || match &accumulator {
            None => {
                let mut discarded = Value::default_for(return_type);
                let slot = if scratch { &mut discarded } else { emission_return };
                closure.invoke(has_return.then_some(slot), params, Some(&hint));
                true
            }
            Some(accumulator) => {
                closure.invoke(has_return.then_some(&mut *accu), params, Some(&hint));
                let keep_going = accumulator(&hint, emission_return, accu);
                *accu = Value::default_for(return_type);
                hint.run_type.remove(SignalFlags::ACCUMULATOR_FIRST_RUN);
                keep_going
            }
        });

        let record = self.record();
        if !hint.run_type.contains(SignalFlags::ACCUMULATOR_FIRST_RUN) {
            record.hint.run_type.remove(SignalFlags::ACCUMULATOR_FIRST_RUN);
        }
        if !keep_going && record.state == EmissionState::Run {
            record.state = EmissionState::Stop;
        }
    }

    fn class_stage(&mut self, flag: SignalFlags, next: Stage) -> Stage {
        let Some(closure) = self
            .class_closure
            .clone()
            .filter(|_| self.flags.contains(flag))
        else {
            return next;
        };
        let instance_type = self.instance_type;
        let record = self.record();
        record.state = EmissionState::Run;
        record.chain_type = Some(instance_type);
        self.invoke(&closure, false);
        self.record().chain_type = None;
        self.next_after(next)
    }

    fn hooks(&mut self) -> Stage {
        let snapshot = match self.state.node(self.signal_id) {
            Some(node) if !node.hooks.is_empty() => node.hooks.matching(self.detail),
            _ => return Stage::Before,
        };
        self.record().state = EmissionState::Hook;
        let hint = self.record().hint;
        let params = self.params;
        let expired: Vec<_> = MutexGuard::unlocked(&mut self.state, || {
            snapshot
                .iter()
                .filter(|hook| !(hook.func)(&hint, params))
                .map(|hook| hook.id)
                .collect()
        });
        let removed: Vec<_> = match self.state.node_mut(self.signal_id) {
            Some(node) => expired
                .into_iter()
                .filter_map(|id| node.hooks.remove(id))
                .collect(),
            None => Vec::new(),
        };
        MutexGuard::unlocked(&mut self.state, || drop((snapshot, removed)));

        match self.record().state {
            EmissionState::Restart => Stage::Fetch { restarted: true },
            _ => Stage::Before,
        }
    }

    /// Walk the pinned list running the before (or after) handlers
    fn handlers(&mut self, after: bool) -> Stage {
        let next = if after { Stage::Cleanup } else { Stage::RunLast };
        let Some(start) = self.pinned else {
            return next;
        };
        self.record().state = EmissionState::Run;
        self.state.handlers.add_ref(start);

        let mut cursor = Some(start);
        while let Some(slot) = cursor {
            let handler = self.state.handlers.get(slot);
            if !after && handler.after {
                // The after stage resumes here; our reference moves to the pin
                if let Some(old) = self.pinned.replace(slot) {
                    self.unpin(old);
                }
                break;
            }
            let runnable = handler.after == after
                && handler.seq != 0
                && handler.block_count == 0
                && (handler.detail.is_none() || handler.detail == self.detail)
                && handler.seq < self.cutoff;
            let following = if runnable {
                let closure = handler.closure.clone();
                self.invoke(&closure, false);
                match self.record().state {
                    EmissionState::Run => self.state.handlers.get(slot).next,
                    _ => None,
                }
            } else {
                handler.next
            };
            if let Some(following) = following {
                self.state.handlers.add_ref(following);
            }
            self.unpin(slot);
            cursor = following;
        }
        self.next_after(next)
    }

    fn cleanup(&mut self) -> Stage {
        self.set_run_stage(SignalFlags::RUN_CLEANUP);
        let Some(closure) = self
            .class_closure
            .clone()
            .filter(|_| self.flags.contains(SignalFlags::RUN_CLEANUP))
        else {
            return Stage::Done;
        };
        let instance_type = self.instance_type;
        let record = self.record();
        record.state = EmissionState::Stop;
        record.chain_type = Some(instance_type);
        self.invoke(&closure, true);
        let record = self.record();
        record.chain_type = None;
        match record.state {
            EmissionState::Restart => Stage::Fetch { restarted: true },
            _ => Stage::Done,
        }
    }
}

impl Drop for Emitter<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.pinned.take() {
            self.unpin(slot);
        }
        let seq = self.seq;
        self.state.emissions.pop(seq);
    }
}

/// Validate an emission request against the signal's registration
fn check_params(
    state: &SignalState,
    signal_id: SignalId,
    detail: Option<Quark>,
    instance: &Object,
    params: &[Value],
) -> Result<(), SignalError> {
    let node = state.check_instance(signal_id, instance.type_(), detail)?;
    let expected = node.param_types.len();
    let got = params.len().saturating_sub(1);
    if got != expected {
        return Err(SignalError::ParamCount {
            signal_id,
            expected,
            got,
        });
    }
    for (index, (value, &ty)) in params[1..].iter().zip(&node.param_types).enumerate() {
        if !value.holds(ty) {
            return Err(SignalError::ParamType {
                signal_id,
                index,
                expected: ty,
                got: value.value_type(),
            });
        }
    }
    Ok(())
}

/// Nothing would observe this emission
fn can_skip(state: &SignalState, signal_id: SignalId, instance: &Object) -> bool {
    let Some(node) = state.node(signal_id) else {
        return true;
    };
    let class_empty = match node.class_kind {
        ClassHandlerKind::Absent => true,
        ClassHandlerKind::Vfunc(slot) => instance.type_().class_vfunc_by_quark(slot).is_none(),
        ClassHandlerKind::Present => false,
    };
    class_empty
        && node.hooks.is_empty()
        && !(node.flags.contains(SignalFlags::NO_RECURSE)
            && state.emissions.no_recurse_running(signal_id, instance.id()))
        && state.handlers.head(instance.id(), signal_id).is_none()
}

fn emit_params(
    instance: &Object,
    signal_id: SignalId,
    detail: Option<Quark>,
    params: &[Value],
) -> Option<Value> {
    let mut state = registry::lock();
    if let Err(err) = check_params(&state, signal_id, detail, instance, params) {
        drop(state);
        report(err);
        return None;
    }
    let Some(node) = state.node(signal_id) else {
        return None;
    };
    let flags = node.flags;
    let return_type = node.return_type;
    let accumulator = node.accumulator.clone();
    let class_closure = node
        .find_class_closure(instance.type_())
        .map(|cc| cc.closure.clone());
    let returned = |value: Value| (return_type != Type::NONE).then_some(value);
    let no_recurse = flags.contains(SignalFlags::NO_RECURSE);

    if no_recurse {
        if let Some(running) = state
            .emissions
            .find_mut(true, signal_id, detail, instance.id())
        {
            running.state = EmissionState::Restart;
            trace!(%signal_id, instance = %instance.id(), "restarting no-recurse emission");
            return returned(Value::default_for(return_type));
        }
    }
    if can_skip(&state, signal_id, instance) {
        return returned(Value::default_for(return_type));
    }

    let hint = InvocationHint {
        signal_id,
        detail,
        run_type: SignalFlags::RUN_FIRST | SignalFlags::ACCUMULATOR_FIRST_RUN,
    };
    let seq = state.emissions.push(no_recurse, instance.id(), hint);
    let emitter = Emitter {
        state,
        seq,
        signal_id,
        instance: instance.id(),
        instance_type: instance.type_(),
        detail,
        flags,
        return_type,
        accumulator,
        class_closure,
        params,
        emission_return: Value::default_for(return_type),
        accu: Value::default_for(return_type),
        cutoff: 0,
        pinned: None,
    };
    returned(emitter.run())
}

/// Emit with a full parameter list whose first element is the instance.
///
/// # Returns
/// The emission's return value when the signal returns one and the
/// emission was accepted; `None` otherwise.
pub fn emitv(params: &[Value], signal_id: SignalId, detail: Option<Quark>) -> Option<Value> {
    match params.first().and_then(Value::get_object) {
        Some(instance) => emit_params(instance, signal_id, detail, params),
        None => {
            report(SignalError::MissingInstance(signal_id));
            None
        }
    }
}

/// Emit `signal_id` on `instance` with `args` after the instance.
///
/// # Example
/// ```
/// use relay_core::signal::{self, SignalBuilder, SignalFlags};
/// use relay_core::{Object, Type, Value};
///
/// let counter = Type::register_object("DocCounter", Type::OBJECT).unwrap();
/// let changed = SignalBuilder::new("changed", counter)
///     .flags(SignalFlags::RUN_LAST)
///     .param(Type::INT)
///     .return_type(Type::INT)
///     .build()
///     .unwrap();
///
/// let instance = Object::new(counter).unwrap();
/// signal::connect(&instance, "changed", |params| {
///     Value::Int(params[1].get_int().unwrap_or_default() * 2)
/// });
/// let doubled = signal::emit(&instance, changed, None, &[Value::Int(21)]);
/// assert_eq!(doubled, Some(Value::Int(42)));
/// ```
pub fn emit(
    instance: &Object,
    signal_id: SignalId,
    detail: Option<Quark>,
    args: &[Value],
) -> Option<Value> {
    let mut params = Vec::with_capacity(args.len() + 1);
    params.push(Value::Object(instance.clone()));
    params.extend_from_slice(args);
    emit_params(instance, signal_id, detail, &params)
}

/// [`emit`] addressed by `"name"` or `"name::detail"`
pub fn emit_by_name(instance: &Object, detailed_signal: &str, args: &[Value]) -> Option<Value> {
    let parsed = registry::lock().parse_detailed(detailed_signal, instance.type_(), true);
    match parsed {
        Ok((signal_id, detail)) => emit(instance, signal_id, detail, args),
        Err(err) => {
            report(err);
            None
        }
    }
}

fn stop(
    state: &mut SignalState,
    instance: &Object,
    signal_id: SignalId,
    detail: Option<Quark>,
) -> Result<(), SignalError> {
    let node = state.check_instance(signal_id, instance.type_(), detail)?;
    let no_recurse = node.flags.contains(SignalFlags::NO_RECURSE);
    let emission = state
        .emissions
        .find_mut(no_recurse, signal_id, detail, instance.id())
        .ok_or(SignalError::NoEmission {
            signal_id,
            instance: instance.id(),
        })?;
    match emission.state {
        EmissionState::Hook => Err(SignalError::StopFromHook(signal_id)),
        EmissionState::Run => {
            emission.state = EmissionState::Stop;
            Ok(())
        }
        EmissionState::Stop | EmissionState::Restart => Ok(()),
    }
}

/// Ask the innermost running emission of `signal_id` with `detail` on
/// `instance` to stop after the current invocation. Its RUN_CLEANUP class
/// closure still runs.
pub fn stop_emission(instance: &Object, signal_id: SignalId, detail: Option<Quark>) {
    let result = stop(&mut registry::lock(), instance, signal_id, detail);
    if let Err(err) = result {
        report(err);
    }
}

/// [`stop_emission`] addressed by `"name"` or `"name::detail"`
pub fn stop_emission_by_name(instance: &Object, detailed_signal: &str) {
    let result = {
        let mut state = registry::lock();
        state
            .parse_detailed(detailed_signal, instance.type_(), true)
            .and_then(|(signal_id, detail)| stop(&mut state, instance, signal_id, detail))
    };
    if let Err(err) = result {
        report(err);
    }
}

/// The hint of the innermost emission running on `instance`
pub fn get_invocation_hint(instance: &Object) -> Option<InvocationHint> {
    registry::lock()
        .emissions
        .innermost(instance.id())
        .map(|emission| emission.hint)
}

/// From inside an overriding class closure, invoke the class closure it
/// overrides with the same parameters and hint.
///
/// `params` must start with the instance. Returns the parent closure's
/// result when the signal returns a value.
pub fn chain_from_overridden(params: &[Value]) -> Option<Value> {
    let Some(instance) = params.first().and_then(Value::get_object) else {
        report(SignalError::ChainWithoutInstance);
        return None;
    };
    let instance_id = instance.id();
    let mut state = registry::lock();

    let target = state.emissions.innermost(instance_id).and_then(|emission| {
        let chain_type = emission.chain_type?;
        let node = state.node(emission.hint.signal_id)?;
        let restore_type = node.find_class_closure(chain_type)?.itype;
        let parent = node
            .find_class_closure(restore_type.parent().unwrap_or(Type::INVALID))
            .filter(|cc| cc.itype != restore_type)
            .map(|cc| (cc.closure.clone(), cc.itype));
        Some((emission.seq, emission.hint, node.return_type, restore_type, parent))
    });
    let Some((seq, hint, return_type, restore_type, parent)) = target else {
        drop(state);
        report(SignalError::NoChainTarget(instance_id));
        return None;
    };

    let mut result = Value::default_for(return_type);
    if let Some((closure, chain_type)) = parent {
        if let Some(emission) = state.emissions.get_mut(seq) {
            emission.chain_type = Some(chain_type);
        }
        let has_return = return_type != Type::NONE;
        MutexGuard::unlocked(&mut state, || {
            closure.invoke(has_return.then_some(&mut result), params, Some(&hint));
        });
        if let Some(emission) = state.emissions.get_mut(seq) {
            emission.chain_type = Some(restore_type);
        }
    }
    (return_type != Type::NONE).then_some(result)
}
