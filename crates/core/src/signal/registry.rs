//! Process-wide signal table

use super::emission::EmissionStacks;
use super::handler::HandlerTable;
use super::hooks::{EmissionHook, HookList};
use super::{
    AccumulatorFn, SignalFlags, SignalId, SignalQuery, canonical_name, is_valid_name, report,
};
use crate::bsearch::{Keyed, SortedArray};
use crate::closure::{Callback, Closure, MarshalFn, marshal};
use crate::error::SignalError;
use crate::quark::Quark;
use crate::types::{InstanceId, Type};
use lazy_static::lazy_static;
use parking_lot::{Mutex, MutexGuard};
use std::iter;
use std::sync::Arc;
use tracing::{debug, error};

lazy_static! {
    static ref SIGNALS: Mutex<SignalState> = Mutex::new(SignalState::new());
    static ref DROPPED: Mutex<Vec<InstanceId>> = Mutex::new(Vec::new());
}

pub(super) type StateGuard = MutexGuard<'static, SignalState>;

/// Take the registry lock, first destroying the handlers of instances
/// dropped since the last call
pub(super) fn lock() -> StateGuard {
    let mut guard = SIGNALS.lock();
    let dropped = std::mem::take(&mut *DROPPED.lock());
    if !dropped.is_empty() {
        let closures: Vec<Closure> = dropped
            .into_iter()
            .flat_map(|instance| guard.handlers.destroy_instance(instance))
            .collect();
        release(&mut guard, closures);
    }
    guard
}

/// Queue the handlers of a dropped instance for destruction.
///
/// The last handle may go away while the registry lock is held, so the
/// work happens on the next [`lock`].
pub(crate) fn instance_dropped(instance: InstanceId) {
    DROPPED.lock().push(instance);
}

/// Unref `closures` with the registry lock released
pub(super) fn release(guard: &mut StateGuard, closures: Vec<Closure>) {
    if !closures.is_empty() {
        MutexGuard::unlocked(guard, || closures.iter().for_each(Closure::unref));
    }
}

/// Whether emission can be skipped based on the class closure alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ClassHandlerKind {
    /// No class closure at all
    Absent,
    /// Only the default class-slot closure; skippable when the instance's
    /// class leaves the slot empty
    Vfunc(Quark),
    /// A class closure that always runs
    Present,
}

pub(super) struct ClassClosure {
    /// `Type::INVALID` for the default closure
    pub(super) itype: Type,
    pub(super) closure: Closure,
}

impl Keyed for ClassClosure {
    type Key = Type;

    fn key(&self) -> Type {
        self.itype
    }
}

struct SignalKey {
    itype: Type,
    quark: Quark,
    signal_id: SignalId,
}

impl Keyed for SignalKey {
    type Key = (Type, Quark);

    fn key(&self) -> (Type, Quark) {
        (self.itype, self.quark)
    }
}

pub(super) struct SignalNode {
    pub(super) signal_id: SignalId,
    pub(super) itype: Type,
    pub(super) name: Quark,
    pub(super) destroyed: bool,
    pub(super) flags: SignalFlags,
    pub(super) param_types: Vec<Type>,
    pub(super) return_type: Type,
    pub(super) class_closures: SortedArray<ClassClosure>,
    pub(super) class_kind: ClassHandlerKind,
    pub(super) accumulator: Option<AccumulatorFn>,
    pub(super) c_marshaller: MarshalFn,
    pub(super) hooks: HookList,
}

impl SignalNode {
    /// The class closure effective for instances of `itype`
    pub(super) fn find_class_closure(&self, itype: Type) -> Option<&ClassClosure> {
        if self.class_closures.len() == 1 {
            if let Some(only) = self.class_closures.nth(0).filter(|cc| cc.itype == Type::INVALID) {
                return Some(only);
            }
        }
        itype
            .ancestors()
            .into_iter()
            .chain(iter::once(Type::INVALID))
            .find_map(|t| self.class_closures.lookup(&t))
    }

    fn add_class_closure(&mut self, itype: Type, closure: &Closure) {
        closure.add_ref();
        closure.sink();
        if closure.needs_marshal() {
            closure.set_marshal(self.c_marshaller.clone());
        }
        self.class_closures.insert(ClassClosure {
            itype,
            closure: closure.clone(),
        });
    }

    fn query(&self) -> SignalQuery {
        SignalQuery {
            signal_id: self.signal_id,
            signal_name: self.name.as_str(),
            itype: self.itype,
            flags: self.flags,
            return_type: self.return_type,
            param_types: self.param_types.clone(),
        }
    }
}

/// Everything a new signal is registered with
pub(super) struct SignalSpec {
    pub(super) name: String,
    pub(super) itype: Type,
    pub(super) flags: SignalFlags,
    pub(super) class_closure: Option<Closure>,
    pub(super) accumulator: Option<AccumulatorFn>,
    pub(super) c_marshaller: Option<MarshalFn>,
    pub(super) return_type: Type,
    pub(super) param_types: Vec<Type>,
}

/// Resources of a destroyed signal, released once the lock is dropped
#[derive(Default)]
pub(super) struct Teardown {
    closures: Vec<Closure>,
    hooks: Vec<Arc<EmissionHook>>,
}

impl Teardown {
    pub(super) fn release(self) {
        self.closures.iter().for_each(Closure::unref);
        drop(self.hooks);
    }
}

pub(super) struct SignalState {
    nodes: Vec<SignalNode>,
    keys: SortedArray<SignalKey>,
    pub(super) handlers: HandlerTable,
    pub(super) emissions: EmissionStacks,
    pub(super) next_hook_id: u64,
}

impl SignalState {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            keys: SortedArray::new(),
            handlers: HandlerTable::new(),
            emissions: EmissionStacks::default(),
            next_hook_id: 1,
        }
    }

    /// A live (not destroyed) signal
    pub(super) fn node(&self, signal_id: SignalId) -> Option<&SignalNode> {
        self.nodes
            .get(signal_id.index())
            .filter(|node| !node.destroyed)
    }

    pub(super) fn node_mut(&mut self, signal_id: SignalId) -> Option<&mut SignalNode> {
        self.nodes
            .get_mut(signal_id.index())
            .filter(|node| !node.destroyed)
    }

    pub(super) fn live_node(&self, signal_id: SignalId) -> Result<&SignalNode, SignalError> {
        self.node(signal_id)
            .ok_or(SignalError::InvalidId(signal_id))
    }

    fn lookup_quark(&self, quark: Quark, itype: Type) -> Option<SignalId> {
        let find = |t: Type| self.keys.lookup(&(t, quark)).map(|key| key.signal_id);
        itype
            .ancestors()
            .into_iter()
            .find_map(find)
            .or_else(|| itype.interfaces().into_iter().rev().find_map(find))
    }

    pub(super) fn lookup_id(&self, name: &str, itype: Type) -> Option<SignalId> {
        if let Some(id) = Quark::lookup(name).and_then(|q| self.lookup_quark(q, itype)) {
            return Some(id);
        }
        let canonical = canonical_name(name);
        if canonical == name {
            return None;
        }
        Quark::lookup(&canonical).and_then(|q| self.lookup_quark(q, itype))
    }

    /// Split `name::detail` and resolve both parts for `itype`
    pub(super) fn parse_detailed(
        &self,
        detailed: &str,
        itype: Type,
        force_detail_quark: bool,
    ) -> Result<(SignalId, Option<Quark>), SignalError> {
        let unknown = || SignalError::UnknownSignal {
            name: detailed.to_owned(),
            itype,
        };
        let (name, detail) = match detailed.split_once("::") {
            Some((_, "")) => return Err(unknown()),
            Some((name, detail)) => (name, Some(detail)),
            None if detailed.contains(':') => return Err(unknown()),
            None => (detailed, None),
        };
        let signal_id = self.lookup_id(name, itype).ok_or_else(unknown)?;
        let detail = match detail {
            None => None,
            Some(detail) if force_detail_quark => Some(Quark::intern(detail)),
            Some(detail) => Some(Quark::lookup(detail).ok_or_else(unknown)?),
        };
        let node = self.live_node(signal_id)?;
        if detail.is_some() && !node.flags.contains(SignalFlags::DETAILED) {
            return Err(SignalError::DetailNotSupported(signal_id));
        }
        Ok((signal_id, detail))
    }

    /// The signal, if instances of `itype` may use it with `detail`
    pub(super) fn check_instance(
        &self,
        signal_id: SignalId,
        itype: Type,
        detail: Option<Quark>,
    ) -> Result<&SignalNode, SignalError> {
        let node = self.live_node(signal_id)?;
        if detail.is_some() && !node.flags.contains(SignalFlags::DETAILED) {
            return Err(SignalError::DetailNotSupported(signal_id));
        }
        if !itype.is_a(node.itype) {
            return Err(SignalError::NotOwnedBy { signal_id, itype });
        }
        Ok(node)
    }

    fn register(&mut self, spec: SignalSpec, name: String) -> Result<SignalId, SignalError> {
        let quark = Quark::intern(&name);
        if let Some(existing) = self.lookup_quark(quark, spec.itype) {
            let owner = self.nodes[existing.index()].itype;
            return Err(SignalError::AlreadyExists { name, owner });
        }

        let signal_id = SignalId::from_index(self.nodes.len());
        let class_kind = match &spec.class_closure {
            None => ClassHandlerKind::Absent,
            Some(closure) => closure
                .class_slot()
                .map_or(ClassHandlerKind::Present, ClassHandlerKind::Vfunc),
        };
        let mut node = SignalNode {
            signal_id,
            itype: spec.itype,
            name: quark,
            destroyed: false,
            flags: spec.flags,
            param_types: spec.param_types,
            return_type: spec.return_type,
            class_closures: SortedArray::new(),
            class_kind,
            accumulator: spec.accumulator,
            c_marshaller: spec.c_marshaller.unwrap_or_else(marshal::generic),
            hooks: HookList::default(),
        };
        if let Some(closure) = &spec.class_closure {
            node.add_class_closure(Type::INVALID, closure);
        }
        self.nodes.push(node);

        self.keys.replace(SignalKey {
            itype: spec.itype,
            quark,
            signal_id,
        });
        if spec.name != name {
            self.keys.replace(SignalKey {
                itype: spec.itype,
                quark: Quark::intern(&spec.name),
                signal_id,
            });
        }
        Ok(signal_id)
    }

    fn override_class_closure(
        &mut self,
        signal_id: SignalId,
        itype: Type,
        closure: &Closure,
    ) -> Result<(), SignalError> {
        let node = self
            .node_mut(signal_id)
            .ok_or(SignalError::InvalidId(signal_id))?;
        if !itype.is_a(node.itype) {
            return Err(SignalError::NotDerived { signal_id, itype });
        }
        if node
            .find_class_closure(itype)
            .is_some_and(|cc| cc.itype == itype)
        {
            return Err(SignalError::ClassClosureExists { signal_id, itype });
        }
        node.add_class_closure(itype, closure);
        node.class_kind = ClassHandlerKind::Present;
        Ok(())
    }

    fn destroy_node(&mut self, signal_id: SignalId) -> Result<Teardown, SignalError> {
        self.live_node(signal_id)?;
        if self.emissions.signal_in_emission(signal_id) {
            return Err(SignalError::InEmission(signal_id));
        }
        let node = &mut self.nodes[signal_id.index()];
        node.destroyed = true;
        node.param_types.clear();
        node.return_type = Type::NONE;
        node.accumulator = None;
        node.class_kind = ClassHandlerKind::Absent;
        let teardown = Teardown {
            closures: node.class_closures.drain().map(|cc| cc.closure).collect(),
            hooks: node.hooks.take(),
        };
        let name = node.name;
        let keys: Vec<(Type, Quark)> = self
            .keys
            .iter()
            .filter(|key| key.signal_id == signal_id)
            .map(Keyed::key)
            .collect();
        for key in keys {
            self.keys.remove(&key);
        }
        debug!(%signal_id, name = name.as_str(), "destroyed signal");
        Ok(teardown)
    }
}

pub(super) fn register(spec: SignalSpec) -> Result<SignalId, SignalError> {
    if !is_valid_name(&spec.name) {
        return Err(SignalError::InvalidName(spec.name));
    }
    let name = canonical_name(&spec.name);
    if !(spec.itype.is_instantiatable() || spec.itype.is_interface()) {
        return Err(SignalError::InvalidOwner {
            name,
            owner: spec.itype,
        });
    }
    if spec.return_type == Type::NONE && spec.accumulator.is_some() {
        return Err(SignalError::AccumulatorWithoutReturn { name });
    }
    if !SignalFlags::REGISTRABLE.contains(spec.flags) {
        return Err(SignalError::ReservedFlags { name });
    }
    if let Some((index, &ty)) = spec
        .param_types
        .iter()
        .enumerate()
        .find(|(_, ty)| !ty.is_value_type())
    {
        return Err(SignalError::ParamNotValueType { name, index, ty });
    }
    if spec.return_type != Type::NONE && !spec.return_type.is_value_type() {
        return Err(SignalError::ReturnNotValueType {
            name,
            ty: spec.return_type,
        });
    }
    if spec.return_type != Type::NONE
        && spec.flags.intersection(SignalFlags::RUN_STAGES) == SignalFlags::RUN_FIRST
    {
        return Err(SignalError::ReturnWithRunFirstOnly { name });
    }

    let itype = spec.itype;
    let signal_id = lock().register(spec, name.clone())?;
    debug!(%signal_id, name, owner = %itype, "registered signal");
    Ok(signal_id)
}

/// Find the id of signal `name` on `itype`, its ancestors or its interfaces
pub fn lookup(name: &str, itype: Type) -> Option<SignalId> {
    if !(itype.is_instantiatable() || itype.is_interface()) {
        report(SignalError::InvalidOwner {
            name: name.to_owned(),
            owner: itype,
        });
        return None;
    }
    lock().lookup_id(name, itype)
}

/// The canonical name of a live signal
pub fn name(signal_id: SignalId) -> Option<&'static str> {
    lock().node(signal_id).map(|node| node.name.as_str())
}

/// Registration details of `signal_id`, `None` for unknown or destroyed ids
pub fn query(signal_id: SignalId) -> Option<SignalQuery> {
    lock().node(signal_id).map(SignalNode::query)
}

/// Ids of the live signals registered directly on `itype`, ascending
pub fn list_ids(itype: Type) -> Vec<SignalId> {
    let state = lock();
    let mut ids: Vec<SignalId> = state
        .keys
        .iter()
        .filter(|key| key.itype == itype)
        .map(|key| key.signal_id)
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Resolve `"name"` or `"name::detail"` for instances of `itype`.
///
/// # Arguments
/// * `force_detail_quark` - intern an unseen detail instead of failing
///
/// # Returns
/// The signal id and the detail, or `None` if the name is unknown, the
/// detail is unknown and not forced, or the signal takes no details.
pub fn parse_name(
    detailed_signal: &str,
    itype: Type,
    force_detail_quark: bool,
) -> Option<(SignalId, Option<Quark>)> {
    lock()
        .parse_detailed(detailed_signal, itype, force_detail_quark)
        .ok()
}

/// Install `closure` as the class closure of `signal_id` for `itype` and
/// its subtypes
pub fn override_class_closure(signal_id: SignalId, itype: Type, closure: &Closure) -> bool {
    match lock().override_class_closure(signal_id, itype, closure) {
        Ok(()) => true,
        Err(err) => {
            report(err);
            false
        }
    }
}

/// [`override_class_closure`] with a plain callback, by signal name
pub fn override_class_handler(signal_name: &str, itype: Type, handler: Callback) -> bool {
    let mut state = lock();
    let Some(signal_id) = state.lookup_id(signal_name, itype) else {
        report(SignalError::UnknownSignal {
            name: signal_name.to_owned(),
            itype,
        });
        return false;
    };
    match state.override_class_closure(signal_id, itype, &Closure::from_callback(handler)) {
        Ok(()) => true,
        Err(err) => {
            report(err);
            false
        }
    }
}

fn report_destroy(err: SignalError) {
    match err {
        SignalError::InEmission(_) => error!(%err, "refusing to destroy a signal in emission"),
        err => report(err),
    }
}

/// Destroy a signal. Its id stays reserved; class closures and emission
/// hooks are released. Refused while the signal is being emitted.
pub fn destroy(signal_id: SignalId) -> bool {
    let result = lock().destroy_node(signal_id);
    match result {
        Ok(teardown) => {
            teardown.release();
            true
        }
        Err(err) => {
            report_destroy(err);
            false
        }
    }
}

/// Destroy every signal owned by `itype`, returning how many went away
pub fn destroy_for_type(itype: Type) -> usize {
    let mut teardowns = Vec::new();
    {
        let mut state = lock();
        let owned: Vec<SignalId> = state
            .nodes
            .iter()
            .filter(|node| node.itype == itype && !node.destroyed)
            .map(|node| node.signal_id)
            .collect();
        for signal_id in owned {
            match state.destroy_node(signal_id) {
                Ok(teardown) => teardowns.push(teardown),
                Err(err) => report_destroy(err),
            }
        }
    }
    let destroyed = teardowns.len();
    teardowns.into_iter().for_each(Teardown::release);
    destroyed
}
