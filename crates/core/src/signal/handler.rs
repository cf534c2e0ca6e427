//! Per-instance handler lists
//!
//! Handlers live in an arena; each `(instance, signal)` pair owns a doubly
//! linked list threaded through it by slot index, with all before-handlers
//! ahead of all after-handlers. Disconnecting a handler only zeroes its id;
//! the slot is unlinked and recycled once the last in-flight emission lets
//! go of it.

use super::registry::{self, SignalState, StateGuard, release};
use super::{
    ConnectFlags, HandlerId, MatchCriteria, MatchType, SignalFlags, SignalId, report,
};
use crate::bsearch::{Keyed, SortedArray};
use crate::closure::{Callback, Closure, ClosureData, MarshalFn, NotifyFn};
use crate::error::SignalError;
use crate::quark::Quark;
use crate::types::{InstanceId, Object};
use crate::value::Value;
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const MAX_BLOCK_COUNT: u32 = (1 << 16) - 1;

pub(super) struct Handler {
    /// The handler id; 0 once disconnected
    pub(super) seq: u64,
    prev: Option<usize>,
    pub(super) next: Option<usize>,
    pub(super) detail: Option<Quark>,
    signal_id: SignalId,
    instance: InstanceId,
    ref_count: u32,
    pub(super) block_count: u32,
    pub(super) after: bool,
    linked: bool,
    invalid_notify: Option<NotifyFn>,
    pub(super) closure: Closure,
}

impl Handler {
    fn id(&self) -> HandlerId {
        HandlerId(self.seq)
    }

    fn is_connected(&self) -> bool {
        self.seq != 0
    }

    fn matches(&self, criteria: &MatchCriteria, c_marshaller: Option<&MarshalFn>) -> bool {
        let mask = criteria.mask;
        let wants = |bit: MatchType| mask.contains(bit);
        (!wants(MatchType::DETAIL) || self.detail == criteria.detail)
            && (!wants(MatchType::CLOSURE)
                || criteria
                    .closure
                    .as_ref()
                    .is_some_and(|closure| closure.ptr_eq(&self.closure)))
            && (!wants(MatchType::DATA) || same_data(self.closure.data(), criteria.data.as_ref()))
            && (!wants(MatchType::UNBLOCKED) || self.block_count == 0)
            && (!wants(MatchType::FUNC) || self.wraps(criteria.func.as_ref(), c_marshaller))
    }

    /// Whether the closure is a plain wrapper around `func` marshalled by
    /// the signal's default marshaller
    fn wraps(&self, func: Option<&Callback>, c_marshaller: Option<&MarshalFn>) -> bool {
        let (Some(func), Some(c_marshaller)) = (func, c_marshaller) else {
            return false;
        };
        !self.closure.has_meta_marshal()
            && self
                .closure
                .marshal()
                .is_some_and(|marshal| Arc::ptr_eq(&marshal, c_marshaller))
            && self
                .closure
                .callback()
                .is_some_and(|callback| Arc::ptr_eq(&callback, func))
    }
}

fn same_data(a: Option<ClosureData>, b: Option<&ClosureData>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(&a, b),
        _ => false,
    }
}

struct HandlerList {
    signal_id: SignalId,
    head: Option<usize>,
    /// Last before-handler
    tail_before: Option<usize>,
    /// Last handler overall
    tail_after: Option<usize>,
}

impl Keyed for HandlerList {
    type Key = SignalId;

    fn key(&self) -> SignalId {
        self.signal_id
    }
}

fn handler(slots: &[Option<Handler>], slot: usize) -> &Handler {
    slots[slot]
        .as_ref()
        .unwrap_or_else(|| panic!("handler slot {slot} is free"))
}

fn handler_mut(slots: &mut [Option<Handler>], slot: usize) -> &mut Handler {
    slots[slot]
        .as_mut()
        .unwrap_or_else(|| panic!("handler slot {slot} is free"))
}

impl HandlerList {
    fn link(&mut self, slots: &mut [Option<Handler>], slot: usize) {
        let after = handler(slots, slot).after;
        match self.head {
            None => {
                self.head = Some(slot);
                if !after {
                    self.tail_before = Some(slot);
                }
            }
            Some(_) if after => {
                let tail = self.tail_after;
                handler_mut(slots, slot).prev = tail;
                if let Some(tail) = tail {
                    handler_mut(slots, tail).next = Some(slot);
                }
            }
            Some(head) => {
                match self.tail_before {
                    Some(tail_before) => {
                        let next = handler(slots, tail_before).next;
                        let new = handler_mut(slots, slot);
                        new.next = next;
                        new.prev = Some(tail_before);
                        if let Some(next) = next {
                            handler_mut(slots, next).prev = Some(slot);
                        }
                        handler_mut(slots, tail_before).next = Some(slot);
                    }
                    None => {
                        // Only after-handlers so far
                        handler_mut(slots, slot).next = Some(head);
                        handler_mut(slots, head).prev = Some(slot);
                        self.head = Some(slot);
                    }
                }
                self.tail_before = Some(slot);
            }
        }
        if handler(slots, slot).next.is_none() {
            self.tail_after = Some(slot);
        }
    }
}

/// Every handler of every instance
pub(super) struct HandlerTable {
    slots: Vec<Option<Handler>>,
    free: Vec<usize>,
    lists: HashMap<InstanceId, SortedArray<HandlerList>, RandomState>,
    by_id: HashMap<HandlerId, usize, RandomState>,
    /// Id the next handler gets; also the emission cutoff
    pub(super) next_seq: u64,
}

impl HandlerTable {
    pub(super) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            lists: HashMap::default(),
            by_id: HashMap::default(),
            next_seq: 1,
        }
    }

    pub(super) fn get(&self, slot: usize) -> &Handler {
        handler(&self.slots, slot)
    }

    pub(super) fn head(&self, instance: InstanceId, signal_id: SignalId) -> Option<usize> {
        self.lists.get(&instance)?.lookup(&signal_id)?.head
    }

    fn find(&self, instance: InstanceId, handler_id: HandlerId) -> Option<usize> {
        let slot = *self.by_id.get(&handler_id)?;
        (self.get(slot).instance == instance).then_some(slot)
    }

    fn insert(
        &mut self,
        instance: InstanceId,
        signal_id: SignalId,
        detail: Option<Quark>,
        closure: Closure,
        after: bool,
    ) -> HandlerId {
        assert!(self.next_seq < u64::MAX, "handler id overflow");
        let seq = self.next_seq;
        self.next_seq += 1;

        let handler = Handler {
            seq,
            prev: None,
            next: None,
            detail,
            signal_id,
            instance,
            ref_count: 1,
            block_count: 0,
            after,
            linked: true,
            invalid_notify: None,
            closure,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(handler);
                slot
            }
            None => {
                self.slots.push(Some(handler));
                self.slots.len() - 1
            }
        };

        let list = self
            .lists
            .entry(instance)
            .or_insert_with(SortedArray::new)
            .ensure(signal_id, || HandlerList {
                signal_id,
                head: None,
                tail_before: None,
                tail_after: None,
            });
        list.link(&mut self.slots, slot);

        let handler_id = HandlerId(seq);
        self.by_id.insert(handler_id, slot);
        handler_id
    }

    pub(super) fn add_ref(&mut self, slot: usize) {
        let handler = handler_mut(&mut self.slots, slot);
        handler.ref_count = handler
            .ref_count
            .checked_add(1)
            .unwrap_or_else(|| panic!("handler reference count overflow"));
    }

    /// Drop a reference. Returns the closure to unref once the last one is
    /// gone.
    pub(super) fn unref(&mut self, slot: usize) -> Option<Closure> {
        let handler = handler_mut(&mut self.slots, slot);
        handler.ref_count -= 1;
        if handler.ref_count > 0 {
            return None;
        }
        let handler = self.slots[slot].take()?;
        self.free.push(slot);
        if handler.linked {
            self.unlink(slot, &handler);
        }
        Some(handler.closure)
    }

    fn unlink(&mut self, slot: usize, handler: &Handler) {
        if let Some(next) = handler.next {
            handler_mut(&mut self.slots, next).prev = handler.prev;
        }
        if let Some(prev) = handler.prev {
            handler_mut(&mut self.slots, prev).next = handler.next;
        }
        let Some(list) = self
            .lists
            .get_mut(&handler.instance)
            .and_then(|lists| lists.lookup_mut(&handler.signal_id))
        else {
            return;
        };
        if handler.prev.is_none() {
            list.head = handler.next;
        }
        if list.tail_before == Some(slot) {
            list.tail_before = handler.prev;
        }
        if list.tail_after == Some(slot) {
            list.tail_after = handler.prev;
        }
    }

    /// Make a handler invisible and drop the connection's reference
    fn disconnect(&mut self, slot: usize, remove_notify: bool) -> Option<Closure> {
        let handler = handler_mut(&mut self.slots, slot);
        let handler_id = handler.id();
        handler.seq = 0;
        handler.block_count = 1;
        let notify = handler.invalid_notify.take();
        if let (true, Some(notify)) = (remove_notify, notify) {
            handler.closure.remove_invalidate_notifier(&notify);
        }
        self.by_id.remove(&handler_id);
        self.unref(slot)
    }

    fn block(&mut self, slot: usize) {
        let handler = handler_mut(&mut self.slots, slot);
        assert!(
            handler.block_count < MAX_BLOCK_COUNT,
            "handler block count overflow"
        );
        handler.block_count += 1;
    }

    fn unblock(&mut self, slot: usize) -> bool {
        let handler = handler_mut(&mut self.slots, slot);
        if handler.block_count == 0 {
            return false;
        }
        handler.block_count -= 1;
        true
    }

    /// Disconnect everything on `instance`. Handlers pinned by a running
    /// emission are cut loose so that emission simply stops seeing them.
    pub(super) fn destroy_instance(&mut self, instance: InstanceId) -> Vec<Closure> {
        let Some(lists) = self.lists.remove(&instance) else {
            return Vec::new();
        };
        let mut connected = Vec::new();
        for list in lists.iter() {
            let mut cursor = list.head;
            while let Some(slot) = cursor {
                let handler = handler_mut(&mut self.slots, slot);
                cursor = handler.next;
                handler.block_count = 1;
                handler.next = None;
                handler.prev = None;
                handler.linked = false;
                if handler.is_connected() {
                    connected.push(slot);
                }
            }
        }
        connected
            .into_iter()
            .filter_map(|slot| self.disconnect(slot, true))
            .collect()
    }
}

impl SignalState {
    fn connect(
        &mut self,
        instance: &Object,
        signal_id: SignalId,
        detail: Option<Quark>,
        closure: &Closure,
        after: bool,
        auto_disconnect: bool,
    ) -> Result<HandlerId, SignalError> {
        let c_marshaller = self
            .check_instance(signal_id, instance.type_(), detail)?
            .c_marshaller
            .clone();

        closure.add_ref();
        closure.sink();
        let instance_id = instance.id();
        let handler_id =
            self.handlers
                .insert(instance_id, signal_id, detail, closure.clone(), after);
        if auto_disconnect {
            let notify: NotifyFn =
                Arc::new(move |_: &Closure| invalid_closure_disconnect(instance_id, handler_id));
            closure.add_invalidate_notifier(notify.clone());
            if let Some(slot) = self.handlers.find(instance_id, handler_id) {
                handler_mut(&mut self.handlers.slots, slot).invalid_notify = Some(notify);
            }
        }
        if closure.needs_marshal() {
            closure.set_marshal(c_marshaller);
        }
        debug!(%signal_id, %handler_id, instance = %instance_id, after, "connected handler");
        Ok(handler_id)
    }

    fn connect_detailed(
        &mut self,
        instance: &Object,
        detailed_signal: &str,
        closure: &Closure,
        after: bool,
        auto_disconnect: bool,
    ) -> Result<HandlerId, SignalError> {
        let (signal_id, detail) = self.parse_detailed(detailed_signal, instance.type_(), true)?;
        self.connect(instance, signal_id, detail, closure, after, auto_disconnect)
    }

    /// Slots of connected handlers on `instance` matching `criteria`
    fn matched(
        &self,
        instance: InstanceId,
        criteria: &MatchCriteria,
        first_only: bool,
    ) -> Vec<usize> {
        let Some(lists) = self.handlers.lists.get(&instance) else {
            return Vec::new();
        };
        let selected: Vec<&HandlerList> = if criteria.mask.contains(MatchType::ID) {
            criteria
                .signal_id
                .and_then(|signal_id| lists.lookup(&signal_id))
                .into_iter()
                .collect()
        } else {
            lists.iter().collect()
        };

        let mut matched = Vec::new();
        for list in selected {
            let c_marshaller = if criteria.mask.contains(MatchType::FUNC) {
                self.node(list.signal_id).map(|node| node.c_marshaller.clone())
            } else {
                None
            };
            let mut cursor = list.head;
            while let Some(slot) = cursor {
                let handler = self.handlers.get(slot);
                cursor = handler.next;
                if handler.is_connected() && handler.matches(criteria, c_marshaller.as_ref()) {
                    matched.push(slot);
                    if first_only {
                        return matched;
                    }
                }
            }
        }
        matched
    }

    /// Whether an emission of `signal_id` with `detail` on `instance` would
    /// reach a connected handler
    pub(super) fn handler_pending(
        &self,
        instance: InstanceId,
        signal_id: SignalId,
        detail: Option<Quark>,
        may_be_blocked: bool,
    ) -> bool {
        let mut cursor = self.handlers.head(instance, signal_id);
        while let Some(slot) = cursor {
            let handler = self.handlers.get(slot);
            cursor = handler.next;
            if handler.is_connected()
                && (may_be_blocked || handler.block_count == 0)
                && (handler.detail.is_none() || handler.detail == detail)
            {
                return true;
            }
        }
        false
    }
}

/// Invalidate notifier installed on connected closures
fn invalid_closure_disconnect(instance: InstanceId, handler_id: HandlerId) {
    let mut state = registry::lock();
    let Some(slot) = state.handlers.find(instance, handler_id) else {
        return;
    };
    if let Some(closure) = state.handlers.disconnect(slot, false) {
        release(&mut state, vec![closure]);
    }
}

fn connected(result: Result<HandlerId, SignalError>) -> Option<HandlerId> {
    result.map_err(report).ok()
}

/// Connect `closure` to `signal_id` on `instance`.
///
/// The closure is referenced and sunk. Invalidating it later disconnects
/// the handler.
///
/// # Arguments
/// * `detail` - only run for emissions with this detail; `None` runs for all
/// * `after` - run after the RUN_LAST class closure instead of before it
///
/// # Returns
/// The handler id, or `None` if the signal is unknown, does not take
/// details, or does not apply to the instance's type.
pub fn connect_closure_by_id(
    instance: &Object,
    signal_id: SignalId,
    detail: Option<Quark>,
    closure: &Closure,
    after: bool,
) -> Option<HandlerId> {
    let result = registry::lock().connect(instance, signal_id, detail, closure, after, true);
    connected(result)
}

/// [`connect_closure_by_id`] addressed by `"name"` or `"name::detail"`
pub fn connect_closure(
    instance: &Object,
    detailed_signal: &str,
    closure: &Closure,
    after: bool,
) -> Option<HandlerId> {
    let result = registry::lock().connect_detailed(instance, detailed_signal, closure, after, true);
    connected(result)
}

/// Connect a plain callback with optional user data.
///
/// With [`ConnectFlags::SWAPPED`] the instance is passed as the last
/// parameter instead of the first.
pub fn connect_data(
    instance: &Object,
    detailed_signal: &str,
    callback: Callback,
    data: Option<ClosureData>,
    flags: ConnectFlags,
) -> Option<HandlerId> {
    let swapped = flags.contains(ConnectFlags::SWAPPED);
    let closure = match (data, swapped) {
        (Some(data), true) => Closure::with_data_swap(callback, data),
        (Some(data), false) => Closure::with_data(callback, data),
        (None, true) => Closure::from_callback_swap(callback),
        (None, false) => Closure::from_callback(callback),
    };
    let after = flags.contains(ConnectFlags::AFTER);
    let result =
        registry::lock().connect_detailed(instance, detailed_signal, &closure, after, false);
    if result.is_err() {
        // Nobody claimed the floating reference
        closure.sink();
    }
    connected(result)
}

/// Connect `handler` to run before the class closure of a run-last signal
pub fn connect<F>(instance: &Object, detailed_signal: &str, handler: F) -> Option<HandlerId>
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    connect_data(
        instance,
        detailed_signal,
        Arc::new(handler),
        None,
        ConnectFlags::empty(),
    )
}

/// Connect `handler` to run after the class closure
pub fn connect_after<F>(instance: &Object, detailed_signal: &str, handler: F) -> Option<HandlerId>
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    connect_data(
        instance,
        detailed_signal,
        Arc::new(handler),
        None,
        ConnectFlags::AFTER,
    )
}

fn with_handler<R>(
    instance: &Object,
    handler_id: HandlerId,
    op: impl FnOnce(&mut StateGuard, usize) -> R,
) -> Option<R> {
    let mut state = registry::lock();
    match state.handlers.find(instance.id(), handler_id) {
        Some(slot) => Some(op(&mut state, slot)),
        None => {
            drop(state);
            report(SignalError::HandlerNotFound {
                instance: instance.id(),
                handler_id,
            });
            None
        }
    }
}

/// Skip the handler in emissions until a matching [`handler_unblock`]
pub fn handler_block(instance: &Object, handler_id: HandlerId) {
    with_handler(instance, handler_id, |state, slot| state.handlers.block(slot));
}

/// Undo one [`handler_block`]
pub fn handler_unblock(instance: &Object, handler_id: HandlerId) {
    let unblocked = with_handler(instance, handler_id, |state, slot| state.handlers.unblock(slot));
    if unblocked == Some(false) {
        report(SignalError::HandlerNotBlocked(handler_id));
    }
}

/// Disconnect a handler. An emission currently running it still finishes
/// the call but will not run it again.
pub fn handler_disconnect(instance: &Object, handler_id: HandlerId) {
    with_handler(instance, handler_id, |state, slot| {
        if let Some(closure) = state.handlers.disconnect(slot, true) {
            release(state, vec![closure]);
        }
    });
}

/// Whether `handler_id` is still connected on `instance`
pub fn handler_is_connected(instance: &Object, handler_id: HandlerId) -> bool {
    registry::lock()
        .handlers
        .find(instance.id(), handler_id)
        .is_some()
}

/// First connected handler on `instance` matching `criteria`
pub fn handler_find(instance: &Object, criteria: &MatchCriteria) -> Option<HandlerId> {
    if criteria.mask.is_empty() {
        return None;
    }
    let state = registry::lock();
    state
        .matched(instance.id(), criteria, true)
        .first()
        .map(|&slot| state.handlers.get(slot).id())
}

fn for_each_matched(
    instance: &Object,
    criteria: &MatchCriteria,
    mut op: impl FnMut(&mut StateGuard, usize) -> bool,
) -> usize {
    if !criteria.mask.intersects(MatchType::SELECTIVE) {
        report(SignalError::NoMatchCriteria);
        return 0;
    }
    let mut state = registry::lock();
    let matched = state.matched(instance.id(), criteria, false);
    matched
        .into_iter()
        .filter(|&slot| op(&mut state, slot))
        .count()
}

/// Block every matching handler. Returns how many were blocked.
pub fn handlers_block_matched(instance: &Object, criteria: &MatchCriteria) -> usize {
    for_each_matched(instance, criteria, |state, slot| {
        state.handlers.block(slot);
        true
    })
}

/// Unblock every matching handler that is blocked. Returns how many were
/// unblocked.
pub fn handlers_unblock_matched(instance: &Object, criteria: &MatchCriteria) -> usize {
    for_each_matched(instance, criteria, |state, slot| state.handlers.unblock(slot))
}

/// Disconnect every matching handler. Returns how many were disconnected.
pub fn handlers_disconnect_matched(instance: &Object, criteria: &MatchCriteria) -> usize {
    let mut released = Vec::new();
    let count = for_each_matched(instance, criteria, |state, slot| {
        released.extend(state.handlers.disconnect(slot, true));
        true
    });
    released.iter().for_each(Closure::unref);
    count
}

/// Disconnect every handler on `instance`; used when it is disposed
pub fn handlers_destroy(instance: &Object) {
    let released = registry::lock().handlers.destroy_instance(instance.id());
    released.iter().for_each(Closure::unref);
}

/// Whether emitting `signal_id` with `detail` on `instance` would run
/// anything beyond the default class closure: a connected handler (blocked
/// ones count if `may_be_blocked`), or a class closure overridden for the
/// instance's type.
pub fn has_handler_pending(
    instance: &Object,
    signal_id: SignalId,
    detail: Option<Quark>,
    may_be_blocked: bool,
) -> bool {
    let state = registry::lock();
    let node = match state.live_node(signal_id) {
        Ok(node) => node,
        Err(err) => {
            drop(state);
            report(err);
            return false;
        }
    };
    if detail.is_some() && !node.flags.contains(SignalFlags::DETAILED) {
        drop(state);
        report(SignalError::DetailNotSupported(signal_id));
        return false;
    }
    let overridden = node
        .find_class_closure(instance.type_())
        .is_some_and(|cc| cc.itype != crate::types::Type::INVALID);
    overridden || state.handler_pending(instance.id(), signal_id, detail, may_be_blocked)
}
