//! Stock marshallers
//!
//! Marshallers are shared `Arc`s so that identity comparison works: a
//! handler matches a callback only when its closure uses the same
//! marshaller as the signal's default.

use super::{Callback, Closure, Invocation, MarshalData, MarshalFn};
use crate::quark::Quark;
use crate::types::Type;
use crate::value::Value;
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::sync::Arc;

static GENERIC: Lazy<MarshalFn> = Lazy::new(|| Arc::new(generic_marshal) as MarshalFn);
static VOID: Lazy<MarshalFn> = Lazy::new(|| Arc::new(void_marshal) as MarshalFn);
static CLASS_META: Lazy<MarshalFn> = Lazy::new(|| Arc::new(class_meta_marshal) as MarshalFn);

/// Calls the callback and stores its result in the return slot
pub fn generic() -> MarshalFn {
    GENERIC.clone()
}

/// Calls the callback and discards its result
pub fn void() -> MarshalFn {
    VOID.clone()
}

/// Whether `marshal` is the shared [`generic`] marshaller
pub fn is_generic(marshal: &MarshalFn) -> bool {
    Arc::ptr_eq(marshal, &*GENERIC)
}

pub(crate) fn class_meta() -> MarshalFn {
    CLASS_META.clone()
}

/// Meta marshal data of a class-slot closure
pub(crate) struct ClassSlot {
    pub(crate) itype: Type,
    pub(crate) slot: Quark,
}

fn resolve_callback(closure: &Closure, marshal_data: Option<&MarshalData>) -> Option<Callback> {
    marshal_data
        .and_then(|data| data.downcast_ref::<Callback>().cloned())
        .or_else(|| closure.callback())
}

fn call(closure: &Closure, callback: &Callback, params: &[Value]) -> Value {
    let params = if closure.is_swapped() && params.len() > 1 {
        let mut rotated = params.to_vec();
        rotated.rotate_left(1);
        Cow::Owned(rotated)
    } else {
        Cow::Borrowed(params)
    };
    callback(&params)
}

fn generic_marshal(closure: &Closure, invocation: Invocation<'_>) {
    let Some(callback) = resolve_callback(closure, invocation.marshal_data) else {
        return;
    };
    let result = call(closure, &callback, invocation.params);
    if let Some(slot) = invocation.return_value {
        *slot = result;
    }
}

fn void_marshal(closure: &Closure, invocation: Invocation<'_>) {
    if let Some(callback) = resolve_callback(closure, invocation.marshal_data) {
        call(closure, &callback, invocation.params);
    }
}

fn class_meta_marshal(closure: &Closure, invocation: Invocation<'_>) {
    let Some(class_slot) = invocation
        .marshal_data
        .and_then(|data| data.downcast_ref::<ClassSlot>())
    else {
        return;
    };
    let Some(instance) = invocation.params.first().and_then(Value::get_object) else {
        return;
    };
    if !instance.is_a(class_slot.itype) {
        return;
    }
    let Some(callback) = instance.type_().class_vfunc_by_quark(class_slot.slot) else {
        return;
    };
    let marshal = closure.marshal().unwrap_or_else(generic);
    let data: MarshalData = Arc::new(callback);
    marshal(
        closure,
        Invocation {
            return_value: invocation.return_value,
            params: invocation.params,
            hint: invocation.hint,
            marshal_data: Some(&data),
        },
    );
}
