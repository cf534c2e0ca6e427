use super::*;
use crate::closure::ClosureData;
use crate::test_utils::{CallLog, derived_type, object_type, unique_name};
use crate::types::Object;
use crate::value::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn simple(owner: Type, name: &str) -> SignalId {
    SignalBuilder::new(name, owner)
        .flags(SignalFlags::RUN_LAST)
        .build()
        .unwrap()
}

fn detailed(owner: Type, name: &str) -> SignalId {
    SignalBuilder::new(name, owner)
        .flags(SignalFlags::RUN_LAST | SignalFlags::DETAILED)
        .build()
        .unwrap()
}

fn noop(_: &[Value]) -> Value {
    Value::None
}

fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(&[Value]) -> Value + Send + Sync + 'static {
    let counter = counter.clone();
    move |_: &[Value]| {
        counter.fetch_add(1, Ordering::SeqCst);
        Value::None
    }
}

// Registry

#[test]
fn test_register_and_lookup() {
    let base = object_type("LookupBase");
    let derived = derived_type("LookupDerived", base);
    let signal_id = SignalBuilder::new("value_changed", base)
        .flags(SignalFlags::RUN_LAST)
        .param(Type::INT)
        .build()
        .unwrap();

    assert_eq!(lookup("value-changed", base), Some(signal_id));
    assert_eq!(lookup("value_changed", base), Some(signal_id));
    assert_eq!(lookup("value-changed", derived), Some(signal_id));
    assert_eq!(lookup("value-changed", object_type("Unrelated")), None);
    assert_eq!(lookup("missing", base), None);
    assert_eq!(name(signal_id), Some("value-changed"));

    let info = query(signal_id).unwrap();
    assert_eq!(info.signal_id, signal_id);
    assert_eq!(info.signal_name, "value-changed");
    assert_eq!(info.itype, base);
    assert_eq!(info.flags, SignalFlags::RUN_LAST);
    assert_eq!(info.return_type, Type::NONE);
    assert_eq!(info.param_types, vec![Type::INT]);
}

#[test]
fn test_signal_names_are_unique_along_ancestry() {
    let base = object_type("DupBase");
    let derived = derived_type("DupDerived", base);
    simple(base, "activate");

    let err = SignalBuilder::new("activate", derived).try_build().unwrap_err();
    assert_eq!(
        err,
        SignalError::AlreadyExists {
            name: "activate".to_string(),
            owner: base,
        }
    );
    assert!(matches!(
        SignalBuilder::new("activate", base).try_build(),
        Err(SignalError::AlreadyExists { .. })
    ));

    // Siblings may reuse a name
    let sibling = derived_type("DupSibling", Type::OBJECT);
    assert!(SignalBuilder::new("activate", sibling).build().is_some());
}

#[test]
fn test_registration_validation() {
    let owner = object_type("Validate");
    let iface = Type::register_interface(&unique_name("ValidateIface")).unwrap();

    assert!(matches!(
        SignalBuilder::new("1bad", owner).try_build(),
        Err(SignalError::InvalidName(_))
    ));
    assert!(matches!(
        SignalBuilder::new("has space", owner).try_build(),
        Err(SignalError::InvalidName(_))
    ));
    assert!(matches!(
        SignalBuilder::new("on-int", Type::INT).try_build(),
        Err(SignalError::InvalidOwner { .. })
    ));
    assert!(matches!(
        SignalBuilder::new("accumulated", owner)
            .accumulator(accumulator_first_wins)
            .try_build(),
        Err(SignalError::AccumulatorWithoutReturn { .. })
    ));
    assert!(matches!(
        SignalBuilder::new("reserved", owner)
            .flags(SignalFlags::RUN_LAST | SignalFlags::ACCUMULATOR_FIRST_RUN)
            .try_build(),
        Err(SignalError::ReservedFlags { .. })
    ));
    assert!(matches!(
        SignalBuilder::new("iface-param", owner)
            .param(Type::INT)
            .param(iface)
            .try_build(),
        Err(SignalError::ParamNotValueType { index: 1, .. })
    ));
    assert!(matches!(
        SignalBuilder::new("iface-return", owner)
            .flags(SignalFlags::RUN_LAST)
            .return_type(iface)
            .try_build(),
        Err(SignalError::ReturnNotValueType { .. })
    ));
    assert!(matches!(
        SignalBuilder::new("first-only", owner)
            .flags(SignalFlags::RUN_FIRST)
            .return_type(Type::INT)
            .try_build(),
        Err(SignalError::ReturnWithRunFirstOnly { .. })
    ));

    // Object types are fine as parameters
    assert!(SignalBuilder::new("object-param", owner)
        .param(owner)
        .build()
        .is_some());
}

#[test]
fn test_failed_registration_releases_class_closure() {
    let owner = object_type("Release");
    let finalized = Arc::new(AtomicUsize::new(0));
    let closure = Closure::from_fn(noop);
    let counter = finalized.clone();
    closure.add_finalize_notifier(Arc::new(move |_: &Closure| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let result = SignalBuilder::new("9invalid", owner)
        .class_closure(closure)
        .try_build();
    assert!(result.is_err());
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[test]
fn test_interface_signals() {
    let iface = Type::register_interface(&unique_name("Scrollable")).unwrap();
    let widget = object_type("ScrollWidget");
    widget.add_interface(iface).unwrap();
    let signal_id = simple(iface, "scrolled");

    assert_eq!(lookup("scrolled", widget), Some(signal_id));
    assert_eq!(lookup("scrolled", iface), Some(signal_id));

    let instance = Object::new(widget).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    connect(&instance, "scrolled", counting(&calls)).unwrap();
    emit(&instance, signal_id, None, &[]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let plain = Object::new(object_type("NotScrollable")).unwrap();
    assert_eq!(connect(&plain, "scrolled", noop), None);
}

#[test]
fn test_list_ids() {
    let base = object_type("ListBase");
    let derived = derived_type("ListDerived", base);
    let first = simple(base, "first");
    let second = simple(base, "second_signal");
    simple(derived, "third");

    assert_eq!(list_ids(base), vec![first, second]);
    assert_eq!(list_ids(object_type("ListEmpty")), Vec::new());
}

#[test]
fn test_parse_name() {
    let owner = object_type("Parse");
    let notify = detailed(owner, "notify");
    let plain = simple(owner, "plain");
    let width = Quark::intern("width");

    assert_eq!(parse_name("notify", owner, false), Some((notify, None)));
    assert_eq!(
        parse_name("notify::width", owner, false),
        Some((notify, Some(width)))
    );
    assert_eq!(parse_name("notify:width", owner, false), None);
    assert_eq!(parse_name("notify::", owner, false), None);
    assert_eq!(parse_name("plain::width", owner, false), None);
    assert_eq!(parse_name("plain", owner, false), Some((plain, None)));
    assert_eq!(parse_name("missing", owner, false), None);

    let fresh = unique_name("never-seen-detail");
    assert_eq!(parse_name(&format!("notify::{fresh}"), owner, false), None);
    let forced = parse_name(&format!("notify::{fresh}"), owner, true);
    assert_eq!(forced, Some((notify, Quark::lookup(&fresh))));
}

#[test]
fn test_override_class_closure() {
    let base = object_type("OverrideBase");
    let derived = derived_type("OverrideDerived", base);
    let log = CallLog::new();
    let base_log = log.clone();
    let signal_id = SignalBuilder::new("render", base)
        .flags(SignalFlags::RUN_LAST)
        .class_handler(move |_| {
            base_log.push("base");
            Value::None
        })
        .build()
        .unwrap();

    let derived_log = log.clone();
    let handler: Callback = Arc::new(move |_: &[Value]| {
        derived_log.push("derived");
        Value::None
    });
    assert!(override_class_handler("render", derived, handler.clone()));
    // Once per type
    assert!(!override_class_handler("render", derived, handler.clone()));
    // Only on types that inherit the signal
    let unrelated = object_type("OverrideUnrelated");
    assert!(!override_class_closure(
        signal_id,
        unrelated,
        &Closure::from_callback(handler.clone())
    ));
    assert!(!override_class_handler("no-such-signal", derived, handler));

    emit(&Object::new(derived).unwrap(), signal_id, None, &[]);
    emit(&Object::new(base).unwrap(), signal_id, None, &[]);
    assert_eq!(log.entries(), vec!["derived", "base"]);
}

#[test]
fn test_destroy_signal() {
    let owner = object_type("Destroy");
    let finalized = Arc::new(AtomicUsize::new(0));
    let class_closure = Closure::from_fn(noop);
    let counter = finalized.clone();
    class_closure.add_finalize_notifier(Arc::new(move |_: &Closure| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let signal_id = SignalBuilder::new("doomed", owner)
        .flags(SignalFlags::RUN_LAST)
        .class_closure(class_closure)
        .build()
        .unwrap();
    let hook_destroyed = Arc::new(AtomicUsize::new(0));
    let destroy_counter = hook_destroyed.clone();
    add_emission_hook(
        signal_id,
        None,
        |_: &InvocationHint, _: &[Value]| true,
        Some(Box::new(move || {
            destroy_counter.fetch_add(1, Ordering::SeqCst);
        })),
    )
    .unwrap();

    assert!(destroy(signal_id));
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert_eq!(hook_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(lookup("doomed", owner), None);
    assert_eq!(name(signal_id), None);
    assert_eq!(query(signal_id), None);
    assert!(!destroy(signal_id));

    let instance = Object::new(owner).unwrap();
    assert_eq!(connect(&instance, "doomed", noop), None);
    assert_eq!(emit(&instance, signal_id, None, &[]), None);

    // The id is not reused
    let again = simple(owner, "doomed");
    assert_ne!(again, signal_id);
}

#[test]
fn test_destroy_for_type() {
    let owner = object_type("DestroyAll");
    let derived = derived_type("DestroyAllDerived", owner);
    simple(owner, "one");
    simple(owner, "two");
    let survivor = simple(derived, "three");

    assert_eq!(destroy_for_type(owner), 2);
    assert_eq!(list_ids(owner), Vec::new());
    assert_eq!(lookup("three", derived), Some(survivor));
    assert_eq!(destroy_for_type(owner), 0);
}

#[test]
fn test_destroy_refused_during_emission() {
    let owner = object_type("DestroyBusy");
    let signal_id = simple(owner, "busy");
    let instance = Object::new(owner).unwrap();
    let refused = Arc::new(AtomicUsize::new(0));

    let counter = refused.clone();
    connect(&instance, "busy", move |_| {
        if !destroy(signal_id) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Value::None
    })
    .unwrap();

    emit(&instance, signal_id, None, &[]);
    assert_eq!(refused.load(Ordering::SeqCst), 1);
    assert!(destroy(signal_id));
}

// Handlers

#[test]
fn test_connect_and_disconnect() {
    let owner = object_type("Connect");
    let signal_id = simple(owner, "clicked");
    let instance = Object::new(owner).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = connect(&instance, "clicked", counting(&calls)).unwrap();
    let second = connect(&instance, "clicked", counting(&calls)).unwrap();
    assert_ne!(first, second);
    assert!(handler_is_connected(&instance, first));

    emit(&instance, signal_id, None, &[]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    handler_disconnect(&instance, first);
    assert!(!handler_is_connected(&instance, first));
    emit(&instance, signal_id, None, &[]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Unknown ids are reported and ignored
    handler_disconnect(&instance, first);
    handler_block(&instance, first);
    handler_unblock(&instance, first);
    let other = Object::new(owner).unwrap();
    assert!(!handler_is_connected(&other, second));
}

#[test]
fn test_connect_refusals() {
    let owner = object_type("Refuse");
    simple(owner, "plain");
    let instance = Object::new(owner).unwrap();
    let stranger = Object::new(object_type("RefuseStranger")).unwrap();

    assert_eq!(connect(&stranger, "plain", noop), None);
    assert_eq!(connect(&instance, "missing", noop), None);
    assert_eq!(connect(&instance, "plain::detail", noop), None);
    assert_eq!(connect(&instance, "plain:detail", noop), None);

    let closure = Closure::from_fn(noop);
    let signal_id = lookup("plain", owner).unwrap();
    assert_eq!(
        connect_closure_by_id(&stranger, signal_id, None, &closure, false),
        None
    );
    assert_eq!(
        connect_closure_by_id(
            &instance,
            signal_id,
            Some(Quark::intern("detail")),
            &closure,
            false
        ),
        None
    );
    assert!(closure.is_floating());
}

#[test]
fn test_connect_closure_claims_floating_reference() {
    let owner = object_type("Claim");
    let signal_id = simple(owner, "claimed");
    let instance = Object::new(owner).unwrap();
    let closure = Closure::from_fn(noop);
    assert!(closure.is_floating());

    let handler_id = connect_closure(&instance, "claimed", &closure, false).unwrap();
    assert!(!closure.is_floating());
    assert_eq!(closure.ref_count(), 1);
    assert!(closure.marshal().is_some());

    let finalized = Arc::new(AtomicUsize::new(0));
    let counter = finalized.clone();
    closure.add_finalize_notifier(Arc::new(move |_: &Closure| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    handler_disconnect(&instance, handler_id);
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert_eq!(emit(&instance, signal_id, None, &[]), None);
}

#[test]
fn test_invalidated_closure_disconnects_handler() {
    let owner = object_type("Invalidate");
    let signal_id = simple(owner, "changed");
    let instance = Object::new(owner).unwrap();
    let closure = Closure::from_fn(noop);
    closure.add_ref();

    let handler_id = connect_closure_by_id(&instance, signal_id, None, &closure, false).unwrap();
    assert!(handler_is_connected(&instance, handler_id));
    closure.invalidate();
    assert!(!handler_is_connected(&instance, handler_id));
    assert_eq!(closure.ref_count(), 1);
    closure.unref();
}

#[test]
fn test_block_and_unblock() {
    let owner = object_type("Block");
    let signal_id = simple(owner, "beat");
    let instance = Object::new(owner).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_id = connect(&instance, "beat", counting(&calls)).unwrap();

    handler_block(&instance, handler_id);
    assert!(has_handler_pending(&instance, signal_id, None, true));
    assert!(!has_handler_pending(&instance, signal_id, None, false));
    emit(&instance, signal_id, None, &[]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    handler_unblock(&instance, handler_id);
    // Not blocked any more: reported, count stays at zero
    handler_unblock(&instance, handler_id);
    emit(&instance, signal_id, None, &[]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "handler block count overflow")]
fn test_block_count_overflow_panics() {
    let owner = object_type("BlockOverflow");
    simple(owner, "saturated");
    let instance = Object::new(owner).unwrap();
    let handler_id = connect(&instance, "saturated", noop).unwrap();
    for _ in 0..=u16::MAX {
        handler_block(&instance, handler_id);
    }
}

#[test]
fn test_handler_find() {
    let owner = object_type("Find");
    let notify = detailed(owner, "notify");
    let other = simple(owner, "other");
    let instance = Object::new(owner).unwrap();
    let width = Quark::intern("width");

    let closure = Closure::from_fn(noop);
    let by_closure = connect_closure(&instance, "other", &closure, false).unwrap();
    let by_detail = connect(&instance, "notify::width", noop).unwrap();
    let plain = connect(&instance, "notify", noop).unwrap();

    assert_eq!(handler_find(&instance, &MatchCriteria::new()), None);
    assert_eq!(
        handler_find(&instance, &MatchCriteria::new().closure(&closure)),
        Some(by_closure)
    );
    assert_eq!(
        handler_find(&instance, &MatchCriteria::new().signal(notify).detail(Some(width))),
        Some(by_detail)
    );
    assert_eq!(
        handler_find(&instance, &MatchCriteria::new().signal(notify).detail(None)),
        Some(plain)
    );
    assert_eq!(
        handler_find(&instance, &MatchCriteria::new().signal(other)),
        Some(by_closure)
    );

    handler_block(&instance, by_closure);
    assert_eq!(
        handler_find(&instance, &MatchCriteria::new().signal(other).unblocked()),
        None
    );
    assert_eq!(
        handler_find(
            &Object::new(owner).unwrap(),
            &MatchCriteria::new().closure(&closure)
        ),
        None
    );
}

#[test]
fn test_bulk_operations_by_func_and_data() {
    let owner = object_type("Bulk");
    let signal_id = simple(owner, "batch");
    let instance = Object::new(owner).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let shared: Callback = Arc::new(counting(&calls));
    let data: ClosureData = Arc::new(7u32);
    for _ in 0..3 {
        connect_data(&instance, "batch", shared.clone(), None, ConnectFlags::empty()).unwrap();
    }
    connect_data(
        &instance,
        "batch",
        Arc::new(counting(&calls)),
        Some(data.clone()),
        ConnectFlags::empty(),
    )
    .unwrap();

    let by_func = MatchCriteria::new().func(&shared);
    assert_eq!(handlers_block_matched(&instance, &by_func), 3);
    emit(&instance, signal_id, None, &[]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(handlers_unblock_matched(&instance, &by_func), 3);
    // Nothing left blocked
    assert_eq!(handlers_unblock_matched(&instance, &by_func), 0);

    // No selective criterion
    let unselective = MatchCriteria::new().detail(None).unblocked();
    assert_eq!(handlers_disconnect_matched(&instance, &unselective), 0);

    let by_data = MatchCriteria::new().data(Some(&data));
    assert_eq!(handlers_disconnect_matched(&instance, &by_data), 1);
    assert_eq!(handlers_disconnect_matched(&instance, &by_func), 3);

    calls.store(0, Ordering::SeqCst);
    emit(&instance, signal_id, None, &[]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!has_handler_pending(&instance, signal_id, None, true));
}

#[test]
fn test_disconnect_matched_by_signal_id() {
    let owner = object_type("BulkId");
    let kept = simple(owner, "kept");
    let dropped = simple(owner, "dropped");
    let instance = Object::new(owner).unwrap();
    connect(&instance, "kept", noop).unwrap();
    connect(&instance, "dropped", noop).unwrap();
    connect_after(&instance, "dropped", noop).unwrap();

    assert_eq!(
        handlers_disconnect_matched(&instance, &MatchCriteria::new().signal(dropped)),
        2
    );
    assert!(has_handler_pending(&instance, kept, None, false));
    assert!(!has_handler_pending(&instance, dropped, None, false));
}

#[test]
fn test_has_handler_pending() {
    let base = object_type("PendingBase");
    let derived = derived_type("PendingDerived", base);
    let notify = SignalBuilder::new("notify", base)
        .flags(SignalFlags::RUN_LAST | SignalFlags::DETAILED)
        .class_handler(noop)
        .build()
        .unwrap();
    let instance = Object::new(base).unwrap();
    let width = Quark::intern("width");
    let height = Quark::intern("height");

    // The default class closure does not count
    assert!(!has_handler_pending(&instance, notify, None, false));

    connect(&instance, "notify::width", noop).unwrap();
    assert!(has_handler_pending(&instance, notify, Some(width), false));
    assert!(!has_handler_pending(&instance, notify, Some(height), false));
    assert!(!has_handler_pending(&instance, notify, None, false));

    connect(&instance, "notify", noop).unwrap();
    assert!(has_handler_pending(&instance, notify, Some(height), false));

    // An override counts for instances of the overriding type
    let handler: Callback = Arc::new(noop);
    assert!(override_class_handler("notify", derived, handler));
    let derived_instance = Object::new(derived).unwrap();
    assert!(has_handler_pending(&derived_instance, notify, None, false));

    let plain = simple(base, "plain-pending");
    assert!(!has_handler_pending(&instance, plain, Some(width), true));
}

#[test]
fn test_dispose_drops_all_handlers() {
    let owner = object_type("Dispose");
    let signal_id = simple(owner, "gone");
    let instance = Object::new(owner).unwrap();
    let finalized = Arc::new(AtomicUsize::new(0));

    let mut ids = Vec::new();
    for _ in 0..4 {
        let closure = Closure::from_fn(noop);
        let counter = finalized.clone();
        closure.add_finalize_notifier(Arc::new(move |_: &Closure| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        ids.push(connect_closure(&instance, "gone", &closure, false).unwrap());
    }

    instance.dispose();
    assert_eq!(finalized.load(Ordering::SeqCst), 4);
    assert!(ids.iter().all(|&id| !handler_is_connected(&instance, id)));
    assert!(!has_handler_pending(&instance, signal_id, None, true));
}

#[test]
fn test_dropped_instance_releases_handlers() {
    let owner = object_type("Dropped");
    let signal_id = simple(owner, "gone");
    let instance = Object::new(owner).unwrap();
    let id = instance.id();
    connect(&instance, "gone", noop).unwrap();
    assert!(registry::lock().handlers.head(id, signal_id).is_some());

    drop(instance);
    assert!(registry::lock().handlers.head(id, signal_id).is_none());
}

// Emission hooks

#[test]
fn test_emission_hooks() {
    let owner = object_type("Hooks");
    let signal_id = detailed(owner, "changed");
    let instance = Object::new(owner).unwrap();
    let persistent = Arc::new(AtomicUsize::new(0));
    let once = Arc::new(AtomicUsize::new(0));
    let filtered = Arc::new(AtomicUsize::new(0));
    let destroyed = Arc::new(AtomicUsize::new(0));

    let counter = persistent.clone();
    let kept = add_emission_hook(
        signal_id,
        None,
        move |_: &InvocationHint, _: &[Value]| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        },
        None,
    )
    .unwrap();

    let counter = once.clone();
    let notify = destroyed.clone();
    add_emission_hook(
        signal_id,
        None,
        move |_: &InvocationHint, _: &[Value]| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        },
        Some(Box::new(move || {
            notify.fetch_add(1, Ordering::SeqCst);
        })),
    )
    .unwrap();

    let counter = filtered.clone();
    add_emission_hook(
        signal_id,
        Some(Quark::intern("width")),
        move |hint: &InvocationHint, _: &[Value]| {
            assert_eq!(hint.detail, Some(Quark::intern("width")));
            counter.fetch_add(1, Ordering::SeqCst);
            true
        },
        None,
    )
    .unwrap();

    emit(&instance, signal_id, None, &[]);
    emit(&instance, signal_id, Some(Quark::intern("width")), &[]);
    emit(&instance, signal_id, Some(Quark::intern("height")), &[]);

    assert_eq!(persistent.load(Ordering::SeqCst), 3);
    assert_eq!(once.load(Ordering::SeqCst), 1);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(filtered.load(Ordering::SeqCst), 1);

    assert!(remove_emission_hook(signal_id, kept));
    assert!(!remove_emission_hook(signal_id, kept));
    emit(&instance, signal_id, None, &[]);
    assert_eq!(persistent.load(Ordering::SeqCst), 3);
}

#[test]
fn test_emission_hook_refusals() {
    let owner = object_type("HookRefuse");
    let quiet = SignalBuilder::new("quiet", owner)
        .flags(SignalFlags::RUN_LAST | SignalFlags::NO_HOOKS)
        .build()
        .unwrap();
    let plain = simple(owner, "plain");
    let hook = |_: &InvocationHint, _: &[Value]| true;

    assert_eq!(add_emission_hook(quiet, None, hook, None), None);
    assert_eq!(
        add_emission_hook(plain, Some(Quark::intern("detail")), hook, None),
        None
    );
    let first = add_emission_hook(plain, None, hook, None).unwrap();
    let second = add_emission_hook(plain, None, hook, None).unwrap();
    assert_ne!(first, second);
}

// Concurrency

#[test]
fn test_concurrent_connects_get_distinct_ids() {
    let owner = object_type("ConcurrentIds");
    let signal_id = simple(owner, "shared");
    let instance = Object::new(owner).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let instance = instance.clone();
            thread::spawn(move || {
                (0..50)
                    .map(|_| connect(&instance, "shared", noop).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut ids: Vec<HandlerId> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 400);

    assert_eq!(
        handlers_disconnect_matched(&instance, &MatchCriteria::new().signal(signal_id)),
        400
    );
}
