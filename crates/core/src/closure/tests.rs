use super::*;
use crate::test_utils::{CallLog, object_type};
use crate::types::Object;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn counting_notifier(counter: &Arc<AtomicUsize>) -> NotifyFn {
    let counter = counter.clone();
    Arc::new(move |_: &Closure| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn logging_notifier(log: &CallLog, entry: &'static str) -> NotifyFn {
    let log = log.clone();
    Arc::new(move |_: &Closure| log.push(entry))
}

fn answer() -> Closure {
    let closure = Closure::from_fn(|_| Value::Int(42));
    closure.set_marshal(marshal::generic());
    closure
}

#[test]
fn test_new_closure_is_floating() {
    let closure = Closure::new(None);
    assert_eq!(closure.ref_count(), 1);
    assert!(closure.is_floating());
    assert!(!closure.is_invalid());
    assert!(closure.needs_marshal());
}

#[test]
fn test_ref_unref_balance_finalizes_once() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let closure = Closure::from_fn(|_| Value::None);
    closure.add_finalize_notifier(counting_notifier(&finalized));
    closure.add_finalize_notifier(counting_notifier(&finalized));

    closure.add_ref();
    closure.add_ref();
    assert_eq!(closure.ref_count(), 3);
    closure.unref();
    closure.unref();
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    assert!(!closure.is_invalid());

    closure.unref();
    assert_eq!(closure.ref_count(), 0);
    assert_eq!(finalized.load(Ordering::SeqCst), 2);
    assert!(closure.callback().is_none());

    // Unref past zero is refused
    closure.unref();
    assert_eq!(finalized.load(Ordering::SeqCst), 2);
}

#[test]
fn test_sink_is_idempotent() {
    let closure = Closure::from_fn(|_| Value::None);
    closure.add_ref();
    closure.sink();
    assert!(!closure.is_floating());
    assert_eq!(closure.ref_count(), 1);

    closure.sink();
    assert_eq!(closure.ref_count(), 1);
    assert!(!closure.is_invalid());
}

#[test]
fn test_invalidate_runs_notifiers_once() {
    let invalidated = Arc::new(AtomicUsize::new(0));
    let closure = Closure::from_fn(|_| Value::None);
    closure.add_invalidate_notifier(counting_notifier(&invalidated));

    for _ in 0..5 {
        closure.invalidate();
    }
    assert!(closure.is_invalid());
    assert_eq!(invalidated.load(Ordering::SeqCst), 1);
    assert_eq!(closure.ref_count(), 1);
}

#[test]
fn test_last_unref_invalidates_before_finalizing() {
    let log = CallLog::new();
    let closure = Closure::from_fn(|_| Value::None);
    closure.add_finalize_notifier(logging_notifier(&log, "finalize"));
    closure.add_invalidate_notifier(logging_notifier(&log, "invalidate"));

    closure.sink();
    assert_eq!(log.entries(), vec!["invalidate", "finalize"]);
}

#[test]
fn test_invoke_uses_marshal_and_return_slot() {
    let closure = answer();
    let mut result = Value::None;
    closure.invoke(Some(&mut result), &[], None);
    assert_eq!(result, Value::Int(42));
    assert_eq!(closure.ref_count(), 1);
    assert!(!closure.in_marshal());
}

#[test]
fn test_invoke_on_invalid_closure_is_noop() {
    let closure = answer();
    closure.invalidate();
    let mut result = Value::Int(7);
    closure.invoke(Some(&mut result), &[], None);
    assert_eq!(result, Value::Int(7));
}

#[test]
fn test_void_marshal_discards_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let closure = Closure::from_fn(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Value::Int(1)
    });
    closure.set_marshal(marshal::void());
    let mut result = Value::None;
    closure.invoke(Some(&mut result), &[], None);
    assert_eq!(result, Value::None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_set_marshal_keeps_first() {
    let closure = answer();
    closure.set_marshal(marshal::void());
    assert!(marshal::is_generic(&closure.marshal().unwrap()));

    // Same marshal again is accepted silently
    closure.set_marshal(marshal::generic());
    assert!(marshal::is_generic(&closure.marshal().unwrap()));
}

#[test]
fn test_meta_marshal_takes_over() {
    let closure = answer();
    let meta: MarshalFn = Arc::new(|closure: &Closure, invocation: Invocation<'_>| {
        let offset = invocation
            .marshal_data
            .and_then(|data| data.downcast_ref::<i64>())
            .copied()
            .unwrap_or_default();
        let mut inner = Value::None;
        if let Some(marshal) = closure.marshal() {
            marshal(
                closure,
                Invocation {
                    return_value: Some(&mut inner),
                    params: invocation.params,
                    hint: invocation.hint,
                    marshal_data: None,
                },
            );
        }
        if let Some(slot) = invocation.return_value {
            *slot = Value::Int(inner.get_int().unwrap_or_default() + offset);
        }
    });
    closure.set_meta_marshal(Arc::new(100i64), meta.clone());
    assert!(closure.has_meta_marshal());

    let mut result = Value::None;
    closure.invoke(Some(&mut result), &[], None);
    assert_eq!(result, Value::Int(142));

    // A second meta marshal is refused
    closure.set_meta_marshal(Arc::new(0i64), meta);
    closure.invoke(Some(&mut result), &[], None);
    assert_eq!(result, Value::Int(142));
}

#[test]
fn test_guards_wrap_outermost_invocation_only() {
    let log = CallLog::new();
    let cell: Arc<Mutex<Option<Closure>>> = Arc::new(Mutex::new(None));
    let depth = Arc::new(AtomicUsize::new(0));

    let inner_cell = cell.clone();
    let inner_log = log.clone();
    let closure = Closure::from_fn(move |_| {
        inner_log.push("body");
        if depth.fetch_add(1, Ordering::SeqCst) == 0 {
            let me = inner_cell.lock().clone();
            if let Some(me) = me {
                me.invoke(None, &[], None);
            }
        }
        Value::None
    });
    closure.set_marshal(marshal::generic());
    closure.add_marshal_guards(logging_notifier(&log, "pre"), logging_notifier(&log, "post"));
    *cell.lock() = Some(closure.clone());

    closure.invoke(None, &[], None);
    assert_eq!(log.entries(), vec!["pre", "body", "body", "post"]);
    assert!(!closure.in_marshal());
}

#[test]
#[should_panic(expected = "guard count overflow")]
fn test_guard_overflow_is_fatal() {
    let closure = answer();
    let noop: NotifyFn = Arc::new(|_: &Closure| {});
    closure.add_marshal_guards(noop.clone(), noop.clone());
    closure.add_marshal_guards(noop.clone(), noop);
}

#[test]
#[should_panic(expected = "finalize notifier count overflow")]
fn test_finalize_notifier_overflow_is_fatal() {
    let closure = answer();
    for _ in 0..=state::MAX_FNOTIFIERS {
        closure.add_finalize_notifier(Arc::new(|_: &Closure| {}));
    }
}

#[test]
fn test_remove_notifiers() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let invalidated = Arc::new(AtomicUsize::new(0));
    let closure = Closure::from_fn(|_| Value::None);

    let keep = counting_notifier(&finalized);
    let drop_me = counting_notifier(&finalized);
    let inotify = counting_notifier(&invalidated);
    closure.add_finalize_notifier(keep);
    closure.add_finalize_notifier(drop_me.clone());
    closure.add_invalidate_notifier(inotify.clone());

    closure.remove_finalize_notifier(&drop_me);
    closure.remove_invalidate_notifier(&inotify);
    // Unknown notifiers are reported and ignored
    closure.remove_invalidate_notifier(&inotify);
    closure.remove_finalize_notifier(&counting_notifier(&finalized));

    closure.sink();
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
    assert_eq!(invalidated.load(Ordering::SeqCst), 0);
}

#[test]
fn test_invalidate_notifier_may_remove_itself() {
    let log = CallLog::new();
    let closure = Closure::from_fn(|_| Value::None);
    let cell: Arc<Mutex<Option<NotifyFn>>> = Arc::new(Mutex::new(None));

    let own = cell.clone();
    let entry_log = log.clone();
    let notifier: NotifyFn = Arc::new(move |closure: &Closure| {
        entry_log.push("self-removing");
        let me = own.lock().clone();
        if let Some(me) = me {
            closure.remove_invalidate_notifier(&me);
        }
    });
    *cell.lock() = Some(notifier.clone());
    closure.add_invalidate_notifier(logging_notifier(&log, "other"));
    closure.add_invalidate_notifier(notifier);

    closure.invalidate();
    assert_eq!(log.entries(), vec!["self-removing", "other"]);
}

#[test]
fn test_invalidate_notifier_may_remove_pending_one() {
    let log = CallLog::new();
    let closure = Closure::from_fn(|_| Value::None);
    let pending = logging_notifier(&log, "pending");

    let target = pending.clone();
    let entry_log = log.clone();
    let remover: NotifyFn = Arc::new(move |closure: &Closure| {
        entry_log.push("remover");
        closure.remove_invalidate_notifier(&target);
    });
    closure.add_invalidate_notifier(pending.clone());
    closure.add_invalidate_notifier(remover);

    closure.invalidate();
    assert_eq!(log.entries(), vec!["remover"]);
    assert_eq!(log.count("pending"), 0);

    // Already gone, so this is reported and ignored
    closure.remove_invalidate_notifier(&pending);
    closure.sink();
    assert_eq!(log.count("pending"), 0);
}

#[test]
fn test_invalidate_notifier_cannot_add_another() {
    let log = CallLog::new();
    let closure = Closure::from_fn(|_| Value::None);

    let late = logging_notifier(&log, "late");
    let entry_log = log.clone();
    closure.add_invalidate_notifier(Arc::new(move |closure: &Closure| {
        entry_log.push("adder");
        closure.add_invalidate_notifier(late.clone());
    }));

    closure.invalidate();
    closure.invalidate();
    closure.sink();
    assert_eq!(log.entries(), vec!["adder"]);
}

#[test]
fn test_finalize_notifier_may_remove_itself() {
    let log = CallLog::new();
    let closure = Closure::from_fn(|_| Value::None);
    let cell: Arc<Mutex<Option<NotifyFn>>> = Arc::new(Mutex::new(None));
    let pending = logging_notifier(&log, "pending");

    let own = cell.clone();
    let target = pending.clone();
    let entry_log = log.clone();
    let notifier: NotifyFn = Arc::new(move |closure: &Closure| {
        entry_log.push("self-removing");
        let me = own.lock().take();
        if let Some(me) = me {
            closure.remove_finalize_notifier(&me);
        }
        closure.remove_finalize_notifier(&target);
    });
    *cell.lock() = Some(notifier.clone());
    closure.add_finalize_notifier(logging_notifier(&log, "other"));
    closure.add_finalize_notifier(pending);
    closure.add_finalize_notifier(notifier);

    closure.sink();
    assert_eq!(log.count("self-removing"), 1);
    assert_eq!(log.count("pending"), 0);
    assert_eq!(log.entries(), vec!["self-removing", "other"]);
}

#[test]
fn test_notifiers_cannot_be_added_to_invalid_closure() {
    let invalidated = Arc::new(AtomicUsize::new(0));
    let closure = answer();
    closure.invalidate();
    closure.add_invalidate_notifier(counting_notifier(&invalidated));
    closure.invalidate();
    assert_eq!(invalidated.load(Ordering::SeqCst), 0);
}

#[test]
fn test_swapped_closure_moves_instance_last() {
    let closure = Closure::from_fn_swap(|params| params[0].clone());
    closure.set_marshal(marshal::generic());
    let mut result = Value::None;
    closure.invoke(
        Some(&mut result),
        &[Value::from("instance"), Value::from(5)],
        None,
    );
    assert_eq!(result, Value::Int(5));
    assert!(closure.is_swapped());
}

#[test]
fn test_class_vfunc_closure_resolves_at_invocation() {
    let base = object_type("ClosureBase");
    let derived =
        Type::register_object(&crate::test_utils::unique_name("ClosureDerived"), base).unwrap();
    base.set_class_vfunc("describe", Arc::new(|_: &[Value]| Value::from("base")))
        .unwrap();

    let closure = Closure::class_vfunc(base, "describe");
    closure.set_marshal(marshal::generic());
    assert_eq!(closure.class_slot(), Some(Quark::intern("describe")));

    let instance = Object::new(derived).unwrap();
    let mut result = Value::None;
    closure.invoke(Some(&mut result), &[Value::from(&instance)], None);
    assert_eq!(result, Value::from("base"));

    derived
        .set_class_vfunc("describe", Arc::new(|_: &[Value]| Value::from("derived")))
        .unwrap();
    closure.invoke(Some(&mut result), &[Value::from(&instance)], None);
    assert_eq!(result, Value::from("derived"));
}

#[test]
fn test_concurrent_ref_unref() {
    let finalized = Arc::new(AtomicUsize::new(0));
    let closure = answer();
    closure.add_finalize_notifier(counting_notifier(&finalized));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let closure = closure.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    closure.add_ref();
                    let mut result = Value::None;
                    closure.invoke(Some(&mut result), &[], None);
                    closure.unref();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(closure.ref_count(), 1);
    assert_eq!(finalized.load(Ordering::SeqCst), 0);
    closure.unref();
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}
