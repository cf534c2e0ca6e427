use relay::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::level_filters::LevelFilter;

fn key_press(keyval: u32) -> [Value; 1] {
    [Value::from(keyval)]
}

fn main() {
    diagnostics::install(&DiagnosticsConfig::new().level(LevelFilter::WARN));

    let entry = Type::register_object("Entry", Type::OBJECT).expect("fresh type name");

    // Stops at the first handler that claims the event
    let key_pressed = SignalBuilder::new("key-pressed", entry)
        .flags(SignalFlags::RUN_LAST)
        .param(Type::UINT)
        .return_type(Type::BOOL)
        .class_handler(|_| {
            println!("  [class] inserting character");
            Value::Bool(true)
        })
        .accumulator(accumulator_true_handled)
        .build()
        .expect("valid signal");

    // Sums every contribution, class handler included
    let measure = SignalBuilder::new("measure", entry)
        .flags(SignalFlags::RUN_LAST)
        .return_type(Type::INT)
        .class_handler(|_| Value::Int(4))
        .accumulator(|hint: &InvocationHint, total: &mut Value, width: &Value| {
            let first = hint.run_type.contains(SignalFlags::ACCUMULATOR_FIRST_RUN);
            let sum = if first { 0 } else { total.get_int().unwrap_or(0) };
            *total = Value::Int(sum + width.get_int().unwrap_or(0));
            true
        })
        .build()
        .expect("valid signal");

    let entry_instance = Object::new(entry).expect("Entry is instantiatable");
    let read_only = Arc::new(AtomicBool::new(true));

    let guard = read_only.clone();
    connect(&entry_instance, "key-pressed", move |params| {
        let keyval = params[1].get_uint().unwrap_or_default();
        let swallow = guard.load(Ordering::SeqCst);
        println!("  [read-only guard] key {keyval}, swallowed: {swallow}");
        Value::Bool(swallow)
    });

    println!("Read-only entry:");
    let handled = emit(&entry_instance, key_pressed, None, &key_press(65));
    println!("  handled = {handled:?}");

    read_only.store(false, Ordering::SeqCst);
    println!("Editable entry:");
    let handled = emit(&entry_instance, key_pressed, None, &key_press(66));
    println!("  handled = {handled:?}");

    connect(&entry_instance, "measure", |_| Value::Int(10));
    connect_after(&entry_instance, "measure", |_| Value::Int(2));
    let width = emit(&entry_instance, measure, None, &[]);
    println!("Measured width: {width:?}");

    let hook = add_emission_hook(
        measure,
        None,
        |hint: &InvocationHint, _: &[Value]| {
            println!("  [hook] saw emission of signal {}", hint.signal_id);
            true
        },
        Some(Box::new(|| println!("  [hook] removed"))),
    )
    .expect("measure accepts hooks");
    emit(&entry_instance, measure, None, &[]);
    remove_emission_hook(measure, hook);
}
