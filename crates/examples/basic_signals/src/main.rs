use relay::prelude::*;
use tracing::{info, level_filters::LevelFilter};

fn main() {
    diagnostics::install(&DiagnosticsConfig::new().level(LevelFilter::INFO));

    let button = Type::register_object("Button", Type::OBJECT).expect("fresh type name");
    let clicked = SignalBuilder::new("clicked", button)
        .flags(SignalFlags::RUN_LAST)
        .param(Type::UINT)
        .class_handler(|_| {
            println!("  [class] default click handling");
            Value::None
        })
        .build()
        .expect("valid signal");
    let notify = SignalBuilder::new("notify", button)
        .flags(SignalFlags::RUN_FIRST | SignalFlags::DETAILED)
        .build()
        .expect("valid signal");

    let ok_button = Object::new(button).expect("Button is instantiatable");

    // Before the class handler
    let logger = connect(&ok_button, "clicked", |params| {
        let clicks = params[1].get_uint().unwrap_or_default();
        println!("  [logger] clicked {clicks} time(s)");
        Value::None
    })
    .expect("clicked is a Button signal");

    // After the class handler
    connect_after(&ok_button, "clicked", |_| {
        println!("  [after] closing dialog");
        Value::None
    });

    // Anything the callback returns is discarded
    let counter = Closure::from_fn(|_| {
        println!("  [counter] click counted");
        Value::Bool(true)
    });
    counter.set_marshal(marshal::void());
    connect_closure(&ok_button, "clicked", &counter, true);

    println!("Emitting 'clicked':");
    emit(&ok_button, clicked, None, &[Value::from(1u32)]);

    println!("Emitting 'clicked' with the logger blocked:");
    handler_block(&ok_button, logger);
    emit(&ok_button, clicked, None, &[Value::from(2u32)]);
    handler_unblock(&ok_button, logger);

    println!("Emitting 'clicked' after disconnecting the logger:");
    handler_disconnect(&ok_button, logger);
    emit_by_name(&ok_button, "clicked", &[Value::from(3u32)]);

    connect(&ok_button, "notify::label", |_| {
        println!("  [notify] label changed");
        Value::None
    });
    connect(&ok_button, "notify", |params| {
        let detail = params[0]
            .get_object()
            .and_then(get_invocation_hint)
            .and_then(|hint| hint.detail);
        match detail {
            Some(detail) => println!("  [notify] something changed: {detail}"),
            None => println!("  [notify] something changed"),
        }
        Value::None
    });

    println!("Emitting 'notify::label' then 'notify::width':");
    emit_by_name(&ok_button, "notify::label", &[]);
    emit(&ok_button, notify, Some(Quark::intern("width")), &[]);

    info!(
        pending = has_handler_pending(&ok_button, clicked, None, false),
        "done"
    );
}
