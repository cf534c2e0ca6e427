use relay::prelude::*;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;

fn chained_size(params: &[Value]) -> i64 {
    chain_from_overridden(params)
        .and_then(|value| value.get_int())
        .unwrap_or_default()
}

fn main() {
    diagnostics::install(&DiagnosticsConfig::new().level(LevelFilter::WARN));

    let widget = Type::register_object("Widget", Type::OBJECT).expect("fresh type name");
    let container = Type::register_object("Container", widget).expect("fresh type name");
    let frame = Type::register_object("Frame", container).expect("fresh type name");

    let size_request = SignalBuilder::new("size-request", widget)
        .flags(SignalFlags::RUN_LAST)
        .return_type(Type::INT)
        .class_handler(|_| {
            println!("  Widget: base size 1");
            Value::Int(1)
        })
        .build()
        .expect("valid signal");

    let container_handler: Callback = Arc::new(|params: &[Value]| {
        println!("  Container: adding border");
        Value::Int(chained_size(params) + 10)
    });
    override_class_handler("size-request", container, container_handler);

    let frame_handler: Callback = Arc::new(|params: &[Value]| {
        println!("  Frame: before chaining up");
        let inner = chained_size(params);
        println!("  Frame: after chaining up, inner size {inner}");
        Value::Int(inner + 100)
    });
    override_class_handler("size-request", frame, frame_handler);

    for (label, itype) in [("Widget", widget), ("Container", container), ("Frame", frame)] {
        let instance = Object::new(itype).expect("object types are instantiatable");
        println!("{label} size request:");
        let size = emit(&instance, size_request, None, &[]);
        println!("  => {size:?}");
    }

    if let Some(info) = query(size_request) {
        println!(
            "'{}' owned by {} returns {}",
            info.signal_name, info.itype, info.return_type
        );
    }
}
