fn main() {
    println!("Relay Examples");
    println!("==============");
    println!();
    println!("Run examples with: cargo run --bin <example_name>");
    println!("Available examples:");
    println!("  - basic_signals: Connecting, blocking and disconnecting handlers");
    println!("  - accumulator_showcase: Collecting handler return values");
    println!("  - chain_up_showcase: Overriding class handlers and chaining up");
    println!();
    println!("Set RUST_LOG=relay_core=trace to watch every emission stage.");
}
