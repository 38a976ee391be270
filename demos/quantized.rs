//! Example: 8-bit Quantized Network with Approximate Multipliers
//!
//! Builds the generation options from an options JSON document, as a
//! design-space exploration script would.
//!
//! Run with: cargo run --example quantized

use keras_to_hls::{compile_options, Options};

const OPTIONS: &str = r#"{
    "keras-source-text": [
        "model.add(Conv2D(filters=4, kernel_size=(3,3), activation='relu', input_shape=(12,12,1)))",
        "model.add(MaxPooling2D(pool_size=(2,2)))",
        "model.add(Flatten())",
        "model.add(Dense(10, activation='softmax'))"
    ],
    "data-type-mode": "fixed-point-single",
    "data-type-mode-detail": "eight-bit-int",
    "approximate-multipliers": "ACTIVE",
    "approximate-multipliers-configuration": "10",
    "approximate-multipliers-type": "mul8s_1L2H",
    "add-main-function": true,
    "fault-simulation": "ACTIVE"
}"#;

fn main() {
    println!("=== Quantized Example ===\n");

    let options = Options::from_json(OPTIONS).unwrap();
    let program = compile_options(&options).unwrap();

    println!("{}", program);
    println!("--- data-types.h ---");
    println!("{}", program.data_types_header);
    println!("--- main.cpp ---");
    println!("{}", program.forward_source);
}
