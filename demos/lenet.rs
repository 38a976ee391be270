//! Example: LeNet-5
//!
//! Compiles the classic LeNet-5 declaration with default options and walks
//! through each pipeline stage.
//!
//! Run with: cargo run --example lenet

use keras_to_hls::{compile, Analyzer, GenerationConfig, Parser};

const LENET: &str = "model.add(Conv2D(filters=6, kernel_size=(5,5), padding='valid', activation='relu', input_shape=(28,28,1)))
model.add(MaxPooling2D(pool_size=(2,2)))
model.add(Conv2D(filters=16, kernel_size=(5,5), activation='relu'))
model.add(MaxPooling2D(pool_size=(2,2)))
model.add(Flatten())
model.add(Dense(120, activation='relu'))
model.add(Dense(84, activation='relu'))
model.add(Dense(10, activation='softmax'))
";

fn main() {
    println!("=== LeNet-5 Example ===\n");

    // Step 1: parse and infer shapes by hand
    let (model, diagnostics) = Parser::new(LENET).parse_model();
    println!("Parsed {} layer(s), {} diagnostic(s)\n", model.layers.len(), diagnostics.len());

    let mut analyzer = Analyzer::new();
    let network = analyzer.analyze(model).unwrap();
    println!("Inferred layer table:");
    println!("{}", network);

    // Step 2: the same thing through the one-call pipeline
    let program = compile(LENET, &GenerationConfig::default(), &[]).unwrap();
    println!("{}", program);

    println!("--- main.cpp ---");
    println!("{}", program.forward_source);
    println!("--- data-types.h ---");
    println!("{}", program.data_types_header);
}
