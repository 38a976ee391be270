//! Example: Custom Loop Orders
//!
//! Shows how Conv2D loop orders select the scalar, vector and tile
//! accumulator schedules, and how malformed orders fall back to the
//! default with a warning.
//!
//! Run with: cargo run --example custom_loop_orders

use keras_to_hls::loop_order::ConvSchedule;
use keras_to_hls::{compile, GenerationConfig};

const MODEL: &str = "model.add(Conv2D(filters=8, kernel_size=(3,3), activation='relu', input_shape=(16,16,3)))
model.add(Conv2D(filters=8, kernel_size=(3,3), padding='same', activation='relu'))
model.add(MaxPooling2D(pool_size=(2,2)))
model.add(Flatten())
model.add(Dense(10, activation='softmax'))
";

fn main() {
    println!("=== Custom Loop Orders Example ===\n");

    for order in ["oz-oy-ox-iz-kx-ky", "oz-ox-iz-oy-kx-ky", "oz-iz-oy-ox-kx-ky"] {
        let schedule = ConvSchedule::from_order(1, order).unwrap();
        println!(
            "{:<20} {:?}: outer {:?}, accumulator over {:?}",
            order, schedule.strategy, schedule.outer, schedule.retained
        );
    }
    println!();

    let orders: Vec<String> = [
        "oz-ox-iz-oy-kx-ky",
        "oz-iz-ox-oy-kx-ky",
        "oz-ox-oy-ky-kx",
        "oz-oy-ox",
        "ox-ix",
    ]
    .iter()
    .map(|order| order.to_string())
    .collect();
    let program = compile(MODEL, &GenerationConfig::default(), &orders).unwrap();
    println!("Normalized orders: {:?}\n", program.loop_orders);

    // A Conv2D order that does not start with oz is replaced by the default
    let mut bad = orders.clone();
    bad[0] = "iz-oz-oy-ox-kx-ky".to_string();
    let fallback = compile(MODEL, &GenerationConfig::default(), &bad).unwrap();
    for diagnostic in fallback.diagnostics.iter() {
        println!("{}", diagnostic);
    }
    println!();

    println!("{}", program.forward_source);
}
