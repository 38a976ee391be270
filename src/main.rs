//! Keras to HLS Compiler CLI
//!
//! Usage:
//!   keras2hls model.txt --output-dir out/
//!   keras2hls --options options.json
//!   keras2hls --text "model.add(Flatten(input_shape=(4,4,1)))#model.add(Dense(10))" --json

use clap::Parser as ClapParser;
use colored::Colorize;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keras_to_hls::config::{Count, Flag, TextOrLines};
use keras_to_hls::{
    build_network, compile_options, CompileError, Diagnostics, GeneratedProgram, Options, Severity,
};

#[derive(ClapParser, Debug)]
#[command(name = "keras2hls")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Compiles Keras-style layer declarations to an HLS C++ forward pass")]
struct Args {
    /// Model source file
    #[arg(value_name = "FILE")]
    input_file: Option<PathBuf>,

    /// Inline model source, '#' separates declarations
    #[arg(short = 't', long = "text")]
    text: Option<String>,

    /// Options JSON file; command line flags override its values
    #[arg(short = 'c', long = "options")]
    options_file: Option<PathBuf>,

    /// Directory receiving main.cpp and data-types.h
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Network profile (lenet, vgg, vgg-scalehls, alexnet, ...)
    #[arg(long = "network-name")]
    network_name: Option<String>,

    /// Where intermediate buffers live: local or port
    #[arg(long = "layer-data-location")]
    layer_data_location: Option<String>,

    /// floating-point, fixed-point-single, fixed-point-multi or all-modes
    #[arg(long = "data-type-mode")]
    data_type_mode: Option<String>,

    /// e.g. eight-bit-int for 8-bit quantization
    #[arg(long = "data-type-mode-detail")]
    data_type_mode_detail: Option<String>,

    /// Loop label style: numbers or names
    #[arg(long = "loop-labels")]
    loop_labels: Option<String>,

    /// Generate only this layer (1-based)
    #[arg(long = "single-layer")]
    single_layer: Option<usize>,

    /// One loop order per layer, '#' separated
    #[arg(long = "loop-orders")]
    loop_orders: Option<String>,

    /// Per-layer approximate multiplier mask, e.g. 0110
    #[arg(long = "approximate-multipliers-configuration")]
    approximate_multipliers_configuration: Option<String>,

    /// Multiplier used by approximate layers
    #[arg(long = "approximate-multipliers-type")]
    approximate_multipliers_type: Option<String>,

    /// Initial running maximum for pooling after unbounded activations
    #[arg(long = "pooling-minimum", allow_hyphen_values = true)]
    pooling_minimum: Option<i64>,

    #[arg(long = "approximate-multipliers")]
    approximate_multipliers: bool,

    #[arg(long = "store-analysis-data")]
    store_analysis_data: bool,

    #[arg(long = "disable-biases")]
    disable_biases: bool,

    #[arg(long = "add-main-function")]
    add_main_function: bool,

    #[arg(long = "fault-simulation")]
    fault_simulation: bool,

    /// Print the inferred layer table and stop
    #[arg(long = "dump-layers")]
    dump_layers: bool,

    /// Output as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Args {
    /// Command line values as an options set. Unset flags stay `None` so they
    /// never override the options file.
    fn overrides(&self) -> Options {
        let flag = |set: bool| set.then_some(Flag::Bool(true));
        Options {
            keras_source_file: self.input_file.clone(),
            keras_source_text: self
                .text
                .as_ref()
                .map(|text| TextOrLines::Text(text.replace('#', "\n"))),
            output_directory: self.output_dir.clone(),
            network_name: self.network_name.clone(),
            layer_data_location: self.layer_data_location.clone(),
            data_type_mode: self.data_type_mode.clone(),
            data_type_mode_detail: self.data_type_mode_detail.clone(),
            loop_hierarchy_labels: self.loop_labels.clone(),
            single_layer: self.single_layer.map(Count::Number),
            loop_orders: self.loop_orders.clone().map(TextOrLines::Text),
            approximate_multipliers_configuration: self.approximate_multipliers_configuration.clone(),
            approximate_multipliers_type: self.approximate_multipliers_type.clone(),
            pooling_minimum: self.pooling_minimum,
            store_analysis_data: flag(self.store_analysis_data),
            disable_biases: flag(self.disable_biases),
            add_main_function: flag(self.add_main_function),
            dump_layers: flag(self.dump_layers),
            fault_simulation: flag(self.fault_simulation),
            approximate_multipliers: flag(self.approximate_multipliers),
        }
    }
}

fn main() {
    let args = Args::parse();

    let filter = if args.verbose {
        "keras_to_hls=debug,info"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let base = match &args.options_file {
        Some(path) => Options::from_file(path).unwrap_or_else(|e| fail(&e)),
        None => Options::default(),
    };
    let mut options = base.merge(args.overrides());

    // Read from stdin when no model was named anywhere
    if options.keras_source_text.is_none() && options.keras_source_file.is_none() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).unwrap_or_else(|e| {
            eprintln!("{}: Failed to read stdin: {}", "Error".red(), e);
            std::process::exit(1);
        });
        options.keras_source_text = Some(TextOrLines::Text(buffer));
    }

    if options.dump_layers() {
        dump_layers(&options);
        return;
    }

    let program = compile_options(&options).unwrap_or_else(|e| fail(&e));
    print_diagnostics(&program.diagnostics);

    if let Some(directory) = &options.output_directory {
        if let Err(e) = program.write_to(directory) {
            fail(&e);
        }
    }

    if args.json_output {
        match program.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else if options.output_directory.is_some() {
        print_summary(&program, args.verbose);
    } else {
        print!("{}", program.forward_source);
    }
}

fn dump_layers(options: &Options) {
    let source = match (options.source_text(), &options.keras_source_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .unwrap_or_else(|e| fail(&CompileError::unreadable(path, e))),
        (None, None) => String::new(),
    };
    match build_network(&source) {
        Ok((network, diagnostics)) => {
            print_diagnostics(&diagnostics);
            print!("{}", network);
        }
        Err(e) => fail(&e),
    }
}

fn fail(error: &CompileError) -> ! {
    match error.diagnostics() {
        Some(diagnostics) => {
            print_diagnostics(diagnostics);
            eprintln!("{}: {}", "Compilation error".red(), error);
        }
        None => eprintln!("{}: {}", "Compilation error".red(), error),
    }
    std::process::exit(1);
}

fn print_diagnostics(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.iter() {
        let label = match diagnostic.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
            Severity::Info => "info".cyan(),
        };
        match &diagnostic.location {
            Some(location) => eprintln!("{}: {}: {}", label, location, diagnostic.message),
            None => eprintln!("{}: {}", label, diagnostic.message),
        }
    }
}

fn print_summary(program: &GeneratedProgram, verbose: bool) {
    println!("{}", "Compilation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}: {}", "Layers".cyan(), program.network.len());
    if let Some(input) = program.network.input() {
        println!("{}: {}", "Input".cyan(), input);
    }
    if let Some(last) = program.network.layers.last() {
        println!("{}: {}", "Output".cyan(), last.output);
    }
    println!(
        "{}: {} warning(s)",
        "Diagnostics".cyan(),
        program.diagnostics.warning_count()
    );
    println!();

    if verbose {
        println!("{}", "Layer Details".bold().yellow());
        println!("{}", "-".repeat(50));
        for (index, (layer, order)) in program
            .network
            .layers
            .iter()
            .zip(&program.loop_orders)
            .enumerate()
        {
            println!(
                "  {} {}: {} -> {} ({})",
                "Layer".bold(),
                (index + 1).to_string().bold(),
                layer.input,
                layer.output,
                order
            );
        }
    }
}
