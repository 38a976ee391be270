//! Keras to HLS Compiler
//!
//! This library compiles Keras-style `model.add(...)` layer declarations into
//! an HLS-friendly C++ `forward` function plus the `data-types.h` header it
//! depends on.
//!
//! # Example
//!
//! ```rust
//! use keras_to_hls::{compile, GenerationConfig};
//!
//! let source = "model.add(Flatten(input_shape=(4, 4, 1)))\nmodel.add(Dense(10, activation='softmax'))";
//! let program = compile(source, &GenerationConfig::default(), &[]).unwrap();
//! assert!(program.forward_source.contains("void forward("));
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod analyzer;
pub mod diagnostic;
pub mod loop_order;
pub mod placement;
pub mod config;
pub mod codegen;
pub mod headers;
pub mod program;
pub mod error;

use std::path::Path;

pub use ast::*;
pub use parser::Parser;
pub use analyzer::Analyzer;
pub use codegen::CodeGenerator;
pub use config::{GenerationConfig, Options};
pub use diagnostic::{Diagnostic, Diagnostics, Severity};
pub use placement::{NetworkProfile, Placement};
pub use program::GeneratedProgram;
pub use error::{CompileError, CompileResult};

/// Parse and analyze a model, returning the completed network.
///
/// Warnings come back alongside the network; any error diagnostic rejects
/// the model.
pub fn build_network(source: &str) -> CompileResult<(Network, Diagnostics)> {
    let (model, mut diagnostics) = Parser::new(source).parse_model();

    let mut analyzer = Analyzer::new();
    let network = match analyzer.analyze(model) {
        Ok(network) => network,
        // parse errors usually explain a failed inference, report them together
        Err(e) if diagnostics.has_errors() => {
            diagnostics.error(None, e.to_string());
            return Err(CompileError::Rejected { diagnostics });
        }
        Err(e) => return Err(e),
    };
    diagnostics.extend(analyzer.into_diagnostics());

    if diagnostics.has_errors() {
        return Err(CompileError::Rejected { diagnostics });
    }
    Ok((network, diagnostics))
}

/// Main compilation function: model source in, generated C++ out
pub fn compile(
    source: &str,
    config: &GenerationConfig,
    loop_orders: &[String],
) -> CompileResult<GeneratedProgram> {
    let (network, mut diagnostics) = build_network(source)?;

    let orders = loop_order::normalize(&network, loop_orders, &mut diagnostics);
    let config = config.resolve(&network, &orders, &mut diagnostics);
    if diagnostics.has_errors() {
        return Err(CompileError::Rejected { diagnostics });
    }

    let codegen = CodeGenerator::new(config);
    let forward_source = codegen.generate(&network, &orders)?;
    let data_types_header = headers::data_types_header(codegen.config(), &network);
    tracing::info!(
        "Generated {} layer(s) with {} warning(s)",
        network.len(),
        diagnostics.warning_count()
    );

    Ok(GeneratedProgram {
        forward_source,
        data_types_header,
        network,
        loop_orders: orders,
        diagnostics,
    })
}

/// Compile a model read from a file
pub fn compile_file(
    path: &Path,
    config: &GenerationConfig,
    loop_orders: &[String],
) -> CompileResult<GeneratedProgram> {
    let source = std::fs::read_to_string(path).map_err(|e| CompileError::unreadable(path, e))?;
    tracing::info!("Source file: {}", path.display());
    compile(&source, config, loop_orders)
}

/// Compile using an options set. Inline source text wins over a source file.
pub fn compile_options(options: &Options) -> CompileResult<GeneratedProgram> {
    let config = options.generation_config()?;
    let loop_orders = options.loop_orders();
    match (options.source_text(), &options.keras_source_file) {
        (Some(text), _) => compile(&text, &config, &loop_orders),
        (None, Some(path)) => compile_file(path, &config, &loop_orders),
        (None, None) => Err(CompileError::config(
            "no model given; set keras-source-file or keras-source-text",
        )),
    }
}
