//! Error types for the Keras to HLS compiler

use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::Diagnostics;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Cannot read source file '{}': {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write '{}': {source}", path.display())]
    OutputUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parser error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Shape error in layer {layer} (line {line}): {message}")]
    ShapeError {
        layer: usize,
        line: usize,
        message: String,
    },

    #[error("Unsupported loop order '{order}' for layer {layer}")]
    UnsupportedLoopOrder { layer: usize, order: String },

    #[error("Code generation error: {message}")]
    CodeGenError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Model rejected with {} error(s)", diagnostics.error_count())]
    Rejected { diagnostics: Diagnostics },
}

impl CompileError {
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompileError::SourceUnreadable {
            path: path.into(),
            source,
        }
    }

    pub fn unwritable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompileError::OutputUnwritable {
            path: path.into(),
            source,
        }
    }

    pub fn parse_error(line: usize, msg: impl Into<String>) -> Self {
        CompileError::ParseError {
            line,
            message: msg.into(),
        }
    }

    pub fn shape(layer: usize, line: usize, msg: impl Into<String>) -> Self {
        CompileError::ShapeError {
            layer,
            line,
            message: msg.into(),
        }
    }

    pub fn loop_order(layer: usize, order: impl Into<String>) -> Self {
        CompileError::UnsupportedLoopOrder {
            layer,
            order: order.into(),
        }
    }

    pub fn codegen(msg: impl Into<String>) -> Self {
        CompileError::CodeGenError {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::ConfigError {
            message: msg.into(),
        }
    }

    /// Diagnostics carried by a rejected model, if any
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            CompileError::Rejected { diagnostics } => Some(diagnostics),
            _ => None,
        }
    }
}
