//! The result of a successful compilation

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::Network;
use crate::diagnostic::Diagnostics;
use crate::error::{CompileError, CompileResult};

pub const FORWARD_FILE: &str = "main.cpp";
pub const DATA_TYPES_FILE: &str = "data-types.h";

/// Generated sources plus everything needed to explain them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedProgram {
    /// `main.cpp` contents
    pub forward_source: String,
    /// `data-types.h` contents
    pub data_types_header: String,
    pub network: Network,
    /// Normalized loop order of each layer
    pub loop_orders: Vec<String>,
    /// Warnings and notes collected along the way
    pub diagnostics: Diagnostics,
}

impl GeneratedProgram {
    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write both generated files into `directory`, creating it if needed
    pub fn write_to(&self, directory: &Path) -> CompileResult<Vec<PathBuf>> {
        std::fs::create_dir_all(directory).map_err(|e| CompileError::unwritable(directory, e))?;

        let mut written = Vec::new();
        for (name, contents) in [
            (FORWARD_FILE, &self.forward_source),
            (DATA_TYPES_FILE, &self.data_types_header),
        ] {
            let path = directory.join(name);
            std::fs::write(&path, contents).map_err(|e| CompileError::unwritable(&path, e))?;
            tracing::info!("Wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

impl fmt::Display for GeneratedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Generated Program")?;
        writeln!(f, "=================")?;
        writeln!(f, "Layers: {}", self.network.len())?;
        if let (Some(first), Some(last)) = (self.network.layers.first(), self.network.layers.last()) {
            writeln!(f, "Input: {}", first.input)?;
            writeln!(f, "Output: {}", last.output)?;
        }
        writeln!(
            f,
            "Diagnostics: {} warning(s)",
            self.diagnostics.warning_count()
        )?;
        writeln!(f)?;

        for (index, (layer, order)) in self.network.layers.iter().zip(&self.loop_orders).enumerate() {
            writeln!(
                f,
                "Layer {}: {} {} -> {} [{}]",
                index + 1,
                layer.kind.name(),
                layer.input,
                layer.output,
                order
            )?;
        }
        writeln!(f)?;
        writeln!(f, "{}: {} bytes", FORWARD_FILE, self.forward_source.len())?;
        writeln!(f, "{}: {} bytes", DATA_TYPES_FILE, self.data_types_header.len())?;
        Ok(())
    }
}
