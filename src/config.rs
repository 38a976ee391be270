//! Generation options
//!
//! [`Options`] mirrors the kebab-case options JSON file and the command line.
//! It is turned into an immutable [`GenerationConfig`], which is then resolved
//! against the analyzed network before any code is emitted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::{Activation, LayerKind, Network};
use crate::diagnostic::{Diagnostics, SourceLocation};
use crate::error::{CompileError, CompileResult};
use crate::loop_order;
use crate::placement::{NetworkProfile, Placement};

/// Numeric representations to emit type definitions for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataTypeMode {
    FloatingPoint,
    FixedPointSingle,
    FixedPointMulti,
    #[default]
    AllModes,
}

impl DataTypeMode {
    pub fn from_name(name: &str) -> CompileResult<Self> {
        match name {
            "floating-point" => Ok(DataTypeMode::FloatingPoint),
            "fixed-point-single" => Ok(DataTypeMode::FixedPointSingle),
            "fixed-point-multi" => Ok(DataTypeMode::FixedPointMulti),
            "all-modes" => Ok(DataTypeMode::AllModes),
            other => Err(CompileError::config(format!("unknown data-type-mode '{}'", other))),
        }
    }

    pub fn floating_point(&self) -> bool {
        matches!(self, DataTypeMode::FloatingPoint | DataTypeMode::AllModes)
    }

    pub fn fixed_point_single(&self) -> bool {
        matches!(self, DataTypeMode::FixedPointSingle | DataTypeMode::AllModes)
    }

    pub fn fixed_point_multi(&self) -> bool {
        matches!(self, DataTypeMode::FixedPointMulti | DataTypeMode::AllModes)
    }
}

/// Naming style for generated loop labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopLabels {
    Numbers,
    #[default]
    Names,
}

impl LoopLabels {
    pub fn from_name(name: &str) -> CompileResult<Self> {
        match name {
            "numbers" => Ok(LoopLabels::Numbers),
            "names" => Ok(LoopLabels::Names),
            other => Err(CompileError::config(format!(
                "unknown loop-hierarchy-labels '{}', expected numbers or names",
                other
            ))),
        }
    }
}

/// Per-layer approximate multiplier selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproximateMultipliers {
    /// One character per Conv2D/Dense layer, `1` selects the approximate multiplier
    pub layer_mask: String,
    pub multiplier_type: String,
}

impl Default for ApproximateMultipliers {
    fn default() -> Self {
        Self {
            layer_mask: String::new(),
            multiplier_type: "base".to_string(),
        }
    }
}

impl ApproximateMultipliers {
    /// Whether the weighted layer at `ordinal` uses the approximate multiplier
    pub fn is_approximate(&self, ordinal: usize) -> bool {
        self.layer_mask.chars().nth(ordinal) == Some('1')
    }

    /// Macro the approximate layers expand to
    pub fn macro_name(&self) -> String {
        match self.multiplier_type.as_str() {
            "base" => "MULTIPLIER_BASE".to_string(),
            "exact" => "MULTIPLIER_EXACT".to_string(),
            other => other.to_string(),
        }
    }
}

/// Everything that shapes the generated text. Immutable during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub data_type_mode: DataTypeMode,
    pub data_type_detail: Option<String>,
    pub biases_enabled: bool,
    pub approximate_multipliers: Option<ApproximateMultipliers>,
    pub fault_simulation: bool,
    pub store_analysis_data: bool,
    pub add_main_function: bool,
    /// 1-based layer to generate in isolation
    pub single_layer: Option<usize>,
    pub loop_labels: LoopLabels,
    pub network_name: Option<String>,
    pub layer_data_location: Option<Placement>,
    /// Seed for max pooling after layers whose activation has no known floor
    pub pooling_minimum: Option<i64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            data_type_mode: DataTypeMode::AllModes,
            data_type_detail: None,
            biases_enabled: true,
            approximate_multipliers: None,
            fault_simulation: false,
            store_analysis_data: false,
            add_main_function: false,
            single_layer: None,
            loop_labels: LoopLabels::Names,
            network_name: None,
            layer_data_location: None,
            pooling_minimum: None,
        }
    }
}

impl GenerationConfig {
    /// 8-bit affine quantization is active
    pub fn quantized(&self) -> bool {
        self.data_type_mode.fixed_point_single()
            && matches!(
                self.data_type_detail.as_deref(),
                Some("eight-bit-int") | Some("default_int8_t")
            )
    }

    pub fn profile(&self, network: &Network) -> NetworkProfile {
        NetworkProfile::identify(self.network_name.as_deref(), network)
    }

    /// Initial running maximum for the pooling layer at `index`
    pub fn pooling_seed(&self, network: &Network, index: usize) -> Option<i64> {
        let previous = index
            .checked_sub(1)
            .and_then(|i| network.layers.get(i))
            .map(|layer| layer.activation);
        match previous {
            Some(Activation::Relu) => Some(0),
            Some(Activation::Linear) if self.quantized() => Some(-128),
            _ => self.pooling_minimum,
        }
    }

    /// Settle option interactions against the analyzed network.
    ///
    /// Conflicting options are dropped with a warning; combinations that
    /// cannot be generated are recorded as errors.
    pub fn resolve(&self, network: &Network, loop_orders: &[String], diagnostics: &mut Diagnostics) -> GenerationConfig {
        let mut config = self.clone();

        let profile = config.profile(network);
        tracing::info!("Network profile: {}", profile);
        if profile == NetworkProfile::VggScalehls {
            diagnostics.info(None, "vgg-scalehls profile: biases disabled, fixed-point-single data types");
            config.biases_enabled = false;
            config.data_type_mode = DataTypeMode::FixedPointSingle;
        }

        if let Some(number) = config.single_layer {
            if number == 0 || number > network.len() {
                diagnostics.error(
                    None,
                    format!("single-layer {} is outside 1..={}", number, network.len()),
                );
            }
            if config.add_main_function {
                diagnostics.warning(None, "add-main-function ignored because single-layer is active");
                config.add_main_function = false;
            }
            if config.quantized() {
                diagnostics.error(None, "quantized data types cannot be combined with single-layer");
            }
        }

        if config.store_analysis_data && !config.add_main_function {
            diagnostics.warning(None, "store-analysis-data ignored because add-main-function is not active");
            config.store_analysis_data = false;
        }
        if config.fault_simulation && !config.add_main_function {
            diagnostics.warning(None, "fault-simulation ignored because add-main-function is not active");
            config.fault_simulation = false;
        }

        let customized = network
            .layers
            .iter()
            .zip(loop_orders)
            .any(|(layer, order)| !loop_order::is_default(&layer.kind, order));
        if config.store_analysis_data && customized {
            diagnostics.warning(None, "store-analysis-data ignored because custom loop orders are selected");
            config.store_analysis_data = false;
        }

        if let Some(multipliers) = config.approximate_multipliers.as_mut() {
            if let Some(bad) = multipliers.layer_mask.chars().find(|c| *c != '0' && *c != '1') {
                diagnostics.error(
                    None,
                    format!("approximate-multipliers-configuration may only contain 0 and 1, found '{}'", bad),
                );
            }
            let weighted = network.weighted_count();
            let given = multipliers.layer_mask.chars().count();
            if given < weighted {
                diagnostics.warning(
                    None,
                    format!(
                        "approximate-multipliers-configuration covers {} of {} Conv2D/Dense layers; the rest use the exact multiplier",
                        given, weighted
                    ),
                );
                multipliers.layer_mask.extend(std::iter::repeat('0').take(weighted - given));
            }
        }

        for (index, layer) in network.layers.iter().enumerate() {
            if matches!(layer.kind, LayerKind::Pooling2D { .. }) && config.pooling_seed(network, index).is_none() {
                diagnostics.error(
                    Some(SourceLocation::line(layer.line)),
                    format!(
                        "max pooling in layer {} has no known minimum for the previous layer's activation; set pooling-minimum",
                        index + 1
                    ),
                );
            }
        }

        config
    }
}

/// A flag given as `true`/`false` or as a string such as `"ACTIVE"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    pub fn is_set(&self) -> bool {
        match self {
            Flag::Bool(value) => *value,
            Flag::Text(text) => !matches!(text.to_ascii_lowercase().as_str(), "" | "false" | "inactive"),
        }
    }
}

/// A string value that may also be given as an array of lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrLines {
    Text(String),
    Lines(Vec<String>),
}

impl TextOrLines {
    pub fn joined(&self) -> String {
        match self {
            TextOrLines::Text(text) => text.clone(),
            TextOrLines::Lines(lines) => lines.join("\n"),
        }
    }
}

/// A count given as a number or a numeric string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Count {
    Number(usize),
    Text(String),
}

impl Count {
    pub fn value(&self) -> CompileResult<usize> {
        match self {
            Count::Number(n) => Ok(*n),
            Count::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| CompileError::config(format!("'{}' is not a layer number", text))),
        }
    }
}

/// Raw options, as read from an options JSON file or the command line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Options {
    pub keras_source_file: Option<PathBuf>,
    pub keras_source_text: Option<TextOrLines>,
    pub output_directory: Option<PathBuf>,
    pub network_name: Option<String>,
    pub layer_data_location: Option<String>,
    pub data_type_mode: Option<String>,
    pub data_type_mode_detail: Option<String>,
    pub loop_hierarchy_labels: Option<String>,
    pub single_layer: Option<Count>,
    pub loop_orders: Option<TextOrLines>,
    pub approximate_multipliers_configuration: Option<String>,
    pub approximate_multipliers_type: Option<String>,
    pub pooling_minimum: Option<i64>,
    pub store_analysis_data: Option<Flag>,
    pub disable_biases: Option<Flag>,
    pub add_main_function: Option<Flag>,
    pub dump_layers: Option<Flag>,
    pub fault_simulation: Option<Flag>,
    pub approximate_multipliers: Option<Flag>,
}

fn flag(value: &Option<Flag>) -> bool {
    value.as_ref().map(Flag::is_set).unwrap_or(false)
}

impl Options {
    pub fn from_json(text: &str) -> CompileResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| CompileError::config(format!("invalid options JSON: {}", e)))
    }

    pub fn from_file(path: &Path) -> CompileResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CompileError::unreadable(path, e))?;
        tracing::info!("Options file: {}", path.display());
        Self::from_json(&text)
    }

    /// Combine with higher-priority options; any value set in `overrides` wins
    pub fn merge(self, overrides: Options) -> Options {
        Options {
            keras_source_file: overrides.keras_source_file.or(self.keras_source_file),
            keras_source_text: overrides.keras_source_text.or(self.keras_source_text),
            output_directory: overrides.output_directory.or(self.output_directory),
            network_name: overrides.network_name.or(self.network_name),
            layer_data_location: overrides.layer_data_location.or(self.layer_data_location),
            data_type_mode: overrides.data_type_mode.or(self.data_type_mode),
            data_type_mode_detail: overrides.data_type_mode_detail.or(self.data_type_mode_detail),
            loop_hierarchy_labels: overrides.loop_hierarchy_labels.or(self.loop_hierarchy_labels),
            single_layer: overrides.single_layer.or(self.single_layer),
            loop_orders: overrides.loop_orders.or(self.loop_orders),
            approximate_multipliers_configuration: overrides
                .approximate_multipliers_configuration
                .or(self.approximate_multipliers_configuration),
            approximate_multipliers_type: overrides
                .approximate_multipliers_type
                .or(self.approximate_multipliers_type),
            pooling_minimum: overrides.pooling_minimum.or(self.pooling_minimum),
            store_analysis_data: overrides.store_analysis_data.or(self.store_analysis_data),
            disable_biases: overrides.disable_biases.or(self.disable_biases),
            add_main_function: overrides.add_main_function.or(self.add_main_function),
            dump_layers: overrides.dump_layers.or(self.dump_layers),
            fault_simulation: overrides.fault_simulation.or(self.fault_simulation),
            approximate_multipliers: overrides.approximate_multipliers.or(self.approximate_multipliers),
        }
    }

    /// Inline DSL source, one declaration per line
    pub fn source_text(&self) -> Option<String> {
        self.keras_source_text.as_ref().map(TextOrLines::joined)
    }

    /// Per-layer loop orders. `#` separates entries like a newline does.
    ///
    /// Empty entries are kept so every later order stays aligned with its layer.
    pub fn loop_orders(&self) -> Vec<String> {
        let entries: Vec<&str> = match &self.loop_orders {
            Some(TextOrLines::Text(text)) if text.trim().is_empty() => Vec::new(),
            Some(TextOrLines::Text(text)) => text
                .trim_end_matches(['\n', '\r'])
                .split(|c| c == '\n' || c == '#')
                .collect(),
            Some(TextOrLines::Lines(lines)) => lines.iter().flat_map(|line| line.split('#')).collect(),
            None => Vec::new(),
        };
        entries.into_iter().map(|order| order.trim().to_string()).collect()
    }

    pub fn dump_layers(&self) -> bool {
        flag(&self.dump_layers)
    }

    pub fn generation_config(&self) -> CompileResult<GenerationConfig> {
        let data_type_mode = match &self.data_type_mode {
            Some(name) => DataTypeMode::from_name(name)?,
            None => DataTypeMode::default(),
        };
        let loop_labels = match &self.loop_hierarchy_labels {
            Some(name) => LoopLabels::from_name(name)?,
            None => LoopLabels::default(),
        };
        let layer_data_location = self
            .layer_data_location
            .as_deref()
            .map(str::parse::<Placement>)
            .transpose()?;
        let single_layer = match &self.single_layer {
            Some(count) => Some(count.value()?).filter(|n| *n != 0),
            None => None,
        };

        let approximate_multipliers = if flag(&self.approximate_multipliers) {
            let mut multipliers = ApproximateMultipliers::default();
            if let Some(mask) = &self.approximate_multipliers_configuration {
                multipliers.layer_mask = mask.trim().to_string();
            }
            if let Some(name) = &self.approximate_multipliers_type {
                multipliers.multiplier_type = name.clone();
            }
            Some(multipliers)
        } else {
            None
        };

        Ok(GenerationConfig {
            data_type_mode,
            data_type_detail: self.data_type_mode_detail.clone(),
            biases_enabled: !flag(&self.disable_biases),
            approximate_multipliers,
            fault_simulation: flag(&self.fault_simulation),
            store_analysis_data: flag(&self.store_analysis_data),
            add_main_function: flag(&self.add_main_function),
            single_layer,
            loop_labels,
            network_name: self.network_name.clone().filter(|n| !n.is_empty()),
            layer_data_location,
            pooling_minimum: self.pooling_minimum,
        })
    }
}
