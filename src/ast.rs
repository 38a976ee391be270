//! Layer declarations and the completed network model
//!
//! The parser produces [`LayerSpec`] values that carry only what the source
//! line said. Shape inference turns them into [`Layer`] values where every
//! geometry field is known.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 3-D tensor extent. Flat vectors are `(n, 1, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Volume {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn flat(nodes: usize) -> Self {
        Self::new(nodes, 1, 1)
    }

    /// Element count, `None` when it does not fit in `usize`
    pub fn elements(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    pub fn is_positive(&self) -> bool {
        self.x > 0 && self.y > 0 && self.z > 0
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Activation applied to a layer's output, ordered as emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    None,
    Relu,
    Softmax,
    Linear,
}

impl Activation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "relu" => Some(Activation::Relu),
            "softmax" => Some(Activation::Softmax),
            "linear" => Some(Activation::Linear),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::None => "",
            Activation::Relu => "relu",
            Activation::Softmax => "softmax",
            Activation::Linear => "linear",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    #[default]
    Valid,
    Same,
}

impl Padding {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "valid" => Some(Padding::Valid),
            "same" => Some(Padding::Same),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Padding::Valid => "valid",
            Padding::Same => "same",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingKind {
    Max,
    Average,
}

impl PoolingKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolingKind::Max => "Max",
            PoolingKind::Average => "Average",
        }
    }
}

/// Constructor-specific fields exactly as declared
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSpecKind {
    Conv2D {
        filters: Option<usize>,
        kernel: Option<(usize, usize)>,
        padding: Option<Padding>,
    },
    Pooling2D {
        pooling: PoolingKind,
        pool_size: Option<(usize, usize)>,
        padding: Option<Padding>,
    },
    Flatten,
    Dense {
        units: Option<usize>,
    },
}

impl LayerSpecKind {
    pub fn constructor(&self) -> &'static str {
        match self {
            LayerSpecKind::Conv2D { .. } => "Conv2D",
            LayerSpecKind::Pooling2D { pooling: PoolingKind::Max, .. } => "MaxPool2D",
            LayerSpecKind::Pooling2D { pooling: PoolingKind::Average, .. } => "AveragePooling2D",
            LayerSpecKind::Flatten => "Flatten",
            LayerSpecKind::Dense { .. } => "Dense",
        }
    }
}

/// One `model.add(...)` declaration before shape inference
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    /// 1-based source line
    pub line: usize,
    pub kind: LayerSpecKind,
    pub stride: Option<usize>,
    pub activation: Activation,
    pub input_shape: Option<Volume>,
}

impl LayerSpec {
    pub fn new(line: usize, kind: LayerSpecKind) -> Self {
        Self {
            line,
            kind,
            stride: None,
            activation: Activation::None,
            input_shape: None,
        }
    }
}

/// Layer declarations in depth order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelSpec {
    pub layers: Vec<LayerSpec>,
}

/// Completed per-kind geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerKind {
    Conv2D {
        filters: usize,
        kernel: usize,
        padding: Padding,
    },
    Pooling2D {
        pooling: PoolingKind,
        kernel: usize,
    },
    Flatten,
    Dense {
        units: usize,
    },
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Conv2D { .. } => "Conv2D",
            LayerKind::Pooling2D { .. } => "Pooling2D",
            LayerKind::Flatten => "Flatten",
            LayerKind::Dense { .. } => "Dense",
        }
    }

    /// Conv2D and Dense carry weights, biases and quantization factors
    pub fn is_weighted(&self) -> bool {
        matches!(self, LayerKind::Conv2D { .. } | LayerKind::Dense { .. })
    }

    /// Flatten and Dense produce 1-D outputs
    pub fn is_flat(&self) -> bool {
        matches!(self, LayerKind::Flatten | LayerKind::Dense { .. })
    }
}

/// A layer with every geometry field known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub line: usize,
    #[serde(flatten)]
    pub kind: LayerKind,
    pub input: Volume,
    pub output: Volume,
    pub stride: usize,
    pub activation: Activation,
}

impl Layer {
    pub fn kernel(&self) -> Option<usize> {
        match self.kind {
            LayerKind::Conv2D { kernel, .. } | LayerKind::Pooling2D { kernel, .. } => Some(kernel),
            _ => None,
        }
    }
}

/// The complete, read-only network handed to code generation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<Layer>,
}

impl Network {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.layers.len()
    }

    pub fn input(&self) -> Option<Volume> {
        self.layers.first().map(|layer| layer.input)
    }

    /// Number of Conv2D and Dense layers
    pub fn weighted_count(&self) -> usize {
        self.layers.iter().filter(|l| l.kind.is_weighted()).count()
    }

    /// 0-based position of a weighted layer among all weighted layers
    pub fn weighted_ordinal(&self, index: usize) -> Option<usize> {
        if !self.layers.get(index)?.kind.is_weighted() {
            return None;
        }
        Some(
            self.layers[..index]
                .iter()
                .filter(|l| l.kind.is_weighted())
                .count(),
        )
    }
}

impl fmt::Display for Network {
    /// Tab-separated layer table
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "type\t\tpadding\tfilters\tk(rows)\tk(cols)\tactiv\tnodes\tstride\tin_x\tin_y\tin_z\tout_x\tout_y\tout_z"
        )?;
        for layer in &self.layers {
            let (type_name, padding, filters, kernel, nodes) = match &layer.kind {
                LayerKind::Conv2D { filters, kernel, padding } => (
                    "Conv2D".to_string(),
                    padding.name().to_string(),
                    filters.to_string(),
                    format!("{}\t{}", kernel, kernel),
                    String::new(),
                ),
                LayerKind::Pooling2D { pooling, kernel } => (
                    format!("Pooling2D({})", pooling.name()),
                    String::new(),
                    layer.output.z.to_string(),
                    format!("{}\t{}", kernel, kernel),
                    String::new(),
                ),
                LayerKind::Flatten => (
                    "Flatten".to_string(),
                    String::new(),
                    String::new(),
                    "\t".to_string(),
                    layer.output.x.to_string(),
                ),
                LayerKind::Dense { units } => (
                    "Dense".to_string(),
                    String::new(),
                    String::new(),
                    "\t".to_string(),
                    units.to_string(),
                ),
            };
            let type_pad = if type_name.len() < 8 { "\t" } else { "" };
            writeln!(
                f,
                "{}\t{}{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                type_name,
                type_pad,
                padding,
                filters,
                kernel,
                layer.activation.name(),
                nodes,
                layer.stride,
                layer.input.x,
                layer.input.y,
                layer.input.z,
                layer.output.x,
                layer.output.y,
                layer.output.z,
            )?;
        }
        Ok(())
    }
}
