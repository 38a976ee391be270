//! Shape inference and structural validation
//!
//! Walks the declarations front to back, completing every layer's geometry
//! from its predecessor. Problems that leave the model inconsistent but
//! still walkable are recorded as diagnostics; problems that make the next
//! layer's input unknowable stop inference with a [`CompileError::ShapeError`].

use crate::ast::*;
use crate::diagnostic::{Diagnostics, SourceLocation};
use crate::error::{CompileError, CompileResult};

/// Analyzer for shape inference and structural checks
pub struct Analyzer {
    diagnostics: Diagnostics,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    /// Complete every layer and check the network's structure
    pub fn analyze(&mut self, model: ModelSpec) -> CompileResult<Network> {
        if model.layers.is_empty() {
            return Err(CompileError::shape(0, 0, "no layers declared"));
        }

        let mut layers: Vec<Layer> = Vec::with_capacity(model.layers.len());
        for (index, spec) in model.layers.into_iter().enumerate() {
            let layer = self.infer_layer(index, spec, layers.last())?;
            tracing::debug!(
                "layer {} {}: {} -> {}",
                index + 1,
                layer.kind.name(),
                layer.input,
                layer.output
            );
            layers.push(layer);
        }

        let network = Network::new(layers);
        self.check_structure(&network);
        tracing::info!("Inferred shapes for {} layer(s)", network.len());
        Ok(network)
    }

    fn infer_layer(
        &mut self,
        index: usize,
        spec: LayerSpec,
        previous: Option<&Layer>,
    ) -> CompileResult<Layer> {
        let number = index + 1;
        let line = spec.line;
        let location = Some(SourceLocation::line(line));

        let input = match (spec.input_shape, previous) {
            (Some(shape), Some(prev)) => {
                if shape != prev.output {
                    self.diagnostics.error(
                        location,
                        format!(
                            "layer {} declares input_shape {} but the previous layer produces {}",
                            number, shape, prev.output
                        ),
                    );
                }
                shape
            }
            (Some(shape), None) => shape,
            (None, Some(prev)) => prev.output,
            (None, None) => {
                return Err(CompileError::shape(
                    number,
                    line,
                    "the first layer must declare input_shape",
                ))
            }
        };

        if !input.is_positive() {
            return Err(CompileError::shape(
                number,
                line,
                format!("input volume {} has a zero dimension", input),
            ));
        }
        let input_elements = input.elements().ok_or_else(|| {
            CompileError::shape(number, line, format!("input volume {} is too large", input))
        })?;

        let (kind, stride, output) = match spec.kind {
            LayerSpecKind::Conv2D { filters, kernel, padding } => {
                let stride = spec.stride.unwrap_or(1);
                let padding = padding.unwrap_or_default();
                let (rows, cols) = kernel.unwrap_or((stride, stride));
                if rows != cols {
                    return Err(CompileError::shape(
                        number,
                        line,
                        format!("kernel must be square, got ({}, {})", rows, cols),
                    ));
                }
                let filters = filters.ok_or_else(|| {
                    CompileError::shape(number, line, "Conv2D requires filters")
                })?;

                let (out_x, out_y) = match padding {
                    Padding::Valid => (
                        valid_extent(number, line, input.x, rows, stride)?,
                        valid_extent(number, line, input.y, cols, stride)?,
                    ),
                    Padding::Same => {
                        if rows % 2 == 0 {
                            self.diagnostics.error(
                                location,
                                format!("SAME padding requires an odd kernel, got {}", rows),
                            );
                        }
                        let pad = (rows - 1) / 2;
                        let padded_x = padded_extent(number, line, input.x, pad)?;
                        let padded_y = padded_extent(number, line, input.y, pad)?;
                        valid_extent(number, line, padded_x.min(padded_y), rows, stride)?;
                        if stride > 1
                            && ((padded_x - rows) % stride != 0 || (padded_y - cols) % stride != 0)
                        {
                            self.diagnostics.warning(
                                location,
                                format!("unaligned stride {} under SAME padding in layer {}", stride, number),
                            );
                        }
                        (
                            same_extent(input.x, padded_x, rows, stride),
                            same_extent(input.y, padded_y, cols, stride),
                        )
                    }
                };

                (
                    LayerKind::Conv2D {
                        filters,
                        kernel: rows,
                        padding,
                    },
                    stride,
                    Volume::new(out_x, out_y, filters),
                )
            }

            LayerSpecKind::Pooling2D { pooling, pool_size, padding } => {
                let stride = spec
                    .stride
                    .or_else(|| pool_size.map(|(rows, _)| rows))
                    .unwrap_or(1);
                let (rows, cols) = pool_size.unwrap_or((stride, stride));
                if rows != cols {
                    return Err(CompileError::shape(
                        number,
                        line,
                        format!("pool size must be square, got ({}, {})", rows, cols),
                    ));
                }
                if pooling != PoolingKind::Max {
                    self.diagnostics.error(
                        location,
                        format!("{} pooling is not supported, only max pooling", pooling.name()),
                    );
                }
                if padding == Some(Padding::Same) {
                    self.diagnostics.error(location, "SAME padding is not supported on pooling layers");
                }
                if rows != stride {
                    self.diagnostics.error(
                        location,
                        format!(
                            "pooling window {} must equal its stride {} (overlapping windows are not supported)",
                            rows, stride
                        ),
                    );
                }

                (
                    LayerKind::Pooling2D {
                        pooling,
                        kernel: rows,
                    },
                    stride,
                    Volume::new(
                        valid_extent(number, line, input.x, rows, stride)?,
                        valid_extent(number, line, input.y, cols, stride)?,
                        input.z,
                    ),
                )
            }

            LayerSpecKind::Flatten => (
                LayerKind::Flatten,
                spec.stride.unwrap_or(1),
                Volume::flat(input_elements),
            ),

            LayerSpecKind::Dense { units } => {
                let units = units.ok_or_else(|| {
                    CompileError::shape(number, line, "Dense requires a unit count")
                })?;
                (
                    LayerKind::Dense { units },
                    spec.stride.unwrap_or(1),
                    Volume::flat(units),
                )
            }
        };

        if !output.is_positive() {
            return Err(CompileError::shape(
                number,
                line,
                format!("output volume {} has a zero dimension", output),
            ));
        }
        if output.elements().is_none() {
            return Err(CompileError::shape(
                number,
                line,
                format!("output volume {} is too large", output),
            ));
        }

        Ok(Layer {
            line,
            kind,
            input,
            output,
            stride,
            activation: spec.activation,
        })
    }

    /// Checks that relate neighbouring layers
    fn check_structure(&mut self, network: &Network) {
        let last = network.len() - 1;

        for (index, layer) in network.layers.iter().enumerate() {
            let number = index + 1;
            let location = Some(SourceLocation::line(layer.line));
            let next = network.layers.get(index + 1);

            match &layer.kind {
                LayerKind::Flatten => {
                    if !matches!(next.map(|l| &l.kind), Some(LayerKind::Dense { .. })) {
                        self.diagnostics.error(
                            location,
                            format!("Flatten layer {} must be followed by a Dense layer", number),
                        );
                    }
                }
                LayerKind::Dense { .. } => {
                    let previous = index.checked_sub(1).map(|i| &network.layers[i].kind);
                    match previous {
                        Some(LayerKind::Flatten) | Some(LayerKind::Dense { .. }) => {}
                        Some(other) => self.diagnostics.error(
                            location,
                            format!(
                                "Dense layer {} must follow a Flatten or Dense layer, not {}",
                                number,
                                other.name()
                            ),
                        ),
                        None if layer.input.y != 1 || layer.input.z != 1 => {
                            self.diagnostics.error(
                                location,
                                format!(
                                    "a leading Dense layer needs a 1-D input_shape, got {}",
                                    layer.input
                                ),
                            )
                        }
                        None => {}
                    }
                }
                LayerKind::Conv2D { .. } | LayerKind::Pooling2D { .. } => {
                    if let Some(previous) = index.checked_sub(1).map(|i| &network.layers[i]) {
                        if previous.kind.is_flat() {
                            self.diagnostics.error(
                                location,
                                format!(
                                    "{} layer {} cannot follow the 1-D output of {}",
                                    layer.kind.name(),
                                    number,
                                    previous.kind.name()
                                ),
                            );
                        }
                    }
                }
            }

            if layer.activation == Activation::Softmax && index != last {
                self.diagnostics.error(
                    location,
                    format!("softmax is only supported on the final layer, found on layer {}", number),
                );
            }
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// `floor((in - kernel) / stride) + 1`
fn valid_extent(layer: usize, line: usize, input: usize, kernel: usize, stride: usize) -> CompileResult<usize> {
    if kernel > input {
        return Err(CompileError::shape(
            layer,
            line,
            format!("kernel {} is larger than the input extent {}", kernel, input),
        ));
    }
    Ok((input - kernel) / stride + 1)
}

/// Extent after padding both sides by `pad`
fn padded_extent(layer: usize, line: usize, input: usize, pad: usize) -> CompileResult<usize> {
    pad.checked_mul(2)
        .and_then(|both| input.checked_add(both))
        .ok_or_else(|| {
            CompileError::shape(layer, line, format!("padded extent of {} is too large", input))
        })
}

fn same_extent(input: usize, padded: usize, kernel: usize, stride: usize) -> usize {
    if stride == 1 {
        return input;
    }
    padded.saturating_sub(kernel) / stride + 1
}
