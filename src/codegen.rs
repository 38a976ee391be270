//! HLS C++ generator for the `forward` function
//!
//! Walks the analyzed network once and writes the preamble, the function
//! signature and one loop nest per layer. Output is a pure function of the
//! network, the normalized loop orders and the resolved configuration.

use std::collections::BTreeSet;

use crate::ast::{Activation, Layer, LayerKind, Network, Padding, Volume};
use crate::config::{GenerationConfig, LoopLabels};
use crate::error::{CompileError, CompileResult};
use crate::loop_order::{self, AccumulatorStrategy, Axis, ConvSchedule};
use crate::placement::{Placement, PlacementPolicy};

/// Code generator for the forward pass
pub struct CodeGenerator {
    config: GenerationConfig,
}

impl CodeGenerator {
    pub fn new(config: GenerationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate `main.cpp` from the network and one normalized order per layer
    pub fn generate(&self, network: &Network, orders: &[String]) -> CompileResult<String> {
        if network.is_empty() {
            return Err(CompileError::codegen("cannot generate code for an empty network"));
        }
        if orders.len() != network.len() {
            return Err(CompileError::codegen(format!(
                "{} loop order(s) for {} layer(s)",
                orders.len(),
                network.len()
            )));
        }
        if let Some(number) = self.config.single_layer {
            if number == 0 || number > network.len() {
                return Err(CompileError::codegen(format!(
                    "single layer {} does not exist",
                    number
                )));
            }
        }

        let mut emitter = Emitter::new(&self.config, network, orders);
        emitter.emit()?;
        tracing::debug!("Generated {} bytes of C++", emitter.out.text.len());
        Ok(emitter.out.text)
    }
}

/// Indentation-aware text buffer
#[derive(Debug, Default)]
struct CodeWriter {
    text: String,
    indent: usize,
}

impl CodeWriter {
    fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.text.push('\t');
        }
        self.text.push_str(text.as_ref());
        self.text.push('\n');
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn indent(&mut self) {
        self.indent += 1;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    fn dedent_by(&mut self, levels: usize) {
        for _ in 0..levels {
            self.dedent();
        }
    }

    fn open(&mut self) {
        self.line("{");
        self.indent();
    }

    fn close(&mut self) {
        self.dedent();
        self.line("}");
    }
}

struct Emitter<'a> {
    config: &'a GenerationConfig,
    network: &'a Network,
    orders: &'a [String],
    policy: PlacementPolicy,
    quantized: bool,
    /// Layer indices emitted, in order
    emitted: Vec<usize>,
    out: CodeWriter,
}

impl<'a> Emitter<'a> {
    fn new(config: &'a GenerationConfig, network: &'a Network, orders: &'a [String]) -> Self {
        let emitted = match config.single_layer {
            Some(number) => vec![number - 1],
            None => (0..network.len()).collect(),
        };
        Self {
            config,
            network,
            orders,
            policy: PlacementPolicy::new(config.profile(network), config.layer_data_location),
            quantized: config.quantized(),
            emitted,
            out: CodeWriter::default(),
        }
    }

    fn emit(&mut self) -> CompileResult<()> {
        self.preamble();
        self.activation_functions();
        if self.quantized {
            self.out.line("#define Q_MAX(x, y) (x>y?x:y)");
            self.out.line("#define Q_MIN(x, y) (x>y?y:x)");
            self.out.line("#define Q_MIN_MAX(x) ( Q_MIN(Q_MAX(x, -128), 127) )");
            self.out.blank();
        }
        self.multipliers();
        self.typedefs();
        self.signature();

        self.out.open();
        if self.config.store_analysis_data {
            self.capture_inputs();
        }

        let emitted = self.emitted.clone();
        for (position, &index) in emitted.iter().enumerate() {
            tracing::debug!("Emitting layer {} ({})", index + 1, self.network.layers[index].kind.name());
            self.layer(index)?;
            if position + 1 < emitted.len() {
                self.out.blank();
                if self.config.fault_simulation {
                    self.out.line(format!(
                        "fault_injection(&l{0}, {0}, faulty_layer, faulty_fmap, faulty_bit);",
                        index + 1
                    ));
                    self.out.blank();
                }
                self.out.blank();
            }
        }
        self.out.close();
        Ok(())
    }

    // ---- names ----

    fn single(&self) -> bool {
        self.config.single_layer.is_some()
    }

    /// The layer writes to `outputs`
    fn is_exit(&self, index: usize) -> bool {
        self.network.is_last(index) || self.single()
    }

    fn input_name(&self, index: usize) -> String {
        if index == 0 || self.single() {
            "inputs".to_string()
        } else {
            format!("l{}", index)
        }
    }

    fn output_name(&self, index: usize) -> String {
        if self.is_exit(index) {
            "outputs".to_string()
        } else {
            format!("l{}", index + 1)
        }
    }

    fn type_name(&self, index: usize) -> String {
        if self.is_exit(index) {
            "DataType_output".to_string()
        } else {
            format!("DataType_Layer{}", index + 1)
        }
    }

    fn short(&self) -> &'static str {
        if self.quantized {
            "_short"
        } else {
            ""
        }
    }

    fn quant_index(&self, index: usize) -> usize {
        self.network.weighted_ordinal(index).unwrap_or(0)
    }

    fn label(&self, index: usize, axis: Axis) -> String {
        let number = index + 1;
        let suffix = match self.config.loop_labels {
            LoopLabels::Names => axis_label(axis),
            LoopLabels::Numbers => numbered_label(&self.network.layers[index].kind, axis),
        };
        format!("{}{}", base_label(number), suffix)
    }

    fn for_line(&self, index: usize, axis: Axis) -> String {
        let extent = axis.extent(&self.network.layers[index]);
        for_statement(&self.label(index, axis), axis.variable(), extent)
    }

    /// Accumulator init and write-back loops carry a fixed named label
    fn for_line_suffixed(&self, index: usize, axis: Axis, suffix: &str) -> String {
        let extent = axis.extent(&self.network.layers[index]);
        let label = format!("{}{}{}", base_label(index + 1), axis_label(axis), suffix);
        for_statement(&label, axis.variable(), extent)
    }

    /// Writes a loop nest, one level deeper per loop. Returns the depth added.
    fn loops(&mut self, index: usize, axes: &[Axis]) -> usize {
        for (position, axis) in axes.iter().enumerate() {
            if position > 0 {
                self.out.indent();
            }
            let line = self.for_line(index, *axis);
            self.out.line(line);
        }
        axes.len().saturating_sub(1)
    }

    fn loops_suffixed(&mut self, index: usize, axes: &[Axis], suffix: &str) -> usize {
        for (position, axis) in axes.iter().enumerate() {
            if position > 0 {
                self.out.indent();
            }
            let line = self.for_line_suffixed(index, *axis, suffix);
            self.out.line(line);
        }
        axes.len().saturating_sub(1)
    }

    fn multiply(&self, index: usize, a: &str, b: &str) -> String {
        if self.config.approximate_multipliers.is_some() {
            format!("MUL_LAYER_{}({}, {})", index + 1, a, b)
        } else {
            format!("{} * {}", a, b)
        }
    }

    // ---- file-level sections ----

    fn preamble(&mut self) {
        let store = self.config.store_analysis_data;
        let fault = self.config.fault_simulation;

        if self.config.add_main_function {
            self.out.line("//#define _HLS_RUN");
            self.out.blank();
            self.out.line("#ifndef _HLS_RUN");
            self.out.line("#include \"stdlib.h\"");
            self.out.line("#include \"stdio.h\"");
            self.out.line("#include \"time.h\"");
            self.out.line("#include <typeinfo>");
            self.out.line("#include <thread>");
            self.out.line("#endif //_HLS_RUN");
            self.out.blank();
            self.out.line("#include \"param-list.h\"");
            self.out.line("#ifndef _HLS_RUN");
            self.out.line("#include \"fixed-point-analysis.h\"");
            if fault {
                self.out.line("#include \"fault_simulation.h\"");
            }
            if store {
                self.out.line("int RunCounter = 0;");
                self.out.line(
                    "#define STORE_DATA(p1, p2, p3, p4, p5, p6) {StoreData(p1, p2, p3, RunCounter < 1, p4, p5, p6);}",
                );
            }
            self.out.line("extern map<string, string> arguments;");
            self.out.line("#else");
            self.hls_stubs();
            self.out.line("#endif");
            self.out.blank();
            self.out.line("#ifndef _HLS_RUN");
            self.out.line("#include \"datainterface.h\"");
            self.out.line("#include \"paraminterface.h\"");
            self.out.line("#endif //_HLS_RUN");
        } else {
            self.out.line("#define _HLS_RUN");
            self.out.blank();
            self.out.line("#include \"param-list.h\"");
            self.hls_stubs();
        }
        self.out.blank();
        self.out.blank();
    }

    /// Empty hook definitions for synthesis builds
    fn hls_stubs(&mut self) {
        if self.config.store_analysis_data {
            self.out.line("#define STORE_DATA(p1, p2, p3, p4, p5, p6)");
        }
        if self.config.fault_simulation {
            self.out.line(
                "void fault_injection(void *activation, int current_layer, int faulty_layer, int faulty_fmap, int faulty_bit) {};",
            );
        }
    }

    fn activation_functions(&mut self) {
        let used: BTreeSet<Activation> = self
            .emitted
            .iter()
            .map(|&index| emitted_activation(self.network.layers[index].activation))
            .filter(|activation| *activation != Activation::None)
            .collect();

        for activation in used {
            match activation {
                Activation::Relu => {
                    self.out.line("DataType_relu relu(DataType_relu x)");
                    self.out.open();
                    self.out.line("return x > 0 ? x : (DataType_relu)0;");
                    self.out.close();
                }
                Activation::Linear => {
                    self.out.line("DataType_relu linear(DataType_relu x)");
                    self.out.open();
                    self.out.line("return x;");
                    self.out.close();
                }
                _ => continue,
            }
            self.out.blank();
        }
    }

    fn multipliers(&mut self) {
        let Some(multipliers) = self.config.approximate_multipliers.as_ref() else {
            return;
        };
        let weighted: Vec<(usize, usize)> = self
            .network
            .layers
            .iter()
            .enumerate()
            .filter_map(|(index, _)| self.network.weighted_ordinal(index).map(|o| (index + 1, o)))
            .collect();

        self.out.line("#include \"multipliers.h\"");
        self.out.blank();
        self.out.line("#define MULTIPLIER_BASE mul_base");
        self.out.line("#define MULTIPLIER_EXACT mul8s_1KV6");
        self.out.line(format!("#define MULTIPLIER_NAME {}", multipliers.macro_name()));
        self.out.blank();
        self.out.line("#ifndef _HLS_RUN");
        self.out.line(
            "#define MUL_LAYER(a, b, layer_id) (mul_general<int16_t>(a, b, layer_id, arguments[\"mul-name\"], arguments[\"mul-layers-config\"]))",
        );
        for (number, _) in &weighted {
            self.out.line(format!("#define MUL_LAYER_{0}(a, b) MUL_LAYER(a, b, {0})", number));
        }
        self.out.line("#else //_HLS_RUN");
        for (number, ordinal) in &weighted {
            let target = if multipliers.is_approximate(*ordinal) {
                "MULTIPLIER_NAME"
            } else {
                "MULTIPLIER_EXACT"
            };
            self.out.line(format!("#define MUL_LAYER_{} {}", number, target));
        }
        self.out.line("#endif //_HLS_RUN");
        self.out.blank();
    }

    fn typedefs(&mut self) {
        let entry = &self.network.layers[self.emitted[0]];
        let input_dims = match entry.kind {
            LayerKind::Dense { .. } => format!("[{}]", entry.input.x),
            _ => dims(entry.input, false),
        };
        self.out.line(format!("typedef DataType_input InputType{};", input_dims));

        let exit = &self.network.layers[self.emitted[self.emitted.len() - 1]];
        self.out.line(format!(
            "typedef DataType_output{} OutputType{};",
            self.short(),
            dims(exit.output, exit.kind.is_flat())
        ));
        self.out.blank();
    }

    fn signature(&mut self) {
        const CONTINUATION: &str = "\t\t\t";
        let mut lines = vec!["void forward(InputType inputs, OutputType &outputs".to_string()];

        if self.config.fault_simulation {
            lines.push(format!("{}, int faulty_layer, int faulty_fmap, int faulty_bit", CONTINUATION));
        }

        if self.quantized {
            let count = self.network.weighted_count();
            lines.push(format!(
                "{0}, DataType_IZP input_zero_points[{1}], DataType_OZP output_zero_points[{1}], DataType_ISF input_scale_factors[{1}], DataType_OSF output_scale_factors[{1}]",
                CONTINUATION, count
            ));
            let scales: Vec<String> = self
                .network
                .layers
                .iter()
                .enumerate()
                .filter(|(_, layer)| layer.kind.is_weighted())
                .map(|(index, layer)| format!("DataType_WSF weight_scales_{}[{}]", index + 1, weight_columns(layer)))
                .collect();
            lines.push(format!("{}, {}", CONTINUATION, scales.join(", ")));
        }

        for (index, layer) in self.network.layers.iter().enumerate() {
            let number = index + 1;
            let mut item = match layer.kind {
                LayerKind::Conv2D { kernel, filters, .. } => format!(
                    "DataType_weights weights_{}[{}][{}][{}][{}]",
                    number, kernel, kernel, layer.input.z, filters
                ),
                LayerKind::Dense { units } => {
                    format!("DataType_weights weights_{}[{}][{}]", number, layer.input.x, units)
                }
                _ => continue,
            };
            if self.config.biases_enabled {
                item.push_str(&format!(", DataType_biases biases_{}[{}]", number, weight_columns(layer)));
            }
            let isolated_elsewhere = self.single() && self.config.single_layer != Some(number);
            lines.push(parameter(CONTINUATION, &item, isolated_elsewhere));
        }

        if !self.single() {
            for (index, layer) in self.network.layers.iter().enumerate() {
                if self.network.is_last(index) {
                    continue;
                }
                let number = index + 1;
                let item = format!(
                    "DataType_Layer{}{} l{}{}",
                    number,
                    self.short(),
                    number,
                    dims(layer.output, layer.kind.is_flat())
                );
                let local = self.policy.location(number) == Placement::Local;
                lines.push(parameter(CONTINUATION, &item, local));
            }
        }

        for line in lines {
            self.out.line(line);
        }
        self.out.line(")");
    }

    fn capture_inputs(&mut self) {
        let entry = &self.network.layers[self.emitted[0]];
        let input = entry.input;
        self.out.line("#ifndef _HLS_RUN");
        if matches!(entry.kind, LayerKind::Dense { .. }) {
            self.out.line(for_statement("for0Ix", "input_x", input.x));
            self.out.indent();
            self.out
                .line("STORE_DATA(1, \"inputs\", (float)inputs[input_x], input_x, -1, -1);");
            self.out.dedent();
        } else {
            self.out.line(for_statement("for0Ix", "input_x", input.x));
            self.out.indent();
            self.out.line(for_statement("for0Iy", "input_y", input.y));
            self.out.indent();
            self.out.line(for_statement("for0Iz", "input_z", input.z));
            self.out.indent();
            self.out.line(
                "STORE_DATA(1, \"inputs\", (float)inputs[input_x][input_y][input_z], input_x, input_y, input_z);",
            );
            self.out.dedent_by(3);
        }
        self.out.line("#endif");
        self.out.blank();
    }

    // ---- layers ----

    fn layer(&mut self, index: usize) -> CompileResult<()> {
        let layer = self.network.layers[index].clone();
        self.header(index, &layer);
        self.declare_output(index, &layer);
        match layer.kind {
            LayerKind::Conv2D { padding, .. } => self.conv2d(index, &layer, padding),
            LayerKind::Pooling2D { .. } => self.pooling(index, &layer),
            LayerKind::Flatten => self.flatten(index, &layer),
            LayerKind::Dense { .. } => self.dense(index, &layer),
        }
    }

    fn header(&mut self, index: usize, layer: &Layer) {
        let number = index + 1;
        let title = match &layer.kind {
            LayerKind::Conv2D { padding, .. } => format!(
                "Conv2D(Padding: {}, Stride: {})",
                padding.name(),
                layer.stride
            ),
            LayerKind::Pooling2D { pooling, .. } => format!("{} Pooling", pooling.name()),
            LayerKind::Flatten => "Flatten".to_string(),
            LayerKind::Dense { .. } => "Dense(Fully connected)".to_string(),
        };
        self.out.line(format!("//Layer {}: {}", number, title));
        self.out.line(format!(
            "//Input: X:{}, Y: {}, Z: {}",
            layer.input.x, layer.input.y, layer.input.z
        ));
        self.out.line(format!(
            "//Output: X:{}, Y: {}, Z: {}",
            layer.output.x, layer.output.y, layer.output.z
        ));
    }

    fn declare_output(&mut self, index: usize, layer: &Layer) {
        if self.single() {
            return;
        }
        let number = index + 1;
        let shape = dims(layer.output, layer.kind.is_flat());
        let weighted = layer.kind.is_weighted();

        if self.network.is_last(index) {
            if self.quantized && weighted {
                self.out.line(format!("DataType_output outputs_base{};", shape));
            }
            return;
        }
        if self.quantized && weighted {
            self.out.line(format!("DataType_Layer{0} l{0}_base{1};", number, shape));
        }
        let prefix = match self.policy.location(number) {
            Placement::Port => "//",
            Placement::Local => "",
        };
        self.out.line(format!(
            "{}DataType_Layer{}{} l{}{};",
            prefix,
            number,
            self.short(),
            number,
            shape
        ));
    }

    fn conv2d(&mut self, index: usize, layer: &Layer, padding: Padding) -> CompileResult<()> {
        let number = index + 1;
        let schedule = ConvSchedule::from_order(number, &self.orders[index])?;
        let input = self.input_name(index);
        let capture = self.config.store_analysis_data && schedule.strategy == AccumulatorStrategy::Scalar;
        let stride = stride_factor(layer.stride);
        let weight = format!("weights_{}[kernel_x][kernel_y][input_z][output_z]", number);

        let accumulator = format!(
            "temp_element{}{}",
            number,
            schedule
                .retained
                .iter()
                .map(|axis| format!("[{}]", axis.variable()))
                .collect::<String>()
        );
        let storage: String = schedule
            .retained
            .iter()
            .map(|axis| format!("[{}]", axis.extent(layer)))
            .collect();

        let outer_depth = self.loops(index, &schedule.outer);
        self.out.open();
        if capture && self.config.biases_enabled {
            self.out.line(format!(
                "STORE_DATA({0}, \"biases\", (float)biases_{0}[output_z], -1, -1, output_z);",
                number
            ));
        }
        self.out.line(format!(
            "DataType_temp_element{0} temp_element{0}{1};",
            number, storage
        ));

        let init = if self.config.biases_enabled {
            format!("biases_{}[output_z]", number)
        } else {
            "0".to_string()
        };
        if schedule.retained.is_empty() {
            self.out.line(format!("{} = {};", accumulator, init));
        } else {
            let depth = self.loops_suffixed(index, &schedule.retained, "I");
            self.out.indent();
            self.out.line(format!("{} = {};", accumulator, init));
            self.out.dedent();
            self.out.dedent_by(depth);
        }

        let inner_depth = self.loops(index, &schedule.inner);
        self.out.indent();
        match padding {
            Padding::Valid => {
                let operand = format!(
                    "{0}[output_x{1} + kernel_x][output_y{1} + kernel_y][input_z]",
                    input, stride
                );
                let mac = format!("{} += {};", accumulator, self.multiply(index, &operand, &weight));
                if capture {
                    self.out.dedent();
                    self.out.line("#ifndef _HLS_RUN");
                    self.out.line("{");
                    self.out.line("#endif");
                    self.out.indent();
                    self.out.line(mac);
                    self.out.line("#ifndef _HLS_RUN");
                    self.store_mac(number, &weight, &accumulator);
                    self.out.dedent();
                    self.out.line("}");
                    self.out.line("#endif");
                } else {
                    self.out.line(mac);
                    self.out.dedent();
                }
            }
            Padding::Same => {
                let pad = layer.kernel().unwrap_or(1).saturating_sub(1) / 2;
                self.out.dedent();
                self.out.open();
                self.out.line(format!("int row_index = output_x{} + kernel_x - {};", stride, pad));
                self.out.line(format!("int col_index = output_y{} + kernel_y - {};", stride, pad));
                self.out.line(format!(
                    "if (row_index >= 0 && row_index < {} && col_index >= 0 && col_index < {})",
                    layer.input.x, layer.input.y
                ));
                self.out.indent();
                let operand = format!("{}[row_index][col_index][input_z]", input);
                self.out.line(format!(
                    "{} += {};",
                    accumulator,
                    self.multiply(index, &operand, &weight)
                ));
                self.out.dedent();
                if self.quantized {
                    self.out.line("else");
                    self.out.indent();
                    self.out.line(format!(
                        "{} += input_zero_points[{}] * {};",
                        accumulator,
                        self.quant_index(index),
                        weight
                    ));
                    self.out.dedent();
                }
                if capture {
                    self.out.line("#ifndef _HLS_RUN");
                    self.store_mac(number, &weight, &accumulator);
                    self.out.line("#endif");
                }
                self.out.close();
            }
        }
        self.out.dedent_by(inner_depth);

        let index_expr = "[output_x][output_y][output_z]";
        let coordinates = "output_x, output_y, output_z";
        if schedule.retained.is_empty() {
            self.write_result(index, layer, index_expr, &accumulator, "output_z", coordinates, capture);
        } else {
            let depth = self.loops_suffixed(index, &schedule.retained, "O");
            self.out.open();
            self.write_result(index, layer, index_expr, &accumulator, "output_z", coordinates, capture);
            self.out.close();
            self.out.dedent_by(depth);
        }

        self.out.close();
        self.out.dedent_by(outer_depth);
        Ok(())
    }

    fn store_mac(&mut self, number: usize, weight: &str, accumulator: &str) {
        self.out.line(format!(
            "STORE_DATA({}, \"weights\", (float){}, kernel_x, kernel_y, input_z);",
            number, weight
        ));
        self.out.line(format!(
            "STORE_DATA({}, \"temp_element\", (float){}, -1, -1, -1);",
            number, accumulator
        ));
    }

    /// Activation, requantization and capture of one weighted output element
    #[allow(clippy::too_many_arguments)]
    fn write_result(
        &mut self,
        index: usize,
        layer: &Layer,
        index_expr: &str,
        accumulator: &str,
        scale_axis: &str,
        coordinates: &str,
        capture: bool,
    ) {
        let number = index + 1;
        let out = self.output_name(index);
        let base = if self.quantized { "_base" } else { "" };
        let target = format!("{}{}{}", out, base, index_expr);
        let final_target = format!("{}{}", out, index_expr);

        match emitted_activation(layer.activation) {
            Activation::None => self.out.line(format!("{} = {};", target, accumulator)),
            activation => self
                .out
                .line(format!("{} = {}({});", target, activation.name(), accumulator)),
        }

        if self.quantized {
            let q = self.quant_index(index);
            self.out.line(format!(
                "{} = {}_short(Q_MIN_MAX({}*input_scale_factors[{}]*weight_scales_{}[{}]/output_scale_factors[{}] + output_zero_points[{}]));",
                final_target,
                self.type_name(index),
                target,
                q,
                number,
                scale_axis,
                q,
                q
            ));
        }

        if capture {
            if self.quantized {
                self.out.line(format!(
                    "STORE_DATA({}, \"LayerOutputBase\", (float){}, {});",
                    number, target, coordinates
                ));
            }
            self.out.line(format!(
                "STORE_DATA({}, \"LayerOutput\", (float){}, {});",
                number, final_target, coordinates
            ));
        }
    }

    fn pooling(&mut self, index: usize, layer: &Layer) -> CompileResult<()> {
        let number = index + 1;
        let axes = loop_order::pooling_axes(number, &self.orders[index])?;
        let seed = self.config.pooling_seed(self.network, index).ok_or_else(|| {
            CompileError::codegen(format!(
                "max pooling in layer {} has no initial value; set pooling-minimum",
                number
            ))
        })?;
        let input = self.input_name(index);
        let out = self.output_name(index);
        let stride = stride_factor(layer.stride);

        let outer_depth = self.loops(index, &axes[..3]);
        self.out.open();
        self.out.line(format!(
            "{}{} current_cell, max_value;",
            self.type_name(index),
            self.short()
        ));
        self.out.line(format!("max_value = {};", seed));

        let window_depth = self.loops(index, &axes[3..]);
        self.out.open();
        self.out.line(format!(
            "current_cell = {}[output_x{1} + kernel_x][output_y{1} + kernel_y][output_z];",
            input, stride
        ));
        self.out.line("if (current_cell > max_value) max_value = current_cell;");
        self.out.close();
        self.out.dedent_by(window_depth);

        self.out.line(format!("{}[output_x][output_y][output_z] = max_value;", out));
        if self.config.store_analysis_data {
            self.out.line(format!(
                "STORE_DATA({}, \"LayerOutput\", (float)max_value, output_x, output_y, output_z);",
                number
            ));
        }
        self.out.close();
        self.out.dedent_by(outer_depth);
        Ok(())
    }

    fn flatten(&mut self, index: usize, layer: &Layer) -> CompileResult<()> {
        let number = index + 1;
        let axes = loop_order::flatten_axes(number, &self.orders[index])?;
        let input = self.input_name(index);
        let position = format!(
            "input_x * {0} * {1} + input_y * {1} + input_z",
            layer.input.y, layer.input.z
        );
        let target = format!("{}[{}]", self.output_name(index), position);
        let copy = format!("{} = {}[input_x][input_y][input_z];", target, input);

        let depth = self.loops(index, &axes);
        if self.config.store_analysis_data {
            self.out.line("#ifndef _HLS_RUN");
            self.out.line("{");
            self.out.line("#endif");
            self.out.indent();
            self.out.line(copy);
            self.out.line("#ifndef _HLS_RUN");
            self.out.line(format!(
                "STORE_DATA({}, \"LayerOutput\", (float){}, {}, -1, -1);",
                number, target, position
            ));
            self.out.dedent();
            self.out.line("}");
            self.out.line("#endif");
        } else {
            self.out.indent();
            self.out.line(copy);
            self.out.dedent();
        }
        self.out.dedent_by(depth);
        Ok(())
    }

    fn dense(&mut self, index: usize, layer: &Layer) -> CompileResult<()> {
        let number = index + 1;
        if self.orders[index] != loop_order::DENSE_DEFAULT {
            return Err(CompileError::loop_order(number, self.orders[index].clone()));
        }
        let input = self.input_name(index);
        let capture = self.config.store_analysis_data;
        let accumulator = format!("temp_element{}", number);
        let weight = format!("weights_{}[input_x][output_x]", number);

        let line = self.for_line(index, Axis::Ox);
        self.out.line(line);
        self.out.open();
        self.out.line(format!("DataType_temp_element{0} temp_element{0};", number));
        if self.config.biases_enabled {
            self.out.line(format!("{} = biases_{}[output_x];", accumulator, number));
            if capture {
                self.out.line(format!(
                    "STORE_DATA({0}, \"biases\", (float)biases_{0}[output_x], output_x, -1, -1);",
                    number
                ));
            }
        } else {
            self.out.line(format!("{} = 0;", accumulator));
        }

        let line = self.for_line(index, Axis::Ix);
        self.out.line(line);
        let operand = format!("{}[input_x]", input);
        let mac = format!("{} += {};", accumulator, self.multiply(index, &operand, &weight));
        if capture {
            self.out.line("#ifndef _HLS_RUN");
            self.out.line("{");
            self.out.line("#endif");
            self.out.indent();
            self.out.line(mac);
            self.out.line("#ifndef _HLS_RUN");
            self.out.line(format!(
                "STORE_DATA({}, \"weights\", (float){}, input_x, output_x, -1);",
                number, weight
            ));
            self.out.line(format!(
                "STORE_DATA({}, \"temp_element\", (float){}, -1, -1, -1);",
                number, accumulator
            ));
            self.out.dedent();
            self.out.line("}");
            self.out.line("#endif");
        } else {
            self.out.indent();
            self.out.line(mac);
            self.out.dedent();
        }

        self.write_result(index, layer, "[output_x]", &accumulator, "output_x", "output_x, -1, -1", capture);
        self.out.close();
        Ok(())
    }
}

/// Softmax is emitted as relu
fn emitted_activation(activation: Activation) -> Activation {
    match activation {
        Activation::Softmax => Activation::Relu,
        other => other,
    }
}

fn dims(volume: Volume, flat: bool) -> String {
    if flat {
        format!("[{}]", volume.x)
    } else {
        format!("[{}][{}][{}]", volume.x, volume.y, volume.z)
    }
}

/// Output channels of a weighted layer
fn weight_columns(layer: &Layer) -> usize {
    match layer.kind {
        LayerKind::Conv2D { filters, .. } => filters,
        LayerKind::Dense { units } => units,
        _ => 0,
    }
}

fn stride_factor(stride: usize) -> String {
    if stride == 1 {
        String::new()
    } else {
        format!(" * {}", stride)
    }
}

fn parameter(continuation: &str, item: &str, commented: bool) -> String {
    if commented {
        format!("{}/*, {}*/", continuation, item)
    } else {
        format!("{}, {}", continuation, item)
    }
}

fn base_label(number: usize) -> String {
    if number >= 10 {
        format!("for{}t", number)
    } else {
        format!("for{}", number)
    }
}

fn axis_label(axis: Axis) -> &'static str {
    match axis {
        Axis::Oz => "Oz",
        Axis::Oy => "Oy",
        Axis::Ox => "Ox",
        Axis::Iz => "Iz",
        Axis::Kx => "Kx",
        Axis::Ky => "Ky",
        Axis::Ix => "Ix",
        Axis::Iy => "Iy",
    }
}

/// Positional label suffixes, outermost default loop unnumbered
fn numbered_label(kind: &LayerKind, axis: Axis) -> &'static str {
    match (kind, axis) {
        (LayerKind::Conv2D { .. }, Axis::Oz) => "",
        (LayerKind::Conv2D { .. }, Axis::Oy) => "1",
        (LayerKind::Conv2D { .. }, Axis::Ox) => "2",
        (LayerKind::Conv2D { .. }, Axis::Iz) => "3",
        (LayerKind::Conv2D { .. }, Axis::Kx) => "4",
        (LayerKind::Conv2D { .. }, Axis::Ky) => "5",
        (LayerKind::Pooling2D { .. }, Axis::Ox) => "",
        (LayerKind::Pooling2D { .. }, Axis::Oy) => "1",
        (LayerKind::Pooling2D { .. }, Axis::Oz) => "2",
        (LayerKind::Pooling2D { .. }, Axis::Kx) => "3",
        (LayerKind::Pooling2D { .. }, Axis::Ky) => "4",
        (LayerKind::Flatten, Axis::Ix) => "",
        (LayerKind::Flatten, Axis::Iy) => "1",
        (LayerKind::Flatten, Axis::Iz) => "2",
        (LayerKind::Dense { .. }, Axis::Ox) => "",
        (LayerKind::Dense { .. }, Axis::Ix) => "1",
        (_, other) => axis_label(other),
    }
}

fn for_statement(label: &str, variable: &str, extent: usize) -> String {
    format!(
        "{0}: for (int {1} = 0; {1} < {2}; {1}++)",
        label, variable, extent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApproximateMultipliers;
    use pretty_assertions::assert_eq;

    const LENET: &str = "model.add(Conv2D(filters=6, kernel_size=(5, 5), activation='relu', input_shape=(28, 28, 1)))\n\
                         model.add(MaxPooling2D(pool_size=(2, 2)))\n\
                         model.add(Flatten())\n\
                         model.add(Dense(10, activation='softmax'))\n";

    fn network(source: &str) -> Network {
        crate::build_network(source).unwrap().0
    }

    fn defaults(network: &Network) -> Vec<String> {
        network
            .layers
            .iter()
            .map(|layer| loop_order::default_order(&layer.kind).to_string())
            .collect()
    }

    fn generate(source: &str, config: GenerationConfig) -> String {
        let network = network(source);
        let orders = defaults(&network);
        CodeGenerator::new(config).generate(&network, &orders).unwrap()
    }

    fn generate_with_orders(source: &str, config: GenerationConfig, orders: &[&str]) -> CompileResult<String> {
        let network = network(source);
        let orders: Vec<String> = orders.iter().map(|o| o.to_string()).collect();
        CodeGenerator::new(config).generate(&network, &orders)
    }

    fn quantized() -> GenerationConfig {
        GenerationConfig {
            data_type_mode: crate::config::DataTypeMode::FixedPointSingle,
            data_type_detail: Some("eight-bit-int".to_string()),
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_flatten_dense_program() {
        let source = "model.add(Flatten(input_shape=(2, 2, 1)))\n\
                      model.add(Dense(3, activation='relu'))\n";
        let expected = "#define _HLS_RUN

#include \"param-list.h\"


DataType_relu relu(DataType_relu x)
{
\treturn x > 0 ? x : (DataType_relu)0;
}

typedef DataType_input InputType[2][2][1];
typedef DataType_output OutputType[3];

void forward(InputType inputs, OutputType &outputs
\t\t\t, DataType_weights weights_2[4][3], DataType_biases biases_2[3]
\t\t\t/*, DataType_Layer1 l1[4]*/
)
{
\t//Layer 1: Flatten
\t//Input: X:2, Y: 2, Z: 1
\t//Output: X:4, Y: 1, Z: 1
\tDataType_Layer1 l1[4];
\tfor1Ix: for (int input_x = 0; input_x < 2; input_x++)
\t\tfor1Iy: for (int input_y = 0; input_y < 2; input_y++)
\t\t\tfor1Iz: for (int input_z = 0; input_z < 1; input_z++)
\t\t\t\tl1[input_x * 2 * 1 + input_y * 1 + input_z] = inputs[input_x][input_y][input_z];


\t//Layer 2: Dense(Fully connected)
\t//Input: X:4, Y: 1, Z: 1
\t//Output: X:3, Y: 1, Z: 1
\tfor2Ox: for (int output_x = 0; output_x < 3; output_x++)
\t{
\t\tDataType_temp_element2 temp_element2;
\t\ttemp_element2 = biases_2[output_x];
\t\tfor2Ix: for (int input_x = 0; input_x < 4; input_x++)
\t\t\ttemp_element2 += l1[input_x] * weights_2[input_x][output_x];
\t\toutputs[output_x] = relu(temp_element2);
\t}
}
";
        assert_eq!(generate(source, GenerationConfig::default()), expected);
    }

    #[test]
    fn test_valid_conv_scalar_nest() {
        let code = generate(LENET, GenerationConfig::default());
        let expected = "\tfor1Oz: for (int output_z = 0; output_z < 6; output_z++)
\t\tfor1Oy: for (int output_y = 0; output_y < 24; output_y++)
\t\t\tfor1Ox: for (int output_x = 0; output_x < 24; output_x++)
\t\t\t{
\t\t\t\tDataType_temp_element1 temp_element1;
\t\t\t\ttemp_element1 = biases_1[output_z];
\t\t\t\tfor1Iz: for (int input_z = 0; input_z < 1; input_z++)
\t\t\t\t\tfor1Kx: for (int kernel_x = 0; kernel_x < 5; kernel_x++)
\t\t\t\t\t\tfor1Ky: for (int kernel_y = 0; kernel_y < 5; kernel_y++)
\t\t\t\t\t\t\ttemp_element1 += inputs[output_x + kernel_x][output_y + kernel_y][input_z] * weights_1[kernel_x][kernel_y][input_z][output_z];
\t\t\t\tl1[output_x][output_y][output_z] = relu(temp_element1);
\t\t\t}
";
        assert!(code.contains(expected), "{}", code);
        assert!(code.contains("\tDataType_Layer1 l1[24][24][6];\n"));
    }

    #[test]
    fn test_pooling_nest_and_seed() {
        let code = generate(LENET, GenerationConfig::default());
        let expected = "\t//Layer 2: Max Pooling
\t//Input: X:24, Y: 24, Z: 6
\t//Output: X:12, Y: 12, Z: 6
\tDataType_Layer2 l2[12][12][6];
\tfor2Ox: for (int output_x = 0; output_x < 12; output_x++)
\t\tfor2Oy: for (int output_y = 0; output_y < 12; output_y++)
\t\t\tfor2Oz: for (int output_z = 0; output_z < 6; output_z++)
\t\t\t{
\t\t\t\tDataType_Layer2 current_cell, max_value;
\t\t\t\tmax_value = 0;
\t\t\t\tfor2Kx: for (int kernel_x = 0; kernel_x < 2; kernel_x++)
\t\t\t\t\tfor2Ky: for (int kernel_y = 0; kernel_y < 2; kernel_y++)
\t\t\t\t\t{
\t\t\t\t\t\tcurrent_cell = l1[output_x * 2 + kernel_x][output_y * 2 + kernel_y][output_z];
\t\t\t\t\t\tif (current_cell > max_value) max_value = current_cell;
\t\t\t\t\t}
\t\t\t\tl2[output_x][output_y][output_z] = max_value;
\t\t\t}
";
        assert!(code.contains(expected), "{}", code);
    }

    #[test]
    fn test_softmax_emitted_as_relu() {
        let code = generate(LENET, GenerationConfig::default());
        assert!(code.contains("outputs[output_x] = relu(temp_element4);"));
        assert!(!code.contains("softmax"));
        assert_eq!(code.matches("DataType_relu relu(DataType_relu x)").count(), 1);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let config = GenerationConfig {
            add_main_function: true,
            fault_simulation: true,
            store_analysis_data: true,
            ..GenerationConfig::default()
        };
        assert_eq!(generate(LENET, config.clone()), generate(LENET, config));
    }

    #[test]
    fn test_stride_and_same_padding() {
        let source = "model.add(Conv2D(filters=4, kernel_size=(3, 3), strides=(2, 2), padding='same', input_shape=(8, 8, 2)))\n";
        let code = generate(source, GenerationConfig::default());
        assert!(code.contains("//Layer 1: Conv2D(Padding: same, Stride: 2)"));
        assert!(code.contains("int row_index = output_x * 2 + kernel_x - 1;"));
        assert!(code.contains("int col_index = output_y * 2 + kernel_y - 1;"));
        assert!(code.contains("if (row_index >= 0 && row_index < 8 && col_index >= 0 && col_index < 8)"));
        assert!(code.contains("temp_element1 += inputs[row_index][col_index][input_z] * weights_1[kernel_x][kernel_y][input_z][output_z];"));
        assert!(code.contains("outputs[output_x][output_y][output_z] = temp_element1;"));
        assert!(!code.contains("else"));
    }

    #[test]
    fn test_vector_strategy() {
        let source = "model.add(Conv2D(filters=2, kernel_size=(3, 3), activation='relu', input_shape=(5, 5, 1)))\n\
                      model.add(Flatten())\n\
                      model.add(Dense(2))\n";
        let code = generate_with_orders(
            source,
            GenerationConfig::default(),
            &["oz-ox-iz-oy-kx-ky", "oz-oy-ox", "ox-ix"],
        )
        .unwrap();
        let expected = "\tfor1Oz: for (int output_z = 0; output_z < 2; output_z++)
\t\tfor1Ox: for (int output_x = 0; output_x < 3; output_x++)
\t\t{
\t\t\tDataType_temp_element1 temp_element1[3];
\t\t\tfor1OyI: for (int output_y = 0; output_y < 3; output_y++)
\t\t\t\ttemp_element1[output_y] = biases_1[output_z];
\t\t\tfor1Iz: for (int input_z = 0; input_z < 1; input_z++)
\t\t\t\tfor1Oy: for (int output_y = 0; output_y < 3; output_y++)
\t\t\t\t\tfor1Kx: for (int kernel_x = 0; kernel_x < 3; kernel_x++)
\t\t\t\t\t\tfor1Ky: for (int kernel_y = 0; kernel_y < 3; kernel_y++)
\t\t\t\t\t\t\ttemp_element1[output_y] += inputs[output_x + kernel_x][output_y + kernel_y][input_z] * weights_1[kernel_x][kernel_y][input_z][output_z];
\t\t\tfor1OyO: for (int output_y = 0; output_y < 3; output_y++)
\t\t\t{
\t\t\t\tl1[output_x][output_y][output_z] = relu(temp_element1[output_y]);
\t\t\t}
\t\t}
";
        assert!(code.contains(expected), "{}", code);
    }

    #[test]
    fn test_tile_strategy() {
        let source = "model.add(Conv2D(filters=2, kernel_size=(3, 3), input_shape=(5, 5, 1)))\n";
        let code = generate_with_orders(source, GenerationConfig::default(), &["oz-iz-oy-ox-kx-ky"]).unwrap();
        assert!(code.contains("\t\tDataType_temp_element1 temp_element1[3][3];\n"));
        assert!(code.contains("for1OxI: for (int output_x = 0; output_x < 3; output_x++)"));
        assert!(code.contains("\t\t\t\ttemp_element1[output_x][output_y] = biases_1[output_z];\n"));
        assert!(code.contains(
            "\t\tfor1Iz: for (int input_z = 0; input_z < 1; input_z++)\n\t\t\tfor1Oy: for (int output_y = 0; output_y < 3; output_y++)\n\t\t\t\tfor1Ox: for"
        ));
        assert!(code.contains("outputs[output_x][output_y][output_z] = temp_element1[output_x][output_y];"));
    }

    #[test]
    fn test_vector_strategy_same_padding_quantized() {
        let source = "model.add(Conv2D(filters=2, kernel_size=(3, 3), padding='same', activation='relu', input_shape=(4, 4, 1)))\n\
                      model.add(Flatten())\n\
                      model.add(Dense(2))\n";
        let code = generate_with_orders(source, quantized(), &["oz-ox-iz-oy-kx-ky", "oz-oy-ox", "ox-ix"]).unwrap();
        let expected = "\tfor1Oz: for (int output_z = 0; output_z < 2; output_z++)
\t\tfor1Ox: for (int output_x = 0; output_x < 4; output_x++)
\t\t{
\t\t\tDataType_temp_element1 temp_element1[4];
\t\t\tfor1OyI: for (int output_y = 0; output_y < 4; output_y++)
\t\t\t\ttemp_element1[output_y] = biases_1[output_z];
\t\t\tfor1Iz: for (int input_z = 0; input_z < 1; input_z++)
\t\t\t\tfor1Oy: for (int output_y = 0; output_y < 4; output_y++)
\t\t\t\t\tfor1Kx: for (int kernel_x = 0; kernel_x < 3; kernel_x++)
\t\t\t\t\t\tfor1Ky: for (int kernel_y = 0; kernel_y < 3; kernel_y++)
\t\t\t\t\t\t{
\t\t\t\t\t\t\tint row_index = output_x + kernel_x - 1;
\t\t\t\t\t\t\tint col_index = output_y + kernel_y - 1;
\t\t\t\t\t\t\tif (row_index >= 0 && row_index < 4 && col_index >= 0 && col_index < 4)
\t\t\t\t\t\t\t\ttemp_element1[output_y] += inputs[row_index][col_index][input_z] * weights_1[kernel_x][kernel_y][input_z][output_z];
\t\t\t\t\t\t\telse
\t\t\t\t\t\t\t\ttemp_element1[output_y] += input_zero_points[0] * weights_1[kernel_x][kernel_y][input_z][output_z];
\t\t\t\t\t\t}
\t\t\tfor1OyO: for (int output_y = 0; output_y < 4; output_y++)
\t\t\t{
\t\t\t\tl1_base[output_x][output_y][output_z] = relu(temp_element1[output_y]);
\t\t\t\tl1[output_x][output_y][output_z] = DataType_Layer1_short(Q_MIN_MAX(l1_base[output_x][output_y][output_z]*input_scale_factors[0]*weight_scales_1[output_z]/output_scale_factors[0] + output_zero_points[0]));
\t\t\t}
\t\t}
";
        assert!(code.contains(expected), "{}", code);
        assert!(code.contains("\tDataType_Layer1 l1_base[4][4][2];\n\tDataType_Layer1_short l1[4][4][2];\n"));
    }

    #[test]
    fn test_tile_strategy_same_padding_quantized() {
        let source = "model.add(Conv2D(filters=2, kernel_size=(3, 3), padding='same', activation='relu', input_shape=(4, 4, 1)))\n";
        let code = generate_with_orders(source, quantized(), &["oz-iz-ox-oy-kx-ky"]).unwrap();
        let expected = "\tDataType_output outputs_base[4][4][2];
\tfor1Oz: for (int output_z = 0; output_z < 2; output_z++)
\t{
\t\tDataType_temp_element1 temp_element1[4][4];
\t\tfor1OxI: for (int output_x = 0; output_x < 4; output_x++)
\t\t\tfor1OyI: for (int output_y = 0; output_y < 4; output_y++)
\t\t\t\ttemp_element1[output_x][output_y] = biases_1[output_z];
\t\tfor1Iz: for (int input_z = 0; input_z < 1; input_z++)
\t\t\tfor1Ox: for (int output_x = 0; output_x < 4; output_x++)
\t\t\t\tfor1Oy: for (int output_y = 0; output_y < 4; output_y++)
\t\t\t\t\tfor1Kx: for (int kernel_x = 0; kernel_x < 3; kernel_x++)
\t\t\t\t\t\tfor1Ky: for (int kernel_y = 0; kernel_y < 3; kernel_y++)
\t\t\t\t\t\t{
\t\t\t\t\t\t\tint row_index = output_x + kernel_x - 1;
\t\t\t\t\t\t\tint col_index = output_y + kernel_y - 1;
\t\t\t\t\t\t\tif (row_index >= 0 && row_index < 4 && col_index >= 0 && col_index < 4)
\t\t\t\t\t\t\t\ttemp_element1[output_x][output_y] += inputs[row_index][col_index][input_z] * weights_1[kernel_x][kernel_y][input_z][output_z];
\t\t\t\t\t\t\telse
\t\t\t\t\t\t\t\ttemp_element1[output_x][output_y] += input_zero_points[0] * weights_1[kernel_x][kernel_y][input_z][output_z];
\t\t\t\t\t\t}
\t\tfor1OxO: for (int output_x = 0; output_x < 4; output_x++)
\t\t\tfor1OyO: for (int output_y = 0; output_y < 4; output_y++)
\t\t\t{
\t\t\t\toutputs_base[output_x][output_y][output_z] = relu(temp_element1[output_x][output_y]);
\t\t\t\toutputs[output_x][output_y][output_z] = DataType_output_short(Q_MIN_MAX(outputs_base[output_x][output_y][output_z]*input_scale_factors[0]*weight_scales_1[output_z]/output_scale_factors[0] + output_zero_points[0]));
\t\t\t}
\t}
";
        assert!(code.contains(expected), "{}", code);
    }

    #[test]
    fn test_unsupported_order_rejected() {
        let source = "model.add(Conv2D(filters=2, kernel_size=(3, 3), input_shape=(5, 5, 1)))\n";
        let err = generate_with_orders(source, GenerationConfig::default(), &["oz-iz-kx-ox-oy-ky"]).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedLoopOrder { layer: 1, .. }));
    }

    #[test]
    fn test_numbered_labels() {
        let config = GenerationConfig {
            loop_labels: LoopLabels::Numbers,
            ..GenerationConfig::default()
        };
        let code = generate(LENET, config);
        assert!(code.contains("for1: for (int output_z = 0; output_z < 6; output_z++)"));
        assert!(code.contains("for15: for (int kernel_y = 0; kernel_y < 5; kernel_y++)"));
        assert!(code.contains(
            "\tfor2: for (int output_x = 0; output_x < 12; output_x++)\n\t\tfor21: for (int output_y = 0; output_y < 12; output_y++)\n\t\t\tfor22: for (int output_z = 0; output_z < 6; output_z++)\n"
        ));
        assert!(code.contains("for23: for (int kernel_x = 0; kernel_x < 2; kernel_x++)"));
        assert!(code.contains(
            "\tfor3: for (int input_x = 0; input_x < 12; input_x++)\n\t\tfor31: for (int input_y = 0; input_y < 12; input_y++)\n\t\t\tfor32: for (int input_z = 0; input_z < 6; input_z++)\n"
        ));
        assert!(code.contains("for41: for (int input_x = 0; input_x < 864; input_x++)"));
    }

    #[test]
    fn test_label_suffix_from_layer_ten() {
        let mut source = String::from("model.add(Dense(4, input_shape=(4)))\n");
        for _ in 0..9 {
            source.push_str("model.add(Dense(4))\n");
        }
        let code = generate(&source, GenerationConfig::default());
        assert!(code.contains("for9Ox: for"));
        assert!(code.contains("for10tOx: for"));
        assert!(code.contains("for10tIx: for"));
    }

    #[test]
    fn test_placement_comments() {
        let local = generate(LENET, GenerationConfig::default());
        assert!(local.contains("\t\t\t/*, DataType_Layer1 l1[24][24][6]*/\n"));
        assert!(local.contains("\tDataType_Layer1 l1[24][24][6];\n"));

        let port = generate(
            LENET,
            GenerationConfig {
                layer_data_location: Some(Placement::Port),
                ..GenerationConfig::default()
            },
        );
        assert!(port.contains("\t\t\t, DataType_Layer1 l1[24][24][6]\n"));
        assert!(port.contains("\t//DataType_Layer1 l1[24][24][6];\n"));
        assert!(!port.contains("l4["));
    }

    #[test]
    fn test_quantized_output() {
        let source = "model.add(Conv2D(filters=2, kernel_size=(3, 3), padding='same', activation='linear', input_shape=(4, 4, 1)))\n\
                      model.add(MaxPooling2D(pool_size=(2, 2)))\n\
                      model.add(Flatten())\n\
                      model.add(Dense(3))\n";
        let code = generate(source, quantized());
        assert!(code.contains("#define Q_MIN_MAX(x) ( Q_MIN(Q_MAX(x, -128), 127) )\n"));
        assert!(code.contains("typedef DataType_output_short OutputType[3];"));
        assert!(code.contains(
            "\t\t\t, DataType_IZP input_zero_points[2], DataType_OZP output_zero_points[2], DataType_ISF input_scale_factors[2], DataType_OSF output_scale_factors[2]\n"
        ));
        assert!(code.contains("\t\t\t, DataType_WSF weight_scales_1[2], DataType_WSF weight_scales_4[3]\n"));
        assert!(code.contains("\tDataType_Layer1 l1_base[4][4][2];\n\tDataType_Layer1_short l1[4][4][2];\n"));
        assert!(code.contains("else\n"));
        assert!(code.contains("temp_element1 += input_zero_points[0] * weights_1[kernel_x][kernel_y][input_z][output_z];"));
        assert!(code.contains("l1_base[output_x][output_y][output_z] = linear(temp_element1);"));
        assert!(code.contains(
            "l1[output_x][output_y][output_z] = DataType_Layer1_short(Q_MIN_MAX(l1_base[output_x][output_y][output_z]*input_scale_factors[0]*weight_scales_1[output_z]/output_scale_factors[0] + output_zero_points[0]));"
        ));
        assert!(code.contains("DataType_Layer2_short current_cell, max_value;\n"));
        assert!(code.contains("max_value = -128;"));
        assert!(code.contains("\tDataType_output outputs_base[3];\n"));
        assert!(code.contains(
            "outputs[output_x] = DataType_output_short(Q_MIN_MAX(outputs_base[output_x]*input_scale_factors[1]*weight_scales_4[output_x]/output_scale_factors[1] + output_zero_points[1]));"
        ));
    }

    #[test]
    fn test_approximate_multipliers() {
        let config = GenerationConfig {
            approximate_multipliers: Some(ApproximateMultipliers {
                layer_mask: "01".to_string(),
                multiplier_type: "mul8s_1L2H".to_string(),
            }),
            ..GenerationConfig::default()
        };
        let code = generate(LENET, config);
        let expected = "#include \"multipliers.h\"

#define MULTIPLIER_BASE mul_base
#define MULTIPLIER_EXACT mul8s_1KV6
#define MULTIPLIER_NAME mul8s_1L2H

#ifndef _HLS_RUN
#define MUL_LAYER(a, b, layer_id) (mul_general<int16_t>(a, b, layer_id, arguments[\"mul-name\"], arguments[\"mul-layers-config\"]))
#define MUL_LAYER_1(a, b) MUL_LAYER(a, b, 1)
#define MUL_LAYER_4(a, b) MUL_LAYER(a, b, 4)
#else //_HLS_RUN
#define MUL_LAYER_1 MULTIPLIER_EXACT
#define MUL_LAYER_4 MULTIPLIER_NAME
#endif //_HLS_RUN
";
        assert!(code.contains(expected), "{}", code);
        assert!(code.contains("temp_element1 += MUL_LAYER_1(inputs[output_x + kernel_x][output_y + kernel_y][input_z], weights_1[kernel_x][kernel_y][input_z][output_z]);"));
        assert!(code.contains("temp_element4 += MUL_LAYER_4(l3[input_x], weights_4[input_x][output_x]);"));
    }

    #[test]
    fn test_fault_hooks() {
        let config = GenerationConfig {
            add_main_function: true,
            fault_simulation: true,
            ..GenerationConfig::default()
        };
        let code = generate(LENET, config);
        assert!(code.contains("#include \"fault_simulation.h\"\n"));
        assert!(code.contains(
            "void fault_injection(void *activation, int current_layer, int faulty_layer, int faulty_fmap, int faulty_bit) {};"
        ));
        assert!(code.contains("\t\t\t, int faulty_layer, int faulty_fmap, int faulty_bit\n"));
        assert!(code.contains("\tfault_injection(&l1, 1, faulty_layer, faulty_fmap, faulty_bit);\n"));
        assert!(code.contains("\tfault_injection(&l3, 3, faulty_layer, faulty_fmap, faulty_bit);\n"));
        assert!(!code.contains("fault_injection(&l4"));
    }

    #[test]
    fn test_analysis_capture() {
        let config = GenerationConfig {
            add_main_function: true,
            store_analysis_data: true,
            ..GenerationConfig::default()
        };
        let code = generate(LENET, config);
        assert!(code.contains("int RunCounter = 0;\n"));
        assert!(code.contains("#else\n#define STORE_DATA(p1, p2, p3, p4, p5, p6)\n#endif\n"));
        assert!(code.contains(
            "STORE_DATA(1, \"inputs\", (float)inputs[input_x][input_y][input_z], input_x, input_y, input_z);"
        ));
        assert!(code.contains("STORE_DATA(1, \"biases\", (float)biases_1[output_z], -1, -1, output_z);"));
        assert!(code.contains(
            "STORE_DATA(1, \"weights\", (float)weights_1[kernel_x][kernel_y][input_z][output_z], kernel_x, kernel_y, input_z);"
        ));
        assert!(code.contains(
            "STORE_DATA(1, \"LayerOutput\", (float)l1[output_x][output_y][output_z], output_x, output_y, output_z);"
        ));
        assert!(code.contains("STORE_DATA(2, \"LayerOutput\", (float)max_value, output_x, output_y, output_z);"));
        assert!(code.contains(
            "STORE_DATA(3, \"LayerOutput\", (float)l3[input_x * 12 * 6 + input_y * 6 + input_z], input_x * 12 * 6 + input_y * 6 + input_z, -1, -1);"
        ));
        assert!(code.contains("STORE_DATA(4, \"LayerOutput\", (float)outputs[output_x], output_x, -1, -1);"));
    }

    #[test]
    fn test_single_layer() {
        let config = GenerationConfig {
            single_layer: Some(2),
            ..GenerationConfig::default()
        };
        let code = generate(LENET, config);
        assert!(code.contains("typedef DataType_input InputType[24][24][6];"));
        assert!(code.contains("typedef DataType_output OutputType[12][12][6];"));
        assert!(code.contains("\t\t\t/*, DataType_weights weights_1[5][5][1][6], DataType_biases biases_1[6]*/\n"));
        assert!(code.contains("current_cell = inputs[output_x * 2 + kernel_x][output_y * 2 + kernel_y][output_z];"));
        assert!(code.contains("outputs[output_x][output_y][output_z] = max_value;"));
        assert!(code.contains("DataType_output current_cell, max_value;"));
        assert!(!code.contains("//Layer 1"));
        assert!(!code.contains("//Layer 3"));
        assert!(!code.contains("DataType_Layer"));
        // pooling alone needs no activation helper
        assert!(!code.contains("relu("));
    }

    #[test]
    fn test_single_layer_out_of_range() {
        let network = network(LENET);
        let orders = defaults(&network);
        let config = GenerationConfig {
            single_layer: Some(5),
            ..GenerationConfig::default()
        };
        assert!(matches!(
            CodeGenerator::new(config).generate(&network, &orders),
            Err(CompileError::CodeGenError { .. })
        ));
    }

    #[test]
    fn test_pooling_without_seed() {
        let source = "model.add(Conv2D(filters=2, kernel_size=(3, 3), input_shape=(6, 6, 1)))\n\
                      model.add(MaxPooling2D(pool_size=(2, 2)))\n";
        let network = network(source);
        let orders = defaults(&network);
        assert!(matches!(
            CodeGenerator::new(GenerationConfig::default()).generate(&network, &orders),
            Err(CompileError::CodeGenError { .. })
        ));

        let config = GenerationConfig {
            pooling_minimum: Some(-1000),
            ..GenerationConfig::default()
        };
        let code = CodeGenerator::new(config).generate(&network, &orders).unwrap();
        assert!(code.contains("max_value = -1000;"));
    }

    #[test]
    fn test_biases_disabled() {
        let config = GenerationConfig {
            biases_enabled: false,
            ..GenerationConfig::default()
        };
        let code = generate(LENET, config);
        assert!(code.contains("temp_element1 = 0;"));
        assert!(code.contains("\t\t\t, DataType_weights weights_1[5][5][1][6]\n"));
        assert!(!code.contains("biases_"));
    }

    #[test]
    fn test_add_main_preamble() {
        let config = GenerationConfig {
            add_main_function: true,
            ..GenerationConfig::default()
        };
        let code = generate(LENET, config);
        let expected = "//#define _HLS_RUN

#ifndef _HLS_RUN
#include \"stdlib.h\"
#include \"stdio.h\"
#include \"time.h\"
#include <typeinfo>
#include <thread>
#endif //_HLS_RUN

#include \"param-list.h\"
#ifndef _HLS_RUN
#include \"fixed-point-analysis.h\"
extern map<string, string> arguments;
#else
#endif

#ifndef _HLS_RUN
#include \"datainterface.h\"
#include \"paraminterface.h\"
#endif //_HLS_RUN


";
        assert!(code.starts_with(expected), "{}", code);
    }
}
