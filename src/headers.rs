//! `data-types.h` generation
//!
//! Every type name referenced by the generated forward pass is defined here,
//! once per enabled data-type mode.

use crate::ast::Network;
use crate::config::{DataTypeMode, GenerationConfig};
use crate::placement::NetworkProfile;

/// Render `data-types.h` for the network
pub fn data_types_header(config: &GenerationConfig, network: &Network) -> String {
    let mut header = DataTypesHeader {
        config,
        network,
        profile: config.profile(network),
        quantized: config.quantized(),
        text: String::new(),
    };
    header.render();
    header.text
}

struct DataTypesHeader<'a> {
    config: &'a GenerationConfig,
    network: &'a Network,
    profile: NetworkProfile,
    quantized: bool,
    text: String,
}

impl DataTypesHeader<'_> {
    fn line(&mut self, line: impl AsRef<str>) {
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn all_modes(&self) -> bool {
        self.config.data_type_mode == DataTypeMode::AllModes
    }

    /// `DataType_Layer{n}`, or `DataType_output` for the last layer
    fn layer_type(&self, index: usize) -> String {
        if self.network.is_last(index) {
            "DataType_output".to_string()
        } else {
            format!("DataType_Layer{}", index + 1)
        }
    }

    fn render(&mut self) {
        self.line("#ifndef _DATA_TYPES_H");
        self.line("#define _DATA_TYPES_H");
        self.blank();

        if self.all_modes() {
            // quantized kernels only compile against the fixed-point types
            let (float, single) = if self.quantized { ("//", "") } else { ("", "//") };
            self.line(format!("{}#define FLOAT_DATATYPE", float));
            self.line(format!("{}#define FIXEDPOINT_DATATYPE_SINGLE", single));
            self.line("//#define FIXEDPOINT_DATATYPE_MULTI");
            self.blank();
        }

        let mode = self.config.data_type_mode;
        if mode.floating_point() {
            self.section("FLOAT_DATATYPE", Self::floating_point);
        }
        if mode.fixed_point_single() {
            self.section("FIXEDPOINT_DATATYPE_SINGLE", Self::fixed_point_single);
        }
        if mode.fixed_point_multi() {
            self.section("FIXEDPOINT_DATATYPE_MULTI", Self::fixed_point_multi);
        }

        self.line("#endif //_DATA_TYPES_H");
    }

    fn section(&mut self, guard: &str, body: fn(&mut Self)) {
        if self.all_modes() {
            self.line(format!("#ifdef {}", guard));
        }
        body(self);
        if self.all_modes() {
            self.line("#endif");
        }
        self.blank();
    }

    fn floating_point(&mut self) {
        self.line("typedef float DataType_relu;");
        self.blank();
        self.line("typedef float DataType_input;");
        self.line("typedef float DataType_biases;");
        self.line("typedef float DataType_weights;");

        for index in 0..self.network.len() {
            if self.network.layers[index].kind.is_weighted() {
                self.blank();
                self.line(format!("typedef float DataType_temp_element{};", index + 1));
            }
            let name = self.layer_type(index);
            self.line(format!("typedef float {};", name));
        }
    }

    fn fixed_point_single(&mut self) {
        if self.quantized {
            self.line("#include <stdint.h>");
            self.blank();
            self.line("typedef int8_t DataType_short;");
            let alexnet = self.profile == NetworkProfile::Alexnet
                && self.config.data_type_detail.as_deref() == Some("eight-bit-int");
            self.line(if alexnet {
                "typedef int32_t DataType;"
            } else {
                "typedef int64_t DataType;"
            });
        } else {
            let (width, integer) = self.fixed_point_size();
            self.line("#include <ap_fixed.h>");
            self.blank();
            self.line(format!("#define FX_SIZE_W {}", width));
            self.line(format!("#define FX_SIZE_I {}", integer));
            self.blank();
            self.line("typedef ap_fixed<FX_SIZE_W,FX_SIZE_I> DataType;");
        }

        self.blank();
        self.line("typedef DataType DataType_relu;");
        self.blank();
        let narrow = if self.quantized { "DataType_short" } else { "DataType" };
        self.line(format!("typedef {} DataType_input;", narrow));
        self.line(format!("typedef {} DataType_weights;", narrow));
        self.line("typedef DataType DataType_biases;");

        for index in 0..self.network.len() {
            let name = self.layer_type(index);
            self.blank();
            if self.network.layers[index].kind.is_weighted() {
                self.line(format!("typedef DataType DataType_temp_element{};", index + 1));
                self.line(format!("typedef DataType {};", name));
                if self.quantized {
                    self.line(format!("typedef DataType_short {}_short;", name));
                }
            } else if self.quantized {
                self.line(format!("typedef DataType_short {}_short;", name));
                self.line(format!("typedef DataType_short {};", name));
            } else {
                self.line(format!("typedef DataType {};", name));
            }
        }

        if self.quantized {
            self.blank();
            self.line("#define QUANTIZATION_FACTORS");
            self.line("typedef DataType_short DataType_IZP;");
            self.line("typedef DataType_short DataType_OZP;");
            self.line("typedef float DataType_ISF;");
            self.line("typedef float DataType_OSF;");
            self.line("typedef float DataType_WSF;");
        }
    }

    /// One shared width with a widened accumulator for every layer
    fn fixed_point_multi(&mut self) {
        let (width, integer) = self.fixed_point_size();
        self.line("#include <ap_fixed.h>");
        self.blank();
        self.line(format!("#define FX_SIZE_W {}", width));
        self.line(format!("#define FX_SIZE_I {}", integer));
        self.blank();
        self.line("typedef ap_fixed<FX_SIZE_W+1,FX_SIZE_I+1> DataType_relu;");
        self.blank();
        self.line("typedef ap_fixed<FX_SIZE_W,FX_SIZE_I> DataType_input;");
        self.line("typedef ap_fixed<FX_SIZE_W,FX_SIZE_I> DataType_biases;");
        self.line("typedef ap_fixed<FX_SIZE_W,FX_SIZE_I> DataType_weights;");

        for index in 0..self.network.len() {
            let name = self.layer_type(index);
            self.blank();
            if self.network.layers[index].kind.is_weighted() {
                self.line(format!(
                    "typedef ap_fixed<FX_SIZE_W+1,FX_SIZE_I+1> DataType_temp_element{};",
                    index + 1
                ));
            }
            self.line(format!("typedef ap_fixed<FX_SIZE_W,FX_SIZE_I> {};", name));
        }
    }

    /// Total and integer bits of the fixed-point representation
    fn fixed_point_size(&self) -> (u32, u32) {
        match self.profile {
            NetworkProfile::Lenet => (16, 7),
            NetworkProfile::Vgg => (26, 16),
            NetworkProfile::VggScalehls => (8, 8),
            _ => (16, 16),
        }
    }
}
