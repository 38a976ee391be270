//! Per-layer loop orders
//!
//! A loop order is a dash-separated permutation of the axes a layer iterates
//! over, outermost first. Requests are normalized once before generation:
//! anything structurally wrong falls back to the layer kind's default with a
//! warning. Conv2D orders then select one of three accumulator schedules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{Layer, LayerKind, Network};
use crate::diagnostic::{Diagnostics, SourceLocation};
use crate::error::{CompileError, CompileResult};

/// An iteration axis of a generated loop nest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Oz,
    Oy,
    Ox,
    Iz,
    Kx,
    Ky,
    Ix,
    Iy,
}

impl Axis {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "oz" => Some(Axis::Oz),
            "oy" => Some(Axis::Oy),
            "ox" => Some(Axis::Ox),
            "iz" => Some(Axis::Iz),
            "kx" => Some(Axis::Kx),
            "ky" => Some(Axis::Ky),
            "ix" => Some(Axis::Ix),
            "iy" => Some(Axis::Iy),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Axis::Oz => "oz",
            Axis::Oy => "oy",
            Axis::Ox => "ox",
            Axis::Iz => "iz",
            Axis::Kx => "kx",
            Axis::Ky => "ky",
            Axis::Ix => "ix",
            Axis::Iy => "iy",
        }
    }

    /// Loop counter name in the generated code
    pub fn variable(&self) -> &'static str {
        match self {
            Axis::Oz => "output_z",
            Axis::Oy => "output_y",
            Axis::Ox => "output_x",
            Axis::Iz => "input_z",
            Axis::Kx => "kernel_x",
            Axis::Ky => "kernel_y",
            Axis::Ix => "input_x",
            Axis::Iy => "input_y",
        }
    }

    /// Trip count of this axis for the given layer
    pub fn extent(&self, layer: &Layer) -> usize {
        match self {
            Axis::Oz => layer.output.z,
            Axis::Oy => layer.output.y,
            Axis::Ox => layer.output.x,
            Axis::Iz => layer.input.z,
            Axis::Ix => layer.input.x,
            Axis::Iy => layer.input.y,
            Axis::Kx | Axis::Ky => layer.kernel().unwrap_or(1),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

pub const CONV2D_DEFAULT: &str = "oz-oy-ox-iz-kx-ky";
pub const POOLING_DEFAULT: &str = "oz-oy-ox-kx-ky";
pub const FLATTEN_DEFAULT: &str = "oz-oy-ox";
pub const DENSE_DEFAULT: &str = "ox-ix";

pub fn default_order(kind: &LayerKind) -> &'static str {
    match kind {
        LayerKind::Conv2D { .. } => CONV2D_DEFAULT,
        LayerKind::Pooling2D { .. } => POOLING_DEFAULT,
        LayerKind::Flatten => FLATTEN_DEFAULT,
        LayerKind::Dense { .. } => DENSE_DEFAULT,
    }
}

/// Number of axes a layer kind iterates over
pub fn arity(kind: &LayerKind) -> usize {
    default_order(kind).split('-').count()
}

pub fn is_default(kind: &LayerKind, order: &str) -> bool {
    order == default_order(kind)
}

/// Normalize one order per layer.
///
/// An empty request list yields every default. A non-empty list whose length
/// differs from the layer count is ignored as a whole.
pub fn normalize(network: &Network, requests: &[String], diagnostics: &mut Diagnostics) -> Vec<String> {
    if !requests.is_empty() && requests.len() != network.len() {
        diagnostics.warning(
            None,
            format!(
                "{} loop order(s) given for {} layer(s); using the default orders",
                requests.len(),
                network.len()
            ),
        );
    }
    let use_requests = requests.len() == network.len();

    network
        .layers
        .iter()
        .enumerate()
        .map(|(index, layer)| {
            let request = if use_requests {
                requests[index].as_str()
            } else {
                "default"
            };
            normalize_one(index + 1, layer, request, diagnostics)
        })
        .collect()
}

/// Validate a single order, replacing it with the default when malformed
pub fn normalize_one(number: usize, layer: &Layer, request: &str, diagnostics: &mut Diagnostics) -> String {
    let default = default_order(&layer.kind);
    let request = request.trim();
    if request.is_empty() || request == "default" || request == "*" {
        return default.to_string();
    }

    let tokens: Vec<&str> = request.split('-').collect();
    let problem = if tokens.len() != arity(&layer.kind) {
        Some(format!("expected {} axes", arity(&layer.kind)))
    } else {
        match layer.kind {
            LayerKind::Conv2D { .. } if tokens[0] != "oz" => {
                Some("Conv2D orders must start with oz".to_string())
            }
            LayerKind::Conv2D { .. } if tokens[4..] != ["kx", "ky"] => {
                Some("Conv2D orders must end with kx-ky".to_string())
            }
            LayerKind::Pooling2D { .. } if pooling_axes(number, request).is_err() => {
                Some("expected a permutation of oz, oy, ox followed by kx and ky".to_string())
            }
            LayerKind::Flatten if flatten_axes(number, request).is_err() => {
                Some("expected a permutation of oz, oy, ox".to_string())
            }
            LayerKind::Dense { .. } if request != DENSE_DEFAULT => {
                Some(format!("Dense only supports {}", DENSE_DEFAULT))
            }
            _ => None,
        }
    };

    match problem {
        Some(reason) => {
            diagnostics.warning(
                Some(SourceLocation::line(layer.line)),
                format!(
                    "loop order '{}' for layer {} is invalid ({}); using {}",
                    request, number, reason, default
                ),
            );
            default.to_string()
        }
        None => request.to_string(),
    }
}

/// Parse dash-separated tokens into axes, requiring a permutation of `expected`
fn permutation(number: usize, order: &str, expected: &[Axis]) -> CompileResult<Vec<Axis>> {
    let axes = order
        .split('-')
        .map(Axis::from_token)
        .collect::<Option<Vec<Axis>>>()
        .ok_or_else(|| CompileError::loop_order(number, order))?;

    let is_permutation = axes.len() == expected.len()
        && expected.iter().all(|axis| axes.iter().filter(|a| *a == axis).count() == 1);
    if !is_permutation {
        return Err(CompileError::loop_order(number, order));
    }
    Ok(axes)
}

/// Pooling loop nest, output axes first then the window axes.
///
/// The default order walks x, y then z, keeping the channel innermost.
pub fn pooling_axes(number: usize, order: &str) -> CompileResult<Vec<Axis>> {
    if order == POOLING_DEFAULT {
        return Ok(vec![Axis::Ox, Axis::Oy, Axis::Oz, Axis::Kx, Axis::Ky]);
    }
    let axes = permutation(number, order, &[Axis::Oz, Axis::Oy, Axis::Ox, Axis::Kx, Axis::Ky])?;
    if !matches!(axes[3..], [Axis::Kx, Axis::Ky] | [Axis::Ky, Axis::Kx]) {
        return Err(CompileError::loop_order(number, order));
    }
    Ok(axes)
}

/// Flatten loop nest. The order is written with output tokens but walks the input volume.
///
/// The default order walks x, y then z, visiting the flattened index in sequence.
pub fn flatten_axes(number: usize, order: &str) -> CompileResult<Vec<Axis>> {
    if order == FLATTEN_DEFAULT {
        return Ok(vec![Axis::Ix, Axis::Iy, Axis::Iz]);
    }
    let axes = permutation(number, order, &[Axis::Oz, Axis::Oy, Axis::Ox])?;
    Ok(axes
        .into_iter()
        .map(|axis| match axis {
            Axis::Oz => Axis::Iz,
            Axis::Oy => Axis::Iy,
            _ => Axis::Ix,
        })
        .collect())
}

/// Shape of the Conv2D partial-sum storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulatorStrategy {
    /// One partial sum per output element
    Scalar,
    /// A row of partial sums along one spatial axis
    Vector,
    /// A full output plane of partial sums
    Tile,
}

/// How a Conv2D loop nest is split around its accumulator.
///
/// `outer` loops enclose the accumulator's declaration, `retained` are the
/// axes the accumulator is indexed by, and `inner` is the nest that performs
/// the multiply-accumulate, retained axes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvSchedule {
    pub strategy: AccumulatorStrategy,
    pub outer: Vec<Axis>,
    pub retained: Vec<Axis>,
    pub inner: Vec<Axis>,
}

impl ConvSchedule {
    /// Select the schedule from a normalized Conv2D order
    pub fn from_order(number: usize, order: &str) -> CompileResult<Self> {
        let axes = permutation(
            number,
            order,
            &[Axis::Oz, Axis::Oy, Axis::Ox, Axis::Iz, Axis::Kx, Axis::Ky],
        )?;
        if axes[0] != Axis::Oz || axes[4..] != [Axis::Kx, Axis::Ky] {
            return Err(CompileError::loop_order(number, order));
        }

        let (a, b, c) = (axes[1], axes[2], axes[3]);
        let schedule = match (a, b, c) {
            (Axis::Oy, Axis::Ox, Axis::Iz) | (Axis::Ox, Axis::Oy, Axis::Iz) => ConvSchedule {
                strategy: AccumulatorStrategy::Scalar,
                outer: vec![Axis::Oz, a, b],
                retained: vec![],
                inner: vec![Axis::Iz, Axis::Kx, Axis::Ky],
            },
            (Axis::Ox, Axis::Iz, Axis::Oy) | (Axis::Oy, Axis::Iz, Axis::Ox) => ConvSchedule {
                strategy: AccumulatorStrategy::Vector,
                outer: vec![Axis::Oz, a],
                retained: vec![c],
                inner: vec![Axis::Iz, c, Axis::Kx, Axis::Ky],
            },
            (Axis::Iz, Axis::Ox, Axis::Oy) | (Axis::Iz, Axis::Oy, Axis::Ox) => ConvSchedule {
                strategy: AccumulatorStrategy::Tile,
                outer: vec![Axis::Oz],
                retained: vec![Axis::Ox, Axis::Oy],
                inner: vec![Axis::Iz, b, c, Axis::Kx, Axis::Ky],
            },
            _ => return Err(CompileError::loop_order(number, order)),
        };
        Ok(schedule)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ast::{Activation, Padding, PoolingKind, Volume};

    fn conv(input: Volume, filters: usize, kernel: usize, stride: usize) -> Layer {
        Layer {
            line: 1,
            kind: LayerKind::Conv2D {
                filters,
                kernel,
                padding: Padding::Valid,
            },
            input,
            output: Volume::new(
                (input.x - kernel) / stride + 1,
                (input.y - kernel) / stride + 1,
                filters,
            ),
            stride,
            activation: Activation::Relu,
        }
    }

    fn dense(units: usize, inputs: usize) -> Layer {
        Layer {
            line: 2,
            kind: LayerKind::Dense { units },
            input: Volume::flat(inputs),
            output: Volume::flat(units),
            stride: 1,
            activation: Activation::None,
        }
    }

    fn pooling(input: Volume, kernel: usize) -> Layer {
        Layer {
            line: 3,
            kind: LayerKind::Pooling2D {
                pooling: PoolingKind::Max,
                kernel,
            },
            input,
            output: Volume::new(input.x / kernel, input.y / kernel, input.z),
            stride: kernel,
            activation: Activation::None,
        }
    }

    fn flatten(input: Volume) -> Layer {
        Layer {
            line: 4,
            kind: LayerKind::Flatten,
            input,
            output: Volume::flat(input.elements().unwrap()),
            stride: 1,
            activation: Activation::None,
        }
    }

    #[test]
    fn test_default_and_wildcard() {
        let layer = conv(Volume::new(6, 6, 2), 3, 3, 1);
        let mut diags = Diagnostics::new();
        assert_eq!(normalize_one(1, &layer, "default", &mut diags), CONV2D_DEFAULT);
        assert_eq!(normalize_one(1, &layer, "*", &mut diags), CONV2D_DEFAULT);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_invalid_orders_fall_back_with_warning() {
        let layer = conv(Volume::new(6, 6, 2), 3, 3, 1);
        for bad in ["oz-oy-ox-iz-kx", "oy-oz-ox-iz-kx-ky", "oz-oy-ox-kx-iz-ky", "oz-oy-ox-iz-ky-kx"] {
            let mut diags = Diagnostics::new();
            assert_eq!(normalize_one(1, &layer, bad, &mut diags), CONV2D_DEFAULT);
            assert_eq!(diags.warning_count(), 1, "order {}", bad);
        }
    }

    #[test]
    fn test_valid_conv_order_is_kept() {
        let layer = conv(Volume::new(6, 6, 2), 3, 3, 1);
        let mut diags = Diagnostics::new();
        assert_eq!(normalize_one(1, &layer, "oz-iz-ox-oy-kx-ky", &mut diags), "oz-iz-ox-oy-kx-ky");
        assert!(diags.is_empty());
    }

    #[test]
    fn test_pooling_and_flatten_orders_must_be_permutations() {
        let pool = pooling(Volume::new(4, 4, 2), 2);
        for bad in ["oz-oy-ox-kx-zz", "oz-oz-ox-kx-ky", "kx-oy-ox-oz-ky"] {
            let mut diags = Diagnostics::new();
            assert_eq!(normalize_one(2, &pool, bad, &mut diags), POOLING_DEFAULT);
            assert_eq!(diags.warning_count(), 1, "order {}", bad);
        }

        let mut diags = Diagnostics::new();
        assert_eq!(normalize_one(2, &pool, "oy-ox-oz-ky-kx", &mut diags), "oy-ox-oz-ky-kx");
        assert!(diags.is_empty());

        let flatten = flatten(Volume::new(4, 4, 2));
        let mut diags = Diagnostics::new();
        assert_eq!(normalize_one(3, &flatten, "ox-ox-oz", &mut diags), FLATTEN_DEFAULT);
        assert_eq!(normalize_one(3, &flatten, "ix-iy-iz", &mut diags), FLATTEN_DEFAULT);
        assert_eq!(diags.warning_count(), 2);
    }

    #[test]
    fn test_dense_accepts_only_default() {
        let layer = dense(4, 8);
        let mut diags = Diagnostics::new();
        assert_eq!(normalize_one(1, &layer, "ix-ox", &mut diags), DENSE_DEFAULT);
        assert_eq!(diags.warning_count(), 1);
    }

    #[test]
    fn test_request_count_mismatch_uses_defaults() {
        let network = Network::new(vec![conv(Volume::new(6, 6, 2), 3, 3, 1)]);
        let mut diags = Diagnostics::new();
        let orders = normalize(
            &network,
            &["oz-ox-oy-iz-kx-ky".to_string(), "ox-ix".to_string()],
            &mut diags,
        );
        assert_eq!(orders, vec![CONV2D_DEFAULT.to_string()]);
        assert_eq!(diags.warning_count(), 1);
    }

    #[test]
    fn test_schedule_selection() {
        let scalar = ConvSchedule::from_order(1, "oz-ox-oy-iz-kx-ky").unwrap();
        assert_eq!(scalar.strategy, AccumulatorStrategy::Scalar);
        assert_eq!(scalar.outer, vec![Axis::Oz, Axis::Ox, Axis::Oy]);

        let vector = ConvSchedule::from_order(1, "oz-oy-iz-ox-kx-ky").unwrap();
        assert_eq!(vector.strategy, AccumulatorStrategy::Vector);
        assert_eq!(vector.retained, vec![Axis::Ox]);
        assert_eq!(vector.inner, vec![Axis::Iz, Axis::Ox, Axis::Kx, Axis::Ky]);

        let tile = ConvSchedule::from_order(1, "oz-iz-oy-ox-kx-ky").unwrap();
        assert_eq!(tile.strategy, AccumulatorStrategy::Tile);
        assert_eq!(tile.retained, vec![Axis::Ox, Axis::Oy]);
        assert_eq!(tile.inner, vec![Axis::Iz, Axis::Oy, Axis::Ox, Axis::Kx, Axis::Ky]);
    }

    #[test]
    fn test_unsupported_middle_is_fatal() {
        let result = ConvSchedule::from_order(3, "oz-oy-oy-iz-kx-ky");
        assert!(matches!(result, Err(CompileError::UnsupportedLoopOrder { layer: 3, .. })));
    }

    #[test]
    fn test_pooling_and_flatten_axes() {
        assert_eq!(
            pooling_axes(1, "oy-ox-oz-ky-kx").unwrap(),
            vec![Axis::Oy, Axis::Ox, Axis::Oz, Axis::Ky, Axis::Kx]
        );
        assert!(pooling_axes(1, "oz-oz-ox-kx-ky").is_err());
        assert!(pooling_axes(1, "oz-kx-ox-oy-ky").is_err());
        assert_eq!(
            flatten_axes(1, "oz-ox-oy").unwrap(),
            vec![Axis::Iz, Axis::Ix, Axis::Iy]
        );
    }

    #[test]
    fn test_default_pooling_and_flatten_nests_keep_channel_innermost() {
        assert_eq!(
            pooling_axes(1, POOLING_DEFAULT).unwrap(),
            vec![Axis::Ox, Axis::Oy, Axis::Oz, Axis::Kx, Axis::Ky]
        );
        assert_eq!(
            flatten_axes(1, FLATTEN_DEFAULT).unwrap(),
            vec![Axis::Ix, Axis::Iy, Axis::Iz]
        );
    }

    /// Walk a schedule's loop nest the way the emitted code does
    fn run_schedule(
        schedule: &ConvSchedule,
        layer: &Layer,
        input: &dyn Fn(usize, usize, usize) -> i64,
        weight: &dyn Fn(usize, usize, usize, usize) -> i64,
    ) -> HashMap<(usize, usize, usize), i64> {
        let mut output = HashMap::new();
        let mut index = HashMap::new();
        walk_outer(schedule, layer, 0, &mut index, input, weight, &mut output);
        output
    }

    fn walk_outer(
        schedule: &ConvSchedule,
        layer: &Layer,
        depth: usize,
        index: &mut HashMap<Axis, usize>,
        input: &dyn Fn(usize, usize, usize) -> i64,
        weight: &dyn Fn(usize, usize, usize, usize) -> i64,
        output: &mut HashMap<(usize, usize, usize), i64>,
    ) {
        if depth < schedule.outer.len() {
            let axis = schedule.outer[depth];
            for i in 0..axis.extent(layer) {
                index.insert(axis, i);
                walk_outer(schedule, layer, depth + 1, index, input, weight, output);
            }
            return;
        }

        let mut accumulator: HashMap<Vec<usize>, i64> = HashMap::new();
        walk_inner(schedule, layer, 0, index, input, weight, &mut accumulator);
        for (retained, sum) in accumulator {
            let mut full = index.clone();
            for (axis, i) in schedule.retained.iter().zip(retained) {
                full.insert(*axis, i);
            }
            output.insert((full[&Axis::Ox], full[&Axis::Oy], full[&Axis::Oz]), sum);
        }
    }

    fn walk_inner(
        schedule: &ConvSchedule,
        layer: &Layer,
        depth: usize,
        index: &mut HashMap<Axis, usize>,
        input: &dyn Fn(usize, usize, usize) -> i64,
        weight: &dyn Fn(usize, usize, usize, usize) -> i64,
        accumulator: &mut HashMap<Vec<usize>, i64>,
    ) {
        if depth < schedule.inner.len() {
            let axis = schedule.inner[depth];
            for i in 0..axis.extent(layer) {
                index.insert(axis, i);
                walk_inner(schedule, layer, depth + 1, index, input, weight, accumulator);
            }
            return;
        }

        let key: Vec<usize> = schedule.retained.iter().map(|axis| index[axis]).collect();
        let s = layer.stride;
        let product = input(
            index[&Axis::Ox] * s + index[&Axis::Kx],
            index[&Axis::Oy] * s + index[&Axis::Ky],
            index[&Axis::Iz],
        ) * weight(index[&Axis::Kx], index[&Axis::Ky], index[&Axis::Iz], index[&Axis::Oz]);
        *accumulator.entry(key).or_insert(0) += product;
    }

    #[test]
    fn test_strategies_compute_identical_sums() {
        let layer = conv(Volume::new(7, 6, 3), 2, 3, 2);
        let input = |x: usize, y: usize, z: usize| (x * 31 + y * 7 + z * 3) as i64 % 11 - 5;
        let weight = |kx: usize, ky: usize, iz: usize, oz: usize| (kx * 5 + ky * 3 + iz + oz * 13) as i64 % 7 - 3;

        let reference = run_schedule(
            &ConvSchedule::from_order(1, CONV2D_DEFAULT).unwrap(),
            &layer,
            &input,
            &weight,
        );
        assert_eq!(Some(reference.len()), layer.output.elements());

        for order in [
            "oz-ox-oy-iz-kx-ky",
            "oz-ox-iz-oy-kx-ky",
            "oz-oy-iz-ox-kx-ky",
            "oz-iz-ox-oy-kx-ky",
            "oz-iz-oy-ox-kx-ky",
        ] {
            let schedule = ConvSchedule::from_order(1, order).unwrap();
            assert_eq!(run_schedule(&schedule, &layer, &input, &weight), reference, "order {}", order);
        }
    }
}
