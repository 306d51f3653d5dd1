//! The one-time per-seed binding pass.
//!
//! Binding folds a proto tree bottom-up into the flat arena: named noise
//! references become concrete seeded samplers (memoized per name, so every
//! reference to one name binds to the *same* instance), named function
//! references resolve through the registry to a single arena slot, and every
//! node's `[min, max]` is frozen using interval arithmetic now that concrete
//! noise maxima are known.
//!
//! The pass is pure with respect to its inputs: the proto tree is never
//! mutated, so binding the same definitions twice produces an identical
//! arena. That makes re-binding a no-op by construction, which matters
//! because callers may re-enter shared sub-graphs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use orogen_random::{PositionalRandom, Random, RandomSource, Splitter};
use thiserror::Error;
use tracing::debug;

use crate::density::node::{
    BinaryOp, MarkerKind, MultiSplineRt, Node, ShiftMode, SplineRt, UnaryOp,
};
use crate::density::{
    DensityFunction, Holder, NoiseSource, SingleArg, SplineDef, SplineHolder, TwoArg,
};
use crate::noise::NoiseRegistry;
use crate::noise::blended::BlendedNoise;
use crate::noise::normal::NormalNoise;

/// Named proto density functions, the registry that [`Holder::Reference`]
/// resolves through.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, DensityFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, function: DensityFunction) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<&DensityFunction> {
        self.functions.get(name)
    }
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("unknown density function reference `{0}`")]
    UnknownFunction(String),
    #[error("unknown noise parameters `{0}`")]
    UnknownNoise(String),
    #[error("density function reference cycle through `{0}`")]
    ReferenceCycle(String),
    #[error("spline has no control points")]
    EmptySpline,
    #[error("spline locations are not strictly increasing")]
    UnsortedSpline,
}

pub(crate) struct MarkerInfo {
    pub index: usize,
    pub kind: MarkerKind,
    pub input: usize,
}

/// Folds proto trees into one shared arena. One compiler instance is used
/// per binding pass; its noise cache is never touched again once the bound
/// router is built.
pub(crate) struct Compiler<'a> {
    functions: &'a FunctionRegistry,
    noises: &'a NoiseRegistry,
    splitter: Splitter,
    noise_cache: BTreeMap<String, Arc<NormalNoise>>,
    memo: HashMap<DensityFunction, usize>,
    reference_memo: HashMap<String, usize>,
    resolving: HashSet<String>,
    nodes: Vec<Node>,
    markers: Vec<MarkerInfo>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(
        functions: &'a FunctionRegistry,
        noises: &'a NoiseRegistry,
        seed: u64,
        legacy: bool,
    ) -> Self {
        let mut random = RandomSource::new(seed, legacy);
        Self {
            functions,
            noises,
            splitter: random.fork_positional(),
            noise_cache: BTreeMap::new(),
            memo: HashMap::new(),
            reference_memo: HashMap::new(),
            resolving: HashSet::new(),
            nodes: Vec::new(),
            markers: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> (Vec<Node>, Vec<MarkerInfo>) {
        debug!(
            nodes = self.nodes.len(),
            markers = self.markers.len(),
            noises = self.noise_cache.len(),
            "bound density function arena"
        );
        (self.nodes, self.markers)
    }

    pub(crate) fn compile_holder(&mut self, holder: &Holder) -> Result<usize, BindError> {
        match holder {
            Holder::Value(value) => Ok(self.push_memo(
                DensityFunction::Constant { argument: *value },
                Node::Constant { value: value.0 },
            )),
            Holder::Reference(name) => self.compile_reference(name),
            Holder::Owned(function) => self.compile(function),
        }
    }

    fn compile_reference(&mut self, name: &str) -> Result<usize, BindError> {
        if let Some(&index) = self.reference_memo.get(name) {
            return Ok(index);
        }
        if !self.resolving.insert(name.to_owned()) {
            return Err(BindError::ReferenceCycle(name.to_owned()));
        }
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| BindError::UnknownFunction(name.to_owned()))?
            .clone();
        let index = self.compile(&function)?;
        self.resolving.remove(name);
        self.reference_memo.insert(name.to_owned(), index);
        Ok(index)
    }

    /// One case per node kind; the exhaustive match is the visitor the graph
    /// is rebuilt through.
    pub(crate) fn compile(&mut self, function: &DensityFunction) -> Result<usize, BindError> {
        if let Some(&index) = self.memo.get(function) {
            return Ok(index);
        }
        let node = match function {
            DensityFunction::Constant { argument } => Node::Constant { value: argument.0 },
            DensityFunction::BlendedNoise {
                xz_scale,
                y_scale,
                xz_factor,
                y_factor,
                smear_scale_multiplier,
            } => {
                let mut random = self.splitter.with_hash("terrain");
                Node::Blended {
                    noise: Arc::new(BlendedNoise::new(
                        &mut random,
                        xz_scale.0,
                        y_scale.0,
                        xz_factor.0,
                        y_factor.0,
                        smear_scale_multiplier.0,
                    )),
                }
            }
            DensityFunction::Noise {
                noise,
                xz_scale,
                y_scale,
            } => {
                let noise = self.bind_noise(noise)?;
                let max_value = noise.max_value();
                Node::Noise {
                    noise,
                    xz_scale: xz_scale.0,
                    y_scale: y_scale.0,
                    max_value,
                }
            }
            DensityFunction::ShiftA { argument } => self.shift_node(argument, ShiftMode::A)?,
            DensityFunction::ShiftB { argument } => self.shift_node(argument, ShiftMode::B)?,
            DensityFunction::Shift { argument } => self.shift_node(argument, ShiftMode::Xyz)?,
            DensityFunction::ShiftedNoise {
                shift_x,
                shift_y,
                shift_z,
                xz_scale,
                y_scale,
                noise,
            } => {
                let shift_x = self.compile_holder(shift_x)?;
                let shift_y = self.compile_holder(shift_y)?;
                let shift_z = self.compile_holder(shift_z)?;
                let noise = self.bind_noise(noise)?;
                let max_value = noise.max_value();
                Node::ShiftedNoise {
                    noise,
                    shift_x,
                    shift_y,
                    shift_z,
                    xz_scale: xz_scale.0,
                    y_scale: y_scale.0,
                    max_value,
                }
            }
            DensityFunction::WeirdScaledSampler {
                input,
                noise,
                rarity_value_mapper,
            } => {
                let input = self.compile_holder(input)?;
                let noise = self.bind_noise(noise)?;
                let max_value = noise.max_value() * rarity_value_mapper.max_multiplier();
                Node::WeirdScaled {
                    input,
                    noise,
                    mapper: *rarity_value_mapper,
                    max_value,
                }
            }
            DensityFunction::YClampedGradient {
                from_y,
                to_y,
                from_value,
                to_value,
            } => Node::YGradient {
                from_y: f64::from(*from_y),
                to_y: f64::from(*to_y),
                from_value: from_value.0,
                to_value: to_value.0,
            },
            DensityFunction::Abs(arg) => self.unary_node(arg, UnaryOp::Abs)?,
            DensityFunction::Square(arg) => self.unary_node(arg, UnaryOp::Square)?,
            DensityFunction::Cube(arg) => self.unary_node(arg, UnaryOp::Cube)?,
            DensityFunction::HalfNegative(arg) => self.unary_node(arg, UnaryOp::HalfNegative)?,
            DensityFunction::QuarterNegative(arg) => {
                self.unary_node(arg, UnaryOp::QuarterNegative)?
            }
            DensityFunction::Squeeze(arg) => self.unary_node(arg, UnaryOp::Squeeze)?,
            DensityFunction::Add(args) => self.binary_node(args, BinaryOp::Add)?,
            DensityFunction::Mul(args) => self.binary_node(args, BinaryOp::Mul)?,
            DensityFunction::Min(args) => self.binary_node(args, BinaryOp::Min)?,
            DensityFunction::Max(args) => self.binary_node(args, BinaryOp::Max)?,
            DensityFunction::Clamp { input, min, max } => {
                let input = self.compile_holder(input)?;
                Node::Clamp {
                    input,
                    min_value: min.0,
                    max_value: max.0,
                }
            }
            DensityFunction::RangeChoice {
                input,
                min_inclusive,
                max_exclusive,
                when_in_range,
                when_out_of_range,
            } => {
                let input = self.compile_holder(input)?;
                let when_in = self.compile_holder(when_in_range)?;
                let when_out = self.compile_holder(when_out_of_range)?;
                let min_value = self.nodes[when_in].min().min(self.nodes[when_out].min());
                let max_value = self.nodes[when_in].max().max(self.nodes[when_out].max());
                Node::RangeChoice {
                    input,
                    min_inclusive: min_inclusive.0,
                    max_exclusive: max_exclusive.0,
                    when_in,
                    when_out,
                    min_value,
                    max_value,
                }
            }
            DensityFunction::Spline { spline } => {
                let spline = self.compile_spline(spline)?;
                let (min_value, max_value) = spline.min_max(&self.nodes);
                Node::Spline {
                    spline,
                    min_value: f64::from(min_value),
                    max_value: f64::from(max_value),
                }
            }
            DensityFunction::Interpolated(arg) => self.marker_node(arg, MarkerKind::Interpolated)?,
            DensityFunction::FlatCache(arg) => self.marker_node(arg, MarkerKind::FlatCache)?,
            DensityFunction::Cache2d(arg) => self.marker_node(arg, MarkerKind::Cache2d)?,
            DensityFunction::CacheOnce(arg) => self.marker_node(arg, MarkerKind::CacheOnce)?,
            DensityFunction::CacheAllInCell(arg) => self.marker_node(arg, MarkerKind::CellCache)?,
        };
        Ok(self.push_memo(function.clone(), node))
    }

    fn shift_node(&mut self, argument: &NoiseSource, mode: ShiftMode) -> Result<Node, BindError> {
        let noise = self.bind_noise(argument)?;
        let max_value = noise.max_value() * 4.0;
        Ok(Node::Shift {
            noise,
            mode,
            max_value,
        })
    }

    fn unary_node(&mut self, argument: &SingleArg, op: UnaryOp) -> Result<Node, BindError> {
        let input = self.compile_holder(&argument.argument)?;
        let input_min = self.nodes[input].min();
        let input_max = self.nodes[input].max();
        let (min_value, max_value) = match op {
            UnaryOp::Abs => {
                if input_min >= 0.0 {
                    (input_min, input_max)
                } else if input_max <= 0.0 {
                    (-input_max, -input_min)
                } else {
                    (0.0, input_max.max(-input_min))
                }
            }
            UnaryOp::Square => {
                if input_min >= 0.0 {
                    (input_min * input_min, input_max * input_max)
                } else if input_max <= 0.0 {
                    (input_max * input_max, input_min * input_min)
                } else {
                    (0.0, (input_min * input_min).max(input_max * input_max))
                }
            }
            // Monotonic over the whole line: endpoints carry over.
            UnaryOp::Cube | UnaryOp::HalfNegative | UnaryOp::QuarterNegative | UnaryOp::Squeeze => {
                (op.apply(input_min), op.apply(input_max))
            }
        };
        Ok(Node::Unary {
            op,
            input,
            min_value,
            max_value,
        })
    }

    fn binary_node(&mut self, args: &TwoArg, op: BinaryOp) -> Result<Node, BindError> {
        let argument1 = self.compile_holder(&args.argument1)?;
        let argument2 = self.compile_holder(&args.argument2)?;
        let (min1, max1) = (self.nodes[argument1].min(), self.nodes[argument1].max());
        let (min2, max2) = (self.nodes[argument2].min(), self.nodes[argument2].max());
        let (min_value, max_value) = match op {
            BinaryOp::Add => (min1 + min2, max1 + max2),
            BinaryOp::Mul => {
                let products = [min1 * min2, min1 * max2, max1 * min2, max1 * max2];
                let min = products.iter().copied().fold(f64::INFINITY, f64::min);
                let max = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max)
            }
            BinaryOp::Min => (min1.min(min2), max1.min(max2)),
            BinaryOp::Max => (min1.max(min2), max1.max(max2)),
        };
        Ok(Node::Binary {
            op,
            argument1,
            argument2,
            min_value,
            max_value,
        })
    }

    fn marker_node(&mut self, argument: &SingleArg, kind: MarkerKind) -> Result<Node, BindError> {
        let input = self.compile_holder(&argument.argument)?;
        let min_value = self.nodes[input].min();
        let max_value = self.nodes[input].max();
        let slot = self.markers.len();
        // The marker's arena index is assigned by push_memo right after this
        // returns; record it there.
        Ok(Node::Marker {
            kind,
            input,
            slot,
            min_value,
            max_value,
        })
    }

    fn compile_spline(&mut self, holder: &SplineHolder) -> Result<SplineRt, BindError> {
        match holder {
            SplineHolder::Constant(value) => Ok(SplineRt::Fixed(value.0 as f32)),
            SplineHolder::Spline(def) => Ok(SplineRt::Multi(self.compile_spline_def(def)?)),
        }
    }

    fn compile_spline_def(&mut self, def: &SplineDef) -> Result<MultiSplineRt, BindError> {
        if def.points.is_empty() {
            return Err(BindError::EmptySpline);
        }
        let coordinate = self.compile_holder(&def.coordinate)?;
        let mut locations = Vec::with_capacity(def.points.len());
        let mut values = Vec::with_capacity(def.points.len());
        let mut derivatives = Vec::with_capacity(def.points.len());
        for point in &def.points {
            let location = point.location.0 as f32;
            if let Some(&last) = locations.last() {
                if location <= last {
                    return Err(BindError::UnsortedSpline);
                }
            }
            locations.push(location);
            values.push(self.compile_spline(&point.value)?);
            derivatives.push(point.derivative.0 as f32);
        }
        Ok(MultiSplineRt {
            coordinate,
            locations,
            values,
            derivatives,
        })
    }

    fn bind_noise(&mut self, source: &NoiseSource) -> Result<Arc<NormalNoise>, BindError> {
        let (key, param) = match source {
            NoiseSource::Reference(name) => {
                let param = self
                    .noises
                    .get(name)
                    .ok_or_else(|| BindError::UnknownNoise(name.clone()))?;
                (name.clone(), param.clone())
            }
            // Inline parameters are keyed by their serialized form so that
            // identical definitions still share one instance.
            NoiseSource::Owned(repr) => {
                let param = repr.to_param();
                let key = format!(
                    "inline/{}/{:?}",
                    param.first_octave,
                    param
                        .amplitudes
                        .iter()
                        .map(|a| a.to_bits())
                        .collect::<Vec<_>>()
                );
                (key, param)
            }
        };
        if let Some(noise) = self.noise_cache.get(&key) {
            return Ok(noise.clone());
        }
        let mut random = self.splitter.with_hash(key.as_bytes());
        let noise = Arc::new(NormalNoise::new(&mut random, &param));
        self.noise_cache.insert(key, noise.clone());
        Ok(noise)
    }

    fn push_memo(&mut self, proto: DensityFunction, node: Node) -> usize {
        if let Some(&index) = self.memo.get(&proto) {
            return index;
        }
        let index = self.nodes.len();
        if let Node::Marker { kind, input, .. } = &node {
            self.markers.push(MarkerInfo {
                index,
                kind: *kind,
                input: *input,
            });
        }
        self.nodes.push(node);
        self.memo.insert(proto, index);
        index
    }
}
