//! The density-function expression graph.
//!
//! Graphs exist in two forms. The *proto* tree in this module is what
//! configuration deserializes into: an immutable value tree whose leaves may
//! reference named functions and named noises by string. The seed-binding
//! pass in [`compile`] folds a proto tree into the flat runtime arena in
//! [`node`], materializing concrete seeded samplers along the way.

pub mod compile;
pub(crate) mod node;

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::noise::NoiseParam;

/// An `f64` wrapper hashable by bit pattern. Proto nodes are hashed only to
/// detect that two subtrees are the same definition, so bitwise identity is
/// the right equivalence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashF64(pub f64);

impl Hash for HashF64 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_le_bytes().hash(state);
    }
}

impl Eq for HashF64 {}

impl From<f64> for HashF64 {
    #[inline]
    fn from(value: f64) -> Self {
        HashF64(value)
    }
}

/// A child slot in the proto tree: an inline constant, a reference into the
/// function registry, or an owned subtree. References are how the graph
/// shares diamond-shaped subgraphs without duplicating them; the binding
/// pass resolves every identical reference to one arena slot.
#[derive(Hash, PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Holder {
    Value(HashF64),
    Reference(String),
    Owned(Box<DensityFunction>),
}

impl From<f64> for Holder {
    fn from(value: f64) -> Self {
        Holder::Value(value.into())
    }
}

impl From<DensityFunction> for Holder {
    fn from(function: DensityFunction) -> Self {
        Holder::Owned(Box::new(function))
    }
}

impl From<&str> for Holder {
    fn from(name: &str) -> Self {
        Holder::Reference(name.to_owned())
    }
}

impl From<SingleArg> for Holder {
    fn from(func: SingleArg) -> Self {
        func.argument
    }
}

#[derive(Hash, Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DensityFunction {
    BlendedNoise {
        xz_scale: HashF64,
        y_scale: HashF64,
        xz_factor: HashF64,
        y_factor: HashF64,
        smear_scale_multiplier: HashF64,
    },
    /// Marker: evaluate only at cell corners and trilinearly interpolate in
    /// between. Consumed by the chunk interpolator; a plain pass-through
    /// everywhere else.
    Interpolated(SingleArg),
    /// Marker: cache per column at quarter resolution, Y-independent.
    FlatCache(SingleArg),
    /// Marker: cache the last sampled (x, z) column.
    Cache2d(SingleArg),
    /// Marker: cache one value per interpolation step.
    CacheOnce(SingleArg),
    /// Marker: precompute every block of the current cell.
    CacheAllInCell(SingleArg),
    Noise {
        noise: NoiseSource,
        xz_scale: HashF64,
        y_scale: HashF64,
    },
    WeirdScaledSampler {
        input: Holder,
        noise: NoiseSource,
        rarity_value_mapper: RarityValueMapper,
    },
    ShiftedNoise {
        shift_x: Holder,
        shift_y: Holder,
        shift_z: Holder,
        xz_scale: HashF64,
        y_scale: HashF64,
        noise: NoiseSource,
    },
    RangeChoice {
        input: Holder,
        min_inclusive: HashF64,
        max_exclusive: HashF64,
        when_in_range: Holder,
        when_out_of_range: Holder,
    },
    /// Samples the noise at `(x/4, 0, z/4)`, scaled by 4. Used as an X shift.
    ShiftA { argument: NoiseSource },
    /// Samples the noise at `(z/4, x/4, 0)`, scaled by 4. Used as a Z shift.
    ShiftB { argument: NoiseSource },
    /// Samples the noise at `(x/4, y/4, z/4)`, scaled by 4.
    Shift { argument: NoiseSource },
    Clamp {
        input: Holder,
        min: HashF64,
        max: HashF64,
    },
    Abs(SingleArg),
    Square(SingleArg),
    Cube(SingleArg),
    HalfNegative(SingleArg),
    QuarterNegative(SingleArg),
    Squeeze(SingleArg),
    Add(TwoArg),
    Mul(TwoArg),
    Min(TwoArg),
    Max(TwoArg),
    Spline { spline: SplineHolder },
    Constant { argument: HashF64 },
    YClampedGradient {
        from_y: i32,
        to_y: i32,
        from_value: HashF64,
        to_value: HashF64,
    },
}

impl DensityFunction {
    pub fn constant(value: f64) -> Self {
        DensityFunction::Constant {
            argument: value.into(),
        }
    }

    pub fn add(a: impl Into<Holder>, b: impl Into<Holder>) -> Self {
        DensityFunction::Add(TwoArg::new(a, b))
    }

    pub fn mul(a: impl Into<Holder>, b: impl Into<Holder>) -> Self {
        DensityFunction::Mul(TwoArg::new(a, b))
    }

    pub fn min_of(a: impl Into<Holder>, b: impl Into<Holder>) -> Self {
        DensityFunction::Min(TwoArg::new(a, b))
    }

    pub fn max_of(a: impl Into<Holder>, b: impl Into<Holder>) -> Self {
        DensityFunction::Max(TwoArg::new(a, b))
    }

    pub fn abs(input: impl Into<Holder>) -> Self {
        DensityFunction::Abs(SingleArg::new(input))
    }

    pub fn square(input: impl Into<Holder>) -> Self {
        DensityFunction::Square(SingleArg::new(input))
    }

    pub fn half_negative(input: impl Into<Holder>) -> Self {
        DensityFunction::HalfNegative(SingleArg::new(input))
    }

    pub fn quarter_negative(input: impl Into<Holder>) -> Self {
        DensityFunction::QuarterNegative(SingleArg::new(input))
    }

    pub fn squeeze(input: impl Into<Holder>) -> Self {
        DensityFunction::Squeeze(SingleArg::new(input))
    }

    pub fn clamp(input: impl Into<Holder>, min: f64, max: f64) -> Self {
        DensityFunction::Clamp {
            input: input.into(),
            min: min.into(),
            max: max.into(),
        }
    }

    pub fn interpolated(input: impl Into<Holder>) -> Self {
        DensityFunction::Interpolated(SingleArg::new(input))
    }

    pub fn flat_cache(input: impl Into<Holder>) -> Self {
        DensityFunction::FlatCache(SingleArg::new(input))
    }

    pub fn cache_2d(input: impl Into<Holder>) -> Self {
        DensityFunction::Cache2d(SingleArg::new(input))
    }

    pub fn cache_once(input: impl Into<Holder>) -> Self {
        DensityFunction::CacheOnce(SingleArg::new(input))
    }

    pub fn noise(noise: impl Into<NoiseSource>, xz_scale: f64, y_scale: f64) -> Self {
        DensityFunction::Noise {
            noise: noise.into(),
            xz_scale: xz_scale.into(),
            y_scale: y_scale.into(),
        }
    }

    pub fn y_clamped_gradient(from_y: i32, to_y: i32, from_value: f64, to_value: f64) -> Self {
        DensityFunction::YClampedGradient {
            from_y,
            to_y,
            from_value: from_value.into(),
            to_value: to_value.into(),
        }
    }

    /// `from + alpha * (to - from)` expressed as graph nodes, with the alpha
    /// input cached once per step.
    pub fn lerp(alpha: impl Into<Holder>, from: f64, to: impl Into<Holder>) -> Self {
        DensityFunction::add(
            DensityFunction::mul(
                DensityFunction::cache_once(alpha),
                DensityFunction::add(to, -from),
            ),
            from,
        )
    }
}

/// A named noise reference or inline parameters.
#[derive(Hash, PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NoiseSource {
    Reference(String),
    Owned(NoiseParamRepr),
}

impl From<&str> for NoiseSource {
    fn from(name: &str) -> Self {
        NoiseSource::Reference(name.to_owned())
    }
}

impl From<crate::noise::Noises> for NoiseSource {
    fn from(noise: crate::noise::Noises) -> Self {
        NoiseSource::Reference(noise.name().to_owned())
    }
}

impl From<NoiseParam> for NoiseSource {
    fn from(param: NoiseParam) -> Self {
        NoiseSource::Owned(NoiseParamRepr {
            first_octave: param.first_octave,
            amplitudes: param.amplitudes.into_iter().map(HashF64).collect(),
        })
    }
}

/// Hashable mirror of [`NoiseParam`] for inline proto noises.
#[derive(Hash, PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct NoiseParamRepr {
    #[serde(rename = "firstOctave")]
    pub first_octave: i32,
    pub amplitudes: Vec<HashF64>,
}

impl NoiseParamRepr {
    pub fn to_param(&self) -> NoiseParam {
        NoiseParam::new(
            self.first_octave,
            self.amplitudes.iter().map(|a| a.0).collect(),
        )
    }
}

#[derive(Hash, PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RarityValueMapper {
    Type1,
    Type2,
}

impl RarityValueMapper {
    /// Maps an input density to a sampling-frequency divisor.
    pub fn scale(self, value: f64) -> f64 {
        match self {
            RarityValueMapper::Type1 => {
                if value < -0.5 {
                    0.75
                } else if value < 0.0 {
                    1.0
                } else if value < 0.5 {
                    1.5
                } else {
                    2.0
                }
            }
            RarityValueMapper::Type2 => {
                if value < -0.75 {
                    0.5
                } else if value < -0.5 {
                    0.75
                } else if value < 0.5 {
                    1.0
                } else if value < 0.75 {
                    2.0
                } else {
                    3.0
                }
            }
        }
    }

    pub fn max_multiplier(self) -> f64 {
        match self {
            RarityValueMapper::Type1 => 2.0,
            RarityValueMapper::Type2 => 3.0,
        }
    }
}

#[derive(Hash, PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct SingleArg {
    pub argument: Holder,
}

impl SingleArg {
    pub fn new(argument: impl Into<Holder>) -> Self {
        Self {
            argument: argument.into(),
        }
    }
}

#[derive(Hash, PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct TwoArg {
    pub argument1: Holder,
    pub argument2: Holder,
}

impl TwoArg {
    pub fn new(argument1: impl Into<Holder>, argument2: impl Into<Holder>) -> Self {
        Self {
            argument1: argument1.into(),
            argument2: argument2.into(),
        }
    }
}

#[derive(Hash, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplineHolder {
    Constant(HashF64),
    Spline(SplineDef),
}

#[derive(Hash, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct SplineDef {
    pub coordinate: Holder,
    pub points: Vec<SplinePointDef>,
}

#[derive(Hash, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct SplinePointDef {
    pub location: HashF64,
    pub value: SplineHolder,
    pub derivative: HashF64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proto_round_trips_through_json() {
        let function = DensityFunction::add(
            DensityFunction::y_clamped_gradient(0, 256, 1.0, -1.0),
            DensityFunction::noise("offset", 1.0, 1.0),
        );
        let json = serde_json::to_string(&function).unwrap();
        let back: DensityFunction = serde_json::from_str(&json).unwrap();
        assert_eq!(function, back);
    }

    #[test]
    fn identical_subtrees_hash_identically() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = DensityFunction::noise("erosion", 0.25, 0.0);
        let b = DensityFunction::noise("erosion", 0.25, 0.0);
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(a, b);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn holder_parses_bare_numbers_and_names() {
        let value: Holder = serde_json::from_str("-0.5").unwrap();
        assert_eq!(value, Holder::Value(HashF64(-0.5)));
        let reference: Holder = serde_json::from_str("\"erosion\"").unwrap();
        assert_eq!(reference, Holder::Reference("erosion".to_owned()));
    }
}
