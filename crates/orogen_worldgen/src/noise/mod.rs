pub mod blended;
pub mod normal;
pub mod octave;
pub mod perlin;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Octave layout of a named noise: the index of the lowest octave and one
/// amplitude per octave (zero disables an octave without shifting the rest).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseParam {
    #[serde(rename = "firstOctave")]
    pub first_octave: i32,
    pub amplitudes: Vec<f64>,
}

impl Default for NoiseParam {
    fn default() -> Self {
        Self {
            first_octave: -1,
            amplitudes: vec![1.0],
        }
    }
}

impl NoiseParam {
    pub fn new(first_octave: i32, amplitudes: Vec<f64>) -> Self {
        Self {
            first_octave,
            amplitudes,
        }
    }
}

/// The noise parameters the built-in router definitions reference.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Noises {
    Temperature,
    Vegetation,
    Continentalness,
    Erosion,
    Ridge,
    Offset,
    Jagged,
    AquiferBarrier,
    AquiferFluidLevelFloodedness,
    AquiferLava,
    AquiferFluidLevelSpread,
}

impl Noises {
    pub fn name(self) -> &'static str {
        match self {
            Noises::Temperature => "temperature",
            Noises::Vegetation => "vegetation",
            Noises::Continentalness => "continentalness",
            Noises::Erosion => "erosion",
            Noises::Ridge => "ridge",
            Noises::Offset => "offset",
            Noises::Jagged => "jagged",
            Noises::AquiferBarrier => "aquifer_barrier",
            Noises::AquiferFluidLevelFloodedness => "aquifer_fluid_level_floodedness",
            Noises::AquiferLava => "aquifer_lava",
            Noises::AquiferFluidLevelSpread => "aquifer_fluid_level_spread",
        }
    }

    pub fn to_param(self) -> NoiseParam {
        match self {
            Noises::Temperature => NoiseParam::new(-10, vec![1.5, 0.0, 1.0, 0.0, 0.0, 0.0]),
            Noises::Vegetation => NoiseParam::new(-8, vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
            Noises::Continentalness => {
                NoiseParam::new(-9, vec![1.0, 1.0, 2.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0])
            }
            Noises::Erosion => NoiseParam::new(-9, vec![1.0, 1.0, 0.0, 1.0, 1.0]),
            Noises::Ridge => NoiseParam::new(-7, vec![1.0, 2.0, 1.0, 0.0, 0.0, 0.0]),
            Noises::Offset => NoiseParam::new(-3, vec![1.0, 1.0, 1.0, 0.0]),
            Noises::Jagged => NoiseParam::new(-16, vec![1.0; 16]),
            Noises::AquiferBarrier => NoiseParam::new(-3, vec![1.0]),
            Noises::AquiferFluidLevelFloodedness => NoiseParam::new(-7, vec![1.0]),
            Noises::AquiferLava => NoiseParam::new(-1, vec![1.0]),
            Noises::AquiferFluidLevelSpread => NoiseParam::new(-5, vec![1.0]),
        }
    }

    fn all() -> [Noises; 11] {
        [
            Noises::Temperature,
            Noises::Vegetation,
            Noises::Continentalness,
            Noises::Erosion,
            Noises::Ridge,
            Noises::Offset,
            Noises::Jagged,
            Noises::AquiferBarrier,
            Noises::AquiferFluidLevelFloodedness,
            Noises::AquiferLava,
            Noises::AquiferFluidLevelSpread,
        ]
    }
}

/// Registered table of named noise parameters. Seed binding resolves every
/// named noise reference through this table; a missing name aborts binding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoiseRegistry {
    params: BTreeMap<String, NoiseParam>,
}

impl NoiseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in parameters.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for noise in Noises::all() {
            registry.register(noise.name(), noise.to_param());
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, param: NoiseParam) {
        self.params.insert(name.into(), param);
    }

    pub fn get(&self, name: &str) -> Option<&NoiseParam> {
        self.params.get(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtin_registry_resolves_names() {
        let registry = NoiseRegistry::builtin();
        assert_eq!(
            registry.get("aquifer_barrier"),
            Some(&NoiseParam::new(-3, vec![1.0]))
        );
        assert!(registry.get("no_such_noise").is_none());
    }

    #[test]
    fn param_round_trips_through_json() {
        let param = NoiseParam::new(-9, vec![1.0, 1.0, 2.0]);
        let json = serde_json::to_string(&param).unwrap();
        assert!(json.contains("firstOctave"));
        let back: NoiseParam = serde_json::from_str(&json).unwrap();
        assert_eq!(param, back);
    }
}
