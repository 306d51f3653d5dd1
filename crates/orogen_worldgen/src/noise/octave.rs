use orogen_random::{PositionalRandom, Random};

use crate::noise::perlin::PerlinNoise;

/// Coordinates are wrapped modulo 2^25 before hashing so floating-point
/// error stays bounded far from the origin. The exact formula is part of the
/// bit-compatibility contract.
const WRAP_PERIOD: f64 = 3.3554432E7;

#[inline]
pub fn wrap(value: f64) -> f64 {
    value - (value / WRAP_PERIOD + 0.5).floor() * WRAP_PERIOD
}

/// A sparse stack of gradient-noise octaves. Each enabled octave gets its own
/// [`PerlinNoise`] seeded from a positional hash of the parent source (or, on
/// the legacy path, sequentially with fixed-size skips for disabled octaves).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OctaveNoise {
    octaves: Vec<Option<PerlinNoise>>,
    amplitudes: Vec<f64>,
    lowest_freq_input_factor: f64,
    lowest_freq_value_factor: f64,
    max_value: f64,
}

impl OctaveNoise {
    pub fn new<T>(random: &mut T, first_octave: i32, amplitudes: Vec<f64>, legacy: bool) -> Self
    where
        T: Random,
    {
        let mut octaves = Vec::with_capacity(amplitudes.len());

        if !legacy {
            let splitter = random.fork_positional();
            for (i, value) in amplitudes.iter().enumerate() {
                if *value != 0.0 {
                    let octave = first_octave + i as i32;
                    let mut octave_random = splitter.with_hash(format!("octave_{}", octave));
                    octaves.push(Some(PerlinNoise::from_random(&mut octave_random)));
                } else {
                    octaves.push(None);
                }
            }
        } else {
            // Legacy seeding walks the shared stream from the highest octave
            // down, burning 262 draws for every disabled octave.
            assert!(first_octave <= 0, "legacy octave seeding needs first_octave <= 0");
            for i in (0..=(-first_octave) as usize).rev() {
                if i < amplitudes.len() && amplitudes[i] != 0.0 {
                    octaves.push(Some(PerlinNoise::from_random(random)));
                } else {
                    octaves.push(None);
                    for _ in 0..262 {
                        random.next_i32();
                    }
                }
            }
            octaves.reverse();
        }

        let scale = 2.0_f64;
        let lowest_freq_input_factor = scale.powi(first_octave);
        let a = scale.powi(amplitudes.len() as i32 - 1);
        let b = scale.powi(amplitudes.len() as i32) - 1.0;
        let lowest_freq_value_factor = a / b;

        let mut noise = Self {
            octaves,
            amplitudes,
            lowest_freq_input_factor,
            lowest_freq_value_factor,
            max_value: 0.0,
        };
        noise.max_value = noise.edge_value(scale);
        noise
    }

    /// Reverse-indexed octave access: `get_octave(0)` is the highest octave.
    /// Used by the blended terrain noise, which walks octaves itself.
    pub fn get_octave(&self, octave: usize) -> Option<&PerlinNoise> {
        self.octaves
            .get(self.octaves.len() - 1 - octave)
            .and_then(|sampler| sampler.as_ref())
    }

    #[inline]
    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn edge_value(&self, scale: f64) -> f64 {
        let mut value = 0.0;
        let mut factor = self.lowest_freq_value_factor;
        for i in 0..self.octaves.len() {
            if self.octaves[i].is_some() {
                value += self.amplitudes[i] * scale * factor;
            }
            factor *= 0.5;
        }
        value
    }

    pub fn get(&self, x: f64, y: f64, z: f64) -> f64 {
        let mut input = self.lowest_freq_input_factor;
        let mut factor = self.lowest_freq_value_factor;
        let mut acc = 0.0;
        for (sampler, amplitude) in self.octaves.iter().zip(&self.amplitudes) {
            if let Some(sampler) = sampler {
                let sample = sampler.sample(wrap(x * input), wrap(y * input), wrap(z * input), 0.0, 0.0);
                acc += amplitude * sample * factor;
            }
            input *= 2.0;
            factor *= 0.5;
        }
        acc
    }
}

#[cfg(test)]
mod test {
    use crate::noise::octave::{OctaveNoise, wrap};
    use orogen_random::legacy::LegacyRandom;

    #[test]
    fn sample() {
        let mut random = LegacyRandom::new(381);
        let noise = OctaveNoise::new(&mut random, -6, vec![1.0, 1.0], true);

        assert_eq!(
            format!("{:.10}", noise.get(0.0, 0.0, 0.0)),
            format!("{:.10}", 0.02904968471563733)
        );
        assert_eq!(
            format!("{:.10}", noise.get(0.5, 4.0, -2.0)),
            format!("{:.10}", -0.003498819899307167)
        );
        assert_eq!(
            format!("{:.10}", noise.get(-204.0, 28.0, 12.0)),
            format!("{:.10}", 0.19407799903721645)
        );
    }

    #[test]
    fn wrap_is_exact_near_origin() {
        // Inside one period the wrap must be the identity, bit for bit.
        for v in [-1048576.0, -123.456, 0.0, 777.25, 16000000.0] {
            assert_eq!(wrap(v).to_bits(), v.to_bits());
        }
        // And periodic beyond it.
        assert_eq!(wrap(3.3554432E7), 0.0);
        assert_eq!(wrap(3.3554432E7 + 42.0), 42.0);
    }

    #[test]
    fn positional_seeding_is_order_free() {
        use orogen_random::{Random, RandomSource};

        let mut a = RandomSource::new(5, false);
        let mut b = RandomSource::new(5, false);
        let na = OctaveNoise::new(&mut a, -5, vec![1.0, 0.0, 2.0], false);
        let nb = OctaveNoise::new(&mut b, -5, vec![1.0, 0.0, 2.0], false);
        assert_eq!(na, nb);
        // Both parents consumed the same number of draws.
        assert_eq!(a.next_i64(), b.next_i64());
    }
}
