//! The terrain shaper: three fixed spline networks mapping a climate-like
//! point (continents, erosion, weirdness and its ridge fold) to the offset,
//! factor and peaks values that shape the final density. Built once from
//! fixed control points; stateless afterwards.

use crate::density::{DensityFunction, Holder, SplineDef, SplineHolder, SplinePointDef};
use crate::spline::{Builder, CubicSpline, RangeFunction, SplineFunction};

/// Sample point for the shaper networks. The ridge fold is derived from
/// weirdness once at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainPoint {
    pub continents: f32,
    pub erosion: f32,
    pub weirdness: f32,
    pub ridges: f32,
}

impl TerrainPoint {
    pub fn new(continents: f32, erosion: f32, weirdness: f32) -> Self {
        Self {
            continents,
            erosion,
            weirdness,
            ridges: peaks_and_valleys(weirdness),
        }
    }
}

/// Folds weirdness into the ridge coordinate: peaks near ±2/3, valleys at 0
/// and the extremes.
pub fn peaks_and_valleys(weirdness: f32) -> f32 {
    -((weirdness.abs() - 0.6666667).abs() - 0.33333334) * 3.0
}

/// The four coordinate axes the shaper splines read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coordinate {
    Continents,
    Erosion,
    Weirdness,
    Ridges,
}

impl RangeFunction for Coordinate {
    fn min_value(&self) -> f32 {
        -2.0
    }

    fn max_value(&self) -> f32 {
        2.0
    }
}

impl SplineFunction<TerrainPoint> for Coordinate {
    fn apply(&self, ctx: &TerrainPoint) -> f32 {
        match self {
            Coordinate::Continents => ctx.continents,
            Coordinate::Erosion => ctx.erosion,
            Coordinate::Weirdness => ctx.weirdness,
            Coordinate::Ridges => ctx.ridges,
        }
    }
}

type Spline = CubicSpline<TerrainPoint, Coordinate>;

pub struct TerrainShaper {
    offset: Spline,
    factor: Spline,
    peaks: Spline,
}

impl TerrainShaper {
    /// The fixed overworld-style networks.
    pub fn standard() -> Self {
        let beach = build_erosion_offset_spline(-0.05, 0.0, 0.0, 0.1, 0.0, -0.03, false, false);
        let low = build_erosion_offset_spline(-0.1, 0.03, 0.1, 0.1, 0.01, -0.03, false, false);
        let mid = build_erosion_offset_spline(-0.1, 0.03, 0.1, 0.7, 0.01, -0.03, true, true);
        let high = build_erosion_offset_spline(0.3, 0.03, 0.1, 1.0, 0.01, 0.01, true, true);

        let offset = Builder::new(Coordinate::Continents)
            .add_point(-1.1, 0.044, 0.0)
            .add_point(-1.02, -0.2222, 0.0)
            .add_point(-0.51, -0.2222, 0.0)
            .add_point(-0.44, -0.12, 0.0)
            .add_point(-0.18, -0.12, 0.0)
            .add_point(-0.16, beach.clone(), 0.0)
            .add_point(-0.15, beach, 0.0)
            .add_point(-0.1, low, 0.0)
            .add_point(0.25, mid, 0.0)
            .add_point(1.0, high, 0.0)
            .build();

        let factor = Builder::new(Coordinate::Continents)
            .add_point(-0.19, 3.95, 0.0)
            .add_point(-0.15, erosion_factor(6.25, true), 0.0)
            .add_point(-0.1, erosion_factor(5.47, true), 0.0)
            .add_point(0.03, erosion_factor(5.08, true), 0.0)
            .add_point(0.06, erosion_factor(4.69, false), 0.0)
            .build();

        let peaks = Builder::new(Coordinate::Continents)
            .add_point(-0.11, 0.0, 0.0)
            .add_point(0.03, erosion_peaks_spline(1.0, 0.5, 0.0, 0.0), 0.0)
            .add_point(0.65, erosion_peaks_spline(1.0, 1.0, 1.0, 0.0), 0.0)
            .build();

        Self {
            offset,
            factor,
            peaks,
        }
    }

    pub fn offset(&self, point: &TerrainPoint) -> f32 {
        self.offset.apply(point) - 0.50375
    }

    pub fn factor(&self, point: &TerrainPoint) -> f32 {
        self.factor.apply(point)
    }

    pub fn peaks(&self, point: &TerrainPoint) -> f32 {
        self.peaks.apply(point)
    }

    /// Rewrites the offset network as a graph spline over the given
    /// coordinate holders, with the fixed post-offset applied.
    pub fn offset_function(&self, coords: &CoordinateHolders) -> DensityFunction {
        DensityFunction::add(
            DensityFunction::Spline {
                spline: to_proto(&self.offset, coords),
            },
            -0.50375,
        )
    }

    pub fn factor_function(&self, coords: &CoordinateHolders) -> DensityFunction {
        DensityFunction::Spline {
            spline: to_proto(&self.factor, coords),
        }
    }

    pub fn peaks_function(&self, coords: &CoordinateHolders) -> DensityFunction {
        DensityFunction::Spline {
            spline: to_proto(&self.peaks, coords),
        }
    }
}

/// Graph-level sources for the shaper's four axes. The ridge fold is itself
/// a graph expression over the weirdness source.
pub struct CoordinateHolders {
    pub continents: Holder,
    pub erosion: Holder,
    pub weirdness: Holder,
    pub ridges: Holder,
}

impl CoordinateHolders {
    /// The `peaks_and_valleys` fold expressed as graph nodes over a
    /// weirdness source.
    pub fn ridges_function(weirdness: impl Into<Holder>) -> DensityFunction {
        DensityFunction::mul(
            DensityFunction::add(
                DensityFunction::abs(DensityFunction::add(
                    DensityFunction::abs(weirdness),
                    -0.6666667,
                )),
                -0.33333334,
            ),
            -3.0,
        )
    }
}

fn to_proto(spline: &Spline, coords: &CoordinateHolders) -> SplineHolder {
    match spline {
        CubicSpline::Constant(value) => SplineHolder::Constant(f64::from(*value).into()),
        CubicSpline::MultiPoint {
            coordinate,
            locations,
            values,
            derivatives,
            ..
        } => {
            let coordinate = match coordinate {
                Coordinate::Continents => coords.continents.clone(),
                Coordinate::Erosion => coords.erosion.clone(),
                Coordinate::Weirdness => coords.weirdness.clone(),
                Coordinate::Ridges => coords.ridges.clone(),
            };
            let points = locations
                .iter()
                .zip(values)
                .zip(derivatives)
                .map(|((location, value), derivative)| SplinePointDef {
                    location: f64::from(*location).into(),
                    value: to_proto(value, coords),
                    derivative: f64::from(*derivative).into(),
                })
                .collect();
            SplineHolder::Spline(SplineDef { coordinate, points })
        }
    }
}

fn mountain_continentalness(x: f32, strength: f32, cutoff: f32) -> f32 {
    let scaled = 1.0 - (1.0 - strength) * 0.5;
    let shifted = 0.5 * (1.0 - strength);
    let value = (x + 1.17) * 0.46082947 * scaled - shifted;
    if x < cutoff {
        value.max(-0.2222)
    } else {
        value.max(0.0)
    }
}

fn mountain_ridge_zero_point(strength: f32) -> f32 {
    let scaled = 1.0 - (1.0 - strength) * 0.5;
    let shifted = 0.5 * (1.0 - strength);
    shifted / (0.46082947 * scaled) - 1.17
}

fn slope(y0: f32, y1: f32, x0: f32, x1: f32) -> f32 {
    (y1 - y0) / (x1 - x0)
}

fn mountain_ridge_spline(strength: f32, flat_bottom: bool) -> Spline {
    let mut builder = Builder::new(Coordinate::Ridges);
    let left = mountain_continentalness(-1.0, strength, -0.7);
    let right = mountain_continentalness(1.0, strength, -0.7);
    let zero = mountain_ridge_zero_point(strength);
    if -0.65 < zero && zero < 1.0 {
        let at_valley = mountain_continentalness(-0.65, strength, -0.7);
        let at_floor = mountain_continentalness(-0.75, strength, -0.7);
        let entry_slope = slope(left, at_floor, -1.0, -0.75);
        builder = builder
            .add_point(-1.0, left, entry_slope)
            .add_point(-0.75, at_floor, 0.0)
            .add_point(-0.65, at_valley, 0.0);
        let at_zero = mountain_continentalness(zero, strength, -0.7);
        let exit_slope = slope(at_zero, right, zero, 1.0);
        builder = builder
            .add_point(zero - 0.01, at_zero, 0.0)
            .add_point(zero, at_zero, exit_slope)
            .add_point(1.0, right, exit_slope);
    } else {
        let full_slope = slope(left, right, -1.0, 1.0);
        if flat_bottom {
            builder = builder
                .add_point(-1.0, left.max(0.2), 0.0)
                .add_point(0.0, left + 0.5 * (right - left), full_slope);
        } else {
            builder = builder.add_point(-1.0, left, full_slope);
        }
        builder = builder.add_point(1.0, right, full_slope);
    }
    builder.build()
}

fn ridge_spline(
    valley: f32,
    low: f32,
    mid: f32,
    high: f32,
    peak: f32,
    min_slope: f32,
) -> Spline {
    let initial_slope = (0.5 * (low - valley)).max(min_slope);
    let mid_slope = 5.0 * (mid - low);
    Builder::new(Coordinate::Ridges)
        .add_point(-1.0, valley, initial_slope)
        .add_point(-0.4, low, initial_slope.min(mid_slope))
        .add_point(0.0, mid, mid_slope)
        .add_point(0.4, high, 2.0 * (high - mid))
        .add_point(1.0, peak, 0.7 * (peak - high))
        .build()
}

#[allow(clippy::too_many_arguments)]
fn build_erosion_offset_spline(
    base: f32,
    hill: f32,
    plateau: f32,
    ridge_strength: f32,
    low_lift: f32,
    rim: f32,
    extra_points: bool,
    flat_bottom: bool,
) -> Spline {
    let steep = mountain_ridge_spline(0.6 + ridge_strength * 0.9, flat_bottom);
    let rolling = mountain_ridge_spline(0.6 + ridge_strength * 0.4, flat_bottom);
    let plains = mountain_ridge_spline(ridge_strength, flat_bottom);
    let shattered = ridge_spline(
        base - 0.15,
        0.5 * ridge_strength,
        0.5 * ridge_strength,
        0.5 * ridge_strength,
        0.6 * ridge_strength,
        0.5,
    );
    let lifted = ridge_spline(
        base,
        low_lift * ridge_strength,
        hill * ridge_strength,
        0.5 * ridge_strength,
        0.6 * ridge_strength,
        0.5,
    );
    let flat = ridge_spline(base, low_lift, low_lift, hill, plateau, 0.5);
    let eroded = Builder::new(Coordinate::Ridges)
        .add_point(-1.0, base, 0.0)
        .add_point(-0.4, flat.clone(), 0.0)
        .add_point(0.0, plateau + 0.07, 0.0)
        .build();
    let swamp = ridge_spline(-0.02, rim, rim, hill, plateau, 0.0);

    let mut builder = Builder::new(Coordinate::Erosion)
        .add_point(-0.85, steep, 0.0)
        .add_point(-0.7, rolling, 0.0)
        .add_point(-0.4, plains, 0.0)
        .add_point(-0.35, shattered, 0.0)
        .add_point(-0.1, lifted, 0.0)
        .add_point(0.2, flat.clone(), 0.0);
    if extra_points {
        builder = builder
            .add_point(0.4, flat.clone(), 0.0)
            .add_point(0.45, eroded.clone(), 0.0)
            .add_point(0.55, eroded, 0.0)
            .add_point(0.58, flat, 0.0);
    }
    builder.add_point(0.7, swamp, 0.0).build()
}

fn erosion_factor(value: f32, higher_values: bool) -> Spline {
    let base = Builder::new(Coordinate::Weirdness)
        .add_point(-0.2, 6.3, 0.0)
        .add_point(0.2, value, 0.0)
        .build();
    let mut builder = Builder::new(Coordinate::Erosion)
        .add_point(-0.6, base.clone(), 0.0)
        .add_point(
            -0.5,
            Builder::new(Coordinate::Weirdness)
                .add_point(-0.05, 6.3, 0.0)
                .add_point(0.05, 2.67, 0.0),
            0.0,
        )
        .add_point(-0.35, base.clone(), 0.0)
        .add_point(-0.25, base.clone(), 0.0)
        .add_point(
            -0.1,
            Builder::new(Coordinate::Weirdness)
                .add_point(-0.05, 2.67, 0.0)
                .add_point(0.05, 6.3, 0.0),
            0.0,
        )
        .add_point(0.03, base.clone(), 0.0);
    if higher_values {
        let tapered = Builder::new(Coordinate::Weirdness)
            .add_point(0.0, value, 0.0)
            .add_point(0.1, 0.625, 0.0)
            .build();
        let folded = Builder::new(Coordinate::Ridges)
            .add_point(-0.9, value, 0.0)
            .add_point(-0.69, tapered, 0.0)
            .build();
        builder = builder
            .add_point(0.35, value, 0.0)
            .add_point(0.45, folded.clone(), 0.0)
            .add_point(0.55, folded, 0.0)
            .add_point(0.62, value, 0.0);
    } else {
        let shattered_low = Builder::new(Coordinate::Ridges)
            .add_point(-0.7, base.clone(), 0.0)
            .add_point(-0.15, 1.37, 0.0)
            .build();
        let shattered_high = Builder::new(Coordinate::Ridges)
            .add_point(0.45, base, 0.0)
            .add_point(0.7, 1.56, 0.0)
            .build();
        builder = builder
            .add_point(0.05, shattered_high.clone(), 0.0)
            .add_point(0.4, shattered_high, 0.0)
            .add_point(0.45, shattered_low.clone(), 0.0)
            .add_point(0.55, shattered_low, 0.0)
            .add_point(0.58, value, 0.0);
    }
    builder.build()
}

fn weirdness_peaks_spline(strength: f32) -> Spline {
    Builder::new(Coordinate::Weirdness)
        .add_point(-0.01, 0.63 * strength, 0.0)
        .add_point(0.01, 0.3 * strength, 0.0)
        .build()
}

fn ridge_peaks_spline(high: f32, low: f32) -> Spline {
    let first_fold = peaks_and_valleys(0.4);
    let second_fold = peaks_and_valleys(0.56666666);
    let midpoint = (first_fold + second_fold) / 2.0;
    let mut builder = Builder::new(Coordinate::Ridges).add_point(first_fold, 0.0, 0.0);
    builder = if low > 0.0 {
        builder.add_point(midpoint, weirdness_peaks_spline(low), 0.0)
    } else {
        builder.add_point(midpoint, 0.0, 0.0)
    };
    builder = if high > 0.0 {
        builder.add_point(1.0, weirdness_peaks_spline(high), 0.0)
    } else {
        builder.add_point(1.0, 0.0, 0.0)
    };
    builder.build()
}

fn erosion_peaks_spline(high: f32, mid: f32, low: f32, lowest: f32) -> Spline {
    let strong = ridge_peaks_spline(high, low);
    let weak = ridge_peaks_spline(mid, lowest);
    Builder::new(Coordinate::Erosion)
        .add_point(-1.0, strong, 0.0)
        .add_point(-0.78, weak.clone(), 0.0)
        .add_point(-0.5775, weak, 0.0)
        .add_point(-0.375, 0.0, 0.0)
        .build()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peaks_and_valleys_fold() {
        // Extremes and the middle fold to valleys, ±2/3 to peaks.
        assert!((peaks_and_valleys(0.0) - -1.0).abs() < 1e-5);
        assert!((peaks_and_valleys(1.0) - 0.0).abs() < 1e-4);
        assert!((peaks_and_valleys(-1.0) - 0.0).abs() < 1e-4);
        assert!((peaks_and_valleys(0.6666667) - 1.0).abs() < 1e-5);
        assert!((peaks_and_valleys(-0.6666667) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shaper_outputs_are_finite_and_bounded() {
        let shaper = TerrainShaper::standard();
        for c in -10..=10 {
            for e in -10..=10 {
                for w in -10..=10 {
                    let point = TerrainPoint::new(
                        c as f32 * 0.11,
                        e as f32 * 0.11,
                        w as f32 * 0.11,
                    );
                    let offset = shaper.offset(&point);
                    let factor = shaper.factor(&point);
                    let peaks = shaper.peaks(&point);
                    assert!(offset.is_finite() && factor.is_finite() && peaks.is_finite());
                    assert!((-2.0..=2.0).contains(&offset), "offset {}", offset);
                    assert!((0.0..=10.0).contains(&factor), "factor {}", factor);
                    assert!((-1.0..=2.0).contains(&peaks), "peaks {}", peaks);
                }
            }
        }
    }

    #[test]
    fn deep_ocean_sits_below_coast() {
        let shaper = TerrainShaper::standard();
        let ocean = TerrainPoint::new(-0.8, 0.0, 0.0);
        let inland = TerrainPoint::new(0.4, 0.0, 0.0);
        assert!(shaper.offset(&ocean) < shaper.offset(&inland));
    }

    #[test]
    fn proto_conversion_preserves_structure() {
        let shaper = TerrainShaper::standard();
        let coords = CoordinateHolders {
            continents: Holder::Reference("continents".to_owned()),
            erosion: Holder::Reference("erosion".to_owned()),
            weirdness: Holder::Reference("ridges".to_owned()),
            ridges: Holder::Reference("ridges_folded".to_owned()),
        };
        let offset = shaper.offset_function(&coords);
        let json = serde_json::to_string(&offset).unwrap();
        assert!(json.contains("continents"));
        let back: DensityFunction = serde_json::from_str(&json).unwrap();
        assert_eq!(offset, back);
    }
}
