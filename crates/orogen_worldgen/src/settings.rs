//! Static generator configuration: world shape, slide parameters, default
//! materials and the router definition, plus the built-in standard setup.

use serde::{Deserialize, Serialize};

use crate::density::compile::FunctionRegistry;
use crate::density::{DensityFunction, Holder};
use crate::noise::Noises;
use crate::router::NoiseRouter;
use crate::terrain::{CoordinateHolders, TerrainShaper};

/// The block materials the core decides between. Stands in for the external
/// block registry, which is a collaborator, not part of this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Air,
    Stone,
    Water,
    Lava,
}

/// Vertical shape and cell layout of the generated world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseSettings {
    pub min_y: i32,
    pub height: u32,
    /// Horizontal cell size factor; a cell spans `4 * size_horizontal` blocks.
    pub size_horizontal: u8,
    /// Vertical cell size factor; a cell spans `4 * size_vertical` blocks.
    pub size_vertical: u8,
    pub top_slide: SlideSettings,
    pub bottom_slide: SlideSettings,
}

impl NoiseSettings {
    pub fn cell_width(&self) -> usize {
        4 * usize::from(self.size_horizontal)
    }

    pub fn cell_height(&self) -> usize {
        4 * usize::from(self.size_vertical)
    }

    pub fn max_y(&self) -> i32 {
        self.min_y + self.height as i32
    }

    /// Applies both slides to a density graph: near the top and bottom of
    /// the world the density is lerped toward the slide target, flattening
    /// terrain into the boundary.
    pub fn slide(&self, density: impl Into<Holder>) -> DensityFunction {
        let top = DensityFunction::y_clamped_gradient(
            self.max_y() - self.top_slide.from,
            self.max_y() - self.top_slide.to,
            1.0,
            0.0,
        );
        let slid = DensityFunction::lerp(top, self.top_slide.target, density);
        let bottom = DensityFunction::y_clamped_gradient(
            self.min_y + self.bottom_slide.from,
            self.min_y + self.bottom_slide.to,
            0.0,
            1.0,
        );
        DensityFunction::lerp(bottom, self.bottom_slide.target, slid)
    }
}

/// Boundary flattening band: between `from` and `to` blocks away from the
/// world boundary, density is blended toward `target`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlideSettings {
    pub target: f64,
    pub from: i32,
    pub to: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSettings {
    pub noise: NoiseSettings,
    pub default_block: Block,
    pub default_fluid: Block,
    pub sea_level: i32,
    /// Below this level the ambient fluid is lava instead of the default
    /// fluid.
    pub lava_level: i32,
    pub aquifers_enabled: bool,
    pub legacy_random_source: bool,
    pub noise_router: NoiseRouter,
}

impl GeneratorSettings {
    /// The built-in surface-world configuration: shifted climate noises, the
    /// terrain-shaper splines, blended 3D noise and both slides, with
    /// aquifers on. Returns the settings together with the named functions
    /// its router references.
    pub fn standard() -> (GeneratorSettings, FunctionRegistry) {
        let noise = NoiseSettings {
            min_y: -64,
            height: 384,
            size_horizontal: 1,
            size_vertical: 2,
            top_slide: SlideSettings {
                target: -0.078125,
                from: 80,
                to: 64,
            },
            bottom_slide: SlideSettings {
                target: 0.1171875,
                from: 0,
                to: 24,
            },
        };
        let (noise_router, functions) = standard_router(&noise);
        (
            GeneratorSettings {
                noise,
                default_block: Block::Stone,
                default_fluid: Block::Water,
                sea_level: 63,
                lava_level: -54,
                aquifers_enabled: true,
                legacy_random_source: false,
                noise_router,
            },
            functions,
        )
    }
}

fn standard_router(noise: &NoiseSettings) -> (NoiseRouter, FunctionRegistry) {
    let mut functions = FunctionRegistry::new();

    functions.register(
        "shift_x",
        DensityFunction::flat_cache(DensityFunction::cache_2d(DensityFunction::ShiftA {
            argument: Noises::Offset.into(),
        })),
    );
    functions.register(
        "shift_z",
        DensityFunction::flat_cache(DensityFunction::cache_2d(DensityFunction::ShiftB {
            argument: Noises::Offset.into(),
        })),
    );

    let shifted = |noise: Noises, xz_scale: f64| DensityFunction::ShiftedNoise {
        shift_x: "shift_x".into(),
        shift_y: 0.0.into(),
        shift_z: "shift_z".into(),
        xz_scale: xz_scale.into(),
        y_scale: 0.0.into(),
        noise: noise.into(),
    };

    functions.register(
        "continents",
        DensityFunction::flat_cache(shifted(Noises::Continentalness, 0.25)),
    );
    functions.register(
        "erosion",
        DensityFunction::flat_cache(shifted(Noises::Erosion, 0.25)),
    );
    functions.register(
        "ridges",
        DensityFunction::flat_cache(shifted(Noises::Ridge, 0.25)),
    );
    functions.register(
        "ridges_folded",
        CoordinateHolders::ridges_function("ridges"),
    );

    let shaper = TerrainShaper::standard();
    let coords = CoordinateHolders {
        continents: "continents".into(),
        erosion: "erosion".into(),
        weirdness: "ridges".into(),
        ridges: "ridges_folded".into(),
    };

    functions.register(
        "offset",
        DensityFunction::cache_2d(shaper.offset_function(&coords)),
    );
    functions.register(
        "factor",
        DensityFunction::cache_2d(shaper.factor_function(&coords)),
    );
    functions.register(
        "jaggedness",
        DensityFunction::cache_2d(shaper.peaks_function(&coords)),
    );
    functions.register(
        "depth",
        DensityFunction::add(
            DensityFunction::y_clamped_gradient(noise.min_y, noise.max_y(), 1.5, -1.5),
            "offset",
        ),
    );

    // Jagged peaks ride on half-negative jagged noise so valleys cut less
    // than peaks rise.
    let jagged = DensityFunction::mul(
        "jaggedness",
        DensityFunction::half_negative(DensityFunction::noise(Noises::Jagged, 1500.0, 0.0)),
    );
    let gradient_density = DensityFunction::mul(
        4.0,
        DensityFunction::quarter_negative(DensityFunction::mul(
            DensityFunction::add("depth", jagged),
            "factor",
        )),
    );
    functions.register(
        "sloped_cheese",
        DensityFunction::add(
            gradient_density,
            DensityFunction::BlendedNoise {
                xz_scale: 0.25.into(),
                y_scale: 0.125.into(),
                xz_factor: 80.0.into(),
                y_factor: 160.0.into(),
                smear_scale_multiplier: 8.0.into(),
            },
        ),
    );

    let final_density = DensityFunction::squeeze(DensityFunction::mul(
        DensityFunction::interpolated(noise.slide("sloped_cheese")),
        0.64,
    ));

    // Shaper-only column density for the cheap top-down surface scan; no 3D
    // noise, no jagged term.
    let preliminary = noise.slide(DensityFunction::mul(
        4.0,
        DensityFunction::quarter_negative(DensityFunction::mul("depth", "factor")),
    ));

    let router = NoiseRouter {
        barrier: DensityFunction::noise(Noises::AquiferBarrier, 1.0, 0.5).into(),
        fluid_level_floodedness: DensityFunction::noise(
            Noises::AquiferFluidLevelFloodedness,
            1.0,
            0.67,
        )
        .into(),
        fluid_level_spread: DensityFunction::noise(
            Noises::AquiferFluidLevelSpread,
            1.0,
            0.7142857142857143,
        )
        .into(),
        lava: DensityFunction::noise(Noises::AquiferLava, 1.0, 1.0).into(),
        temperature: shifted(Noises::Temperature, 0.25).into(),
        vegetation: shifted(Noises::Vegetation, 0.25).into(),
        continents: "continents".into(),
        erosion: "erosion".into(),
        depth: "depth".into(),
        ridges: "ridges".into(),
        preliminary_surface_level: preliminary.into(),
        final_density: final_density.into(),
        vein_toggle: 0.0.into(),
        vein_ridged: 0.0.into(),
        vein_gap: 0.0.into(),
    };

    (router, functions)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::noise::NoiseRegistry;

    #[test]
    fn standard_settings_bind() {
        let (settings, functions) = GeneratorSettings::standard();
        let noises = NoiseRegistry::builtin();
        let bound = settings
            .noise_router
            .bind(&functions, &noises, 1234, settings.legacy_random_source)
            .unwrap();
        // Shared references collapse: continents is used by the climate
        // output and by three spline networks, yet binds once.
        assert!(bound.node_count() > 0);
        let mut sampler = bound.sampler();
        let pos = bevy_math::IVec3::new(100, 64, -200);
        let density = sampler.sample(bound.roots.final_density, pos);
        assert!(density.is_finite());
        // Squeeze output is hard-bounded.
        assert!((-1.0..=1.0).contains(&density));
    }

    #[test]
    fn settings_round_trip_through_json() {
        let (settings, _) = GeneratorSettings::standard();
        let json = serde_json::to_string(&settings).unwrap();
        let back: GeneratorSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, back);
    }

    #[test]
    fn slide_flattens_toward_world_top() {
        use crate::density::compile::FunctionRegistry;
        use crate::router::NoiseRouter;

        let noise = NoiseSettings {
            min_y: 0,
            height: 128,
            size_horizontal: 1,
            size_vertical: 1,
            top_slide: SlideSettings {
                target: -0.1,
                from: 24,
                to: 0,
            },
            bottom_slide: SlideSettings {
                target: 0.1,
                from: 0,
                to: 24,
            },
        };
        let mut router = NoiseRouter::constant(0.0);
        router.final_density = noise.slide(DensityFunction::constant(0.5)).into();
        let bound = router
            .bind(&FunctionRegistry::new(), &NoiseRegistry::builtin(), 0, false)
            .unwrap();
        let mut sampler = bound.sampler();
        let root = bound.roots.final_density;
        // Unaffected mid-world, fully flattened at the boundaries.
        let mid = sampler.sample(root, bevy_math::IVec3::new(0, 64, 0));
        assert!((mid - 0.5).abs() < 1e-9);
        let top = sampler.sample(root, bevy_math::IVec3::new(0, 128, 0));
        assert!((top - -0.1).abs() < 1e-9);
        let bottom = sampler.sample(root, bevy_math::IVec3::new(0, 0, 0));
        assert!((bottom - 0.1).abs() < 1e-9);
    }
}
