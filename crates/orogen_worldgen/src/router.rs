//! The noise router: a named bundle of density-function graph roots, and its
//! one-time per-seed binding into a shared read-only arena.

use bevy_math::IVec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::density::compile::{BindError, Compiler, FunctionRegistry, MarkerInfo};
use crate::density::node::{self, ChunkState, Node, SampleOptions};
use crate::density::Holder;
use crate::noise::NoiseRegistry;

/// Raw router definition: one proto graph root per named output. Built once
/// from static configuration; binding materializes it per seed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseRouter {
    pub barrier: Holder,
    pub fluid_level_floodedness: Holder,
    pub fluid_level_spread: Holder,
    pub lava: Holder,
    pub temperature: Holder,
    pub vegetation: Holder,
    pub continents: Holder,
    pub erosion: Holder,
    pub depth: Holder,
    pub ridges: Holder,
    pub preliminary_surface_level: Holder,
    pub final_density: Holder,
    pub vein_toggle: Holder,
    pub vein_ridged: Holder,
    pub vein_gap: Holder,
}

impl NoiseRouter {
    /// A router whose every output is the given constant. Starting point for
    /// tests and hand-built configurations.
    pub fn constant(value: f64) -> Self {
        let holder = || Holder::Value(value.into());
        Self {
            barrier: holder(),
            fluid_level_floodedness: holder(),
            fluid_level_spread: holder(),
            lava: holder(),
            temperature: holder(),
            vegetation: holder(),
            continents: holder(),
            erosion: holder(),
            depth: holder(),
            ridges: holder(),
            preliminary_surface_level: holder(),
            final_density: holder(),
            vein_toggle: holder(),
            vein_ridged: holder(),
            vein_gap: holder(),
        }
    }

    /// Binds this router to a seed. Runs the compile pass over every root in
    /// a fixed order so identical definitions land on identical arena slots.
    /// Pure with respect to `self`: binding twice with the same inputs
    /// yields an identical router.
    pub fn bind(
        &self,
        functions: &FunctionRegistry,
        noises: &NoiseRegistry,
        seed: u64,
        legacy: bool,
    ) -> Result<BoundRouter, BindError> {
        let mut compiler = Compiler::new(functions, noises, seed, legacy);
        let roots = Roots {
            barrier: compiler.compile_holder(&self.barrier)?,
            fluid_level_floodedness: compiler.compile_holder(&self.fluid_level_floodedness)?,
            fluid_level_spread: compiler.compile_holder(&self.fluid_level_spread)?,
            lava: compiler.compile_holder(&self.lava)?,
            temperature: compiler.compile_holder(&self.temperature)?,
            vegetation: compiler.compile_holder(&self.vegetation)?,
            continents: compiler.compile_holder(&self.continents)?,
            erosion: compiler.compile_holder(&self.erosion)?,
            depth: compiler.compile_holder(&self.depth)?,
            ridges: compiler.compile_holder(&self.ridges)?,
            preliminary_surface_level: compiler.compile_holder(&self.preliminary_surface_level)?,
            final_density: compiler.compile_holder(&self.final_density)?,
            vein_toggle: compiler.compile_holder(&self.vein_toggle)?,
            vein_ridged: compiler.compile_holder(&self.vein_ridged)?,
            vein_gap: compiler.compile_holder(&self.vein_gap)?,
        };
        let (nodes, markers) = compiler.finish();
        debug!(seed, nodes = nodes.len(), "noise router bound");
        Ok(BoundRouter {
            nodes,
            markers,
            roots,
        })
    }
}

/// Arena indices of the bound roots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roots {
    pub barrier: usize,
    pub fluid_level_floodedness: usize,
    pub fluid_level_spread: usize,
    pub lava: usize,
    pub temperature: usize,
    pub vegetation: usize,
    pub continents: usize,
    pub erosion: usize,
    pub depth: usize,
    pub ridges: usize,
    pub preliminary_surface_level: usize,
    pub final_density: usize,
    pub vein_toggle: usize,
    pub vein_ridged: usize,
    pub vein_gap: usize,
}

/// A seed-bound router. Immutable; safely shared read-only across all chunk
/// generations for that seed.
pub struct BoundRouter {
    pub(crate) nodes: Vec<Node>,
    pub(crate) markers: Vec<MarkerInfo>,
    pub roots: Roots,
}

impl std::fmt::Debug for BoundRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundRouter")
            .field("node_count", &self.nodes.len())
            .field("marker_count", &self.markers.len())
            .field("roots", &self.roots)
            .finish()
    }
}

impl BoundRouter {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Declared lower bound of a root.
    pub fn min_value(&self, root: usize) -> f64 {
        self.nodes[root].min()
    }

    /// Declared upper bound of a root.
    pub fn max_value(&self, root: usize) -> f64 {
        self.nodes[root].max()
    }

    /// A reusable chunk-free sampler over this router. Interpolation and
    /// cell-cache markers degrade to pass-throughs.
    pub fn sampler(&self) -> DirectSampler<'_> {
        DirectSampler {
            router: self,
            state: ChunkState::bypass(self.markers.len()),
            opts: SampleOptions::free(),
        }
    }
}

/// Evaluates graph roots at arbitrary positions without any chunk scoping.
pub struct DirectSampler<'a> {
    router: &'a BoundRouter,
    state: ChunkState,
    opts: SampleOptions,
}

impl DirectSampler<'_> {
    pub fn sample(&mut self, root: usize, pos: IVec3) -> f64 {
        node::sample(&self.router.nodes, &mut self.state, root, pos, &self.opts)
    }

    pub fn roots(&self) -> Roots {
        self.router.roots
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::density::DensityFunction;
    use crate::noise::Noises;

    fn simple_router() -> NoiseRouter {
        let mut router = NoiseRouter::constant(0.0);
        router.temperature =
            DensityFunction::noise(Noises::Temperature, 0.25, 0.0).into();
        router.vegetation = DensityFunction::noise(Noises::Vegetation, 0.25, 0.0).into();
        router.final_density = DensityFunction::add(
            DensityFunction::y_clamped_gradient(0, 256, 1.0, -1.0),
            DensityFunction::noise(Noises::Offset, 1.0, 1.0),
        )
        .into();
        router.preliminary_surface_level = router.final_density.clone();
        router
    }

    #[test]
    fn binding_is_idempotent() {
        let functions = FunctionRegistry::new();
        let noises = NoiseRegistry::builtin();
        let router = simple_router();
        let bound_a = router.bind(&functions, &noises, 9001, false).unwrap();
        let bound_b = router.bind(&functions, &noises, 9001, false).unwrap();
        assert_eq!(bound_a.node_count(), bound_b.node_count());
        let mut sampler_a = bound_a.sampler();
        let mut sampler_b = bound_b.sampler();
        for i in 0..200 {
            let pos = bevy_math::IVec3::new(i * 13 - 800, (i % 32) * 8, i * 7 - 500);
            let va = sampler_a.sample(bound_a.roots.final_density, pos);
            let vb = sampler_b.sample(bound_b.roots.final_density, pos);
            assert_eq!(va.to_bits(), vb.to_bits());
        }
    }

    #[test]
    fn identical_definitions_share_one_arena_slot() {
        let functions = FunctionRegistry::new();
        let noises = NoiseRegistry::builtin();
        let router = simple_router();
        let bound = router.bind(&functions, &noises, 1, false).unwrap();
        // final_density and preliminary_surface_level are the same proto
        // definition, so they must bind to the same node.
        assert_eq!(
            bound.roots.final_density,
            bound.roots.preliminary_surface_level
        );
    }

    #[test]
    fn unknown_noise_aborts_binding() {
        let functions = FunctionRegistry::new();
        let noises = NoiseRegistry::new();
        let mut router = NoiseRouter::constant(0.0);
        router.final_density = DensityFunction::noise("not_registered", 1.0, 1.0).into();
        let err = router.bind(&functions, &noises, 0, false).unwrap_err();
        assert!(matches!(err, BindError::UnknownNoise(name) if name == "not_registered"));
    }

    #[test]
    fn unknown_reference_aborts_binding() {
        let functions = FunctionRegistry::new();
        let noises = NoiseRegistry::builtin();
        let mut router = NoiseRouter::constant(0.0);
        router.final_density = Holder::Reference("missing".to_owned());
        let err = router.bind(&functions, &noises, 0, false).unwrap_err();
        assert!(matches!(err, BindError::UnknownFunction(name) if name == "missing"));
    }

    #[test]
    fn samples_stay_inside_frozen_bounds() {
        // Every node in the arena, not just the roots, must respect its
        // declared range over a spread of positions.
        let functions = FunctionRegistry::new();
        let noises = NoiseRegistry::builtin();
        let bound = simple_router()
            .bind(&functions, &noises, 77, false)
            .unwrap();
        let mut sampler = bound.sampler();
        for node in 0..bound.node_count() {
            let (min, max) = (bound.min_value(node), bound.max_value(node));
            for i in 0..300 {
                let pos = bevy_math::IVec3::new(
                    (i * 37) % 4096 - 2048,
                    (i * 11) % 384 - 64,
                    (i * 53) % 4096 - 2048,
                );
                let value = sampler.sample(node, pos);
                assert!(
                    value >= min && value <= max,
                    "node {} at {:?}: {} outside [{}, {}]",
                    node,
                    pos,
                    value,
                    min,
                    max
                );
            }
        }
    }

    #[test]
    fn min_max_short_circuit_agrees_with_full_evaluation() {
        // The gradient sweeps [-1.5, 1.5] while the clamped noise is boxed
        // into [-0.1, 0.1], so the first argument frequently dominates the
        // second's declared bounds and takes the short-circuit path. The
        // "wide" router computes the same values through a second clamp
        // whose bounds are too loose to ever short-circuit.
        let functions = FunctionRegistry::new();
        let noises = NoiseRegistry::builtin();

        let gradient = DensityFunction::y_clamped_gradient(-64, 320, -1.5, 1.5);
        let boxed_noise = DensityFunction::clamp(
            DensityFunction::noise(Noises::Erosion, 0.25, 0.25),
            -0.1,
            0.1,
        );
        let widened_noise = DensityFunction::clamp(boxed_noise.clone(), -1000.0, 1000.0);

        let mut tight = NoiseRouter::constant(0.0);
        tight.final_density =
            DensityFunction::min_of(gradient.clone(), boxed_noise.clone()).into();
        tight.vein_toggle = DensityFunction::max_of(gradient.clone(), boxed_noise).into();
        let mut wide = NoiseRouter::constant(0.0);
        wide.final_density =
            DensityFunction::min_of(gradient.clone(), widened_noise.clone()).into();
        wide.vein_toggle = DensityFunction::max_of(gradient, widened_noise).into();

        let bound_tight = tight.bind(&functions, &noises, 55, false).unwrap();
        let bound_wide = wide.bind(&functions, &noises, 55, false).unwrap();
        let mut sampler_tight = bound_tight.sampler();
        let mut sampler_wide = bound_wide.sampler();
        for i in 0..400 {
            let pos = bevy_math::IVec3::new(i * 17 - 3000, (i % 48) * 8 - 64, 2500 - i * 13);
            assert_eq!(
                sampler_tight
                    .sample(bound_tight.roots.final_density, pos)
                    .to_bits(),
                sampler_wide
                    .sample(bound_wide.roots.final_density, pos)
                    .to_bits()
            );
            assert_eq!(
                sampler_tight
                    .sample(bound_tight.roots.vein_toggle, pos)
                    .to_bits(),
                sampler_wide
                    .sample(bound_wide.roots.vein_toggle, pos)
                    .to_bits()
            );
        }
    }
}
