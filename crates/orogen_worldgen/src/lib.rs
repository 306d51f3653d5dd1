//! Deterministic terrain density pipeline for an effectively infinite voxel
//! world.
//!
//! The pipeline derives, for any integer coordinate, a terrain density value,
//! a material (air, stone, fluid) and a biome classification, reproducing the
//! reference generator bit-for-bit for a given seed. The pieces compose
//! leaf-first:
//!
//! * [`noise`] — seeded gradient noise, octave stacks, double ("normal")
//!   noise and the legacy blended terrain noise.
//! * [`spline`] — the generic cubic-spline engine.
//! * [`terrain`] — the fixed offset/factor/peaks spline networks.
//! * [`density`] — the density-function expression graph: a serde-loadable
//!   proto tree and the flat, seed-bound runtime arena.
//! * [`router`] — the named bundle of graph roots plus the one-time per-seed
//!   binding pass.
//! * [`chunk`] — the per-chunk interpolation cache and its fill protocol.
//! * [`aquifer`] — fluid resolution over a jittered source lattice.
//! * [`climate`] — the 7-dimensional nearest-neighbor biome index.
//! * [`generator`] — the chunk driver producing material grids and biomes.

pub mod aquifer;
pub mod chunk;
pub mod climate;
pub mod density;
pub mod generator;
pub mod math;
pub mod noise;
pub mod router;
pub mod settings;
pub mod spline;
pub mod terrain;
