//! Fluid resolution for below-threshold-density positions: either the plain
//! sea-level picker, or the full aquifer model over a jittered lattice of
//! candidate fluid sources with a pressure term between the three nearest.

use bevy_math::IVec3;
use orogen_random::{PositionalRandom, Random, RandomSource, Splitter};

use crate::chunk::NoiseChunk;
use crate::math::{clamped_map, floor_div, map};
use crate::settings::{Block, GeneratorSettings};

/// A fluid column: the fluid is exposed strictly below `level`, air at and
/// above it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FluidStatus {
    pub level: i32,
    pub fluid: Block,
}

impl FluidStatus {
    pub fn new(level: i32, fluid: Block) -> Self {
        Self { level, fluid }
    }

    pub fn at(&self, y: i32) -> Block {
        if y < self.level {
            self.fluid
        } else {
            Block::Air
        }
    }
}

/// The ambient fluid rule: lava below the cutoff, the default fluid up to
/// sea level.
#[derive(Clone, Copy, Debug)]
pub struct GlobalFluidPicker {
    lava: FluidStatus,
    default_fluid: FluidStatus,
    cutoff: i32,
}

impl GlobalFluidPicker {
    pub fn new(settings: &GeneratorSettings) -> Self {
        Self {
            lava: FluidStatus::new(settings.lava_level, Block::Lava),
            default_fluid: FluidStatus::new(settings.sea_level, settings.default_fluid),
            cutoff: settings.lava_level.min(settings.sea_level),
        }
    }

    pub fn pick(&self, _x: i32, y: i32, _z: i32) -> FluidStatus {
        if y < self.cutoff {
            self.lava
        } else {
            self.default_fluid
        }
    }
}

/// Marker level for "no aquifer here": far enough below every reachable Y
/// that the pressure arithmetic stays well-behaved.
const NO_AQUIFER_LEVEL: i32 = -32512;

/// Chunk-section offsets probed by the surface-proximity heuristic. The
/// (0, 0) entry must stay first; the early returns depend on it.
const SURFACE_SAMPLING_OFFSETS: [(i8, i8); 13] = [
    (0, 0),
    (-2, -1),
    (-1, -1),
    (0, -1),
    (1, -1),
    (-3, 0),
    (-2, 0),
    (-1, 0),
    (1, 0),
    (-2, 1),
    (-1, 1),
    (0, 1),
    (1, 1),
];

#[inline]
fn grid_x(block: i32) -> i32 {
    block >> 4
}

#[inline]
fn grid_y(block: i32) -> i32 {
    floor_div(block, 12)
}

#[inline]
fn grid_z(block: i32) -> i32 {
    block >> 4
}

pub enum Aquifer {
    /// Aquifers disabled: every non-solid block defers to the ambient
    /// picker.
    SeaLevel(GlobalFluidPicker),
    World(Box<WorldAquifer>),
}

impl Aquifer {
    pub fn new(settings: &GeneratorSettings, seed: u64, chunk_x: i32, chunk_z: i32) -> Self {
        let picker = GlobalFluidPicker::new(settings);
        if settings.aquifers_enabled {
            Aquifer::World(Box::new(WorldAquifer::new(
                picker, settings, seed, chunk_x, chunk_z,
            )))
        } else {
            Aquifer::SeaLevel(picker)
        }
    }

    /// Decides the material at a position given its final density. `None`
    /// means solid: the caller places the default block.
    pub fn resolve(&mut self, chunk: &mut NoiseChunk, pos: IVec3, density: f64) -> Option<Block> {
        match self {
            Aquifer::SeaLevel(picker) => {
                if density > 0.0 {
                    None
                } else {
                    Some(picker.pick(pos.x, pos.y, pos.z).at(pos.y))
                }
            }
            Aquifer::World(aquifer) => aquifer.resolve(chunk, pos, density),
        }
    }
}

/// Full aquifer state for one chunk. The lattice caches are scoped to the
/// chunk and must not be shared across concurrent generations.
pub struct WorldAquifer {
    picker: GlobalFluidPicker,
    splitter: Splitter,
    min_grid_x: i32,
    min_grid_y: i32,
    min_grid_z: i32,
    grid_size_x: usize,
    grid_size_y: usize,
    grid_size_z: usize,
    status_cache: Vec<Option<FluidStatus>>,
    location_cache: Vec<Option<IVec3>>,
}

impl WorldAquifer {
    pub fn new(
        picker: GlobalFluidPicker,
        settings: &GeneratorSettings,
        seed: u64,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Self {
        let mut random = RandomSource::new(seed, settings.legacy_random_source);
        let splitter = random.fork_positional().with_hash("aquifer").fork_positional();

        let chunk_min_x = chunk_x * 16;
        let chunk_max_x = chunk_min_x + 15;
        let chunk_min_z = chunk_z * 16;
        let chunk_max_z = chunk_min_z + 15;

        // The probe anchor subtracts 5 from x/z and adds 1 to y, and the
        // neighborhood spans one extra cell; the grid covers all of it.
        let min_grid_x = grid_x(chunk_min_x - 5);
        let max_grid_x = grid_x(chunk_max_x - 5) + 1;
        let grid_size_x = (max_grid_x - min_grid_x + 1) as usize;

        let min_y = settings.noise.min_y;
        let max_y = settings.noise.max_y();
        let min_grid_y = grid_y(min_y + 1) - 1;
        let max_grid_y = grid_y(max_y + 1) + 1;
        let grid_size_y = (max_grid_y - min_grid_y + 1) as usize;

        let min_grid_z = grid_z(chunk_min_z - 5);
        let max_grid_z = grid_z(chunk_max_z - 5) + 1;
        let grid_size_z = (max_grid_z - min_grid_z + 1) as usize;

        let cache_size = grid_size_x * grid_size_y * grid_size_z;
        Self {
            picker,
            splitter,
            min_grid_x,
            min_grid_y,
            min_grid_z,
            grid_size_x,
            grid_size_y,
            grid_size_z,
            status_cache: vec![None; cache_size],
            location_cache: vec![None; cache_size],
        }
    }

    /// Cache index of a lattice cell. An access outside the precomputed grid
    /// extents is a bug in the caller's probe pattern, not a condition to
    /// clamp away.
    fn index(&self, gx: i32, gy: i32, gz: i32) -> usize {
        let x = gx - self.min_grid_x;
        let y = gy - self.min_grid_y;
        let z = gz - self.min_grid_z;
        assert!(
            x >= 0
                && y >= 0
                && z >= 0
                && (x as usize) < self.grid_size_x
                && (y as usize) < self.grid_size_y
                && (z as usize) < self.grid_size_z,
            "aquifer lattice access out of bounds: ({}, {}, {})",
            gx,
            gy,
            gz
        );
        (y as usize * self.grid_size_z + z as usize) * self.grid_size_x + x as usize
    }

    #[inline]
    fn similarity(dist1: i32, dist2: i32) -> f64 {
        1.0 - f64::from(dist2 - dist1) / 25.0
    }

    fn location(&mut self, gx: i32, gy: i32, gz: i32) -> IVec3 {
        let index = self.index(gx, gy, gz);
        if let Some(location) = self.location_cache[index] {
            return location;
        }
        let mut random = self.splitter.at(IVec3::new(gx, gy, gz));
        let location = IVec3::new(
            (gx << 4) + random.next_i32_bound(10),
            gy * 12 + random.next_i32_bound(9),
            (gz << 4) + random.next_i32_bound(10),
        );
        self.location_cache[index] = Some(location);
        location
    }

    fn status(&mut self, chunk: &mut NoiseChunk, location: IVec3, index: usize) -> FluidStatus {
        if let Some(status) = self.status_cache[index] {
            return status;
        }
        let status = self.compute_fluid(chunk, location);
        self.status_cache[index] = Some(status);
        status
    }

    pub fn resolve(
        &mut self,
        chunk: &mut NoiseChunk,
        pos: IVec3,
        density: f64,
    ) -> Option<Block> {
        if density > 0.0 {
            return None;
        }
        if self.picker.pick(pos.x, pos.y, pos.z).at(pos.y) == Block::Lava {
            return Some(Block::Lava);
        }

        let anchor_x = grid_x(pos.x - 5);
        let anchor_y = grid_y(pos.y + 1);
        let anchor_z = grid_z(pos.z - 5);

        // Track the three nearest lattice points by jittered distance.
        let mut dist1 = i32::MAX;
        let mut dist2 = i32::MAX;
        let mut dist3 = i32::MAX;
        let mut closest1 = (IVec3::ZERO, 0usize);
        let mut closest2 = (IVec3::ZERO, 0usize);
        let mut closest3 = (IVec3::ZERO, 0usize);

        for dx in 0..=1 {
            for dy in -1..=1 {
                for dz in 0..=1 {
                    let gx = anchor_x + dx;
                    let gy = anchor_y + dy;
                    let gz = anchor_z + dz;
                    let location = self.location(gx, gy, gz);
                    let index = self.index(gx, gy, gz);
                    let delta = location - pos;
                    let dist = delta.x * delta.x + delta.y * delta.y + delta.z * delta.z;
                    if dist1 >= dist {
                        closest3 = closest2;
                        closest2 = closest1;
                        closest1 = (location, index);
                        dist3 = dist2;
                        dist2 = dist1;
                        dist1 = dist;
                    } else if dist2 >= dist {
                        closest3 = closest2;
                        closest2 = (location, index);
                        dist3 = dist2;
                        dist2 = dist;
                    } else if dist3 >= dist {
                        closest3 = (location, index);
                        dist3 = dist;
                    }
                }
            }
        }

        let status1 = self.status(chunk, closest1.0, closest1.1);
        let similarity12 = Self::similarity(dist1, dist2);
        let block = status1.at(pos.y);

        if similarity12 <= 0.0 {
            return Some(block);
        }

        // Water directly above lava stays put; the contact is handled when
        // the lava block itself is resolved.
        if block == Block::Water
            && self
                .picker
                .pick(pos.x, pos.y - 1, pos.z)
                .at(pos.y - 1)
                == Block::Lava
        {
            return Some(block);
        }

        let mut barrier_noise = None;
        let status2 = self.status(chunk, closest2.0, closest2.1);
        let pressure12 = similarity12
            * self.pressure(chunk, pos, &mut barrier_noise, &status1, &status2);
        if density + pressure12 > 0.0 {
            return None;
        }

        let status3 = self.status(chunk, closest3.0, closest3.1);
        let similarity13 = Self::similarity(dist1, dist3);
        if similarity13 > 0.0 {
            let pressure13 = similarity12
                * similarity13
                * self.pressure(chunk, pos, &mut barrier_noise, &status1, &status3);
            if density + pressure13 > 0.0 {
                return None;
            }
        }
        let similarity23 = Self::similarity(dist2, dist3);
        if similarity23 > 0.0 {
            let pressure23 = similarity12
                * similarity23
                * self.pressure(chunk, pos, &mut barrier_noise, &status2, &status3);
            if density + pressure23 > 0.0 {
                return None;
            }
        }

        Some(block)
    }

    /// Pressure between two candidate fluid columns at height `pos.y`.
    ///
    /// Lava touching water forces maximum pressure. Otherwise the pressure
    /// follows the level difference, divided down by the empirically tuned
    /// 1.5 / 2.5 / 3.0 / 10.0 gradients, with the barrier noise blended in
    /// while the gradient is within ±2. The constants are preserved verbatim
    /// from the reference generator.
    fn pressure(
        &mut self,
        chunk: &mut NoiseChunk,
        pos: IVec3,
        barrier_noise: &mut Option<f64>,
        status1: &FluidStatus,
        status2: &FluidStatus,
    ) -> f64 {
        let y = pos.y;
        let type1 = status1.at(y);
        let type2 = status2.at(y);

        if (type1 == Block::Lava && type2 == Block::Water)
            || (type1 == Block::Water && type2 == Block::Lava)
        {
            return 2.0;
        }

        let level_diff = (status1.level - status2.level).abs();
        if level_diff == 0 {
            return 0.0;
        }

        let average_level = 0.5 * f64::from(status1.level + status2.level);
        let above_average = f64::from(y) + 0.5 - average_level;
        let half_diff = f64::from(level_diff) / 2.0;
        let edge_distance = half_diff - above_average.abs();

        let gradient = if above_average > 0.0 {
            if edge_distance > 0.0 {
                edge_distance / 1.5
            } else {
                edge_distance / 2.5
            }
        } else {
            let below_edge = 3.0 + edge_distance;
            if below_edge > 0.0 {
                below_edge / 3.0
            } else {
                below_edge / 10.0
            }
        };

        let noise = if (-2.0..=2.0).contains(&gradient) {
            match barrier_noise {
                Some(noise) => *noise,
                None => {
                    let roots = chunk.roots();
                    let sampled = chunk.sample_free(roots.barrier, pos);
                    *barrier_noise.insert(sampled)
                }
            }
        } else {
            0.0
        };

        2.0 * (noise + gradient)
    }

    fn compute_fluid(&mut self, chunk: &mut NoiseChunk, location: IVec3) -> FluidStatus {
        let global = self.picker.pick(location.x, location.y, location.z);
        let mut lowest_surface = i32::MAX;
        let cell_top = location.y + 12;
        let cell_bottom = location.y - 12;
        let mut center_below_global_fluid = false;

        for (offset_x, offset_z) in SURFACE_SAMPLING_OFFSETS {
            let sample_x = location.x + (i32::from(offset_x) << 4);
            let sample_z = location.z + (i32::from(offset_z) << 4);
            let surface = chunk.preliminary_surface_level(sample_x, sample_z);
            let adjusted_surface = surface + 8;
            let is_center = offset_x == 0 && offset_z == 0;

            if is_center && cell_bottom > adjusted_surface {
                return global;
            }

            let pokes_above = cell_top > adjusted_surface;
            if pokes_above || is_center {
                let surface_fluid = self.picker.pick(sample_x, adjusted_surface, sample_z);
                if surface_fluid.at(adjusted_surface) != Block::Air {
                    if is_center {
                        center_below_global_fluid = true;
                    }
                    if pokes_above {
                        return surface_fluid;
                    }
                }
            }
            lowest_surface = lowest_surface.min(surface);
        }

        let level = self.compute_surface_level(
            chunk,
            location,
            &global,
            lowest_surface,
            center_below_global_fluid,
        );
        FluidStatus::new(level, self.compute_fluid_type(chunk, location, &global, level))
    }

    fn compute_surface_level(
        &mut self,
        chunk: &mut NoiseChunk,
        location: IVec3,
        global: &FluidStatus,
        lowest_surface: i32,
        center_below_global_fluid: bool,
    ) -> i32 {
        let roots = chunk.roots();

        // No aquifers inside the deepest caves. The thresholds widen float
        // literals to doubles, preserving the float's precision loss.
        let erosion = chunk.sample_free(roots.erosion, location);
        let depth = chunk.sample_free(roots.depth, location);
        let is_deep_cave = erosion < f64::from(-0.225_f32) && depth > f64::from(0.9_f32);

        let (partially_flooded, fully_flooded) = if is_deep_cave {
            (-1.0, -1.0)
        } else {
            let below_surface = lowest_surface + 8 - location.y;
            let floodedness_factor = if center_below_global_fluid {
                clamped_map(f64::from(below_surface), 0.0, 64.0, 1.0, 0.0)
            } else {
                0.0
            };
            let floodedness = chunk
                .sample_free(roots.fluid_level_floodedness, location)
                .clamp(-1.0, 1.0);
            let fully_threshold = map(
                floodedness_factor,
                1.0,
                0.0,
                f64::from(-0.3_f32),
                f64::from(0.8_f32),
            );
            let partially_threshold = map(
                floodedness_factor,
                1.0,
                0.0,
                f64::from(-0.8_f32),
                f64::from(0.4_f32),
            );
            (
                floodedness - partially_threshold,
                floodedness - fully_threshold,
            )
        };

        if fully_flooded > 0.0 {
            global.level
        } else if partially_flooded > 0.0 {
            self.randomized_surface_level(chunk, location, lowest_surface)
        } else {
            NO_AQUIFER_LEVEL
        }
    }

    fn randomized_surface_level(
        &mut self,
        chunk: &mut NoiseChunk,
        location: IVec3,
        lowest_surface: i32,
    ) -> i32 {
        let cell_x = floor_div(location.x, 16);
        let cell_y = floor_div(location.y, 40);
        let cell_z = floor_div(location.z, 16);
        let cell_middle_y = cell_y * 40 + 20;

        let roots = chunk.roots();
        let spread = chunk.sample_free(roots.fluid_level_spread, IVec3::new(cell_x, cell_y, cell_z))
            * 10.0;
        let quantized_spread = ((spread / 3.0).floor() as i32) * 3;
        lowest_surface.min(cell_middle_y + quantized_spread)
    }

    fn compute_fluid_type(
        &mut self,
        chunk: &mut NoiseChunk,
        location: IVec3,
        global: &FluidStatus,
        surface_level: i32,
    ) -> Block {
        if surface_level <= -10 && surface_level != NO_AQUIFER_LEVEL && global.fluid != Block::Lava
        {
            let cell_x = floor_div(location.x, 64);
            let cell_y = floor_div(location.y, 40);
            let cell_z = floor_div(location.z, 64);
            let roots = chunk.roots();
            let lava = chunk.sample_free(roots.lava, IVec3::new(cell_x, cell_y, cell_z));
            if lava.abs() > f64::from(0.3_f32) {
                return Block::Lava;
            }
        }
        global.fluid
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::NoiseChunk;
    use crate::density::compile::FunctionRegistry;
    use crate::noise::NoiseRegistry;
    use crate::router::{BoundRouter, NoiseRouter};
    use crate::settings::{Block, GeneratorSettings, NoiseSettings, SlideSettings};

    fn test_settings() -> GeneratorSettings {
        GeneratorSettings {
            noise: NoiseSettings {
                min_y: -64,
                height: 384,
                size_horizontal: 1,
                size_vertical: 2,
                top_slide: SlideSettings {
                    target: 0.0,
                    from: 0,
                    to: 0,
                },
                bottom_slide: SlideSettings {
                    target: 0.0,
                    from: 0,
                    to: 0,
                },
            },
            default_block: Block::Stone,
            default_fluid: Block::Water,
            sea_level: 63,
            lava_level: -54,
            aquifers_enabled: true,
            legacy_random_source: false,
            noise_router: NoiseRouter::constant(0.0),
        }
    }

    fn bind(settings: &GeneratorSettings) -> BoundRouter {
        settings
            .noise_router
            .bind(&FunctionRegistry::new(), &NoiseRegistry::builtin(), 3, false)
            .unwrap()
    }

    #[test]
    fn fluid_status_exposes_fluid_only_below_level() {
        let status = FluidStatus::new(63, Block::Water);
        assert_eq!(status.at(62), Block::Water);
        assert_eq!(status.at(63), Block::Air);
        assert_eq!(status.at(100), Block::Air);
    }

    #[test]
    fn similarity_decays_with_distance_gap() {
        assert_eq!(WorldAquifer::similarity(10, 10), 1.0);
        assert_eq!(WorldAquifer::similarity(0, 25), 0.0);
        assert!(WorldAquifer::similarity(0, 40) < 0.0);
    }

    #[test]
    fn pressure_is_symmetric_in_its_candidates() {
        // Swapping two candidate columns must not change the pressure;
        // tie-distance cases therefore resolve order-independently.
        let settings = test_settings();
        let bound = bind(&settings);
        let mut chunk = NoiseChunk::new(&bound, &settings.noise, 0, 0);
        let mut aquifer =
            WorldAquifer::new(GlobalFluidPicker::new(&settings), &settings, 3, 0, 0);

        let a = FluidStatus::new(30, Block::Water);
        let b = FluidStatus::new(10, Block::Water);
        for y in [-20, 5, 15, 25, 40] {
            let pos = IVec3::new(4, y, 7);
            let mut noise1 = None;
            let mut noise2 = None;
            let forward = aquifer.pressure(&mut chunk, pos, &mut noise1, &a, &b);
            let backward = aquifer.pressure(&mut chunk, pos, &mut noise2, &b, &a);
            assert_eq!(forward.to_bits(), backward.to_bits());
        }
    }

    #[test]
    fn equal_levels_produce_zero_pressure() {
        let settings = test_settings();
        let bound = bind(&settings);
        let mut chunk = NoiseChunk::new(&bound, &settings.noise, 0, 0);
        let mut aquifer =
            WorldAquifer::new(GlobalFluidPicker::new(&settings), &settings, 3, 0, 0);
        let status = FluidStatus::new(20, Block::Water);
        let mut noise = None;
        let pressure = aquifer.pressure(
            &mut chunk,
            IVec3::new(0, 15, 0),
            &mut noise,
            &status,
            &status.clone(),
        );
        assert_eq!(pressure, 0.0);
    }

    #[test]
    fn water_lava_contact_forces_maximum_pressure() {
        let settings = test_settings();
        let bound = bind(&settings);
        let mut chunk = NoiseChunk::new(&bound, &settings.noise, 0, 0);
        let mut aquifer =
            WorldAquifer::new(GlobalFluidPicker::new(&settings), &settings, 3, 0, 0);
        let water = FluidStatus::new(30, Block::Water);
        let lava = FluidStatus::new(30, Block::Lava);
        let mut noise = None;
        let pressure =
            aquifer.pressure(&mut chunk, IVec3::new(0, 10, 0), &mut noise, &water, &lava);
        assert_eq!(pressure, 2.0);
    }

    #[test]
    #[should_panic(expected = "aquifer lattice access out of bounds")]
    fn out_of_range_lattice_access_is_fatal() {
        let settings = test_settings();
        let bound = bind(&settings);
        let _chunk = NoiseChunk::new(&bound, &settings.noise, 0, 0);
        let mut aquifer =
            WorldAquifer::new(GlobalFluidPicker::new(&settings), &settings, 3, 0, 0);
        // A cell far outside the chunk's precomputed neighborhood.
        let _ = aquifer.location(1000, 0, 1000);
    }
}
