//! Per-chunk evaluation state: the double-buffered slice interpolator, the
//! chunk-scoped caches behind every marker, and the preliminary surface
//! scan.
//!
//! # Fill protocol
//!
//! Callers must drive the interpolator in strict order:
//!
//! ```text
//! initialize_for_first_cell_x
//! for each x cell:
//!     advance_cell_x(cell_x)
//!     for each (cell_z, cell_y):
//!         select_cell_yz(cell_y, cell_z)
//!         for blocks in the cell:
//!             update_for_y(..) -> update_for_x(..) -> update_for_z(..) -> sample()
//!     swap_slices()
//! stop_interpolation
//! ```
//!
//! Calling out of order does not raise an error; it yields stale
//! interpolation values. The misuse test in this module pins that down.

use bevy_math::IVec3;
use rustc_hash::FxHashMap;

use crate::density::node::{
    self, Cache2dSlot, CacheOnceSlot, CellCacheSlot, CellCursor, ChunkState, FlatCacheSlot,
    InterpolatorSlot, MarkerKind, MarkerSlot, PosMapper, SampleMode, SampleOptions,
};
use crate::router::BoundRouter;
use crate::settings::NoiseSettings;

/// Density above which the preliminary surface scan treats a column cell as
/// terrain.
const SURFACE_DENSITY_THRESHOLD: f64 = 0.390625;

/// One chunk's worth of density evaluation state. Created per chunk and
/// discarded after generation; never shared across concurrent generations.
pub struct NoiseChunk<'a> {
    router: &'a BoundRouter,
    state: ChunkState,
    opts: SampleOptions,
    scratch: Vec<f64>,

    cell_width: usize,
    cell_height: usize,
    /// Cells per chunk along x/z.
    cell_count_xz: usize,
    /// Cells along y over the whole world height.
    cell_count_y: usize,
    min_y: i32,
    min_cell_y: i32,

    first_cell_x: i32,
    first_cell_z: i32,
    cell_start_x: i32,
    cell_start_y: i32,
    cell_start_z: i32,

    interpolator_slots: Vec<usize>,
    cell_cache_slots: Vec<usize>,
    interpolating: bool,

    surface_cache: FxHashMap<u64, i32>,
}

impl<'a> NoiseChunk<'a> {
    pub fn new(
        router: &'a BoundRouter,
        settings: &NoiseSettings,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Self {
        let cell_width = settings.cell_width();
        let cell_height = settings.cell_height();
        let cell_count_xz = 16 / cell_width;
        let cell_count_y = settings.height as usize / cell_height;
        let min_cell_y = crate::math::floor_div(settings.min_y, cell_height as i32);
        let first_cell_x = chunk_x * 16 / cell_width as i32;
        let first_cell_z = chunk_z * 16 / cell_width as i32;

        let mut chunk = Self {
            router,
            state: ChunkState { slots: Vec::new() },
            opts: SampleOptions::free(),
            scratch: Vec::new(),
            cell_width,
            cell_height,
            cell_count_xz,
            cell_count_y,
            min_y: settings.min_y,
            min_cell_y,
            first_cell_x,
            first_cell_z,
            cell_start_x: 0,
            cell_start_y: 0,
            cell_start_z: 0,
            interpolator_slots: Vec::new(),
            cell_cache_slots: Vec::new(),
            interpolating: false,
            surface_cache: FxHashMap::default(),
        };
        chunk.build_slots(chunk_x, chunk_z);
        chunk
    }

    /// Builds marker slots in arena order. Children precede parents, so a
    /// flat cache can pre-fill through the slots built before it.
    fn build_slots(&mut self, chunk_x: i32, chunk_z: i32) {
        let start_quart_x = (chunk_x * 16) >> 2;
        let start_quart_z = (chunk_z * 16) >> 2;
        let quart_extent = 16 >> 2;

        for i in 0..self.router.markers.len() {
            let info = &self.router.markers[i];
            let slot = match info.kind {
                MarkerKind::Interpolated => {
                    self.interpolator_slots.push(i);
                    MarkerSlot::Interpolator(InterpolatorSlot::new(
                        info.input,
                        self.cell_count_y,
                        self.cell_count_xz,
                    ))
                }
                MarkerKind::CellCache => {
                    self.cell_cache_slots.push(i);
                    MarkerSlot::CellCache(CellCacheSlot::new(
                        info.input,
                        self.cell_width,
                        self.cell_height,
                    ))
                }
                MarkerKind::Cache2d => MarkerSlot::Cache2d(Cache2dSlot::new(info.input)),
                MarkerKind::CacheOnce => MarkerSlot::CacheOnce(CacheOnceSlot::new(info.input)),
                MarkerKind::FlatCache => {
                    let mut flat =
                        FlatCacheSlot::new(info.input, start_quart_x, start_quart_z, quart_extent);
                    let opts = SampleOptions::free();
                    for quart_x in 0..=quart_extent {
                        let block_x = (start_quart_x + quart_x as i32) << 2;
                        for quart_z in 0..=quart_extent {
                            let block_z = (start_quart_z + quart_z as i32) << 2;
                            let pos = IVec3::new(block_x, 0, block_z);
                            let index = flat.index(quart_x, quart_z);
                            flat.cache[index] = node::sample(
                                &self.router.nodes,
                                &mut self.state,
                                info.input,
                                pos,
                                &opts,
                            );
                        }
                    }
                    MarkerSlot::FlatCache(flat)
                }
            };
            self.state.slots.push(slot);
        }
    }

    /// Arena indices of the bound router's named roots.
    pub fn roots(&self) -> crate::router::Roots {
        self.router.roots
    }

    pub fn cell_width(&self) -> usize {
        self.cell_width
    }

    pub fn cell_height(&self) -> usize {
        self.cell_height
    }

    pub fn cell_count_xz(&self) -> usize {
        self.cell_count_xz
    }

    pub fn cell_count_y(&self) -> usize {
        self.cell_count_y
    }

    pub fn min_cell_y(&self) -> i32 {
        self.min_cell_y
    }

    /// Fills slice 0 by evaluating every (y, z) cell corner of the first
    /// x-cell.
    pub fn initialize_for_first_cell_x(&mut self) {
        assert!(!self.interpolating, "interpolation already running");
        self.interpolating = true;
        self.opts.result_id = 0;
        self.fill_slices(true, self.first_cell_x);
    }

    /// Fills slice 1 with the corners of the next x-cell and moves the cell
    /// origin there.
    pub fn advance_cell_x(&mut self, cell_x: usize) {
        self.fill_slices(false, self.first_cell_x + cell_x as i32 + 1);
        self.cell_start_x = (self.first_cell_x + cell_x as i32) * self.cell_width as i32;
    }

    fn fill_slices(&mut self, first_slice: bool, cell_x: i32) {
        debug_assert!(self.interpolating, "slices filled outside interpolation");
        let block_x = cell_x * self.cell_width as i32;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(self.cell_count_y + 1, 0.0);
        self.opts.mode = SampleMode::Free;
        self.opts.populating_caches = false;

        for cell_z in 0..=self.cell_count_xz {
            let block_z = (self.first_cell_z + cell_z as i32) * self.cell_width as i32;
            self.opts.fill_id = self.opts.fill_id.wrapping_add(1);
            let mapper = SliceMapper {
                block_x,
                block_z,
                min_cell_y: self.min_cell_y,
                cell_height: self.cell_height,
            };
            for k in 0..self.interpolator_slots.len() {
                let slot_index = self.interpolator_slots[k];
                let input = match &self.state.slots[slot_index] {
                    MarkerSlot::Interpolator(interpolator) => interpolator.input,
                    _ => unreachable!(),
                };
                node::fill(
                    &self.router.nodes,
                    &mut self.state,
                    input,
                    &mut scratch,
                    &mapper,
                    &mut self.opts,
                );
                let MarkerSlot::Interpolator(interpolator) = &mut self.state.slots[slot_index]
                else {
                    unreachable!();
                };
                interpolator
                    .column_mut(first_slice, cell_z)
                    .copy_from_slice(&scratch);
            }
        }
        self.opts.fill_id = self.opts.fill_id.wrapping_add(1);
        self.scratch = scratch;
    }

    /// Selects the eight corners of cell (y, z) in the current x column and
    /// precomputes all cell caches for that cell.
    pub fn select_cell_yz(&mut self, cell_y: usize, cell_z: usize) {
        for k in 0..self.interpolator_slots.len() {
            let slot_index = self.interpolator_slots[k];
            let MarkerSlot::Interpolator(interpolator) = &mut self.state.slots[slot_index] else {
                unreachable!();
            };
            interpolator.select_corners(cell_y, cell_z);
        }
        self.cell_start_y = (cell_y as i32 + self.min_cell_y) * self.cell_height as i32;
        self.cell_start_z = (cell_z as i32 + self.first_cell_z) * self.cell_width as i32;

        self.opts.mode = SampleMode::Cell(CellCursor::new(self.cell_width, self.cell_height));
        self.opts.populating_caches = true;
        self.opts.fill_id = self.opts.fill_id.wrapping_add(1);

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(self.cell_width * self.cell_width * self.cell_height, 0.0);
        let mapper = CellMapper {
            cell_start_x: self.cell_start_x,
            cell_start_y: self.cell_start_y,
            cell_start_z: self.cell_start_z,
            cell_width: self.cell_width,
            cell_height: self.cell_height,
        };
        for k in 0..self.cell_cache_slots.len() {
            let slot_index = self.cell_cache_slots[k];
            let input = match &self.state.slots[slot_index] {
                MarkerSlot::CellCache(cell) => cell.input,
                _ => unreachable!(),
            };
            node::fill(
                &self.router.nodes,
                &mut self.state,
                input,
                &mut scratch,
                &mapper,
                &mut self.opts,
            );
            let MarkerSlot::CellCache(cell) = &mut self.state.slots[slot_index] else {
                unreachable!();
            };
            cell.cache.copy_from_slice(&scratch);
        }
        self.scratch = scratch;

        self.opts.fill_id = self.opts.fill_id.wrapping_add(1);
        self.opts.populating_caches = false;
    }

    /// Narrows interpolation to a block layer within the cell.
    pub fn update_for_y(&mut self, block_y: i32, delta: f64) {
        if let SampleMode::Cell(cursor) = &mut self.opts.mode {
            cursor.y = (block_y - self.cell_start_y) as usize;
            cursor.dy = delta;
        }
        for k in 0..self.interpolator_slots.len() {
            let slot_index = self.interpolator_slots[k];
            let MarkerSlot::Interpolator(interpolator) = &mut self.state.slots[slot_index] else {
                unreachable!();
            };
            interpolator.update_y(delta);
        }
    }

    pub fn update_for_x(&mut self, block_x: i32, delta: f64) {
        if let SampleMode::Cell(cursor) = &mut self.opts.mode {
            cursor.x = (block_x - self.cell_start_x) as usize;
            cursor.dx = delta;
        }
        for k in 0..self.interpolator_slots.len() {
            let slot_index = self.interpolator_slots[k];
            let MarkerSlot::Interpolator(interpolator) = &mut self.state.slots[slot_index] else {
                unreachable!();
            };
            interpolator.update_x(delta);
        }
    }

    pub fn update_for_z(&mut self, block_z: i32, delta: f64) {
        if let SampleMode::Cell(cursor) = &mut self.opts.mode {
            cursor.z = (block_z - self.cell_start_z) as usize;
            cursor.dz = delta;
        }
        self.opts.result_id = self.opts.result_id.wrapping_add(1);
        for k in 0..self.interpolator_slots.len() {
            let slot_index = self.interpolator_slots[k];
            let MarkerSlot::Interpolator(interpolator) = &mut self.state.slots[slot_index] else {
                unreachable!();
            };
            interpolator.update_z(delta);
        }
    }

    /// Final density at the current cursor position.
    pub fn sample(&mut self) -> f64 {
        let pos = self.cursor_pos();
        node::sample(
            &self.router.nodes,
            &mut self.state,
            self.router.roots.final_density,
            pos,
            &self.opts,
        )
    }

    fn cursor_pos(&self) -> IVec3 {
        match &self.opts.mode {
            SampleMode::Cell(cursor) => IVec3::new(
                self.cell_start_x + cursor.x as i32,
                self.cell_start_y + cursor.y as i32,
                self.cell_start_z + cursor.z as i32,
            ),
            SampleMode::Free => IVec3::new(self.cell_start_x, self.cell_start_y, self.cell_start_z),
        }
    }

    /// Rotates the slice buffers after finishing an x-cell column.
    pub fn swap_slices(&mut self) {
        for k in 0..self.interpolator_slots.len() {
            let slot_index = self.interpolator_slots[k];
            let MarkerSlot::Interpolator(interpolator) = &mut self.state.slots[slot_index] else {
                unreachable!();
            };
            interpolator.swap_slices();
        }
    }

    pub fn stop_interpolation(&mut self) {
        assert!(self.interpolating, "interpolation never started");
        self.interpolating = false;
    }

    /// Evaluates an arbitrary router root at an off-grid position, with the
    /// chunk's column caches but none of the cell-scoped ones. Used by the
    /// aquifer and the surface scan.
    pub fn sample_free(&mut self, root: usize, pos: IVec3) -> f64 {
        let saved_mode = self.opts.mode;
        let saved_populating = self.opts.populating_caches;
        self.opts.mode = SampleMode::Free;
        self.opts.populating_caches = false;
        let value = node::sample(&self.router.nodes, &mut self.state, root, pos, &self.opts);
        self.opts.mode = saved_mode;
        self.opts.populating_caches = saved_populating;
        value
    }

    /// Approximate top-of-terrain height for a column, from a top-down scan
    /// of the preliminary-surface graph at cell-height steps. Cached per
    /// quantized (x, z).
    pub fn preliminary_surface_level(&mut self, x: i32, z: i32) -> i32 {
        let quart_x = (x >> 2) << 2;
        let quart_z = (z >> 2) << 2;
        let key = ((quart_x as u32 as u64) << 32) | (quart_z as u32 as u64);
        if let Some(&level) = self.surface_cache.get(&key) {
            return level;
        }
        let level = self.compute_surface_level(quart_x, quart_z);
        self.surface_cache.insert(key, level);
        level
    }

    fn compute_surface_level(&mut self, x: i32, z: i32) -> i32 {
        let step = self.cell_height as i32;
        let max_y = self.min_y + (self.cell_count_y as i32) * step;
        let root = self.router.roots.preliminary_surface_level;
        let mut block_y = max_y;
        while block_y >= self.min_y {
            let density = self.sample_free(root, IVec3::new(x, block_y, z));
            if density > SURFACE_DENSITY_THRESHOLD {
                return block_y;
            }
            block_y -= step;
        }
        self.min_y
    }
}

struct SliceMapper {
    block_x: i32,
    block_z: i32,
    min_cell_y: i32,
    cell_height: usize,
}

impl PosMapper for SliceMapper {
    fn at(&self, index: usize, opts: &mut SampleOptions) -> IVec3 {
        opts.fill_index = index;
        let block_y = (self.min_cell_y + index as i32) * self.cell_height as i32;
        IVec3::new(self.block_x, block_y, self.block_z)
    }
}

struct CellMapper {
    cell_start_x: i32,
    cell_start_y: i32,
    cell_start_z: i32,
    cell_width: usize,
    cell_height: usize,
}

impl PosMapper for CellMapper {
    fn at(&self, index: usize, opts: &mut SampleOptions) -> IVec3 {
        opts.fill_index = index;
        let z = index % self.cell_width;
        let x = (index / self.cell_width) % self.cell_width;
        let y = self.cell_height - 1 - index / (self.cell_width * self.cell_width);
        if let SampleMode::Cell(cursor) = &mut opts.mode {
            cursor.x = x;
            cursor.y = y;
            cursor.z = z;
            cursor.dx = x as f64 / self.cell_width as f64;
            cursor.dy = y as f64 / self.cell_height as f64;
            cursor.dz = z as f64 / self.cell_width as f64;
        }
        IVec3::new(
            self.cell_start_x + x as i32,
            self.cell_start_y + y as i32,
            self.cell_start_z + z as i32,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::density::DensityFunction;
    use crate::density::compile::FunctionRegistry;
    use crate::noise::NoiseRegistry;
    use crate::router::NoiseRouter;
    use crate::settings::{NoiseSettings, SlideSettings};

    fn flat_settings() -> NoiseSettings {
        NoiseSettings {
            min_y: 0,
            height: 64,
            size_horizontal: 1,
            size_vertical: 1,
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
        }
    }

    fn gradient_router() -> crate::router::BoundRouter {
        let mut router = NoiseRouter::constant(0.0);
        router.final_density = DensityFunction::interpolated(
            DensityFunction::y_clamped_gradient(0, 64, 1.0, -1.0),
        )
        .into();
        router
            .bind(&FunctionRegistry::new(), &NoiseRegistry::builtin(), 7, false)
            .unwrap()
    }

    /// Runs the documented protocol over one chunk, sampling one block, and
    /// returns the interpolated density there.
    fn sample_block_via_protocol(bound: &crate::router::BoundRouter, block: IVec3) -> f64 {
        let settings = flat_settings();
        let mut chunk = NoiseChunk::new(bound, &settings, 0, 0);
        let width = chunk.cell_width();
        let height = chunk.cell_height();
        let cells_xz = chunk.cell_count_xz();
        let cells_y = chunk.cell_count_y();
        let mut result = f64::NAN;

        chunk.initialize_for_first_cell_x();
        for cell_x in 0..cells_xz {
            chunk.advance_cell_x(cell_x);
            for cell_z in 0..cells_xz {
                for cell_y in (0..cells_y).rev() {
                    chunk.select_cell_yz(cell_y, cell_z);
                    for local_y in (0..height).rev() {
                        let block_y = (cell_y * height + local_y) as i32;
                        chunk.update_for_y(block_y, local_y as f64 / height as f64);
                        for local_x in 0..width {
                            let block_x = (cell_x * width + local_x) as i32;
                            chunk.update_for_x(block_x, local_x as f64 / width as f64);
                            for local_z in 0..width {
                                let block_z = (cell_z * width + local_z) as i32;
                                chunk.update_for_z(block_z, local_z as f64 / width as f64);
                                let value = chunk.sample();
                                if IVec3::new(block_x, block_y, block_z) == block {
                                    result = value;
                                }
                            }
                        }
                    }
                }
            }
            chunk.swap_slices();
        }
        chunk.stop_interpolation();
        result
    }

    #[test]
    fn interpolation_matches_direct_evaluation_at_cell_corners() {
        // The gradient is linear in y, so trilinear interpolation must
        // reproduce it exactly everywhere, not just at corners.
        let bound = gradient_router();
        for block in [
            IVec3::new(0, 0, 0),
            IVec3::new(3, 17, 9),
            IVec3::new(10, 32, 2),
            IVec3::new(15, 63, 15),
        ] {
            let interpolated = sample_block_via_protocol(&bound, block);
            let direct = bound.sampler().sample(bound.roots.final_density, block);
            assert!(
                (interpolated - direct).abs() < 1e-9,
                "at {:?}: {} vs {}",
                block,
                interpolated,
                direct
            );
        }
    }

    #[test]
    fn out_of_order_calls_return_stale_values() {
        // sample() without the update_* sequence must NOT silently agree
        // with the correctly ordered protocol.
        let bound = gradient_router();
        let block = IVec3::new(2, 33, 2);
        let correct = sample_block_via_protocol(&bound, block);
        assert!(correct.is_finite());

        let settings = flat_settings();
        let mut chunk = NoiseChunk::new(&bound, &settings, 0, 0);
        chunk.initialize_for_first_cell_x();
        chunk.advance_cell_x(0);
        // Select the cell containing the block but skip every update call.
        chunk.select_cell_yz(33 / 4, 0);
        let stale = chunk.sample();
        assert_ne!(
            stale.to_bits(),
            correct.to_bits(),
            "misuse accidentally produced the correct value"
        );
        chunk.stop_interpolation();
    }

    #[test]
    #[should_panic(expected = "interpolation already running")]
    fn double_initialize_is_fatal() {
        let bound = gradient_router();
        let settings = flat_settings();
        let mut chunk = NoiseChunk::new(&bound, &settings, 0, 0);
        chunk.initialize_for_first_cell_x();
        chunk.initialize_for_first_cell_x();
    }

    #[test]
    fn preliminary_surface_level_finds_gradient_zero() {
        // Density is positive below y=32 and negative above, so the scan
        // must land within one cell height of the crossover.
        let mut router = NoiseRouter::constant(0.0);
        router.preliminary_surface_level =
            DensityFunction::y_clamped_gradient(0, 64, 1.0, -1.0).into();
        let bound = router
            .bind(&FunctionRegistry::new(), &NoiseRegistry::builtin(), 7, false)
            .unwrap();
        let settings = flat_settings();
        let mut chunk = NoiseChunk::new(&bound, &settings, 0, 0);
        let level = chunk.preliminary_surface_level(5, 9);
        // gradient(y) > 0.390625 below y ~ 19.5
        assert!(level <= 20 && level >= 20 - settings.cell_height() as i32);
        // Cached lookups agree.
        assert_eq!(level, chunk.preliminary_surface_level(6, 10));
    }
}
