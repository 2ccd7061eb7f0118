//! Signed-distance-field scene volumes
//!
//! Brushes are rasterized on the GPU into a coarse material volume and a fine
//! scene volume, followed by a sparse mip chain. Scene space is measured in
//! mip-0 texels: `scene = (world - origin) / grid_size`.

pub mod brush;
pub mod numerical;
pub mod scene;
pub mod reference;
pub mod params;
pub mod volume;
pub mod generation;

pub use brush::{Brush, BrushCollection, BrushShape, BrushTransform, BrushType, GpuBrush};
pub use numerical::NumericalSdf;
pub use scene::SdfScene;
pub use volume::{SceneVolumes, VolumeMismatch};
pub use generation::{SceneState, SdfGenerationPipeline};

/// Mip levels of the scene and material volumes
pub const SCENE_MIP_COUNT: u32 = 5;
/// Distance band, in texels of the sampled mip, that a normalized value of 1 covers
pub const SDF_SUPREMUM: f32 = 4.0;
/// Scene-volume texels per material-volume cell along each axis
pub const MAT_VOLUME_SCALE: u32 = 4;
/// Material cells per culling tile along each axis
pub const MAT_VOLUME_TILE_SIZE: u32 = 4;
/// Brushes kept per material cell; further overlaps are ignored
pub const MAX_BRUSH_PER_MAT_VOLUME_GRID: u32 = 16;
/// Average brush-index capacity reserved per material cell
pub const MAX_BRUSH_COUNT_FACTOR: u32 = 2;
/// Threads per axis of the material-volume and mip-dispatch kernels
pub const GENERATE_MAT_VOLUME_KERNEL_SIZE: u32 = 4;
/// Largest workgroup count of one dispatch dimension
pub const MAX_DISPATCH_GROUPS: u32 = 65535;

/// Scene volume size must be a multiple of this so every mip stays
/// exactly `MAT_VOLUME_SCALE` times the material mip
pub const SCENE_SIZE_GRANULARITY: u32 = MAT_VOLUME_SCALE << (SCENE_MIP_COUNT - 1);

/// Half diagonal of a unit texel
pub(crate) const HALF_SQRT_3: f32 = 0.866_025_4;

/// Indirect dispatch arguments for `items` work items at `per_group` items
/// per workgroup
///
/// Counts beyond one dimension's limit spill into Y; kernels rebuild the
/// linear group index as `y * MAX_DISPATCH_GROUPS + x`.
pub fn indirect_args_for(items: u32, per_group: u32) -> [u32; 3] {
    let groups = items.div_ceil(per_group.max(1));
    if groups <= MAX_DISPATCH_GROUPS {
        [groups, 1, 1]
    } else {
        [MAX_DISPATCH_GROUPS, groups.div_ceil(MAX_DISPATCH_GROUPS), 1]
    }
}
