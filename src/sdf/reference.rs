//! CPU evaluation of brushes and the sparse culling rule
//!
//! Mirrors the generation kernels so GPU output can be checked, and lets
//! callers query the scene distance without a readback.

use glam::{UVec3, Vec3};

use crate::sdf::brush::{BrushType, FlattenedBrushes, GpuBrush};
use crate::sdf::numerical::sample_grid;
use crate::sdf::scene::SdfScene;
use crate::sdf::{HALF_SQRT_3, MAT_VOLUME_SCALE, MAT_VOLUME_TILE_SIZE, MAX_BRUSH_PER_MAT_VOLUME_GRID, SDF_SUPREMUM};

/// World-space culling radii for a grid size
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CullRadii {
    /// Reach of a tile of `MAT_VOLUME_TILE_SIZE^3` material cells
    pub tile: f32,
    /// Reach of one material cell
    pub grid: f32,
}

impl CullRadii {
    pub fn for_grid_size(grid_size: f32) -> Self {
        let tile_cells = (MAT_VOLUME_SCALE * MAT_VOLUME_TILE_SIZE) as f32;
        let grid_cells = MAT_VOLUME_SCALE as f32;
        Self {
            tile: grid_size * ((tile_cells - 1.0) * HALF_SQRT_3 + SDF_SUPREMUM),
            grid: grid_size * ((grid_cells - 1.0) * HALF_SQRT_3 + SDF_SUPREMUM),
        }
    }
}

fn box_distance(p: Vec3, half: Vec3) -> f32 {
    let e = p.abs() - half;
    e.max(Vec3::ZERO).length() + e.max_element().min(0.0)
}

fn numerical_distance(q: Vec3, params: &[f32], samples: &[f32]) -> f32 {
    let offset = params[0] as usize;
    let res = UVec3::new(params[1] as u32, params[2] as u32, params[3] as u32);
    let count = (res.x * res.y * res.z) as usize;
    sample_grid(&samples[offset..offset + count], res, q)
}

/// World-space distance from `p` to one brush
pub fn brush_distance(brush: &GpuBrush, flat: &FlattenedBrushes, p: Vec3) -> f32 {
    let q = brush.to_local(p);
    let params = &flat.parameters[brush.parameter_range()];
    let local = match brush.brush_type {
        t if t == BrushType::Sphere as u32 => q.length() - params[0],
        t if t == BrushType::Cube as u32 => box_distance(q, Vec3::new(params[0], params[1], params[2])),
        _ => numerical_distance(q, params, &flat.samples),
    };
    local / brush.scale_inv
}

/// Union of every brush; `f32::MAX` for an empty list
pub fn scene_distance(flat: &FlattenedBrushes, p: Vec3) -> f32 {
    flat.brushes
        .iter()
        .map(|b| brush_distance(b, flat, p))
        .fold(f32::MAX, f32::min)
}

/// Brushes whose distance at the center of material cell `cell` is within
/// the cell culling radius, capped like the GPU list
pub fn cell_brushes(scene: &SdfScene, flat: &FlattenedBrushes, cell: UVec3, radius: f32) -> Vec<u32> {
    let center = scene.cell_center(cell);
    flat.brushes
        .iter()
        .enumerate()
        .filter(|(_, b)| brush_distance(b, flat, center) < radius)
        .map(|(i, _)| i as u32)
        .take(MAX_BRUSH_PER_MAT_VOLUME_GRID as usize)
        .collect()
}

/// Expected material-volume value of `cell`: the stored material of the
/// nearest culled brush at the cell center, lower index on ties; zero when
/// no brush reaches the cell
pub fn cell_material(scene: &SdfScene, flat: &FlattenedBrushes, cell: UVec3) -> u32 {
    let radius = CullRadii::for_grid_size(scene.grid_size).grid;
    let center = scene.cell_center(cell);
    cell_brushes(scene, flat, cell, radius)
        .into_iter()
        .map(|i| (brush_distance(&flat.brushes[i as usize], flat, center), i))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map_or(0, |(_, i)| flat.brushes[i as usize].material)
}

/// Material cells the sparse append stage is expected to emit
pub fn occupied_cells(scene: &SdfScene, flat: &FlattenedBrushes, radius: f32) -> Vec<UVec3> {
    let mat = scene.material_size();
    let mut cells = Vec::new();
    for z in 0..mat.z {
        for y in 0..mat.y {
            for x in 0..mat.x {
                let cell = UVec3::new(x, y, z);
                if !cell_brushes(scene, flat, cell, radius).is_empty() {
                    cells.push(cell);
                }
            }
        }
    }
    cells
}

/// Expected normalized mip-0 value of `texel`
pub fn scene_texel(scene: &SdfScene, flat: &FlattenedBrushes, texel: UVec3) -> f32 {
    let radii = CullRadii::for_grid_size(scene.grid_size);
    let brushes = cell_brushes(scene, flat, texel / MAT_VOLUME_SCALE, radii.grid);
    if brushes.is_empty() {
        return 1.0;
    }
    let p = scene.texel_center(texel);
    let d = brushes
        .iter()
        .map(|&i| brush_distance(&flat.brushes[i as usize], flat, p))
        .fold(f32::MAX, f32::min);
    (d / scene.world_space_supremum()).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::brush::{Brush, BrushShape, BrushTransform};
    use crate::sdf::numerical::NumericalSdf;

    fn sphere_scene() -> SdfScene {
        SdfScene::new(UVec3::splat(64), Vec3::splat(-4.0), 0.25)
            .with_brush(Brush::sphere(Vec3::ZERO, 2.0, 0))
    }

    #[test]
    fn test_cull_radii() {
        let radii = CullRadii::for_grid_size(1.0);
        assert!((radii.grid - (3.0 * HALF_SQRT_3 + 4.0)).abs() < 1e-5);
        assert!((radii.tile - (15.0 * HALF_SQRT_3 + 4.0)).abs() < 1e-5);
        assert!(radii.tile > radii.grid);
    }

    #[test]
    fn test_scaled_brush_distance() {
        let mut collection = crate::sdf::BrushCollection::new();
        collection.push(Brush {
            shape: BrushShape::Sphere { radius: 1.0 },
            transform: BrushTransform {
                position: Vec3::new(1.0, 0.0, 0.0),
                scale: 3.0,
                ..Default::default()
            },
            material: 0,
        });
        let flat = collection.flatten().unwrap();
        assert!((scene_distance(&flat, Vec3::new(10.0, 0.0, 0.0)) - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_numerical_matches_analytic() {
        let mut collection = crate::sdf::BrushCollection::new();
        let grid = collection.add_numerical(NumericalSdf::bake(UVec3::splat(24), |p| p.length() - 0.25));
        collection.push(Brush {
            shape: BrushShape::Numerical { grid },
            transform: BrushTransform { scale: 4.0, ..Default::default() },
            material: 0,
        });
        let flat = collection.flatten().unwrap();
        // Local radius 0.25 at scale 4 is a world radius of 1. The center sits
        // on the kink, blended from samples half a cell diagonal away.
        let half_diagonal = 4.0 * 3f32.sqrt() / (2.0 * 24.0);
        let center = scene_distance(&flat, Vec3::ZERO);
        assert!(center >= -1.0 - 1e-4, "{center}");
        assert!(center <= -1.0 + half_diagonal + 1e-4, "{center}");
        assert!(scene_distance(&flat, Vec3::new(1.0, 0.0, 0.0)).abs() < 0.1);
    }

    #[test]
    fn test_sphere_texels() {
        let scene = sphere_scene();
        let flat = scene.brushes.flatten().unwrap();
        // Texel 16 spans world [0, 0.25) on each axis
        assert_eq!(scene_texel(&scene, &flat, UVec3::splat(16)), -1.0);
        // 10 world units along +x from the center
        assert_eq!(scene_texel(&scene, &flat, UVec3::new(56, 16, 16)), 1.0);
    }

    #[test]
    fn test_occupied_cells_exclude_far_cells() {
        let scene = sphere_scene();
        let flat = scene.brushes.flatten().unwrap();
        let radii = CullRadii::for_grid_size(scene.grid_size);
        let cells = occupied_cells(&scene, &flat, radii.grid);
        assert!(!cells.is_empty());
        assert!(cells.contains(&UVec3::splat(4)));
        assert!(!cells.contains(&UVec3::new(15, 15, 15)));
        // All occupied cells lie within the sphere's reach
        for cell in &cells {
            let center = scene.cell_center(*cell);
            assert!(center.length() - 2.0 < radii.grid);
        }
    }

    #[test]
    fn test_cell_material_prefers_nearest_brush() {
        let scene = SdfScene::new(UVec3::splat(64), Vec3::splat(-4.0), 0.25)
            .with_brush(Brush::sphere(Vec3::ZERO, 2.0, 3))
            .with_brush(Brush::cube(Vec3::new(4.0, 0.0, 0.0), Vec3::splat(2.0), 7));
        let flat = scene.brushes.flatten().unwrap();
        // Cell 4 is centered at world 0.5, deep in the sphere
        assert_eq!(cell_material(&scene, &flat, UVec3::splat(4)), 4);
        // Cell (8, 4, 4) is centered at (4.5, 0.5, 0.5), inside the cube
        assert_eq!(cell_material(&scene, &flat, UVec3::new(8, 4, 4)), 8);
        assert_eq!(cell_material(&scene, &flat, UVec3::splat(15)), 0);
    }
}
