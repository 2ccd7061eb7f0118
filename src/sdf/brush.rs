//! SDF brushes and their GPU records

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::sdf::numerical::NumericalSdf;

/// GPU-side brush type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum BrushType {
    Numerical = 0,
    Sphere = 1,
    Cube = 2,
}

/// Brush shape in local space
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrushShape {
    Sphere { radius: f32 },
    /// Box with full edge lengths `size`, centered on the origin
    Cube { size: Vec3 },
    /// Baked grid sampled over the local unit cube; `grid` indexes
    /// [`BrushCollection::numerical`]
    Numerical { grid: usize },
}

impl BrushShape {
    pub fn brush_type(&self) -> BrushType {
        match self {
            BrushShape::Sphere { .. } => BrushType::Sphere,
            BrushShape::Cube { .. } => BrushType::Cube,
            BrushShape::Numerical { .. } => BrushType::Numerical,
        }
    }

    /// Radius of a local-space sphere enclosing the shape
    pub fn bounding_radius(&self) -> f32 {
        match self {
            BrushShape::Sphere { radius } => *radius,
            BrushShape::Cube { size } => size.length() * 0.5,
            BrushShape::Numerical { .. } => Vec3::splat(0.5).length(),
        }
    }
}

/// Brush placement; scale is uniform so distances stay exact
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl Default for BrushTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: 1.0,
        }
    }
}

impl BrushTransform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn scale_inv(&self) -> f32 {
        1.0 / self.scale
    }

    /// World to local: inverse scale, then inverse rotation, then inverse translation
    pub fn world_to_local(&self) -> Mat4 {
        Mat4::from_scale(Vec3::splat(self.scale_inv()))
            * Mat4::from_quat(self.rotation.conjugate())
            * Mat4::from_translation(-self.position)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Brush {
    pub shape: BrushShape,
    #[serde(default)]
    pub transform: BrushTransform,
    #[serde(default)]
    pub material: u32,
}

impl Brush {
    pub fn sphere(center: Vec3, radius: f32, material: u32) -> Self {
        Self {
            shape: BrushShape::Sphere { radius },
            transform: BrushTransform::from_position(center),
            material,
        }
    }

    pub fn cube(center: Vec3, size: Vec3, material: u32) -> Self {
        Self {
            shape: BrushShape::Cube { size },
            transform: BrushTransform::from_position(center),
            material,
        }
    }

    /// World-space bounding sphere radius
    pub fn world_radius(&self) -> f32 {
        self.shape.bounding_radius() * self.transform.scale
    }
}

/// Brush record as read by the generation kernels (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GpuBrush {
    /// Rows of the 3x4 world-to-local matrix
    pub world_to_local: [[f32; 4]; 3],
    pub brush_type: u32,
    /// Material id + 1; zero is reserved for "no material"
    pub material: u32,
    /// `parameter_count << 24 | parameter_offset`
    pub parameters: u32,
    pub scale_inv: f32,
}

const _: () = assert!(std::mem::size_of::<GpuBrush>() == 64);

/// Largest offset that fits the packed parameter field
pub const MAX_PARAMETER_OFFSET: u32 = (1 << 24) - 1;

impl GpuBrush {
    pub fn pack(brush: &Brush, parameter_offset: u32, parameter_count: u32) -> Self {
        let m = brush.transform.world_to_local();
        Self {
            world_to_local: [m.row(0).to_array(), m.row(1).to_array(), m.row(2).to_array()],
            brush_type: brush.shape.brush_type() as u32,
            material: brush.material + 1,
            parameters: pack_parameters(parameter_offset, parameter_count),
            scale_inv: brush.transform.scale_inv(),
        }
    }

    /// Transform a world point into brush-local space
    pub fn to_local(&self, p: Vec3) -> Vec3 {
        let [r0, r1, r2] = self.world_to_local;
        let row = |r: [f32; 4]| r[0] * p.x + r[1] * p.y + r[2] * p.z + r[3];
        Vec3::new(row(r0), row(r1), row(r2))
    }

    pub fn parameter_range(&self) -> std::ops::Range<usize> {
        let (offset, count) = unpack_parameters(self.parameters);
        offset as usize..(offset + count) as usize
    }
}

pub fn pack_parameters(offset: u32, count: u32) -> u32 {
    debug_assert!(offset <= MAX_PARAMETER_OFFSET && count < 256);
    (count << 24) | (offset & MAX_PARAMETER_OFFSET)
}

pub fn unpack_parameters(packed: u32) -> (u32, u32) {
    (packed & MAX_PARAMETER_OFFSET, packed >> 24)
}

/// Brushes flattened into the three buffers the generation kernels read
#[derive(Clone, Debug, Default)]
pub struct FlattenedBrushes {
    pub brushes: Vec<GpuBrush>,
    pub parameters: Vec<f32>,
    pub samples: Vec<f32>,
}

/// A scene's brush list plus the baked grids numerical brushes refer to
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BrushCollection {
    pub brushes: Vec<Brush>,
    /// Baked grids; built in code, not part of the JSON description
    #[serde(skip)]
    pub numerical: Vec<NumericalSdf>,
}

impl BrushCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, brush: Brush) -> &mut Self {
        self.brushes.push(brush);
        self
    }

    /// Register a baked grid and return the index a `Numerical` shape uses
    pub fn add_numerical(&mut self, grid: NumericalSdf) -> usize {
        self.numerical.push(grid);
        self.numerical.len() - 1
    }

    pub fn len(&self) -> usize {
        self.brushes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brushes.is_empty()
    }

    /// Assign parameter slices and produce the GPU records
    pub fn flatten(&self) -> Result<FlattenedBrushes> {
        let mut out = FlattenedBrushes::default();

        // Each grid's samples are appended once, however many brushes use it
        let mut sample_offsets = Vec::with_capacity(self.numerical.len());
        for grid in &self.numerical {
            sample_offsets.push(out.samples.len() as u32);
            out.samples.extend_from_slice(grid.samples());
        }

        for brush in &self.brushes {
            let offset = out.parameters.len() as u32;
            match &brush.shape {
                BrushShape::Sphere { radius } => out.parameters.push(*radius),
                BrushShape::Cube { size } => {
                    out.parameters.extend_from_slice(&(*size * 0.5).to_array());
                }
                BrushShape::Numerical { grid } => {
                    let (Some(samples_at), Some(numerical)) = (sample_offsets.get(*grid), self.numerical.get(*grid)) else {
                        return Err(Error::Scene(format!("numerical brush refers to missing grid {grid}")));
                    };
                    let res = numerical.resolution();
                    // Offsets stay exact as f32 below 2^24 samples
                    out.parameters.extend_from_slice(&[*samples_at as f32, res.x as f32, res.y as f32, res.z as f32]);
                }
            }
            let count = out.parameters.len() as u32 - offset;
            if offset > MAX_PARAMETER_OFFSET {
                return Err(Error::Scene("brush parameter buffer exceeds 24-bit offsets".into()));
            }
            out.brushes.push(GpuBrush::pack(brush, offset, count));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_packing() {
        let packed = pack_parameters(123_456, 4);
        assert_eq!(packed >> 24, 4);
        assert_eq!(unpack_parameters(packed), (123_456, 4));
    }

    #[test]
    fn test_world_to_local_inverts_transform() {
        let transform = BrushTransform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_z(0.7),
            scale: 2.0,
        };
        let local = Vec3::new(0.25, -0.5, 1.0);
        let world = transform.position + transform.rotation * (local * transform.scale);
        let back = transform.world_to_local().transform_point3(world);
        assert!((back - local).length() < 1e-5);
    }

    #[test]
    fn test_pack_brush_record() {
        let brush = Brush {
            shape: BrushShape::Cube { size: Vec3::new(2.0, 4.0, 6.0) },
            transform: BrushTransform {
                position: Vec3::new(5.0, 0.0, 0.0),
                rotation: Quat::IDENTITY,
                scale: 0.5,
            },
            material: 3,
        };
        let gpu = GpuBrush::pack(&brush, 10, 3);
        assert_eq!(gpu.brush_type, BrushType::Cube as u32);
        assert_eq!(gpu.material, 4);
        assert_eq!(gpu.scale_inv, 2.0);
        assert_eq!(gpu.parameter_range(), 10..13);
        assert!((gpu.to_local(Vec3::new(6.0, 0.0, 0.0)) - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_flatten_assigns_parameter_slices() {
        let mut collection = BrushCollection::new();
        let grid = collection.add_numerical(NumericalSdf::bake(glam::UVec3::splat(4), |p| p.length() - 0.4));
        collection
            .push(Brush::sphere(Vec3::ZERO, 2.0, 0))
            .push(Brush::cube(Vec3::ONE, Vec3::splat(2.0), 1))
            .push(Brush {
                shape: BrushShape::Numerical { grid },
                transform: BrushTransform::default(),
                material: 2,
            });

        let flat = collection.flatten().unwrap();
        assert_eq!(flat.brushes.len(), 3);
        assert_eq!(flat.parameters, vec![2.0, 1.0, 1.0, 1.0, 0.0, 4.0, 4.0, 4.0]);
        assert_eq!(flat.brushes[1].parameter_range(), 1..4);
        assert_eq!(flat.brushes[2].parameter_range(), 4..8);
        assert_eq!(flat.samples.len(), 64);
    }

    #[test]
    fn test_flatten_rejects_missing_grid() {
        let mut collection = BrushCollection::new();
        collection.push(Brush {
            shape: BrushShape::Numerical { grid: 3 },
            transform: BrushTransform::default(),
            material: 0,
        });
        assert!(matches!(collection.flatten(), Err(Error::Scene(_))));
    }

    #[test]
    fn test_brush_json() {
        let json = r#"{ "shape": { "type": "Sphere", "radius": 2.0 }, "material": 1 }"#;
        let brush: Brush = serde_json::from_str(json).unwrap();
        assert_eq!(brush.shape, BrushShape::Sphere { radius: 2.0 });
        assert_eq!(brush.transform, BrushTransform::default());
    }
}
