//! Baked distance grids for numerical brushes

use glam::{UVec3, Vec3};
use rayon::prelude::*;

/// Distance samples over the local unit cube `[-0.5, 0.5]^3`
///
/// Sample `(x, y, z)` sits at the center of its cell; values are local-space
/// distances.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericalSdf {
    resolution: UVec3,
    samples: Vec<f32>,
}

impl NumericalSdf {
    /// Evaluate `distance` at every cell center, one z-slice per task
    pub fn bake<F>(resolution: UVec3, distance: F) -> Self
    where
        F: Fn(Vec3) -> f32 + Sync,
    {
        let resolution = resolution.max(UVec3::ONE);
        let slice_len = (resolution.x * resolution.y) as usize;
        let mut samples = vec![0.0; slice_len * resolution.z as usize];
        let inv = Vec3::ONE / resolution.as_vec3();

        samples
            .par_chunks_mut(slice_len)
            .enumerate()
            .for_each(|(z, slice)| {
                for y in 0..resolution.y {
                    for x in 0..resolution.x {
                        let cell = Vec3::new(x as f32, y as f32, z as f32);
                        let p = (cell + 0.5) * inv - 0.5;
                        slice[(y * resolution.x + x) as usize] = distance(p);
                    }
                }
            });

        Self { resolution, samples }
    }

    pub fn resolution(&self) -> UVec3 {
        self.resolution
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Trilinear sample in local space
    ///
    /// Outside the unit cube the distance to the cube is added to the value at
    /// the nearest point inside.
    pub fn sample(&self, p: Vec3) -> f32 {
        sample_grid(&self.samples, self.resolution, p)
    }
}

/// Sample an x-major grid of `res` cells laid over the local unit cube
pub(crate) fn sample_grid(samples: &[f32], res: UVec3, p: Vec3) -> f32 {
    let inside = p.clamp(Vec3::splat(-0.5), Vec3::splat(0.5));
    let outside = (p - inside).length();

    let max = (res - UVec3::ONE).as_vec3();
    let uvw = ((inside + 0.5) * res.as_vec3() - 0.5).clamp(Vec3::ZERO, max);
    let base = uvw.floor();
    let f = uvw - base;
    let b = base.as_uvec3();
    let hi = (b + UVec3::ONE).min(res - UVec3::ONE);

    let at = |x: u32, y: u32, z: u32| samples[(x + res.x * (y + res.y * z)) as usize];
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let c00 = lerp(at(b.x, b.y, b.z), at(hi.x, b.y, b.z), f.x);
    let c10 = lerp(at(b.x, hi.y, b.z), at(hi.x, hi.y, b.z), f.x);
    let c01 = lerp(at(b.x, b.y, hi.z), at(hi.x, b.y, hi.z), f.x);
    let c11 = lerp(at(b.x, hi.y, hi.z), at(hi.x, hi.y, hi.z), f.x);

    lerp(lerp(c00, c10, f.y), lerp(c01, c11, f.y), f.z) + outside
}
