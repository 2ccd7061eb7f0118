//! Fluid emitters
//!
//! The set of emitter kinds is closed; each variant has a matching case in
//! the `add_particles` kernel keyed by [`FluidEmitterType`].

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::fluid::MAX_EMITTER_PARTICLE_COUNT_PER_GROUP;

/// GPU tag of an emitter record
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FluidEmitterType {
    Particle = 0,
    Cube = 1,
}

/// One explicit particle; layout must match the kernel's 6-float read
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct ParticleDesc {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
}

const _: () = assert!(std::mem::size_of::<ParticleDesc>() == 24);

/// Emits an explicit list of particles once
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleEmitter {
    #[serde(default)]
    particles: Vec<ParticleDesc>,
}

impl ParticleEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_particle(&mut self, position: Vec3, velocity: Vec3) {
        self.particles.push(ParticleDesc {
            position: position.to_array(),
            velocity: velocity.to_array(),
        });
    }

    pub fn particles(&self) -> &[ParticleDesc] {
        &self.particles
    }
}

/// Cube emitter block; layout must match `CubeEmitter` in `fluid_solver.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CubeProperties {
    pub min: [f32; 3],
    pub seed: u32,
    pub max: [f32; 3],
    pub _pad0: u32,
    pub linear_velocity: [f32; 3],
    pub _pad1: u32,
    pub angular_velocity: [f32; 3],
    pub _pad2: u32,
}

const _: () = assert!(std::mem::size_of::<CubeProperties>() == 64);

/// Fills an axis-aligned box with jittered particles
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CubeEmitter {
    pub min: Vec3,
    pub max: Vec3,
    pub linear_velocity: Vec3,
    /// Spin around the box center, radians per second
    pub angular_velocity: Vec3,
    /// Particles per second, `None` for manual emission only
    pub flux: Option<f32>,
    #[serde(skip)]
    pending: u32,
    #[serde(skip)]
    remainder: f32,
    #[serde(skip)]
    emitted: u32,
}

impl Default for CubeEmitter {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

impl CubeEmitter {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min,
            max,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            flux: None,
            pending: 0,
            remainder: 0.0,
            emitted: 0,
        }
    }

    /// Box of `size` whose minimum corner sits at `offset`
    pub fn from_offset_size(offset: Vec3, size: Vec3) -> Self {
        Self::new(offset, offset + size)
    }

    pub fn with_velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self
    }

    /// Continuous emission rate, clamped to `1..=1024` particles per second
    pub fn with_flux(mut self, flux: f32) -> Self {
        self.flux = Some(flux);
        self
    }

    /// Queue `count` particles for the next tick
    pub fn add_particles(&mut self, count: u32) {
        self.pending = self.pending.saturating_add(count);
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    /// Accumulate flux over `dt`; the fractional part carries to the next tick
    pub fn elapse(&mut self, dt: f32) {
        let Some(flux) = self.flux else { return };
        let flux = flux.clamp(1.0, MAX_EMITTER_PARTICLE_COUNT_PER_GROUP as f32);
        let total = self.remainder + flux * dt.max(0.0);
        let whole = total.floor();
        self.remainder = total - whole;
        self.add_particles(whole as u32);
    }

    fn properties(&self) -> CubeProperties {
        CubeProperties {
            min: self.min.min(self.max).to_array(),
            seed: self.emitted,
            max: self.min.max(self.max).to_array(),
            linear_velocity: self.linear_velocity.to_array(),
            angular_velocity: self.angular_velocity.to_array(),
            ..Default::default()
        }
    }
}

/// Closed set of emitter kinds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FluidEmitter {
    Particle(ParticleEmitter),
    Cube(CubeEmitter),
}

impl FluidEmitter {
    pub fn emitter_type(&self) -> FluidEmitterType {
        match self {
            FluidEmitter::Particle(_) => FluidEmitterType::Particle,
            FluidEmitter::Cube(_) => FluidEmitterType::Cube,
        }
    }

    /// Particles this emitter contributes to the next batch
    pub fn particle_count(&self) -> u32 {
        match self {
            FluidEmitter::Particle(e) => e.particles.len() as u32,
            FluidEmitter::Cube(e) => e.pending,
        }
    }

    /// Size of the serialized property block; always a multiple of 4
    pub fn property_byte_count(&self) -> usize {
        match self {
            FluidEmitter::Particle(e) => std::mem::size_of_val(e.particles.as_slice()),
            FluidEmitter::Cube(_) => std::mem::size_of::<CubeProperties>(),
        }
    }

    /// Append the property block to `out`
    pub fn write_properties(&self, out: &mut Vec<u8>) {
        match self {
            FluidEmitter::Particle(e) => out.extend_from_slice(bytemuck::cast_slice(&e.particles)),
            FluidEmitter::Cube(e) => out.extend_from_slice(bytemuck::bytes_of(&e.properties())),
        }
    }

    /// Advance time-driven emission
    pub fn elapse(&mut self, dt: f32) {
        if let FluidEmitter::Cube(e) = self {
            e.elapse(dt);
        }
    }

    /// Forget particles that were handed to the solver
    pub fn clear_particles(&mut self) {
        match self {
            FluidEmitter::Particle(e) => e.particles.clear(),
            FluidEmitter::Cube(e) => {
                e.emitted = e.emitted.wrapping_add(e.pending);
                e.pending = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flux_carries_remainder() {
        let mut cube = CubeEmitter::new(Vec3::ZERO, Vec3::ONE).with_flux(30.0);
        cube.elapse(0.05);
        assert_eq!(cube.pending(), 1);
        cube.elapse(0.05);
        assert_eq!(cube.pending(), 3);
        cube.elapse(0.1);
        assert_eq!(cube.pending(), 6);
    }

    #[test]
    fn test_flux_is_clamped() {
        let mut cube = CubeEmitter::new(Vec3::ZERO, Vec3::ONE).with_flux(1.0e6);
        cube.elapse(1.0);
        assert_eq!(cube.pending(), MAX_EMITTER_PARTICLE_COUNT_PER_GROUP);

        let mut slow = CubeEmitter::new(Vec3::ZERO, Vec3::ONE).with_flux(0.0);
        slow.elapse(2.5);
        assert_eq!(slow.pending(), 2);
    }

    #[test]
    fn test_manual_cube_ignores_time() {
        let mut cube = CubeEmitter::new(Vec3::ZERO, Vec3::ONE);
        cube.elapse(10.0);
        assert_eq!(cube.pending(), 0);
        cube.add_particles(100);
        assert_eq!(cube.pending(), 100);
    }

    #[test]
    fn test_property_blocks() {
        let mut particles = ParticleEmitter::new();
        particles.add_particle(Vec3::ONE, Vec3::Z);
        particles.add_particle(Vec3::ZERO, Vec3::X);
        let particles = FluidEmitter::Particle(particles);
        assert_eq!(particles.particle_count(), 2);
        assert_eq!(particles.property_byte_count(), 48);

        let mut out = Vec::new();
        particles.write_properties(&mut out);
        let words: Vec<f32> = bytemuck::pod_collect_to_vec(&out);
        assert_eq!(words[..6], [1.0, 1.0, 1.0, 0.0, 0.0, 1.0]);

        let cube = FluidEmitter::Cube(CubeEmitter::new(Vec3::ONE, Vec3::ZERO));
        let mut out = Vec::new();
        cube.write_properties(&mut out);
        assert_eq!(out.len(), cube.property_byte_count());
        let props: CubeProperties = bytemuck::pod_read_unaligned(&out);
        assert_eq!(props.min, [0.0; 3]);
        assert_eq!(props.max, [1.0; 3]);
    }

    #[test]
    fn test_clear_advances_cube_seed() {
        let mut cube = CubeEmitter::new(Vec3::ZERO, Vec3::ONE);
        cube.add_particles(10);
        let mut emitter = FluidEmitter::Cube(cube);
        emitter.clear_particles();
        assert_eq!(emitter.particle_count(), 0);
        let FluidEmitter::Cube(cube) = &emitter else { unreachable!() };
        assert_eq!(cube.properties().seed, 10);
    }

    #[test]
    fn test_emitter_json_is_tagged() {
        let json = r#"{ "type": "Cube", "min": [0, 0, 0], "max": [1, 1, 1], "flux": 60.0 }"#;
        let emitter: FluidEmitter = serde_json::from_str(json).unwrap();
        assert_eq!(emitter.emitter_type(), FluidEmitterType::Cube);
        assert_eq!(emitter.particle_count(), 0);
    }
}
