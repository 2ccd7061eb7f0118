//! Particle-in-cell fluid coupled to the SDF scene volume
//!
//! Particles live in a fixed pool on the GPU. Every solve bins them into
//! 4³-cell blocks with a counting sort, splats mass and momentum onto the
//! cell grid, solves gravity, pressure and SDF collision per cell, and
//! gathers the grid velocity back. All stage sizes flow through indirect
//! arguments; the CPU never reads a count back.

pub mod params;
pub mod emitter;
pub mod builder;
pub mod solver;
pub mod physics;

pub use params::{AddParticlesParams, FluidDomain, PhysicsFrameParams, PhysicsSceneParams};
pub use emitter::{CubeEmitter, FluidEmitter, FluidEmitterType, ParticleEmitter};
pub use builder::{EmitterBufferBuilder, EmitterRecord};
pub use solver::{FluidSolver, SolverState};
pub use physics::PhysicsScene;

use glam::{UVec3, Vec3};

/// Upper bound of live particles
pub const MAX_PARTICLE_COUNT: u32 = 65536;
/// Particles one `add_particles` partition covers
pub const MAX_EMITTER_PARTICLE_COUNT_PER_GROUP: u32 = 1024;
/// Cells per axis of grid level 0
pub const GRID_SIZE_LEVEL0: u32 = 64;
/// Cells per axis of one block
pub const BLOCK_SIZE: u32 = 4;
/// Blocks per axis
pub const GRID_SIZE_LEVEL1: u32 = GRID_SIZE_LEVEL0 / BLOCK_SIZE;
/// Blocks in the whole grid
pub const BLOCK_COUNT_LEVEL0: u32 = GRID_SIZE_LEVEL1 * GRID_SIZE_LEVEL1 * GRID_SIZE_LEVEL1;
/// Threads of the per-particle kernels
pub const PARTICLE_GROUP_SIZE: u32 = 256;
/// Blocks scanned by one workgroup of `generate_particle_offsets`
pub const PREFIX_SUM_PARTITION_SIZE: u32 = 256;
/// Partitions of the two-level block prefix sum
pub const PREFIX_SUM_PARTITION_COUNT: u32 = BLOCK_COUNT_LEVEL0 / PREFIX_SUM_PARTITION_SIZE;
/// Scale of the fixed-point grid accumulators
pub const FIXED_POINT_SCALE: f32 = 4096.0;

/// Slot marker of a removed particle
pub const DEAD_PARTICLE: u32 = u32::MAX;
/// Bits of a sort key holding the rank inside its block
pub const RANK_BITS: u32 = 20;

/// 32-bit words per level-0 cell: momentum, mass, velocity, density
pub const GRID0_CELL_WORDS: u64 = 8;
/// 32-bit words per level-1 block: particle offset, count, mass, flags
pub const GRID1_BLOCK_WORDS: u64 = 4;
/// Level-1 flag: the block held particles in the last step
pub const BLOCK_OCCUPIED: u32 = 1;
/// Level-1 flag: some cell of the block lies within one cell of the scene surface
pub const BLOCK_NEAR_SURFACE: u32 = 2;

const _: () = assert!(BLOCK_COUNT_LEVEL0 <= (1 << (32 - RANK_BITS)));
const _: () = assert!(MAX_PARTICLE_COUNT <= (1 << RANK_BITS));
const _: () = assert!(BLOCK_COUNT_LEVEL0 % PREFIX_SUM_PARTITION_SIZE == 0);
const _: () = assert!(MAX_EMITTER_PARTICLE_COUNT_PER_GROUP % PARTICLE_GROUP_SIZE == 0);

/// Sort key of the `rank`-th particle binned into `block`
pub fn pack_rank(block: u32, rank: u32) -> u32 {
    debug_assert!(rank < (1 << RANK_BITS));
    (block << RANK_BITS) | rank
}

pub fn unpack_rank(key: u32) -> (u32, u32) {
    (key >> RANK_BITS, key & ((1 << RANK_BITS) - 1))
}

/// Linear index of a block coordinate
pub fn block_index(block: UVec3) -> u32 {
    (block.z * GRID_SIZE_LEVEL1 + block.y) * GRID_SIZE_LEVEL1 + block.x
}

/// Block containing a grid-space position, clamped into the grid
pub fn block_of(grid_pos: Vec3) -> u32 {
    let top = (GRID_SIZE_LEVEL0 - 1) as f32;
    let cell = grid_pos.clamp(Vec3::ZERO, Vec3::splat(top)).as_uvec3();
    block_index(cell / BLOCK_SIZE)
}

pub fn to_fixed(value: f32) -> i32 {
    (value * FIXED_POINT_SCALE).round() as i32
}

pub fn from_fixed(value: i32) -> f32 {
    value as f32 / FIXED_POINT_SCALE
}
