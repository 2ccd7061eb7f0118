//! GPU particle-in-cell solver
//!
//! `solve` records one compute pass:
//!
//! 1. clear the level-0/level-1 cells of blocks touched last frame
//!    (indirect, sized by last frame's active block count); the block
//!    histogram is frame scratch and cleared in full
//! 2. `generate_indirect_args0` admits the particles appended since the last
//!    solve and sizes the per-particle dispatches
//! 3. counting sort: histogram, partition scan, block offsets, scatter
//! 4. P2G, per-cell solve (gravity, pressure, walls, SDF collision), G2P
//!
//! Bind groups: 0 parameters, 1 particles, 2 grid, 3 either the control
//! group (indirect args as storage, emitter data) or the scene volume. The
//! args buffer is never bound as storage in a dispatch that reads it
//! indirectly.

use glam::UVec3;

use crate::core::config::FluidConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::fluid::builder::{EmitterBufferBuilder, EmitterRecord};
use crate::fluid::params::{AddParticlesParams, FluidDomain, PhysicsFrameParams, PhysicsSceneParams};
use crate::fluid::{
    BLOCK_COUNT_LEVEL0, DEAD_PARTICLE, GRID0_CELL_WORDS, GRID1_BLOCK_WORDS, GRID_SIZE_LEVEL0,
    MAX_EMITTER_PARTICLE_COUNT_PER_GROUP, MAX_PARTICLE_COUNT, PARTICLE_GROUP_SIZE, PREFIX_SUM_PARTITION_COUNT,
};
use crate::render::arena::{uniform_layout_entry, ConstantBufferArena, Segment};
use crate::render::readback::read_words;
use crate::render::resources::{
    create_compute_pipeline, create_indirect_buffer, storage_layout_entry, volume_read_layout_entry, ReservedBuffer,
    VolumeTexture,
};
use crate::render::shaders::ShaderKind;
use crate::sdf::generation::LoadedScene;

/// Words of the indirect argument block
pub const ARGS_WORDS: u64 = 13;
/// Byte offset of the per-particle dispatch (admitted, unsorted particles)
pub const PARTICLE_ARGS_OFFSET: u64 = 0;
/// Byte offset of the sorted-particle dispatch
pub const SORTED_ARGS_OFFSET: u64 = 12;
/// Byte offset of the active-block dispatch
pub const BLOCK_ARGS_OFFSET: u64 = 24;
/// Byte offset of the debug draw arguments (vertex count, instance count, first vertex, first instance)
pub const DRAW_ARGS_OFFSET: u64 = 36;

const ARGS_SEED: [u32; ARGS_WORDS as usize] = [0, 1, 1, 0, 1, 1, 0, 1, 1, 6, 0, 0, 0];

/// Header words of the positions buffer: count, appended, sorted, pad
const POSITIONS_HEADER_WORDS: u64 = 4;
/// Words per stored particle
const PARTICLE_WORDS: u64 = 4;
/// Words of one property slot: (velocity, mass), (density, age, 0, 0)
const PROPERTY_WORDS: u64 = 8;
/// Block table header: active count, sorted total, pad
const BLOCK_TABLE_HEADER_WORDS: u64 = 4;
/// Counts, touched flags, offsets, active list, then the partition sums and prefix
const BLOCK_TABLE_WORDS: u64 =
    BLOCK_TABLE_HEADER_WORDS + 4 * BLOCK_COUNT_LEVEL0 as u64 + 2 * PREFIX_SUM_PARTITION_COUNT as u64;
/// Bytes of the per-frame scratch (counts and touched flags) after the header
const BLOCK_SCRATCH_BYTES: u64 = 2 * BLOCK_COUNT_LEVEL0 as u64 * 4;

/// Lifecycle of the solver's GPU state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverState {
    Unloaded,
    Loaded,
}

/// Pool and grid buffers, alive while loaded
struct SolverBuffers {
    positions: wgpu::Buffer,
    properties: wgpu::Buffer,
    pool: wgpu::Buffer,
    ranks: wgpu::Buffer,
    grid0: wgpu::Buffer,
    grid1: wgpu::Buffer,
    blocks: wgpu::Buffer,
    args: wgpu::Buffer,
}

struct SolverKernels {
    init_particle_pool: wgpu::ComputePipeline,
    add_particles: wgpu::ComputePipeline,
    clear_grid_level0: wgpu::ComputePipeline,
    clear_grid_level1: wgpu::ComputePipeline,
    generate_indirect_args0: wgpu::ComputePipeline,
    clear_partition_sums: wgpu::ComputePipeline,
    generate_particle_histogram: wgpu::ComputePipeline,
    generate_indirect_args1: wgpu::ComputePipeline,
    generate_particle_offsets: wgpu::ComputePipeline,
    sort_particles: wgpu::ComputePipeline,
    generate_indirect_args2: wgpu::ComputePipeline,
    particle_to_grid0: wgpu::ComputePipeline,
    particle_to_grid1: wgpu::ComputePipeline,
    solve_grid_level0: wgpu::ComputePipeline,
    solve_grid_level1: wgpu::ComputePipeline,
    grid_to_particle: wgpu::ComputePipeline,
}

/// Particle pool counters read back for inspection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolCounters {
    /// Live particles after the last solve, dead ones included until the next sort
    pub count: u32,
    /// Particles appended since the last solve
    pub appended: u32,
    pub free: u32,
}

/// One particle read back for inspection
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleSnapshot {
    pub position: glam::Vec3,
    pub velocity: glam::Vec3,
    pub slot: u32,
}

pub struct FluidSolver {
    kernels: SolverKernels,

    params_layout: wgpu::BindGroupLayout,
    particles_layout: wgpu::BindGroupLayout,
    grid_layout: wgpu::BindGroupLayout,
    control_layout: wgpu::BindGroupLayout,
    volume_layout: wgpu::BindGroupLayout,

    scene_params: Segment<PhysicsSceneParams>,
    frame_params: Segment<PhysicsFrameParams>,
    add_params: Segment<AddParticlesParams>,

    state: SolverState,
    domain: Option<FluidDomain>,
    particle_mass: f32,
    previous_dt: f32,
    batch: u32,

    buffers: Option<SolverBuffers>,
    emitter_records: ReservedBuffer,
    emitter_partitions: ReservedBuffer,
    emitter_properties: ReservedBuffer,
    /// Bound when there is no SDF scene; reads as "empty"
    empty_volume: VolumeTexture,
}

impl FluidSolver {
    /// Build the sixteen kernels and register the parameter blocks
    ///
    /// The arena must be finalized before `load`.
    pub fn new(device: &wgpu::Device, arena: &mut ConstantBufferArena) -> Result<Self> {
        let shader = ShaderKind::FluidSolver.create_module(device)?;

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fluid_params_layout"),
            entries: &[
                uniform_layout_entry(0, wgpu::ShaderStages::COMPUTE),
                uniform_layout_entry(1, wgpu::ShaderStages::COMPUTE),
                uniform_layout_entry(2, wgpu::ShaderStages::COMPUTE),
            ],
        });
        let particles_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fluid_particles_layout"),
            entries: &(0..4).map(|b| storage_layout_entry(b, false)).collect::<Vec<_>>(),
        });
        let grid_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fluid_grid_layout"),
            entries: &(0..3).map(|b| storage_layout_entry(b, false)).collect::<Vec<_>>(),
        });
        let control_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fluid_control_layout"),
            entries: &[
                storage_layout_entry(0, false),
                storage_layout_entry(1, true),
                storage_layout_entry(2, true),
                storage_layout_entry(3, true),
            ],
        });
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fluid_volume_layout"),
            entries: &[volume_read_layout_entry(
                4,
                wgpu::TextureSampleType::Float { filterable: false },
                wgpu::ShaderStages::COMPUTE,
            )],
        });

        let pipeline_layout = |label: &str, last: &wgpu::BindGroupLayout| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&params_layout, &particles_layout, &grid_layout, last],
                immediate_size: 0,
            })
        };
        let control = pipeline_layout("fluid_control_pipeline_layout", &control_layout);
        let volume = pipeline_layout("fluid_volume_pipeline_layout", &volume_layout);
        let kernel = |layout: &wgpu::PipelineLayout, name: &str| create_compute_pipeline(device, name, layout, &shader, name);

        let kernels = SolverKernels {
            init_particle_pool: kernel(&control, "init_particle_pool"),
            add_particles: kernel(&control, "add_particles"),
            clear_grid_level0: kernel(&volume, "clear_grid_level0"),
            clear_grid_level1: kernel(&volume, "clear_grid_level1"),
            generate_indirect_args0: kernel(&control, "generate_indirect_args0"),
            clear_partition_sums: kernel(&control, "clear_partition_sums"),
            generate_particle_histogram: kernel(&volume, "generate_particle_histogram"),
            generate_indirect_args1: kernel(&control, "generate_indirect_args1"),
            generate_particle_offsets: kernel(&control, "generate_particle_offsets"),
            sort_particles: kernel(&volume, "sort_particles"),
            generate_indirect_args2: kernel(&control, "generate_indirect_args2"),
            particle_to_grid0: kernel(&volume, "particle_to_grid0"),
            particle_to_grid1: kernel(&volume, "particle_to_grid1"),
            solve_grid_level0: kernel(&volume, "solve_grid_level0"),
            solve_grid_level1: kernel(&volume, "solve_grid_level1"),
            grid_to_particle: kernel(&volume, "grid_to_particle"),
        };

        let emitter_usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        Ok(Self {
            kernels,
            params_layout,
            particles_layout,
            grid_layout,
            control_layout,
            volume_layout,
            scene_params: arena.register(),
            frame_params: arena.register(),
            add_params: arena.register(),
            state: SolverState::Unloaded,
            domain: None,
            particle_mass: 1.0,
            previous_dt: 0.0,
            batch: 0,
            buffers: None,
            emitter_records: ReservedBuffer::new("fluid_emitter_records", emitter_usage),
            emitter_partitions: ReservedBuffer::new("fluid_emitter_partitions", emitter_usage),
            emitter_properties: ReservedBuffer::new("fluid_emitter_properties", emitter_usage),
            empty_volume: VolumeTexture::new(
                device,
                "fluid_empty_volume",
                wgpu::TextureFormat::R32Float,
                UVec3::ONE,
                1,
            ),
        })
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn domain(&self) -> Option<&FluidDomain> {
        self.domain.as_ref()
    }

    /// Sorted particle positions for the debug draw; `None` while unloaded
    pub fn positions_buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffers.as_ref().map(|b| &b.positions)
    }

    /// Indirect argument block; the draw arguments sit at [`DRAW_ARGS_OFFSET`]
    pub fn args_buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffers.as_ref().map(|b| &b.args)
    }

    /// Allocate the pool and grids for `domain` and reset the particle pool
    ///
    /// `sdf` describes the scene volume later passed to `solve`. Loading
    /// over a loaded solver panics.
    pub fn load(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        domain: &FluidDomain,
        fluid: &FluidConfig,
        sdf: Option<&LoadedScene>,
    ) -> Result<()> {
        assert!(
            self.state == SolverState::Unloaded,
            "fluid solver is already loaded; unload it first"
        );
        if domain.grid_spacing <= 0.0 {
            return Err(Error::Scene(format!(
                "fluid grid spacing must be positive, got {}",
                domain.grid_spacing
            )));
        }

        self.buffers = Some(allocate_buffers(device, queue));
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: self.empty_volume.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::bytes_of(&1.0f32),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        // The control group must always bind real buffers
        for (buffer, stride) in [
            (&mut self.emitter_records, std::mem::size_of::<EmitterRecord>() as u64),
            (&mut self.emitter_partitions, 4),
            (&mut self.emitter_properties, 4),
        ] {
            buffer.reserve(device, 2, stride);
        }

        arena.update(queue, self.scene_params, &PhysicsSceneParams::new(domain, fluid, sdf));
        arena.update(queue, self.frame_params, &PhysicsFrameParams::new(0.0, 0.0, domain.gravity));
        arena.update(queue, self.add_params, &AddParticlesParams::default());

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fluid_load_encoder"),
        });
        {
            let groups = self.bind_groups(device, arena, None)?;
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fluid_init"),
                timestamp_writes: None,
            });
            groups.set_common(&mut pass);
            pass.set_bind_group(3, &groups.control, &[]);
            pass.set_pipeline(&self.kernels.init_particle_pool);
            pass.dispatch_workgroups(MAX_PARTICLE_COUNT.div_ceil(PARTICLE_GROUP_SIZE), 1, 1);
            pass.set_pipeline(&self.kernels.clear_partition_sums);
            pass.dispatch_workgroups(1, 1, 1);
        }
        queue.submit(Some(encoder.finish()));

        self.domain = Some(domain.clone());
        self.particle_mass = fluid.particle_mass;
        self.previous_dt = 0.0;
        self.batch = 0;
        self.state = SolverState::Loaded;
        log::info!(
            "fluid solver loaded: grid {}^3 at {} spacing {}, capacity {} particles, SDF {}",
            GRID_SIZE_LEVEL0,
            domain.origin,
            domain.grid_spacing,
            MAX_PARTICLE_COUNT,
            if sdf.is_some() { "bound" } else { "none" }
        );
        Ok(())
    }

    /// Release every buffer; a second unload only warns
    pub fn unload(&mut self) {
        if self.state == SolverState::Unloaded {
            log::warn!("fluid solver is double unloaded");
            return;
        }
        self.buffers = None;
        self.emitter_records.release();
        self.emitter_partitions.release();
        self.emitter_properties.release();
        self.domain = None;
        self.state = SolverState::Unloaded;
        log::info!("fluid solver unloaded");
    }

    /// Append the builder's particles to the pool
    ///
    /// Returns false, with no GPU writes, when the builder is unsubmitted or
    /// empty or the solver is not loaded. Particles past the pool's capacity
    /// are dropped on the GPU; the next `solve` admits the rest.
    pub fn add_particles(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        builder: &EmitterBufferBuilder,
    ) -> Result<bool> {
        if !builder.is_ready() || self.state != SolverState::Loaded {
            return Ok(false);
        }

        let records = builder.records();
        let partitions = builder.partitions();
        let properties = builder.properties();
        self.emitter_records
            .reserve(device, records.len() as u64, std::mem::size_of::<EmitterRecord>() as u64);
        self.emitter_partitions.reserve(device, partitions.len() as u64, 4);
        self.emitter_properties.reserve(device, (properties.len() as u64 / 4).max(1), 4);

        let (Some(record_buffer), Some(partition_buffer), Some(property_buffer)) = (
            self.emitter_records.buffer(),
            self.emitter_partitions.buffer(),
            self.emitter_properties.buffer(),
        ) else {
            return Err(Error::Gpu("emitter buffers missing".into()));
        };
        queue.write_buffer(record_buffer, 0, bytemuck::cast_slice(records));
        queue.write_buffer(partition_buffer, 0, bytemuck::cast_slice(partitions));
        if !properties.is_empty() {
            queue.write_buffer(property_buffer, 0, properties);
        }

        let params = AddParticlesParams {
            record_count: records.len() as u32,
            partition_count: builder.partition_count(),
            mass: self.particle_mass,
            random_seed: self.batch.wrapping_mul(0x9e37_79b9),
        };
        arena.update(queue, self.add_params, &params);
        self.batch = self.batch.wrapping_add(1);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fluid_add_particles_encoder"),
        });
        {
            let groups = self.bind_groups(device, arena, None)?;
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fluid_add_particles"),
                timestamp_writes: None,
            });
            groups.set_common(&mut pass);
            pass.set_bind_group(3, &groups.control, &[]);
            pass.set_pipeline(&self.kernels.add_particles);
            pass.dispatch_workgroups(
                params.partition_count * (MAX_EMITTER_PARTICLE_COUNT_PER_GROUP / PARTICLE_GROUP_SIZE),
                1,
                1,
            );
        }
        queue.submit(Some(encoder.finish()));
        log::debug!(
            "fluid emitted {} particles in {} partitions",
            builder.total_particle_count(),
            params.partition_count
        );
        Ok(true)
    }

    /// Advance the fluid by `dt`
    ///
    /// `scene_volume` is the SDF scene volume described at `load`; `None`
    /// disables collision. A zero `dt` re-sorts without moving anything.
    pub fn solve(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        dt: f32,
        scene_volume: Option<&VolumeTexture>,
    ) -> Result<()> {
        let (Some(domain), Some(buffers)) = (&self.domain, &self.buffers) else {
            log::debug!("fluid solve skipped: solver not loaded");
            return Ok(());
        };

        let dt = dt.max(0.0);
        arena.update(
            queue,
            self.frame_params,
            &PhysicsFrameParams::new(dt, self.previous_dt, domain.gravity),
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fluid_solve_encoder"),
        });
        encoder.clear_buffer(&buffers.blocks, BLOCK_TABLE_HEADER_WORDS * 4, Some(BLOCK_SCRATCH_BYTES));
        {
            let groups = self.bind_groups(device, arena, scene_volume)?;
            let args = &buffers.args;
            let k = &self.kernels;
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fluid_solve"),
                timestamp_writes: None,
            });
            groups.set_common(&mut pass);

            pass.set_bind_group(3, &groups.volume, &[]);
            pass.set_pipeline(&k.clear_grid_level0);
            pass.dispatch_workgroups_indirect(args, BLOCK_ARGS_OFFSET);
            pass.set_pipeline(&k.clear_grid_level1);
            pass.dispatch_workgroups_indirect(args, BLOCK_ARGS_OFFSET);

            pass.set_bind_group(3, &groups.control, &[]);
            pass.set_pipeline(&k.generate_indirect_args0);
            pass.dispatch_workgroups(1, 1, 1);
            pass.set_pipeline(&k.clear_partition_sums);
            pass.dispatch_workgroups(1, 1, 1);

            pass.set_bind_group(3, &groups.volume, &[]);
            pass.set_pipeline(&k.generate_particle_histogram);
            pass.dispatch_workgroups_indirect(args, PARTICLE_ARGS_OFFSET);

            pass.set_bind_group(3, &groups.control, &[]);
            pass.set_pipeline(&k.generate_indirect_args1);
            pass.dispatch_workgroups(1, 1, 1);
            pass.set_pipeline(&k.generate_particle_offsets);
            pass.dispatch_workgroups(PREFIX_SUM_PARTITION_COUNT, 1, 1);

            pass.set_bind_group(3, &groups.volume, &[]);
            pass.set_pipeline(&k.sort_particles);
            pass.dispatch_workgroups_indirect(args, PARTICLE_ARGS_OFFSET);

            pass.set_bind_group(3, &groups.control, &[]);
            pass.set_pipeline(&k.generate_indirect_args2);
            pass.dispatch_workgroups(1, 1, 1);

            pass.set_bind_group(3, &groups.volume, &[]);
            for kernel in [
                &k.particle_to_grid0,
                &k.particle_to_grid1,
                &k.solve_grid_level0,
                &k.solve_grid_level1,
            ] {
                pass.set_pipeline(kernel);
                pass.dispatch_workgroups_indirect(args, BLOCK_ARGS_OFFSET);
            }
            pass.set_pipeline(&k.grid_to_particle);
            pass.dispatch_workgroups_indirect(args, SORTED_ARGS_OFFSET);
        }
        queue.submit(Some(encoder.finish()));

        self.previous_dt = dt;
        Ok(())
    }

    fn bind_groups(
        &self,
        device: &wgpu::Device,
        arena: &ConstantBufferArena,
        scene_volume: Option<&VolumeTexture>,
    ) -> Result<SolverBindGroups> {
        let Some(b) = &self.buffers else {
            return Err(Error::Gpu("fluid buffers missing".into()));
        };
        let (Some(records), Some(partitions), Some(properties)) = (
            self.emitter_records.buffer(),
            self.emitter_partitions.buffer(),
            self.emitter_properties.buffer(),
        ) else {
            return Err(Error::Gpu("emitter buffers missing".into()));
        };

        let params = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fluid_params_bind_group"),
            layout: &self.params_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: arena.binding(self.scene_params) },
                wgpu::BindGroupEntry { binding: 1, resource: arena.binding(self.frame_params) },
                wgpu::BindGroupEntry { binding: 2, resource: arena.binding(self.add_params) },
            ],
        });
        let particles = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fluid_particles_bind_group"),
            layout: &self.particles_layout,
            entries: &buffer_entries(&[&b.positions, &b.properties, &b.pool, &b.ranks]),
        });
        let grid = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fluid_grid_bind_group"),
            layout: &self.grid_layout,
            entries: &buffer_entries(&[&b.grid0, &b.grid1, &b.blocks]),
        });
        let control = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fluid_control_bind_group"),
            layout: &self.control_layout,
            entries: &buffer_entries(&[&b.args, records, partitions, properties]),
        });
        let volume = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fluid_volume_bind_group"),
            layout: &self.volume_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 4,
                resource: wgpu::BindingResource::TextureView(scene_volume.unwrap_or(&self.empty_volume).mip_view(0)),
            }],
        });

        Ok(SolverBindGroups {
            params,
            particles,
            grid,
            control,
            volume,
        })
    }

    /// Pool counters; stalls the device
    pub fn read_counters(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<PoolCounters> {
        let b = self.loaded_buffers()?;
        let header = read_words(device, queue, &b.positions, 0, POSITIONS_HEADER_WORDS)?;
        let free = read_words(device, queue, &b.pool, 0, 1)?;
        Ok(PoolCounters {
            count: header[0],
            appended: header[1],
            free: free[0],
        })
    }

    /// Particles per block from the last solve; stalls the device
    pub fn read_block_counts(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<u32>> {
        let b = self.loaded_buffers()?;
        read_words(device, queue, &b.blocks, BLOCK_TABLE_HEADER_WORDS, BLOCK_COUNT_LEVEL0 as u64)
    }

    /// Level-1 grid, `GRID1_BLOCK_WORDS` words per block; stalls the device
    pub fn read_block_grid(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<u32>> {
        let b = self.loaded_buffers()?;
        read_words(device, queue, &b.grid1, 0, BLOCK_COUNT_LEVEL0 as u64 * GRID1_BLOCK_WORDS)
    }

    /// Live particles with their velocities; stalls the device
    pub fn read_particles(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<ParticleSnapshot>> {
        let b = self.loaded_buffers()?;
        let count = read_words(device, queue, &b.positions, 0, 1)?[0] as u64;
        if count == 0 {
            return Ok(Vec::new());
        }
        let raw = read_words(device, queue, &b.positions, POSITIONS_HEADER_WORDS, count * PARTICLE_WORDS)?;
        let props: Vec<f32> = bytemuck::pod_collect_to_vec(&read_words(
            device,
            queue,
            &b.properties,
            0,
            MAX_PARTICLE_COUNT as u64 * PROPERTY_WORDS,
        )?);

        Ok(raw
            .chunks_exact(PARTICLE_WORDS as usize)
            .filter(|p| p[3] != DEAD_PARTICLE)
            .map(|p| {
                let slot = p[3];
                let v = &props[(slot as u64 * PROPERTY_WORDS) as usize..];
                ParticleSnapshot {
                    position: glam::Vec3::new(f32::from_bits(p[0]), f32::from_bits(p[1]), f32::from_bits(p[2])),
                    velocity: glam::Vec3::new(v[0], v[1], v[2]),
                    slot,
                }
            })
            .collect())
    }

    /// Indirect argument block; stalls the device
    pub fn read_args(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Vec<u32>> {
        let b = self.loaded_buffers()?;
        read_words(device, queue, &b.args, 0, ARGS_WORDS)
    }

    fn loaded_buffers(&self) -> Result<&SolverBuffers> {
        self.buffers
            .as_ref()
            .ok_or_else(|| Error::Gpu("fluid solver is not loaded".into()))
    }
}

struct SolverBindGroups {
    params: wgpu::BindGroup,
    particles: wgpu::BindGroup,
    grid: wgpu::BindGroup,
    control: wgpu::BindGroup,
    volume: wgpu::BindGroup,
}

impl SolverBindGroups {
    fn set_common(&self, pass: &mut wgpu::ComputePass<'_>) {
        pass.set_bind_group(0, &self.params, &[]);
        pass.set_bind_group(1, &self.particles, &[]);
        pass.set_bind_group(2, &self.grid, &[]);
    }
}

fn buffer_entries<'a>(buffers: &[&'a wgpu::Buffer]) -> Vec<wgpu::BindGroupEntry<'a>> {
    buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect()
}

fn storage_buffer(device: &wgpu::Device, label: &str, words: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: words * 4,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn allocate_buffers(device: &wgpu::Device, queue: &wgpu::Queue) -> SolverBuffers {
    let max = MAX_PARTICLE_COUNT as u64;
    let cells = (GRID_SIZE_LEVEL0 as u64).pow(3);
    SolverBuffers {
        positions: storage_buffer(device, "fluid_positions", POSITIONS_HEADER_WORDS + 2 * max * PARTICLE_WORDS),
        properties: storage_buffer(device, "fluid_properties", max * PROPERTY_WORDS),
        pool: storage_buffer(device, "fluid_pool", 1 + max),
        ranks: storage_buffer(device, "fluid_ranks", max),
        grid0: storage_buffer(device, "fluid_grid_level0", cells * GRID0_CELL_WORDS),
        grid1: storage_buffer(device, "fluid_grid_level1", BLOCK_COUNT_LEVEL0 as u64 * GRID1_BLOCK_WORDS),
        blocks: storage_buffer(device, "fluid_block_table", BLOCK_TABLE_WORDS),
        args: create_indirect_buffer(device, queue, "fluid_indirect_args", ARGS_WORDS, &ARGS_SEED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fluid::emitter::{CubeEmitter, FluidEmitter, ParticleEmitter};
    use crate::fluid::{BLOCK_NEAR_SURFACE, BLOCK_OCCUPIED};
    use crate::render::context::GpuContext;
    use glam::Vec3;

    fn setup() -> Option<(GpuContext, ConstantBufferArena, FluidSolver)> {
        let gpu = crate::render::context::test_context()?;
        let mut arena = ConstantBufferArena::new(&gpu.device);
        let solver = FluidSolver::new(&gpu.device, &mut arena).unwrap();
        arena.finalize(&gpu.device);
        Some((gpu, arena, solver))
    }

    fn load(gpu: &GpuContext, arena: &ConstantBufferArena, solver: &mut FluidSolver) {
        let domain = FluidDomain::centered(Vec3::ZERO, 0.25);
        solver
            .load(&gpu.device, &gpu.queue, arena, &domain, &FluidConfig::default(), None)
            .unwrap();
    }

    fn cube_batch(min: Vec3, max: Vec3, count: u32) -> EmitterBufferBuilder {
        let mut cube = CubeEmitter::new(min, max);
        cube.add_particles(count);
        let emitters = [FluidEmitter::Cube(cube)];
        let mut builder = EmitterBufferBuilder::new();
        builder.reserve(&emitters);
        builder.allocate();
        builder.add_emitters(&emitters);
        builder.submit();
        builder
    }

    #[test]
    fn test_args_seed_layout() {
        assert_eq!(ARGS_SEED.len() as u64 * 4, DRAW_ARGS_OFFSET + 16);
        assert_eq!(ARGS_SEED[(DRAW_ARGS_OFFSET / 4) as usize], 6);
        assert_eq!(ARGS_SEED[(BLOCK_ARGS_OFFSET / 4) as usize], 0);
    }

    #[test]
    fn test_load_resets_pool() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);
        assert_eq!(solver.state(), SolverState::Loaded);

        let counters = solver.read_counters(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(counters, PoolCounters { count: 0, appended: 0, free: MAX_PARTICLE_COUNT });

        solver.unload();
        assert_eq!(solver.state(), SolverState::Unloaded);
        assert!(solver.positions_buffer().is_none());
        // Second unload only warns
        solver.unload();
    }

    #[test]
    fn test_emitted_particles_are_admitted_by_solve() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);

        let batch = cube_batch(Vec3::ZERO, Vec3::ONE, 100);
        assert!(solver.add_particles(&gpu.device, &gpu.queue, &arena, &batch).unwrap());
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, None).unwrap();
        let counters = solver.read_counters(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(counters.count, 100);
        assert_eq!(counters.free, MAX_PARTICLE_COUNT - 100);

        let batch = cube_batch(Vec3::ZERO, Vec3::ONE, 50);
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &batch).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, None).unwrap();
        assert_eq!(solver.read_counters(&gpu.device, &gpu.queue).unwrap().count, 150);

        let args = solver.read_args(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(args[0], 1);
        assert_eq!(args[(DRAW_ARGS_OFFSET / 4) as usize..], [6, 150, 0, 0]);
    }

    #[test]
    fn test_emission_past_capacity_is_truncated() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);

        let spread = Vec3::splat(6.0);
        let batch = cube_batch(-spread, spread, MAX_PARTICLE_COUNT - 10);
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &batch).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, None).unwrap();
        assert_eq!(
            solver.read_counters(&gpu.device, &gpu.queue).unwrap().count,
            MAX_PARTICLE_COUNT - 10
        );

        let batch = cube_batch(-spread, spread, 100);
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &batch).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, None).unwrap();
        let counters = solver.read_counters(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(counters.count, MAX_PARTICLE_COUNT);
        assert_eq!(counters.free, 0);
        assert_eq!(counters.appended, 0);
    }

    #[test]
    fn test_zero_dt_resolve_is_stable() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);

        let batch = cube_batch(Vec3::splat(-2.0), Vec3::splat(2.0), 3000);
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &batch).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, None).unwrap();
        let first_count = solver.read_counters(&gpu.device, &gpu.queue).unwrap().count;
        let first_blocks = solver.read_block_counts(&gpu.device, &gpu.queue).unwrap();

        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, None).unwrap();
        let second_count = solver.read_counters(&gpu.device, &gpu.queue).unwrap().count;
        let second_blocks = solver.read_block_counts(&gpu.device, &gpu.queue).unwrap();

        assert_eq!(first_count, 3000);
        assert_eq!(second_count, first_count);
        assert_eq!(second_blocks, first_blocks);
        assert_eq!(second_blocks.iter().sum::<u32>(), 3000);
    }

    #[test]
    fn test_unready_builder_writes_nothing() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);

        let mut unsubmitted = EmitterBufferBuilder::new();
        unsubmitted.add_emitter(&FluidEmitter::Cube({
            let mut cube = CubeEmitter::new(Vec3::ZERO, Vec3::ONE);
            cube.add_particles(10);
            cube
        }));
        assert!(!solver.add_particles(&gpu.device, &gpu.queue, &arena, &unsubmitted).unwrap());

        let empty = cube_batch(Vec3::ZERO, Vec3::ONE, 0);
        assert!(!solver.add_particles(&gpu.device, &gpu.queue, &arena, &empty).unwrap());

        let counters = solver.read_counters(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(counters, PoolCounters { count: 0, appended: 0, free: MAX_PARTICLE_COUNT });
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.016, None).unwrap();
        assert_eq!(solver.read_counters(&gpu.device, &gpu.queue).unwrap().count, 0);
    }

    #[test]
    fn test_cube_particles_fall_under_gravity() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);
        let domain = solver.domain().unwrap().clone();

        let cube = CubeEmitter::from_offset_size(Vec3::ZERO, Vec3::ONE);
        let mut emitter = FluidEmitter::Cube(cube);
        if let FluidEmitter::Cube(cube) = &mut emitter {
            cube.add_particles(100);
        }
        let mut builder = EmitterBufferBuilder::new();
        builder.add_emitter(&emitter);
        builder.submit();
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &builder).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.016, None).unwrap();

        let particles = solver.read_particles(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(particles.len(), 100);
        for p in &particles {
            assert!(p.position.is_finite() && p.velocity.is_finite(), "{p:?}");
            assert!(p.velocity.z < 0.0, "particle not falling: {p:?}");
            assert!(domain.contains(p.position), "particle escaped: {p:?}");
        }
    }

    #[test]
    fn test_explicit_particles_keep_their_velocity_direction() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);

        let mut particles = ParticleEmitter::new();
        particles.add_particle(Vec3::new(1.0, 1.0, 1.0), Vec3::new(2.0, 0.0, 0.0));
        let mut builder = EmitterBufferBuilder::new();
        builder.add_emitter(&FluidEmitter::Particle(particles));
        builder.submit();
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &builder).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.01, None).unwrap();

        let snapshot = solver.read_particles(&gpu.device, &gpu.queue).unwrap();
        assert_eq!(snapshot.len(), 1);
        let p = snapshot[0];
        assert!(p.position.x > 1.0, "{p:?}");
        assert!(p.velocity.x > 1.5 && p.velocity.z < 0.0, "{p:?}");
    }

    #[test]
    fn test_kill_plane_returns_slots() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        let mut domain = FluidDomain::centered(Vec3::ZERO, 0.25);
        domain.kill_z = Some(0.0);
        solver
            .load(&gpu.device, &gpu.queue, &arena, &domain, &FluidConfig::default(), None)
            .unwrap();

        let batch = cube_batch(Vec3::new(-1.0, -1.0, -2.0), Vec3::new(1.0, 1.0, -1.0), 64);
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &batch).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.016, None).unwrap();
        assert_eq!(solver.read_counters(&gpu.device, &gpu.queue).unwrap().free, MAX_PARTICLE_COUNT);
        assert!(solver.read_particles(&gpu.device, &gpu.queue).unwrap().is_empty());

        // Dead particles are dropped by the next sort
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.016, None).unwrap();
        assert_eq!(solver.read_counters(&gpu.device, &gpu.queue).unwrap().count, 0);
    }

    /// Grid1 words of the block holding world point `p`
    fn block_words(grid: &[u32], domain: &FluidDomain, p: Vec3) -> [u32; 4] {
        let cell = ((p - domain.origin) / domain.grid_spacing).floor().as_uvec3();
        let b = cell / crate::fluid::BLOCK_SIZE;
        let n = crate::fluid::GRID_SIZE_LEVEL1;
        let index = (b.x + b.y * n + b.z * n * n) as usize * GRID1_BLOCK_WORDS as usize;
        [grid[index], grid[index + 1], grid[index + 2], grid[index + 3]]
    }

    #[test]
    fn test_block_grid_without_scene() {
        let Some((gpu, arena, mut solver)) = setup() else { return };
        load(&gpu, &arena, &mut solver);

        let batch = cube_batch(Vec3::splat(-1.0), Vec3::splat(1.0), 500);
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &batch).unwrap();
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, None).unwrap();

        let counts = solver.read_block_counts(&gpu.device, &gpu.queue).unwrap();
        let grid = solver.read_block_grid(&gpu.device, &gpu.queue).unwrap();
        let mut occupied = 0;
        for (block, words) in grid.chunks_exact(GRID1_BLOCK_WORDS as usize).enumerate() {
            if counts[block] == 0 {
                continue;
            }
            occupied += 1;
            assert_eq!(words[1], counts[block], "block {block}");
            assert!(words[2] > 0, "block {block} has no mass");
            assert_eq!(words[3], BLOCK_OCCUPIED, "block {block}");
        }
        assert!(occupied > 0);
    }

    #[test]
    fn test_blocks_near_scene_surface_are_flagged() {
        use crate::sdf::generation::SdfGenerationPipeline;
        use crate::sdf::{Brush, SdfScene};

        let Some(gpu) = crate::render::context::test_context() else { return };
        let mut arena = ConstantBufferArena::new(&gpu.device);
        let mut sdf = SdfGenerationPipeline::new(&gpu.device, &mut arena).unwrap();
        let mut solver = FluidSolver::new(&gpu.device, &mut arena).unwrap();
        arena.finalize(&gpu.device);

        let scene = SdfScene::new(UVec3::splat(64), Vec3::splat(-8.0), 0.25)
            .with_brush(Brush::sphere(Vec3::ZERO, 2.0, 0));
        sdf.load_scene(&gpu.device, &gpu.queue, &arena, &scene).unwrap();
        let domain = FluidDomain::centered(Vec3::ZERO, 0.25);
        solver
            .load(&gpu.device, &gpu.queue, &arena, &domain, &FluidConfig::default(), sdf.scene_info())
            .unwrap();

        let near = Vec3::new(2.0, 0.0, 0.0);
        let far = Vec3::new(-5.75, -5.75, 4.25);
        let mut shell = CubeEmitter::new(near - 0.1, near + 0.1);
        shell.add_particles(400);
        let mut remote = CubeEmitter::new(far - 0.2, far + 0.2);
        remote.add_particles(100);
        let emitters = [FluidEmitter::Cube(shell), FluidEmitter::Cube(remote)];
        let mut builder = EmitterBufferBuilder::new();
        builder.reserve(&emitters);
        builder.allocate();
        builder.add_emitters(&emitters);
        builder.submit();
        solver.add_particles(&gpu.device, &gpu.queue, &arena, &builder).unwrap();
        let volume = sdf.volumes().map(|v| v.scene);
        solver.solve(&gpu.device, &gpu.queue, &arena, 0.0, volume).unwrap();

        let grid = solver.read_block_grid(&gpu.device, &gpu.queue).unwrap();
        let at_surface = block_words(&grid, &domain, near);
        assert!(at_surface[1] > 0);
        assert_eq!(at_surface[3], BLOCK_OCCUPIED | BLOCK_NEAR_SURFACE);
        let remote = block_words(&grid, &domain, far);
        assert_eq!(remote[1], 100);
        assert_eq!(remote[3], BLOCK_OCCUPIED);
    }
}
