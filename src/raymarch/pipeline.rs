//! Ray marching compute pipeline and its output targets

use crate::core::types::Result;
use crate::render::arena::{uniform_layout_entry, ConstantBufferArena, Segment};
use crate::render::resources::{create_compute_pipeline, storage_texture_layout_entry, volume_read_layout_entry, Target2d};
use crate::render::shaders::ShaderKind;
use crate::raymarch::params::RayMarchParams;
use crate::raymarch::{tile_counts, RM0_FORMAT, RM1_FORMAT, TILED_MARCHING_GROUP_SIZE, TILE_FORMAT};
use crate::sdf::SceneVolumes;

/// Per-tile and per-pixel march results
pub struct RayMarchTargets {
    /// (start distance, steps) per tile
    pub tile: Target2d,
    /// View depth, material id + 1, steps, hit
    pub rm0: Target2d,
    /// Normal, hit
    pub rm1: Target2d,
}

impl RayMarchTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        // Render attachment so the outputs can be cleared when nothing is marched
        let usage = wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC;
        let (tiles_x, tiles_y) = tile_counts(width, height);
        Self {
            tile: Target2d::new(device, "ray_march_tiles", TILE_FORMAT, tiles_x, tiles_y, usage),
            rm0: Target2d::new(device, "ray_march_rm0", RM0_FORMAT, width, height, usage),
            rm1: Target2d::new(device, "ray_march_rm1", RM1_FORMAT, width, height, usage),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.rm0.size()
    }
}

pub struct RayMarchPipeline {
    tiled: wgpu::ComputePipeline,
    marching: wgpu::ComputePipeline,
    params_layout: wgpu::BindGroupLayout,
    volume_layout: wgpu::BindGroupLayout,
    tile_layout: wgpu::BindGroupLayout,
    pixel_layout: wgpu::BindGroupLayout,
    params: Segment<RayMarchParams>,
}

impl RayMarchPipeline {
    pub fn new(device: &wgpu::Device, arena: &mut ConstantBufferArena) -> Result<Self> {
        let shader = ShaderKind::RayMarching.create_module(device)?;

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ray_march_params_layout"),
            entries: &[uniform_layout_entry(0, wgpu::ShaderStages::COMPUTE)],
        });
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ray_march_volume_layout"),
            entries: &[
                volume_read_layout_entry(
                    0,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::ShaderStages::COMPUTE,
                ),
                volume_read_layout_entry(1, wgpu::TextureSampleType::Uint, wgpu::ShaderStages::COMPUTE),
            ],
        });
        let tile_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ray_march_tile_layout"),
            entries: &[storage_texture_layout_entry(0, TILE_FORMAT, wgpu::TextureViewDimension::D2)],
        });
        let pixel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ray_march_pixel_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                storage_texture_layout_entry(2, RM0_FORMAT, wgpu::TextureViewDimension::D2),
                storage_texture_layout_entry(3, RM1_FORMAT, wgpu::TextureViewDimension::D2),
            ],
        });

        let tiled_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tiled_marching_layout"),
            bind_group_layouts: &[&params_layout, &volume_layout, &tile_layout],
            immediate_size: 0,
        });
        let marching_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ray_marching_layout"),
            bind_group_layouts: &[&params_layout, &volume_layout, &pixel_layout],
            immediate_size: 0,
        });

        Ok(Self {
            tiled: create_compute_pipeline(device, "tiled_marching", &tiled_layout, &shader, "tiled_marching"),
            marching: create_compute_pipeline(device, "ray_marching", &marching_layout, &shader, "ray_marching"),
            params_layout,
            volume_layout,
            tile_layout,
            pixel_layout,
            params: arena.register(),
        })
    }

    /// Upload this frame's camera parameters
    pub fn update(&self, queue: &wgpu::Queue, arena: &ConstantBufferArena, params: &RayMarchParams) {
        arena.update(queue, self.params, params);
    }

    /// Record both marching phases into `encoder`
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        arena: &ConstantBufferArena,
        volumes: SceneVolumes<'_>,
        targets: &RayMarchTargets,
    ) {
        let params_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ray_march_params_bind_group"),
            layout: &self.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: arena.binding(self.params),
            }],
        });
        let volume_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ray_march_volume_bind_group"),
            layout: &self.volume_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(volumes.scene.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(volumes.material.view()),
                },
            ],
        });
        let tile_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ray_march_tile_bind_group"),
            layout: &self.tile_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(targets.tile.view()),
            }],
        });
        let pixel_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ray_march_pixel_bind_group"),
            layout: &self.pixel_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(targets.tile.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(targets.rm0.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(targets.rm1.view()),
                },
            ],
        });

        let (width, height) = targets.size();
        let (tiles_x, tiles_y) = targets.tile.size();

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("ray_marching"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &params_group, &[]);
        pass.set_bind_group(1, &volume_group, &[]);

        pass.set_pipeline(&self.tiled);
        pass.set_bind_group(2, &tile_group, &[]);
        pass.dispatch_workgroups(
            tiles_x.div_ceil(TILED_MARCHING_GROUP_SIZE),
            tiles_y.div_ceil(TILED_MARCHING_GROUP_SIZE),
            1,
        );

        pass.set_pipeline(&self.marching);
        pass.set_bind_group(2, &pixel_group, &[]);
        pass.dispatch_workgroups(
            width.div_ceil(TILED_MARCHING_GROUP_SIZE),
            height.div_ceil(TILED_MARCHING_GROUP_SIZE),
            1,
        );
    }
}
