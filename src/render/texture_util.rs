//! Volume clear kernels

use bytemuck::{Pod, Zeroable};

use crate::core::types::Result;
use crate::render::arena::{uniform_layout_entry, ConstantBufferArena, Segment};
use crate::render::resources::{create_compute_pipeline, storage_texture_layout_entry, VolumeTexture};
use crate::render::shaders::ShaderKind;

const CLEAR_GROUP_SIZE: u32 = 4;

/// Values written by the clear kernels
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ClearParams {
    pub value_f32: [f32; 4],
    pub value_u32: [u32; 4],
}

const _: () = assert!(std::mem::size_of::<ClearParams>() == 32);

impl ClearParams {
    pub fn new(value_f32: f32, value_u32: u32) -> Self {
        Self {
            value_f32: [value_f32; 4],
            value_u32: [value_u32; 4],
        }
    }
}

pub struct TextureUtilPipeline {
    clear_f32: wgpu::ComputePipeline,
    clear_u32: wgpu::ComputePipeline,
    params_layout: wgpu::BindGroupLayout,
    target_f32_layout: wgpu::BindGroupLayout,
    target_u32_layout: wgpu::BindGroupLayout,
    params: Segment<ClearParams>,
}

impl TextureUtilPipeline {
    pub fn new(device: &wgpu::Device, arena: &mut ConstantBufferArena) -> Result<Self> {
        let shader = ShaderKind::TextureUtil.create_module(device)?;

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("clear_params_layout"),
            entries: &[uniform_layout_entry(0, wgpu::ShaderStages::COMPUTE)],
        });
        let target_f32_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("clear_target_f32_layout"),
            entries: &[storage_texture_layout_entry(
                0,
                wgpu::TextureFormat::R32Float,
                wgpu::TextureViewDimension::D3,
            )],
        });
        let target_u32_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("clear_target_u32_layout"),
            entries: &[storage_texture_layout_entry(
                1,
                wgpu::TextureFormat::R32Uint,
                wgpu::TextureViewDimension::D3,
            )],
        });

        let layout_f32 = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("clear_f32_pipeline_layout"),
            bind_group_layouts: &[&params_layout, &target_f32_layout],
            immediate_size: 0,
        });
        let layout_u32 = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("clear_u32_pipeline_layout"),
            bind_group_layouts: &[&params_layout, &target_u32_layout],
            immediate_size: 0,
        });

        Ok(Self {
            clear_f32: create_compute_pipeline(device, "clear_volume_f32", &layout_f32, &shader, "clear_volume_f32"),
            clear_u32: create_compute_pipeline(device, "clear_volume_u32", &layout_u32, &shader, "clear_volume_u32"),
            params_layout,
            target_f32_layout,
            target_u32_layout,
            params: arena.register(),
        })
    }

    /// Set the values every clear recorded before the next submit writes
    pub fn set_clear_values(&self, queue: &wgpu::Queue, arena: &ConstantBufferArena, value_f32: f32, value_u32: u32) {
        arena.update(queue, self.params, &ClearParams::new(value_f32, value_u32));
    }

    /// Record a clear of one mip of a volume
    ///
    /// R32Float volumes receive the float clear value, R32Uint volumes the
    /// integer one.
    pub fn clear_volume(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        arena: &ConstantBufferArena,
        volume: &VolumeTexture,
        mip: u32,
    ) {
        let (pipeline, layout, binding) = match volume.format() {
            wgpu::TextureFormat::R32Uint => (&self.clear_u32, &self.target_u32_layout, 1),
            _ => (&self.clear_f32, &self.target_f32_layout, 0),
        };

        let params_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("clear_params_bind_group"),
            layout: &self.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: arena.binding(self.params),
            }],
        });
        let target_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("clear_target_bind_group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(volume.mip_view(mip)),
            }],
        });

        let size = volume.mip_size(mip);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("clear_volume"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &params_group, &[]);
        pass.set_bind_group(1, &target_group, &[]);
        pass.dispatch_workgroups(
            size.x.div_ceil(CLEAR_GROUP_SIZE),
            size.y.div_ceil(CLEAR_GROUP_SIZE),
            size.z.div_ceil(CLEAR_GROUP_SIZE),
        );
    }

    /// Record a clear of every mip of a volume
    pub fn clear_all_mips(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        arena: &ConstantBufferArena,
        volume: &VolumeTexture,
    ) {
        for mip in 0..volume.mip_count() {
            self.clear_volume(device, encoder, arena, volume, mip);
        }
    }
}
