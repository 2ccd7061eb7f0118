//! Fluid debug particle pass
//!
//! Draws every live solver particle as a camera-facing disc into the
//! G-buffer. The instance count comes straight from the solver's indirect
//! argument block, so no readback is needed.

use crate::core::types::Result;
use crate::fluid::solver::{FluidSolver, DRAW_ARGS_OFFSET};
use crate::frame::targets::{DEPTH_FORMAT, GBUFFER0_FORMAT};
use crate::render::shaders::ShaderKind;

/// Vertices of one particle quad
pub const PARTICLE_VERTEX_COUNT: u32 = 6;

pub struct ParticleDebugPipeline {
    pipeline: wgpu::RenderPipeline,
    positions_layout: wgpu::BindGroupLayout,
}

impl ParticleDebugPipeline {
    pub fn new(device: &wgpu::Device, frame_layout: &wgpu::BindGroupLayout) -> Result<Self> {
        let shader = ShaderKind::ParticleDebug.create_module(device)?;

        let positions_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("particle_debug_positions_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("particle_debug_pipeline_layout"),
            bind_group_layouts: &[frame_layout, &positions_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("particle_debug_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_particle"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_particle"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: GBUFFER0_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        Ok(Self {
            pipeline,
            positions_layout,
        })
    }

    /// Bind group over the solver's particle positions; `None` while unloaded
    pub fn bind_positions(&self, device: &wgpu::Device, solver: &FluidSolver) -> Option<wgpu::BindGroup> {
        let positions = solver.positions_buffer()?;
        Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle_debug_positions_bind_group"),
            layout: &self.positions_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: positions.as_entire_binding(),
            }],
        }))
    }

    pub fn draw(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        frame_group: &wgpu::BindGroup,
        positions_group: &wgpu::BindGroup,
        solver: &FluidSolver,
    ) {
        let Some(args) = solver.args_buffer() else { return };
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, frame_group, &[]);
        pass.set_bind_group(1, positions_group, &[]);
        pass.draw_indirect(args, DRAW_ARGS_OFFSET);
    }
}
