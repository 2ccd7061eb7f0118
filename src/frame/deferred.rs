//! Skybox and deferred composition passes

use crate::core::types::Result;
use crate::frame::orchestrator::ComputeFence;
use crate::frame::targets::{FrameTargets, SHADING_FORMAT};
use crate::render::shaders::ShaderKind;

/// Fullscreen passes writing into the shading target
pub struct DeferredPipeline {
    skybox: wgpu::RenderPipeline,
    compose: wgpu::RenderPipeline,
    compose_layout: wgpu::BindGroupLayout,
}

fn unfilterable_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    fragment: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment),
            targets: &[Some(wgpu::ColorTargetState {
                format: SHADING_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

impl DeferredPipeline {
    pub fn new(device: &wgpu::Device, frame_layout: &wgpu::BindGroupLayout) -> Result<Self> {
        let shader = ShaderKind::Deferred.create_module(device)?;

        let compose_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("compose_inputs_layout"),
            entries: &[
                unfilterable_texture_entry(0),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                unfilterable_texture_entry(2),
                unfilterable_texture_entry(3),
            ],
        });

        let skybox_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("skybox_pipeline_layout"),
            bind_group_layouts: &[frame_layout],
            immediate_size: 0,
        });
        let compose_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("compose_pipeline_layout"),
            bind_group_layouts: &[frame_layout, &compose_layout],
            immediate_size: 0,
        });

        Ok(Self {
            skybox: fullscreen_pipeline(device, "skybox_pipeline", &skybox_layout, &shader, "fs_skybox"),
            compose: fullscreen_pipeline(device, "compose_pipeline", &compose_pipeline_layout, &shader, "fs_compose"),
            compose_layout,
        })
    }

    /// Clear the shading target, drawing the sky when `skybox` is set
    pub fn record_background(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        frame_group: &wgpu::BindGroup,
        targets: &FrameTargets,
        skybox: bool,
        clear: wgpu::Color,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("skybox_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: targets.shading.view(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        if skybox {
            pass.set_pipeline(&self.skybox);
            pass.set_bind_group(0, frame_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    /// Shade G-buffer and ray march hits over the background
    ///
    /// The ray march outputs are only reachable through `fence`, so compose
    /// is always recorded after the march submission.
    pub fn record_compose(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        frame_group: &wgpu::BindGroup,
        targets: &FrameTargets,
        fence: &ComputeFence<'_>,
    ) {
        let march = fence.outputs();
        let inputs = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("compose_inputs_bind_group"),
            layout: &self.compose_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(targets.gbuffer0.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(targets.depth.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(march.rm0.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(march.rm1.view()),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("compose_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: targets.shading.view(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        pass.set_pipeline(&self.compose);
        pass.set_bind_group(0, frame_group, &[]);
        pass.set_bind_group(1, &inputs, &[]);
        pass.draw(0..3, 0..1);
    }
}
