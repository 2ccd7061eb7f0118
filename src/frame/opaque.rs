//! Rasterized opaque geometry
//!
//! Opaque objects are axis-aligned boxes drawn as instances into the
//! G-buffer. Boxes outside the camera frustum are culled on the CPU before
//! upload.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::types::Result;
use crate::frame::targets::{DEPTH_FORMAT, GBUFFER0_FORMAT};
use crate::math::{Aabb, Frustum};
use crate::render::resources::ReservedBuffer;
use crate::render::shaders::ShaderKind;

/// Vertices per box, two triangles per face
const BOX_VERTEX_COUNT: u32 = 36;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpaqueBox {
    pub min: Vec3,
    pub max: Vec3,
    #[serde(default)]
    pub material: u32,
}

impl OpaqueBox {
    pub fn new(min: Vec3, max: Vec3, material: u32) -> Self {
        Self { min, max, material }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.min.min(self.max), self.min.max(self.max))
    }

    pub fn instance(&self) -> BoxInstance {
        let bounds = self.bounds();
        BoxInstance {
            min: bounds.min.to_array(),
            material: self.material,
            max: bounds.max.to_array(),
            _pad: 0,
        }
    }
}

/// Per-instance vertex data; layout must match `BoxInstance` in `opaque.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BoxInstance {
    pub min: [f32; 3],
    pub material: u32,
    pub max: [f32; 3],
    pub _pad: u32,
}

const _: () = assert!(std::mem::size_of::<BoxInstance>() == 32);

const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Uint32, 2 => Float32x3];

/// Instances of the boxes that intersect `frustum`
pub fn cull_boxes(frustum: &Frustum, boxes: &[OpaqueBox]) -> Vec<BoxInstance> {
    boxes
        .iter()
        .filter(|b| frustum.intersects_aabb(&b.bounds()))
        .map(OpaqueBox::instance)
        .collect()
}

pub struct OpaquePipeline {
    pipeline: wgpu::RenderPipeline,
    instances: ReservedBuffer,
    instance_count: u32,
}

impl OpaquePipeline {
    pub fn new(device: &wgpu::Device, frame_layout: &wgpu::BindGroupLayout) -> Result<Self> {
        let shader = ShaderKind::Opaque.create_module(device)?;

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("opaque_pipeline_layout"),
            bind_group_layouts: &[frame_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("opaque_pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_opaque"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<BoxInstance>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &INSTANCE_ATTRIBUTES,
                }],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
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
                entry_point: Some("fs_opaque"),
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
            instances: ReservedBuffer::new(
                "opaque_instances",
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            ),
            instance_count: 0,
        })
    }

    /// Upload this camera's visible instances
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, instances: &[BoxInstance]) {
        self.instance_count = instances.len() as u32;
        if instances.is_empty() {
            return;
        }
        self.instances
            .reserve(device, instances.len() as u64, std::mem::size_of::<BoxInstance>() as u64);
        if let Some(buffer) = self.instances.buffer() {
            queue.write_buffer(buffer, 0, bytemuck::cast_slice(instances));
        }
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>, frame_group: &wgpu::BindGroup) {
        let Some(buffer) = self.instances.buffer() else { return };
        if self.instance_count == 0 {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, frame_group, &[]);
        pass.set_vertex_buffer(0, buffer.slice(..));
        pass.draw(0..BOX_VERTEX_COUNT, 0..self.instance_count);
    }

    pub fn release(&mut self) {
        self.instances.release();
        self.instance_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::camera::Camera;

    #[test]
    fn test_cull_keeps_visible_boxes() {
        let camera = Camera::look_at(Vec3::new(0.0, -10.0, 0.0), Vec3::ZERO, Vec3::Z);
        let frustum = Frustum::from_view_projection(&camera.view_projection());
        let boxes = vec![
            OpaqueBox::new(Vec3::splat(-1.0), Vec3::splat(1.0), 2),
            // Behind the camera
            OpaqueBox::new(Vec3::new(-1.0, -30.0, -1.0), Vec3::new(1.0, -28.0, 1.0), 3),
            // Far off to the side
            OpaqueBox::new(Vec3::new(200.0, 0.0, 0.0), Vec3::new(201.0, 1.0, 1.0), 4),
        ];

        let visible = cull_boxes(&frustum, &boxes);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].material, 2);
    }

    #[test]
    fn test_inverted_corners_are_normalized() {
        let instance = OpaqueBox::new(Vec3::ONE, Vec3::ZERO, 0).instance();
        assert_eq!(instance.min, [0.0; 3]);
        assert_eq!(instance.max, [1.0; 3]);
    }

    #[test]
    fn test_box_json_defaults_material() {
        let b: OpaqueBox = serde_json::from_str(r#"{ "min": [0, 0, 0], "max": [1, 2, 3] }"#).unwrap();
        assert_eq!(b.material, 0);
        assert_eq!(b.bounds().size(), Vec3::new(1.0, 2.0, 3.0));
    }
}
