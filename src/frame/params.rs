//! Parameter blocks shared by the frame's raster passes

use bytemuck::{Pod, Zeroable};

use crate::core::camera::Camera;
use crate::core::config::{EngineConfig, PALETTE_SIZE, PARTICLE_MATERIAL};
use crate::render::arena::uniform_layout_entry;

/// Layout must match `FrameParams` in `deferred.wgsl`, `opaque.wgsl` and
/// `particle_debug.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    /// Position, near plane in `w`
    pub camera_position: [f32; 4],
    /// Right axis, far plane in `w`
    pub camera_right: [f32; 4],
    /// Up axis, debug particle size in `w`
    pub camera_up: [f32; 4],
    /// Direction light travels, ambient factor in `w`
    pub light_direction: [f32; 4],
    pub sky_horizon: [f32; 4],
    pub sky_zenith: [f32; 4],
    /// Width, height, particle material
    pub screen: [u32; 4],
    pub palette: [[f32; 4]; PALETTE_SIZE],
}

const _: () = assert!(std::mem::size_of::<FrameParams>() == 496);

impl FrameParams {
    pub fn new(camera: &Camera, config: &EngineConfig, width: u32, height: u32) -> Self {
        let view_proj = camera.view_projection();
        let light = config.light_direction.normalize_or(glam::Vec3::NEG_Z);
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            camera_position: camera.position.extend(camera.near).to_array(),
            camera_right: camera.right().extend(camera.far).to_array(),
            camera_up: camera.up().extend(config.debug_particle_size).to_array(),
            light_direction: light.extend(config.ambient.clamp(0.0, 1.0)).to_array(),
            sky_horizon: config.sky_horizon.extend(1.0).to_array(),
            sky_zenith: config.sky_zenith.extend(1.0).to_array(),
            screen: [width, height, PARTICLE_MATERIAL, 0],
            palette: config.palette_rgba(),
        }
    }
}

/// Layout must match `BlitParams` in `blit.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BlitParams {
    /// Non-zero flips the source vertically
    pub flip_y: u32,
    pub _pad: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<BlitParams>() == 16);

impl BlitParams {
    pub fn new(flip_y: bool) -> Self {
        Self {
            flip_y: flip_y as u32,
            _pad: [0; 3],
        }
    }
}

/// Group 0 of every raster pass: the frame parameters
pub fn frame_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("frame_params_layout"),
        entries: &[uniform_layout_entry(
            0,
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        )],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3, Vec4};

    #[test]
    fn test_frame_params_pack_camera() {
        let camera = Camera::look_at(Vec3::new(0.0, -10.0, 2.0), Vec3::new(0.0, 0.0, 2.0), Vec3::Z);
        let config = EngineConfig::default();
        let params = FrameParams::new(&camera, &config, 320, 200);

        assert_eq!(params.camera_position, [0.0, -10.0, 2.0, camera.near]);
        assert_eq!(params.camera_right[3], camera.far);
        assert_eq!(params.camera_up[3], config.debug_particle_size);
        assert_eq!(params.screen, [320, 200, PARTICLE_MATERIAL, 0]);

        let vp = Mat4::from_cols_array_2d(&params.view_proj);
        let inv = Mat4::from_cols_array_2d(&params.inv_view_proj);
        let p = Vec4::new(1.0, 2.0, 3.0, 1.0);
        assert!(((inv * (vp * p)) - p).abs().max_element() < 1e-3);

        let light = Vec3::from_slice(&params.light_direction[..3]);
        assert!((light.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_light_falls_back_to_down() {
        let camera = Camera::new(Vec3::ZERO, 60.0, 1.0);
        let config = EngineConfig {
            light_direction: Vec3::ZERO,
            ambient: 2.0,
            ..Default::default()
        };
        let params = FrameParams::new(&camera, &config, 1, 1);
        assert_eq!(params.light_direction, [0.0, 0.0, -1.0, 1.0]);
    }

    #[test]
    fn test_blit_flag() {
        assert_eq!(BlitParams::new(true).flip_y, 1);
        assert_eq!(BlitParams::new(false), BlitParams::default());
    }
}
