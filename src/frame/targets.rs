//! Transient per-camera render targets

use crate::raymarch::RayMarchTargets;
use crate::render::resources::Target2d;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Normal in `xyz`, material id + 1 in `w` (0 where nothing was drawn)
pub const GBUFFER0_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const SHADING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Every attachment one camera needs for a frame
pub struct FrameTargets {
    pub depth: Target2d,
    pub gbuffer0: Target2d,
    pub shading: Target2d,
    pub march: RayMarchTargets,
}

impl FrameTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let attachment = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        Self {
            depth: Target2d::new(device, "frame_depth", DEPTH_FORMAT, width, height, attachment),
            gbuffer0: Target2d::new(
                device,
                "frame_gbuffer0",
                GBUFFER0_FORMAT,
                width,
                height,
                attachment | wgpu::TextureUsages::COPY_SRC,
            ),
            shading: Target2d::new(
                device,
                "frame_shading",
                SHADING_FORMAT,
                width,
                height,
                attachment | wgpu::TextureUsages::COPY_SRC,
            ),
            march: RayMarchTargets::new(device, width, height),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.shading.size()
    }
}

/// Released targets kept for the next camera of the same size
#[derive(Default)]
pub struct TransientTargets {
    free: Vec<FrameTargets>,
}

/// Released sets kept around; more cameras than this reallocate
const MAX_CACHED_TARGETS: usize = 4;

impl TransientTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set of `width` x `height`, reused when one was released
    pub fn acquire(&mut self, device: &wgpu::Device, width: u32, height: u32) -> FrameTargets {
        let size = (width.max(1), height.max(1));
        match self.free.iter().position(|t| t.size() == size) {
            Some(i) => self.free.swap_remove(i),
            None => {
                log::debug!("allocating frame targets {}x{}", size.0, size.1);
                FrameTargets::new(device, size.0, size.1)
            }
        }
    }

    pub fn release(&mut self, targets: FrameTargets) {
        if self.free.len() == MAX_CACHED_TARGETS {
            self.free.remove(0);
        }
        self.free.push(targets);
    }

    /// Drop every cached set
    pub fn clear(&mut self) {
        self.free.clear();
    }

    pub fn cached(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_are_reused_by_size() {
        let Some(gpu) = crate::render::context::test_context() else { return };
        let mut pool = TransientTargets::new();

        let a = pool.acquire(&gpu.device, 32, 16);
        assert_eq!(a.size(), (32, 16));
        assert_eq!(a.march.size(), (32, 16));
        let id = a.shading.texture().clone();
        pool.release(a);
        assert_eq!(pool.cached(), 1);

        let b = pool.acquire(&gpu.device, 32, 16);
        assert_eq!(*b.shading.texture(), id);
        assert_eq!(pool.cached(), 0);

        let c = pool.acquire(&gpu.device, 8, 8);
        assert_ne!(*c.shading.texture(), id);
        pool.release(b);
        pool.release(c);
        pool.clear();
        assert_eq!(pool.cached(), 0);
    }
}
