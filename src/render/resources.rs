//! Volume and buffer resource helpers

use glam::UVec3;

/// Read/write 3D texture with an explicit mip chain
pub struct VolumeTexture {
    texture: wgpu::Texture,
    /// View over every mip, for `textureLoad(.., level)` reads
    full_view: wgpu::TextureView,
    /// One view per mip, for storage writes
    mip_views: Vec<wgpu::TextureView>,
    size: UVec3,
    format: wgpu::TextureFormat,
}

impl VolumeTexture {
    /// Create a volume usable as both storage target and sampled texture
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        format: wgpu::TextureFormat,
        size: UVec3,
        mip_count: u32,
    ) -> Self {
        assert!(mip_count >= 1, "volume needs at least one mip");

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: size.z,
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let full_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::D3),
            ..Default::default()
        });

        let mip_views = (0..mip_count)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(label),
                    dimension: Some(wgpu::TextureViewDimension::D3),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        Self {
            texture,
            full_view,
            mip_views,
            size,
            format,
        }
    }

    /// True when this volume can be reused for the requested shape
    pub fn matches(&self, format: wgpu::TextureFormat, size: UVec3, mip_count: u32) -> bool {
        self.format == format && self.size == size && self.mip_count() == mip_count
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.full_view
    }

    pub fn mip_view(&self, level: u32) -> &wgpu::TextureView {
        &self.mip_views[level as usize]
    }

    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_views.len() as u32
    }

    /// Extent of a given mip level
    pub fn mip_size(&self, level: u32) -> UVec3 {
        mip_extent(self.size, level)
    }
}

/// Single-mip 2D texture plus its default view
pub struct Target2d {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl Target2d {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
            width,
            height,
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Extent of mip `level` for a base extent, never below one texel
pub fn mip_extent(size: UVec3, level: u32) -> UVec3 {
    (size >> level).max(UVec3::ONE)
}

/// Reuse `slot` when it already matches, otherwise replace it
///
/// Returns true when a new volume was allocated.
pub fn reserve_volume(
    slot: &mut Option<VolumeTexture>,
    device: &wgpu::Device,
    label: &str,
    format: wgpu::TextureFormat,
    size: UVec3,
    mip_count: u32,
) -> bool {
    if slot.as_ref().is_some_and(|v| v.matches(format, size, mip_count)) {
        return false;
    }
    *slot = Some(VolumeTexture::new(device, label, format, size, mip_count));
    true
}

/// Capacity policy of [`ReservedBuffer`]: grow only, never shrink
pub fn needs_realloc(current: Option<(u64, u64)>, count: u64, stride: u64) -> bool {
    match current {
        Some((capacity, current_stride)) => capacity < count || current_stride < stride,
        None => true,
    }
}

/// Structured buffer that is reallocated only when it must grow
pub struct ReservedBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
    stride: u64,
}

impl ReservedBuffer {
    pub fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            usage,
            buffer: None,
            capacity: 0,
            stride: 0,
        }
    }

    /// Make room for `count` elements of `stride` bytes
    ///
    /// Returns true when the buffer was (re)allocated, which invalidates any
    /// bind group built on the previous one.
    pub fn reserve(&mut self, device: &wgpu::Device, count: u64, stride: u64) -> bool {
        let current = self.buffer.as_ref().map(|_| (self.capacity, self.stride));
        if !needs_realloc(current, count, stride) {
            return false;
        }

        let count = count.max(1);
        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size: align_to_four(count * stride),
            usage: self.usage,
            mapped_at_creation: false,
        }));
        self.capacity = count;
        self.stride = stride;
        true
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn release(&mut self) {
        self.buffer = None;
        self.capacity = 0;
        self.stride = 0;
    }
}

fn align_to_four(bytes: u64) -> u64 {
    bytes.div_ceil(4).max(1) * 4
}

/// Create a storage buffer and upload `data`
pub fn create_storage_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    data: &[u8],
    extra_usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: align_to_four(data.len() as u64),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | extra_usage,
        mapped_at_creation: false,
    });
    if !data.is_empty() {
        queue.write_buffer(&buffer, 0, data);
    }
    buffer
}

/// Create an indirect-argument buffer of `words` u32s, seeded with `seed`
///
/// The buffer is also bound as storage so kernels can write their successors'
/// dispatch sizes.
pub fn create_indirect_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    words: u64,
    seed: &[u32],
) -> wgpu::Buffer {
    assert!(seed.len() as u64 <= words, "indirect seed larger than buffer");
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: words.max(4) * 4,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::INDIRECT
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    if !seed.is_empty() {
        queue.write_buffer(&buffer, 0, bytemuck::cast_slice(seed));
    }
    buffer
}

/// Layout entry for a storage buffer visible to compute
pub fn storage_layout_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Layout entry for a 3D texture read through `textureLoad`
pub fn volume_read_layout_entry(
    binding: u32,
    sample_type: wgpu::TextureSampleType,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension: wgpu::TextureViewDimension::D3,
            multisampled: false,
        },
        count: None,
    }
}

/// Layout entry for a write-only storage texture
pub fn storage_texture_layout_entry(
    binding: u32,
    format: wgpu::TextureFormat,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension,
        },
        count: None,
    }
}

/// Build a compute pipeline for one entry point of a shader module
pub fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent_clamps() {
        let size = UVec3::new(64, 32, 8);
        assert_eq!(mip_extent(size, 0), size);
        assert_eq!(mip_extent(size, 2), UVec3::new(16, 8, 2));
        assert_eq!(mip_extent(size, 4), UVec3::new(4, 2, 1));
    }

    #[test]
    fn test_reserve_policy() {
        assert!(needs_realloc(None, 0, 4));
        assert!(!needs_realloc(Some((100, 16)), 100, 16));
        assert!(!needs_realloc(Some((100, 16)), 10, 8));
        assert!(needs_realloc(Some((100, 16)), 101, 16));
        assert!(needs_realloc(Some((100, 16)), 10, 32));
    }

    #[test]
    fn test_reserved_buffer_grows_only() {
        let Some(gpu) = crate::render::context::test_context() else { return };

        let mut buffer = ReservedBuffer::new("test_reserved", wgpu::BufferUsages::STORAGE);
        assert!(buffer.reserve(&gpu.device, 64, 16));
        assert!(!buffer.reserve(&gpu.device, 32, 16));
        assert_eq!(buffer.capacity(), 64);
        assert!(buffer.reserve(&gpu.device, 65, 16));
        assert_eq!(buffer.buffer().map(|b| b.size()), Some(65 * 16));

        buffer.release();
        assert!(buffer.buffer().is_none());
    }

    #[test]
    fn test_reserve_volume_reuses_matching() {
        let Some(gpu) = crate::render::context::test_context() else { return };

        let mut slot = None;
        let size = UVec3::splat(16);
        let format = wgpu::TextureFormat::R32Float;
        assert!(reserve_volume(&mut slot, &gpu.device, "v", format, size, 3));
        assert!(!reserve_volume(&mut slot, &gpu.device, "v", format, size, 3));
        assert!(reserve_volume(&mut slot, &gpu.device, "v", format, size, 2));

        let volume = slot.unwrap();
        assert_eq!(volume.mip_count(), 2);
        assert_eq!(volume.mip_size(1), UVec3::splat(8));
    }
}
