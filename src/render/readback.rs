//! Blocking GPU readback for tests and debug inspection
//!
//! These stall the device; never call them inside the frame loop.

use glam::UVec3;

use crate::core::error::Error;
use crate::core::types::Result;

const ROW_ALIGN: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

fn map_and_copy(device: &wgpu::Device, staging: &wgpu::Buffer) -> Result<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device
        .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
        .map_err(|e| Error::Gpu(e.to_string()))?;

    rx.recv()
        .map_err(|e| Error::Gpu(e.to_string()))?
        .map_err(|e| Error::Gpu(e.to_string()))?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Copy `size` bytes starting at `offset` back to the CPU
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    map_and_copy(device, &staging)
}

/// Read a range of u32 words from a buffer
pub fn read_words(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    first_word: u64,
    word_count: u64,
) -> Result<Vec<u32>> {
    let bytes = read_buffer(device, queue, buffer, first_word * 4, word_count * 4)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Read one mip of a texture with 4-byte texels (R32Float, R32Uint, Rgba8Unorm)
///
/// Returns tightly packed texels in x-major, then y, then z order.
pub fn read_texture_words(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    size: UVec3,
) -> Result<Vec<u32>> {
    let bytes = read_texture(device, queue, texture, mip_level, size, 4)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Read one mip of an Rgba16Float texture as f32 components
pub fn read_texture_rgba16f(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    size: UVec3,
) -> Result<Vec<[f32; 4]>> {
    let bytes = read_texture(device, queue, texture, 0, size, 8)?;
    let halves: Vec<half::f16> = bytemuck::pod_collect_to_vec(&bytes);
    Ok(halves
        .chunks_exact(4)
        .map(|c| [c[0].to_f32(), c[1].to_f32(), c[2].to_f32(), c[3].to_f32()])
        .collect())
}

/// Read an Rgba32Float texture
pub fn read_texture_rgba32f(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    size: UVec3,
) -> Result<Vec<[f32; 4]>> {
    let bytes = read_texture(device, queue, texture, 0, size, 16)?;
    let floats: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
    Ok(floats.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]).collect())
}

fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    size: UVec3,
    texel_bytes: u32,
) -> Result<Vec<u8>> {
    let row_bytes = size.x * texel_bytes;
    let padded_row = row_bytes.div_ceil(ROW_ALIGN) * ROW_ALIGN;
    let staging_size = padded_row as u64 * size.y as u64 * size.z as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("texture_readback_staging"),
        size: staging_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("texture_readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(size.y),
            },
        },
        wgpu::Extent3d {
            width: size.x,
            height: size.y,
            depth_or_array_layers: size.z,
        },
    );
    queue.submit(Some(encoder.finish()));

    let padded = map_and_copy(device, &staging)?;

    let mut packed = Vec::with_capacity((row_bytes * size.y * size.z) as usize);
    for row in padded.chunks_exact(padded_row as usize) {
        packed.extend_from_slice(&row[..row_bytes as usize]);
    }
    Ok(packed)
}
