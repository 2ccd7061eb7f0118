//! Shared constant-buffer arena
//!
//! Every parameter block used by any shader lives in one uniform buffer.
//! Pipelines register their block types during initialization, the arena is
//! finalized once, and afterwards each segment is updated with
//! `queue.write_buffer` at its offset and bound as a sub-range.

use std::marker::PhantomData;

use bytemuck::Pod;

/// Smallest constant-buffer binding the hardware accepts
pub const MIN_SEGMENT_SIZE: u64 = 16;

/// Typed handle to a registered region of the arena
pub struct Segment<T> {
    offset: u64,
    size: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Segment<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Segment<T> {}

impl<T> std::fmt::Debug for Segment<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("type", &std::any::type_name::<T>())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

impl<T> Segment<T> {
    /// Byte offset into the arena
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bound size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// CPU-side bookkeeping of segment placement
#[derive(Clone, Debug)]
pub struct ArenaLayout {
    alignment: u64,
    cursor: u64,
    segment_count: usize,
    finalized: bool,
}

impl ArenaLayout {
    pub fn new(alignment: u64) -> Self {
        assert!(alignment.is_power_of_two(), "constant buffer alignment must be a power of two");
        Self {
            alignment,
            cursor: 0,
            segment_count: 0,
            finalized: false,
        }
    }

    /// Reserve a segment for parameter block `T`
    ///
    /// Panics once the layout is finalized.
    pub fn register<T: Pod>(&mut self) -> Segment<T> {
        assert!(
            !self.finalized,
            "constant buffer segment {} registered after the arena was finalized",
            std::any::type_name::<T>()
        );

        let size = align_up((std::mem::size_of::<T>() as u64).max(MIN_SEGMENT_SIZE), MIN_SEGMENT_SIZE);
        let offset = self.cursor;
        self.cursor = align_up(offset + size, self.alignment);
        self.segment_count += 1;

        Segment {
            offset,
            size,
            _marker: PhantomData,
        }
    }

    /// Total bytes needed to back every registered segment
    pub fn total_size(&self) -> u64 {
        self.cursor.max(MIN_SEGMENT_SIZE)
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// GPU uniform buffer subdivided into registered segments
pub struct ConstantBufferArena {
    layout: ArenaLayout,
    buffer: Option<wgpu::Buffer>,
    generation: u64,
}

impl ConstantBufferArena {
    pub fn new(device: &wgpu::Device) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        Self {
            layout: ArenaLayout::new(alignment),
            buffer: None,
            generation: 0,
        }
    }

    /// See [`ArenaLayout::register`]
    pub fn register<T: Pod>(&mut self) -> Segment<T> {
        self.layout.register()
    }

    /// Freeze the layout and (re)allocate the backing buffer if its size changed
    ///
    /// Must be called between frames. Every reallocation bumps
    /// [`generation`](Self::generation) so bind groups built on the old buffer
    /// can be detected and rebuilt.
    pub fn finalize(&mut self, device: &wgpu::Device) {
        self.layout.finalized = true;
        let size = self.layout.total_size();

        if self.buffer.as_ref().is_some_and(|b| b.size() == size) {
            return;
        }

        self.buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("constant_buffer_arena"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.generation += 1;

        log::debug!(
            "constant buffer arena: {} segments, {} bytes (generation {})",
            self.layout.segment_count(), size, self.generation
        );
    }

    /// Allow further registrations, e.g. after shader sources were reloaded
    ///
    /// Existing segments keep their offsets; the next `finalize` grows the
    /// buffer if needed.
    pub fn reopen(&mut self) {
        self.layout.finalized = false;
    }

    pub fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn buffer(&self) -> &wgpu::Buffer {
        match &self.buffer {
            Some(buffer) => buffer,
            None => panic!("constant buffer arena used before finalize"),
        }
    }

    /// Write a parameter block into its segment
    pub fn update<T: Pod>(&self, queue: &wgpu::Queue, segment: Segment<T>, data: &T) {
        queue.write_buffer(self.buffer(), segment.offset, bytemuck::bytes_of(data));
    }

    /// Binding resource exposing exactly the segment's range
    pub fn binding<T>(&self, segment: Segment<T>) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: self.buffer(),
            offset: segment.offset,
            size: wgpu::BufferSize::new(segment.size),
        })
    }
}

/// Layout entry for a uniform bound from the arena
pub fn uniform_layout_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
