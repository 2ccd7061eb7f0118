//! GPU SDF volume generation
//!
//! `load_scene` records the whole chain in one submission:
//!
//! 1. clear both volumes (scene to 1.0 "empty", material to 0)
//! 2. `generate_mat_volume` culls brushes per tile then per material cell and
//!    appends the surviving cells
//! 3. `generate_indirect_args` sizes `generate_scene_volume`, which evaluates
//!    mip 0 only inside appended cells
//! 4. per coarser mip: `generate_mip_dispatch` appends cells with material in
//!    their dilated footprint, then `generate_mip_map` reduces those cells
//!
//! No count is read back; every sparse stage is an indirect dispatch.

use glam::UVec3;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::arena::{uniform_layout_entry, ConstantBufferArena, Segment};
use crate::render::resources::{
    create_compute_pipeline, create_storage_buffer, mip_extent, reserve_volume, storage_layout_entry,
    storage_texture_layout_entry, volume_read_layout_entry, ReservedBuffer, VolumeTexture,
};
use crate::render::shaders::ShaderKind;
use crate::render::texture_util::TextureUtilPipeline;
use crate::sdf::brush::FlattenedBrushes;
use crate::sdf::params::SdfGenerationParams;
use crate::sdf::scene::SdfScene;
use crate::sdf::volume::{assert_volume_shapes, SceneVolumes};
use crate::sdf::{GENERATE_MAT_VOLUME_KERNEL_SIZE, MAX_BRUSH_COUNT_FACTOR, SCENE_MIP_COUNT};

/// Seed of a cell list: zero entries, dispatch args (0, 1, 1)
const CELL_LIST_SEED: [u32; 4] = [0, 0, 1, 1];
/// Byte offset of the dispatch args inside a cell list
pub const CELL_LIST_ARGS_OFFSET: u64 = 4;
/// Header words before the first cell entry
const CELL_LIST_HEADER_WORDS: u64 = 4;

const CELL_LIST_LABELS: [&str; SCENE_MIP_COUNT as usize] = [
    "sdf_cells_mip0",
    "sdf_cells_mip1",
    "sdf_cells_mip2",
    "sdf_cells_mip3",
    "sdf_cells_mip4",
];

/// Lifecycle of the loaded scene
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneState {
    Unloaded,
    Loading,
    Loaded,
}

impl SceneState {
    /// Enter `Loading`; loading over a live scene is a setup bug
    pub fn begin_load(&mut self) {
        assert!(
            *self == SceneState::Unloaded,
            "scene is already loaded (state {self:?}); unload it first"
        );
        *self = SceneState::Loading;
    }

    /// Leave any state for `Unloaded`; false when nothing was loaded
    pub fn unload(&mut self) -> bool {
        let was_loaded = *self != SceneState::Unloaded;
        *self = SceneState::Unloaded;
        was_loaded
    }
}

/// Brush data uploaded for the current scene
struct BrushBuffers {
    brushes: wgpu::Buffer,
    parameters: wgpu::Buffer,
    samples: wgpu::Buffer,
}

/// Scene metadata kept while loaded
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedScene {
    pub size: UVec3,
    pub origin: glam::Vec3,
    pub grid_size: f32,
    pub brush_count: u32,
}

pub struct SdfGenerationPipeline {
    texture_util: TextureUtilPipeline,

    mat_volume: wgpu::ComputePipeline,
    indirect_args: wgpu::ComputePipeline,
    scene_volume: wgpu::ComputePipeline,
    mip_dispatch: wgpu::ComputePipeline,
    mip_map: wgpu::ComputePipeline,

    params_layout: wgpu::BindGroupLayout,
    brush_layout: wgpu::BindGroupLayout,
    cells_write_layout: wgpu::BindGroupLayout,
    cells_read_layout: wgpu::BindGroupLayout,
    volume_layout: wgpu::BindGroupLayout,
    mip_layout: wgpu::BindGroupLayout,

    params: Segment<SdfGenerationParams>,

    state: SceneState,
    scene_info: Option<LoadedScene>,
    scene_volume_texture: Option<VolumeTexture>,
    material_volume_texture: Option<VolumeTexture>,
    brush_buffers: Option<BrushBuffers>,
    cell_lists: Vec<ReservedBuffer>,
    brush_indices: ReservedBuffer,
}

impl SdfGenerationPipeline {
    /// Build the kernels and register the parameter block
    ///
    /// The arena must be finalized before the first `load_scene`.
    pub fn new(device: &wgpu::Device, arena: &mut ConstantBufferArena) -> Result<Self> {
        let texture_util = TextureUtilPipeline::new(device, arena)?;
        let shader = ShaderKind::SdfGeneration.create_module(device)?;

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sdf_params_layout"),
            entries: &[uniform_layout_entry(0, wgpu::ShaderStages::COMPUTE)],
        });
        let brush_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sdf_brush_layout"),
            entries: &[
                storage_layout_entry(0, true),
                storage_layout_entry(1, true),
                storage_layout_entry(2, true),
            ],
        });
        let cells_write_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sdf_cells_write_layout"),
            entries: &[storage_layout_entry(0, false), storage_layout_entry(1, false)],
        });
        let cells_read_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sdf_cells_read_layout"),
            entries: &[storage_layout_entry(2, true), storage_layout_entry(3, true)],
        });
        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sdf_volume_layout"),
            entries: &[
                storage_texture_layout_entry(0, wgpu::TextureFormat::R32Float, wgpu::TextureViewDimension::D3),
                storage_texture_layout_entry(1, wgpu::TextureFormat::R32Uint, wgpu::TextureViewDimension::D3),
            ],
        });
        let mip_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sdf_mip_layout"),
            entries: &[
                volume_read_layout_entry(
                    2,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::ShaderStages::COMPUTE,
                ),
                volume_read_layout_entry(3, wgpu::TextureSampleType::Uint, wgpu::ShaderStages::COMPUTE),
                storage_texture_layout_entry(4, wgpu::TextureFormat::R32Float, wgpu::TextureViewDimension::D3),
                storage_texture_layout_entry(5, wgpu::TextureFormat::R32Uint, wgpu::TextureViewDimension::D3),
            ],
        });

        let pipeline_layout = |label: &str, groups: &[&wgpu::BindGroupLayout]| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: groups,
                immediate_size: 0,
            })
        };
        let append_layout = pipeline_layout("sdf_append_layout", &[&params_layout, &brush_layout, &cells_write_layout]);
        let scene_layout = pipeline_layout(
            "sdf_scene_volume_layout",
            &[&params_layout, &brush_layout, &cells_read_layout, &volume_layout],
        );
        let mip_dispatch_layout = pipeline_layout(
            "sdf_mip_dispatch_layout",
            &[&params_layout, &brush_layout, &cells_write_layout, &mip_layout],
        );
        let mip_map_layout = pipeline_layout(
            "sdf_mip_map_layout",
            &[&params_layout, &brush_layout, &cells_read_layout, &mip_layout],
        );

        let storage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::INDIRECT
            | wgpu::BufferUsages::COPY_DST
            | wgpu::BufferUsages::COPY_SRC;

        Ok(Self {
            texture_util,
            mat_volume: create_compute_pipeline(device, "generate_mat_volume", &append_layout, &shader, "generate_mat_volume"),
            indirect_args: create_compute_pipeline(device, "generate_indirect_args", &append_layout, &shader, "generate_indirect_args"),
            scene_volume: create_compute_pipeline(device, "generate_scene_volume", &scene_layout, &shader, "generate_scene_volume"),
            mip_dispatch: create_compute_pipeline(device, "generate_mip_dispatch", &mip_dispatch_layout, &shader, "generate_mip_dispatch"),
            mip_map: create_compute_pipeline(device, "generate_mip_map", &mip_map_layout, &shader, "generate_mip_map"),
            params_layout,
            brush_layout,
            cells_write_layout,
            cells_read_layout,
            volume_layout,
            mip_layout,
            params: arena.register(),
            state: SceneState::Unloaded,
            scene_info: None,
            scene_volume_texture: None,
            material_volume_texture: None,
            brush_buffers: None,
            cell_lists: CELL_LIST_LABELS
                .iter()
                .map(|&label| ReservedBuffer::new(label, storage))
                .collect(),
            brush_indices: ReservedBuffer::new("sdf_brush_indices", storage),
        })
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn scene_info(&self) -> Option<&LoadedScene> {
        self.scene_info.as_ref()
    }

    /// Volumes of the loaded scene
    pub fn volumes(&self) -> Option<SceneVolumes<'_>> {
        if self.state != SceneState::Loaded {
            return None;
        }
        match (&self.scene_volume_texture, &self.material_volume_texture) {
            (Some(scene), Some(material)) => Some(SceneVolumes { scene, material }),
            _ => None,
        }
    }

    /// Cell list of a mip level, for inspection
    pub(crate) fn cell_list(&self, level: u32) -> Option<&wgpu::Buffer> {
        self.cell_lists.get(level as usize).and_then(ReservedBuffer::buffer)
    }

    /// Generate the volumes for `scene`
    ///
    /// A scene without brushes loads as a no-op: nothing is allocated and
    /// `volumes()` stays `None`. Loading twice without `unload` panics.
    pub fn load_scene(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        scene: &SdfScene,
    ) -> Result<()> {
        self.state.begin_load();

        if scene.is_empty() {
            log::info!("SDF scene has no brushes; nothing to generate");
            self.state = SceneState::Loaded;
            return Ok(());
        }

        match self.generate(device, queue, arena, scene) {
            Ok(()) => {
                self.state = SceneState::Loaded;
                Ok(())
            }
            Err(e) => {
                self.release();
                self.state = SceneState::Unloaded;
                Err(e)
            }
        }
    }

    fn generate(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        scene: &SdfScene,
    ) -> Result<()> {
        scene.validate()?;
        let flat = scene.brushes.flatten()?;
        let mat_size = scene.material_size();

        let realloc_scene = reserve_volume(
            &mut self.scene_volume_texture,
            device,
            "sdf_scene_volume",
            wgpu::TextureFormat::R32Float,
            scene.size,
            SCENE_MIP_COUNT,
        );
        let realloc_material = reserve_volume(
            &mut self.material_volume_texture,
            device,
            "sdf_material_volume",
            wgpu::TextureFormat::R32Uint,
            mat_size,
            SCENE_MIP_COUNT,
        );
        log::debug!("SDF volumes reallocated: scene={realloc_scene}, material={realloc_material}");

        let (Some(scene_volume), Some(material_volume)) = (&self.scene_volume_texture, &self.material_volume_texture)
        else {
            return Err(Error::Gpu("SDF volumes were not allocated".into()));
        };
        assert_volume_shapes(
            scene_volume.size(),
            scene_volume.mip_count(),
            material_volume.size(),
            material_volume.mip_count(),
        );

        self.brush_buffers = Some(upload_brushes(device, queue, &flat));

        // One entry per material cell at most; each level gets its own list
        for (level, list) in self.cell_lists.iter_mut().enumerate() {
            let cells = mip_extent(mat_size, level as u32);
            let entries = (cells.x * cells.y * cells.z) as u64;
            list.reserve(device, entries + 1, CELL_LIST_HEADER_WORDS * 4);
            if let Some(buffer) = list.buffer() {
                queue.write_buffer(buffer, 0, bytemuck::cast_slice(&CELL_LIST_SEED));
            }
        }

        // Slot 0 is reserved so an offset of zero never names a real list
        let mat_cells = (mat_size.x * mat_size.y * mat_size.z) as u64;
        let index_capacity = mat_cells * MAX_BRUSH_COUNT_FACTOR as u64 + 1;
        self.brush_indices.reserve(device, index_capacity + 1, 4);
        if let Some(buffer) = self.brush_indices.buffer() {
            queue.write_buffer(buffer, 0, bytemuck::bytes_of(&1u32));
        }

        let params = SdfGenerationParams::new(scene, flat.brushes.len() as u32, index_capacity as u32);
        arena.update(queue, self.params, &params);
        self.texture_util.set_clear_values(queue, arena, 1.0, 0);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sdf_generation_encoder"),
        });
        self.texture_util.clear_all_mips(device, &mut encoder, arena, scene_volume);
        self.texture_util.clear_all_mips(device, &mut encoder, arena, material_volume);
        self.record_generation(device, &mut encoder, arena, scene_volume, material_volume, mat_size)?;
        queue.submit(Some(encoder.finish()));

        self.scene_info = Some(LoadedScene {
            size: scene.size,
            origin: scene.origin,
            grid_size: scene.grid_size,
            brush_count: flat.brushes.len() as u32,
        });
        log::info!(
            "SDF scene loaded: {} brushes, scene volume {}, material volume {}, {} mips",
            flat.brushes.len(),
            scene.size,
            mat_size,
            SCENE_MIP_COUNT
        );
        Ok(())
    }

    fn record_generation(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        arena: &ConstantBufferArena,
        scene_volume: &VolumeTexture,
        material_volume: &VolumeTexture,
        mat_size: UVec3,
    ) -> Result<()> {
        let (Some(brushes), Some(indices)) = (&self.brush_buffers, self.brush_indices.buffer()) else {
            return Err(Error::Gpu("generation buffers missing".into()));
        };
        let lists = self
            .cell_lists
            .iter()
            .map(|l| l.buffer())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Gpu("cell list buffers missing".into()))?;

        let params_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sdf_params_bind_group"),
            layout: &self.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: arena.binding(self.params),
            }],
        });
        let brush_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sdf_brush_bind_group"),
            layout: &self.brush_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: brushes.brushes.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: brushes.parameters.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: brushes.samples.as_entire_binding() },
            ],
        });
        let write_groups: Vec<_> = lists
            .iter()
            .map(|list| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("sdf_cells_write_bind_group"),
                    layout: &self.cells_write_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: list.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: indices.as_entire_binding() },
                    ],
                })
            })
            .collect();
        let read_groups: Vec<_> = lists
            .iter()
            .map(|list| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("sdf_cells_read_bind_group"),
                    layout: &self.cells_read_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 2, resource: list.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: indices.as_entire_binding() },
                    ],
                })
            })
            .collect();
        let volume_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sdf_volume_bind_group"),
            layout: &self.volume_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(scene_volume.mip_view(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(material_volume.mip_view(0)),
                },
            ],
        });
        let mip_groups: Vec<_> = (0..SCENE_MIP_COUNT - 1)
            .map(|level| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("sdf_mip_bind_group"),
                    layout: &self.mip_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(scene_volume.mip_view(level)),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::TextureView(material_volume.mip_view(level)),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: wgpu::BindingResource::TextureView(scene_volume.mip_view(level + 1)),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: wgpu::BindingResource::TextureView(material_volume.mip_view(level + 1)),
                        },
                    ],
                })
            })
            .collect();

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("sdf_generation"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &params_group, &[]);
        pass.set_bind_group(1, &brush_group, &[]);

        let tiles = kernel_groups(mat_size);
        pass.set_pipeline(&self.mat_volume);
        pass.set_bind_group(2, &write_groups[0], &[]);
        pass.dispatch_workgroups(tiles.x, tiles.y, tiles.z);

        pass.set_pipeline(&self.indirect_args);
        pass.dispatch_workgroups(1, 1, 1);

        pass.set_pipeline(&self.scene_volume);
        pass.set_bind_group(2, &read_groups[0], &[]);
        pass.set_bind_group(3, &volume_group, &[]);
        pass.dispatch_workgroups_indirect(lists[0], CELL_LIST_ARGS_OFFSET);

        for level in 0..(SCENE_MIP_COUNT - 1) as usize {
            let next = level + 1;
            let groups = kernel_groups(mip_extent(mat_size, next as u32));

            pass.set_pipeline(&self.mip_dispatch);
            pass.set_bind_group(2, &write_groups[next], &[]);
            pass.set_bind_group(3, &mip_groups[level], &[]);
            pass.dispatch_workgroups(groups.x, groups.y, groups.z);

            pass.set_pipeline(&self.indirect_args);
            pass.dispatch_workgroups(1, 1, 1);

            pass.set_pipeline(&self.mip_map);
            pass.set_bind_group(2, &read_groups[next], &[]);
            pass.dispatch_workgroups_indirect(lists[next], CELL_LIST_ARGS_OFFSET);
        }
        Ok(())
    }

    /// Release every volume and buffer; a second unload only warns
    pub fn unload(&mut self) {
        if !self.state.unload() {
            log::warn!("SDF scene is double unloaded");
            return;
        }
        self.release();
        log::info!("SDF scene unloaded");
    }

    fn release(&mut self) {
        self.scene_volume_texture = None;
        self.material_volume_texture = None;
        self.brush_buffers = None;
        self.scene_info = None;
        for list in &mut self.cell_lists {
            list.release();
        }
        self.brush_indices.release();
    }
}

/// Workgroups covering `cells` material cells with the 4^3 kernels
fn kernel_groups(cells: UVec3) -> UVec3 {
    (cells + UVec3::splat(GENERATE_MAT_VOLUME_KERNEL_SIZE - 1)) / GENERATE_MAT_VOLUME_KERNEL_SIZE
}

fn upload_brushes(device: &wgpu::Device, queue: &wgpu::Queue, flat: &FlattenedBrushes) -> BrushBuffers {
    BrushBuffers {
        brushes: create_storage_buffer(
            device,
            queue,
            "sdf_brushes",
            bytemuck::cast_slice(&flat.brushes),
            wgpu::BufferUsages::empty(),
        ),
        parameters: create_storage_buffer(
            device,
            queue,
            "sdf_brush_parameters",
            bytemuck::cast_slice(&flat.parameters),
            wgpu::BufferUsages::empty(),
        ),
        samples: create_storage_buffer(
            device,
            queue,
            "sdf_numerical_samples",
            bytemuck::cast_slice(&flat.samples),
            wgpu::BufferUsages::empty(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::readback::{read_texture_words, read_words};
    use crate::sdf::reference::{brush_distance, cell_brushes, cell_material, scene_texel, CullRadii};
    use crate::sdf::{indirect_args_for, Brush, BrushShape, BrushTransform, NumericalSdf};
    use glam::{Quat, Vec2, Vec3};

    #[test]
    fn test_state_transitions() {
        let mut state = SceneState::Unloaded;
        state.begin_load();
        assert_eq!(state, SceneState::Loading);
        state = SceneState::Loaded;
        assert!(state.unload());
        assert!(!state.unload());
    }

    #[test]
    #[should_panic(expected = "already loaded")]
    fn test_double_load_is_fatal() {
        let mut state = SceneState::Loaded;
        state.begin_load();
    }

    fn setup() -> Option<(crate::render::context::GpuContext, ConstantBufferArena, SdfGenerationPipeline)> {
        let gpu = crate::render::context::test_context()?;
        let mut arena = ConstantBufferArena::new(&gpu.device);
        let pipeline = SdfGenerationPipeline::new(&gpu.device, &mut arena).unwrap();
        arena.finalize(&gpu.device);
        Some((gpu, arena, pipeline))
    }

    fn sphere_scene() -> SdfScene {
        SdfScene::new(UVec3::splat(64), Vec3::splat(-4.0), 0.25).with_brush(Brush::sphere(Vec3::ZERO, 2.0, 0))
    }

    fn texel_index(size: UVec3, t: UVec3) -> usize {
        (t.x + size.x * (t.y + size.y * t.z)) as usize
    }

    #[test]
    fn test_sphere_scene_volume() {
        let Some((gpu, arena, mut pipeline)) = setup() else { return };
        let scene = sphere_scene();
        pipeline.load_scene(&gpu.device, &gpu.queue, &arena, &scene).unwrap();
        assert_eq!(pipeline.state(), SceneState::Loaded);

        let volumes = pipeline.volumes().unwrap();
        assert_eq!(volumes.check(), Ok(()));
        let words = read_texture_words(&gpu.device, &gpu.queue, volumes.scene.texture(), 0, scene.size).unwrap();
        let value = |t: UVec3| f32::from_bits(words[texel_index(scene.size, t)]);

        assert_eq!(value(UVec3::splat(16)), -1.0);
        assert_eq!(value(UVec3::new(56, 16, 16)), 1.0);
        // Texel centered just inside the surface along x
        let near = value(UVec3::new(23, 16, 16));
        assert!(near > -1.0 && near < 1.0, "surface texel {near}");

        let mat_size = scene.material_size();
        let material = read_texture_words(&gpu.device, &gpu.queue, volumes.material.texture(), 0, mat_size).unwrap();
        assert_eq!(material[texel_index(mat_size, UVec3::splat(4))], 1);
        assert_eq!(material[texel_index(mat_size, UVec3::splat(15))], 0);
    }

    /// Overlapping sphere and rotated cube plus a scaled numerical torus
    fn mixed_scene() -> SdfScene {
        let mut scene = sphere_scene().with_brush(Brush {
            shape: BrushShape::Cube { size: Vec3::new(2.0, 1.5, 1.0) },
            transform: BrushTransform {
                position: Vec3::new(2.5, 0.0, 0.5),
                rotation: Quat::from_rotation_z(0.6) * Quat::from_rotation_x(0.3),
                scale: 1.5,
            },
            material: 1,
        });
        let torus = NumericalSdf::bake(UVec3::splat(16), |p| {
            Vec2::new(Vec2::new(p.x, p.y).length() - 0.25, p.z).length() - 0.1
        });
        let grid = scene.brushes.add_numerical(torus);
        scene.with_brush(Brush {
            shape: BrushShape::Numerical { grid },
            transform: BrushTransform {
                position: Vec3::new(7.0, 7.0, 6.0),
                rotation: Quat::from_rotation_y(0.4),
                scale: 4.0,
            },
            material: 2,
        })
    }

    #[test]
    fn test_mixed_brush_volume_matches_reference() {
        let Some((gpu, arena, mut pipeline)) = setup() else { return };
        let scene = mixed_scene();
        pipeline.load_scene(&gpu.device, &gpu.queue, &arena, &scene).unwrap();
        let volumes = pipeline.volumes().unwrap();
        let flat = scene.brushes.flatten().unwrap();

        let words = read_texture_words(&gpu.device, &gpu.queue, volumes.scene.texture(), 0, scene.size).unwrap();
        let mut inside = [0usize; 3];
        for z in 0..scene.size.z {
            for y in 0..scene.size.y {
                for x in 0..scene.size.x {
                    let t = UVec3::new(x, y, z);
                    let gpu_value = f32::from_bits(words[texel_index(scene.size, t)]);
                    let expected = scene_texel(&scene, &flat, t);
                    assert!((gpu_value - expected).abs() < 1e-3, "texel {t}: {gpu_value} vs {expected}");
                    if expected < 0.0 {
                        let p = scene.texel_center(t);
                        let nearest = (0..3)
                            .min_by(|&a, &b| {
                                brush_distance(&flat.brushes[a], &flat, p)
                                    .total_cmp(&brush_distance(&flat.brushes[b], &flat, p))
                            })
                            .unwrap_or(0);
                        inside[nearest] += 1;
                    }
                }
            }
        }
        // Every brush contributes interior texels
        assert!(inside.iter().all(|&n| n > 0), "interior texels per brush {inside:?}");

        let mat_size = scene.material_size();
        let material = read_texture_words(&gpu.device, &gpu.queue, volumes.material.texture(), 0, mat_size).unwrap();
        let radius = CullRadii::for_grid_size(scene.grid_size).grid;
        let mut seen = [false; 3];
        for z in 0..mat_size.z {
            for y in 0..mat_size.y {
                for x in 0..mat_size.x {
                    let cell = UVec3::new(x, y, z);
                    // Near-ties and cells on the culling boundary may resolve either way on the GPU
                    let center = scene.cell_center(cell);
                    let all: Vec<f32> = flat.brushes.iter().map(|b| brush_distance(b, &flat, center)).collect();
                    if all.iter().any(|d| (d - radius).abs() < 1e-3) {
                        continue;
                    }
                    let mut d: Vec<f32> = cell_brushes(&scene, &flat, cell, radius)
                        .iter()
                        .map(|&i| all[i as usize])
                        .collect();
                    d.sort_by(f32::total_cmp);
                    if d.len() > 1 && d[1] - d[0] < 1e-3 {
                        continue;
                    }
                    let expected = cell_material(&scene, &flat, cell);
                    assert_eq!(material[texel_index(mat_size, cell)], expected, "cell {cell}");
                    if expected > 0 {
                        seen[expected as usize - 1] = true;
                    }
                }
            }
        }
        assert_eq!(seen, [true; 3]);
    }

    #[test]
    fn test_kernel_groups() {
        assert_eq!(kernel_groups(UVec3::new(16, 8, 1)), UVec3::new(4, 2, 1));
        assert_eq!(kernel_groups(UVec3::new(5, 4, 3)), UVec3::new(2, 1, 1));
    }

    #[test]
    fn test_mip_chain_is_conservative() {
        let Some((gpu, arena, mut pipeline)) = setup() else { return };
        let scene = sphere_scene();
        pipeline.load_scene(&gpu.device, &gpu.queue, &arena, &scene).unwrap();
        let volumes = pipeline.volumes().unwrap();

        // Mip 1 texel 8 spans world [0, 0.5); the whole texel is inside
        let size1 = volumes.scene.mip_size(1);
        let mip1 = read_texture_words(&gpu.device, &gpu.queue, volumes.scene.texture(), 1, size1).unwrap();
        let center = f32::from_bits(mip1[texel_index(size1, UVec3::splat(8))]);
        assert!(center < 0.0, "mip 1 center {center}");

        // A coarse texel left empty must really be a full band from the surface
        let g = scene.grid_size;
        for level in 1..SCENE_MIP_COUNT {
            let size = volumes.scene.mip_size(level);
            let words = read_texture_words(&gpu.device, &gpu.queue, volumes.scene.texture(), level, size).unwrap();
            let texel_world = g * (1 << level) as f32;
            for z in 0..size.z {
                for y in 0..size.y {
                    for x in 0..size.x {
                        let t = UVec3::new(x, y, z);
                        let n = f32::from_bits(words[texel_index(size, t)]);
                        if n < 1.0 {
                            continue;
                        }
                        let p = scene.origin + (t.as_vec3() + 0.5) * texel_world;
                        let d = p.length() - 2.0;
                        assert!(d + 0.05 >= 4.0 * texel_world, "mip {level} texel {t} empty at distance {d}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_sparse_cells_and_indirect_args() {
        let Some((gpu, arena, mut pipeline)) = setup() else { return };
        let scene = sphere_scene();
        pipeline.load_scene(&gpu.device, &gpu.queue, &arena, &scene).unwrap();

        let list = pipeline.cell_list(0).unwrap();
        let header = read_words(&gpu.device, &gpu.queue, list, 0, 4).unwrap();
        let count = header[0];
        assert!(count > 0);
        assert_eq!(header[1..4], indirect_args_for(count, 1));

        let entries = read_words(&gpu.device, &gpu.queue, list, 4, count as u64 * 4).unwrap();
        let cells: Vec<UVec3> = entries.chunks_exact(4).map(|e| UVec3::new(e[0], e[1], e[2])).collect();
        assert!(cells.contains(&UVec3::splat(4)));
        assert!(!cells.contains(&UVec3::splat(15)));

        let flat = scene.brushes.flatten().unwrap();
        let radius = CullRadii::for_grid_size(scene.grid_size).grid;
        for (cell, entry) in cells.iter().zip(entries.chunks_exact(4)) {
            assert_eq!(entry[3] & 31, 1, "one brush per cell");
            assert!(entry[3] >> 5 >= 1, "brush offset skips the reserved slot");
            // Skip cells sitting on the culling boundary where rounding may differ
            let center = scene.cell_center(*cell);
            if (center.length() - 2.0 - radius).abs() > 1e-3 {
                assert_eq!(cell_brushes(&scene, &flat, *cell, radius), vec![0]);
            }
        }
    }

    #[test]
    fn test_empty_scene_allocates_nothing() {
        let Some((gpu, arena, mut pipeline)) = setup() else { return };
        let scene = SdfScene::new(UVec3::splat(64), Vec3::ZERO, 1.0);
        pipeline.load_scene(&gpu.device, &gpu.queue, &arena, &scene).unwrap();
        assert_eq!(pipeline.state(), SceneState::Loaded);
        assert!(pipeline.volumes().is_none());
        assert!(pipeline.cell_list(0).is_none());

        pipeline.unload();
        assert_eq!(pipeline.state(), SceneState::Unloaded);
        // Second unload only warns
        pipeline.unload();
    }

    #[test]
    fn test_invalid_scene_returns_to_unloaded() {
        let Some((gpu, arena, mut pipeline)) = setup() else { return };
        let scene = SdfScene::new(UVec3::new(64, 48, 64), Vec3::ZERO, 1.0).with_brush(Brush::sphere(Vec3::ZERO, 1.0, 0));
        assert!(pipeline.load_scene(&gpu.device, &gpu.queue, &arena, &scene).is_err());
        assert_eq!(pipeline.state(), SceneState::Unloaded);

        // A valid scene can still be loaded afterwards
        pipeline.load_scene(&gpu.device, &gpu.queue, &arena, &sphere_scene()).unwrap();
        assert!(pipeline.volumes().is_some());
    }
}
