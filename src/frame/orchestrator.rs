//! Per-camera frame orchestration
//!
//! A frame for one camera runs: cull opaque boxes, submit ray marching,
//! clear the shading target (optionally drawing the sky), rasterize opaque
//! boxes and debug particles into the G-buffer, compose G-buffer and ray
//! march results into shading, then blit shading to the camera's output.
//!
//! Ray marching is submitted on its own and yields a [`ComputeFence`]; the
//! compose pass can only reach the march outputs through that fence, so it
//! is always recorded into a later submission.

use crate::core::camera::Camera;
use crate::core::config::EngineConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::fluid::physics::PhysicsScene;
use crate::fluid::solver::SolverState;
use crate::frame::blit::BlitPipeline;
use crate::frame::deferred::DeferredPipeline;
use crate::frame::opaque::{cull_boxes, OpaquePipeline};
use crate::frame::params::{frame_layout, FrameParams};
use crate::frame::particles::ParticleDebugPipeline;
use crate::frame::registry::{Activation, SceneId, SceneRegistry};
use crate::frame::targets::TransientTargets;
use crate::math::Frustum;
use crate::raymarch::{RayMarchParams, RayMarchPipeline, RayMarchTargets};
use crate::render::arena::{ConstantBufferArena, Segment};
use crate::scene::SceneDescription;
use crate::sdf::{SceneState, SdfGenerationPipeline};

/// Marks the submission that produced a set of ray march outputs
pub struct ComputeFence<'a> {
    outputs: &'a RayMarchTargets,
    submission: wgpu::SubmissionIndex,
}

impl<'a> ComputeFence<'a> {
    /// Submit `encoder` and fence the outputs it writes
    pub fn signal(queue: &wgpu::Queue, encoder: wgpu::CommandEncoder, outputs: &'a RayMarchTargets) -> Self {
        let submission = queue.submit(Some(encoder.finish()));
        Self { outputs, submission }
    }

    /// March outputs; commands recorded after the fence may sample them
    pub fn outputs(&self) -> &'a RayMarchTargets {
        self.outputs
    }

    pub fn submission(&self) -> &wgpu::SubmissionIndex {
        &self.submission
    }

    /// Block the CPU until the fenced work has finished
    pub fn wait(&self, device: &wgpu::Device) -> Result<()> {
        device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(self.submission.clone()),
                timeout: None,
            })
            .map_err(|e| Error::Gpu(e.to_string()))?;
        Ok(())
    }
}

/// What fills the shading target before geometry is composed
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Background {
    Skybox,
    Color(wgpu::Color),
}

/// Output surface of one camera
pub struct CameraTarget<'a> {
    pub view: &'a wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    /// Write rows bottom to top, for consumers with a bottom-left origin
    pub flip_y: bool,
    pub background: Background,
}

impl<'a> CameraTarget<'a> {
    /// Swap chain image; always upright
    pub fn surface(view: &'a wgpu::TextureView, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        Self {
            view,
            format,
            width,
            height,
            flip_y: false,
            background: Background::Skybox,
        }
    }

    /// Offscreen texture
    pub fn texture(view: &'a wgpu::TextureView, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        Self::surface(view, format, width, height)
    }

    pub fn flipped(mut self) -> Self {
        self.flip_y = true;
        self
    }

    pub fn with_background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }
}

/// What a `render` call did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// False when there was nothing to render
    pub rendered: bool,
    /// Whether the scene volume was ray marched
    pub marched: bool,
    pub visible_boxes: u32,
    pub culled_boxes: u32,
    pub particles: bool,
}

pub struct FrameOrchestrator {
    config: EngineConfig,
    arena: ConstantBufferArena,
    sdf: SdfGenerationPipeline,
    marcher: RayMarchPipeline,
    physics: PhysicsScene,
    deferred: DeferredPipeline,
    opaque: OpaquePipeline,
    particles: ParticleDebugPipeline,
    blit: BlitPipeline,
    frame_layout: wgpu::BindGroupLayout,
    frame_params: Segment<FrameParams>,
    targets: TransientTargets,
    scenes: SceneRegistry<SceneDescription>,
}

impl FrameOrchestrator {
    pub fn new(device: &wgpu::Device, config: EngineConfig) -> Result<Self> {
        let mut arena = ConstantBufferArena::new(device);
        let sdf = SdfGenerationPipeline::new(device, &mut arena)?;
        let marcher = RayMarchPipeline::new(device, &mut arena)?;
        let physics = PhysicsScene::new(device, &mut arena, &config)?;
        let blit = BlitPipeline::new(device, &mut arena)?;
        let frame_params = arena.register();
        arena.finalize(device);

        let frame_layout = frame_layout(device);
        let deferred = DeferredPipeline::new(device, &frame_layout)?;
        let opaque = OpaquePipeline::new(device, &frame_layout)?;
        let particles = ParticleDebugPipeline::new(device, &frame_layout)?;

        log::info!(
            "frame orchestrator ready: {} constant segments, {} bytes",
            arena.layout().segment_count(),
            arena.layout().total_size()
        );

        Ok(Self {
            config,
            arena,
            sdf,
            marcher,
            physics,
            deferred,
            opaque,
            particles,
            blit,
            frame_layout,
            frame_params,
            targets: TransientTargets::new(),
            scenes: SceneRegistry::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sdf(&self) -> &SdfGenerationPipeline {
        &self.sdf
    }

    pub fn physics(&self) -> &PhysicsScene {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut PhysicsScene {
        &mut self.physics
    }

    pub fn scenes(&self) -> &SceneRegistry<SceneDescription> {
        &self.scenes
    }

    pub fn register_scene(&mut self, scene: SceneDescription) -> SceneId {
        let id = self.scenes.register(scene);
        log::debug!("registered {id}");
        id
    }

    /// Make `id` the active scene, unloading whichever scene was active
    pub fn activate_scene(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, id: SceneId) -> Result<()> {
        match self.scenes.activate(id)? {
            Activation::Unchanged => return Ok(()),
            Activation::Replaced(previous) => {
                if let Some(previous) = previous {
                    log::info!("replacing {previous} with {id}");
                }
                self.release_gpu_state();
            }
        }

        let Some(scene) = self.scenes.get(id) else {
            return Err(Error::Scene(format!("{id} is not registered")));
        };

        if let Err(e) = self.sdf.load_scene(device, queue, &self.arena, &scene.sdf) {
            self.scenes.deactivate();
            return Err(e);
        }

        if let Some(domain) = &scene.physics {
            for emitter in &scene.emitters {
                self.physics.add_emitter(emitter.clone());
            }
            if let Err(e) = self.physics.load(device, queue, &self.arena, domain, &self.sdf) {
                self.release_gpu_state();
                self.scenes.deactivate();
                return Err(e);
            }
        }

        log::info!("activated {id} '{}'", scene.name);
        Ok(())
    }

    /// Unload the active scene; a second call only logs
    pub fn deactivate_scene(&mut self) {
        match self.scenes.deactivate() {
            Some(id) => {
                self.release_gpu_state();
                log::info!("deactivated {id}");
            }
            None => log::warn!("no active scene to deactivate; ignoring"),
        }
    }

    pub fn remove_scene(&mut self, id: SceneId) -> Option<SceneDescription> {
        if self.scenes.active_id() == Some(id) {
            self.release_gpu_state();
        }
        self.scenes.remove(id)
    }

    fn release_gpu_state(&mut self) {
        if self.physics.solver().state() == SolverState::Loaded {
            self.physics.unload();
        }
        self.physics.clear_emitters();
        if self.sdf.state() != SceneState::Unloaded {
            self.sdf.unload();
        }
        self.opaque.release();
        self.targets.clear();
    }

    /// Step physics for a frame of `frame_dt` seconds; returns fixed steps run
    pub fn update(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, frame_dt: f32) -> Result<u32> {
        if self.scenes.active_id().is_none() {
            return Ok(0);
        }
        self.physics.update(device, queue, &self.arena, &self.sdf, frame_dt)
    }

    /// Render the active scene from `camera` into `target`
    ///
    /// A no-op returning default stats when no scene is active or its SDF
    /// scene is not loaded.
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        camera: &Camera,
        target: &CameraTarget<'_>,
    ) -> Result<FrameStats> {
        let Some((_, scene)) = self.scenes.active() else {
            log::debug!("no active scene; frame skipped");
            self.targets.clear();
            return Ok(FrameStats::default());
        };
        if self.sdf.state() != SceneState::Loaded {
            log::debug!("SDF scene not loaded; frame skipped");
            self.targets.clear();
            return Ok(FrameStats::default());
        }

        let (width, height) = (target.width.max(1), target.height.max(1));

        // Cull
        let frustum = Frustum::from_view_projection(&camera.view_projection());
        let visible = cull_boxes(&frustum, &scene.opaque);
        let mut stats = FrameStats {
            rendered: true,
            visible_boxes: visible.len() as u32,
            culled_boxes: (scene.opaque.len() - visible.len()) as u32,
            ..Default::default()
        };
        self.opaque.prepare(device, queue, &visible);

        let targets = self.targets.acquire(device, width, height);

        // Ray marching, in its own submission
        let mut compute = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ray_march_encoder"),
        });
        match (self.sdf.volumes(), self.sdf.scene_info()) {
            (Some(volumes), Some(info)) => {
                let params = RayMarchParams::new(camera, info, width, height, self.config.max_march_steps);
                self.marcher.update(queue, &self.arena, &params);
                self.marcher.record(device, &mut compute, &self.arena, volumes, &targets.march);
                stats.marched = true;
            }
            // Empty SDF scene: nothing is hit
            _ => clear_march_outputs(&mut compute, &targets.march),
        }
        let fence = ComputeFence::signal(queue, compute, &targets.march);

        self.arena
            .update(queue, self.frame_params, &FrameParams::new(camera, &self.config, width, height));
        self.blit.update(queue, &self.arena);
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_params_bind_group"),
            layout: &self.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.arena.binding(self.frame_params),
            }],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });

        let (skybox, clear) = match target.background {
            Background::Skybox => (true, wgpu::Color::BLACK),
            Background::Color(color) => (false, color),
        };
        self.deferred
            .record_background(&mut encoder, &frame_group, &targets, skybox, clear);

        let positions = if self.config.debug_particles && self.physics.is_enabled() {
            self.particles.bind_positions(device, self.physics.solver())
        } else {
            None
        };
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("geometry_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: targets.gbuffer0.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: targets.depth.view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            self.opaque.draw(&mut pass, &frame_group);
            if let Some(positions) = &positions {
                self.particles
                    .draw(&mut pass, &frame_group, positions, self.physics.solver());
                stats.particles = true;
            }
        }

        self.deferred
            .record_compose(device, &mut encoder, &frame_group, &targets, &fence);
        self.blit.record(
            device,
            &mut encoder,
            &self.arena,
            targets.shading.view(),
            target.view,
            target.format,
            target.flip_y,
        );
        queue.submit(Some(encoder.finish()));

        drop(fence);
        self.targets.release(targets);
        log::debug!("frame {width}x{height}: {stats:?}");
        Ok(stats)
    }
}

/// Reset the march outputs to "no hit" without dispatching
fn clear_march_outputs(encoder: &mut wgpu::CommandEncoder, outputs: &RayMarchTargets) {
    for (label, view) in [("clear_rm0", outputs.rm0.view()), ("clear_rm1", outputs.rm1.view())] {
        let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }
}
