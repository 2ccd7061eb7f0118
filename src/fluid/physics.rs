//! Physics scene driver
//!
//! Owns the solver and the emitters and steps them at a fixed rate. Fluid
//! collides against the SDF scene volume, so physics only runs while an SDF
//! scene is loaded.

use crate::core::config::EngineConfig;
use crate::core::types::Result;
use crate::fluid::builder::EmitterBufferBuilder;
use crate::fluid::emitter::FluidEmitter;
use crate::fluid::params::FluidDomain;
use crate::fluid::solver::{FluidSolver, SolverState};
use crate::render::arena::ConstantBufferArena;
use crate::sdf::generation::{SceneState, SdfGenerationPipeline};

/// Fixed steps one `update` may run; the rest of a long frame is dropped
pub const MAX_STEPS_PER_FRAME: u32 = 4;

/// Fixed-rate accumulator
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedStep {
    step: f32,
    accumulated: f32,
}

impl FixedStep {
    pub fn new(step: f32) -> Self {
        assert!(step > 0.0, "fixed time step must be positive, got {step}");
        Self { step, accumulated: 0.0 }
    }

    pub fn step(&self) -> f32 {
        self.step
    }

    /// Add `frame_dt` and return how many whole steps are due
    pub fn advance(&mut self, frame_dt: f32) -> u32 {
        self.accumulated += frame_dt.max(0.0);
        let due = (self.accumulated / self.step).floor() as u32;
        let steps = due.min(MAX_STEPS_PER_FRAME);
        if due > steps {
            log::debug!("physics falling behind: dropping {} steps", due - steps);
            self.accumulated = 0.0;
        } else {
            self.accumulated -= steps as f32 * self.step;
        }
        steps
    }

    pub fn reset(&mut self) {
        self.accumulated = 0.0;
    }
}

pub struct PhysicsScene {
    solver: FluidSolver,
    emitters: Vec<FluidEmitter>,
    builder: EmitterBufferBuilder,
    clock: FixedStep,
    config: EngineConfig,
    enabled: bool,
}

impl PhysicsScene {
    /// Register the solver's parameter blocks; finalize the arena afterwards
    pub fn new(device: &wgpu::Device, arena: &mut ConstantBufferArena, config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            solver: FluidSolver::new(device, arena)?,
            emitters: Vec::new(),
            builder: EmitterBufferBuilder::new(),
            clock: FixedStep::new(config.physics_time_step),
            config: config.clone(),
            enabled: false,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn solver(&self) -> &FluidSolver {
        &self.solver
    }

    pub fn emitters(&self) -> &[FluidEmitter] {
        &self.emitters
    }

    pub fn emitters_mut(&mut self) -> &mut [FluidEmitter] {
        &mut self.emitters
    }

    /// Drop every emitter, e.g. before loading another scene's set
    pub fn clear_emitters(&mut self) {
        self.emitters.clear();
    }

    /// Returns the emitter's index
    pub fn add_emitter(&mut self, emitter: FluidEmitter) -> usize {
        self.emitters.push(emitter);
        self.emitters.len() - 1
    }

    /// Load the solver against the current SDF scene
    ///
    /// Returns false and stays disabled when no SDF scene is loaded.
    pub fn load(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        domain: &FluidDomain,
        sdf: &SdfGenerationPipeline,
    ) -> Result<bool> {
        if sdf.state() != SceneState::Loaded {
            log::warn!("physics scene needs a loaded SDF scene; physics disabled");
            self.enabled = false;
            return Ok(false);
        }
        if self.solver.state() == SolverState::Loaded {
            self.solver.unload();
        }

        // An empty SDF scene has no volume to collide with
        let scene_info = sdf.volumes().and(sdf.scene_info());
        self.solver
            .load(device, queue, arena, domain, &self.config.fluid, scene_info)?;
        self.clock.reset();
        self.enabled = true;
        log::info!("physics enabled with {} emitters", self.emitters.len());
        Ok(true)
    }

    /// Release the solver; emitters are kept for the next load
    pub fn unload(&mut self) {
        self.solver.unload();
        if self.enabled {
            log::info!("physics disabled");
        }
        self.enabled = false;
    }

    /// Run the fixed steps due after `frame_dt` seconds; returns the step count
    pub fn update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        sdf: &SdfGenerationPipeline,
        frame_dt: f32,
    ) -> Result<u32> {
        if !self.enabled {
            return Ok(0);
        }
        if sdf.state() != SceneState::Loaded {
            log::warn!("SDF scene was unloaded under the physics scene; physics disabled");
            self.unload();
            return Ok(0);
        }

        let steps = self.clock.advance(frame_dt);
        for _ in 0..steps {
            self.fixed_update(device, queue, arena, sdf, self.clock.step())?;
        }
        Ok(steps)
    }

    /// One physics tick: emit, then solve
    pub fn fixed_update(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        arena: &ConstantBufferArena,
        sdf: &SdfGenerationPipeline,
        dt: f32,
    ) -> Result<()> {
        for emitter in &mut self.emitters {
            emitter.elapse(dt);
        }

        self.builder.clear();
        self.builder.reserve(&self.emitters);
        self.builder.allocate();
        self.builder.add_emitters(&self.emitters);
        self.builder.submit();

        if self.solver.add_particles(device, queue, arena, &self.builder)? {
            for emitter in &mut self.emitters {
                emitter.clear_particles();
            }
        }

        let volume = sdf.volumes().map(|v| v.scene);
        self.solver.solve(device, queue, arena, dt, volume)
    }
}
