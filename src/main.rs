//! antares demo viewer
//!
//! Opens a window, loads a scene description (or the built-in demo scene)
//! and renders it every frame while the fluid simulation runs.
//!
//! Controls: arrows/WASD orbit, Q/E zoom, P pauses physics, Esc quits.

use std::path::PathBuf;
use std::sync::Arc;

use antares::core::camera::Camera;
use antares::core::config::EngineConfig;
use antares::core::error::Error;
use antares::core::logging;
use antares::core::time::FrameTimer;
use antares::core::types::Result;
use antares::frame::{CameraTarget, FrameOrchestrator};
use antares::render::context::GpuContext;
use antares::scene::SceneDescription;
use glam::Vec3;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

/// Radians per second of orbit while a key is held
const ORBIT_SPEED: f32 = 1.2;
/// Fraction of the distance covered per second of zoom
const ZOOM_SPEED: f32 = 0.8;

/// Camera circling a fixed target; Z is up
struct OrbitCamera {
    target: Vec3,
    yaw: f32,
    pitch: f32,
    distance: f32,
    camera: Camera,
}

impl OrbitCamera {
    fn new(scene: &SceneDescription, aspect: f32) -> Self {
        let pose = &scene.camera;
        let offset = pose.position - pose.target;
        let distance = offset.length().max(1.0);
        Self {
            target: pose.target,
            yaw: offset.y.atan2(offset.x),
            pitch: (offset.z / distance).clamp(-1.0, 1.0).asin(),
            distance,
            camera: pose.camera(aspect),
        }
    }

    fn apply(&mut self, held: &HeldKeys, dt: f32) {
        self.yaw += (held.right as i32 - held.left as i32) as f32 * ORBIT_SPEED * dt;
        self.pitch += (held.up as i32 - held.down as i32) as f32 * ORBIT_SPEED * dt;
        self.pitch = self.pitch.clamp(-1.5, 1.5);
        let zoom = (held.zoom_out as i32 - held.zoom_in as i32) as f32;
        self.distance = (self.distance * (1.0 + zoom * ZOOM_SPEED * dt)).clamp(1.0, 400.0);

        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let offset = Vec3::new(cos_pitch * cos_yaw, cos_pitch * sin_yaw, sin_pitch) * self.distance;
        self.camera.position = self.target + offset;
        self.camera.point_at(self.target, Vec3::Z);
    }
}

#[derive(Default)]
struct HeldKeys {
    left: bool,
    right: bool,
    up: bool,
    down: bool,
    zoom_in: bool,
    zoom_out: bool,
}

impl HeldKeys {
    /// Track a key; returns false for keys the orbit does not use
    fn set(&mut self, code: KeyCode, pressed: bool) -> bool {
        let slot = match code {
            KeyCode::ArrowLeft | KeyCode::KeyA => &mut self.left,
            KeyCode::ArrowRight | KeyCode::KeyD => &mut self.right,
            KeyCode::ArrowUp | KeyCode::KeyW => &mut self.up,
            KeyCode::ArrowDown | KeyCode::KeyS => &mut self.down,
            KeyCode::KeyQ => &mut self.zoom_in,
            KeyCode::KeyE => &mut self.zoom_out,
            _ => return false,
        };
        *slot = pressed;
        true
    }
}

struct App {
    config: EngineConfig,
    scene: Option<SceneDescription>,
    window: Option<Arc<Window>>,
    gpu: Option<GpuContext>,
    orchestrator: Option<FrameOrchestrator>,
    orbit: Option<OrbitCamera>,
    keys: HeldKeys,
    timer: FrameTimer,
    paused: bool,
}

impl App {
    fn new(config: EngineConfig, scene: SceneDescription) -> Self {
        Self {
            config,
            scene: Some(scene),
            window: None,
            gpu: None,
            orchestrator: None,
            orbit: None,
            keys: HeldKeys::default(),
            timer: FrameTimer::new(),
            paused: false,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let [width, height] = self.config.window_size;
        let window_attrs = Window::default_attributes()
            .with_title("antares")
            .with_inner_size(PhysicalSize::new(width, height));
        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .map_err(|e| Error::Window(e.to_string()))?,
        );

        let gpu = pollster::block_on(GpuContext::new(window.clone()))?;
        let size = window.inner_size();
        log::info!("Window created: {}x{}", size.width, size.height);

        let scene = self
            .scene
            .take()
            .ok_or_else(|| Error::Scene("scene already consumed".into()))?;
        let orbit = OrbitCamera::new(&scene, size.width.max(1) as f32 / size.height.max(1) as f32);

        let mut orchestrator = FrameOrchestrator::new(&gpu.device, self.config.clone())?;
        let id = orchestrator.register_scene(scene);
        orchestrator.activate_scene(&gpu.device, &gpu.queue, id)?;

        self.window = Some(window);
        self.gpu = Some(gpu);
        self.orchestrator = Some(orchestrator);
        self.orbit = Some(orbit);
        self.timer = FrameTimer::new();
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(gpu), Some(orchestrator), Some(orbit)) =
            (&mut self.gpu, &mut self.orchestrator, &mut self.orbit)
        else {
            return Ok(());
        };

        self.timer.tick();
        let dt = self.timer.delta_secs();
        orbit.apply(&self.keys, dt);

        if !self.paused {
            orchestrator.update(&gpu.device, &gpu.queue, dt)?;
        }

        let frame = match gpu.get_current_texture() {
            Ok(frame) => frame,
            Err(e) => {
                // Lost or outdated swap chain; reconfigure and try next frame
                log::warn!("skipping frame: {e}");
                let (width, height) = gpu.size();
                gpu.resize(width, height);
                return Ok(());
            }
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let (width, height) = gpu.size();
        let stats = orchestrator.render(
            &gpu.device,
            &gpu.queue,
            &orbit.camera,
            &CameraTarget::surface(&view, gpu.format(), width, height),
        )?;
        frame.present();

        if self.timer.frame_count() % 60 == 0 {
            if let Some(window) = &self.window {
                window.set_title(&format!(
                    "antares - {:.1} FPS | {} particles | {}/{} boxes{}",
                    self.timer.fps(),
                    stats.particles,
                    stats.visible_boxes,
                    stats.visible_boxes + stats.culled_boxes,
                    if self.paused { " | paused" } else { "" },
                ));
            }
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            log::error!("failed to start: {e}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Some(gpu) = &mut self.gpu {
                        gpu.resize(size.width, size.height);
                    }
                    if let Some(orbit) = &mut self.orbit {
                        orbit.camera.set_aspect(size.width as f32, size.height as f32);
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => {
                let pressed = state == ElementState::Pressed;
                if self.keys.set(code, pressed) || !pressed || repeat {
                    return;
                }
                match code {
                    KeyCode::Escape => event_loop.exit(),
                    KeyCode::KeyP => {
                        self.paused = !self.paused;
                        log::info!("physics {}", if self.paused { "paused" } else { "resumed" });
                    }
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    log::error!("frame failed: {e}");
                    event_loop.exit();
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(orchestrator) = &mut self.orchestrator {
            orchestrator.deactivate_scene();
        }
    }
}

/// Value following `--flag` or its short form
fn parse_path_arg(args: &[String], long: &str, short: &str) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == long || a == short)
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_path_arg(&args, "--config", "-c") {
        Some(path) => {
            log::info!("Loading config from: {}", path.display());
            EngineConfig::load(&path)?
        }
        None => EngineConfig::default(),
    };
    let scene = match parse_path_arg(&args, "--scene", "-s") {
        Some(path) => SceneDescription::load(&path)?,
        None => {
            log::info!("No --scene given; using the built-in demo scene");
            SceneDescription::demo()
        }
    };

    let event_loop = EventLoop::new().map_err(|e| Error::Window(e.to_string()))?;
    let mut app = App::new(config, scene);
    event_loop
        .run_app(&mut app)
        .map_err(|e| Error::Window(e.to_string()))
}

fn main() {
    logging::init();
    log::info!("antares starting...");

    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}
