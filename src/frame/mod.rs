//! Frame orchestration and deferred composition
//!
//! Each camera gets a set of transient targets: depth, one G-buffer layer
//! and a shading target. Raster passes fill the G-buffer, ray marching fills
//! its own outputs on a separate submission, and a fullscreen compose pass
//! merges both into shading before it is blitted to the camera's output.

pub mod params;
pub mod registry;
pub mod targets;
pub mod deferred;
pub mod opaque;
pub mod particles;
pub mod blit;
pub mod orchestrator;

pub use params::{BlitParams, FrameParams};
pub use registry::{Activation, SceneId, SceneRegistry};
pub use targets::{FrameTargets, TransientTargets, DEPTH_FORMAT, GBUFFER0_FORMAT, SHADING_FORMAT};
pub use opaque::{BoxInstance, OpaqueBox};
pub use orchestrator::{Background, CameraTarget, ComputeFence, FrameOrchestrator, FrameStats};
