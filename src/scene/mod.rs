//! Scene descriptions loaded by the frame orchestrator

pub mod description;

pub use description::{CameraPose, SceneDescription};
