//! Error types for the antares renderer

use thiserror::Error;

/// Main error type for the renderer
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Window error: {0}")]
    Window(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A shader source lacks an entry point the host expects to dispatch
    #[error("shader `{shader}` has no entry point `{entry_point}`")]
    MissingKernel {
        shader: &'static str,
        entry_point: &'static str,
    },

    #[error("Scene error: {0}")]
    Scene(String),
}
