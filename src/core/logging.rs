//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable.
///
/// # Example
/// ```
/// antares::core::logging::init();
/// log::info!("Renderer started");
/// ```
pub fn init() {
    // Tests and the demo may both call this; only the first wins.
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
