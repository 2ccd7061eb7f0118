//! antares - GPU signed-distance-field renderer with a particle-in-cell fluid

pub mod core;
pub mod math;
pub mod render;
pub mod sdf;
pub mod raymarch;
pub mod fluid;
pub mod frame;
pub mod scene;
