//! GPU context, shared buffers and shader loading

pub mod context;
pub mod arena;
pub mod resources;
pub mod readback;
pub mod shaders;
pub mod texture_util;
