//! Shader registry
//!
//! The set of shaders is closed: each [`ShaderKind`] owns a WGSL source and
//! the entry points the host dispatches by name. A source missing any of
//! them fails initialization with [`Error::MissingKernel`].

use crate::core::error::Error;
use crate::core::types::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    TextureUtil,
    SdfGeneration,
    RayMarching,
    FluidSolver,
    ParticleDebug,
    Deferred,
    Opaque,
    Blit,
}

impl ShaderKind {
    pub const ALL: [ShaderKind; 8] = [
        ShaderKind::TextureUtil,
        ShaderKind::SdfGeneration,
        ShaderKind::RayMarching,
        ShaderKind::FluidSolver,
        ShaderKind::ParticleDebug,
        ShaderKind::Deferred,
        ShaderKind::Opaque,
        ShaderKind::Blit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShaderKind::TextureUtil => "texture_util",
            ShaderKind::SdfGeneration => "sdf_generation",
            ShaderKind::RayMarching => "ray_marching",
            ShaderKind::FluidSolver => "fluid_solver",
            ShaderKind::ParticleDebug => "particle_debug",
            ShaderKind::Deferred => "deferred",
            ShaderKind::Opaque => "opaque",
            ShaderKind::Blit => "blit",
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            ShaderKind::TextureUtil => include_str!("../../shaders/texture_util.wgsl"),
            ShaderKind::SdfGeneration => include_str!("../../shaders/sdf_generation.wgsl"),
            ShaderKind::RayMarching => include_str!("../../shaders/ray_marching.wgsl"),
            ShaderKind::FluidSolver => include_str!("../../shaders/fluid_solver.wgsl"),
            ShaderKind::ParticleDebug => include_str!("../../shaders/particle_debug.wgsl"),
            ShaderKind::Deferred => include_str!("../../shaders/deferred.wgsl"),
            ShaderKind::Opaque => include_str!("../../shaders/opaque.wgsl"),
            ShaderKind::Blit => include_str!("../../shaders/blit.wgsl"),
        }
    }

    /// Entry points the host looks up by name
    pub fn required_kernels(self) -> &'static [&'static str] {
        match self {
            ShaderKind::TextureUtil => &["clear_volume_f32", "clear_volume_u32"],
            ShaderKind::SdfGeneration => &[
                "generate_mat_volume",
                "generate_indirect_args",
                "generate_scene_volume",
                "generate_mip_dispatch",
                "generate_mip_map",
            ],
            ShaderKind::RayMarching => &["tiled_marching", "ray_marching"],
            ShaderKind::FluidSolver => &[
                "init_particle_pool",
                "add_particles",
                "clear_grid_level0",
                "clear_grid_level1",
                "generate_indirect_args0",
                "clear_partition_sums",
                "generate_particle_histogram",
                "generate_indirect_args1",
                "generate_particle_offsets",
                "sort_particles",
                "generate_indirect_args2",
                "particle_to_grid0",
                "particle_to_grid1",
                "solve_grid_level0",
                "solve_grid_level1",
                "grid_to_particle",
            ],
            ShaderKind::ParticleDebug => &["vs_particle", "fs_particle"],
            ShaderKind::Deferred => &["vs_fullscreen", "fs_skybox", "fs_compose"],
            ShaderKind::Opaque => &["vs_opaque", "fs_opaque"],
            ShaderKind::Blit => &["vs_fullscreen", "fs_blit"],
        }
    }

    /// Check that every required entry point is declared in `source`
    pub fn check_kernels(self, source: &str) -> Result<()> {
        let declared = entry_points(source);
        for &entry_point in self.required_kernels() {
            if !declared.contains(&entry_point) {
                return Err(Error::MissingKernel {
                    shader: self.name(),
                    entry_point,
                });
            }
        }
        Ok(())
    }

    /// Validate the kernel table and compile the module
    pub fn create_module(self, device: &wgpu::Device) -> Result<wgpu::ShaderModule> {
        self.check_kernels(self.source())?;
        Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(self.name()),
            source: wgpu::ShaderSource::Wgsl(self.source().into()),
        }))
    }
}

/// Names of functions marked `@compute`, `@vertex` or `@fragment`
pub fn entry_points(source: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut stage_pending = false;
    let mut tokens = source
        .lines()
        .map(|line| line.split("//").next().unwrap_or(""))
        .flat_map(str::split_whitespace);

    while let Some(token) = tokens.next() {
        if ["@compute", "@vertex", "@fragment"].iter().any(|s| token.starts_with(s)) {
            stage_pending = true;
        } else if token == "fn" {
            if let Some(name) = tokens.next() {
                if stage_pending {
                    names.push(name.split('(').next().unwrap_or(name));
                }
            }
            stage_pending = false;
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_scan() {
        let src = r#"
            fn helper(x: f32) -> f32 { return x; }
            // @compute fn commented_out() {}
            @compute @workgroup_size(64)
            fn first(@builtin(global_invocation_id) id: vec3<u32>) {}
            @vertex fn vs(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> { return vec4(0.0); }
            @fragment
            fn fs () -> @location(0) vec4<f32> { return vec4(1.0); }
        "#;
        assert_eq!(entry_points(src), vec!["first", "vs", "fs"]);
    }

    #[test]
    fn test_missing_kernel_is_reported() {
        let src = "@compute @workgroup_size(8, 8, 8) fn clear_volume_f32() {}";
        match ShaderKind::TextureUtil.check_kernels(src) {
            Err(Error::MissingKernel { shader, entry_point }) => {
                assert_eq!(shader, "texture_util");
                assert_eq!(entry_point, "clear_volume_u32");
            }
            other => panic!("expected missing kernel, got {other:?}"),
        }
    }

    #[test]
    fn test_bundled_sources_declare_all_kernels() {
        for kind in ShaderKind::ALL {
            kind.check_kernels(kind.source())
                .unwrap_or_else(|e| panic!("{}: {e}", kind.name()));
        }
    }
}
