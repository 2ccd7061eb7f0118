//! Scene and material volume pairing

use glam::UVec3;
use thiserror::Error;

use crate::render::resources::{mip_extent, VolumeTexture};
use crate::sdf::MAT_VOLUME_SCALE;

/// Ways a scene/material volume pair can disagree
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VolumeMismatch {
    #[error("scene volume has {scene} mips, material volume has {material}")]
    MipCount { scene: u32, material: u32 },

    #[error("mip {level}: scene volume {scene} is not {MAT_VOLUME_SCALE}x material volume {material}")]
    Scale { level: u32, scene: UVec3, material: UVec3 },
}

/// Check that both chains have the same length and the scene volume is
/// exactly `MAT_VOLUME_SCALE` times finer at every level
pub fn check_volume_shapes(
    scene_size: UVec3,
    scene_mips: u32,
    material_size: UVec3,
    material_mips: u32,
) -> Result<(), VolumeMismatch> {
    if scene_mips != material_mips {
        return Err(VolumeMismatch::MipCount {
            scene: scene_mips,
            material: material_mips,
        });
    }
    for level in 0..scene_mips {
        let scene = mip_extent(scene_size, level);
        let material = mip_extent(material_size, level);
        if scene != material * MAT_VOLUME_SCALE {
            return Err(VolumeMismatch::Scale { level, scene, material });
        }
    }
    Ok(())
}

/// Fatal variant used before generation; a mismatch is a setup bug
pub fn assert_volume_shapes(scene_size: UVec3, scene_mips: u32, material_size: UVec3, material_mips: u32) {
    if let Err(e) = check_volume_shapes(scene_size, scene_mips, material_size, material_mips) {
        panic!("invalid scene volume pair: {e}");
    }
}

/// Borrowed view of a loaded scene's volumes
#[derive(Clone, Copy)]
pub struct SceneVolumes<'a> {
    /// Normalized signed distance, R32Float
    pub scene: &'a VolumeTexture,
    /// Material id + 1 per cell, R32Uint
    pub material: &'a VolumeTexture,
}

impl SceneVolumes<'_> {
    pub fn check(&self) -> Result<(), VolumeMismatch> {
        check_volume_pair(self.scene, self.material)
    }
}

pub fn check_volume_pair(scene: &VolumeTexture, material: &VolumeTexture) -> Result<(), VolumeMismatch> {
    check_volume_shapes(scene.size(), scene.mip_count(), material.size(), material.mip_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::SCENE_MIP_COUNT;

    #[test]
    fn test_matching_pair() {
        let scene = UVec3::new(64, 128, 64);
        assert_eq!(check_volume_shapes(scene, SCENE_MIP_COUNT, scene / 4, SCENE_MIP_COUNT), Ok(()));
    }

    #[test]
    fn test_mip_count_mismatch() {
        let scene = UVec3::splat(64);
        assert_eq!(
            check_volume_shapes(scene, 5, scene / 4, 4),
            Err(VolumeMismatch::MipCount { scene: 5, material: 4 })
        );
    }

    #[test]
    fn test_scale_mismatch() {
        // 32 pairs with 8 at mip 0 but breaks at mip 4 (2 vs 1)
        let err = check_volume_shapes(UVec3::splat(32), 5, UVec3::splat(8), 5).unwrap_err();
        assert!(matches!(err, VolumeMismatch::Scale { level: 4, .. }));

        let err = check_volume_shapes(UVec3::splat(64), 1, UVec3::splat(32), 1).unwrap_err();
        assert!(matches!(err, VolumeMismatch::Scale { level: 0, .. }));
    }

    #[test]
    #[should_panic(expected = "invalid scene volume pair")]
    fn test_mismatch_is_fatal() {
        assert_volume_shapes(UVec3::splat(64), 5, UVec3::splat(16), 3);
    }
}
