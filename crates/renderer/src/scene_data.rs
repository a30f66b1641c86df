//! Per-frame scene uniform data.
//!
//! Layout shared with the geometry shaders. Hosts upload one
//! [`GpuSceneData`] per frame into a transient uniform buffer that lives on
//! the frame slot's deletion queue.
//!
//! # Memory Layout
//!
//! - Offset 0: view matrix (64 bytes)
//! - Offset 64: projection matrix (64 bytes)
//! - Offset 128: view-projection matrix (64 bytes)
//! - Offset 192: ambient color (16 bytes)
//! - Offset 208: sunlight direction, w = power (16 bytes)
//! - Offset 224: sunlight color (16 bytes)
//! - Total size: 240 bytes

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuSceneData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub ambient_color: Vec4,
    /// xyz direction, w intensity.
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl GpuSceneData {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds scene data from camera matrices with a default white sun.
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }

    /// Byte view for buffer uploads.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
