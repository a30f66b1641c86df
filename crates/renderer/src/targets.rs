//! Offscreen render targets.
//!
//! The frame core renders into its own draw image instead of the swapchain
//! image: a compute pass writes it as a storage image, the geometry pass
//! renders into it with a matching depth image, and the result is blitted
//! into the acquired swapchain image. Both images track the surface extent
//! and are rebuilt on resize.

use ash::vk;
use tracing::info;

use renderer_rhi::backend::{GpuImage, ImageDesc, ImageOps};

use crate::error::RenderResult;

/// Usage flags of the draw image.
pub const DRAW_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

/// Color and depth images the frame is rendered into.
pub struct RenderTargets<B: ImageOps> {
    draw: B::Image,
    depth: B::Image,
}

impl<B: ImageOps> RenderTargets<B> {
    /// Creates both targets at `extent`.
    ///
    /// # Errors
    ///
    /// Returns an error if either image cannot be created. Nothing is leaked.
    pub fn new(
        backend: &B,
        extent: vk::Extent2D,
        draw_format: vk::Format,
        depth_format: vk::Format,
    ) -> RenderResult<Self> {
        let extent_3d = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let draw = backend.create_image(&ImageDesc {
            extent: extent_3d,
            format: draw_format,
            usage: DRAW_IMAGE_USAGE,
            aspect: vk::ImageAspectFlags::COLOR,
            name: "draw_image",
        })?;

        let depth = match backend.create_image(&ImageDesc {
            extent: extent_3d,
            format: depth_format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            name: "depth_image",
        }) {
            Ok(depth) => depth,
            Err(e) => {
                backend.destroy_image(draw);
                return Err(e.into());
            }
        };

        info!(
            "Created render targets: {}x{} ({:?} + {:?})",
            extent.width, extent.height, draw_format, depth_format
        );

        Ok(Self { draw, depth })
    }

    /// The color draw image.
    #[inline]
    pub fn draw(&self) -> &B::Image {
        &self.draw
    }

    /// The depth image.
    #[inline]
    pub fn depth(&self) -> &B::Image {
        &self.depth
    }

    /// Extent shared by both images.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.draw.extent_2d()
    }

    /// Destroys both images. They must not be referenced by pending GPU work.
    pub fn destroy(self, backend: &B) {
        backend.destroy_image(self.depth);
        backend.destroy_image(self.draw);
    }
}
