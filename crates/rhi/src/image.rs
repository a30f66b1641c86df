//! Allocator-backed 2D images with a default view.
//!
//! Used for the draw and depth render targets and for any image the host
//! uploads through the frame core. Like buffers, images are destroyed
//! explicitly through [`ImageOps::destroy_image`].

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::backend::{GpuImage, ImageDesc, ImageOps};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Returns true for depth and depth/stencil formats.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM
            | vk::Format::D16_UNORM_S8_UINT
    )
}

/// An image, its default view and the memory bound to it.
pub struct AllocatedImage {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Allocation,
    extent: vk::Extent3D,
    format: vk::Format,
    name: &'static str,
}

impl GpuImage for AllocatedImage {
    #[inline]
    fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    fn format(&self) -> vk::Format {
        self.format
    }
}

impl Device {
    fn free_image_allocation(&self, allocation: Allocation, name: &str) {
        match self.allocator() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    error!("Failed to free {} image allocation: {:?}", name, e);
                }
            }
            Err(e) => error!("Failed to free {} image allocation: {}", name, e),
        }
    }
}

impl ImageOps for Device {
    type Image = AllocatedImage;

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<AllocatedImage> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "image '{}' dimensions must be greater than 0",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.handle().create_image(&image_info, None)? };
        let requirements = unsafe { self.handle().get_image_memory_requirements(image) };

        let allocation = self.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.free_image_allocation(allocation, desc.name);
            unsafe { self.handle().destroy_image(image, None) };
            return Err(e.into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = match unsafe { self.handle().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                self.free_image_allocation(allocation, desc.name);
                unsafe { self.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        debug!(
            "Created {} image: {}x{} ({:?})",
            desc.name, desc.extent.width, desc.extent.height, desc.format
        );

        Ok(AllocatedImage {
            image,
            view,
            allocation,
            extent: desc.extent,
            format: desc.format,
            name: desc.name,
        })
    }

    fn destroy_image(&self, image: AllocatedImage) {
        let AllocatedImage {
            image: handle,
            view,
            allocation,
            extent,
            name,
            ..
        } = image;

        // View depends on the image, the image on its memory.
        unsafe {
            self.handle().destroy_image_view(view, None);
            self.handle().destroy_image(handle, None);
        }
        self.free_image_allocation(allocation, name);

        debug!(
            "Destroyed {} image: {}x{}",
            name, extent.width, extent.height
        );
    }
}
