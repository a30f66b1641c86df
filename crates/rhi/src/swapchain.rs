//! Swapchain management.
//!
//! [`Swapchain`] implements [`Presenter`] on a surface created by the host.
//! It owns the `VkSwapchainKHR`, its images and their views, and rebuilds
//! all of them in [`Presenter::recreate`] when the frame core handles an
//! out-of-date condition.
//!
//! Swapchain images are never rendered to directly by the geometry pass:
//! the core blits its draw image into them (`TRANSFER_DST`) and the UI
//! overlay draws on top (`COLOR_ATTACHMENT`).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::swapchain::Swapchain;
//! use renderer_rhi::vk;
//!
//! # fn host(
//! #     instance: &ash::Instance,
//! #     surface_loader: ash::khr::surface::Instance,
//! #     surface: vk::SurfaceKHR,
//! #     device: Arc<Device>,
//! # ) -> Result<(), renderer_rhi::RhiError> {
//! let swapchain = Swapchain::new(
//!     instance,
//!     device,
//!     surface_loader,
//!     surface,
//!     vk::Extent2D { width: 1700, height: 900 },
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::{AcquiredImage, Presenter};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Usage flags for swapchain images.
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_DST.as_raw() | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

/// Swapchain support details for a physical device and surface.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extent, transforms).
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the surface queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, min image count {}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything rebuilt together on creation and recreation.
struct SwapchainImages {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

/// Vulkan swapchain wrapper implementing [`Presenter`].
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    current: SwapchainImages,
}

impl Swapchain {
    /// Creates a swapchain for `surface`.
    ///
    /// The surface stays owned by the host and must outlive the swapchain.
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the surface and device belong to
    /// * `device` - Logical device; presentation uses its graphics queue
    /// * `surface_loader` - Surface extension loader
    /// * `surface` - Window surface
    /// * `requested` - Window size in pixels, used when the surface does not fix its extent
    ///
    /// # Errors
    ///
    /// Returns an error if surface support is inadequate or creation fails.
    pub fn new(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface_loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        requested: vk::Extent2D,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device.handle());

        let support = query_support(&device, &surface_loader, surface)?;
        let extent = choose_extent(&support.capabilities, requested.width, requested.height);
        if is_zero_extent(extent) {
            return Err(RhiError::SwapchainError(
                "Surface has a zero extent".to_string(),
            ));
        }

        let current = create_swapchain_images(
            &device,
            &swapchain_loader,
            &support,
            surface,
            extent,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            swapchain_loader,
            surface_loader,
            surface,
            current,
        })
    }

    /// Returns the Vulkan swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.current.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.current.format
    }

    /// Returns the selected present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.current.present_mode
    }

    fn destroy_current(&mut self) {
        destroy_image_views(&self.device, &mut self.current.image_views);
        if self.current.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.current.swapchain, None);
            }
            self.current.swapchain = vk::SwapchainKHR::null();
        }
    }
}

impl Presenter for Swapchain {
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquiredImage, vk::Result> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.current.swapchain,
                timeout_ns,
                signal,
                vk::Fence::null(),
            )?
        };
        Ok(AcquiredImage { index, suboptimal })
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, vk::Result> {
        let swapchains = [self.current.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.device.graphics_queue(), &present_info)
        }
    }

    #[inline]
    fn image(&self, index: u32) -> vk::Image {
        self.current.images[index as usize]
    }

    #[inline]
    fn image_view(&self, index: u32) -> vk::ImageView {
        self.current.image_views[index as usize]
    }

    #[inline]
    fn extent(&self) -> vk::Extent2D {
        self.current.extent
    }

    #[inline]
    fn image_count(&self) -> u32 {
        self.current.images.len() as u32
    }

    fn recreate(&mut self, requested: vk::Extent2D) -> RhiResult<vk::Extent2D> {
        info!(
            "Recreating swapchain for new size: {}x{}",
            requested.width, requested.height
        );

        let support = query_support(&self.device, &self.surface_loader, self.surface)?;
        let extent = choose_extent(&support.capabilities, requested.width, requested.height);
        if is_zero_extent(extent) {
            // Minimized: keep the current image set until the surface has area again.
            debug!("Surface extent is zero, keeping the current swapchain");
            return Ok(extent);
        }

        // Views go first; the old handle is handed to the driver for reuse.
        destroy_image_views(&self.device, &mut self.current.image_views);

        let replacement = create_swapchain_images(
            &self.device,
            &self.swapchain_loader,
            &support,
            self.surface,
            extent,
            self.current.swapchain,
        )?;

        let old = std::mem::replace(&mut self.current, replacement);
        unsafe {
            self.swapchain_loader.destroy_swapchain(old.swapchain, None);
        }

        Ok(self.current.extent)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let image_count = self.current.images.len();
        self.destroy_current();

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.current.extent.width, self.current.extent.height, image_count
        );
    }
}

fn query_support(
    device: &Device,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> RhiResult<SwapchainSupportDetails> {
    let support =
        SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)?;

    if !support.is_adequate() {
        return Err(RhiError::SwapchainError(
            "Inadequate swapchain support (no formats or present modes)".to_string(),
        ));
    }
    Ok(support)
}

/// Creates the swapchain, its images and views at `extent`, which must be
/// non-zero and already resolved against `support`.
fn create_swapchain_images(
    device: &Device,
    swapchain_loader: &ash::khr::swapchain::Device,
    support: &SwapchainSupportDetails,
    surface: vk::SurfaceKHR,
    extent: vk::Extent2D,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<SwapchainImages> {
    let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
        RhiError::SwapchainError("Surface reports no formats".to_string())
    })?;
    let present_mode = choose_present_mode(&support.present_modes);
    let image_count = determine_image_count(&support.capabilities);

    info!(
        "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
        extent.width, extent.height, surface_format.format, present_mode, image_count
    );

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(SWAPCHAIN_IMAGE_USAGE)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(support.capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };

    let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(e.into());
        }
    };
    info!("Swapchain created with {} images", images.len());

    let image_views = match create_image_views(device, &images, surface_format.format) {
        Ok(views) => views,
        Err(e) => {
            unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(e);
        }
    };

    Ok(SwapchainImages {
        swapchain,
        images,
        image_views,
        format: surface_format.format,
        extent,
        present_mode,
    })
}

fn destroy_image_views(device: &Device, image_views: &mut Vec<vk::ImageView>) {
    for image_view in image_views.drain(..) {
        unsafe {
            device.handle().destroy_image_view(image_view, None);
        }
    }
}

/// Chooses the surface format.
///
/// Prefers `B8G8R8A8_UNORM`, since the frame core blits a linear HDR draw
/// image into the swapchain, then `B8G8R8A8_SRGB`, then the first reported.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let find = |format: vk::Format| {
        formats
            .iter()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .copied()
    };

    if let Some(format) = find(vk::Format::B8G8R8A8_UNORM) {
        debug!("Selected preferred surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return Some(format);
    }

    if let Some(format) = find(vk::Format::B8G8R8A8_SRGB) {
        warn!("Using fallback surface format: B8G8R8A8_SRGB with SRGB_NONLINEAR");
        return Some(format);
    }

    let first = formats.first().copied();
    if let Some(format) = first {
        warn!("Using first available surface format: {:?}", format.format);
    }
    first
}

/// Chooses the present mode: FIFO (vsync), then MAILBOX.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::FIFO) {
        debug!("Selected FIFO present mode (vsync)");
        return vk::PresentModeKHR::FIFO;
    }

    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent.
///
/// If the surface does not fix its extent (width is `u32::MAX`), the
/// requested size is clamped to the surface's limits.
/// True while the surface has no area, e.g. a minimized window.
#[inline]
fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// One more image than the minimum, bounded by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                destroy_image_views(device, &mut image_views);
                return Err(RhiError::SwapchainError(format!(
                    "Failed to create image view {}: {:?}",
                    i, e
                )));
            }
        }
    }

    debug!("Created {} image views", image_views.len());
    Ok(image_views)
}
