//! Vulkan logical device wrapper and gpu-allocator ownership.
//!
//! The host application performs instance creation, physical device
//! selection and `vkCreateDevice`. [`Device`] takes ownership of the
//! resulting `ash::Device` together with the graphics queue, initializes a
//! gpu-allocator on top of it, and implements the backend traits from
//! [`crate::backend`] in the sibling modules (`sync`, `command`,
//! `descriptor`, `buffer`, `image`).
//!
//! # Requirements
//!
//! The device must have been created with Vulkan 1.3 `dynamic_rendering`,
//! Vulkan 1.2 `buffer_device_address`, and the
//! `VK_KHR_swapchain` extension.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::device::Device;
//! use renderer_rhi::vk;
//!
//! # fn host(instance: &ash::Instance, device: ash::Device, gpu: vk::PhysicalDevice) {
//! let queue = unsafe { device.get_device_queue(0, 0) };
//! let device = Device::new(instance, device, gpu, queue, 0)
//!     .expect("Failed to wrap logical device");
//! device.wait_idle_blocking();
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{error, info};

use crate::error::{RhiError, RhiResult};

/// Device extensions the host must enable.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device, graphics queue and memory allocator.
///
/// # Thread Safety
///
/// The [`Device`] is shared through `Arc`. The allocator is protected by a
/// `Mutex`; queue submission is externally synchronized by the renderer,
/// which only submits from the thread that owns it.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator. Dropped before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Graphics queue handle. Also used for presentation and transfers.
    graphics_queue: vk::Queue,
    /// Family index of the graphics queue.
    graphics_family: u32,
}

impl Device {
    /// Wraps a host-created logical device.
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the device was created from
    /// * `device` - Logical device; ownership moves into the wrapper
    /// * `physical_device` - Physical device backing `device`
    /// * `graphics_queue` - Queue used for graphics, compute, transfer and present
    /// * `graphics_family` - Family index of `graphics_queue`
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator cannot be initialized. The device is
    /// destroyed in that case.
    pub fn new(
        instance: &ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        graphics_queue: vk::Queue,
        graphics_family: u32,
    ) -> RhiResult<Arc<Self>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        });

        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        info!(
            graphics_family,
            "GPU memory allocator initialized on host-provided device"
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            graphics_family,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Locks the allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if a previous holder panicked.
    pub fn allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::InvalidHandle("allocator mutex poisoned".into()))
    }

    /// Waits for the device to become idle, logging instead of returning failures.
    ///
    /// Used on teardown paths where there is no caller left to report to.
    pub fn wait_idle_blocking(&self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            error!("Failed to wait for device idle: {:?}", e);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.wait_idle_blocking();
        unsafe {
            // Allocations must already be freed; the allocator reports leaks on drop.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}
