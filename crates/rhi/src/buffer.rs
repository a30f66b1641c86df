//! Allocator-backed GPU buffers.
//!
//! [`AllocatedBuffer`] pairs a `VkBuffer` with its gpu-allocator allocation.
//! Buffers are not destroyed on drop: ownership ends either in a frame
//! deletion queue or at shutdown, both of which call
//! [`BufferOps::destroy_buffer`] once the GPU is known to be done with it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::backend::{BufferDesc, BufferOps, GpuBuffer};
//! use renderer_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let mut staging = device.create_buffer(&BufferDesc::staging(16))?;
//! staging.write(0, &[0u8; 16])?;
//! device.destroy_buffer(staging);
//! # Ok(())
//! # }
//! ```

use std::ops::Range;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::backend::{BufferDesc, BufferOps, GpuBuffer, MemoryResidency};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Validates an access of `len` bytes at `offset` into a buffer of `size` bytes.
pub fn checked_range(
    offset: vk::DeviceSize,
    len: usize,
    size: vk::DeviceSize,
) -> RhiResult<Range<usize>> {
    let end = offset.checked_add(len as vk::DeviceSize);
    match end {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(RhiError::OutOfBounds {
            offset,
            len: len as u64,
            size,
        }),
    }
}

/// A buffer and the memory bound to it.
pub struct AllocatedBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: vk::DeviceSize,
    residency: MemoryResidency,
    name: &'static str,
}

impl AllocatedBuffer {
    /// Debug name given at creation.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl GpuBuffer for AllocatedBuffer {
    #[inline]
    fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    fn residency(&self) -> MemoryResidency {
        self.residency
    }

    fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let range = checked_range(offset, data.len(), self.size)?;
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .ok_or(RhiError::MemoryNotMapped(self.name))?;

        mapped[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        let range = checked_range(offset, len, self.size)?;
        let mapped = self
            .allocation
            .mapped_slice()
            .ok_or(RhiError::MemoryNotMapped(self.name))?;

        Ok(mapped[range].to_vec())
    }
}

impl BufferOps for Device {
    type Buffer = AllocatedBuffer;

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<AllocatedBuffer> {
        if desc.size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "buffer '{}' must have a non-zero size",
                desc.name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.handle().get_buffer_memory_requirements(buffer) };

        let allocation = self.allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: desc.name,
                    requirements,
                    location: desc.residency.location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            if let Ok(mut allocator) = self.allocator() {
                let _ = allocator.free(allocation);
            }
            unsafe { self.handle().destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        debug!(
            "Created {} buffer: {} bytes ({:?})",
            desc.name, desc.size, desc.residency
        );

        Ok(AllocatedBuffer {
            buffer,
            allocation,
            size: desc.size,
            residency: desc.residency,
            name: desc.name,
        })
    }

    fn destroy_buffer(&self, buffer: AllocatedBuffer) {
        let AllocatedBuffer {
            buffer: handle,
            allocation,
            name,
            ..
        } = buffer;

        // Free allocation first, then destroy buffer
        match self.allocator() {
            Ok(mut allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    error!("Failed to free buffer allocation: {:?}", e);
                }
            }
            Err(e) => error!("Failed to free buffer allocation: {}", e),
        }

        unsafe {
            self.handle().destroy_buffer(handle, None);
        }

        debug!("Destroyed {} buffer", name);
    }
}
