//! Growable descriptor-set allocator.
//!
//! [`DescriptorAllocator`] hands out descriptor sets from a list of pools
//! without tracking individual sets. When the current pool runs out
//! (`ERROR_OUT_OF_POOL_MEMORY` or `ERROR_FRAGMENTED_POOL`) it is parked in
//! the `full` list and the next ready pool is tried; when none is left a new
//! pool is created, each one 1.5× larger than the previous up to
//! [`MAX_SETS_PER_POOL`]. [`DescriptorAllocator::reset_all`] reclaims every
//! set at once and moves all pools back to `ready`.
//!
//! Every frame slot owns one allocator and resets it after its fence
//! signals. The renderer owns one more, never reset, for long-lived sets.
//!
//! # Example
//!
//! ```no_run
//! use renderer_rhi::backend::DescriptorOps;
//! use renderer_rhi::vk;
//! use renderer_renderer::config::PoolConfig;
//! use renderer_renderer::descriptor_allocator::DescriptorAllocator;
//!
//! # fn example<D: DescriptorOps>(device: &D, layout: vk::DescriptorSetLayout)
//! #     -> renderer_renderer::RenderResult<()> {
//! let mut allocator = DescriptorAllocator::new(device, &PoolConfig::frame_default())?;
//! let set = allocator.allocate(device, layout)?;
//!
//! // Next time this slot is reused:
//! allocator.reset_all(device)?;
//! allocator.destroy(device);
//! # let _ = set;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, error};

use renderer_rhi::backend::DescriptorOps;
use renderer_rhi::vk_check;

use crate::config::{MAX_SETS_PER_POOL, POOL_GROWTH_FACTOR, PoolConfig, PoolSizeRatio};
use crate::error::{RenderError, RenderResult};

/// Computes the pool sizes for a pool holding `max_sets` sets.
///
/// Every type gets at least one descriptor.
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.ty,
            descriptor_count: ((ratio.ratio * max_sets as f32) as u32).max(1),
        })
        .collect()
}

/// Capacity of the pool created after one of `sets_per_pool` sets.
///
/// Always grows by at least one set until the ceiling.
pub fn next_pool_capacity(sets_per_pool: u32) -> u32 {
    let grown = (sets_per_pool as f32 * POOL_GROWTH_FACTOR) as u32;
    grown
        .max(sets_per_pool.saturating_add(1))
        .min(MAX_SETS_PER_POOL)
}

/// Returns true for the allocation failures that mean "try another pool".
#[inline]
pub fn is_pool_exhausted(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pool {
    handle: vk::DescriptorPool,
    max_sets: u32,
}

/// Growable, recyclable descriptor-set allocator.
///
/// Each pool is in exactly one of `ready` or `full`.
pub struct DescriptorAllocator {
    ratios: Vec<PoolSizeRatio>,
    ready: Vec<Pool>,
    full: Vec<Pool>,
    sets_per_pool: u32,
}

impl DescriptorAllocator {
    /// Creates the allocator and its first pool of `config.initial_sets` sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the first pool cannot be created.
    pub fn new<D: DescriptorOps + ?Sized>(device: &D, config: &PoolConfig) -> RenderResult<Self> {
        let initial = config.initial_sets.clamp(1, MAX_SETS_PER_POOL);
        let mut allocator = Self {
            ratios: config.ratios.clone(),
            ready: Vec::new(),
            full: Vec::new(),
            sets_per_pool: initial,
        };

        let pool = allocator.create_pool(device, initial)?;
        allocator.ready.push(pool);
        allocator.sets_per_pool = next_pool_capacity(initial);

        Ok(allocator)
    }

    fn create_pool<D: DescriptorOps + ?Sized>(
        &self,
        device: &D,
        max_sets: u32,
    ) -> RenderResult<Pool> {
        let sizes = pool_sizes(max_sets, &self.ratios);
        let handle = device.create_descriptor_pool(max_sets, &sizes)?;
        debug!("Descriptor allocator created pool of {} sets", max_sets);
        Ok(Pool { handle, max_sets })
    }

    /// Creates a pool at the current capacity and grows the capacity.
    fn create_next_pool<D: DescriptorOps + ?Sized>(&mut self, device: &D) -> RenderResult<Pool> {
        let pool = self.create_pool(device, self.sets_per_pool)?;
        self.sets_per_pool = next_pool_capacity(self.sets_per_pool);
        Ok(pool)
    }

    /// Allocates one set with `layout`.
    ///
    /// Ready pools are tried most recent first. Exhausted pools move to
    /// `full`. If every ready pool is exhausted a new pool is created; a
    /// failure from that fresh pool is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::DescriptorPoolExhausted`] if a fresh pool
    /// rejects the allocation, or the device error for any other failure.
    pub fn allocate<D: DescriptorOps + ?Sized>(
        &mut self,
        device: &D,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet> {
        while let Some(pool) = self.ready.pop() {
            match device.allocate_descriptor_set(pool.handle, layout) {
                Ok(set) => {
                    self.ready.push(pool);
                    return Ok(set);
                }
                Err(result) if is_pool_exhausted(result) => {
                    debug!(
                        "Descriptor pool of {} sets exhausted ({:?})",
                        pool.max_sets, result
                    );
                    self.full.push(pool);
                }
                Err(result) => {
                    self.ready.push(pool);
                    return Ok(vk_check(Err(result))?);
                }
            }
        }

        let pool = self.create_next_pool(device)?;
        let allocated = device.allocate_descriptor_set(pool.handle, layout);
        self.ready.push(pool);

        match allocated {
            Ok(set) => Ok(set),
            Err(result) if is_pool_exhausted(result) => {
                error!(
                    "Fresh descriptor pool of {} sets rejected an allocation",
                    pool.max_sets
                );
                Err(RenderError::DescriptorPoolExhausted {
                    sets_per_pool: pool.max_sets,
                })
            }
            Err(result) => Ok(vk_check(Err(result))?),
        }
    }

    /// Resets every pool and moves all of them to `ready`.
    ///
    /// Every set previously allocated from this allocator becomes invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool reset fails.
    pub fn reset_all<D: DescriptorOps + ?Sized>(&mut self, device: &D) -> RenderResult<()> {
        for pool in self.ready.iter().chain(self.full.iter()) {
            device.reset_descriptor_pool(pool.handle)?;
        }
        self.ready.append(&mut self.full);
        Ok(())
    }

    /// Destroys every pool. Shutdown only.
    pub fn destroy<D: DescriptorOps + ?Sized>(mut self, device: &D) {
        let count = self.pool_count();
        for pool in self.ready.drain(..).chain(self.full.drain(..)) {
            device.destroy_descriptor_pool(pool.handle);
        }
        self.ratios.clear();
        debug!("Descriptor allocator destroyed {} pool(s)", count);
    }

    /// Pools currently accepting allocations.
    #[inline]
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Pools parked as exhausted until the next reset.
    #[inline]
    pub fn full_count(&self) -> usize {
        self.full.len()
    }

    /// Total number of pools owned.
    #[inline]
    pub fn pool_count(&self) -> usize {
        self.ready.len() + self.full.len()
    }

    /// Capacity the next created pool will have.
    #[inline]
    pub fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }

    /// Capacities of every owned pool, ascending.
    pub fn pool_capacities(&self) -> Vec<u32> {
        let mut capacities: Vec<u32> = self
            .full
            .iter()
            .chain(self.ready.iter())
            .map(|pool| pool.max_sets)
            .collect();
        capacities.sort_unstable();
        capacities
    }
}
