//! Background compute effects.
//!
//! The draw image is first filled by a compute shader. The host registers a
//! list of [`ComputeEffect`]s (pipeline, layout, default push constants);
//! the renderer dispatches the selected one each frame over the draw extent.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec4;

use crate::error::{RenderError, RenderResult};

/// Push constants shared by every background effect: four free vectors.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputePushConstants {
    pub data1: Vec4,
    pub data2: Vec4,
    pub data3: Vec4,
    pub data4: Vec4,
}

impl ComputePushConstants {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Byte view for `vkCmdPushConstants`.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// A named compute pipeline and its push constants.
#[derive(Clone, Debug)]
pub struct ComputeEffect {
    pub name: String,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push: ComputePushConstants,
}

impl ComputeEffect {
    /// Creates an effect with zeroed push constants.
    pub fn new(name: impl Into<String>, pipeline: vk::Pipeline, layout: vk::PipelineLayout) -> Self {
        Self {
            name: name.into(),
            pipeline,
            layout,
            push: ComputePushConstants::default(),
        }
    }

    /// Sets the default push constants.
    pub fn with_push(mut self, push: ComputePushConstants) -> Self {
        self.push = push;
        self
    }
}

/// Registered effects and the currently selected one.
#[derive(Clone, Debug, Default)]
pub struct EffectSet {
    effects: Vec<ComputeEffect>,
    current: usize,
}

impl EffectSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an effect and returns its index.
    pub fn push(&mut self, effect: ComputeEffect) -> usize {
        self.effects.push(effect);
        self.effects.len() - 1
    }

    /// Selects the effect at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::EffectOutOfRange`] if no effect has that index.
    /// The selection is unchanged in that case.
    pub fn select(&mut self, index: usize) -> RenderResult<&ComputeEffect> {
        if index >= self.effects.len() {
            return Err(RenderError::EffectOutOfRange {
                index,
                count: self.effects.len(),
            });
        }
        self.current = index;
        Ok(&self.effects[index])
    }

    /// The selected effect, if any are registered.
    #[inline]
    pub fn current(&self) -> Option<&ComputeEffect> {
        self.effects.get(self.current)
    }

    /// Mutable access to the selected effect, for live push-constant edits.
    #[inline]
    pub fn current_mut(&mut self) -> Option<&mut ComputeEffect> {
        self.effects.get_mut(self.current)
    }

    /// Index of the selected effect.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Iterates over the registered effects.
    pub fn iter(&self) -> impl Iterator<Item = &ComputeEffect> {
        self.effects.iter()
    }

    /// Removes every effect and returns them, for pipeline destruction at shutdown.
    pub fn take_all(&mut self) -> Vec<ComputeEffect> {
        self.current = 0;
        std::mem::take(&mut self.effects)
    }
}

/// Workgroups needed to cover `extent` with square groups of `workgroup_size`.
///
/// Rounds up, so partially covered edge tiles are dispatched.
#[inline]
pub fn workgroup_count(extent: vk::Extent2D, workgroup_size: u32) -> (u32, u32) {
    let size = workgroup_size.max(1);
    (extent.width.div_ceil(size), extent.height.div_ceil(size))
}
