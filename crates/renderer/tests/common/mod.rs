//! Recording mock of the backend traits.
//!
//! `MockBackend` hands out fake handles and logs every call into a shared
//! [`EventLog`]. Submitted work is queued and only executes (buffer copies
//! are applied, fences signal) when its fence is waited on or the device is
//! idled. Waiting on an unsignaled fence with nothing queued for it reports
//! a timeout, as a real device would after the timeout elapsed.
//!
//! Resource misuse does not panic inside the renderer; it is collected in
//! `violations()` so tests can assert on it:
//! - resetting a fence or command buffer that is still in flight
//! - destroying something a pending submission references
//! - destroying something twice or that was never created

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use ash::vk::{self, Handle};

use renderer_rhi::backend::{
    AcquiredImage, BufferDesc, BufferOps, CommandOps, DescriptorOps, GpuBuffer, GpuImage,
    ImageDesc, ImageOps, MemoryResidency, Presenter, RenderingTargets, Submission, SyncOps,
};
use renderer_renderer::{Renderer, RendererConfig};
use renderer_rhi::{RhiError, RhiResult};

pub type EventLog = Rc<RefCell<Vec<Event>>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    CreateFence(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    DestroyFence(vk::Fence),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    WaitIdle,

    CreateCommandPool(vk::CommandPool),
    DestroyCommandPool(vk::CommandPool),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Submit {
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
    },

    Transition {
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
    },
    Blit {
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    },
    ClearColor(vk::Image),
    BindPipeline(vk::PipelineBindPoint, vk::Pipeline),
    BindDescriptorSets(vk::PipelineBindPoint, Vec<vk::DescriptorSet>),
    PushConstants(usize),
    Dispatch(u32, u32, u32),
    BeginRendering {
        color: vk::ImageView,
        depth: Option<vk::ImageView>,
        extent: vk::Extent2D,
    },
    EndRendering,
    ViewportScissor(vk::Extent2D),
    BindIndexBuffer(vk::Buffer),
    DrawIndexed {
        index_count: u32,
        first_index: u32,
    },

    CreateDescriptorPool {
        pool: vk::DescriptorPool,
        max_sets: u32,
    },
    ResetDescriptorPool(vk::DescriptorPool),
    DestroyDescriptorPool(vk::DescriptorPool),
    WriteDescriptor {
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        image_view: Option<vk::ImageView>,
    },

    CreateBuffer(vk::Buffer),
    DestroyBuffer(vk::Buffer),
    CreateImage(vk::Image, vk::Extent3D),
    DestroyImage(vk::Image),

    Acquire(vk::Semaphore),
    Present {
        image_index: u32,
        wait: vk::Semaphore,
    },
    Recreate(vk::Extent2D),
    PresenterDropped,

    /// Pushed by test teardown guards.
    Guard(&'static str),
}

/// Sequential handle source shared by the backend and the presenter.
#[derive(Clone, Default)]
pub struct Handles(Rc<Cell<u64>>);

impl Handles {
    pub fn next<H: Handle>(&self) -> H {
        let raw = self.0.get() + 1;
        self.0.set(raw);
        H::from_raw(raw)
    }
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Debug)]
pub struct MockBuffer {
    handle: vk::Buffer,
    size: vk::DeviceSize,
    residency: MemoryResidency,
    data: Rc<RefCell<Vec<u8>>>,
}

impl GpuBuffer for MockBuffer {
    fn handle(&self) -> vk::Buffer {
        self.handle
    }

    fn size(&self) -> vk::DeviceSize {
        self.size
    }

    fn residency(&self) -> MemoryResidency {
        self.residency
    }

    fn write(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        let range = self.host_range(offset, data.len())?;
        self.data.borrow_mut()[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        let range = self.host_range(offset, len)?;
        Ok(self.data.borrow()[range].to_vec())
    }
}

impl MockBuffer {
    fn host_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<std::ops::Range<usize>> {
        if !self.residency.is_host_visible() {
            return Err(RhiError::MemoryNotMapped("mock buffer"));
        }
        let end = offset + len as u64;
        if end > self.size {
            return Err(RhiError::OutOfBounds {
                offset,
                len: len as u64,
                size: self.size,
            });
        }
        Ok(offset as usize..end as usize)
    }
}

pub struct MockImage {
    handle: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent3D,
    format: vk::Format,
}

impl GpuImage for MockImage {
    fn handle(&self) -> vk::Image {
        self.handle
    }

    fn view(&self) -> vk::ImageView {
        self.view
    }

    fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    fn format(&self) -> vk::Format {
        self.format
    }
}

// =============================================================================
// Backend
// =============================================================================

#[derive(Clone, Default)]
struct Recording {
    copies: Vec<(vk::Buffer, vk::Buffer, Vec<vk::BufferCopy>)>,
    buffers: HashSet<vk::Buffer>,
}

struct PendingSubmit {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    recording: Recording,
}

struct PoolState {
    max_sets: u32,
    capacity: HashMap<vk::DescriptorType, u32>,
    used_sets: u32,
    used: HashMap<vk::DescriptorType, u32>,
}

#[derive(Default)]
struct State {
    fences: HashMap<vk::Fence, bool>,
    semaphores: HashSet<vk::Semaphore>,
    command_pools: HashSet<vk::CommandPool>,
    command_buffers: HashMap<vk::CommandBuffer, vk::CommandPool>,
    recordings: HashMap<vk::CommandBuffer, Recording>,
    pending: VecDeque<PendingSubmit>,
    buffers: HashMap<vk::Buffer, Rc<RefCell<Vec<u8>>>>,
    images: HashSet<vk::Image>,
    layouts: HashMap<vk::DescriptorSetLayout, Vec<(vk::DescriptorType, u32)>>,
    pools: HashMap<vk::DescriptorPool, PoolState>,
    fail_next_allocation: Option<vk::Result>,
    violations: Vec<String>,
    submissions: usize,
    executed: usize,
}

impl State {
    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    fn buffer_in_flight(&self, buffer: vk::Buffer) -> bool {
        self.pending
            .iter()
            .any(|submit| submit.recording.buffers.contains(&buffer))
    }

    /// Executes queued submissions in order, through the one signaling `fence`.
    fn retire_through(&mut self, fence: vk::Fence) -> bool {
        let Some(position) = self.pending.iter().position(|s| s.fence == fence) else {
            return false;
        };
        for _ in 0..=position {
            if let Some(submit) = self.pending.pop_front() {
                self.execute(submit);
            }
        }
        true
    }

    fn retire_all(&mut self) {
        while let Some(submit) = self.pending.pop_front() {
            self.execute(submit);
        }
    }

    fn execute(&mut self, submit: PendingSubmit) {
        for (src, dst, regions) in &submit.recording.copies {
            let (Some(src_data), Some(dst_data)) =
                (self.buffers.get(src).cloned(), self.buffers.get(dst).cloned())
            else {
                self.violations
                    .push(format!("copy {:?} -> {:?} on a destroyed buffer", src, dst));
                continue;
            };
            for region in regions {
                let bytes: Vec<u8> = {
                    let src = src_data.borrow();
                    let start = region.src_offset as usize;
                    src[start..start + region.size as usize].to_vec()
                };
                let start = region.dst_offset as usize;
                dst_data.borrow_mut()[start..start + bytes.len()].copy_from_slice(&bytes);
            }
        }
        if submit.fence != vk::Fence::null() {
            self.fences.insert(submit.fence, true);
        }
        self.executed += 1;
    }
}

/// Recording implementation of every device-side backend trait.
pub struct MockBackend {
    log: EventLog,
    handles: Handles,
    state: RefCell<State>,
}

impl MockBackend {
    pub fn new(log: EventLog, handles: Handles) -> Self {
        Self {
            log,
            handles,
            state: RefCell::new(State::default()),
        }
    }

    fn record(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }

    fn record_on(&self, cmd: vk::CommandBuffer, f: impl FnOnce(&mut Recording)) {
        let mut state = self.state.borrow_mut();
        f(state.recordings.entry(cmd).or_default());
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn submissions(&self) -> usize {
        self.state.borrow().submissions
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.state.borrow().images.len()
    }

    pub fn live_descriptor_pools(&self) -> usize {
        self.state.borrow().pools.len()
    }

    /// Every object the frame core creates and destroys itself.
    pub fn live_objects(&self) -> usize {
        let state = self.state.borrow();
        state.fences.len()
            + state.semaphores.len()
            + state.command_pools.len()
            + state.buffers.len()
            + state.images.len()
            + state.pools.len()
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.borrow().fences.get(&fence).copied().unwrap_or(false)
    }

    /// Makes the next descriptor allocation fail with `result`.
    pub fn fail_next_allocation(&self, result: vk::Result) {
        self.state.borrow_mut().fail_next_allocation = Some(result);
    }

    /// Layout with a single storage image at binding 0.
    pub fn storage_image_layout(&self) -> vk::DescriptorSetLayout {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE);
        self.create_descriptor_set_layout(&[binding])
            .expect("mock layout creation cannot fail")
    }
}

impl SyncOps for MockBackend {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let fence = self.handles.next();
        self.state.borrow_mut().fences.insert(fence, signaled);
        self.record(Event::CreateFence(fence));
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<()> {
        self.record(Event::WaitFence(fence));
        let mut state = self.state.borrow_mut();
        match state.fences.get(&fence).copied() {
            None => {
                state.violation(format!("wait on unknown fence {:?}", fence));
                Err(RhiError::InvalidHandle(format!("{:?}", fence)))
            }
            Some(true) => Ok(()),
            Some(false) => {
                if state.retire_through(fence) {
                    Ok(())
                } else {
                    Err(RhiError::FenceTimeout { timeout_ns })
                }
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        self.record(Event::ResetFence(fence));
        let mut state = self.state.borrow_mut();
        if state.pending.iter().any(|s| s.fence == fence) {
            state.violation(format!("reset of in-flight fence {:?}", fence));
        }
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("{:?}", fence))),
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.record(Event::DestroyFence(fence));
        let mut state = self.state.borrow_mut();
        if state.pending.iter().any(|s| s.fence == fence) {
            state.violation(format!("destroy of in-flight fence {:?}", fence));
        }
        if state.fences.remove(&fence).is_none() {
            state.violation(format!("destroy of unknown fence {:?}", fence));
        }
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let semaphore = self.handles.next();
        self.state.borrow_mut().semaphores.insert(semaphore);
        self.record(Event::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.record(Event::DestroySemaphore(semaphore));
        let mut state = self.state.borrow_mut();
        if !state.semaphores.remove(&semaphore) {
            state.violation(format!("destroy of unknown semaphore {:?}", semaphore));
        }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.record(Event::WaitIdle);
        self.state.borrow_mut().retire_all();
        Ok(())
    }
}

impl CommandOps for MockBackend {
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let pool = self.handles.next();
        self.state.borrow_mut().command_pools.insert(pool);
        self.record(Event::CreateCommandPool(pool));
        Ok(pool)
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let cmd = self.handles.next();
        self.state.borrow_mut().command_buffers.insert(cmd, pool);
        Ok(cmd)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.record(Event::DestroyCommandPool(pool));
        let mut state = self.state.borrow_mut();
        let in_flight = state.pending.iter().any(|submit| {
            state.command_buffers.get(&submit.command_buffer) == Some(&pool)
        });
        if in_flight {
            state.violation(format!("destroy of command pool {:?} while in flight", pool));
        }
        if !state.command_pools.remove(&pool) {
            state.violation(format!("destroy of unknown command pool {:?}", pool));
        }
        state.command_buffers.retain(|_, owner| *owner != pool);
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Event::ResetCommandBuffer(cmd));
        let mut state = self.state.borrow_mut();
        if state.pending.iter().any(|s| s.command_buffer == cmd) {
            state.violation(format!("reset of in-flight command buffer {:?}", cmd));
        }
        state.recordings.remove(&cmd);
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Event::BeginCommandBuffer(cmd));
        let mut state = self.state.borrow_mut();
        if state.pending.iter().any(|s| s.command_buffer == cmd) {
            state.violation(format!("begin of in-flight command buffer {:?}", cmd));
        }
        state.recordings.insert(cmd, Recording::default());
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Event::EndCommandBuffer(cmd));
        Ok(())
    }

    fn submit(&self, submission: &Submission) -> RhiResult<()> {
        self.record(Event::Submit {
            command_buffer: submission.command_buffer,
            fence: submission.fence,
            wait: submission.wait.map(|(semaphore, _)| semaphore),
            signal: submission.signal,
        });
        let mut state = self.state.borrow_mut();
        if state.fences.get(&submission.fence) == Some(&true) {
            state.violation(format!(
                "submit with already signaled fence {:?}",
                submission.fence
            ));
        }
        let recording = state
            .recordings
            .get(&submission.command_buffer)
            .cloned()
            .unwrap_or_default();
        state.pending.push_back(PendingSubmit {
            command_buffer: submission.command_buffer,
            fence: submission.fence,
            recording,
        });
        state.submissions += 1;
        Ok(())
    }

    fn cmd_transition_image(
        &self,
        _cmd: vk::CommandBuffer,
        image: vk::Image,
        _aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.record(Event::Transition {
            image,
            old: old_layout,
            new: new_layout,
        });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.record(Event::CopyBuffer { src, dst });
        self.record_on(cmd, |recording| {
            recording.copies.push((src, dst, regions.to_vec()));
            recording.buffers.insert(src);
            recording.buffers.insert(dst);
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _extent: vk::Extent3D,
    ) {
        self.record(Event::CopyBufferToImage { src, dst });
        self.record_on(cmd, |recording| {
            recording.buffers.insert(src);
        });
    }

    fn cmd_blit_image(
        &self,
        _cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        self.record(Event::Blit {
            src,
            dst,
            src_extent,
            dst_extent,
        });
    }

    fn cmd_clear_color_image(&self, _cmd: vk::CommandBuffer, image: vk::Image, _color: [f32; 4]) {
        self.record(Event::ClearColor(image));
    }

    fn cmd_bind_pipeline(
        &self,
        _cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(Event::BindPipeline(bind_point, pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        _first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(Event::BindDescriptorSets(bind_point, sets.to_vec()));
    }

    fn cmd_push_constants(
        &self,
        _cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        bytes: &[u8],
    ) {
        self.record(Event::PushConstants(bytes.len()));
    }

    fn cmd_dispatch(&self, _cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(Event::Dispatch(x, y, z));
    }

    fn cmd_begin_rendering(&self, _cmd: vk::CommandBuffer, targets: &RenderingTargets) {
        self.record(Event::BeginRendering {
            color: targets.color,
            depth: targets.depth,
            extent: targets.extent,
        });
    }

    fn cmd_end_rendering(&self, _cmd: vk::CommandBuffer) {
        self.record(Event::EndRendering);
    }

    fn cmd_set_viewport_scissor(&self, _cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(Event::ViewportScissor(extent));
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
    ) {
        self.record(Event::BindIndexBuffer(buffer));
        self.record_on(cmd, |recording| {
            recording.buffers.insert(buffer);
        });
    }

    fn cmd_draw_indexed(&self, _cmd: vk::CommandBuffer, index_count: u32, first_index: u32) {
        self.record(Event::DrawIndexed {
            index_count,
            first_index,
        });
    }
}

impl DescriptorOps for MockBackend {
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let layout = self.handles.next();
        let needs = bindings
            .iter()
            .map(|binding| (binding.descriptor_type, binding.descriptor_count))
            .collect();
        self.state.borrow_mut().layouts.insert(layout, needs);
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let mut state = self.state.borrow_mut();
        if state.layouts.remove(&layout).is_none() {
            state.violation(format!("destroy of unknown layout {:?}", layout));
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let pool = self.handles.next();
        let capacity = pool_sizes
            .iter()
            .map(|size| (size.ty, size.descriptor_count))
            .collect();
        self.state.borrow_mut().pools.insert(
            pool,
            PoolState {
                max_sets,
                capacity,
                used_sets: 0,
                used: HashMap::new(),
            },
        );
        self.record(Event::CreateDescriptorPool { pool, max_sets });
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.fail_next_allocation.take() {
            return Err(result);
        }

        let needs = state.layouts.get(&layout).cloned().unwrap_or_default();
        let Some(pool_state) = state.pools.get_mut(&pool) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        if pool_state.used_sets >= pool_state.max_sets {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        for (ty, count) in &needs {
            let capacity = pool_state.capacity.get(ty).copied().unwrap_or(0);
            let used = pool_state.used.get(ty).copied().unwrap_or(0);
            if used + count > capacity {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
        }
        for (ty, count) in needs {
            *pool_state.used.entry(ty).or_insert(0) += count;
        }
        pool_state.used_sets += 1;
        drop(state);

        Ok(self.handles.next())
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        self.record(Event::ResetDescriptorPool(pool));
        let mut state = self.state.borrow_mut();
        match state.pools.get_mut(&pool) {
            Some(pool_state) => {
                pool_state.used_sets = 0;
                pool_state.used.clear();
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("{:?}", pool))),
        }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.record(Event::DestroyDescriptorPool(pool));
        let mut state = self.state.borrow_mut();
        if state.pools.remove(&pool).is_none() {
            state.violation(format!("destroy of unknown descriptor pool {:?}", pool));
        }
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        for write in writes {
            let image_view = if write.p_image_info.is_null() || write.descriptor_count == 0 {
                None
            } else {
                // SAFETY: the writer points `p_image_info` at a live
                // `DescriptorImageInfo` for the duration of this call.
                Some(unsafe { (*write.p_image_info).image_view })
            };
            self.record(Event::WriteDescriptor {
                set: write.dst_set,
                binding: write.dst_binding,
                ty: write.descriptor_type,
                image_view,
            });
        }
    }
}

impl BufferOps for MockBackend {
    type Buffer = MockBuffer;

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<MockBuffer> {
        let handle = self.handles.next();
        let data = Rc::new(RefCell::new(vec![0u8; desc.size as usize]));
        self.state.borrow_mut().buffers.insert(handle, data.clone());
        self.record(Event::CreateBuffer(handle));
        Ok(MockBuffer {
            handle,
            size: desc.size,
            residency: desc.residency,
            data,
        })
    }

    fn destroy_buffer(&self, buffer: MockBuffer) {
        self.record(Event::DestroyBuffer(buffer.handle));
        let mut state = self.state.borrow_mut();
        if state.buffer_in_flight(buffer.handle) {
            state.violation(format!("destroy of in-flight buffer {:?}", buffer.handle));
        }
        if state.buffers.remove(&buffer.handle).is_none() {
            state.violation(format!("destroy of unknown buffer {:?}", buffer.handle));
        }
    }
}

impl ImageOps for MockBackend {
    type Image = MockImage;

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<MockImage> {
        let handle = self.handles.next();
        let view = self.handles.next();
        self.state.borrow_mut().images.insert(handle);
        self.record(Event::CreateImage(handle, desc.extent));
        Ok(MockImage {
            handle,
            view,
            extent: desc.extent,
            format: desc.format,
        })
    }

    fn destroy_image(&self, image: MockImage) {
        self.record(Event::DestroyImage(image.handle));
        let mut state = self.state.borrow_mut();
        if !state.images.remove(&image.handle) {
            state.violation(format!("destroy of unknown image {:?}", image.handle));
        }
    }
}

// =============================================================================
// Presenter
// =============================================================================

struct PresenterState {
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    next_index: u32,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<Result<bool, vk::Result>>,
    /// Extent `recreate` reports instead of the requested one.
    surface_extent: Option<vk::Extent2D>,
}

/// Scripted presentation engine. Observers share state, so a test can keep
/// a handle after moving the presenter into the renderer.
pub struct MockPresenter {
    log: EventLog,
    handles: Handles,
    state: Rc<RefCell<PresenterState>>,
    owner: bool,
}

impl MockPresenter {
    pub fn new(log: EventLog, handles: Handles, extent: vk::Extent2D, image_count: u32) -> Self {
        let (images, views): (Vec<vk::Image>, Vec<vk::ImageView>) = (0..image_count)
            .map(|_| (handles.next::<vk::Image>(), handles.next::<vk::ImageView>()))
            .unzip();
        Self {
            log,
            handles,
            state: Rc::new(RefCell::new(PresenterState {
                extent,
                images,
                views,
                next_index: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                surface_extent: None,
            })),
            owner: true,
        }
    }

    /// A non-owning handle that does not log `PresenterDropped`.
    pub fn observer(&self) -> Self {
        Self {
            log: self.log.clone(),
            handles: self.handles.clone(),
            state: self.state.clone(),
            owner: false,
        }
    }

    /// The next acquire fails with `result` instead of returning an image.
    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    /// The next present returns `result`.
    pub fn script_present(&self, result: Result<bool, vk::Result>) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    pub fn set_surface_extent(&self, extent: vk::Extent2D) {
        self.state.borrow_mut().surface_extent = Some(extent);
    }

    pub fn images(&self) -> Vec<vk::Image> {
        self.state.borrow().images.clone()
    }
}

impl Presenter for MockPresenter {
    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> Result<AcquiredImage, vk::Result> {
        self.log.borrow_mut().push(Event::Acquire(signal));
        let mut state = self.state.borrow_mut();
        if let Some(result) = state.acquire_script.pop_front() {
            return Err(result);
        }
        let index = state.next_index;
        state.next_index = (index + 1) % state.images.len() as u32;
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> Result<bool, vk::Result> {
        self.log
            .borrow_mut()
            .push(Event::Present { image_index, wait });
        self.state
            .borrow_mut()
            .present_script
            .pop_front()
            .unwrap_or(Ok(false))
    }

    fn image(&self, index: u32) -> vk::Image {
        self.state.borrow().images[index as usize]
    }

    fn image_view(&self, index: u32) -> vk::ImageView {
        self.state.borrow().views[index as usize]
    }

    fn extent(&self) -> vk::Extent2D {
        self.state.borrow().extent
    }

    fn image_count(&self) -> u32 {
        self.state.borrow().images.len() as u32
    }

    fn recreate(&mut self, requested: vk::Extent2D) -> RhiResult<vk::Extent2D> {
        let mut state = self.state.borrow_mut();
        let extent = state.surface_extent.unwrap_or(requested);
        if extent.width == 0 || extent.height == 0 {
            return Ok(extent);
        }
        let count = state.images.len();
        state.images = (0..count).map(|_| self.handles.next()).collect();
        state.views = (0..count).map(|_| self.handles.next()).collect();
        state.next_index = 0;
        state.extent = extent;
        drop(state);

        self.log.borrow_mut().push(Event::Recreate(extent));
        Ok(extent)
    }
}

impl Drop for MockPresenter {
    fn drop(&mut self) {
        if self.owner {
            self.log.borrow_mut().push(Event::PresenterDropped);
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// Backend and presenter sharing one event log and handle space.
pub fn mock_pair(
    surface: vk::Extent2D,
    image_count: u32,
) -> (std::sync::Arc<MockBackend>, MockPresenter) {
    let _ = renderer_core::try_init_logging();
    let log = EventLog::default();
    let handles = Handles::default();
    let backend = MockBackend::new(log.clone(), handles.clone());
    let presenter = MockPresenter::new(log, handles, surface, image_count);
    (std::sync::Arc::new(backend), presenter)
}

/// Indices of events matching `predicate`, in log order.
pub fn positions(events: &[Event], predicate: impl Fn(&Event) -> bool) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, event)| predicate(event))
        .map(|(index, _)| index)
        .collect()
}

pub type MockRenderer = Renderer<MockBackend, MockPresenter>;

/// Renderer over a 3-image mock swapchain with a draw-image layout, plus an
/// observer of its presenter.
pub fn new_renderer(surface: vk::Extent2D) -> (MockRenderer, MockPresenter) {
    new_renderer_with(surface, RendererConfig::default())
}

pub fn new_renderer_with(
    surface: vk::Extent2D,
    config: RendererConfig,
) -> (MockRenderer, MockPresenter) {
    let (backend, presenter) = mock_pair(surface, 3);
    let observer = presenter.observer();
    let layout = backend.storage_image_layout();
    let renderer = Renderer::new(backend, presenter, config.with_draw_image_layout(layout))
        .expect("Failed to create renderer");
    (renderer, observer)
}
