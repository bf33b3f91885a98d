//! 纯 CPU 模拟的 GPU
//!
//! 每个队列是一个操作 FIFO（执行、signal、wait、present），按 [`HeadlessExecutionMode`] 推进。
//! 执行命令时会校验 barrier 的 `before` 与模拟状态是否一致、attachment 与拷贝操作数是否处于正确状态，
//! 并把执行过程记录为 [`HeadlessEvent`]，供测试断言。

mod state;

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

pub use state::{HeadlessEvent, HeadlessExecutionMode};
use state::{
    HeadlessAllocator, HeadlessFence, HeadlessList, HeadlessPipeline, HeadlessQueueOp, HeadlessRecordedList,
    HeadlessState, HeadlessSwapchain,
};

use crate::{
    basic::extent::GfxExtent2D,
    commands::{barrier::GfxResourceState, command::GfxCommand},
    device::{
        GfxBackendKind, GfxCommandAllocatorHandle, GfxCommandListHandle, GfxDescriptorCapacity, GfxDevice,
        GfxDeviceDesc, GfxFenceHandle, GfxPipelineHandle, GfxQueueType, GfxResourceHandle, GfxSwapchainHandle,
    },
    error::{GfxError, GfxResult},
    pipelines::{
        desc::{GfxComputePipelineDesc, GfxGraphicsPipelineDesc},
        pipeline_state::GfxPipelineKind,
    },
    resources::{GfxDescriptorHeapKind, GfxResourceDesc, GfxResourceShape, GfxResourceUsage, GfxViewDesc},
    swapchain::{GfxPresentMode, GfxSwapchainDesc},
};

pub struct HeadlessDevice {
    capacity: GfxDescriptorCapacity,
    state: Mutex<HeadlessState>,
    /// fence 推进、队列清空、设备丢失时通知
    cond: Condvar,
}

// new & init
impl HeadlessDevice {
    pub fn new(desc: &GfxDeviceDesc, mode: HeadlessExecutionMode) -> Self {
        log::info!("create headless device ({:?}) for {}", mode, desc.app_name);
        Self {
            capacity: desc.descriptor_capacity,
            state: Mutex::new(HeadlessState::new(mode)),
            cond: Condvar::new(),
        }
    }

    /// 使用默认描述创建
    pub fn with_mode(mode: HeadlessExecutionMode) -> Arc<Self> {
        Arc::new(Self::new(&GfxDeviceDesc::default(), mode))
    }
}

// GPU 控制
impl HeadlessDevice {
    pub fn mode(&self) -> HeadlessExecutionMode {
        self.lock().mode
    }

    /// 切换到 `Immediate` 时会立即执行所有积压的工作
    pub fn set_mode(&self, mode: HeadlessExecutionMode) {
        let mut state = self.lock();
        state.mode = mode;
        if mode == HeadlessExecutionMode::Immediate {
            state.process(None);
        }
        self.cond.notify_all();
    }

    /// 从 `Stalled` 恢复
    pub fn resume(&self) {
        self.set_mode(HeadlessExecutionMode::Immediate);
    }

    /// 推进所有队列，返回执行的操作数
    pub fn run_gpu(&self) -> usize {
        let mut state = self.lock();
        let processed = state.process(None);
        self.cond.notify_all();
        processed
    }

    /// 只推进一个队列
    pub fn run_queue(&self, queue: GfxQueueType) -> usize {
        let mut state = self.lock();
        let processed = state.process(Some(queue));
        self.cond.notify_all();
        processed
    }

    pub fn simulate_device_lost(&self) {
        log::warn!("[headless] simulating device lost");
        let mut state = self.lock();
        state.lost = true;
        self.cond.notify_all();
    }

    /// 之后的第 `successes + 1` 次描述符写入返回错误，只生效一次
    pub fn fail_descriptor_write_after(&self, successes: u32) {
        self.lock().descriptor_write_budget = Some(successes);
    }
}

// 观测
impl HeadlessDevice {
    pub fn events(&self) -> Vec<HeadlessEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn validation_errors(&self) -> Vec<String> {
        self.lock().validation_errors.clone()
    }

    /// 模拟状态下资源当前所处的状态
    pub fn resource_state(&self, resource: GfxResourceHandle) -> Option<GfxResourceState> {
        self.lock().resources.get(resource).map(|r| r.state)
    }

    /// buffer 在 CPU 侧保存的内容
    pub fn read_resource(&self, resource: GfxResourceHandle) -> Option<Vec<u8>> {
        self.lock().resources.get(resource).map(|r| r.data.clone())
    }

    pub fn resource_desc(&self, resource: GfxResourceHandle) -> Option<GfxResourceDesc> {
        self.lock().resources.get(resource).map(|r| r.desc.clone())
    }

    pub fn descriptor(&self, heap: GfxDescriptorHeapKind, index: u32) -> Option<GfxResourceHandle> {
        self.lock().descriptors.get(&(heap, index)).copied()
    }

    pub fn swapchain_extent(&self, swapchain: GfxSwapchainHandle) -> Option<GfxExtent2D> {
        self.lock().swapchains.get(swapchain).map(|s| s.extent)
    }

    pub fn pending_ops(&self, queue: GfxQueueType) -> usize {
        self.lock().queues[queue.index()].len()
    }

    pub fn pipeline_count(&self) -> usize {
        self.lock().pipelines.len()
    }

    pub fn allocator_count(&self) -> usize {
        self.lock().allocators.len()
    }

    pub fn list_count(&self) -> usize {
        self.lock().lists.len()
    }

    pub fn fence_count(&self) -> usize {
        self.lock().fences.len()
    }
}

// tools
impl HeadlessDevice {
    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[track_caller]
    fn check_alive(state: &HeadlessState) -> GfxResult<()> {
        if state.lost { Err(GfxError::device_lost("headless device was lost")) } else { Ok(()) }
    }

    fn enqueue(&self, mut state: MutexGuard<'_, HeadlessState>, queue: GfxQueueType, op: HeadlessQueueOp) {
        state.queues[queue.index()].push_back(op);
        if state.mode == HeadlessExecutionMode::Immediate {
            state.process(None);
        }
        self.cond.notify_all();
    }

    fn create_back_buffers(state: &mut HeadlessState, desc: &GfxSwapchainDesc) -> Vec<GfxResourceHandle> {
        (0..desc.image_count)
            .map(|i| {
                let desc = GfxResourceDesc::texture_2d(
                    desc.extent,
                    desc.format,
                    GfxResourceUsage::RENDER_TARGET | GfxResourceUsage::COPY_DST,
                    format!("back-buffer-{}", i),
                );
                state.resources.insert(HeadlessState::new_resource(&desc))
            })
            .collect()
    }

    fn destroy_resource_locked(state: &mut HeadlessState, resource: GfxResourceHandle) {
        match state.resources.remove(resource) {
            Some(r) if r.in_flight > 0 => {
                state.error(format!("{} destroyed while referenced by pending GPU work", r.desc.name));
            }
            Some(_) => {}
            None => log::warn!("[headless] destroy of unknown resource {:?}", resource),
        }
        state.descriptors.retain(|_, r| *r != resource);
    }
}

impl GfxDevice for HeadlessDevice {
    fn backend(&self) -> GfxBackendKind {
        GfxBackendKind::Headless
    }

    fn adapter_name(&self) -> String {
        "headless".to_string()
    }

    fn descriptor_capacity(&self) -> GfxDescriptorCapacity {
        self.capacity
    }

    fn create_fence(&self, name: &str) -> GfxResult<GfxFenceHandle> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        Ok(state.fences.insert(HeadlessFence {
            name: name.to_string(),
            completed: 0,
            enqueued: 0,
        }))
    }

    fn destroy_fence(&self, fence: GfxFenceHandle) {
        self.lock().fences.remove(fence);
    }

    fn fence_completed_value(&self, fence: GfxFenceHandle) -> GfxResult<u64> {
        let state = self.lock();
        Self::check_alive(&state)?;
        state
            .fences
            .get(fence)
            .map(|f| f.completed)
            .ok_or_else(|| GfxError::invalid_handle("fence_completed_value: unknown fence"))
    }

    fn wait_fence(&self, fence: GfxFenceHandle, value: u64, timeout: Option<Duration>) -> GfxResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            Self::check_alive(&state)?;
            let (completed, enqueued) = state
                .fences
                .get(fence)
                .map(|f| (f.completed, f.enqueued))
                .ok_or_else(|| GfxError::invalid_handle("wait_fence: unknown fence"))?;
            if completed >= value {
                return Ok(true);
            }
            if state.mode == HeadlessExecutionMode::Immediate && value > enqueued {
                return Err(GfxError::invalid_usage(format!(
                    "wait_fence: value {} was never signaled (last enqueued {})",
                    value, enqueued
                )));
            }

            state = match deadline {
                None => self.cond.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.cond.wait_timeout(state, deadline - now).unwrap_or_else(PoisonError::into_inner).0
                }
            };
        }
    }

    fn queue_submit(&self, queue: GfxQueueType, lists: &[GfxCommandListHandle]) -> GfxResult<()> {
        let mut state = self.lock();
        Self::check_alive(&state)?;

        let mut recorded = Vec::with_capacity(lists.len());
        for handle in lists {
            let list = state.lists.get_mut(*handle).ok_or_else(|| GfxError::invalid_handle("queue_submit: unknown list"))?;
            if list.queue != queue {
                return Err(GfxError::invalid_usage(format!(
                    "list {} of {:?} queue submitted to {:?} queue",
                    list.name, list.queue, queue
                )));
            }
            let Some(rec) = list.recorded.take() else {
                return Err(GfxError::invalid_usage(format!("list {} submitted without being recorded", list.name)));
            };
            recorded.push(rec);
        }

        let mut referenced = Vec::new();
        for rec in &recorded {
            referenced.extend(state.referenced_resources(&rec.commands));
            if let Some(allocator) = state.allocators.get_mut(rec.allocator) {
                allocator.in_flight += 1;
            }
        }
        referenced.sort();
        referenced.dedup();
        for resource in &referenced {
            if let Some(r) = state.resources.get_mut(*resource) {
                r.in_flight += 1;
            }
        }

        self.enqueue(
            state,
            queue,
            HeadlessQueueOp::Execute {
                lists: recorded,
                referenced,
            },
        );
        Ok(())
    }

    fn queue_signal(&self, queue: GfxQueueType, fence: GfxFenceHandle, value: u64) -> GfxResult<()> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        let f = state.fences.get_mut(fence).ok_or_else(|| GfxError::invalid_handle("queue_signal: unknown fence"))?;
        if value <= f.enqueued {
            return Err(GfxError::invalid_usage(format!(
                "fence {}: signal value {} is not greater than {}",
                f.name, value, f.enqueued
            )));
        }
        f.enqueued = value;
        self.enqueue(state, queue, HeadlessQueueOp::Signal { fence, value });
        Ok(())
    }

    fn queue_wait(&self, queue: GfxQueueType, fence: GfxFenceHandle, value: u64) -> GfxResult<()> {
        let state = self.lock();
        Self::check_alive(&state)?;
        if !state.fences.contains_key(fence) {
            return Err(GfxError::invalid_handle("queue_wait: unknown fence"));
        }
        self.enqueue(state, queue, HeadlessQueueOp::Wait { fence, value });
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let mut state = self.lock();
        loop {
            Self::check_alive(&state)?;
            if state.queues_idle() {
                return Ok(());
            }
            if state.mode == HeadlessExecutionMode::Immediate {
                state.process(None);
                if !state.queues_idle() {
                    return Err(GfxError::submission("wait_idle: queues are blocked on waits that never resolve"));
                }
                continue;
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn create_command_allocator(&self, _queue: GfxQueueType, name: &str) -> GfxResult<GfxCommandAllocatorHandle> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        Ok(state.allocators.insert(HeadlessAllocator {
            name: name.to_string(),
            in_flight: 0,
        }))
    }

    fn reset_command_allocator(&self, allocator: GfxCommandAllocatorHandle) -> GfxResult<()> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        let (name, in_flight) = state
            .allocators
            .get(allocator)
            .map(|a| (a.name.clone(), a.in_flight))
            .ok_or_else(|| GfxError::invalid_handle("reset_command_allocator: unknown allocator"))?;
        if in_flight > 0 {
            let message = format!("allocator {} reset while {} batches are in flight", name, in_flight);
            state.error(message.clone());
            return Err(GfxError::invalid_usage(message));
        }
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: GfxCommandAllocatorHandle) {
        self.lock().allocators.remove(allocator);
    }

    fn create_command_list(&self, queue: GfxQueueType, name: &str) -> GfxResult<GfxCommandListHandle> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        Ok(state.lists.insert(HeadlessList {
            queue,
            name: name.to_string(),
            recorded: None,
        }))
    }

    fn record_command_list(
        &self,
        list: GfxCommandListHandle,
        allocator: GfxCommandAllocatorHandle,
        commands: &[GfxCommand],
    ) -> GfxResult<()> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        if !state.allocators.contains_key(allocator) {
            return Err(GfxError::invalid_handle("record_command_list: unknown allocator"));
        }
        let list = state.lists.get_mut(list).ok_or_else(|| GfxError::invalid_handle("record_command_list: unknown list"))?;
        list.recorded = Some(HeadlessRecordedList {
            name: list.name.clone(),
            allocator,
            commands: Arc::new(commands.to_vec()),
        });
        Ok(())
    }

    fn destroy_command_list(&self, list: GfxCommandListHandle) {
        self.lock().lists.remove(list);
    }

    fn create_resource(&self, desc: &GfxResourceDesc) -> GfxResult<GfxResourceHandle> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        match desc.shape {
            GfxResourceShape::Buffer { size } if size == 0 => {
                return Err(GfxError::resource_creation(format!("buffer {} has zero size", desc.name)));
            }
            GfxResourceShape::Texture2D { extent, format, .. } => {
                if extent.is_empty() {
                    return Err(GfxError::resource_creation(format!("texture {} has extent {}", desc.name, extent)));
                }
                if format.is_depth() && desc.usage.contains(GfxResourceUsage::RENDER_TARGET) {
                    return Err(GfxError::resource_creation(format!(
                        "depth texture {} cannot be a render target",
                        desc.name
                    )));
                }
            }
            _ => {}
        }
        Ok(state.resources.insert(HeadlessState::new_resource(desc)))
    }

    fn destroy_resource(&self, resource: GfxResourceHandle) {
        let mut state = self.lock();
        Self::destroy_resource_locked(&mut state, resource);
    }

    fn write_resource(&self, resource: GfxResourceHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        let r = state.resources.get_mut(resource).ok_or_else(|| GfxError::invalid_handle("write_resource: unknown resource"))?;
        if !r.desc.usage.contains(GfxResourceUsage::UPLOAD) {
            return Err(GfxError::invalid_usage(format!("write_resource: {} is not an upload resource", r.desc.name)));
        }
        let start = offset as usize;
        let target = r.data.get_mut(start..start + data.len()).ok_or_else(|| {
            GfxError::invalid_usage(format!("write_resource: {} bytes at {} out of range", data.len(), offset))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn live_resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    fn write_descriptor(
        &self,
        heap: GfxDescriptorHeapKind,
        index: u32,
        resource: GfxResourceHandle,
        view: GfxViewDesc,
    ) -> GfxResult<()> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        match state.descriptor_write_budget {
            Some(0) => {
                state.descriptor_write_budget = None;
                return Err(GfxError::invalid_usage(format!("[headless] injected failure writing {:?}[{}]", heap, index)));
            }
            Some(n) => state.descriptor_write_budget = Some(n - 1),
            None => {}
        }
        if index >= self.capacity.of(heap) {
            return Err(GfxError::invalid_usage(format!("{:?} descriptor index {} out of range", heap, index)));
        }
        if view.heap_kind() != heap {
            return Err(GfxError::invalid_usage(format!("{:?} view written into {:?} heap", view, heap)));
        }
        let r = state.resources.get(resource).ok_or_else(|| GfxError::invalid_handle("write_descriptor: unknown resource"))?;
        if !r.desc.usage.contains(view.required_usage()) {
            return Err(GfxError::invalid_usage(format!(
                "{} lacks {:?} usage for a {:?} view",
                r.desc.name,
                view.required_usage(),
                view
            )));
        }
        state.descriptors.insert((heap, index), resource);
        Ok(())
    }

    fn clear_descriptor(&self, heap: GfxDescriptorHeapKind, index: u32) {
        self.lock().descriptors.remove(&(heap, index));
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GfxGraphicsPipelineDesc,
        vs: &[u8],
        ps: &[u8],
    ) -> GfxResult<GfxPipelineHandle> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        if vs.is_empty() || ps.is_empty() {
            return Err(GfxError::resource_creation(format!("pipeline {}: empty shader blob", desc.name)));
        }
        if desc.rtv_formats.iter().any(|f| f.is_depth()) || desc.depth_format.is_some_and(|f| !f.is_depth()) {
            return Err(GfxError::resource_creation(format!("pipeline {}: invalid attachment formats", desc.name)));
        }
        Ok(state.pipelines.insert(HeadlessPipeline {
            name: desc.name.clone(),
            kind: GfxPipelineKind::Graphics,
        }))
    }

    fn create_compute_pipeline(&self, desc: &GfxComputePipelineDesc, cs: &[u8]) -> GfxResult<GfxPipelineHandle> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        if cs.is_empty() {
            return Err(GfxError::resource_creation(format!("pipeline {}: empty shader blob", desc.name)));
        }
        Ok(state.pipelines.insert(HeadlessPipeline {
            name: desc.name.clone(),
            kind: GfxPipelineKind::Compute,
        }))
    }

    fn destroy_pipeline(&self, pipeline: GfxPipelineHandle) {
        self.lock().pipelines.remove(pipeline);
    }

    fn create_swapchain(
        &self,
        desc: &GfxSwapchainDesc,
    ) -> GfxResult<(GfxSwapchainHandle, Vec<GfxResourceHandle>)> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        if desc.extent.is_empty() || desc.image_count == 0 {
            return Err(GfxError::resource_creation(format!("swapchain extent {} is empty", desc.extent)));
        }
        let back_buffers = Self::create_back_buffers(&mut state, desc);
        let handle = state.swapchains.insert(HeadlessSwapchain {
            extent: desc.extent,
            format: desc.format,
            back_buffers: back_buffers.clone(),
            acquired: None,
            next: 0,
        });
        log::info!("create headless swapchain {} x{}", desc.extent, desc.image_count);
        Ok((handle, back_buffers))
    }

    fn recreate_swapchain(
        &self,
        swapchain: GfxSwapchainHandle,
        extent: GfxExtent2D,
        present_mode: GfxPresentMode,
    ) -> GfxResult<Vec<GfxResourceHandle>> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        if extent.is_empty() {
            return Err(GfxError::resource_creation(format!("swapchain extent {} is empty", extent)));
        }
        let (old, format) = state
            .swapchains
            .get(swapchain)
            .map(|s| (s.back_buffers.clone(), s.format))
            .ok_or_else(|| GfxError::invalid_handle("recreate_swapchain: unknown swapchain"))?;
        for resource in &old {
            Self::destroy_resource_locked(&mut state, *resource);
        }

        let mut desc = GfxSwapchainDesc::new(None, extent, present_mode);
        desc.format = format;
        desc.image_count = old.len() as u32;
        let back_buffers = Self::create_back_buffers(&mut state, &desc);
        if let Some(s) = state.swapchains.get_mut(swapchain) {
            s.extent = extent;
            s.back_buffers = back_buffers.clone();
            s.acquired = None;
            s.next = 0;
        }
        log::info!("recreate headless swapchain {} (vsync: {})", extent, present_mode.vsync);
        Ok(back_buffers)
    }

    fn destroy_swapchain(&self, swapchain: GfxSwapchainHandle) {
        let mut state = self.lock();
        if let Some(s) = state.swapchains.remove(swapchain) {
            for resource in s.back_buffers {
                Self::destroy_resource_locked(&mut state, resource);
            }
        }
    }

    fn acquire_next_back_buffer(&self, swapchain: GfxSwapchainHandle) -> GfxResult<u32> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        let s = state
            .swapchains
            .get_mut(swapchain)
            .ok_or_else(|| GfxError::invalid_handle("acquire_next_back_buffer: unknown swapchain"))?;
        let index = s.next;
        s.next = (s.next + 1) % s.back_buffers.len() as u32;
        s.acquired = Some(index);
        Ok(index)
    }

    fn present(&self, swapchain: GfxSwapchainHandle, queue: GfxQueueType) -> GfxResult<()> {
        let mut state = self.lock();
        Self::check_alive(&state)?;
        let s = state.swapchains.get_mut(swapchain).ok_or_else(|| GfxError::invalid_handle("present: unknown swapchain"))?;
        let Some(index) = s.acquired.take() else {
            return Err(GfxError::invalid_usage("present without an acquired back buffer"));
        };
        let back_buffer = s.back_buffers[index as usize];
        self.enqueue(state, queue, HeadlessQueueOp::Present { back_buffer });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        basic::format::GfxFormat,
        commands::{
            barrier::GfxBarrier,
            command::{GfxColorAttachment, GfxLoadOp, GfxRenderingDesc},
        },
        error::GfxErrorKind,
    };

    fn device(mode: HeadlessExecutionMode) -> Arc<HeadlessDevice> {
        HeadlessDevice::with_mode(mode)
    }

    fn submit(device: &HeadlessDevice, queue: GfxQueueType, commands: Vec<GfxCommand>) {
        let allocator = device.create_command_allocator(queue, "alloc").unwrap();
        let list = device.create_command_list(queue, "list").unwrap();
        device.record_command_list(list, allocator, &commands).unwrap();
        device.queue_submit(queue, &[list]).unwrap();
    }

    #[test]
    fn test_barrier_mismatch_is_reported() {
        let device = device(HeadlessExecutionMode::Immediate);
        let texture = device
            .create_resource(&GfxResourceDesc::texture_2d(
                GfxExtent2D::new(8, 8),
                GfxFormat::Rgba8Unorm,
                GfxResourceUsage::RENDER_TARGET | GfxResourceUsage::SHADER_RESOURCE,
                "albedo",
            ))
            .unwrap();

        submit(
            &device,
            GfxQueueType::Graphics,
            vec![GfxCommand::Barriers(vec![GfxBarrier::transition(
                texture,
                GfxResourceState::RenderTarget,
                GfxResourceState::ShaderResource,
            )])],
        );

        let errors = device.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("albedo"));
        assert_eq!(device.resource_state(texture), Some(GfxResourceState::ShaderResource));
    }

    #[test]
    fn test_attachment_state_is_checked() {
        let device = device(HeadlessExecutionMode::Immediate);
        let texture = device
            .create_resource(&GfxResourceDesc::texture_2d(
                GfxExtent2D::new(8, 8),
                GfxFormat::Rgba8Unorm,
                GfxResourceUsage::RENDER_TARGET,
                "target",
            ))
            .unwrap();
        device.write_descriptor(GfxDescriptorHeapKind::Rtv, 0, texture, GfxViewDesc::RenderTarget).unwrap();

        let rendering = GfxCommand::BeginRendering(GfxRenderingDesc {
            colors: vec![GfxColorAttachment {
                rtv: 0,
                load_op: GfxLoadOp::DontCare,
            }],
            depth: None,
            extent: GfxExtent2D::new(8, 8),
        });
        submit(&device, GfxQueueType::Graphics, vec![rendering.clone(), GfxCommand::EndRendering]);
        assert_eq!(device.validation_errors().len(), 1);

        submit(
            &device,
            GfxQueueType::Graphics,
            vec![
                GfxCommand::Barriers(vec![GfxBarrier::transition(
                    texture,
                    GfxResourceState::Undefined,
                    GfxResourceState::RenderTarget,
                )]),
                rendering,
                GfxCommand::EndRendering,
            ],
        );
        assert_eq!(device.validation_errors().len(), 1);
    }

    #[test]
    fn test_copy_moves_buffer_bytes() {
        let device = device(HeadlessExecutionMode::Immediate);
        let staging = device
            .create_resource(&GfxResourceDesc::buffer(4, GfxResourceUsage::UPLOAD | GfxResourceUsage::COPY_SRC, "staging"))
            .unwrap();
        let target = device
            .create_resource(&GfxResourceDesc::buffer(4, GfxResourceUsage::COPY_DST, "target"))
            .unwrap();
        device.write_resource(staging, 0, &[1, 2, 3, 4]).unwrap();

        submit(
            &device,
            GfxQueueType::Copy,
            vec![
                GfxCommand::Barriers(vec![GfxBarrier::transition(
                    target,
                    GfxResourceState::Undefined,
                    GfxResourceState::CopyDest,
                )]),
                GfxCommand::CopyResource {
                    src: staging,
                    dst: target,
                },
            ],
        );

        assert!(device.validation_errors().is_empty());
        assert_eq!(device.read_resource(target).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_destroy_while_in_flight_is_reported() {
        let device = device(HeadlessExecutionMode::Manual);
        let buffer = device
            .create_resource(&GfxResourceDesc::buffer(16, GfxResourceUsage::INDEX, "indices"))
            .unwrap();
        submit(
            &device,
            GfxQueueType::Graphics,
            vec![GfxCommand::Barriers(vec![GfxBarrier::transition(
                buffer,
                GfxResourceState::Undefined,
                GfxResourceState::IndexBuffer,
            )])],
        );

        device.destroy_resource(buffer);
        assert_eq!(device.validation_errors().len(), 1);
        device.run_gpu();
    }

    #[test]
    fn test_stalled_device_times_out_then_resumes() {
        let device = device(HeadlessExecutionMode::Stalled);
        let fence = device.create_fence("stall").unwrap();
        device.queue_signal(GfxQueueType::Graphics, fence, 1).unwrap();

        assert!(!device.wait_fence(fence, 1, Some(Duration::from_millis(20))).unwrap());
        device.resume();
        assert!(device.wait_fence(fence, 1, Some(Duration::from_millis(20))).unwrap());
        assert_eq!(device.fence_completed_value(fence).unwrap(), 1);
    }

    #[test]
    fn test_descriptor_usage_is_validated() {
        let device = device(HeadlessExecutionMode::Immediate);
        let buffer = device
            .create_resource(&GfxResourceDesc::buffer(16, GfxResourceUsage::SHADER_RESOURCE, "structured"))
            .unwrap();
        let err = device
            .write_descriptor(GfxDescriptorHeapKind::CbvSrvUav, 0, buffer, GfxViewDesc::UnorderedAccess)
            .unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::InvalidUsage);

        let capacity = device.descriptor_capacity().cbv_srv_uav;
        let err = device
            .write_descriptor(GfxDescriptorHeapKind::CbvSrvUav, capacity, buffer, GfxViewDesc::ShaderResource)
            .unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::InvalidUsage);
    }

    #[test]
    fn test_device_lost_wakes_waiters() {
        let device = device(HeadlessExecutionMode::Stalled);
        let fence = device.create_fence("lost").unwrap();
        device.queue_signal(GfxQueueType::Graphics, fence, 1).unwrap();

        let waiter = {
            let device = device.clone();
            std::thread::spawn(move || device.wait_fence(fence, 1, None))
        };
        std::thread::sleep(Duration::from_millis(20));
        device.simulate_device_lost();

        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::DeviceLost);
    }
}
