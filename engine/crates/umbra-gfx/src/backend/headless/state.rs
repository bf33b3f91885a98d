//! 模拟 GPU 的内部状态与命令执行

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use slotmap::SlotMap;

use crate::{
    basic::{extent::GfxExtent2D, format::GfxFormat},
    commands::{barrier::GfxResourceState, command::GfxCommand},
    device::{
        GfxCommandAllocatorHandle, GfxCommandListHandle, GfxFenceHandle, GfxPipelineHandle, GfxQueueType,
        GfxResourceHandle, GfxSwapchainHandle,
    },
    pipelines::pipeline_state::GfxPipelineKind,
    resources::{GfxDescriptorHeapKind, GfxResourceDesc, GfxResourceUsage},
};

/// 超过该大小的 buffer 不在 CPU 侧保存内容
const MAX_SHADOWED_BUFFER_SIZE: u64 = 64 << 20;

/// GPU 的推进方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlessExecutionMode {
    /// 提交即执行
    Immediate,
    /// 只有调用 `run_gpu` / `run_queue` 时才执行
    Manual,
    /// 永不执行，直到 `resume`
    Stalled,
}

/// 模拟 GPU 执行时产生的事件，按执行顺序记录
#[derive(Debug, Clone, PartialEq)]
pub enum HeadlessEvent {
    ExecuteList {
        queue: GfxQueueType,
        list: String,
    },
    BeginLabel {
        queue: GfxQueueType,
        name: String,
    },
    EndLabel {
        queue: GfxQueueType,
    },
    Barrier {
        queue: GfxQueueType,
        resource: String,
        before: GfxResourceState,
        after: GfxResourceState,
    },
    BeginRendering {
        queue: GfxQueueType,
        colors: Vec<String>,
        depth: Option<String>,
    },
    EndRendering {
        queue: GfxQueueType,
    },
    Draw {
        queue: GfxQueueType,
        pipeline: String,
    },
    Dispatch {
        queue: GfxQueueType,
        pipeline: String,
    },
    Copy {
        queue: GfxQueueType,
        src: String,
        dst: String,
    },
    Signal {
        queue: GfxQueueType,
        fence: String,
        value: u64,
    },
    Wait {
        queue: GfxQueueType,
        fence: String,
        value: u64,
    },
    Present {
        back_buffer: String,
    },
}

pub(super) struct HeadlessFence {
    pub name: String,
    pub completed: u64,
    /// 已经进入队列的最大 signal 值
    pub enqueued: u64,
}

pub(super) struct HeadlessAllocator {
    pub name: String,
    /// 引用该 allocator 且尚未执行完的批次数
    pub in_flight: usize,
}

#[derive(Clone)]
pub(super) struct HeadlessRecordedList {
    pub name: String,
    pub allocator: GfxCommandAllocatorHandle,
    pub commands: Arc<Vec<GfxCommand>>,
}

pub(super) struct HeadlessList {
    pub queue: GfxQueueType,
    pub name: String,
    pub recorded: Option<HeadlessRecordedList>,
}

pub(super) struct HeadlessResource {
    pub desc: GfxResourceDesc,
    pub state: GfxResourceState,
    pub data: Vec<u8>,
    /// 引用该资源且尚未执行完的批次数
    pub in_flight: usize,
}

pub(super) struct HeadlessPipeline {
    pub name: String,
    pub kind: GfxPipelineKind,
}

pub(super) struct HeadlessSwapchain {
    pub extent: GfxExtent2D,
    pub format: GfxFormat,
    pub back_buffers: Vec<GfxResourceHandle>,
    pub acquired: Option<u32>,
    pub next: u32,
}

pub(super) enum HeadlessQueueOp {
    Execute {
        lists: Vec<HeadlessRecordedList>,
        referenced: Vec<GfxResourceHandle>,
    },
    Signal {
        fence: GfxFenceHandle,
        value: u64,
    },
    Wait {
        fence: GfxFenceHandle,
        value: u64,
    },
    Present {
        back_buffer: GfxResourceHandle,
    },
}

pub(super) struct HeadlessState {
    pub mode: HeadlessExecutionMode,
    pub lost: bool,
    /// 还能成功写入的描述符数量，用完后下一次写入失败
    pub descriptor_write_budget: Option<u32>,

    pub fences: SlotMap<GfxFenceHandle, HeadlessFence>,
    pub allocators: SlotMap<GfxCommandAllocatorHandle, HeadlessAllocator>,
    pub lists: SlotMap<GfxCommandListHandle, HeadlessList>,
    pub resources: SlotMap<GfxResourceHandle, HeadlessResource>,
    pub pipelines: SlotMap<GfxPipelineHandle, HeadlessPipeline>,
    pub swapchains: SlotMap<GfxSwapchainHandle, HeadlessSwapchain>,
    pub descriptors: HashMap<(GfxDescriptorHeapKind, u32), GfxResourceHandle>,

    pub queues: [VecDeque<HeadlessQueueOp>; 3],

    pub events: Vec<HeadlessEvent>,
    pub validation_errors: Vec<String>,
}

// new & init
impl HeadlessState {
    pub fn new(mode: HeadlessExecutionMode) -> Self {
        Self {
            mode,
            lost: false,
            descriptor_write_budget: None,
            fences: SlotMap::with_key(),
            allocators: SlotMap::with_key(),
            lists: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            swapchains: SlotMap::with_key(),
            descriptors: HashMap::new(),
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            events: Vec::new(),
            validation_errors: Vec::new(),
        }
    }

    pub fn new_resource(desc: &GfxResourceDesc) -> HeadlessResource {
        let data = match desc.buffer_size() {
            Some(size) if size <= MAX_SHADOWED_BUFFER_SIZE => vec![0; size as usize],
            _ => Vec::new(),
        };
        let state =
            if desc.usage.contains(GfxResourceUsage::UPLOAD) { GfxResourceState::GenericRead } else { GfxResourceState::Undefined };
        HeadlessResource {
            desc: desc.clone(),
            state,
            data,
            in_flight: 0,
        }
    }
}

// queue
impl HeadlessState {
    #[inline]
    pub fn queues_idle(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    /// 尽可能推进队列，返回执行的操作数
    ///
    /// `only` 为 `Some` 时只推进该队列。
    pub fn process(&mut self, only: Option<GfxQueueType>) -> usize {
        let mut processed = 0;
        loop {
            let mut progressed = false;
            for queue in GfxQueueType::ALL {
                if only.is_some_and(|q| q != queue) {
                    continue;
                }
                loop {
                    let ready = match self.queues[queue.index()].front() {
                        None => false,
                        Some(HeadlessQueueOp::Wait { fence, value }) => {
                            self.fences.get(*fence).is_none_or(|f| f.completed >= *value)
                        }
                        Some(_) => true,
                    };
                    if !ready {
                        break;
                    }
                    let Some(op) = self.queues[queue.index()].pop_front() else {
                        break;
                    };
                    self.execute_op(queue, op);
                    progressed = true;
                    processed += 1;
                }
            }
            if !progressed {
                break;
            }
        }
        processed
    }

    fn execute_op(&mut self, queue: GfxQueueType, op: HeadlessQueueOp) {
        match op {
            HeadlessQueueOp::Execute { lists, referenced } => {
                for list in &lists {
                    self.execute_list(queue, list);
                    if let Some(allocator) = self.allocators.get_mut(list.allocator) {
                        allocator.in_flight = allocator.in_flight.saturating_sub(1);
                    }
                }
                for resource in referenced {
                    if let Some(resource) = self.resources.get_mut(resource) {
                        resource.in_flight = resource.in_flight.saturating_sub(1);
                    }
                }
            }
            HeadlessQueueOp::Signal { fence, value } => {
                if let Some(f) = self.fences.get_mut(fence) {
                    f.completed = f.completed.max(value);
                    self.events.push(HeadlessEvent::Signal {
                        queue,
                        fence: f.name.clone(),
                        value,
                    });
                }
            }
            HeadlessQueueOp::Wait { fence, value } => {
                let fence = self.fences.get(fence).map(|f| f.name.clone()).unwrap_or_default();
                self.events.push(HeadlessEvent::Wait { queue, fence, value });
            }
            HeadlessQueueOp::Present { back_buffer } => {
                let name = self.resource_name(back_buffer);
                match self.resources.get(back_buffer) {
                    Some(r) if r.state == GfxResourceState::Present => {}
                    Some(r) => {
                        let state = r.state;
                        self.error(format!("present: {} is in {:?}, expected Present", name, state));
                    }
                    None => self.error("present: back buffer was destroyed".to_string()),
                }
                self.events.push(HeadlessEvent::Present { back_buffer: name });
            }
        }
    }
}

// 命令模拟
impl HeadlessState {
    fn execute_list(&mut self, queue: GfxQueueType, list: &HeadlessRecordedList) {
        self.events.push(HeadlessEvent::ExecuteList {
            queue,
            list: list.name.clone(),
        });

        let mut pipeline: Option<GfxPipelineHandle> = None;
        for cmd in list.commands.iter() {
            match cmd {
                GfxCommand::BeginLabel(name) => self.events.push(HeadlessEvent::BeginLabel {
                    queue,
                    name: name.clone(),
                }),
                GfxCommand::EndLabel => self.events.push(HeadlessEvent::EndLabel { queue }),
                GfxCommand::Barriers(barriers) => {
                    for barrier in barriers {
                        let name = self.resource_name(barrier.resource);
                        match self.resources.get_mut(barrier.resource) {
                            None => self.error(format!("barrier on destroyed resource {}", name)),
                            Some(r) => {
                                let actual = r.state;
                                r.state = barrier.after;
                                if actual != barrier.before {
                                    self.error(format!(
                                        "{}: barrier expects {:?} but resource is in {:?}",
                                        name, barrier.before, actual
                                    ));
                                }
                            }
                        }
                        self.events.push(HeadlessEvent::Barrier {
                            queue,
                            resource: name,
                            before: barrier.before,
                            after: barrier.after,
                        });
                    }
                }
                GfxCommand::BeginRendering(desc) => {
                    let colors = desc
                        .colors
                        .iter()
                        .map(|c| {
                            self.expect_attachment(GfxDescriptorHeapKind::Rtv, c.rtv, &[GfxResourceState::RenderTarget])
                        })
                        .collect();
                    let depth = desc.depth.map(|d| {
                        self.expect_attachment(
                            GfxDescriptorHeapKind::Dsv,
                            d.dsv,
                            &[GfxResourceState::DepthWrite, GfxResourceState::DepthRead],
                        )
                    });
                    self.events.push(HeadlessEvent::BeginRendering { queue, colors, depth });
                }
                GfxCommand::EndRendering => self.events.push(HeadlessEvent::EndRendering { queue }),
                GfxCommand::SetPipeline(p) => {
                    if self.pipelines.contains_key(*p) {
                        pipeline = Some(*p);
                    } else {
                        self.error("bind of a destroyed pipeline".to_string());
                    }
                }
                GfxCommand::Draw { .. } | GfxCommand::DrawIndexed { .. } => {
                    let name = self.expect_pipeline(pipeline, GfxPipelineKind::Graphics);
                    self.events.push(HeadlessEvent::Draw { queue, pipeline: name });
                }
                GfxCommand::Dispatch { .. } => {
                    let name = self.expect_pipeline(pipeline, GfxPipelineKind::Compute);
                    self.events.push(HeadlessEvent::Dispatch { queue, pipeline: name });
                }
                GfxCommand::SetIndexBuffer { buffer, .. } => {
                    self.expect_state(*buffer, &[GfxResourceState::IndexBuffer, GfxResourceState::GenericRead]);
                }
                GfxCommand::CopyResource { src, dst } => {
                    self.expect_copy_operands(*src, *dst);
                    let len = self.resources.get(*src).map(|r| r.data.len()).unwrap_or(0);
                    self.copy_bytes(*src, 0, *dst, 0, len as u64);
                    self.push_copy_event(queue, *src, *dst);
                }
                GfxCommand::CopyBufferRegion {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    self.expect_copy_operands(*src, *dst);
                    self.copy_bytes(*src, *src_offset, *dst, *dst_offset, *size);
                    self.push_copy_event(queue, *src, *dst);
                }
                GfxCommand::CopyBufferToTexture { src, dst, .. } => {
                    self.expect_copy_operands(*src, *dst);
                    self.push_copy_event(queue, *src, *dst);
                }
                GfxCommand::SetViewport(_) | GfxCommand::SetTopology(_) | GfxCommand::SetRootConstants(_) => {}
            }
        }
    }

    fn expect_attachment(&mut self, heap: GfxDescriptorHeapKind, index: u32, allowed: &[GfxResourceState]) -> String {
        match self.descriptors.get(&(heap, index)).copied() {
            Some(resource) => {
                self.expect_state(resource, allowed);
                self.resource_name(resource)
            }
            None => {
                self.error(format!("{:?} descriptor {} is empty", heap, index));
                String::new()
            }
        }
    }

    fn expect_pipeline(&mut self, pipeline: Option<GfxPipelineHandle>, kind: GfxPipelineKind) -> String {
        match pipeline.and_then(|p| self.pipelines.get(p)) {
            Some(p) if p.kind == kind => p.name.clone(),
            Some(p) => {
                let name = p.name.clone();
                self.error(format!("pipeline {} bound as {:?}", name, kind));
                name
            }
            None => {
                self.error(format!("{:?} work recorded without a pipeline", kind));
                String::new()
            }
        }
    }

    fn expect_copy_operands(&mut self, src: GfxResourceHandle, dst: GfxResourceHandle) {
        self.expect_state(src, &[GfxResourceState::CopySource, GfxResourceState::GenericRead]);
        self.expect_state(dst, &[GfxResourceState::CopyDest]);
    }

    fn expect_state(&mut self, resource: GfxResourceHandle, allowed: &[GfxResourceState]) {
        let name = self.resource_name(resource);
        match self.resources.get(resource).map(|r| r.state) {
            Some(state) if allowed.contains(&state) => {}
            Some(state) => self.error(format!("{} is in {:?}, expected one of {:?}", name, state, allowed)),
            None => self.error(format!("use of destroyed resource {}", name)),
        }
    }

    fn copy_bytes(&mut self, src: GfxResourceHandle, src_offset: u64, dst: GfxResourceHandle, dst_offset: u64, size: u64) {
        let Some(bytes) = self.resources.get(src).and_then(|r| {
            let start = src_offset as usize;
            let end = start.checked_add(size as usize)?;
            r.data.get(start..end).map(|b| b.to_vec())
        }) else {
            return;
        };
        let mut out_of_range = false;
        if let Some(r) = self.resources.get_mut(dst) {
            let start = dst_offset as usize;
            match r.data.get_mut(start..start + bytes.len()) {
                Some(target) => target.copy_from_slice(&bytes),
                None => out_of_range = !r.data.is_empty(),
            }
        }
        if out_of_range {
            self.error(format!("copy into {} is out of range", self.resource_name(dst)));
        }
    }

    fn push_copy_event(&mut self, queue: GfxQueueType, src: GfxResourceHandle, dst: GfxResourceHandle) {
        let src = self.resource_name(src);
        let dst = self.resource_name(dst);
        self.events.push(HeadlessEvent::Copy { queue, src, dst });
    }
}

// tools
impl HeadlessState {
    pub fn resource_name(&self, resource: GfxResourceHandle) -> String {
        self.resources.get(resource).map(|r| r.desc.name.clone()).unwrap_or_else(|| "<destroyed>".to_string())
    }

    pub fn error(&mut self, message: String) {
        log::error!("[headless] {}", message);
        self.validation_errors.push(message);
    }

    /// 命令流中引用到的资源，attachment 通过描述符表解析
    pub fn referenced_resources(&self, commands: &[GfxCommand]) -> Vec<GfxResourceHandle> {
        let mut referenced = Vec::new();
        for cmd in commands {
            referenced.extend(cmd.direct_resources());
            if let GfxCommand::BeginRendering(desc) = cmd {
                for color in &desc.colors {
                    referenced.extend(self.descriptors.get(&(GfxDescriptorHeapKind::Rtv, color.rtv)).copied());
                }
                if let Some(depth) = desc.depth {
                    referenced.extend(self.descriptors.get(&(GfxDescriptorHeapKind::Dsv, depth.dsv)).copied());
                }
            }
        }
        referenced.sort();
        referenced.dedup();
        referenced
    }
}
