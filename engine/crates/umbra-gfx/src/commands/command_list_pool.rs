use std::collections::VecDeque;

use crate::{
    commands::fence::GfxFence,
    device::{GfxCommandAllocatorHandle, GfxCommandListHandle, GfxDevice, GfxQueueType},
    error::GfxResult,
};

/// allocator 的回收状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxAllocatorState {
    /// GPU 可能仍在使用，需要等待 `fence_value` 完成
    InFlight { fence_value: u64 },
    /// 可以 reset 之后复用
    Available,
}

#[derive(Debug)]
struct GfxAllocatorRecord {
    allocator: GfxCommandAllocatorHandle,
    state: GfxAllocatorState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GfxCommandListPoolStats {
    pub allocators_created: usize,
    pub lists_created: usize,
    /// 复用 allocator 的次数
    pub allocator_reuses: usize,
}

/// command allocator + command list 的两级 FIFO 池
///
/// allocator 按提交顺序排队，只检查队首：队首都没完成，后面的更不可能完成。
/// command list 在提交后立即回到空闲列表，因为它的内存属于 allocator。
pub struct GfxCommandListPool {
    queue_type: GfxQueueType,
    records: VecDeque<GfxAllocatorRecord>,
    idle_lists: Vec<GfxCommandListHandle>,
    stats: GfxCommandListPoolStats,
}

// new & init
impl GfxCommandListPool {
    pub fn new(queue_type: GfxQueueType) -> Self {
        Self {
            queue_type,
            records: VecDeque::new(),
            idle_lists: Vec::new(),
            stats: GfxCommandListPoolStats::default(),
        }
    }
}

// getters
impl GfxCommandListPool {
    #[inline]
    pub fn stats(&self) -> GfxCommandListPoolStats {
        self.stats
    }

    /// 池中 allocator 的状态，按 FIFO 顺序
    pub fn allocator_states(&self) -> Vec<GfxAllocatorState> {
        self.records.iter().map(|r| r.state).collect()
    }

    #[inline]
    pub fn idle_list_count(&self) -> usize {
        self.idle_lists.len()
    }
}

// tools
impl GfxCommandListPool {
    /// 取出一对 allocator 与 list
    ///
    /// 队首 allocator 的 fence 值已完成时 reset 后复用，否则新建。
    pub fn acquire(
        &mut self,
        device: &dyn GfxDevice,
        fence: &GfxFence,
        name: &str,
    ) -> GfxResult<(GfxCommandAllocatorHandle, GfxCommandListHandle)> {
        if let Some(front) = self.records.front_mut() {
            if let GfxAllocatorState::InFlight { fence_value } = front.state {
                if fence.is_complete(fence_value)? {
                    front.state = GfxAllocatorState::Available;
                }
            }
        }

        let reusable = self.records.front().is_some_and(|r| r.state == GfxAllocatorState::Available);
        let recycled = if reusable { self.records.pop_front().map(|r| r.allocator) } else { None };
        let allocator = match recycled {
            Some(allocator) => {
                device.reset_command_allocator(allocator)?;
                self.stats.allocator_reuses += 1;
                allocator
            }
            None => self.create_allocator(device, name)?,
        };

        let list = match self.idle_lists.pop() {
            Some(list) => list,
            None => {
                self.stats.lists_created += 1;
                device.create_command_list(self.queue_type, &format!("{}-list-{}", name, self.stats.lists_created))?
            }
        };

        Ok((allocator, list))
    }

    /// 提交之后归还，allocator 需要等到 `fence_value` 完成才能复用
    pub fn release(&mut self, allocator: GfxCommandAllocatorHandle, list: GfxCommandListHandle, fence_value: u64) {
        self.records.push_back(GfxAllocatorRecord {
            allocator,
            state: GfxAllocatorState::InFlight { fence_value },
        });
        self.idle_lists.push(list);
    }

    /// 录制失败等情况下直接归还，allocator 没有被 GPU 使用
    pub fn release_unused(&mut self, allocator: GfxCommandAllocatorHandle, list: GfxCommandListHandle) {
        self.records.push_front(GfxAllocatorRecord {
            allocator,
            state: GfxAllocatorState::Available,
        });
        self.idle_lists.push(list);
    }

    fn create_allocator(&mut self, device: &dyn GfxDevice, name: &str) -> GfxResult<GfxCommandAllocatorHandle> {
        self.stats.allocators_created += 1;
        log::debug!("{:?} queue: create command allocator #{}", self.queue_type, self.stats.allocators_created);
        device.create_command_allocator(self.queue_type, &format!("{}-allocator-{}", name, self.stats.allocators_created))
    }
}

// destroy
impl GfxCommandListPool {
    /// 调用方需要保证队列已经 idle
    pub fn destroy(mut self, device: &dyn GfxDevice) {
        for record in self.records.drain(..) {
            device.destroy_command_allocator(record.allocator);
        }
        for list in self.idle_lists.drain(..) {
            device.destroy_command_list(list);
        }
    }
}
