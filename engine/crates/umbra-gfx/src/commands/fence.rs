use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    device::{GfxDevice, GfxFenceHandle, GfxQueueType},
    error::GfxResult,
};

/// 单调递增的 GPU fence
///
/// `next_value` 只由所属的 queue 推进；某个值完成，当且仅当 GPU 报告的完成值不小于它。
///
/// # Destroy
/// 需要手动调用 [`GfxFence::destroy`]
pub struct GfxFence {
    device: Arc<dyn GfxDevice>,
    handle: GfxFenceHandle,

    /// 最近一次 signal 的值，0 表示从未 signal
    last_signaled: u64,
    /// 上一次从设备读到的完成值，只作为缓存
    completed_cache: AtomicU64,

    name: String,
}

// new & init
impl GfxFence {
    pub fn new(device: Arc<dyn GfxDevice>, name: impl Into<String>) -> GfxResult<Self> {
        let name = name.into();
        let handle = device.create_fence(&name)?;
        Ok(Self {
            device,
            handle,
            last_signaled: 0,
            completed_cache: AtomicU64::new(0),
            name,
        })
    }
}

// destroy
impl GfxFence {
    pub fn destroy(self) {
        self.device.destroy_fence(self.handle);
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> GfxFenceHandle {
        self.handle
    }

    #[inline]
    pub fn last_signaled_value(&self) -> u64 {
        self.last_signaled
    }

    /// 下一次 signal 将使用的值
    #[inline]
    pub fn next_value(&self) -> u64 {
        self.last_signaled + 1
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// tools
impl GfxFence {
    /// 在 `queue` 上追加一次 signal，返回新的值
    pub fn signal(&mut self, queue: GfxQueueType) -> GfxResult<u64> {
        let value = self.last_signaled + 1;
        self.device.queue_signal(queue, self.handle, value)?;
        self.last_signaled = value;
        Ok(value)
    }

    /// 从设备读取最新的完成值
    pub fn completed_value(&self) -> GfxResult<u64> {
        let value = self.device.fence_completed_value(self.handle)?;
        self.completed_cache.fetch_max(value, Ordering::AcqRel);
        Ok(value)
    }

    /// 非阻塞
    pub fn is_complete(&self, value: u64) -> GfxResult<bool> {
        if value <= self.completed_cache.load(Ordering::Acquire) {
            return Ok(true);
        }
        Ok(self.completed_value()? >= value)
    }

    /// 阻塞等待，直到 `value` 完成
    pub fn wait_for_value(&self, value: u64) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxFence::wait_for_value");
        if self.is_complete(value)? {
            return Ok(());
        }
        self.device.wait_fence(self.handle, value, None)?;
        self.completed_cache.fetch_max(value, Ordering::AcqRel);
        Ok(())
    }

    /// 带超时的等待，超时返回 `false`
    pub fn wait_for_value_timeout(&self, value: u64, timeout: Duration) -> GfxResult<bool> {
        if self.is_complete(value)? {
            return Ok(true);
        }
        let reached = self.device.wait_fence(self.handle, value, Some(timeout))?;
        if reached {
            self.completed_cache.fetch_max(value, Ordering::AcqRel);
        }
        Ok(reached)
    }
}
