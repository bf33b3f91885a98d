use std::sync::Arc;

use itertools::Itertools;

use crate::{
    commands::{
        command_list_pool::{GfxCommandListPool, GfxCommandListPoolStats},
        fence::GfxFence,
        graphics_context::GfxGraphicsContext,
    },
    device::{GfxDevice, GfxQueueType},
    error::{GfxError, GfxResult},
};

/// 一个 GPU 队列，拥有自己的 fence 与 command list 池
///
/// 同一队列内的批次按提交顺序执行；跨队列的依赖需要显式调用 [`GfxCommandQueue::wait_for_queue`]。
///
/// # Destroy
/// 需要手动调用 [`GfxCommandQueue::destroy`]
pub struct GfxCommandQueue {
    device: Arc<dyn GfxDevice>,
    queue_type: GfxQueueType,

    fence: GfxFence,
    pool: GfxCommandListPool,

    name: String,
}

// new & init
impl GfxCommandQueue {
    pub fn new(device: Arc<dyn GfxDevice>, queue_type: GfxQueueType, name: impl Into<String>) -> GfxResult<Self> {
        let name = name.into();
        let fence = GfxFence::new(device.clone(), format!("{}-fence", name))?;
        log::info!("create {:?} queue: {}", queue_type, name);

        Ok(Self {
            device,
            queue_type,
            fence,
            pool: GfxCommandListPool::new(queue_type),
            name,
        })
    }
}

// destroy
impl GfxCommandQueue {
    /// 等待队列上的所有工作完成后，销毁 fence 与池中的对象
    pub fn destroy(mut self) -> GfxResult<()> {
        let flushed = self.flush();
        self.pool.destroy(self.device.as_ref());
        self.fence.destroy();
        flushed.map(|_| ())
    }
}

// getters
impl GfxCommandQueue {
    #[inline]
    pub fn queue_type(&self) -> GfxQueueType {
        self.queue_type
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn fence(&self) -> &GfxFence {
        &self.fence
    }

    #[inline]
    pub fn last_signaled_value(&self) -> u64 {
        self.fence.last_signaled_value()
    }

    #[inline]
    pub fn completed_value(&self) -> GfxResult<u64> {
        self.fence.completed_value()
    }

    #[inline]
    pub fn pool_stats(&self) -> GfxCommandListPoolStats {
        self.pool.stats()
    }

    #[inline]
    pub fn pool(&self) -> &GfxCommandListPool {
        &self.pool
    }
}

// sync
impl GfxCommandQueue {
    /// 计数器加一，并让 GPU 在之前的工作完成后写入该值
    pub fn signal(&mut self) -> GfxResult<u64> {
        self.fence.signal(self.queue_type)
    }

    #[inline]
    pub fn is_complete(&self, value: u64) -> GfxResult<bool> {
        self.fence.is_complete(value)
    }

    pub fn wait_for_value(&self, value: u64) -> GfxResult<()> {
        if value > self.fence.last_signaled_value() {
            return Err(GfxError::invalid_usage(format!(
                "queue {}: wait for value {} which has not been signaled (last {})",
                self.name,
                value,
                self.fence.last_signaled_value()
            )));
        }
        self.fence.wait_for_value(value)
    }

    /// signal 后等待，返回 signal 的值
    pub fn flush(&mut self) -> GfxResult<u64> {
        let value = self.signal()?;
        self.fence.wait_for_value(value)?;
        log::debug!("queue {} flushed at {}", self.name, value);
        Ok(value)
    }

    /// 后续提交到本队列的工作在 GPU 上等待 `other` 的 fence 达到 `value`
    pub fn wait_for_queue(&mut self, other: &GfxCommandQueue, value: u64) -> GfxResult<()> {
        if value > other.last_signaled_value() {
            return Err(GfxError::invalid_usage(format!(
                "queue {} waits for {}:{} which has not been signaled",
                self.name, other.name, value
            )));
        }
        self.device.queue_wait(self.queue_type, other.fence.handle(), value)
    }
}

// submit
impl GfxCommandQueue {
    pub fn acquire_context(&mut self, name: impl Into<String>) -> GfxResult<GfxGraphicsContext> {
        let name = name.into();
        let (allocator, list) = self.pool.acquire(self.device.as_ref(), &self.fence, &self.name)?;
        Ok(GfxGraphicsContext::new(self.queue_type, list, allocator, name))
    }

    #[inline]
    pub fn execute_context(&mut self, context: GfxGraphicsContext) -> GfxResult<u64> {
        self.execute_contexts(vec![context])
    }

    /// 依次 close 每个 context，然后按给定顺序作为一个批次提交
    ///
    /// 返回该批次完成时 fence 将达到的值。
    pub fn execute_contexts(&mut self, contexts: Vec<GfxGraphicsContext>) -> GfxResult<u64> {
        let _span = tracy_client::span!("GfxCommandQueue::execute_contexts");

        let mismatch = contexts.iter().find(|ctx| ctx.queue_type() != self.queue_type).map(|ctx| {
            GfxError::invalid_usage(format!(
                "context {} ({:?}) submitted to {:?} queue {}",
                ctx.name(),
                ctx.queue_type(),
                self.queue_type,
                self.name
            ))
        });
        if let Some(err) = mismatch {
            self.discard_contexts(contexts);
            return Err(err);
        }

        let mut closed = Vec::with_capacity(contexts.len());
        let mut contexts = contexts.into_iter();
        while let Some(ctx) = contexts.next() {
            let (list, allocator) = ctx.handles();
            let recorded = ctx
                .close()
                .and_then(|(list, allocator, commands)| self.device.record_command_list(list, allocator, &commands));
            if let Err(err) = recorded {
                // 没有提交的 list 直接归还
                self.pool.release_unused(allocator, list);
                for (list, allocator) in closed.drain(..) {
                    self.pool.release_unused(allocator, list);
                }
                for ctx in contexts.by_ref() {
                    let (list, allocator) = ctx.handles();
                    self.pool.release_unused(allocator, list);
                }
                return Err(err);
            }
            closed.push((list, allocator));
        }

        let lists = closed.iter().map(|(list, _)| *list).collect_vec();
        self.device.queue_submit(self.queue_type, &lists)?;
        let fence_value = self.signal()?;

        for (list, allocator) in closed {
            self.pool.release(allocator, list, fence_value);
        }
        Ok(fence_value)
    }

    /// 未提交的 context：同类型的归还到本队列的池，其它类型的直接销毁
    fn discard_contexts(&mut self, contexts: Vec<GfxGraphicsContext>) {
        for ctx in contexts {
            let (list, allocator) = ctx.handles();
            if ctx.queue_type() == self.queue_type {
                self.pool.release_unused(allocator, list);
            } else {
                self.device.destroy_command_allocator(allocator);
                self.device.destroy_command_list(list);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::{
        backend::headless::{HeadlessDevice, HeadlessEvent, HeadlessExecutionMode},
        commands::command_list_pool::GfxAllocatorState,
        error::GfxErrorKind,
    };

    fn queue(device: &Arc<HeadlessDevice>, queue_type: GfxQueueType) -> GfxCommandQueue {
        GfxCommandQueue::new(device.clone(), queue_type, format!("{:?}", queue_type)).unwrap()
    }

    #[test]
    fn test_signal_is_monotonic_by_one() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut queue = queue(&device, GfxQueueType::Graphics);

        let values = (0..5).map(|_| queue.signal().unwrap()).collect_vec();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
        assert_eq!(queue.flush().unwrap(), 6);
        queue.destroy().unwrap();
    }

    #[test]
    fn test_completion_follows_gpu() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Manual);
        let mut queue = queue(&device, GfxQueueType::Graphics);

        let ctx = queue.acquire_context("work").unwrap();
        let value = queue.execute_context(ctx).unwrap();
        assert!(!queue.is_complete(value).unwrap());

        device.run_gpu();
        assert!(queue.is_complete(value).unwrap());

        device.set_mode(HeadlessExecutionMode::Immediate);
        queue.destroy().unwrap();
    }

    #[test]
    fn test_wait_for_value_blocks_until_gpu_runs() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Manual);
        let mut queue = queue(&device, GfxQueueType::Graphics);
        let value = queue.signal().unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        let waiter = {
            let device = device.clone();
            let fence = queue.fence().handle();
            thread::spawn(move || {
                let result = device.wait_fence(fence, value, None);
                let _ = tx.send(result);
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!queue.is_complete(value).unwrap());

        device.run_gpu();
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.is_ok());
        assert!(queue.is_complete(value).unwrap());
        waiter.join().unwrap();

        device.set_mode(HeadlessExecutionMode::Immediate);
        queue.destroy().unwrap();
    }

    #[test]
    fn test_wait_for_unsignaled_value_is_error() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let queue = queue(&device, GfxQueueType::Graphics);
        let err = queue.wait_for_value(1).unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::InvalidUsage);
        queue.destroy().unwrap();
    }

    #[test]
    fn test_allocator_not_reused_while_in_flight() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Manual);
        let mut queue = queue(&device, GfxQueueType::Graphics);

        let ctx = queue.acquire_context("frame-0").unwrap();
        let first = queue.execute_context(ctx).unwrap();

        // 第一批次还在 GPU 上，必须新建 allocator
        let ctx = queue.acquire_context("frame-1").unwrap();
        assert_eq!(queue.pool_stats().allocators_created, 2);
        assert_eq!(queue.pool_stats().allocator_reuses, 0);
        assert_eq!(queue.pool().allocator_states(), vec![GfxAllocatorState::InFlight { fence_value: first }]);
        let second = queue.execute_context(ctx).unwrap();

        device.run_gpu();
        assert!(queue.is_complete(second).unwrap());

        let ctx = queue.acquire_context("frame-2").unwrap();
        assert_eq!(queue.pool_stats().allocators_created, 2);
        assert_eq!(queue.pool_stats().allocator_reuses, 1);
        queue.execute_context(ctx).unwrap();
        device.run_gpu();

        // list 在提交后立即回到池中，一个就够
        assert_eq!(queue.pool_stats().lists_created, 1);
        assert!(device.validation_errors().is_empty());
        device.set_mode(HeadlessExecutionMode::Immediate);
        queue.destroy().unwrap();
    }

    #[test]
    fn test_contexts_execute_in_given_order() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut queue = queue(&device, GfxQueueType::Graphics);

        let mut a = queue.acquire_context("a").unwrap();
        a.begin_label("a");
        a.end_label();
        let mut b = queue.acquire_context("b").unwrap();
        b.begin_label("b");
        b.end_label();
        queue.execute_contexts(vec![a, b]).unwrap();

        let labels = device
            .events()
            .into_iter()
            .filter_map(|e| match e {
                HeadlessEvent::BeginLabel { name, .. } => Some(name),
                _ => None,
            })
            .collect_vec();
        assert_eq!(labels, vec!["a".to_string(), "b".to_string()]);
        queue.destroy().unwrap();
    }

    #[test]
    fn test_cross_queue_wait_orders_execution() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Manual);
        let mut graphics = queue(&device, GfxQueueType::Graphics);
        let mut compute = queue(&device, GfxQueueType::Compute);

        let mut producer = graphics.acquire_context("producer").unwrap();
        producer.begin_label("producer");
        producer.end_label();

        // 先把 producer 的 signal 值确定下来，再让 compute 在其之上等待
        let produced = graphics.execute_context(producer).unwrap();
        compute.wait_for_queue(&graphics, produced).unwrap();

        let mut consumer = compute.acquire_context("consumer").unwrap();
        consumer.begin_label("consumer");
        consumer.end_label();
        let consumed = compute.execute_context(consumer).unwrap();

        // 只推进 compute 队列时，consumer 必须停在 wait 上
        device.run_queue(GfxQueueType::Compute);
        assert!(!compute.is_complete(consumed).unwrap());

        device.run_gpu();
        assert!(compute.is_complete(consumed).unwrap());

        let labels = device
            .events()
            .into_iter()
            .filter_map(|e| match e {
                HeadlessEvent::BeginLabel { name, .. } => Some(name),
                _ => None,
            })
            .collect_vec();
        assert_eq!(labels, vec!["producer".to_string(), "consumer".to_string()]);

        device.set_mode(HeadlessExecutionMode::Immediate);
        graphics.destroy().unwrap();
        compute.destroy().unwrap();
    }

    #[test]
    fn test_wrong_queue_type_rejected() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut graphics = queue(&device, GfxQueueType::Graphics);
        let mut copy = queue(&device, GfxQueueType::Copy);

        let ctx = copy.acquire_context("upload").unwrap();
        let ok = graphics.acquire_context("draw").unwrap();
        assert_eq!(device.allocator_count(), 2);
        assert_eq!(device.list_count(), 2);

        let err = graphics.execute_contexts(vec![ok, ctx]).unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::InvalidUsage);
        assert_eq!(graphics.last_signaled_value(), 0);

        // 同类型的回到 graphics 池，copy 的 context 被销毁
        assert_eq!(device.allocator_count(), 1);
        assert_eq!(device.list_count(), 1);
        assert_eq!(graphics.pool().allocator_states(), vec![GfxAllocatorState::Available]);
        assert_eq!(graphics.pool().idle_list_count(), 1);

        graphics.destroy().unwrap();
        copy.destroy().unwrap();
        assert_eq!(device.allocator_count(), 0);
        assert_eq!(device.list_count(), 0);
    }

    #[test]
    fn test_destroy_drains_pending_work() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Manual);
        let mut queue = queue(&device, GfxQueueType::Graphics);

        let ctx = queue.acquire_context("pending").unwrap();
        let value = queue.execute_context(ctx).unwrap();
        assert_eq!(device.pending_ops(GfxQueueType::Graphics), 2);

        let (tx, rx) = crossbeam_channel::bounded(1);
        let destroyer = thread::spawn(move || {
            let _ = tx.send(queue.destroy());
        });

        // destroy 等待 GPU，切回 Immediate 后积压的工作被执行
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        device.set_mode(HeadlessExecutionMode::Immediate);
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.is_ok());
        destroyer.join().unwrap();

        assert_eq!(device.pending_ops(GfxQueueType::Graphics), 0);
        assert_eq!(device.allocator_count(), 0);
        assert!(value > 0);
    }

    #[test]
    fn test_device_lost_surfaces_from_submit() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut queue = queue(&device, GfxQueueType::Graphics);
        device.simulate_device_lost();

        let ctx = queue.acquire_context("lost");
        let err = match ctx {
            Ok(ctx) => queue.execute_context(ctx).unwrap_err(),
            Err(err) => err,
        };
        assert_eq!(err.kind(), GfxErrorKind::DeviceLost);
        assert!(!err.is_fatal());
    }
}
