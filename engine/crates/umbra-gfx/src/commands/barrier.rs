//! 资源状态与 barrier 批处理

use crate::device::GfxResourceHandle;

/// 资源在 GPU 上的逻辑访问状态
///
/// 后端负责把它翻译成具体 API 的 stage / access / layout。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GfxResourceState {
    /// 内容无意义，刚创建或者可以丢弃
    #[default]
    Undefined,
    Common,
    /// constant buffer 或者 vertex pulling 读取的 buffer
    ConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResource,
    CopySource,
    CopyDest,
    Present,
    /// upload heap 上的资源始终处于该状态
    GenericRead,
}

impl GfxResourceState {
    /// 该状态是否会写入资源
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, Self::RenderTarget | Self::UnorderedAccess | Self::DepthWrite | Self::CopyDest | Self::Common)
    }
}

/// 单个资源的状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxBarrier {
    pub resource: GfxResourceHandle,
    pub before: GfxResourceState,
    pub after: GfxResourceState,
}

impl GfxBarrier {
    #[inline]
    pub fn transition(resource: GfxResourceHandle, before: GfxResourceState, after: GfxResourceState) -> Self {
        Self { resource, before, after }
    }

    /// UAV -> UAV，只用于保证前后两次写入的顺序
    #[inline]
    pub fn uav(resource: GfxResourceHandle) -> Self {
        Self {
            resource,
            before: GfxResourceState::UnorderedAccess,
            after: GfxResourceState::UnorderedAccess,
        }
    }

    #[inline]
    pub fn is_uav(&self) -> bool {
        self.before == GfxResourceState::UnorderedAccess && self.after == GfxResourceState::UnorderedAccess
    }
}

/// 待提交的 barrier 批次
///
/// barrier 不会单独发出，而是攒在这里，在下一次需要的时候一次性 flush。
/// 同一资源在一个批次内的连续转换会被合并：A->B 与 B->C 合并为 A->C。
#[derive(Debug, Default)]
pub struct GfxBarrierBatch {
    barriers: Vec<GfxBarrier>,
}

impl GfxBarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, barrier: GfxBarrier) {
        if barrier.before == barrier.after && !barrier.is_uav() {
            return;
        }

        if let Some(pos) = self
            .barriers
            .iter()
            .position(|b| b.resource == barrier.resource && b.after == barrier.before && !b.is_uav())
        {
            let merged_before = self.barriers[pos].before;
            if merged_before == barrier.after && !barrier.is_uav() {
                // A->B->A，相互抵消
                self.barriers.remove(pos);
            } else {
                self.barriers[pos].after = barrier.after;
            }
            return;
        }

        self.barriers.push(barrier);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    #[inline]
    pub fn pending(&self) -> &[GfxBarrier] {
        &self.barriers
    }

    /// 取出当前批次；空批次返回 `None`，不产生任何命令
    pub fn flush(&mut self) -> Option<Vec<GfxBarrier>> {
        if self.barriers.is_empty() { None } else { Some(std::mem::take(&mut self.barriers)) }
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn handles(n: usize) -> Vec<GfxResourceHandle> {
        let mut map = SlotMap::<GfxResourceHandle, ()>::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let mut batch = GfxBarrierBatch::new();
        assert!(batch.flush().is_none());
        assert!(batch.flush().is_none());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_flush_clears_batch() {
        let h = handles(2);
        let mut batch = GfxBarrierBatch::new();
        batch.push(GfxBarrier::transition(h[0], GfxResourceState::Undefined, GfxResourceState::RenderTarget));
        batch.push(GfxBarrier::transition(h[1], GfxResourceState::ShaderResource, GfxResourceState::CopyDest));

        let flushed = batch.flush().unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].resource, h[0]);
        assert!(batch.is_empty());
        assert!(batch.flush().is_none());
    }

    #[test]
    fn test_consecutive_transitions_merge() {
        let h = handles(1);
        let mut batch = GfxBarrierBatch::new();
        batch.push(GfxBarrier::transition(h[0], GfxResourceState::RenderTarget, GfxResourceState::ShaderResource));
        batch.push(GfxBarrier::transition(h[0], GfxResourceState::ShaderResource, GfxResourceState::CopySource));
        assert_eq!(
            batch.pending(),
            &[GfxBarrier::transition(h[0], GfxResourceState::RenderTarget, GfxResourceState::CopySource)]
        );

        batch.push(GfxBarrier::transition(h[0], GfxResourceState::CopySource, GfxResourceState::RenderTarget));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_noop_transition_dropped_but_uav_kept() {
        let h = handles(1);
        let mut batch = GfxBarrierBatch::new();
        batch.push(GfxBarrier::transition(h[0], GfxResourceState::ShaderResource, GfxResourceState::ShaderResource));
        assert!(batch.is_empty());

        batch.push(GfxBarrier::uav(h[0]));
        batch.push(GfxBarrier::uav(h[0]));
        assert_eq!(batch.len(), 2);
    }
}
