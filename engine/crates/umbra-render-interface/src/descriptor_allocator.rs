//! bindless 描述符表的索引分配
//!
//! 每张表（CBV/SRV/UAV、RTV、DSV）各有一个 [`DescriptorAllocator`]。
//! 索引以连续区间分配，每次分配带一个 epoch，释放后旧的 epoch 即失效。
//! 释放是延迟的：区间先进入 retiring 状态，等到对应的 fence 值完成后才能被再次分配。

use std::fmt::Display;

use umbra_gfx::{
    commands::command::GFX_INVALID_INDEX,
    error::{GfxError, GfxResult},
    resources::GfxDescriptorHeapKind,
};

/// 一个带 epoch 的描述符索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorIndex {
    pub heap: GfxDescriptorHeapKind,
    pub index: u32,
    pub epoch: u32,
}

impl DescriptorIndex {
    /// 传给 shader 的值
    #[inline]
    pub fn raw(self) -> u32 {
        self.index
    }
}

impl Display for DescriptorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]@{}", self.heap, self.index, self.epoch)
    }
}

/// 一次分配得到的连续区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub heap: GfxDescriptorHeapKind,
    pub start: u32,
    pub count: u32,
    pub epoch: u32,
}

impl DescriptorRange {
    /// 区间内第 `i` 个索引；越界时返回 `None`
    #[inline]
    pub fn at(&self, i: u32) -> Option<DescriptorIndex> {
        (i < self.count).then_some(DescriptorIndex {
            heap: self.heap,
            index: self.start + i,
            epoch: self.epoch,
        })
    }

    #[inline]
    pub fn first(&self) -> DescriptorIndex {
        DescriptorIndex {
            heap: self.heap,
            index: self.start,
            epoch: self.epoch,
        }
    }

    #[inline]
    pub fn indices(&self) -> std::ops::Range<u32> {
        self.start..self.start + self.count
    }
}

/// 把可选的索引转为 shader 侧的值，空槽位为 [`GFX_INVALID_INDEX`]
#[inline]
pub fn shader_index(index: Option<DescriptorIndex>) -> u32 {
    index.map(DescriptorIndex::raw).unwrap_or(GFX_INVALID_INDEX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Live { epoch: u32 },
    /// 已经释放，等待 GPU 不再引用
    Retiring { epoch: u32 },
}

pub struct DescriptorAllocator {
    heap: GfxDescriptorHeapKind,
    capacity: u32,

    slots: Vec<SlotState>,
    /// 按起点排序、相邻区间已合并的空闲区间 (start, len)
    free_ranges: Vec<(u32, u32)>,

    /// (区间, 释放时的 fence 值)
    pending_release: Vec<(DescriptorRange, u64)>,

    next_epoch: u32,
    live_count: u32,
}

// new & init
impl DescriptorAllocator {
    pub fn new(heap: GfxDescriptorHeapKind, capacity: u32) -> Self {
        Self {
            heap,
            capacity,
            slots: vec![SlotState::Free; capacity as usize],
            free_ranges: if capacity > 0 { vec![(0, capacity)] } else { vec![] },
            pending_release: Vec::new(),
            next_epoch: 1,
            live_count: 0,
        }
    }
}

// getters
impl DescriptorAllocator {
    #[inline]
    pub fn heap(&self) -> GfxDescriptorHeapKind {
        self.heap
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 处于 live 状态的槽位数
    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.live_count
    }

    /// 已释放但尚未回收的槽位数
    pub fn retiring_count(&self) -> u32 {
        self.pending_release.iter().map(|(range, _)| range.count).sum()
    }

    /// 索引仍然指向分配它时的那次分配
    pub fn is_live(&self, index: DescriptorIndex) -> bool {
        index.heap == self.heap
            && self.slots.get(index.index as usize) == Some(&SlotState::Live { epoch: index.epoch })
    }

    /// 校验索引，失效时返回 `InvalidHandle`
    #[track_caller]
    pub fn validate(&self, index: DescriptorIndex) -> GfxResult<u32> {
        if self.is_live(index) {
            Ok(index.index)
        } else {
            Err(GfxError::invalid_handle(format!("stale descriptor index {}", index)))
        }
    }
}

// allocate & release
impl DescriptorAllocator {
    /// 分配 `count` 个连续索引，first-fit
    #[track_caller]
    pub fn allocate(&mut self, count: u32) -> GfxResult<DescriptorRange> {
        if count == 0 {
            return Err(GfxError::invalid_usage(format!("{:?}: allocate of zero descriptors", self.heap)));
        }

        let Some(pos) = self.free_ranges.iter().position(|&(_, len)| len >= count) else {
            return Err(GfxError::out_of_descriptors(format!(
                "{:?} heap: cannot allocate {} descriptors ({} live, {} retiring, capacity {})",
                self.heap,
                count,
                self.live_count,
                self.retiring_count(),
                self.capacity
            )));
        };

        let (start, len) = self.free_ranges[pos];
        if len == count {
            self.free_ranges.remove(pos);
        } else {
            self.free_ranges[pos] = (start + count, len - count);
        }

        let epoch = self.next_epoch;
        self.next_epoch = self.next_epoch.wrapping_add(1).max(1);
        for slot in &mut self.slots[start as usize..(start + count) as usize] {
            *slot = SlotState::Live { epoch };
        }
        self.live_count += count;

        Ok(DescriptorRange {
            heap: self.heap,
            start,
            count,
            epoch,
        })
    }

    /// 释放区间；`fence_value` 完成之前这些索引不会被再次分配
    #[track_caller]
    pub fn release(&mut self, range: DescriptorRange, fence_value: u64) -> GfxResult<()> {
        self.retire(range)?;
        self.pending_release.push((range, fence_value));
        Ok(())
    }

    /// 立即释放，只用于从未提交给 GPU 的区间
    #[track_caller]
    pub fn release_immediate(&mut self, range: DescriptorRange) -> GfxResult<()> {
        self.retire(range)?;
        self.free(range);
        Ok(())
    }

    /// 回收所有 fence 值已完成的区间，返回被回收的区间
    pub fn recycle(&mut self, completed_value: u64) -> Vec<DescriptorRange> {
        let mut recycled = Vec::new();
        self.pending_release.retain(|&(range, fence_value)| {
            if fence_value <= completed_value {
                recycled.push(range);
                false
            } else {
                true
            }
        });
        for range in &recycled {
            self.free(*range);
        }
        recycled
    }
}

// tools
impl DescriptorAllocator {
    #[track_caller]
    fn retire(&mut self, range: DescriptorRange) -> GfxResult<()> {
        let in_bounds = range.heap == self.heap
            && range.count > 0
            && range.start.checked_add(range.count).is_some_and(|end| end <= self.capacity);
        if !in_bounds {
            return Err(GfxError::invalid_handle(format!(
                "{:?}: release of foreign range {:?}[{}..+{}]",
                self.heap, range.heap, range.start, range.count
            )));
        }

        let slots = &mut self.slots[range.start as usize..(range.start + range.count) as usize];
        if slots.iter().any(|slot| *slot != SlotState::Live { epoch: range.epoch }) {
            return Err(GfxError::invalid_handle(format!(
                "{:?}: stale or double release of [{}..+{}]@{}",
                self.heap, range.start, range.count, range.epoch
            )));
        }
        for slot in slots {
            *slot = SlotState::Retiring { epoch: range.epoch };
        }
        self.live_count -= range.count;
        Ok(())
    }

    /// 把区间放回空闲列表，并与相邻区间合并
    fn free(&mut self, range: DescriptorRange) {
        for slot in &mut self.slots[range.start as usize..(range.start + range.count) as usize] {
            *slot = SlotState::Free;
        }

        let pos = self.free_ranges.partition_point(|&(start, _)| start < range.start);
        self.free_ranges.insert(pos, (range.start, range.count));

        // 与后一个合并
        if pos + 1 < self.free_ranges.len() {
            let (start, len) = self.free_ranges[pos];
            let (next_start, next_len) = self.free_ranges[pos + 1];
            if start + len == next_start {
                self.free_ranges[pos] = (start, len + next_len);
                self.free_ranges.remove(pos + 1);
            }
        }
        // 与前一个合并
        if pos > 0 {
            let (prev_start, prev_len) = self.free_ranges[pos - 1];
            let (start, len) = self.free_ranges[pos];
            if prev_start + prev_len == start {
                self.free_ranges[pos - 1] = (prev_start, prev_len + len);
                self.free_ranges.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use umbra_gfx::error::GfxErrorKind;

    use super::*;

    fn allocator(capacity: u32) -> DescriptorAllocator {
        DescriptorAllocator::new(GfxDescriptorHeapKind::CbvSrvUav, capacity)
    }

    #[test]
    fn test_allocate_is_contiguous_and_exhausts() {
        let mut alloc = allocator(8);
        let a = alloc.allocate(3).unwrap();
        let b = alloc.allocate(5).unwrap();
        assert_eq!((a.start, a.count), (0, 3));
        assert_eq!((b.start, b.count), (3, 5));
        assert_eq!(alloc.allocated_count(), 8);

        let err = alloc.allocate(1).unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::OutOfDescriptors);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_release_waits_for_fence() {
        let mut alloc = allocator(4);
        let a = alloc.allocate(4).unwrap();
        alloc.release(a, 5).unwrap();

        // fence 未完成，索引仍不可用
        assert!(alloc.recycle(4).is_empty());
        assert_eq!(alloc.allocate(1).unwrap_err().kind(), GfxErrorKind::OutOfDescriptors);

        assert_eq!(alloc.recycle(5), vec![a]);
        let b = alloc.allocate(4).unwrap();
        assert_eq!(b.start, 0);
        assert_ne!(b.epoch, a.epoch);
    }

    #[test]
    fn test_stale_index_is_rejected() {
        let mut alloc = allocator(4);
        let a = alloc.allocate(1).unwrap();
        let index = a.first();
        assert!(alloc.is_live(index));

        alloc.release(a, 1).unwrap();
        assert!(!alloc.is_live(index));
        assert_eq!(alloc.validate(index).unwrap_err().kind(), GfxErrorKind::InvalidHandle);

        // 同一个槽位再次分配后，旧索引依然无效
        alloc.recycle(1);
        let b = alloc.allocate(1).unwrap();
        assert_eq!(b.start, a.start);
        assert!(!alloc.is_live(index));
        assert!(alloc.is_live(b.first()));
    }

    #[test]
    fn test_double_release_is_error() {
        let mut alloc = allocator(4);
        let a = alloc.allocate(2).unwrap();
        alloc.release(a, 1).unwrap();
        assert_eq!(alloc.release(a, 2).unwrap_err().kind(), GfxErrorKind::InvalidHandle);
        alloc.recycle(2);
        assert_eq!(alloc.release_immediate(a).unwrap_err().kind(), GfxErrorKind::InvalidHandle);
    }

    #[test]
    fn test_free_ranges_coalesce() {
        let mut alloc = allocator(6);
        let a = alloc.allocate(2).unwrap();
        let b = alloc.allocate(2).unwrap();
        let c = alloc.allocate(2).unwrap();

        alloc.release_immediate(a).unwrap();
        alloc.release_immediate(c).unwrap();
        // 两段不相邻的空闲区间都不够 4 个
        assert_eq!(alloc.allocate(4).unwrap_err().kind(), GfxErrorKind::OutOfDescriptors);

        alloc.release_immediate(b).unwrap();
        let all = alloc.allocate(6).unwrap();
        assert_eq!((all.start, all.count), (0, 6));
    }

    #[test]
    fn test_live_indices_are_never_handed_out_twice() {
        let mut alloc = allocator(16);
        let mut live: Vec<DescriptorRange> = Vec::new();
        let mut fence = 0;
        for round in 0..64u32 {
            if round % 3 == 2 && !live.is_empty() {
                let range = live.remove(0);
                fence += 1;
                alloc.release(range, fence).unwrap();
            }
            if round % 5 == 4 {
                alloc.recycle(fence);
            }
            if let Ok(range) = alloc.allocate(1 + round % 3) {
                for other in &live {
                    let overlap = range.start < other.start + other.count && other.start < range.start + range.count;
                    assert!(!overlap, "{:?} overlaps live {:?}", range, other);
                }
                live.push(range);
            }
        }
        assert_eq!(alloc.allocated_count(), live.iter().map(|r| r.count).sum::<u32>());
    }

    #[test]
    fn test_shader_index_of_empty_slot() {
        let mut alloc = allocator(2);
        let a = alloc.allocate(2).unwrap();
        assert_eq!(shader_index(a.at(1)), 1);
        assert_eq!(a.at(2), None);
        assert_eq!(shader_index(None), GFX_INVALID_INDEX);
    }
}
