use std::{fmt::Display, ops::Deref};

/// 帧标签（A/B/C/D）
///
/// 表示当前处于 Frames in Flight 的哪一帧。
/// 通过 `Deref` 转换为索引 0/1/2/3。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
    C,
    D,
}
impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        match self {
            Self::A => &Self::INDEX[0],
            Self::B => &Self::INDEX[1],
            Self::C => &Self::INDEX[2],
            Self::D => &Self::INDEX[3],
        }
    }
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}
impl FrameLabel {
    const INDEX: [usize; 4] = [0, 1, 2, 3];
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    /// 同时在 GPU 上执行的最大帧数，范围 [1, 4]
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub const MAX_FIF_COUNT: usize = FrameLabel::ALL.len();

    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        let clamped = fif_count.clamp(1, Self::MAX_FIF_COUNT);
        if clamped != fif_count {
            log::warn!("frames in flight {} clamped to {}", fif_count, clamped);
        }
        Self {
            frame_id: init_frame_id,
            fif_count: clamped,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }
    #[inline]
    pub fn frame_labels(&self) -> &'static [FrameLabel] {
        &FrameLabel::ALL[..self.fif_count]
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::ALL[(self.frame_id % self.fif_count as u64) as usize]
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_cycle_round_robin() {
        let mut counter = FrameCounter::new(0, 3);
        let labels = (0..6)
            .map(|_| {
                let label = counter.frame_label();
                counter.next_frame();
                *label
            })
            .collect::<Vec<_>>();
        assert_eq!(labels, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(counter.frame_name(), "[F6A]");
    }

    #[test]
    fn test_fif_count_is_clamped() {
        assert_eq!(FrameCounter::new(0, 0).fif_count(), 1);
        assert_eq!(FrameCounter::new(0, 9).fif_count(), 4);
        assert_eq!(FrameCounter::new(0, 2).frame_labels(), &[FrameLabel::A, FrameLabel::B]);
    }
}
