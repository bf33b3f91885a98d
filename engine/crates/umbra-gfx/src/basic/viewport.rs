use crate::basic::extent::GfxExtent2D;

/// viewport 与 scissor 共用同一个矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GfxViewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl GfxViewport {
    /// 覆盖整个 extent 的 viewport，深度范围为 [0, 1]
    #[inline]
    pub fn from_extent(extent: GfxExtent2D) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}
