use umbra_gfx::{basic::extent::GfxExtent2D, commands::graphics_context::GfxGraphicsContext, error::GfxResult};
use umbra_render_interface::handles::GfxTextureHandle;

/// composite pass 交给 UI 的绘制目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiTargets {
    pub color: GfxTextureHandle,
    pub depth: GfxTextureHandle,
    pub extent: GfxExtent2D,
}

/// 叠加在最终画面上的 UI
///
/// 每帧在 composite pass 的 rendering scope 内调用一次，此时 `targets.color` 已经绑定为唯一的颜色 attachment。
pub trait UiOverlay {
    fn render(&mut self, ctx: &mut GfxGraphicsContext, targets: UiTargets) -> GfxResult<()>;

    /// 释放 UI 自己持有的 GPU 对象
    fn destroy(&mut self) {}
}

/// 不绘制任何内容
pub struct NoUi;

impl UiOverlay for NoUi {
    fn render(&mut self, _ctx: &mut GfxGraphicsContext, _targets: UiTargets) -> GfxResult<()> {
        Ok(())
    }
}
