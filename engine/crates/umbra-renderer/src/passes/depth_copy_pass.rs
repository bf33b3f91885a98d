use umbra_gfx::{
    commands::{barrier::GfxResourceState, graphics_context::GfxGraphicsContext},
    error::GfxResult,
};
use umbra_render_interface::render_context::RenderContext;

use crate::pass::{PassContext, RenderPass};

/// 把 geometry pass 的深度拷贝到 forward 深度
///
/// 之后 forward 绘制在 forward 深度上继续测试，而 `depth` 依然保持 geometry pass 的结果。
pub struct DepthCopyPass;

impl RenderPass for DepthCopyPass {
    fn name(&self) -> &'static str {
        "depth-copy"
    }

    fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
        let _span = tracy_client::span!("DepthCopyPass::record");
        let targets = pass_ctx.targets;
        let (depth, forward_depth) = pass_ctx.resources.texture_pair_mut(targets.depth, targets.forward_depth)?;

        ctx.transition(depth, GfxResourceState::CopySource);
        ctx.transition(forward_depth, GfxResourceState::CopyDest);
        ctx.copy_resource(depth.resource(), forward_depth.resource())?;

        ctx.transition(depth, GfxResourceState::DepthWrite);
        ctx.transition(forward_depth, GfxResourceState::DepthWrite);
        Ok(())
    }

    fn reload_pipelines(&mut self, _rc: &RenderContext) {}

    fn destroy(self: Box<Self>) {}
}
