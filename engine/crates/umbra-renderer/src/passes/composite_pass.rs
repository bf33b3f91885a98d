use umbra_gfx::{
    basic::{format::GfxFormat, viewport::GfxViewport},
    commands::{
        barrier::GfxResourceState,
        command::{GfxLoadOp, GfxRenderingDesc},
        graphics_context::GfxGraphicsContext,
    },
    error::GfxResult,
    pipelines::desc::GfxGraphicsPipelineDesc,
};
use umbra_render_interface::render_context::RenderContext;

use crate::{
    pass::{PassContext, PassPipeline, RenderPass, color_attachment, srv_index},
    ui::{UiOverlay, UiTargets},
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CompositeConstants {
    pub frame_constants: u32,
    pub source: u32,
}

/// 把后处理结果写入最终目标，然后在同一个 rendering scope 内绘制 UI
pub struct CompositePass {
    pipeline: PassPipeline,
    ui: Box<dyn UiOverlay>,
}

impl CompositePass {
    pub fn new(rc: &RenderContext, final_format: GfxFormat, ui: Box<dyn UiOverlay>) -> Self {
        let desc = GfxGraphicsPipelineDesc::fullscreen("composite", "composite.ps", final_format);
        Self {
            pipeline: PassPipeline::new(rc, desc),
            ui,
        }
    }
}

impl RenderPass for CompositePass {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
        let _span = tracy_client::span!("CompositePass::record");
        let targets = pass_ctx.targets;
        let extent = pass_ctx.frame.extent;

        ctx.transition(pass_ctx.resources.texture_mut(targets.post)?, GfxResourceState::ShaderResource);
        ctx.transition(pass_ctx.resources.texture_mut(targets.final_target)?, GfxResourceState::RenderTarget);

        let constants = CompositeConstants {
            frame_constants: pass_ctx.frame.frame_constants,
            source: srv_index(pass_ctx.resources, targets.post)?,
        };
        let color = color_attachment(pass_ctx.resources, targets.final_target, GfxLoadOp::DontCare)?;
        ctx.begin_rendering(GfxRenderingDesc {
            colors: vec![color],
            depth: None,
            extent,
        })?;
        ctx.set_viewport(GfxViewport::from_extent(extent));
        ctx.set_pipeline(self.pipeline.handle()?);
        ctx.set_root_constants_pod(&constants)?;
        ctx.draw(3, 1, 0, 0)?;

        ctx.begin_label("ui");
        self.ui.render(
            ctx,
            UiTargets {
                color: targets.final_target,
                depth: targets.forward_depth,
                extent,
            },
        )?;
        ctx.end_label();
        ctx.end_rendering();
        Ok(())
    }

    fn reload_pipelines(&mut self, rc: &RenderContext) {
        self.pipeline.reload(rc);
    }

    fn destroy(mut self: Box<Self>) {
        self.ui.destroy();
        self.pipeline.destroy();
    }
}
