use umbra_gfx::{
    basic::viewport::GfxViewport,
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
    frame_targets::FrameTargets,
    pass::{PassContext, PassPipeline, RenderPass, color_attachment, srv_index},
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PostProcessConstants {
    pub frame_constants: u32,
    pub source: u32,
    pub exposure: f32,
    pub _padding: u32,
}

/// 曝光与色调映射：HDR 的 `lit` 映射到 LDR 的 `post`
pub struct PostProcessPass {
    pipeline: PassPipeline,
}

impl PostProcessPass {
    pub fn new(rc: &RenderContext) -> Self {
        let desc = GfxGraphicsPipelineDesc::fullscreen("post-process", "post_process.ps", FrameTargets::POST_FORMAT);
        Self {
            pipeline: PassPipeline::new(rc, desc),
        }
    }
}

impl RenderPass for PostProcessPass {
    fn name(&self) -> &'static str {
        "post-process"
    }

    fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
        let _span = tracy_client::span!("PostProcessPass::record");
        let targets = pass_ctx.targets;
        let extent = pass_ctx.frame.extent;

        ctx.transition(pass_ctx.resources.texture_mut(targets.lit)?, GfxResourceState::ShaderResource);
        ctx.transition(pass_ctx.resources.texture_mut(targets.post)?, GfxResourceState::RenderTarget);

        let constants = PostProcessConstants {
            frame_constants: pass_ctx.frame.frame_constants,
            source: srv_index(pass_ctx.resources, targets.lit)?,
            exposure: pass_ctx.frame.exposure,
            _padding: 0,
        };
        let color = color_attachment(pass_ctx.resources, targets.post, GfxLoadOp::DontCare)?;
        ctx.begin_rendering(GfxRenderingDesc {
            colors: vec![color],
            depth: None,
            extent,
        })?;
        ctx.set_viewport(GfxViewport::from_extent(extent));
        ctx.set_pipeline(self.pipeline.handle()?);
        ctx.set_root_constants_pod(&constants)?;
        ctx.draw(3, 1, 0, 0)?;
        ctx.end_rendering();

        ctx.transition(pass_ctx.resources.texture_mut(targets.post)?, GfxResourceState::ShaderResource);
        Ok(())
    }

    fn reload_pipelines(&mut self, rc: &RenderContext) {
        self.pipeline.reload(rc);
    }

    fn destroy(self: Box<Self>) {
        self.pipeline.destroy();
    }
}
