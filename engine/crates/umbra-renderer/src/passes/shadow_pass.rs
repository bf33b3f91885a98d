use umbra_gfx::{
    basic::viewport::GfxViewport,
    commands::{
        barrier::GfxResourceState,
        command::{GfxClearValue, GfxLoadOp, GfxRenderingDesc},
        graphics_context::GfxGraphicsContext,
    },
    error::GfxResult,
    pipelines::desc::{GfxCompareOp, GfxCullMode, GfxFrontFace, GfxGraphicsPipelineDesc},
};
use umbra_render_interface::render_context::RenderContext;

use crate::{
    frame_targets::FrameTargets,
    pass::{PassContext, PassPipeline, RenderPass, depth_attachment},
    passes::geometry_pass::transition_meshes,
    scene::DrawConstants,
};

/// 从方向光的视角渲染场景深度
///
/// 剔除正面以减轻 shadow acne。
pub struct ShadowPass {
    pipeline: PassPipeline,
}

impl ShadowPass {
    pub fn new(rc: &RenderContext) -> Self {
        let desc = GfxGraphicsPipelineDesc::new("shadow", "shadow.vs", "shadow.ps")
            .with_depth(FrameTargets::DEPTH_FORMAT, GfxCompareOp::Less, true)
            .with_raster(GfxFrontFace::Clockwise, GfxCullMode::Front);
        Self {
            pipeline: PassPipeline::new(rc, desc),
        }
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
        let _span = tracy_client::span!("ShadowPass::record");
        let shadow_map = pass_ctx.targets.shadow_map;

        transition_meshes(ctx, pass_ctx)?;
        ctx.transition(pass_ctx.resources.texture_mut(shadow_map)?, GfxResourceState::DepthWrite);

        let shadow_extent = pass_ctx.resources.texture(shadow_map)?.extent();
        let depth = depth_attachment(pass_ctx.resources, shadow_map, GfxLoadOp::Clear(GfxClearValue::Depth(1.0)))?;
        ctx.begin_rendering(GfxRenderingDesc {
            colors: vec![],
            depth: Some(depth),
            extent: shadow_extent,
        })?;
        ctx.set_viewport(GfxViewport::from_extent(shadow_extent));
        ctx.set_pipeline(self.pipeline.handle()?);

        for (object, mesh) in pass_ctx.scene.drawables() {
            let vertices = pass_ctx.resources.buffer(mesh.vertices)?;
            let constants = DrawConstants::new(object, pass_ctx.frame.frame_constants, vertices.bindless_index(), None);
            ctx.set_root_constants_pod(&constants)?;
            ctx.set_index_buffer(pass_ctx.resources.buffer(mesh.indices)?.resource(), 0);
            ctx.draw_indexed(mesh.index_count, 1, 0, 0, 0)?;
        }
        ctx.end_rendering();

        ctx.transition(pass_ctx.resources.texture_mut(shadow_map)?, GfxResourceState::ShaderResource);
        Ok(())
    }

    fn reload_pipelines(&mut self, rc: &RenderContext) {
        self.pipeline.reload(rc);
    }

    fn destroy(self: Box<Self>) {
        self.pipeline.destroy();
    }
}
