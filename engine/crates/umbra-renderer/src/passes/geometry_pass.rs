use itertools::Itertools;
use umbra_gfx::{
    basic::viewport::GfxViewport,
    commands::{
        barrier::GfxResourceState,
        command::{GfxClearValue, GfxLoadOp, GfxRenderingDesc},
        graphics_context::GfxGraphicsContext,
    },
    error::GfxResult,
    pipelines::desc::{GfxCompareOp, GfxGraphicsPipelineDesc},
};
use umbra_render_interface::render_context::RenderContext;

use crate::{
    frame_targets::{FrameTargets, GBuffer},
    pass::{PassContext, PassPipeline, RenderPass, color_attachment, depth_attachment},
    scene::DrawConstants,
};

/// 把不透明物体的材质属性写入 G-buffer 的四个目标，同时写入深度
pub struct GeometryPass {
    pipeline: PassPipeline,
}

impl GeometryPass {
    pub fn new(rc: &RenderContext) -> Self {
        let desc = GfxGraphicsPipelineDesc::new("geometry", "geometry.vs", "geometry.ps")
            .with_rtv_formats(&GBuffer::FORMATS)
            .with_depth(FrameTargets::DEPTH_FORMAT, GfxCompareOp::Less, true);
        Self {
            pipeline: PassPipeline::new(rc, desc),
        }
    }
}

impl RenderPass for GeometryPass {
    fn name(&self) -> &'static str {
        "geometry"
    }

    fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
        let _span = tracy_client::span!("GeometryPass::record");
        let targets = pass_ctx.targets;
        let extent = pass_ctx.frame.extent;

        transition_meshes(ctx, pass_ctx)?;
        for object in &pass_ctx.scene.objects {
            if let Some(albedo) = object.albedo {
                ctx.transition(pass_ctx.resources.texture_mut(albedo)?, GfxResourceState::ShaderResource);
            }
        }
        for target in targets.gbuffer.targets() {
            ctx.transition(pass_ctx.resources.texture_mut(target)?, GfxResourceState::RenderTarget);
        }
        ctx.transition(pass_ctx.resources.texture_mut(targets.depth)?, GfxResourceState::DepthWrite);

        let clear = GfxLoadOp::Clear(GfxClearValue::Color([0.0; 4]));
        let colors = targets
            .gbuffer
            .targets()
            .into_iter()
            .map(|target| color_attachment(pass_ctx.resources, target, clear))
            .collect::<GfxResult<Vec<_>>>()?;
        let depth = depth_attachment(pass_ctx.resources, targets.depth, GfxLoadOp::Clear(GfxClearValue::Depth(1.0)))?;
        ctx.begin_rendering(GfxRenderingDesc {
            colors,
            depth: Some(depth),
            extent,
        })?;
        ctx.set_viewport(GfxViewport::from_extent(extent));
        ctx.set_pipeline(self.pipeline.handle()?);

        for (object, mesh) in pass_ctx.scene.drawables() {
            let vertices = pass_ctx.resources.buffer(mesh.vertices)?.bindless_index();
            let albedo = match object.albedo {
                Some(albedo) => Some(pass_ctx.resources.texture(albedo)?.srv_index()),
                None => None,
            };
            let constants = DrawConstants::new(object, pass_ctx.frame.frame_constants, vertices, albedo);
            ctx.set_root_constants_pod(&constants)?;
            ctx.set_index_buffer(pass_ctx.resources.buffer(mesh.indices)?.resource(), 0);
            ctx.draw_indexed(mesh.index_count, 1, 0, 0, 0)?;
        }
        ctx.end_rendering();

        for target in targets.gbuffer.targets() {
            ctx.transition(pass_ctx.resources.texture_mut(target)?, GfxResourceState::ShaderResource);
        }
        Ok(())
    }

    fn reload_pipelines(&mut self, rc: &RenderContext) {
        self.pipeline.reload(rc);
    }

    fn destroy(self: Box<Self>) {
        self.pipeline.destroy();
    }
}

/// 顶点 buffer 以 SRV 读取，index buffer 绑定到 IA
///
/// 多个对象可能共享同一个网格，转换是幂等的。
pub(crate) fn transition_meshes(ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
    let meshes = pass_ctx.scene.drawables().map(|(_, mesh)| *mesh).unique().collect_vec();
    for mesh in meshes {
        ctx.transition(pass_ctx.resources.buffer_mut(mesh.vertices)?, GfxResourceState::ShaderResource);
        ctx.transition(pass_ctx.resources.buffer_mut(mesh.indices)?, GfxResourceState::IndexBuffer);
    }
    Ok(())
}
