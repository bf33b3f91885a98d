use umbra_gfx::{
    basic::viewport::GfxViewport,
    commands::{
        barrier::GfxResourceState,
        command::{GFX_INVALID_INDEX, GfxClearValue, GfxLoadOp, GfxRenderingDesc},
        graphics_context::GfxGraphicsContext,
    },
    error::GfxResult,
    pipelines::desc::{GfxCompareOp, GfxCullMode, GfxFrontFace, GfxGraphicsPipelineDesc},
};
use umbra_render_interface::{handles::GfxTextureHandle, render_context::RenderContext};

use crate::{
    frame_targets::FrameTargets,
    pass::{PassContext, PassPipeline, RenderPass, color_attachment, depth_attachment, srv_index},
};

/// 全屏光照的 root constants，全部是 bindless 索引
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightingConstants {
    pub frame_constants: u32,
    pub albedo: u32,
    pub position_emissive: u32,
    pub normal_emissive: u32,
    pub ao_metal_roughness_emissive: u32,
    pub shadow_map: u32,
    pub environment: u32,
    pub _padding: u32,
}

/// forward 绘制的 root constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ForwardConstants {
    pub frame_constants: u32,
    /// 点光源序号，或者天空盒纹理的 SRV 索引
    pub index: u32,
}

/// 立方体由 vertex shader 按 vertex id 生成
const CUBE_VERTEX_COUNT: u32 = 36;

/// 读取 G-buffer 计算光照，再在同一个目标上 forward 绘制光源体积和天空盒
pub struct LightingPass {
    lighting: PassPipeline,
    light_volume: PassPipeline,
    skybox: PassPipeline,
}

impl LightingPass {
    pub fn new(rc: &RenderContext) -> Self {
        // 绑定了 forward 深度，全屏光照也需要声明同样的深度格式
        let lighting = GfxGraphicsPipelineDesc::fullscreen("lighting", "lighting.ps", FrameTargets::LIT_FORMAT)
            .with_depth(FrameTargets::DEPTH_FORMAT, GfxCompareOp::Always, false);
        let light_volume = GfxGraphicsPipelineDesc::new("light-volume", "light_volume.vs", "light_volume.ps")
            .with_rtv_formats(&[FrameTargets::LIT_FORMAT])
            .with_depth(FrameTargets::DEPTH_FORMAT, GfxCompareOp::Less, false)
            .with_blend(true);
        let skybox = GfxGraphicsPipelineDesc::new("skybox", "skybox.vs", "skybox.ps")
            .with_rtv_formats(&[FrameTargets::LIT_FORMAT])
            .with_depth(FrameTargets::DEPTH_FORMAT, GfxCompareOp::LessEqual, false)
            .with_raster(GfxFrontFace::CounterClockwise, GfxCullMode::Back);

        Self {
            lighting: PassPipeline::new(rc, lighting),
            light_volume: PassPipeline::new(rc, light_volume),
            skybox: PassPipeline::new(rc, skybox),
        }
    }
}

impl RenderPass for LightingPass {
    fn name(&self) -> &'static str {
        "lighting"
    }

    fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
        let _span = tracy_client::span!("LightingPass::record");
        let targets = pass_ctx.targets;
        let scene = pass_ctx.scene;
        let extent = pass_ctx.frame.extent;
        let frame_constants = pass_ctx.frame.frame_constants;

        let inputs = targets
            .gbuffer
            .targets()
            .into_iter()
            .chain([targets.shadow_map])
            .chain(scene.environment)
            .chain(scene.skybox);
        for input in inputs {
            ctx.transition(pass_ctx.resources.texture_mut(input)?, GfxResourceState::ShaderResource);
        }
        ctx.transition(pass_ctx.resources.texture_mut(targets.lit)?, GfxResourceState::RenderTarget);
        ctx.transition(pass_ctx.resources.texture_mut(targets.forward_depth)?, GfxResourceState::DepthWrite);

        let resources = &*pass_ctx.resources;
        let optional_srv = |texture: Option<GfxTextureHandle>| match texture {
            Some(texture) => srv_index(resources, texture),
            None => Ok(GFX_INVALID_INDEX),
        };
        let constants = LightingConstants {
            frame_constants,
            albedo: srv_index(resources, targets.gbuffer.albedo)?,
            position_emissive: srv_index(resources, targets.gbuffer.position_emissive)?,
            normal_emissive: srv_index(resources, targets.gbuffer.normal_emissive)?,
            ao_metal_roughness_emissive: srv_index(resources, targets.gbuffer.ao_metal_roughness_emissive)?,
            shadow_map: srv_index(resources, targets.shadow_map)?,
            environment: optional_srv(scene.environment)?,
            _padding: 0,
        };
        let skybox = optional_srv(scene.skybox)?;

        let clear = GfxLoadOp::Clear(GfxClearValue::Color(pass_ctx.frame.clear_color));
        let color = color_attachment(resources, targets.lit, clear)?;
        let depth = depth_attachment(resources, targets.forward_depth, GfxLoadOp::Load)?;
        ctx.begin_rendering(GfxRenderingDesc {
            colors: vec![color],
            depth: Some(depth),
            extent,
        })?;
        ctx.set_viewport(GfxViewport::from_extent(extent));

        ctx.begin_label("deferred-lighting");
        ctx.set_pipeline(self.lighting.handle()?);
        ctx.set_root_constants_pod(&constants)?;
        ctx.draw(3, 1, 0, 0)?;
        ctx.end_label();

        let light_count = scene.active_point_lights().len() as u32;
        if light_count > 0 {
            ctx.begin_label("light-volumes");
            ctx.set_pipeline(self.light_volume.handle()?);
            for index in 0..light_count {
                ctx.set_root_constants_pod(&ForwardConstants { frame_constants, index })?;
                ctx.draw(CUBE_VERTEX_COUNT, 1, 0, 0)?;
            }
            ctx.end_label();
        }

        if skybox != GFX_INVALID_INDEX {
            ctx.begin_label("skybox");
            ctx.set_pipeline(self.skybox.handle()?);
            ctx.set_root_constants_pod(&ForwardConstants {
                frame_constants,
                index: skybox,
            })?;
            ctx.draw(CUBE_VERTEX_COUNT, 1, 0, 0)?;
            ctx.end_label();
        }
        ctx.end_rendering();

        ctx.transition(pass_ctx.resources.texture_mut(targets.lit)?, GfxResourceState::ShaderResource);
        Ok(())
    }

    fn reload_pipelines(&mut self, rc: &RenderContext) {
        self.lighting.reload(rc);
        self.light_volume.reload(rc);
        self.skybox.reload(rc);
    }

    fn destroy(self: Box<Self>) {
        self.lighting.destroy();
        self.light_volume.destroy();
        self.skybox.destroy();
    }
}
