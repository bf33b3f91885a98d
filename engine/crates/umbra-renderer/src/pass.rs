use umbra_gfx::{
    basic::extent::GfxExtent2D,
    commands::{
        command::{GfxColorAttachment, GfxDepthAttachment, GfxLoadOp},
        graphics_context::GfxGraphicsContext,
    },
    device::GfxPipelineHandle,
    error::{GfxError, GfxResult},
    pipelines::{desc::GfxGraphicsPipelineDesc, pipeline_state::GfxPendingPipeline},
};
use umbra_render_interface::{
    frame_counter::FrameLabel, gfx_resource_manager::GfxResourceManager, handles::GfxTextureHandle,
    render_context::RenderContext,
};

use crate::{frame_targets::FrameTargets, scene::SceneView};

/// 当前帧的只读信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub frame_id: u64,
    pub label: FrameLabel,
    pub extent: GfxExtent2D,
    /// 本帧常量缓冲区的 CBV 索引
    pub frame_constants: u32,
    pub clear_color: [f32; 4],
    pub exposure: f32,
}

/// pass 录制时能访问到的全部状态
pub struct PassContext<'a> {
    pub resources: &'a mut GfxResourceManager,
    pub targets: &'a FrameTargets,
    pub scene: &'a SceneView,
    pub frame: FrameInfo,
}

/// 帧管线中的一个阶段
///
/// 每个 pass 在自己的 context 中录制：先批量转换输入与输出的状态，再绘制，最后把输出转换为下游期望的状态。
pub trait RenderPass {
    fn name(&self) -> &'static str;

    fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()>;

    /// 渲染目标的尺寸发生变化，此时 GPU 已经空闲
    fn resize(&mut self, _rc: &mut RenderContext, _extent: GfxExtent2D) -> GfxResult<()> {
        Ok(())
    }

    /// 重新编译管线，此时 GPU 已经空闲
    fn reload_pipelines(&mut self, rc: &RenderContext);

    fn destroy(self: Box<Self>);
}

/// pass 持有的图形管线，在工作线程上创建，首次录制时等待
pub struct PassPipeline {
    desc: GfxGraphicsPipelineDesc,
    pending: GfxPendingPipeline,
}

impl PassPipeline {
    pub fn new(rc: &RenderContext, desc: GfxGraphicsPipelineDesc) -> Self {
        let pending = rc.create_graphics_pipeline_async(desc.clone());
        Self { desc, pending }
    }

    #[inline]
    pub fn desc(&self) -> &GfxGraphicsPipelineDesc {
        &self.desc
    }

    pub fn handle(&mut self) -> GfxResult<GfxPipelineHandle> {
        Ok(self.pending.get()?.handle())
    }

    pub fn reload(&mut self, rc: &RenderContext) {
        let pending = rc.create_graphics_pipeline_async(self.desc.clone());
        std::mem::replace(&mut self.pending, pending).destroy();
        log::info!("reload pipeline {}", self.desc.name);
    }

    pub fn destroy(self) {
        self.pending.destroy();
    }
}

/// 以 RTV 绑定渲染目标
pub fn color_attachment(
    resources: &GfxResourceManager,
    target: GfxTextureHandle,
    load_op: GfxLoadOp,
) -> GfxResult<GfxColorAttachment> {
    let texture = resources.texture(target)?;
    let rtv = texture
        .rtv()
        .ok_or_else(|| GfxError::invalid_usage(format!("{} has no render target view", texture.name())))?;
    Ok(GfxColorAttachment {
        rtv: resources.descriptor_allocator(rtv.heap).validate(rtv)?,
        load_op,
    })
}

/// 以 DSV 绑定深度目标
pub fn depth_attachment(
    resources: &GfxResourceManager,
    target: GfxTextureHandle,
    load_op: GfxLoadOp,
) -> GfxResult<GfxDepthAttachment> {
    let texture = resources.texture(target)?;
    let dsv = texture
        .dsv()
        .ok_or_else(|| GfxError::invalid_usage(format!("{} has no depth stencil view", texture.name())))?;
    Ok(GfxDepthAttachment {
        dsv: resources.descriptor_allocator(dsv.heap).validate(dsv)?,
        load_op,
    })
}

/// 纹理在 shader 中的 SRV 索引，纹理不存在时报错
pub fn srv_index(resources: &GfxResourceManager, target: GfxTextureHandle) -> GfxResult<u32> {
    Ok(resources.texture(target)?.srv_index())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessEvent, HeadlessExecutionMode},
        basic::{format::GfxFormat, viewport::GfxViewport},
        commands::{barrier::GfxResourceState, command::GfxRenderingDesc},
        device::{GfxDevice, GfxQueueType},
        pipelines::shader_library::ShaderLibrary,
    };
    use umbra_render_interface::render_settings::RenderSettings;

    use super::*;
    use crate::present::render_present::RenderPresent;

    /// 写入 `output`，可选地读取 `input`
    struct ScriptedPass {
        name: &'static str,
        input: Option<GfxTextureHandle>,
        output: GfxTextureHandle,
        pipeline: PassPipeline,
    }

    impl RenderPass for ScriptedPass {
        fn name(&self) -> &'static str {
            self.name
        }

        fn record(&mut self, ctx: &mut GfxGraphicsContext, pass_ctx: &mut PassContext<'_>) -> GfxResult<()> {
            if let Some(input) = self.input {
                ctx.transition(pass_ctx.resources.texture_mut(input)?, GfxResourceState::ShaderResource);
            }
            ctx.transition(pass_ctx.resources.texture_mut(self.output)?, GfxResourceState::RenderTarget);

            let color = color_attachment(pass_ctx.resources, self.output, GfxLoadOp::DontCare)?;
            ctx.begin_rendering(GfxRenderingDesc {
                colors: vec![color],
                depth: None,
                extent: pass_ctx.frame.extent,
            })?;
            ctx.set_viewport(GfxViewport::from_extent(pass_ctx.frame.extent));
            ctx.set_pipeline(self.pipeline.handle()?);
            ctx.draw(3, 1, 0, 0)?;
            ctx.end_rendering();
            Ok(())
        }

        fn reload_pipelines(&mut self, rc: &RenderContext) {
            self.pipeline.reload(rc);
        }

        fn destroy(self: Box<Self>) {
            self.pipeline.destroy();
        }
    }

    fn position(events: &[HeadlessEvent], pred: impl Fn(&HeadlessEvent) -> bool) -> usize {
        events.iter().position(pred).unwrap()
    }

    fn is_barrier(event: &HeadlessEvent, name: &str, after: GfxResourceState) -> bool {
        matches!(event, HeadlessEvent::Barrier { resource, after: a, .. } if resource == name && *a == after)
    }

    fn is_draw(event: &HeadlessEvent, name: &str) -> bool {
        matches!(event, HeadlessEvent::Draw { pipeline, .. } if pipeline == name)
    }

    /// A 写 a，B 读 a 写 b，C 读 b 写 c，然后把 c 拷贝到 back buffer 呈现
    #[test]
    fn test_three_pass_transitions_are_ordered() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut rc =
            RenderContext::new(device.clone(), RenderSettings::default(), Arc::new(ShaderLibrary::synthetic())).unwrap();
        let extent = GfxExtent2D::new(32, 32);
        let present_mode = rc.settings.present_mode();
        let mut present = RenderPresent::new(&mut rc, None, extent, present_mode).unwrap();

        let a = rc.create_render_target(extent, GfxFormat::Rgba16Float, "a").unwrap();
        let b = rc.create_render_target(extent, GfxFormat::Rgba16Float, "b").unwrap();
        let c = rc.create_render_target(extent, present.format(), "c").unwrap();
        let fullscreen =
            |name: &str, format: GfxFormat| GfxGraphicsPipelineDesc::fullscreen(name, format!("{}.ps", name), format);
        let mut passes: Vec<Box<dyn RenderPass>> = vec![
            Box::new(ScriptedPass {
                name: "pass-a",
                input: None,
                output: a,
                pipeline: PassPipeline::new(&rc, fullscreen("pass-a", GfxFormat::Rgba16Float)),
            }),
            Box::new(ScriptedPass {
                name: "pass-b",
                input: Some(a),
                output: b,
                pipeline: PassPipeline::new(&rc, fullscreen("pass-b", GfxFormat::Rgba16Float)),
            }),
            Box::new(ScriptedPass {
                name: "pass-c",
                input: Some(b),
                output: c,
                pipeline: PassPipeline::new(&rc, fullscreen("pass-c", present.format())),
            }),
        ];

        let targets = FrameTargets::new(&mut rc, extent, 16, present.format()).unwrap();
        let scene = SceneView::default();
        present.acquire(&mut rc).unwrap();
        device.clear_events();

        let mut contexts = Vec::new();
        for pass in passes.iter_mut() {
            let mut ctx = rc.graphics_queue.acquire_context(pass.name()).unwrap();
            let mut pass_ctx = PassContext {
                resources: &mut rc.gfx_resource_manager,
                targets: &targets,
                scene: &scene,
                frame: FrameInfo {
                    frame_id: 0,
                    label: FrameLabel::A,
                    extent,
                    frame_constants: 0,
                    clear_color: [0.0; 4],
                    exposure: 1.0,
                },
            };
            pass.record(&mut ctx, &mut pass_ctx).unwrap();
            contexts.push(ctx);
        }
        let mut ctx = rc.graphics_queue.acquire_context("present").unwrap();
        present.record_copy(&mut ctx, &mut rc.gfx_resource_manager, c).unwrap();
        contexts.push(ctx);
        rc.graphics_queue.execute_contexts(contexts).unwrap();
        present.present(&mut rc).unwrap();

        let events = device.events();
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());

        let a_write = position(&events, |e| is_barrier(e, "a", GfxResourceState::RenderTarget));
        let a_draw = position(&events, |e| is_draw(e, "pass-a"));
        let a_read = position(&events, |e| is_barrier(e, "a", GfxResourceState::ShaderResource));
        let b_write = position(&events, |e| is_barrier(e, "b", GfxResourceState::RenderTarget));
        let b_draw = position(&events, |e| is_draw(e, "pass-b"));
        let b_read = position(&events, |e| is_barrier(e, "b", GfxResourceState::ShaderResource));
        let c_draw = position(&events, |e| is_draw(e, "pass-c"));
        let c_copy = position(&events, |e| is_barrier(e, "c", GfxResourceState::CopySource));
        let presented = position(&events, |e| matches!(e, HeadlessEvent::Present { .. }));

        assert!(a_write < a_draw && a_draw < a_read);
        assert!(a_read < b_draw && b_write < b_draw);
        assert!(b_draw < b_read && b_read < c_draw);
        assert!(c_draw < c_copy && c_copy < presented);
        assert!(events.iter().any(|e| matches!(e, HeadlessEvent::ExecuteList { queue: GfxQueueType::Graphics, .. })));

        for pass in passes {
            pass.destroy();
        }
        targets.destroy(&mut rc).unwrap();
        present.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
        assert_eq!(device.live_resource_count(), 0);
    }
}
