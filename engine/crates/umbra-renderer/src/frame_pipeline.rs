use umbra_gfx::{
    basic::{extent::GfxExtent2D, format::GfxFormat},
    device::GfxResourceHandle,
    error::{GfxError, GfxErrorKind, GfxResult},
    resources::{GfxResourceDesc, GfxResourceUsage},
    swapchain::{GfxPresentMode, GfxWindowHandles},
};
use umbra_render_interface::{
    descriptor_allocator::shader_index,
    frame_counter::FrameLabel,
    handles::{GfxBufferHandle, GfxTextureHandle},
    render_context::RenderContext,
};

use crate::{
    frame_targets::FrameTargets,
    pass::{FrameInfo, PassContext, RenderPass},
    passes::{
        composite_pass::CompositePass, depth_copy_pass::DepthCopyPass, geometry_pass::GeometryPass,
        lighting_pass::LightingPass, post_process_pass::PostProcessPass, shadow_pass::ShadowPass,
    },
    present::render_present::RenderPresent,
    scene::{FrameConstants, SceneView},
    ui::UiOverlay,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePipelineStats {
    /// 已经呈现的帧数
    pub frames: u64,
    /// 因为 frames in flight 已满而在 begin_frame 中等待的帧数
    pub throttled_frames: u64,
    pub swapchain_rebuilds: u64,
}

/// begin_frame 与 end_frame 之间的状态
#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    label: FrameLabel,
    back_buffer: GfxTextureHandle,
    submitted: bool,
}

/// 延迟渲染的帧管线
///
/// 一帧的录制顺序：shadow -> geometry -> depth copy -> lighting -> post process -> composite -> present copy，
/// 每个 pass 一个 context，整帧作为一个批次提交到 graphics 队列。
///
/// # Destroy
/// 需要手动调用 [`FramePipeline::destroy`]
pub struct FramePipeline {
    passes: Vec<Box<dyn RenderPass>>,
    targets: FrameTargets,
    present: RenderPresent,

    /// 每个 frame label 一份，只有该 label 上一次的提交完成后才会被重写
    frame_constants: Vec<GfxBufferHandle>,
    /// 每个 frame label 最近一次提交时 graphics 队列的 fence 值
    slot_fence_values: Vec<u64>,

    active_frame: Option<ActiveFrame>,
    minimized: bool,
    stats: FramePipelineStats,
}

// new & init
impl FramePipeline {
    /// 标准的延迟渲染管线
    pub fn new(
        rc: &mut RenderContext,
        window: Option<GfxWindowHandles>,
        extent: GfxExtent2D,
        ui: Box<dyn UiOverlay>,
    ) -> GfxResult<Self> {
        Self::with_passes(rc, window, extent, |rc, final_format| {
            let passes: Vec<Box<dyn RenderPass>> = vec![
                Box::new(ShadowPass::new(rc)),
                Box::new(GeometryPass::new(rc)),
                Box::new(DepthCopyPass),
                Box::new(LightingPass::new(rc)),
                Box::new(PostProcessPass::new(rc)),
                Box::new(CompositePass::new(rc, final_format, ui)),
            ];
            passes
        })
    }

    /// 使用自定义的 pass 序列，最后一个 pass 需要写入 [`FrameTargets::final_target`]
    pub fn with_passes(
        rc: &mut RenderContext,
        window: Option<GfxWindowHandles>,
        extent: GfxExtent2D,
        build_passes: impl FnOnce(&RenderContext, GfxFormat) -> Vec<Box<dyn RenderPass>>,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("FramePipeline::new");

        let present_mode = rc.settings.present_mode();
        let shadow_map_size = rc.settings.shadow_map_size;
        let present = RenderPresent::new(rc, window, extent, present_mode)?;
        let targets = FrameTargets::new(rc, extent, shadow_map_size, present.format())?;
        let passes = build_passes(rc, present.format());

        let frame_constants = rc
            .frame_counter
            .frame_labels()
            .iter()
            .map(|label| {
                let desc = GfxResourceDesc::buffer(
                    size_of::<FrameConstants>() as u64,
                    GfxResourceUsage::CONSTANT | GfxResourceUsage::UPLOAD,
                    format!("frame-constants-{}", label),
                );
                rc.create_buffer(&desc, &[])
            })
            .collect::<GfxResult<Vec<_>>>()?;

        log::info!(
            "frame pipeline created: {} passes, {} frames in flight, {}",
            passes.len(),
            frame_constants.len(),
            extent
        );
        Ok(Self {
            slot_fence_values: vec![0; frame_constants.len()],
            passes,
            targets,
            present,
            frame_constants,
            active_frame: None,
            minimized: false,
            stats: FramePipelineStats::default(),
        })
    }
}

// destroy
impl FramePipeline {
    /// 等待 GPU 空闲后释放管线持有的全部对象，返回第一个错误
    pub fn destroy(self, rc: &mut RenderContext) -> GfxResult<()> {
        let _span = tracy_client::span!("FramePipeline::destroy");
        let mut result = rc.flush_all();

        for pass in self.passes {
            pass.destroy();
        }
        let mut keep_first = |r: GfxResult<()>| {
            if result.is_ok() {
                result = r;
            }
        };
        keep_first(self.targets.destroy(rc));
        keep_first(self.present.destroy(rc));
        for buffer in self.frame_constants {
            keep_first(rc.destroy_buffer(buffer));
        }
        log::info!("frame pipeline destroyed");
        result
    }
}

// getters
impl FramePipeline {
    #[inline]
    pub fn targets(&self) -> &FrameTargets {
        &self.targets
    }

    #[inline]
    pub fn present(&self) -> &RenderPresent {
        &self.present
    }

    #[inline]
    pub fn extent(&self) -> GfxExtent2D {
        self.targets.extent()
    }

    #[inline]
    pub fn stats(&self) -> FramePipelineStats {
        self.stats
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// 某个 frame label 的常量缓冲区
    pub fn frame_constants_buffer(&self, rc: &RenderContext, label: FrameLabel) -> Option<GfxResourceHandle> {
        let handle = self.frame_constants.get(*label)?;
        rc.gfx_resource_manager.get_buffer(*handle).map(|buffer| buffer.resource())
    }

    /// 某个 frame label 最近一次提交的 fence 值
    pub fn slot_fence_value(&self, label: FrameLabel) -> Option<u64> {
        self.slot_fence_values.get(*label).copied()
    }
}

// frame
impl FramePipeline {
    /// 渲染并呈现一帧；窗口最小化时跳过，返回 `false`
    pub fn draw_frame(&mut self, rc: &mut RenderContext, scene: &SceneView) -> GfxResult<bool> {
        if self.minimized {
            return Ok(false);
        }
        self.begin_frame(rc)?;
        self.render(rc, scene)?;
        self.end_frame(rc)?;
        Ok(true)
    }

    /// 等待当前 frame label 上一次的提交完成，回收延迟销毁的资源，然后 acquire back buffer
    pub fn begin_frame(&mut self, rc: &mut RenderContext) -> GfxResult<()> {
        let _span = tracy_client::span!("FramePipeline::begin_frame");
        if self.active_frame.is_some() {
            return Err(GfxError::invalid_usage("begin_frame called twice without end_frame"));
        }

        let label = rc.frame_counter.frame_label();
        let wait_value = self.slot_fence_values[*label];
        if !rc.graphics_queue.is_complete(wait_value)? {
            let _span = tracy_client::span!("FramePipeline::wait_for_slot");
            log::debug!("{} waits for graphics fence {}", rc.frame_counter.frame_name(), wait_value);
            self.stats.throttled_frames += 1;
            rc.graphics_queue.wait_for_value(wait_value)?;
        }
        rc.cleanup()?;

        let back_buffer = self.present.acquire(rc)?;
        self.active_frame = Some(ActiveFrame {
            label,
            back_buffer,
            submitted: false,
        });
        Ok(())
    }

    /// 写入本帧常量，按顺序录制所有 pass，并把整帧作为一个批次提交
    pub fn render(&mut self, rc: &mut RenderContext, scene: &SceneView) -> GfxResult<()> {
        let _span = tracy_client::span!("FramePipeline::render");
        let frame = match self.active_frame {
            Some(frame) if !frame.submitted => frame,
            Some(_) => return Err(GfxError::invalid_usage("frame rendered twice")),
            None => return Err(GfxError::invalid_usage("render called outside begin_frame / end_frame")),
        };
        let frame_name = rc.frame_counter.frame_name();
        let extent = self.targets.extent();

        let constants = FrameConstants::new(
            scene,
            extent,
            rc.settings.exposure,
            rc.frame_counter.frame_id(),
            rc.settings.shadow_map_size,
        );
        let constants_buffer = rc.gfx_resource_manager.buffer_mut(self.frame_constants[*frame.label])?;
        let frame_constants = shader_index(constants_buffer.cbv());
        rc.uploader.upload_buffer(&mut rc.copy_queue, constants_buffer, 0, bytemuck::bytes_of(&constants))?;

        let info = FrameInfo {
            frame_id: rc.frame_counter.frame_id(),
            label: frame.label,
            extent,
            frame_constants,
            clear_color: rc.settings.clear_color,
            exposure: rc.settings.exposure,
        };

        let mut contexts = Vec::with_capacity(self.passes.len() + 1);
        for pass in self.passes.iter_mut() {
            let mut ctx = rc.graphics_queue.acquire_context(format!("{}{}", pass.name(), frame_name))?;
            ctx.begin_label(pass.name());
            let mut pass_ctx = PassContext {
                resources: &mut rc.gfx_resource_manager,
                targets: &self.targets,
                scene,
                frame: info,
            };
            pass.record(&mut ctx, &mut pass_ctx)?;
            ctx.end_label();
            contexts.push(ctx);
        }

        let mut ctx = rc.graphics_queue.acquire_context(format!("present{}", frame_name))?;
        self.present.record_copy(&mut ctx, &mut rc.gfx_resource_manager, self.targets.final_target)?;
        contexts.push(ctx);

        let fence_value = rc.graphics_queue.execute_contexts(contexts)?;
        self.slot_fence_values[*frame.label] = fence_value;
        self.active_frame = Some(ActiveFrame {
            submitted: true,
            ..frame
        });
        Ok(())
    }

    /// 呈现并推进帧计数；交换链过期时按当前尺寸重建
    pub fn end_frame(&mut self, rc: &mut RenderContext) -> GfxResult<()> {
        let _span = tracy_client::span!("FramePipeline::end_frame");
        let frame = self
            .active_frame
            .take()
            .ok_or_else(|| GfxError::invalid_usage("end_frame called without begin_frame"))?;
        if !frame.submitted {
            return Err(GfxError::invalid_usage(format!(
                "frame ended before rendering into {:?}",
                frame.back_buffer
            )));
        }

        match self.present.present(rc) {
            Err(err) if err.kind() == GfxErrorKind::SwapchainOutOfDate => {
                log::warn!("swapchain out of date on present, rebuilding");
                rc.flush_all()?;
                let (extent, mode) = (self.present.extent(), self.present.present_mode());
                self.present.rebuild(rc, extent, mode)?;
                self.stats.swapchain_rebuilds += 1;
            }
            other => other?,
        }

        rc.frame_counter.next_frame();
        self.stats.frames += 1;
        Ok(())
    }
}

// update
impl FramePipeline {
    /// 窗口尺寸变化
    ///
    /// 尺寸为 0 时只记录最小化状态。否则等待所有队列空闲，原地重建渲染目标与交换链，并通知每个 pass。
    pub fn resize(&mut self, rc: &mut RenderContext, extent: GfxExtent2D) -> GfxResult<()> {
        let _span = tracy_client::span!("FramePipeline::resize");
        if extent.is_empty() {
            if !self.minimized {
                log::info!("window minimized, frames are skipped");
            }
            self.minimized = true;
            return Ok(());
        }
        self.minimized = false;
        if extent == self.targets.extent() && extent == self.present.extent() {
            return Ok(());
        }
        if self.active_frame.is_some() {
            return Err(GfxError::invalid_usage("resize inside a frame"));
        }

        rc.flush_all()?;
        self.targets.resize(rc, extent)?;
        self.present.rebuild(rc, extent, self.present.present_mode())?;
        self.stats.swapchain_rebuilds += 1;
        for pass in self.passes.iter_mut() {
            pass.resize(rc, extent)?;
        }
        // 队列已经空闲，旧的渲染目标内存可以立即释放
        rc.cleanup()
    }

    pub fn set_present_mode(&mut self, rc: &mut RenderContext, present_mode: GfxPresentMode) -> GfxResult<()> {
        if present_mode == self.present.present_mode() {
            return Ok(());
        }
        if self.active_frame.is_some() {
            return Err(GfxError::invalid_usage("present mode changed inside a frame"));
        }
        rc.flush_all()?;
        let extent = self.present.extent();
        self.present.rebuild(rc, extent, present_mode)?;
        self.stats.swapchain_rebuilds += 1;
        rc.settings.vsync = present_mode.vsync;
        rc.settings.allow_tearing = present_mode.allow_tearing;
        Ok(())
    }

    /// 等待 graphics 队列空闲后重新编译所有管线
    pub fn reload_pipelines(&mut self, rc: &mut RenderContext) -> GfxResult<()> {
        let _span = tracy_client::span!("FramePipeline::reload_pipelines");
        rc.graphics_queue.flush()?;
        for pass in self.passes.iter_mut() {
            pass.reload_pipelines(rc);
        }
        log::info!("pipelines reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use glam::{Mat4, Vec3};
    use itertools::Itertools;
    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessEvent, HeadlessExecutionMode},
        device::{GfxDevice, GfxQueueType},
        pipelines::shader_library::ShaderLibrary,
    };
    use umbra_render_interface::render_settings::RenderSettings;

    use super::*;
    use crate::{
        scene::{PointLight, SceneMesh, SceneObject},
        ui::{NoUi, UiTargets},
    };

    fn context(mode: HeadlessExecutionMode, settings: RenderSettings) -> (Arc<HeadlessDevice>, RenderContext) {
        let device = HeadlessDevice::with_mode(mode);
        let rc = RenderContext::new(device.clone(), settings, Arc::new(ShaderLibrary::synthetic())).unwrap();
        (device, rc)
    }

    /// 一个三角形、一张 2x2 的纹理、一个点光源和天空盒
    fn scene(rc: &mut RenderContext) -> SceneView {
        let vertices: [f32; 9] = [0.0, 0.5, 0.0, 0.5, -0.5, 0.0, -0.5, -0.5, 0.0];
        let indices: [u32; 3] = [0, 1, 2];
        let vertices = rc
            .create_buffer(
                &GfxResourceDesc::buffer(36, GfxResourceUsage::SHADER_RESOURCE, "triangle-vertices"),
                bytemuck::cast_slice(&vertices),
            )
            .unwrap();
        let indices = rc
            .create_buffer(
                &GfxResourceDesc::buffer(12, GfxResourceUsage::INDEX, "triangle-indices"),
                bytemuck::cast_slice(&indices),
            )
            .unwrap();
        let texture_desc = |name: &str| {
            GfxResourceDesc::texture_2d(
                GfxExtent2D::new(2, 2),
                GfxFormat::Rgba8Unorm,
                GfxResourceUsage::SHADER_RESOURCE,
                name,
            )
        };
        let albedo = rc.create_texture(&texture_desc("albedo"), &[200; 16]).unwrap();
        let skybox = rc.create_texture(&texture_desc("skybox"), &[50; 16]).unwrap();

        SceneView {
            point_lights: vec![PointLight {
                position: Vec3::new(0.0, 1.0, 1.0),
                radius: 4.0,
                color: Vec3::ONE,
                intensity: 5.0,
            }],
            meshes: vec![SceneMesh {
                vertices,
                indices,
                index_count: 3,
            }],
            objects: vec![SceneObject {
                mesh: 0,
                transform: Mat4::IDENTITY,
                albedo: Some(albedo),
                metallic: 0.0,
                roughness: 0.5,
                emissive: 0.0,
            }],
            skybox: Some(skybox),
            environment: Some(skybox),
            ..Default::default()
        }
    }

    fn texture_extent(rc: &RenderContext, handle: GfxTextureHandle) -> GfxExtent2D {
        rc.gfx_resource_manager.texture(handle).unwrap().extent()
    }

    #[test]
    fn test_frame_records_passes_in_order() {
        let (device, mut rc) = context(HeadlessExecutionMode::Immediate, RenderSettings::default());
        let scene = scene(&mut rc);
        let mut pipeline = FramePipeline::new(&mut rc, None, GfxExtent2D::new(64, 64), Box::new(NoUi)).unwrap();
        device.clear_events();

        assert!(pipeline.draw_frame(&mut rc, &scene).unwrap());
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());

        let events = device.events();
        let pass_names = pipeline.pass_names();
        let labels = events
            .iter()
            .filter_map(|e| match e {
                HeadlessEvent::BeginLabel { name, .. } if pass_names.contains(&name.as_str()) => Some(name.as_str()),
                _ => None,
            })
            .collect_vec();
        assert_eq!(labels, vec!["shadow", "geometry", "depth-copy", "lighting", "post-process", "composite"]);

        let draws = events
            .iter()
            .filter_map(|e| match e {
                HeadlessEvent::Draw { pipeline, .. } => Some(pipeline.as_str()),
                _ => None,
            })
            .collect_vec();
        assert_eq!(draws, vec!["shadow", "geometry", "lighting", "light-volume", "skybox", "post-process", "composite"]);

        let copies = events
            .iter()
            .filter_map(|e| match e {
                HeadlessEvent::Copy {
                    queue: GfxQueueType::Graphics,
                    src,
                    dst,
                } => Some((src.as_str(), dst.as_str())),
                _ => None,
            })
            .collect_vec();
        assert_eq!(copies, vec![("depth", "forward-depth"), ("final", "back-buffer-0")]);
        assert!(matches!(events.last(), Some(HeadlessEvent::Present { back_buffer }) if back_buffer == "back-buffer-0"));

        // 一帧只提交一个批次
        let signals = events
            .iter()
            .filter(|e| matches!(e, HeadlessEvent::Signal { queue: GfxQueueType::Graphics, .. }))
            .count();
        assert_eq!(signals, 1);
        assert_eq!(pipeline.stats().frames, 1);

        pipeline.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    fn test_resize_round_trip_restores_allocations() {
        let (device, mut rc) = context(HeadlessExecutionMode::Immediate, RenderSettings::default());
        let scene = scene(&mut rc);
        let full_hd = GfxExtent2D::new(1920, 1080);
        let mut pipeline = FramePipeline::new(&mut rc, None, full_hd, Box::new(NoUi)).unwrap();

        pipeline.draw_frame(&mut rc, &scene).unwrap();
        rc.flush_all().unwrap();
        rc.cleanup().unwrap();
        let baseline = device.live_resource_count();
        let texture_count = rc.gfx_resource_manager.texture_count();
        let sized = pipeline.targets().sized_targets();
        let indices = sized
            .iter()
            .map(|h| {
                let texture = rc.gfx_resource_manager.texture(*h).unwrap();
                (texture.srv(), texture.rtv(), texture.dsv())
            })
            .collect_vec();

        let half = GfxExtent2D::new(1280, 720);
        pipeline.resize(&mut rc, half).unwrap();
        assert!(sized.iter().all(|h| texture_extent(&rc, *h) == half));
        assert_eq!(texture_extent(&rc, pipeline.targets().shadow_map), GfxExtent2D::new(2048, 2048));
        assert_eq!(pipeline.present().extent(), half);
        pipeline.draw_frame(&mut rc, &scene).unwrap();

        pipeline.resize(&mut rc, full_hd).unwrap();
        pipeline.draw_frame(&mut rc, &scene).unwrap();
        rc.flush_all().unwrap();
        rc.cleanup().unwrap();

        assert_eq!(device.live_resource_count(), baseline);
        assert_eq!(rc.gfx_resource_manager.texture_count(), texture_count);
        assert_eq!(rc.gfx_resource_manager.pending_destroy_count(), 0);
        for (handle, (srv, rtv, dsv)) in sized.iter().zip(indices) {
            let texture = rc.gfx_resource_manager.texture(*handle).unwrap();
            assert_eq!(texture.extent(), full_hd);
            assert_eq!((texture.srv(), texture.rtv(), texture.dsv()), (srv, rtv, dsv));
            let srv = srv.unwrap();
            assert!(rc.gfx_resource_manager.descriptor_allocator(srv.heap).is_live(srv));
        }
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());

        pipeline.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
    }

    #[test]
    fn test_minimized_window_skips_frames() {
        let (device, mut rc) = context(HeadlessExecutionMode::Immediate, RenderSettings::default());
        let scene = SceneView::default();
        let mut pipeline = FramePipeline::new(&mut rc, None, GfxExtent2D::new(32, 32), Box::new(NoUi)).unwrap();

        pipeline.resize(&mut rc, GfxExtent2D::new(0, 0)).unwrap();
        device.clear_events();
        assert!(!pipeline.draw_frame(&mut rc, &scene).unwrap());
        assert!(device.events().is_empty());

        // 恢复到原来的尺寸不需要重建
        pipeline.resize(&mut rc, GfxExtent2D::new(32, 32)).unwrap();
        assert!(pipeline.draw_frame(&mut rc, &scene).unwrap());
        assert_eq!(pipeline.stats().swapchain_rebuilds, 0);

        pipeline.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
    }

    #[test]
    fn test_frame_calls_must_be_ordered() {
        let (_device, mut rc) = context(HeadlessExecutionMode::Immediate, RenderSettings::default());
        let scene = SceneView::default();
        let mut pipeline = FramePipeline::new(&mut rc, None, GfxExtent2D::new(32, 32), Box::new(NoUi)).unwrap();

        assert!(pipeline.render(&mut rc, &scene).is_err());
        pipeline.begin_frame(&mut rc).unwrap();
        assert!(pipeline.begin_frame(&mut rc).is_err());
        assert!(pipeline.resize(&mut rc, GfxExtent2D::new(16, 16)).is_err());
        pipeline.render(&mut rc, &scene).unwrap();
        assert!(pipeline.render(&mut rc, &scene).is_err());
        pipeline.end_frame(&mut rc).unwrap();
        assert!(pipeline.end_frame(&mut rc).is_err());

        pipeline.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
    }

    #[test]
    fn test_reload_and_present_mode_keep_frames_valid() {
        let (device, mut rc) = context(HeadlessExecutionMode::Immediate, RenderSettings::default());
        let scene = scene(&mut rc);
        let mut pipeline = FramePipeline::new(&mut rc, None, GfxExtent2D::new(32, 32), Box::new(NoUi)).unwrap();
        pipeline.draw_frame(&mut rc, &scene).unwrap();
        let pipelines = device.pipeline_count();

        pipeline.reload_pipelines(&mut rc).unwrap();
        let mode = GfxPresentMode {
            vsync: false,
            allow_tearing: false,
        };
        pipeline.set_present_mode(&mut rc, mode).unwrap();
        assert!(!rc.settings.vsync);
        pipeline.draw_frame(&mut rc, &scene).unwrap();

        assert_eq!(device.pipeline_count(), pipelines);
        assert_eq!(pipeline.present().present_mode(), mode);
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());

        pipeline.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
    }

    /// 记录自己被调用的次数，并在 composite 中绘制
    struct CountingUi(Arc<std::sync::atomic::AtomicUsize>);

    impl UiOverlay for CountingUi {
        fn render(
            &mut self,
            _ctx: &mut umbra_gfx::commands::graphics_context::GfxGraphicsContext,
            targets: UiTargets,
        ) -> GfxResult<()> {
            assert!(!targets.extent.is_empty());
            self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_ui_hook_runs_once_per_frame() {
        let (_device, mut rc) = context(HeadlessExecutionMode::Immediate, RenderSettings::default());
        let scene = SceneView::default();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ui = Box::new(CountingUi(calls.clone()));
        let mut pipeline = FramePipeline::new(&mut rc, None, GfxExtent2D::new(32, 32), ui).unwrap();

        for _ in 0..3 {
            pipeline.draw_frame(&mut rc, &scene).unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 3);

        pipeline.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
    }

    /// 两帧在途时 GPU 停止推进，第三帧必须在 begin_frame 中等待，不能覆盖第一帧的常量
    #[test]
    fn test_frames_in_flight_backpressure() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let (progress_tx, progress_rx) = crossbeam_channel::unbounded::<(&'static str, Option<GfxResourceHandle>)>();

        let worker_device = device.clone();
        let worker = std::thread::spawn(move || {
            let settings = RenderSettings {
                frames_in_flight: 2,
                ..Default::default()
            };
            let mut rc =
                RenderContext::new(worker_device.clone(), settings, Arc::new(ShaderLibrary::synthetic())).unwrap();
            let scene = SceneView::default();
            let mut pipeline = FramePipeline::new(&mut rc, None, GfxExtent2D::new(16, 16), Box::new(NoUi)).unwrap();

            worker_device.set_mode(HeadlessExecutionMode::Stalled);
            pipeline.draw_frame(&mut rc, &scene).unwrap();
            pipeline.draw_frame(&mut rc, &scene).unwrap();
            let slot_a = pipeline.frame_constants_buffer(&rc, FrameLabel::A);
            progress_tx.send(("submitted", slot_a)).unwrap();

            pipeline.draw_frame(&mut rc, &scene).unwrap();
            progress_tx.send(("third-frame", slot_a)).unwrap();
            assert_eq!(pipeline.stats().throttled_frames, 1);

            pipeline.destroy(&mut rc).unwrap();
            rc.destroy().unwrap();
        });

        let frame_id_of = |resource: GfxResourceHandle| {
            let bytes = device.read_resource(resource).unwrap();
            bytemuck::pod_read_unaligned::<FrameConstants>(&bytes).frame_id
        };

        let (stage, slot_a) = progress_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(stage, "submitted");
        let slot_a = slot_a.unwrap();
        assert_eq!(frame_id_of(slot_a), 0);

        // 第三帧卡在 begin_frame
        assert!(progress_rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(device.pending_ops(GfxQueueType::Graphics) > 0);
        assert_eq!(frame_id_of(slot_a), 0);

        device.resume();
        let (stage, _) = progress_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(stage, "third-frame");
        worker.join().unwrap();
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
    }
}
