use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use umbra_crate_tools::init_log::init_log;
use umbra_gfx::{
    backend::create_device,
    basic::extent::GfxExtent2D,
    device::{GfxBackendKind, GfxDevice, GfxDeviceDesc},
    error::{GfxError, GfxErrorKind, GfxResult},
    pipelines::shader_library::ShaderLibrary,
    swapchain::{GfxPresentMode, GfxWindowHandles},
};
use umbra_render_interface::render_context::RenderContext;
use umbra_renderer::{
    frame_pipeline::{FramePipeline, FramePipelineStats},
    scene::SceneView,
};

use crate::{app_settings::AppSettings, fatal, outer_app::OuterApp};

/// 创建设备的方式；设备丢失后用它重建
pub type DeviceFactory = Box<dyn Fn(&GfxDeviceDesc) -> GfxResult<Arc<dyn GfxDevice>>>;

pub fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

/// 与某一个设备绑定的全部状态，设备丢失时整体丢弃
struct GpuState {
    rc: RenderContext,
    pipeline: FramePipeline,
    scene: SceneView,
}

pub struct RenderApp {
    settings: AppSettings,
    device_factory: DeviceFactory,
    outer_app: Box<dyn OuterApp>,

    window: Option<GfxWindowHandles>,
    extent: GfxExtent2D,
    gpu: Option<GpuState>,

    last_frame: Option<Instant>,
    device_lost_count: u32,
}

// new & init
impl RenderApp {
    pub fn new(settings: AppSettings, outer_app: Box<dyn OuterApp>, device_factory: DeviceFactory) -> Self {
        Self {
            extent: settings.window_extent(),
            settings,
            device_factory,
            outer_app,
            window: None,
            gpu: None,
            last_frame: None,
            device_lost_count: 0,
        }
    }

    /// 按配置中的后端创建设备
    pub fn backend_factory(backend: GfxBackendKind) -> DeviceFactory {
        Box::new(move |desc| create_device(backend, desc))
    }

    pub fn init_env(log_level: log::LevelFilter) {
        std::panic::set_hook(Box::new(panic_handler));

        init_log(log_level);

        tracy_client::Client::start();
        tracy_client::set_thread_name!("RenderThread");
    }

    /// 窗口（或 headless 的虚拟窗口）就绪后创建设备、场景和帧管线
    pub fn init_after_window(&mut self, window: Option<GfxWindowHandles>, extent: GfxExtent2D) -> GfxResult<()> {
        if self.gpu.is_some() {
            return Err(GfxError::invalid_usage("render app initialized twice"));
        }
        self.window = window;
        self.extent = extent;
        self.create_gpu()
    }

    fn device_desc(&self) -> GfxDeviceDesc {
        GfxDeviceDesc {
            app_name: self.settings.window_title.clone(),
            descriptor_capacity: self.settings.render.descriptor_capacity(),
            display_handle: self.window.map(|window| window.display),
            ..Default::default()
        }
    }

    fn create_gpu(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("RenderApp::create_gpu");
        let device = (self.device_factory)(&self.device_desc())?;
        let shader_library = match device.backend() {
            GfxBackendKind::Headless => ShaderLibrary::synthetic(),
            GfxBackendKind::Vulkan => ShaderLibrary::directory(self.settings.render.shader_dir()),
        };
        let mut rc = RenderContext::new(device, self.settings.render.clone(), Arc::new(shader_library))?;

        match self.build_frame(&mut rc) {
            Ok((scene, pipeline)) => {
                self.gpu = Some(GpuState { rc, pipeline, scene });
                Ok(())
            }
            Err(err) => {
                // 已经创建的资源都登记在 rc 中
                if let Err(destroy_err) = rc.destroy() {
                    log::warn!("releasing a half-built render context: {}", destroy_err);
                }
                Err(err)
            }
        }
    }

    fn build_frame(&mut self, rc: &mut RenderContext) -> GfxResult<(SceneView, FramePipeline)> {
        let scene = {
            let _span = tracy_client::span!("OuterApp::init");
            self.outer_app.init(rc)?
        };
        let pipeline = FramePipeline::new(rc, self.window, self.extent, self.outer_app.create_ui())?;
        Ok((scene, pipeline))
    }
}

// destroy
impl RenderApp {
    /// 等待 GPU 空闲后释放全部对象，返回第一个错误
    pub fn destroy(mut self) -> GfxResult<()> {
        let result = self.destroy_gpu();
        log::info!("render app destroyed");
        result
    }

    fn destroy_gpu(&mut self) -> GfxResult<()> {
        let Some(gpu) = self.gpu.take() else {
            return Ok(());
        };
        let GpuState { mut rc, pipeline, .. } = gpu;

        // 运行时修改过的设置（例如 vsync）在重建后保留
        self.settings.render = rc.settings.clone();
        let pipeline_result = pipeline.destroy(&mut rc);
        let rc_result = rc.destroy();
        pipeline_result.and(rc_result)
    }
}

// getters
impl RenderApp {
    #[inline]
    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    #[inline]
    pub fn extent(&self) -> GfxExtent2D {
        self.extent
    }

    #[inline]
    pub fn device_lost_count(&self) -> u32 {
        self.device_lost_count
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn render_context(&self) -> Option<&RenderContext> {
        self.gpu.as_ref().map(|gpu| &gpu.rc)
    }

    pub fn pipeline_stats(&self) -> Option<FramePipelineStats> {
        self.gpu.as_ref().map(|gpu| gpu.pipeline.stats())
    }

    pub fn present_mode(&self) -> Option<GfxPresentMode> {
        self.gpu.as_ref().map(|gpu| gpu.pipeline.present().present_mode())
    }
}

// update
impl RenderApp {
    /// 更新并渲染一帧
    ///
    /// 返回 `false` 表示这一帧没有呈现：窗口最小化，或者刚刚从设备丢失中恢复。
    pub fn render_frame(&mut self) -> GfxResult<bool> {
        let now = Instant::now();
        let delta = self.last_frame.map(|last| now - last).unwrap_or(Duration::ZERO);
        self.last_frame = Some(now);

        let gpu = self
            .gpu
            .as_mut()
            .ok_or_else(|| GfxError::invalid_usage("render_frame before init_after_window"))?;

        {
            let _span = tracy_client::span!("OuterApp::update");
            self.outer_app.update(&mut gpu.scene, delta);
        }

        match gpu.pipeline.draw_frame(&mut gpu.rc, &gpu.scene) {
            Ok(presented) => {
                if presented {
                    tracy_client::frame_mark();
                }
                Ok(presented)
            }
            Err(err) if err.kind() == GfxErrorKind::DeviceLost => {
                self.recover_from_device_lost(&err)?;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// 丢弃旧设备上的一切，通过 device factory 重建设备，并重新初始化场景
    fn recover_from_device_lost(&mut self, err: &GfxError) -> GfxResult<()> {
        let _span = tracy_client::span!("RenderApp::recover_from_device_lost");
        self.device_lost_count += 1;
        log::error!("device lost ({}), recreating device #{}", err, self.device_lost_count);

        // 旧设备已经不可用，释放时的错误只记录
        if let Err(destroy_err) = self.destroy_gpu() {
            log::warn!("releasing the lost device: {}", destroy_err);
        }
        self.outer_app.on_device_lost();
        self.create_gpu()?;
        log::info!("device recovered");
        Ok(())
    }

    pub fn resize(&mut self, extent: GfxExtent2D) -> GfxResult<()> {
        self.extent = extent;
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        log::info!("window resized: {}", extent);
        gpu.pipeline.resize(&mut gpu.rc, extent)?;
        if !extent.is_empty() {
            self.outer_app.on_window_resized(&mut gpu.scene, extent);
        }
        Ok(())
    }

    /// 切换 vsync，返回切换后的状态
    pub fn toggle_vsync(&mut self) -> GfxResult<bool> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(self.settings.render.vsync);
        };
        let current = gpu.pipeline.present().present_mode();
        let mode = GfxPresentMode {
            vsync: !current.vsync,
            ..current
        };
        gpu.pipeline.set_present_mode(&mut gpu.rc, mode)?;
        log::info!("vsync: {}", mode.vsync);
        Ok(mode.vsync)
    }

    pub fn reload_pipelines(&mut self) -> GfxResult<()> {
        match self.gpu.as_mut() {
            Some(gpu) => gpu.pipeline.reload_pipelines(&mut gpu.rc),
            None => Ok(()),
        }
    }
}

/// 不创建窗口，渲染 `headless_frames` 帧后退出
pub fn run_headless(settings: AppSettings, outer_app: Box<dyn OuterApp>) {
    let frames = settings.headless_frames;
    let extent = settings.window_extent();
    let factory = RenderApp::backend_factory(settings.backend.into());
    let mut app = RenderApp::new(settings, outer_app, factory);

    if let Err(err) = app.init_after_window(None, extent) {
        fatal::terminate(err);
    }
    for _ in 0..frames {
        if let Err(err) = app.render_frame() {
            fatal::terminate(err);
        }
    }
    if let Some(stats) = app.pipeline_stats() {
        log::info!(
            "headless run finished: {} frames, {} throttled, {} swapchain rebuilds",
            stats.frames,
            stats.throttled_frames,
            stats.swapchain_rebuilds
        );
    }
    if let Err(err) = app.destroy() {
        fatal::terminate(err);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use umbra_gfx::backend::headless::{HeadlessDevice, HeadlessEvent, HeadlessExecutionMode};

    use super::*;
    use crate::{app_settings::AppBackend, demo_scene::DemoApp};

    /// 每次调用都创建新的 headless 设备，并记录下来供测试检查
    fn recording_factory() -> (Arc<Mutex<Vec<Arc<HeadlessDevice>>>>, DeviceFactory) {
        let devices = Arc::new(Mutex::new(Vec::new()));
        let recorded = devices.clone();
        let factory: DeviceFactory = Box::new(move |_desc| {
            let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
            recorded.lock().unwrap().push(device.clone());
            let device: Arc<dyn GfxDevice> = device;
            Ok(device)
        });
        (devices, factory)
    }

    fn settings() -> AppSettings {
        AppSettings {
            backend: AppBackend::Headless,
            window_width: 64,
            window_height: 48,
            ..Default::default()
        }
    }

    fn presents(device: &HeadlessDevice) -> usize {
        device.events().iter().filter(|e| matches!(e, HeadlessEvent::Present { .. })).count()
    }

    #[test]
    fn test_render_frames() {
        let (devices, factory) = recording_factory();
        let mut app = RenderApp::new(settings(), Box::new(DemoApp::default()), factory);
        assert!(app.render_frame().is_err());

        let extent = app.settings().window_extent();
        app.init_after_window(None, extent).unwrap();
        assert!(app.init_after_window(None, extent).is_err());
        for _ in 0..3 {
            assert!(app.render_frame().unwrap());
        }
        assert_eq!(app.pipeline_stats().unwrap().frames, 3);

        let device = devices.lock().unwrap()[0].clone();
        assert_eq!(presents(&device), 3);
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());

        app.destroy().unwrap();
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    fn test_device_lost_recreates_device() {
        let (devices, factory) = recording_factory();
        let mut app = RenderApp::new(settings(), Box::new(DemoApp::default()), factory);
        app.init_after_window(None, GfxExtent2D::new(64, 48)).unwrap();
        assert!(app.render_frame().unwrap());
        assert!(!app.toggle_vsync().unwrap());

        let lost = devices.lock().unwrap()[0].clone();
        lost.simulate_device_lost();
        assert!(!app.render_frame().unwrap());
        assert_eq!(app.device_lost_count(), 1);
        assert_eq!(devices.lock().unwrap().len(), 2);
        assert_eq!(lost.live_resource_count(), 0);

        // 新设备上继续渲染，运行时的 vsync 设置被保留
        assert!(app.render_frame().unwrap());
        assert!(app.render_frame().unwrap());
        assert_eq!(app.present_mode().map(|mode| mode.vsync), Some(false));
        assert_eq!(app.pipeline_stats().unwrap().frames, 2);

        let fresh = devices.lock().unwrap()[1].clone();
        assert_eq!(presents(&fresh), 2);
        assert!(fresh.validation_errors().is_empty(), "{:?}", fresh.validation_errors());

        app.destroy().unwrap();
        assert_eq!(fresh.live_resource_count(), 0);
    }

    #[test]
    fn test_failed_recreation_is_returned() {
        let created = Arc::new(Mutex::new(Vec::<Arc<HeadlessDevice>>::new()));
        let recorded = created.clone();
        let factory: DeviceFactory = Box::new(move |_desc| {
            let mut created = recorded.lock().unwrap();
            if !created.is_empty() {
                return Err(GfxError::device_creation("no adapter left"));
            }
            let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
            created.push(device.clone());
            let device: Arc<dyn GfxDevice> = device;
            Ok(device)
        });
        let mut app = RenderApp::new(settings(), Box::new(DemoApp::default()), factory);
        app.init_after_window(None, GfxExtent2D::new(32, 32)).unwrap();

        created.lock().unwrap()[0].simulate_device_lost();
        let err = app.render_frame().unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::DeviceCreation);
        assert!(err.is_fatal());
        assert!(!app.is_initialized());
        app.destroy().unwrap();
    }

    #[test]
    fn test_minimize_and_restore() {
        let (devices, factory) = recording_factory();
        let mut app = RenderApp::new(settings(), Box::new(DemoApp::default()), factory);
        app.init_after_window(None, GfxExtent2D::new(64, 48)).unwrap();

        app.resize(GfxExtent2D::new(0, 0)).unwrap();
        assert!(!app.render_frame().unwrap());
        app.resize(GfxExtent2D::new(32, 16)).unwrap();
        assert!(app.render_frame().unwrap());
        assert_eq!(app.extent(), GfxExtent2D::new(32, 16));

        let device = devices.lock().unwrap()[0].clone();
        assert_eq!(presents(&device), 1);
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());
        app.reload_pipelines().unwrap();
        app.destroy().unwrap();
    }
}
