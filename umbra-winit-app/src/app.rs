use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use umbra_app::{
    app_settings::AppSettings,
    fatal,
    outer_app::OuterApp,
    render_app::RenderApp,
};
use umbra_gfx::{basic::extent::GfxExtent2D, swapchain::GfxWindowHandles};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

pub struct WinitApp {
    render_app: RenderApp,

    window: Option<Window>,
}
// 总的 main 函数
impl WinitApp {
    /// 整个程序的入口，调用前需要先执行 [`RenderApp::init_env`]
    pub fn run(settings: AppSettings, outer_app: Box<dyn OuterApp>) {
        let event_loop = match EventLoop::new() {
            Ok(event_loop) => event_loop,
            Err(err) => fatal::terminate(anyhow::anyhow!("failed to create the event loop: {}", err)),
        };

        let factory = RenderApp::backend_factory(settings.backend.into());
        let mut app = Self {
            render_app: RenderApp::new(settings, outer_app, factory),
            window: None,
        };

        if let Err(err) = event_loop.run_app(&mut app) {
            log::error!("event loop stopped with error: {}", err);
        }

        log::info!("end run.");

        app.destroy();
    }
}
// new & init
impl WinitApp {
    /// 在 window 创建之后调用，初始化设备、场景与帧管线
    fn init_after_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let settings = self.render_app.settings();
        let window_attr = Window::default_attributes()
            .with_title(settings.window_title.clone())
            .with_inner_size(winit::dpi::LogicalSize::new(settings.window_width, settings.window_height));
        let window = event_loop.create_window(window_attr)?;

        let handles = GfxWindowHandles {
            display: window.display_handle()?.as_raw(),
            window: window.window_handle()?.as_raw(),
        };
        let size = window.inner_size();
        self.render_app.init_after_window(Some(handles), GfxExtent2D::new(size.width, size.height))?;

        self.window = Some(window);
        Ok(())
    }
}
// destroy
impl WinitApp {
    fn destroy(self) {
        let Self { render_app, window } = self;
        // surface 需要在 window 之前销毁
        if let Err(err) = render_app.destroy() {
            log::error!("failed to release the renderer: {}", err);
        }
        drop(window);
    }
}
// 按键
impl WinitApp {
    fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        let result = match event.physical_key {
            PhysicalKey::Code(KeyCode::KeyV) => self.render_app.toggle_vsync().map(|_| ()),
            PhysicalKey::Code(KeyCode::KeyR) => self.render_app.reload_pipelines(),
            PhysicalKey::Code(KeyCode::Escape) => {
                event_loop.exit();
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            fatal::terminate(err);
        }
    }
}
// 各种 winit 的事件处理
impl ApplicationHandler for WinitApp {
    // 建议在这里创建 window 和 Renderer
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        log::info!("winit event: resumed");

        if let Err(err) = self.init_after_window(event_loop) {
            fatal::terminate(err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = self.render_app.resize(GfxExtent2D::new(size.width, size.height)) {
                    fatal::terminate(err);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                self.handle_key(event_loop, &event);
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.render_app.render_frame() {
                    fatal::terminate(err);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
    }

    fn memory_warning(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("memory warning");
    }
}
