use umbra_app::{
    app_settings::{AppBackend, AppSettings},
    demo_scene::DemoApp,
    fatal,
    render_app::{RenderApp, run_headless},
};
use umbra_winit_app::app::WinitApp;

fn main() {
    let settings = match AppSettings::load_from_args() {
        Ok(settings) => settings,
        Err(err) => {
            RenderApp::init_env(log::LevelFilter::Info);
            fatal::terminate(err)
        }
    };
    RenderApp::init_env(settings.log_level());

    let outer_app = Box::new(DemoApp::default());
    match settings.backend {
        AppBackend::Headless => run_headless(settings, outer_app),
        AppBackend::Vulkan => WinitApp::run(settings, outer_app),
    }
    log::info!("end run.");
}
