use std::time::Duration;

use umbra_gfx::{basic::extent::GfxExtent2D, error::GfxResult};
use umbra_render_interface::render_context::RenderContext;
use umbra_renderer::{
    scene::SceneView,
    ui::{NoUi, UiOverlay},
};

/// 外部应用接口 trait
///
/// 定义应用生命周期的关键钩子函数。所有自定义应用需实现此 trait。
///
/// 设备丢失后 [`RenderContext`] 会整体重建，`init` 会在新的 context 上再次被调用，
/// 之前返回的场景中的句柄全部失效。
///
/// # 开发模式
/// ```ignore
/// struct MyApp;
///
/// impl OuterApp for MyApp {
///     fn init(&mut self, rc: &mut RenderContext) -> GfxResult<SceneView> {
///         Ok(SceneView::default())
///     }
/// }
///
/// fn main() {
///     WinitApp::run(settings, Box::new(MyApp));
/// }
/// ```
pub trait OuterApp {
    /// 创建场景需要的 GPU 资源
    fn init(&mut self, rc: &mut RenderContext) -> GfxResult<SceneView>;

    /// 每帧更新逻辑（可选）
    fn update(&mut self, _scene: &mut SceneView, _delta: Duration) {}

    /// 叠加在最终画面上的 UI（可选），每次重建帧管线时调用
    fn create_ui(&mut self) -> Box<dyn UiOverlay> {
        Box::new(NoUi)
    }

    /// 窗口大小改变后（可选）
    fn on_window_resized(&mut self, _scene: &mut SceneView, _extent: GfxExtent2D) {}

    /// 设备丢失，旧的 GPU 资源已经全部释放（可选）
    fn on_device_lost(&mut self) {}
}
