//! 应用层：生命周期 trait、驱动循环、配置与致命错误出口
//!
//! 窗口系统不在这里，由 `umbra-winit-app` 负责把窗口事件转发给 [`render_app::RenderApp`]。

pub mod app_settings;
pub mod demo_scene;
pub mod fatal;
pub mod outer_app;
pub mod render_app;
