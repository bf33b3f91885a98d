use std::path::{Path, PathBuf};

use umbra_crate_tools::resource::{UmbraPath, load_toml_or_default};
use umbra_gfx::{basic::extent::GfxExtent2D, device::GfxBackendKind};
use umbra_render_interface::render_settings::RenderSettings;

pub const DEFAULT_CONFIG_FILE: &str = "umbra.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppBackend {
    #[default]
    Vulkan,
    Headless,
}

impl From<AppBackend> for GfxBackendKind {
    fn from(backend: AppBackend) -> Self {
        match backend {
            AppBackend::Vulkan => GfxBackendKind::Vulkan,
            AppBackend::Headless => GfxBackendKind::Headless,
        }
    }
}

/// `umbra.toml` 的全部内容
///
/// ```toml
/// backend = "headless"
/// headless_frames = 120
/// log_level = "debug"
///
/// [render]
/// frames_in_flight = 2
/// vsync = false
/// ```
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub backend: AppBackend,

    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,

    /// headless 后端渲染多少帧后退出
    pub headless_frames: u64,
    pub log_level: String,

    pub render: RenderSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            backend: AppBackend::default(),
            window_title: "Umbra".to_string(),
            window_width: 1280,
            window_height: 720,
            headless_frames: 60,
            log_level: "info".to_string(),
            render: RenderSettings::default(),
        }
    }
}

// new & init
impl AppSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        load_toml_or_default(path)
    }

    /// 第一个命令行参数作为配置文件路径，缺省时使用工作区根目录下的 `umbra.toml`
    pub fn load_from_args() -> anyhow::Result<Self> {
        let path = Self::config_path(std::env::args().nth(1));
        Self::load(&path)
    }

    fn config_path(arg: Option<String>) -> PathBuf {
        arg.map(PathBuf::from).unwrap_or_else(|| UmbraPath::config_path(DEFAULT_CONFIG_FILE))
    }
}

// getters
impl AppSettings {
    #[inline]
    pub fn window_extent(&self) -> GfxExtent2D {
        GfxExtent2D::new(self.window_width, self.window_height)
    }

    #[inline]
    pub fn log_level(&self) -> log::LevelFilter {
        umbra_crate_tools::init_log::parse_level(&self.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let text = r#"
backend = "headless"
window_title = "test"
headless_frames = 5
log_level = "debug"

[render]
frames_in_flight = 2
vsync = false
"#;
        let settings: AppSettings = toml::from_str(text).unwrap();
        assert_eq!(settings.backend, AppBackend::Headless);
        assert_eq!(GfxBackendKind::from(settings.backend), GfxBackendKind::Headless);
        assert_eq!(settings.window_title, "test");
        assert_eq!(settings.window_extent(), GfxExtent2D::new(1280, 720));
        assert_eq!(settings.headless_frames, 5);
        assert_eq!(settings.log_level(), log::LevelFilter::Debug);
        assert_eq!(settings.render.frames_in_flight, 2);
        assert!(!settings.render.vsync);
        assert_eq!(settings.render.shadow_map_size, RenderSettings::default().shadow_map_size);
    }

    #[test]
    fn test_unknown_backend_is_error() {
        assert!(toml::from_str::<AppSettings>("backend = \"d3d12\"\n").is_err());
    }

    #[test]
    fn test_config_path_from_arg() {
        assert_eq!(AppSettings::config_path(Some("custom.toml".to_string())), PathBuf::from("custom.toml"));
        assert!(AppSettings::config_path(None).ends_with(DEFAULT_CONFIG_FILE));
    }
}
