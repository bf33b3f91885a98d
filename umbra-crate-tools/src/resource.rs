use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let config = UmbraPath::config_path("umbra.toml");      // umbra.toml
/// let shader = UmbraPath::shader_build_path("lighting");  // assets/shaders/lighting.spv
/// ```
pub struct UmbraPath {}
// 核心路径
impl UmbraPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }
}
// 根目录下
impl UmbraPath {
    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("assets").join(filename)
    }

    /// 编译后的 SPIR-V 所在目录
    pub fn shader_build_dir() -> PathBuf {
        Self::workspace_path().join("assets").join("shaders")
    }

    /// 获取 `assets/shaders/` 目录下的着色器路径（编译后的 SPIR-V）
    pub fn shader_build_path(name: &str) -> PathBuf {
        Self::shader_build_dir().join(format!("{name}.spv"))
    }

    /// 工作区根目录下的配置文件
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join(filename)
    }
}

/// 读取 TOML 配置
///
/// 文件不存在时返回 `T::default()`；文件存在但解析失败时返回错误。
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    if !path.exists() {
        log::info!("config file {} not found, using defaults", path.display());
        return Ok(T::default());
    }

    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value = toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    log::info!("loaded config from {}", path.display());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize, Default, Debug, PartialEq)]
    #[serde(default)]
    struct Sample {
        frames: u32,
        name: String,
    }

    #[test]
    fn test_missing_file_yields_default() {
        let path = std::env::temp_dir().join("umbra-crate-tools-missing-config.toml");
        let _ = std::fs::remove_file(&path);
        let value: Sample = load_toml_or_default(&path).unwrap();
        assert_eq!(value, Sample::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = std::env::temp_dir().join(format!("umbra-crate-tools-partial-{}.toml", std::process::id()));
        std::fs::write(&path, "frames = 7\n").unwrap();
        let value: Sample = load_toml_or_default(&path).unwrap();
        assert_eq!(value.frames, 7);
        assert_eq!(value.name, "");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_invalid_file_is_error() {
        let path = std::env::temp_dir().join(format!("umbra-crate-tools-invalid-{}.toml", std::process::id()));
        std::fs::write(&path, "frames = \"seven\"\n").unwrap();
        assert!(load_toml_or_default::<Sample>(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_shader_build_path() {
        let path = UmbraPath::shader_build_path("lighting");
        assert!(path.ends_with("assets/shaders/lighting.spv"));
    }
}
