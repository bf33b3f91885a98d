use std::path::PathBuf;

use umbra_crate_tools::resource::UmbraPath;
use umbra_gfx::{device::GfxDescriptorCapacity, swapchain::GfxPresentMode};

use crate::frame_counter::FrameCounter;

/// 渲染相关的配置，对应 `umbra.toml` 中的 `[render]` 表
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// 同时在 GPU 上执行的最大帧数
    pub frames_in_flight: usize,
    pub vsync: bool,
    pub allow_tearing: bool,

    pub cbv_srv_uav_capacity: u32,
    pub rtv_capacity: u32,
    pub dsv_capacity: u32,

    pub shadow_map_size: u32,
    pub exposure: f32,
    pub clear_color: [f32; 4],

    /// 编译后的 SPIR-V 所在目录；为空时使用 `assets/shaders`
    pub shader_dir: Option<PathBuf>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        let capacity = GfxDescriptorCapacity::default();
        Self {
            frames_in_flight: 3,
            vsync: true,
            allow_tearing: false,
            cbv_srv_uav_capacity: capacity.cbv_srv_uav,
            rtv_capacity: capacity.rtv,
            dsv_capacity: capacity.dsv,
            shadow_map_size: 2048,
            exposure: 1.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shader_dir: None,
        }
    }
}

// getters
impl RenderSettings {
    #[inline]
    pub fn descriptor_capacity(&self) -> GfxDescriptorCapacity {
        GfxDescriptorCapacity {
            cbv_srv_uav: self.cbv_srv_uav_capacity,
            rtv: self.rtv_capacity,
            dsv: self.dsv_capacity,
        }
    }

    #[inline]
    pub fn present_mode(&self) -> GfxPresentMode {
        GfxPresentMode {
            vsync: self.vsync,
            allow_tearing: self.allow_tearing,
        }
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.frames_in_flight.clamp(1, FrameCounter::MAX_FIF_COUNT)
    }

    pub fn shader_dir(&self) -> PathBuf {
        self.shader_dir.clone().unwrap_or_else(UmbraPath::shader_build_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_keeps_defaults() {
        let settings: RenderSettings = toml::from_str("vsync = false\nframes_in_flight = 2\n").unwrap();
        assert!(!settings.vsync);
        assert_eq!(settings.fif_count(), 2);
        assert_eq!(settings.shadow_map_size, 2048);
        assert_eq!(settings.descriptor_capacity(), GfxDescriptorCapacity::default());
        assert!(!settings.present_mode().vsync);
    }

    #[test]
    fn test_frames_in_flight_is_clamped() {
        let settings = RenderSettings {
            frames_in_flight: 16,
            ..Default::default()
        };
        assert_eq!(settings.fif_count(), FrameCounter::MAX_FIF_COUNT);
    }
}
