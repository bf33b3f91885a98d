use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::basic::{extent::GfxExtent2D, format::GfxFormat};

/// 呈现模式
///
/// - `vsync`：等待垂直同步
/// - `allow_tearing`：关闭 vsync 时是否允许撕裂（否则退化为 mailbox）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GfxPresentMode {
    pub vsync: bool,
    pub allow_tearing: bool,
}

impl Default for GfxPresentMode {
    fn default() -> Self {
        Self {
            vsync: true,
            allow_tearing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxWindowHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

#[derive(Debug, Clone)]
pub struct GfxSwapchainDesc {
    /// headless 后端不需要窗口
    pub window: Option<GfxWindowHandles>,
    pub extent: GfxExtent2D,
    pub format: GfxFormat,
    pub image_count: u32,
    pub present_mode: GfxPresentMode,
}

impl GfxSwapchainDesc {
    pub fn new(window: Option<GfxWindowHandles>, extent: GfxExtent2D, present_mode: GfxPresentMode) -> Self {
        Self {
            window,
            extent,
            format: GfxFormat::Bgra8Unorm,
            image_count: 3,
            present_mode,
        }
    }
}
