pub mod headless;
pub mod vulkan;

use std::sync::Arc;

use crate::{
    device::{GfxBackendKind, GfxDevice, GfxDeviceDesc},
    error::GfxResult,
};

/// 按后端类型创建设备
///
/// headless 后端以 `Immediate` 模式创建，即提交即完成。
pub fn create_device(backend: GfxBackendKind, desc: &GfxDeviceDesc) -> GfxResult<Arc<dyn GfxDevice>> {
    let _span = tracy_client::span!("create_device");
    match backend {
        GfxBackendKind::Vulkan => Ok(Arc::new(vulkan::VulkanDevice::new(desc)?)),
        GfxBackendKind::Headless => {
            Ok(Arc::new(headless::HeadlessDevice::new(desc, headless::HeadlessExecutionMode::Immediate)))
        }
    }
}
