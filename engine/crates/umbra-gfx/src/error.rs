use std::panic::Location;

/// GFX 层的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxErrorKind {
    /// 创建 instance / device / queue 等设备级对象失败
    DeviceCreation,
    /// 创建 buffer / image / view 等资源失败
    ResourceCreation,
    /// 着色器二进制找不到
    ShaderNotFound,
    /// bindless 描述符表耗尽
    OutOfDescriptors,
    /// 设备丢失，可以通过重建整个设备恢复
    DeviceLost,
    /// 提交、signal、wait 等队列操作失败
    Submission,
    /// 交换链过期，需要重建
    SwapchainOutOfDate,
    /// 使用了已经销毁或不属于当前设备的句柄
    InvalidHandle,
    /// 调用方违反了 API 约定
    InvalidUsage,
}

/// 携带出错位置的错误
///
/// 位置通过 `#[track_caller]` 捕获，指向构造错误的调用点。
#[derive(Debug, Clone)]
pub struct GfxError {
    kind: GfxErrorKind,
    message: String,
    location: &'static Location<'static>,
}

pub type GfxResult<T> = Result<T, GfxError>;

// new & init
impl GfxError {
    #[track_caller]
    pub fn new(kind: GfxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn device_creation(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::DeviceCreation, message)
    }

    #[track_caller]
    pub fn resource_creation(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::ResourceCreation, message)
    }

    #[track_caller]
    pub fn shader_not_found(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::ShaderNotFound, message)
    }

    #[track_caller]
    pub fn out_of_descriptors(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::OutOfDescriptors, message)
    }

    #[track_caller]
    pub fn device_lost(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::DeviceLost, message)
    }

    #[track_caller]
    pub fn submission(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::Submission, message)
    }

    #[track_caller]
    pub fn swapchain_out_of_date(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::SwapchainOutOfDate, message)
    }

    #[track_caller]
    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::InvalidHandle, message)
    }

    #[track_caller]
    pub fn invalid_usage(message: impl Into<String>) -> Self {
        Self::new(GfxErrorKind::InvalidUsage, message)
    }
}

// getters
impl GfxError {
    #[inline]
    pub fn kind(&self) -> GfxErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// 除了设备丢失和交换链过期，其余错误都只能终止进程
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind, GfxErrorKind::DeviceLost | GfxErrorKind::SwapchainOutOfDate)
    }
}

impl std::fmt::Display for GfxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {} ({}:{})", self.kind, self.message, self.location.file(), self.location.line())
    }
}

impl std::error::Error for GfxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_points_at_caller() {
        let line = line!() + 1;
        let err = GfxError::out_of_descriptors("cbv/srv/uav heap is full");
        assert_eq!(err.kind(), GfxErrorKind::OutOfDescriptors);
        assert_eq!(err.location().line(), line);
        assert!(err.location().file().ends_with("error.rs"));
        assert!(err.to_string().contains("cbv/srv/uav heap is full"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GfxError::shader_not_found("lighting.vs").is_fatal());
        assert!(GfxError::device_creation("no adapter").is_fatal());
        assert!(!GfxError::device_lost("removed").is_fatal());
        assert!(!GfxError::swapchain_out_of_date("resized").is_fatal());
    }
}
