//! 后端 trait
//!
//! 所有后端对象都以 slotmap key 的形式暴露给上层，具体的 API 对象只存在于后端内部。
//! trait 是 object safe 的，上层统一持有 `Arc<dyn GfxDevice>`。

use std::time::Duration;

use raw_window_handle::RawDisplayHandle;

use crate::{
    basic::extent::GfxExtent2D,
    commands::command::GfxCommand,
    error::GfxResult,
    pipelines::desc::{GfxComputePipelineDesc, GfxGraphicsPipelineDesc},
    resources::{GfxDescriptorHeapKind, GfxResourceDesc, GfxViewDesc},
    swapchain::{GfxPresentMode, GfxSwapchainDesc},
};

slotmap::new_key_type! {
    pub struct GfxFenceHandle;
    pub struct GfxCommandAllocatorHandle;
    pub struct GfxCommandListHandle;
    pub struct GfxResourceHandle;
    pub struct GfxPipelineHandle;
    pub struct GfxSwapchainHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxQueueType {
    Graphics,
    Compute,
    Copy,
}

impl GfxQueueType {
    pub const ALL: [Self; 3] = [Self::Graphics, Self::Compute, Self::Copy];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Copy => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxBackendKind {
    Vulkan,
    Headless,
}

/// 各个描述符表的容量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxDescriptorCapacity {
    pub cbv_srv_uav: u32,
    pub rtv: u32,
    pub dsv: u32,
}

impl Default for GfxDescriptorCapacity {
    fn default() -> Self {
        Self {
            cbv_srv_uav: 4096,
            rtv: 64,
            dsv: 16,
        }
    }
}

impl GfxDescriptorCapacity {
    #[inline]
    pub fn of(&self, heap: GfxDescriptorHeapKind) -> u32 {
        match heap {
            GfxDescriptorHeapKind::CbvSrvUav => self.cbv_srv_uav,
            GfxDescriptorHeapKind::Rtv => self.rtv,
            GfxDescriptorHeapKind::Dsv => self.dsv,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GfxDeviceDesc {
    pub app_name: String,
    pub enable_validation: bool,
    pub descriptor_capacity: GfxDescriptorCapacity,
    /// 需要呈现到窗口时必须提供，用于开启对应的 surface 扩展
    pub display_handle: Option<RawDisplayHandle>,
}

impl Default for GfxDeviceDesc {
    fn default() -> Self {
        Self {
            app_name: "umbra".to_string(),
            enable_validation: cfg!(debug_assertions),
            descriptor_capacity: GfxDescriptorCapacity::default(),
            display_handle: None,
        }
    }
}

pub trait GfxDevice: Send + Sync {
    fn backend(&self) -> GfxBackendKind;
    fn adapter_name(&self) -> String;
    fn descriptor_capacity(&self) -> GfxDescriptorCapacity;

    // fence
    fn create_fence(&self, name: &str) -> GfxResult<GfxFenceHandle>;
    fn destroy_fence(&self, fence: GfxFenceHandle);
    /// GPU 已经写入 fence 的值
    fn fence_completed_value(&self, fence: GfxFenceHandle) -> GfxResult<u64>;
    /// 阻塞直到 fence 达到 `value`；`timeout` 为 `None` 时无限等待
    ///
    /// 返回 `false` 表示超时
    fn wait_fence(&self, fence: GfxFenceHandle, value: u64, timeout: Option<Duration>) -> GfxResult<bool>;

    // queue
    fn queue_submit(&self, queue: GfxQueueType, lists: &[GfxCommandListHandle]) -> GfxResult<()>;
    /// 队列中之前提交的工作全部完成后，GPU 将 `value` 写入 fence
    fn queue_signal(&self, queue: GfxQueueType, fence: GfxFenceHandle, value: u64) -> GfxResult<()>;
    /// 队列中之后提交的工作需要等待 fence 达到 `value`
    fn queue_wait(&self, queue: GfxQueueType, fence: GfxFenceHandle, value: u64) -> GfxResult<()>;
    fn wait_idle(&self) -> GfxResult<()>;

    // command allocator & list
    fn create_command_allocator(&self, queue: GfxQueueType, name: &str) -> GfxResult<GfxCommandAllocatorHandle>;
    /// 调用方保证 allocator 上的所有 command list 都已经执行完毕
    fn reset_command_allocator(&self, allocator: GfxCommandAllocatorHandle) -> GfxResult<()>;
    fn destroy_command_allocator(&self, allocator: GfxCommandAllocatorHandle);
    fn create_command_list(&self, queue: GfxQueueType, name: &str) -> GfxResult<GfxCommandListHandle>;
    /// 将命令流录制到 list 中，内存来自 `allocator`；录制完成后 list 即处于 closed 状态
    fn record_command_list(
        &self,
        list: GfxCommandListHandle,
        allocator: GfxCommandAllocatorHandle,
        commands: &[GfxCommand],
    ) -> GfxResult<()>;
    fn destroy_command_list(&self, list: GfxCommandListHandle);

    // resource
    fn create_resource(&self, desc: &GfxResourceDesc) -> GfxResult<GfxResourceHandle>;
    fn destroy_resource(&self, resource: GfxResourceHandle);
    /// 只对 `UPLOAD` 资源有效
    fn write_resource(&self, resource: GfxResourceHandle, offset: u64, data: &[u8]) -> GfxResult<()>;
    /// 当前存活的 GPU 资源数量，包括交换链的 back buffer
    fn live_resource_count(&self) -> usize;

    // descriptor
    fn write_descriptor(
        &self,
        heap: GfxDescriptorHeapKind,
        index: u32,
        resource: GfxResourceHandle,
        view: GfxViewDesc,
    ) -> GfxResult<()>;
    fn clear_descriptor(&self, heap: GfxDescriptorHeapKind, index: u32);

    // pipeline
    fn create_graphics_pipeline(
        &self,
        desc: &GfxGraphicsPipelineDesc,
        vs: &[u8],
        ps: &[u8],
    ) -> GfxResult<GfxPipelineHandle>;
    fn create_compute_pipeline(&self, desc: &GfxComputePipelineDesc, cs: &[u8]) -> GfxResult<GfxPipelineHandle>;
    fn destroy_pipeline(&self, pipeline: GfxPipelineHandle);

    // swapchain
    /// 返回交换链以及每个 back buffer 对应的资源句柄
    fn create_swapchain(&self, desc: &GfxSwapchainDesc)
    -> GfxResult<(GfxSwapchainHandle, Vec<GfxResourceHandle>)>;
    /// 以新的尺寸与呈现模式重建；旧的 back buffer 句柄全部失效
    fn recreate_swapchain(
        &self,
        swapchain: GfxSwapchainHandle,
        extent: GfxExtent2D,
        present_mode: GfxPresentMode,
    ) -> GfxResult<Vec<GfxResourceHandle>>;
    fn destroy_swapchain(&self, swapchain: GfxSwapchainHandle);
    /// 返回 back buffer 的序号
    fn acquire_next_back_buffer(&self, swapchain: GfxSwapchainHandle) -> GfxResult<u32>;
    /// 在 `queue` 上呈现最近一次 acquire 的 back buffer
    fn present(&self, swapchain: GfxSwapchainHandle, queue: GfxQueueType) -> GfxResult<()>;
}
