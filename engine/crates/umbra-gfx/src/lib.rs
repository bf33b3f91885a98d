//! Umbra 的 GFX 层
//!
//! 上层只依赖 [`device::GfxDevice`] 这个后端 trait，以及建立在其上的 fence、command queue、
//! command list 池和 graphics context。具体的后端有两个：
//! - `backend::vulkan`：ash + vk-mem，timeline semaphore 充当 fence
//! - `backend::headless`：纯 CPU 模拟的 GPU，用于测试和无窗口运行

pub mod backend;
pub mod basic;
pub mod commands;
pub mod device;
pub mod error;
pub mod pipelines;
pub mod resources;
pub mod swapchain;
