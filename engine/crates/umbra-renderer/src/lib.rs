//! Umbra 的帧管线
//!
//! 每帧严格按顺序执行：BeginFrame -> Shadow -> Geometry -> Depth copy -> Lighting -> Post process
//! -> Composite (+UI) -> Present。pass 之间唯一的依赖机制是手工排好的 barrier 序列。

pub mod frame_pipeline;
pub mod frame_targets;
pub mod pass;
pub mod passes;
pub mod present;
pub mod scene;
pub mod ui;
