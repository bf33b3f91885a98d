//! 录制到 command list 中的命令流
//!
//! 上层通过 [`GfxGraphicsContext`](crate::commands::graphics_context::GfxGraphicsContext) 在 CPU 侧攒命令，
//! close 时整体交给后端翻译成具体 API 的调用。

use crate::{
    basic::{extent::GfxExtent2D, viewport::GfxViewport},
    commands::barrier::GfxBarrier,
    device::{GfxPipelineHandle, GfxResourceHandle},
};

/// root constants 的最大长度（u32 个数），对应 128 字节的 push constants
pub const GFX_MAX_ROOT_CONSTANTS: usize = 32;

/// 非法的描述符索引，shader 中据此判断槽位为空
pub const GFX_INVALID_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    Depth(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GfxLoadOp {
    Load,
    Clear(GfxClearValue),
    DontCare,
}

/// 以 RTV 表中的索引引用的颜色 attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GfxColorAttachment {
    pub rtv: u32,
    pub load_op: GfxLoadOp,
}

/// 以 DSV 表中的索引引用的深度 attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GfxDepthAttachment {
    pub dsv: u32,
    pub load_op: GfxLoadOp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GfxRenderingDesc {
    pub colors: Vec<GfxColorAttachment>,
    pub depth: Option<GfxDepthAttachment>,
    pub extent: GfxExtent2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GfxTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GfxCommand {
    BeginLabel(String),
    EndLabel,
    Barriers(Vec<GfxBarrier>),
    BeginRendering(GfxRenderingDesc),
    EndRendering,
    /// 同时设置 viewport 和 scissor
    SetViewport(GfxViewport),
    SetTopology(GfxTopology),
    SetPipeline(GfxPipelineHandle),
    SetRootConstants(Vec<u32>),
    /// index 固定为 u32
    SetIndexBuffer {
        buffer: GfxResourceHandle,
        offset: u64,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// 整个资源的拷贝，两者的形状必须一致
    CopyResource {
        src: GfxResourceHandle,
        dst: GfxResourceHandle,
    },
    CopyBufferRegion {
        src: GfxResourceHandle,
        src_offset: u64,
        dst: GfxResourceHandle,
        dst_offset: u64,
        size: u64,
    },
    /// 从紧密排列的 buffer 拷贝到 texture 的第 0 个 mip
    CopyBufferToTexture {
        src: GfxResourceHandle,
        src_offset: u64,
        dst: GfxResourceHandle,
    },
}

impl GfxCommand {
    /// 命令直接引用的资源句柄（不包含通过描述符间接引用的 attachment）
    pub fn direct_resources(&self) -> Vec<GfxResourceHandle> {
        match self {
            Self::Barriers(barriers) => barriers.iter().map(|b| b.resource).collect(),
            Self::SetIndexBuffer { buffer, .. } => vec![*buffer],
            Self::CopyResource { src, dst }
            | Self::CopyBufferRegion { src, dst, .. }
            | Self::CopyBufferToTexture { src, dst, .. } => vec![*src, *dst],
            _ => vec![],
        }
    }
}
