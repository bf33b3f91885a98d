//! 资源描述
//!
//! GFX 层只关心资源的形状和用途；状态跟踪、描述符索引等由上层负责。

use bitflags::bitflags;

use crate::basic::{extent::GfxExtent2D, format::GfxFormat};

bitflags! {
    /// 资源在整个生命周期内可能出现的用途
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GfxResourceUsage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const UNORDERED_ACCESS = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const CONSTANT = 1 << 4;
        const INDEX = 1 << 5;
        const COPY_SRC = 1 << 6;
        const COPY_DST = 1 << 7;
        /// CPU 可写（upload heap）
        const UPLOAD = 1 << 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxResourceShape {
    Buffer {
        size: u64,
    },
    Texture2D {
        extent: GfxExtent2D,
        format: GfxFormat,
        mip_levels: u32,
        array_layers: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfxResourceDesc {
    pub shape: GfxResourceShape,
    pub usage: GfxResourceUsage,
    pub name: String,
}

// new & init
impl GfxResourceDesc {
    pub fn buffer(size: u64, usage: GfxResourceUsage, name: impl Into<String>) -> Self {
        Self {
            shape: GfxResourceShape::Buffer { size },
            usage,
            name: name.into(),
        }
    }

    pub fn texture_2d(
        extent: GfxExtent2D,
        format: GfxFormat,
        usage: GfxResourceUsage,
        name: impl Into<String>,
    ) -> Self {
        Self {
            shape: GfxResourceShape::Texture2D {
                extent,
                format,
                mip_levels: 1,
                array_layers: 1,
            },
            usage,
            name: name.into(),
        }
    }
}

// getters
impl GfxResourceDesc {
    #[inline]
    pub fn is_buffer(&self) -> bool {
        matches!(self.shape, GfxResourceShape::Buffer { .. })
    }

    #[inline]
    pub fn buffer_size(&self) -> Option<u64> {
        match self.shape {
            GfxResourceShape::Buffer { size } => Some(size),
            GfxResourceShape::Texture2D { .. } => None,
        }
    }

    #[inline]
    pub fn extent(&self) -> Option<GfxExtent2D> {
        match self.shape {
            GfxResourceShape::Buffer { .. } => None,
            GfxResourceShape::Texture2D { extent, .. } => Some(extent),
        }
    }

    #[inline]
    pub fn format(&self) -> Option<GfxFormat> {
        match self.shape {
            GfxResourceShape::Buffer { .. } => None,
            GfxResourceShape::Texture2D { format, .. } => Some(format),
        }
    }

    /// 线性布局下的字节数，用于 staging buffer 的大小
    pub fn byte_size(&self) -> u64 {
        match self.shape {
            GfxResourceShape::Buffer { size } => size,
            GfxResourceShape::Texture2D {
                extent,
                format,
                array_layers,
                ..
            } => extent.pixel_count() * format.bytes_per_pixel() as u64 * array_layers as u64,
        }
    }
}

/// bindless 描述符表的类别
///
/// `CbvSrvUav` 是 shader 可见的大表；`Rtv` 与 `Dsv` 只在绑定 attachment 时使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxDescriptorHeapKind {
    CbvSrvUav,
    Rtv,
    Dsv,
}

impl GfxDescriptorHeapKind {
    pub const ALL: [Self; 3] = [Self::CbvSrvUav, Self::Rtv, Self::Dsv];
}

/// 描述符所描述的视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxViewDesc {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

impl GfxViewDesc {
    /// 该视图应该写入哪一个描述符表
    #[inline]
    pub fn heap_kind(self) -> GfxDescriptorHeapKind {
        match self {
            Self::ConstantBuffer | Self::ShaderResource | Self::UnorderedAccess => GfxDescriptorHeapKind::CbvSrvUav,
            Self::RenderTarget => GfxDescriptorHeapKind::Rtv,
            Self::DepthStencil => GfxDescriptorHeapKind::Dsv,
        }
    }

    /// 创建该视图所要求的资源用途
    #[inline]
    pub fn required_usage(self) -> GfxResourceUsage {
        match self {
            Self::ConstantBuffer => GfxResourceUsage::CONSTANT,
            Self::ShaderResource => GfxResourceUsage::SHADER_RESOURCE,
            Self::UnorderedAccess => GfxResourceUsage::UNORDERED_ACCESS,
            Self::RenderTarget => GfxResourceUsage::RENDER_TARGET,
            Self::DepthStencil => GfxResourceUsage::DEPTH_STENCIL,
        }
    }
}
