/// 引擎使用到的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Float,
    D32Float,
    D24UnormS8Uint,
}

impl GfxFormat {
    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8Uint)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint)
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8Srgb | Self::Bgra8Unorm | Self::Bgra8Srgb => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::Rg16Float | Self::R32Float => 4,
            Self::D32Float | Self::D24UnormS8Uint => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(GfxFormat::D32Float.is_depth());
        assert!(!GfxFormat::D32Float.has_stencil());
        assert!(GfxFormat::D24UnormS8Uint.has_stencil());
        assert!(!GfxFormat::Rgba16Float.is_depth());
        assert_eq!(GfxFormat::Rgba16Float.bytes_per_pixel(), 8);
    }
}
