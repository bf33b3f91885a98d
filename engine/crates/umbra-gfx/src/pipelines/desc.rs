use crate::{basic::format::GfxFormat, commands::command::GfxTopology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GfxCompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GfxFrontFace {
    #[default]
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GfxCullMode {
    None,
    Front,
    #[default]
    Back,
}

/// 图形管线描述
///
/// 顶点数据通过 bindless 索引在 shader 中读取，因此没有 vertex input 布局。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GfxGraphicsPipelineDesc {
    pub name: String,
    /// 着色器在 [`ShaderLibrary`](crate::pipelines::shader_library::ShaderLibrary) 中的名字
    pub vs: String,
    pub ps: String,

    pub rtv_formats: Vec<GfxFormat>,
    pub depth_format: Option<GfxFormat>,
    pub depth_compare: GfxCompareOp,
    pub depth_write: bool,

    pub front_face: GfxFrontFace,
    pub cull_mode: GfxCullMode,
    /// 开启后为 src_alpha / one_minus_src_alpha 的混合
    pub blend: bool,
    pub topology: GfxTopology,
}

impl GfxGraphicsPipelineDesc {
    /// 不透明、背面剔除、深度测试 Less 的默认管线
    pub fn new(name: impl Into<String>, vs: impl Into<String>, ps: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vs: vs.into(),
            ps: ps.into(),
            rtv_formats: vec![],
            depth_format: None,
            depth_compare: GfxCompareOp::Less,
            depth_write: true,
            front_face: GfxFrontFace::Clockwise,
            cull_mode: GfxCullMode::Back,
            blend: false,
            topology: GfxTopology::TriangleList,
        }
    }

    pub fn with_rtv_formats(mut self, formats: &[GfxFormat]) -> Self {
        self.rtv_formats = formats.to_vec();
        self
    }

    pub fn with_depth(mut self, format: GfxFormat, compare: GfxCompareOp, write: bool) -> Self {
        self.depth_format = Some(format);
        self.depth_compare = compare;
        self.depth_write = write;
        self
    }

    pub fn with_raster(mut self, front_face: GfxFrontFace, cull_mode: GfxCullMode) -> Self {
        self.front_face = front_face;
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_blend(mut self, blend: bool) -> Self {
        self.blend = blend;
        self
    }

    /// 全屏三角形：不剔除、不测试深度
    pub fn fullscreen(name: impl Into<String>, ps: impl Into<String>, rtv_format: GfxFormat) -> Self {
        Self::new(name, "fullscreen_triangle.vs", ps)
            .with_rtv_formats(&[rtv_format])
            .with_raster(GfxFrontFace::Clockwise, GfxCullMode::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GfxComputePipelineDesc {
    pub name: String,
    pub cs: String,
}

impl GfxComputePipelineDesc {
    pub fn new(name: impl Into<String>, cs: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cs: cs.into(),
        }
    }
}
