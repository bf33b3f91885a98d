//! 通用类型到 Vulkan 类型的转换

use ash::vk;

use crate::{
    basic::format::GfxFormat,
    commands::{
        barrier::GfxResourceState,
        command::{GfxClearValue, GfxLoadOp, GfxTopology},
    },
    pipelines::desc::{GfxCompareOp, GfxCullMode, GfxFrontFace},
    resources::GfxResourceUsage,
};

/// 某个资源状态对应的 stage、access 与 layout
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct VkResourceState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl VkResourceState {
    const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    const GENERAL: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw()),
        vk::ImageLayout::GENERAL,
    );

    const SHADER_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
            | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
            | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
    );

    const FRAGMENT_TESTS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
    );

    const CONSTANT_READ: Self = Self::new(
        Self::SHADER_STAGES,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::UNIFORM_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    const INDEX_READ: Self =
        Self::new(vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ, vk::ImageLayout::GENERAL);

    const COLOR_ATTACHMENT: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    const STORAGE_READ_WRITE: Self = Self::new(
        Self::SHADER_STAGES,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    const DEPTH_ATTACHMENT_READ_WRITE: Self = Self::new(
        Self::FRAGMENT_TESTS,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    const DEPTH_READ_ONLY: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(Self::FRAGMENT_TESTS.as_raw() | Self::SHADER_STAGES.as_raw()),
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    );

    const SHADER_READ: Self = Self::new(
        Self::SHADER_STAGES,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw(),
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    const HOST_VISIBLE: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::MEMORY_READ,
        vk::ImageLayout::GENERAL,
    );
}

/// 作为 barrier 源状态
///
/// 交换链图像从 Present 出发时内容会被整体覆盖，直接当作 UNDEFINED，
/// 等待 acquire semaphore 的 stage 由提交时的 wait 负责。
pub(super) fn src_state(state: GfxResourceState) -> VkResourceState {
    match state {
        GfxResourceState::Present => VkResourceState::new(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::NONE,
            vk::ImageLayout::UNDEFINED,
        ),
        _ => dst_state(state),
    }
}

/// 作为 barrier 目标状态
pub(super) fn dst_state(state: GfxResourceState) -> VkResourceState {
    match state {
        GfxResourceState::Undefined => VkResourceState::UNDEFINED,
        GfxResourceState::Common => VkResourceState::GENERAL,
        GfxResourceState::ConstantBuffer => VkResourceState::CONSTANT_READ,
        GfxResourceState::IndexBuffer => VkResourceState::INDEX_READ,
        GfxResourceState::RenderTarget => VkResourceState::COLOR_ATTACHMENT,
        GfxResourceState::UnorderedAccess => VkResourceState::STORAGE_READ_WRITE,
        GfxResourceState::DepthWrite => VkResourceState::DEPTH_ATTACHMENT_READ_WRITE,
        GfxResourceState::DepthRead => VkResourceState::DEPTH_READ_ONLY,
        GfxResourceState::ShaderResource => VkResourceState::SHADER_READ,
        GfxResourceState::CopySource => VkResourceState::TRANSFER_SRC,
        GfxResourceState::CopyDest => VkResourceState::TRANSFER_DST,
        GfxResourceState::Present => VkResourceState::PRESENT,
        GfxResourceState::GenericRead => VkResourceState::HOST_VISIBLE,
    }
}

pub(super) fn format(format: GfxFormat) -> vk::Format {
    match format {
        GfxFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        GfxFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        GfxFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        GfxFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        GfxFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        GfxFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        GfxFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        GfxFormat::R32Float => vk::Format::R32_SFLOAT,
        GfxFormat::D32Float => vk::Format::D32_SFLOAT,
        GfxFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub(super) fn aspect(format: GfxFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(super) fn image_usage(usage: GfxResourceUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(GfxResourceUsage::SHADER_RESOURCE) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(GfxResourceUsage::UNORDERED_ACCESS) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(GfxResourceUsage::RENDER_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(GfxResourceUsage::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(GfxResourceUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(GfxResourceUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

/// constant buffer 也以 storage buffer 的形式进入 bindless 表
pub(super) fn buffer_usage(usage: GfxResourceUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.intersects(
        GfxResourceUsage::SHADER_RESOURCE | GfxResourceUsage::UNORDERED_ACCESS | GfxResourceUsage::CONSTANT,
    ) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(GfxResourceUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(GfxResourceUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(GfxResourceUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(super) fn compare_op(op: GfxCompareOp) -> vk::CompareOp {
    match op {
        GfxCompareOp::Never => vk::CompareOp::NEVER,
        GfxCompareOp::Less => vk::CompareOp::LESS,
        GfxCompareOp::Equal => vk::CompareOp::EQUAL,
        GfxCompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        GfxCompareOp::Greater => vk::CompareOp::GREATER,
        GfxCompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        GfxCompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        GfxCompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub(super) fn front_face(face: GfxFrontFace) -> vk::FrontFace {
    match face {
        GfxFrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        GfxFrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub(super) fn cull_mode(mode: GfxCullMode) -> vk::CullModeFlags {
    match mode {
        GfxCullMode::None => vk::CullModeFlags::NONE,
        GfxCullMode::Front => vk::CullModeFlags::FRONT,
        GfxCullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(super) fn topology(topology: GfxTopology) -> vk::PrimitiveTopology {
    match topology {
        GfxTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        GfxTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        GfxTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        GfxTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub(super) fn load_op(op: GfxLoadOp) -> (vk::AttachmentLoadOp, vk::ClearValue) {
    match op {
        GfxLoadOp::Load => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
        GfxLoadOp::DontCare => (vk::AttachmentLoadOp::DONT_CARE, vk::ClearValue::default()),
        GfxLoadOp::Clear(GfxClearValue::Color(color)) => (
            vk::AttachmentLoadOp::CLEAR,
            vk::ClearValue {
                color: vk::ClearColorValue { float32: color },
            },
        ),
        GfxLoadOp::Clear(GfxClearValue::Depth(depth)) => (
            vk::AttachmentLoadOp::CLEAR,
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_source_discards_contents() {
        assert_eq!(src_state(GfxResourceState::Present).layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(dst_state(GfxResourceState::Present).layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_depth_states() {
        assert_eq!(dst_state(GfxResourceState::DepthWrite).layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(aspect(GfxFormat::D32Float), vk::ImageAspectFlags::DEPTH);
        assert_eq!(format(GfxFormat::Rgba16Float), vk::Format::R16G16B16A16_SFLOAT);
    }
}
