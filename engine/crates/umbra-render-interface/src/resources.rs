use umbra_gfx::{
    basic::{extent::GfxExtent2D, format::GfxFormat},
    commands::{barrier::GfxResourceState, graphics_context::GfxStateTracked},
    device::GfxResourceHandle,
    resources::{GfxResourceDesc, GfxResourceUsage, GfxViewDesc},
};

use crate::descriptor_allocator::{DescriptorIndex, DescriptorRange, shader_index};

/// 资源在各个描述符表中的槽位
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GfxResourceViews {
    pub cbv: Option<DescriptorRange>,
    pub srv: Option<DescriptorRange>,
    pub uav: Option<DescriptorRange>,
    pub rtv: Option<DescriptorRange>,
    pub dsv: Option<DescriptorRange>,
}

impl GfxResourceViews {
    /// 按资源用途决定需要哪些视图；缓冲区没有 RTV/DSV
    pub fn required(desc: &GfxResourceDesc) -> Vec<GfxViewDesc> {
        let candidates: &[GfxViewDesc] = if desc.is_buffer() {
            &[GfxViewDesc::ConstantBuffer, GfxViewDesc::ShaderResource, GfxViewDesc::UnorderedAccess]
        } else {
            &[
                GfxViewDesc::ShaderResource,
                GfxViewDesc::UnorderedAccess,
                GfxViewDesc::RenderTarget,
                GfxViewDesc::DepthStencil,
            ]
        };
        candidates.iter().copied().filter(|view| desc.usage.contains(view.required_usage())).collect()
    }

    pub fn get(&self, view: GfxViewDesc) -> Option<DescriptorRange> {
        match view {
            GfxViewDesc::ConstantBuffer => self.cbv,
            GfxViewDesc::ShaderResource => self.srv,
            GfxViewDesc::UnorderedAccess => self.uav,
            GfxViewDesc::RenderTarget => self.rtv,
            GfxViewDesc::DepthStencil => self.dsv,
        }
    }

    pub fn set(&mut self, view: GfxViewDesc, range: DescriptorRange) {
        let slot = match view {
            GfxViewDesc::ConstantBuffer => &mut self.cbv,
            GfxViewDesc::ShaderResource => &mut self.srv,
            GfxViewDesc::UnorderedAccess => &mut self.uav,
            GfxViewDesc::RenderTarget => &mut self.rtv,
            GfxViewDesc::DepthStencil => &mut self.dsv,
        };
        *slot = Some(range);
    }

    /// 所有已分配的 (视图, 区间)
    pub fn iter(&self) -> impl Iterator<Item = (GfxViewDesc, DescriptorRange)> + '_ {
        [
            (GfxViewDesc::ConstantBuffer, self.cbv),
            (GfxViewDesc::ShaderResource, self.srv),
            (GfxViewDesc::UnorderedAccess, self.uav),
            (GfxViewDesc::RenderTarget, self.rtv),
            (GfxViewDesc::DepthStencil, self.dsv),
        ]
        .into_iter()
        .filter_map(|(view, range)| range.map(|range| (view, range)))
    }
}

/// GPU buffer，以及它在 bindless 表中的索引
pub struct GfxBuffer {
    pub(crate) resource: GfxResourceHandle,
    pub(crate) desc: GfxResourceDesc,
    pub(crate) state: GfxResourceState,
    pub(crate) views: GfxResourceViews,
}

impl GfxBuffer {
    #[inline]
    pub fn resource(&self) -> GfxResourceHandle {
        self.resource
    }

    #[inline]
    pub fn desc(&self) -> &GfxResourceDesc {
        &self.desc
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.desc.byte_size()
    }

    #[inline]
    pub fn views(&self) -> &GfxResourceViews {
        &self.views
    }

    #[inline]
    pub fn cbv(&self) -> Option<DescriptorIndex> {
        self.views.cbv.map(|r| r.first())
    }

    #[inline]
    pub fn srv(&self) -> Option<DescriptorIndex> {
        self.views.srv.map(|r| r.first())
    }

    #[inline]
    pub fn uav(&self) -> Option<DescriptorIndex> {
        self.views.uav.map(|r| r.first())
    }

    /// shader 读取时使用的索引：优先 SRV，其次 CBV
    #[inline]
    pub fn bindless_index(&self) -> u32 {
        shader_index(self.srv().or(self.cbv()))
    }
}

impl GfxStateTracked for GfxBuffer {
    fn gfx_resource(&self) -> GfxResourceHandle {
        self.resource
    }

    fn current_state(&self) -> GfxResourceState {
        self.state
    }

    fn set_current_state(&mut self, state: GfxResourceState) {
        self.state = state;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GfxTextureKind {
    /// 只读纹理，通常由资产加载创建
    Texture,
    RenderTarget,
    DepthTarget,
    /// 外部拥有内存的纹理，例如交换链的 back buffer
    External,
}

/// GPU 纹理，以及它在各个描述符表中的索引
pub struct GfxTexture {
    pub(crate) resource: GfxResourceHandle,
    pub(crate) desc: GfxResourceDesc,
    pub(crate) state: GfxResourceState,
    pub(crate) views: GfxResourceViews,
    pub(crate) kind: GfxTextureKind,
}

// getters
impl GfxTexture {
    #[inline]
    pub fn resource(&self) -> GfxResourceHandle {
        self.resource
    }

    #[inline]
    pub fn desc(&self) -> &GfxResourceDesc {
        &self.desc
    }

    #[inline]
    pub fn kind(&self) -> GfxTextureKind {
        self.kind
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn extent(&self) -> GfxExtent2D {
        self.desc.extent().unwrap_or_default()
    }

    /// 纹理的 desc 一定是 2D 形状，这里的回退值不会出现
    #[inline]
    pub fn format(&self) -> GfxFormat {
        self.desc.format().unwrap_or(GfxFormat::Rgba8Unorm)
    }

    #[inline]
    pub fn usage(&self) -> GfxResourceUsage {
        self.desc.usage
    }

    #[inline]
    pub fn views(&self) -> &GfxResourceViews {
        &self.views
    }

    #[inline]
    pub fn srv(&self) -> Option<DescriptorIndex> {
        self.views.srv.map(|r| r.first())
    }

    #[inline]
    pub fn uav(&self) -> Option<DescriptorIndex> {
        self.views.uav.map(|r| r.first())
    }

    #[inline]
    pub fn rtv(&self) -> Option<DescriptorIndex> {
        self.views.rtv.map(|r| r.first())
    }

    #[inline]
    pub fn dsv(&self) -> Option<DescriptorIndex> {
        self.views.dsv.map(|r| r.first())
    }

    /// shader 中采样该纹理使用的索引
    #[inline]
    pub fn srv_index(&self) -> u32 {
        shader_index(self.srv())
    }

    #[inline]
    pub fn uav_index(&self) -> u32 {
        shader_index(self.uav())
    }
}

impl GfxStateTracked for GfxTexture {
    fn gfx_resource(&self) -> GfxResourceHandle {
        self.resource
    }

    fn current_state(&self) -> GfxResourceState {
        self.state
    }

    fn set_current_state(&mut self, state: GfxResourceState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_views_follow_usage() {
        let gbuffer = GfxResourceDesc::texture_2d(
            GfxExtent2D::new(4, 4),
            GfxFormat::Rgba16Float,
            GfxResourceUsage::RENDER_TARGET | GfxResourceUsage::SHADER_RESOURCE,
            "normal",
        );
        assert_eq!(GfxResourceViews::required(&gbuffer), vec![GfxViewDesc::ShaderResource, GfxViewDesc::RenderTarget]);

        let constants = GfxResourceDesc::buffer(256, GfxResourceUsage::CONSTANT | GfxResourceUsage::UPLOAD, "frame");
        assert_eq!(GfxResourceViews::required(&constants), vec![GfxViewDesc::ConstantBuffer]);
    }
}
