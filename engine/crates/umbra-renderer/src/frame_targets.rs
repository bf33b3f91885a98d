use umbra_gfx::{
    basic::{extent::GfxExtent2D, format::GfxFormat},
    error::GfxResult,
};
use umbra_render_interface::{handles::GfxTextureHandle, render_context::RenderContext};

/// G-buffer 的四个颜色 attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBuffer {
    pub albedo: GfxTextureHandle,
    /// rgb: 世界空间位置，a: 自发光
    pub position_emissive: GfxTextureHandle,
    /// rgb: 世界空间法线，a: 自发光
    pub normal_emissive: GfxTextureHandle,
    /// r: AO，g: metallic，b: roughness，a: 自发光
    pub ao_metal_roughness_emissive: GfxTextureHandle,
}

impl GBuffer {
    pub const FORMATS: [GfxFormat; 4] =
        [GfxFormat::Rgba8Unorm, GfxFormat::Rgba16Float, GfxFormat::Rgba16Float, GfxFormat::Rgba16Float];

    /// 与 [`GBuffer::FORMATS`] 顺序一致
    #[inline]
    pub fn targets(&self) -> [GfxTextureHandle; 4] {
        [self.albedo, self.position_emissive, self.normal_emissive, self.ao_metal_roughness_emissive]
    }
}

/// 帧管线使用的全部渲染目标
///
/// 除了阴影贴图，其余目标都跟随窗口尺寸，resize 时原地重建，描述符索引保持不变。
///
/// # Destroy
/// 需要手动调用 [`FrameTargets::destroy`]
#[derive(Debug)]
pub struct FrameTargets {
    extent: GfxExtent2D,

    pub shadow_map: GfxTextureHandle,
    pub gbuffer: GBuffer,
    /// geometry pass 写入的深度
    pub depth: GfxTextureHandle,
    /// 从 `depth` 拷贝而来，供 forward 绘制继续做深度测试
    pub forward_depth: GfxTextureHandle,
    /// 光照结果，HDR
    pub lit: GfxTextureHandle,
    /// 色调映射之后的结果
    pub post: GfxTextureHandle,
    /// 最终画面，格式与交换链一致
    pub final_target: GfxTextureHandle,
}

// new & init
impl FrameTargets {
    pub const DEPTH_FORMAT: GfxFormat = GfxFormat::D32Float;
    pub const LIT_FORMAT: GfxFormat = GfxFormat::Rgba16Float;
    pub const POST_FORMAT: GfxFormat = GfxFormat::Rgba8Unorm;

    pub fn new(
        rc: &mut RenderContext,
        extent: GfxExtent2D,
        shadow_map_size: u32,
        final_format: GfxFormat,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("FrameTargets::new");

        let shadow_extent = GfxExtent2D::new(shadow_map_size, shadow_map_size);
        let shadow_map = rc.create_render_target(shadow_extent, Self::DEPTH_FORMAT, "shadow-map")?;

        let gbuffer = GBuffer {
            albedo: rc.create_render_target(extent, GBuffer::FORMATS[0], "gbuffer-albedo")?,
            position_emissive: rc.create_render_target(extent, GBuffer::FORMATS[1], "gbuffer-position-emissive")?,
            normal_emissive: rc.create_render_target(extent, GBuffer::FORMATS[2], "gbuffer-normal-emissive")?,
            ao_metal_roughness_emissive: rc.create_render_target(
                extent,
                GBuffer::FORMATS[3],
                "gbuffer-ao-metal-roughness-emissive",
            )?,
        };

        Ok(Self {
            extent,
            shadow_map,
            gbuffer,
            depth: rc.create_render_target(extent, Self::DEPTH_FORMAT, "depth")?,
            forward_depth: rc.create_render_target(extent, Self::DEPTH_FORMAT, "forward-depth")?,
            lit: rc.create_render_target(extent, Self::LIT_FORMAT, "lit")?,
            post: rc.create_render_target(extent, Self::POST_FORMAT, "post")?,
            final_target: rc.create_render_target(extent, final_format, "final")?,
        })
    }
}

// destroy
impl FrameTargets {
    pub fn destroy(self, rc: &mut RenderContext) -> GfxResult<()> {
        for target in std::iter::once(self.shadow_map).chain(self.sized_targets()) {
            rc.destroy_texture(target)?;
        }
        Ok(())
    }
}

// getters
impl FrameTargets {
    #[inline]
    pub fn extent(&self) -> GfxExtent2D {
        self.extent
    }

    /// 跟随窗口尺寸的目标
    pub fn sized_targets(&self) -> Vec<GfxTextureHandle> {
        let mut targets = self.gbuffer.targets().to_vec();
        targets.extend([self.depth, self.forward_depth, self.lit, self.post, self.final_target]);
        targets
    }
}

// update
impl FrameTargets {
    /// 调用方需要先保证 GPU 不再使用这些目标
    pub fn resize(&mut self, rc: &mut RenderContext, extent: GfxExtent2D) -> GfxResult<()> {
        let _span = tracy_client::span!("FrameTargets::resize");
        if extent == self.extent {
            return Ok(());
        }
        for target in self.sized_targets() {
            rc.resize_render_target(target, extent)?;
        }
        log::info!("frame targets resized {} -> {}", self.extent, extent);
        self.extent = extent;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessExecutionMode},
        device::GfxDevice,
        pipelines::shader_library::ShaderLibrary,
    };
    use umbra_render_interface::render_settings::RenderSettings;

    use super::*;

    #[test]
    fn test_resize_keeps_shadow_map() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut rc =
            RenderContext::new(device.clone(), RenderSettings::default(), Arc::new(ShaderLibrary::synthetic())).unwrap();

        let mut targets = FrameTargets::new(&mut rc, GfxExtent2D::new(64, 32), 128, GfxFormat::Bgra8Unorm).unwrap();
        let albedo_srv = rc.gfx_resource_manager.texture(targets.gbuffer.albedo).unwrap().srv();

        targets.resize(&mut rc, GfxExtent2D::new(32, 16)).unwrap();
        let manager = &rc.gfx_resource_manager;
        assert_eq!(manager.texture(targets.shadow_map).unwrap().extent(), GfxExtent2D::new(128, 128));
        assert_eq!(manager.texture(targets.lit).unwrap().extent(), GfxExtent2D::new(32, 16));
        assert_eq!(manager.texture(targets.final_target).unwrap().format(), GfxFormat::Bgra8Unorm);
        assert_eq!(manager.texture(targets.gbuffer.albedo).unwrap().srv(), albedo_srv);

        targets.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
        assert_eq!(device.live_resource_count(), 0);
    }
}
