use std::sync::Arc;

use umbra_gfx::{
    basic::{extent::GfxExtent2D, format::GfxFormat},
    commands::{barrier::GfxResourceState, graphics_context::GfxGraphicsContext},
    device::{GfxDevice, GfxQueueType, GfxResourceHandle, GfxSwapchainHandle},
    error::{GfxError, GfxErrorKind, GfxResult},
    resources::{GfxResourceDesc, GfxResourceUsage},
    swapchain::{GfxPresentMode, GfxSwapchainDesc, GfxWindowHandles},
};
use umbra_render_interface::{
    gfx_resource_manager::GfxResourceManager, handles::GfxTextureHandle, render_context::RenderContext,
};

/// 交换链，以及登记在资源管理器中的 back buffer
///
/// 最终画面通过一次拷贝进入 back buffer，随后 back buffer 转换为 `Present` 并呈现。
///
/// # Destroy
/// 需要手动调用 [`RenderPresent::destroy`]
pub struct RenderPresent {
    device: Arc<dyn GfxDevice>,
    swapchain: GfxSwapchainHandle,
    /// 数量和交换链的 image 数相同
    back_buffers: Vec<GfxTextureHandle>,
    /// 本帧 acquire 到的 back buffer 序号
    current: Option<usize>,

    extent: GfxExtent2D,
    format: GfxFormat,
    present_mode: GfxPresentMode,
}

// new & init
impl RenderPresent {
    pub fn new(
        rc: &mut RenderContext,
        window: Option<GfxWindowHandles>,
        extent: GfxExtent2D,
        present_mode: GfxPresentMode,
    ) -> GfxResult<Self> {
        let desc = GfxSwapchainDesc::new(window, extent, present_mode);
        let (swapchain, resources) = rc.device.create_swapchain(&desc)?;

        let mut present = Self {
            device: rc.device.clone(),
            swapchain,
            back_buffers: Vec::new(),
            current: None,
            extent,
            format: desc.format,
            present_mode,
        };
        present.back_buffers = present.register_back_buffers(&mut rc.gfx_resource_manager, &resources)?;
        log::info!("render present created: {} x{} {:?}", extent, resources.len(), desc.format);
        Ok(present)
    }

    fn register_back_buffers(
        &self,
        resources: &mut GfxResourceManager,
        back_buffers: &[GfxResourceHandle],
    ) -> GfxResult<Vec<GfxTextureHandle>> {
        back_buffers
            .iter()
            .enumerate()
            .map(|(idx, resource)| {
                let desc = GfxResourceDesc::texture_2d(
                    self.extent,
                    self.format,
                    GfxResourceUsage::RENDER_TARGET | GfxResourceUsage::COPY_DST,
                    format!("back-buffer-{}", idx),
                );
                resources.register_external_texture(*resource, &desc, GfxResourceState::Undefined)
            })
            .collect::<GfxResult<Vec<_>>>()
    }
}

// destroy
impl RenderPresent {
    pub fn destroy(mut self, rc: &mut RenderContext) -> GfxResult<()> {
        self.release_back_buffers(rc)?;
        self.device.destroy_swapchain(self.swapchain);
        Ok(())
    }
}

// getters
impl RenderPresent {
    #[inline]
    pub fn extent(&self) -> GfxExtent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> GfxFormat {
        self.format
    }

    #[inline]
    pub fn present_mode(&self) -> GfxPresentMode {
        self.present_mode
    }

    #[inline]
    pub fn back_buffers(&self) -> &[GfxTextureHandle] {
        &self.back_buffers
    }

    #[inline]
    pub fn current_back_buffer(&self) -> Option<GfxTextureHandle> {
        self.current.and_then(|idx| self.back_buffers.get(idx).copied())
    }
}

// update
impl RenderPresent {
    /// 以新的尺寸或呈现模式重建交换链
    ///
    /// 调用方需要保证 GPU 已经不再访问旧的 back buffer。
    pub fn rebuild(
        &mut self,
        rc: &mut RenderContext,
        extent: GfxExtent2D,
        present_mode: GfxPresentMode,
    ) -> GfxResult<()> {
        let _span = tracy_client::span!("RenderPresent::rebuild");
        self.release_back_buffers(rc)?;

        let resources = self.device.recreate_swapchain(self.swapchain, extent, present_mode)?;
        self.extent = extent;
        self.present_mode = present_mode;
        self.back_buffers = self.register_back_buffers(&mut rc.gfx_resource_manager, &resources)?;
        log::info!("swapchain rebuilt: {} (vsync: {})", extent, present_mode.vsync);
        Ok(())
    }

    /// 交换链过期时按当前尺寸重建一次后重试
    pub fn acquire(&mut self, rc: &mut RenderContext) -> GfxResult<GfxTextureHandle> {
        let _span = tracy_client::span!("RenderPresent::acquire");
        let index = match self.device.acquire_next_back_buffer(self.swapchain) {
            Err(err) if err.kind() == GfxErrorKind::SwapchainOutOfDate => {
                log::warn!("swapchain out of date on acquire, rebuilding");
                rc.flush_all()?;
                self.rebuild(rc, self.extent, self.present_mode)?;
                self.device.acquire_next_back_buffer(self.swapchain)?
            }
            other => other?,
        };

        let back_buffer = self.back_buffers.get(index as usize).copied().ok_or_else(|| {
            GfxError::invalid_handle(format!("back buffer index {} out of {}", index, self.back_buffers.len()))
        })?;
        self.current = Some(index as usize);
        Ok(back_buffer)
    }

    /// 把 `source` 拷贝到当前的 back buffer，并转换为 `Present`
    pub fn record_copy(
        &self,
        ctx: &mut GfxGraphicsContext,
        resources: &mut GfxResourceManager,
        source: GfxTextureHandle,
    ) -> GfxResult<()> {
        let back_buffer = self
            .current_back_buffer()
            .ok_or_else(|| GfxError::invalid_usage("present copy without an acquired back buffer"))?;
        let (source, back_buffer) = resources.texture_pair_mut(source, back_buffer)?;

        ctx.begin_label("present-copy");
        ctx.transition(source, GfxResourceState::CopySource);
        ctx.transition(back_buffer, GfxResourceState::CopyDest);
        ctx.copy_resource(source.resource(), back_buffer.resource())?;
        ctx.transition(back_buffer, GfxResourceState::Present);
        ctx.end_label();
        Ok(())
    }

    /// 呈现当前的 back buffer
    ///
    /// 交换链过期时返回 [`GfxErrorKind::SwapchainOutOfDate`]，由调用方决定何时重建。
    pub fn present(&mut self, rc: &mut RenderContext) -> GfxResult<()> {
        let _span = tracy_client::span!("RenderPresent::present");
        if self.current.take().is_none() {
            return Err(GfxError::invalid_usage("present without an acquired back buffer"));
        }
        rc.device.present(self.swapchain, GfxQueueType::Graphics)
    }
}

// tools
impl RenderPresent {
    fn release_back_buffers(&mut self, rc: &mut RenderContext) -> GfxResult<()> {
        self.current = None;
        // 全部释放，返回第一个错误
        let mut result = Ok(());
        for handle in std::mem::take(&mut self.back_buffers) {
            let released = rc.destroy_texture(handle);
            if result.is_ok() {
                result = released;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessEvent, HeadlessExecutionMode},
        pipelines::shader_library::ShaderLibrary,
    };
    use umbra_render_interface::render_settings::RenderSettings;

    use super::*;

    fn context() -> (Arc<HeadlessDevice>, RenderContext) {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let rc =
            RenderContext::new(device.clone(), RenderSettings::default(), Arc::new(ShaderLibrary::synthetic())).unwrap();
        (device, rc)
    }

    #[test]
    fn test_copy_and_present_cycles_back_buffers() {
        let (device, mut rc) = context();
        let extent = GfxExtent2D::new(16, 16);
        let mut present = RenderPresent::new(&mut rc, None, extent, GfxPresentMode::default()).unwrap();
        let source = rc.create_render_target(extent, present.format(), "final").unwrap();

        let mut presented = Vec::new();
        for _ in 0..4 {
            let back_buffer = present.acquire(&mut rc).unwrap();
            presented.push(back_buffer);

            let mut ctx = rc.graphics_queue.acquire_context("present").unwrap();
            present.record_copy(&mut ctx, &mut rc.gfx_resource_manager, source).unwrap();
            rc.graphics_queue.execute_context(ctx).unwrap();
            present.present(&mut rc).unwrap();
        }
        assert_eq!(presented[0], presented[3]);
        assert_ne!(presented[0], presented[1]);

        let presents = device.events().iter().filter(|e| matches!(e, HeadlessEvent::Present { .. })).count();
        assert_eq!(presents, 4);
        assert!(device.validation_errors().is_empty(), "{:?}", device.validation_errors());

        present.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    fn test_rebuild_replaces_back_buffers() {
        let (device, mut rc) = context();
        let mut present =
            RenderPresent::new(&mut rc, None, GfxExtent2D::new(16, 16), GfxPresentMode::default()).unwrap();
        let old = present.back_buffers().to_vec();

        let mode = GfxPresentMode {
            vsync: false,
            allow_tearing: true,
        };
        present.rebuild(&mut rc, GfxExtent2D::new(8, 4), mode).unwrap();
        assert_eq!(present.extent(), GfxExtent2D::new(8, 4));
        assert_eq!(present.present_mode(), mode);
        assert_eq!(present.back_buffers().len(), old.len());
        assert!(old.iter().all(|h| rc.gfx_resource_manager.get_texture(*h).is_none()));
        assert_eq!(device.swapchain_extent(present.swapchain), Some(GfxExtent2D::new(8, 4)));

        assert!(present.present(&mut rc).is_err());

        present.destroy(&mut rc).unwrap();
        rc.destroy().unwrap();
    }
}
