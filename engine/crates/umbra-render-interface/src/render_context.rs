use std::sync::Arc;

use umbra_gfx::{
    basic::{extent::GfxExtent2D, format::GfxFormat},
    commands::command_queue::GfxCommandQueue,
    device::{GfxDevice, GfxQueueType},
    error::GfxResult,
    pipelines::{
        desc::{GfxComputePipelineDesc, GfxGraphicsPipelineDesc},
        pipeline_state::{GfxPendingPipeline, GfxPipelineState},
        shader_library::ShaderLibrary,
    },
    resources::{GfxResourceDesc, GfxResourceUsage},
};

use crate::{
    frame_counter::FrameCounter,
    gfx_resource_manager::GfxResourceManager,
    handles::{GfxBufferHandle, GfxTextureHandle},
    render_settings::RenderSettings,
    upload::GfxUploadContext,
};

/// 渲染期间共享的全部 GPU 状态
///
/// 显式构造并以引用传给每个组件；所有工作都在同一个录制线程上进行。
///
/// # Destroy
/// 需要手动调用 [`RenderContext::destroy`]
pub struct RenderContext {
    pub device: Arc<dyn GfxDevice>,

    pub graphics_queue: GfxCommandQueue,
    pub compute_queue: GfxCommandQueue,
    pub copy_queue: GfxCommandQueue,

    pub gfx_resource_manager: GfxResourceManager,
    pub uploader: GfxUploadContext,
    pub shader_library: Arc<ShaderLibrary>,

    pub frame_counter: FrameCounter,
    pub settings: RenderSettings,
}

// new & init
impl RenderContext {
    pub fn new(device: Arc<dyn GfxDevice>, settings: RenderSettings, shader_library: Arc<ShaderLibrary>) -> GfxResult<Self> {
        let _span = tracy_client::span!("RenderContext::new");
        log::info!("create render context on {} ({:?})", device.adapter_name(), device.backend());

        let graphics_queue = GfxCommandQueue::new(device.clone(), GfxQueueType::Graphics, "graphics")?;
        let compute_queue = GfxCommandQueue::new(device.clone(), GfxQueueType::Compute, "compute")?;
        let copy_queue = GfxCommandQueue::new(device.clone(), GfxQueueType::Copy, "copy")?;

        Ok(Self {
            gfx_resource_manager: GfxResourceManager::new(device.clone()),
            uploader: GfxUploadContext::new(device.clone()),
            frame_counter: FrameCounter::new(0, settings.fif_count()),
            device,
            graphics_queue,
            compute_queue,
            copy_queue,
            shader_library,
            settings,
        })
    }
}

// destroy
impl RenderContext {
    /// 等待所有队列空闲后释放全部 GPU 对象
    ///
    /// 设备丢失时 flush 会失败，但资源依然会被释放；返回第一个错误。
    pub fn destroy(mut self) -> GfxResult<()> {
        let flushed = self.flush_all();
        self.gfx_resource_manager.destroy_mut();

        let graphics = self.graphics_queue.destroy();
        let compute = self.compute_queue.destroy();
        let copy = self.copy_queue.destroy();
        log::info!("render context destroyed");
        flushed.and(graphics).and(compute).and(copy)
    }
}

// sync
impl RenderContext {
    /// 依次 flush graphics、compute、copy 队列
    pub fn flush_all(&mut self) -> GfxResult<()> {
        self.graphics_queue.flush()?;
        self.compute_queue.flush()?;
        self.copy_queue.flush()?;
        Ok(())
    }

    /// 释放 graphics 队列已经越过的延迟销毁资源
    pub fn cleanup(&mut self) -> GfxResult<()> {
        let completed = self.graphics_queue.completed_value()?;
        self.gfx_resource_manager.cleanup(completed);
        Ok(())
    }

    /// 延迟销毁所依据的 fence 值：graphics 队列最近一次 signal 的值
    #[inline]
    pub fn retire_fence_value(&self) -> u64 {
        self.graphics_queue.last_signaled_value()
    }
}

// 资源工厂
impl RenderContext {
    /// 创建 buffer，`data` 非空时作为初始内容上传
    pub fn create_buffer(&mut self, desc: &GfxResourceDesc, data: &[u8]) -> GfxResult<GfxBufferHandle> {
        let mut desc = desc.clone();
        if !data.is_empty() && !desc.usage.contains(GfxResourceUsage::UPLOAD) {
            desc.usage |= GfxResourceUsage::COPY_DST;
        }

        let handle = self.gfx_resource_manager.create_buffer(&desc)?;
        if data.is_empty() {
            return Ok(handle);
        }

        let uploaded = self
            .gfx_resource_manager
            .buffer_mut(handle)
            .and_then(|buffer| self.uploader.upload_buffer(&mut self.copy_queue, buffer, 0, data));
        if let Err(err) = uploaded {
            let fence_value = self.retire_fence_value();
            if let Err(e) = self.gfx_resource_manager.destroy_buffer(handle, fence_value) {
                log::warn!("failed to release buffer {} after a failed upload: {}", desc.name, e);
            }
            return Err(err);
        }
        Ok(handle)
    }

    /// 创建纹理，`data` 非空时作为第 0 个 mip 的内容上传
    pub fn create_texture(&mut self, desc: &GfxResourceDesc, data: &[u8]) -> GfxResult<GfxTextureHandle> {
        let mut desc = desc.clone();
        if !data.is_empty() {
            desc.usage |= GfxResourceUsage::COPY_DST;
        }

        let handle = self.gfx_resource_manager.create_texture(&desc)?;
        if data.is_empty() {
            return Ok(handle);
        }

        let uploaded = self
            .gfx_resource_manager
            .texture_mut(handle)
            .and_then(|texture| self.uploader.upload_texture(&mut self.copy_queue, texture, data));
        if let Err(err) = uploaded {
            let fence_value = self.retire_fence_value();
            if let Err(e) = self.gfx_resource_manager.destroy_texture(handle, fence_value) {
                log::warn!("failed to release texture {} after a failed upload: {}", desc.name, e);
            }
            return Err(err);
        }
        Ok(handle)
    }

    /// 创建可采样的渲染目标
    ///
    /// 深度格式得到 DSV + SRV，其余格式得到 RTV + SRV；两者都可以作为拷贝的源与目标。
    pub fn create_render_target(
        &mut self,
        extent: GfxExtent2D,
        format: GfxFormat,
        name: impl Into<String>,
    ) -> GfxResult<GfxTextureHandle> {
        let attachment =
            if format.is_depth() { GfxResourceUsage::DEPTH_STENCIL } else { GfxResourceUsage::RENDER_TARGET };
        let usage = attachment
            | GfxResourceUsage::SHADER_RESOURCE
            | GfxResourceUsage::COPY_SRC
            | GfxResourceUsage::COPY_DST;
        let desc = GfxResourceDesc::texture_2d(extent, format, usage, name);
        log::info!("create render target {} {} {:?}", desc.name, extent, format);
        self.gfx_resource_manager.create_texture(&desc)
    }

    pub fn destroy_buffer(&mut self, handle: GfxBufferHandle) -> GfxResult<()> {
        let fence_value = self.retire_fence_value();
        self.gfx_resource_manager.destroy_buffer(handle, fence_value)
    }

    pub fn destroy_texture(&mut self, handle: GfxTextureHandle) -> GfxResult<()> {
        let fence_value = self.retire_fence_value();
        self.gfx_resource_manager.destroy_texture(handle, fence_value)
    }

    /// 描述符索引保持不变，旧内存延迟释放
    pub fn resize_render_target(&mut self, handle: GfxTextureHandle, extent: GfxExtent2D) -> GfxResult<()> {
        let fence_value = self.retire_fence_value();
        self.gfx_resource_manager.resize_texture(handle, extent, fence_value)
    }
}

// 管线工厂
impl RenderContext {
    pub fn create_graphics_pipeline(&self, desc: &GfxGraphicsPipelineDesc) -> GfxResult<GfxPipelineState> {
        GfxPipelineState::new_graphics(self.device.clone(), &self.shader_library, desc)
    }

    /// 在工作线程上创建，首次使用时等待
    pub fn create_graphics_pipeline_async(&self, desc: GfxGraphicsPipelineDesc) -> GfxPendingPipeline {
        GfxPipelineState::new_graphics_async(self.device.clone(), self.shader_library.clone(), desc)
    }

    pub fn create_compute_pipeline(&self, desc: &GfxComputePipelineDesc) -> GfxResult<GfxPipelineState> {
        GfxPipelineState::new_compute(self.device.clone(), &self.shader_library, desc)
    }
}

#[cfg(test)]
mod tests {
    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessExecutionMode},
        commands::{barrier::GfxResourceState, graphics_context::GfxStateTracked},
        error::GfxErrorKind,
        resources::GfxDescriptorHeapKind,
    };

    use super::*;

    fn context(mode: HeadlessExecutionMode) -> (Arc<HeadlessDevice>, RenderContext) {
        let device = HeadlessDevice::with_mode(mode);
        let ctx =
            RenderContext::new(device.clone(), RenderSettings::default(), Arc::new(ShaderLibrary::synthetic())).unwrap();
        (device, ctx)
    }

    #[test]
    fn test_factory_uploads_initial_bytes() {
        let (device, mut ctx) = context(HeadlessExecutionMode::Immediate);

        let handle = ctx
            .create_buffer(&GfxResourceDesc::buffer(4, GfxResourceUsage::SHADER_RESOURCE, "indices"), &[1, 2, 3, 4])
            .unwrap();
        let buffer = ctx.gfx_resource_manager.buffer(handle).unwrap();
        assert!(buffer.desc().usage.contains(GfxResourceUsage::COPY_DST));
        assert_eq!(buffer.current_state(), GfxResourceState::CopyDest);
        assert_eq!(device.read_resource(buffer.resource()).unwrap(), vec![1, 2, 3, 4]);
        assert!(buffer.srv().is_some());

        ctx.destroy().unwrap();
        assert_eq!(device.live_resource_count(), 0);
    }

    #[test]
    fn test_failed_upload_releases_resource() {
        let (device, mut ctx) = context(HeadlessExecutionMode::Immediate);
        let baseline = device.live_resource_count();

        let desc = GfxResourceDesc::texture_2d(
            GfxExtent2D::new(4, 4),
            GfxFormat::Rgba8Unorm,
            GfxResourceUsage::SHADER_RESOURCE,
            "truncated",
        );
        assert!(ctx.create_texture(&desc, &[0; 3]).is_err());
        assert_eq!(ctx.gfx_resource_manager.texture_count(), 0);
        assert_eq!(ctx.gfx_resource_manager.pending_destroy_count(), 1);

        ctx.cleanup().unwrap();
        assert_eq!(device.live_resource_count(), baseline);
        assert_eq!(ctx.gfx_resource_manager.pending_destroy_count(), 0);

        ctx.destroy().unwrap();
    }

    #[test]
    fn test_render_target_views() {
        let (_device, mut ctx) = context(HeadlessExecutionMode::Immediate);

        let color = ctx.create_render_target(GfxExtent2D::new(64, 64), GfxFormat::Rgba16Float, "lit").unwrap();
        let depth = ctx.create_render_target(GfxExtent2D::new(64, 64), GfxFormat::D32Float, "depth").unwrap();

        let color = ctx.gfx_resource_manager.texture(color).unwrap();
        assert!(color.rtv().is_some() && color.srv().is_some() && color.dsv().is_none());
        let depth = ctx.gfx_resource_manager.texture(depth).unwrap();
        assert!(depth.dsv().is_some() && depth.srv().is_some() && depth.rtv().is_none());
        assert_eq!(depth.dsv().unwrap().heap, GfxDescriptorHeapKind::Dsv);

        ctx.destroy().unwrap();
    }

    #[test]
    fn test_destroyed_texture_waits_for_graphics_fence() {
        let (device, mut ctx) = context(HeadlessExecutionMode::Manual);
        let baseline = device.live_resource_count();

        let target = ctx.create_render_target(GfxExtent2D::new(8, 8), GfxFormat::Rgba8Unorm, "temp").unwrap();
        ctx.graphics_queue.signal().unwrap();
        ctx.destroy_texture(target).unwrap();

        ctx.cleanup().unwrap();
        assert_eq!(device.live_resource_count(), baseline + 1);

        device.run_gpu();
        ctx.cleanup().unwrap();
        assert_eq!(device.live_resource_count(), baseline);

        device.set_mode(HeadlessExecutionMode::Immediate);
        ctx.destroy().unwrap();
    }

    #[test]
    fn test_missing_shader_is_fatal() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let ctx = RenderContext::new(device, RenderSettings::default(), Arc::new(ShaderLibrary::in_memory())).unwrap();

        let err = ctx.create_graphics_pipeline(&GfxGraphicsPipelineDesc::new("geometry", "geometry.vs", "geometry.ps"));
        let err = err.err().unwrap();
        assert_eq!(err.kind(), GfxErrorKind::ShaderNotFound);
        assert!(err.is_fatal());

        ctx.destroy().unwrap();
    }
}
