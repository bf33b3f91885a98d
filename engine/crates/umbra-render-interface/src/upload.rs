//! 通过 copy 队列把 CPU 数据写入 GPU 资源
//!
//! 每次上传都会创建一个临时的 staging buffer，录制拷贝并提交到 copy 队列，
//! 然后 flush 该队列并立即释放 staging。目标资源停留在 `CopyDest`，首次在 graphics 队列上使用时再转换。

use std::sync::Arc;

use umbra_gfx::{
    commands::{
        barrier::GfxResourceState,
        command_queue::GfxCommandQueue,
        graphics_context::{GfxGraphicsContext, GfxStateTracked},
    },
    device::{GfxDevice, GfxQueueType, GfxResourceHandle},
    error::{GfxError, GfxResult},
    resources::{GfxResourceDesc, GfxResourceUsage},
};

use crate::resources::{GfxBuffer, GfxTexture};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GfxUploadStats {
    pub uploads: u64,
    pub bytes: u64,
}

pub struct GfxUploadContext {
    device: Arc<dyn GfxDevice>,
    stats: GfxUploadStats,
}

// new & init
impl GfxUploadContext {
    pub fn new(device: Arc<dyn GfxDevice>) -> Self {
        Self {
            device,
            stats: GfxUploadStats::default(),
        }
    }
}

// getters
impl GfxUploadContext {
    #[inline]
    pub fn stats(&self) -> GfxUploadStats {
        self.stats
    }
}

// upload
impl GfxUploadContext {
    /// 写入 buffer 的 `[offset, offset + data.len())`
    ///
    /// upload heap 上的 buffer 直接由 CPU 写入，不经过 copy 队列。
    pub fn upload_buffer(
        &mut self,
        queue: &mut GfxCommandQueue,
        buffer: &mut GfxBuffer,
        offset: u64,
        data: &[u8],
    ) -> GfxResult<()> {
        let size = buffer.size();
        if offset.checked_add(data.len() as u64).is_none_or(|end| end > size) {
            return Err(GfxError::invalid_usage(format!(
                "upload of {} bytes at {} overflows buffer {} ({} bytes)",
                data.len(),
                offset,
                buffer.desc().name,
                size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        if buffer.desc().usage.contains(GfxResourceUsage::UPLOAD) {
            self.device.write_resource(buffer.resource(), offset, data)?;
            self.record_stats(data.len());
            return Ok(());
        }

        let name = buffer.desc().name.clone();
        self.submit_copy(queue, buffer, &name, data, |ctx, staging, dst| {
            ctx.copy_buffer_region(staging, 0, dst, offset, data.len() as u64)
        })
    }

    /// 写入纹理的第 0 个 mip，`data` 必须是紧密排列的完整图像
    pub fn upload_texture(
        &mut self,
        queue: &mut GfxCommandQueue,
        texture: &mut GfxTexture,
        data: &[u8],
    ) -> GfxResult<()> {
        let expected = texture.desc().byte_size();
        if data.len() as u64 != expected {
            return Err(GfxError::invalid_usage(format!(
                "texture {} expects {} bytes, got {}",
                texture.name(),
                expected,
                data.len()
            )));
        }

        let name = texture.name().to_string();
        self.submit_copy(queue, texture, &name, data, |ctx, staging, dst| ctx.copy_buffer_to_texture(staging, 0, dst))
    }
}

// tools
impl GfxUploadContext {
    fn submit_copy(
        &mut self,
        queue: &mut GfxCommandQueue,
        target: &mut impl GfxStateTracked,
        name: &str,
        data: &[u8],
        record: impl FnOnce(&mut GfxGraphicsContext, GfxResourceHandle, GfxResourceHandle) -> GfxResult<()>,
    ) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxUploadContext::submit_copy");
        if queue.queue_type() != GfxQueueType::Copy {
            log::warn!("upload of {} goes through the {:?} queue", name, queue.queue_type());
        }

        let staging_desc = GfxResourceDesc::buffer(
            data.len() as u64,
            GfxResourceUsage::UPLOAD | GfxResourceUsage::COPY_SRC,
            format!("{}-staging", name),
        );
        let staging = self.device.create_resource(&staging_desc)?;

        let result = self.device.write_resource(staging, 0, data).and_then(|_| {
            let mut ctx = queue.acquire_context(format!("upload-{}", name))?;
            ctx.transition(target, GfxResourceState::CopyDest);
            record(&mut ctx, staging, target.gfx_resource())?;
            queue.execute_context(ctx)?;
            queue.flush()
        });

        // flush 之后 staging 不再被 GPU 引用
        self.device.destroy_resource(staging);
        result?;

        self.record_stats(data.len());
        log::debug!("uploaded {} bytes to {}", data.len(), name);
        Ok(())
    }

    fn record_stats(&mut self, bytes: usize) {
        self.stats.uploads += 1;
        self.stats.bytes += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessEvent, HeadlessExecutionMode},
        basic::{extent::GfxExtent2D, format::GfxFormat},
        error::GfxErrorKind,
    };

    use super::*;
    use crate::gfx_resource_manager::GfxResourceManager;

    #[test]
    fn test_buffer_upload_through_copy_queue() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut queue = GfxCommandQueue::new(device.clone(), GfxQueueType::Copy, "copy").unwrap();
        let mut manager = GfxResourceManager::new(device.clone());
        let mut uploader = GfxUploadContext::new(device.clone());

        let handle = manager
            .create_buffer(&GfxResourceDesc::buffer(
                8,
                GfxResourceUsage::SHADER_RESOURCE | GfxResourceUsage::COPY_DST,
                "vertices",
            ))
            .unwrap();
        let live = device.live_resource_count();

        let buffer = manager.buffer_mut(handle).unwrap();
        uploader.upload_buffer(&mut queue, buffer, 4, &[9, 8, 7, 6]).unwrap();

        assert_eq!(buffer.current_state(), GfxResourceState::CopyDest);
        assert_eq!(device.read_resource(buffer.resource()).unwrap(), vec![0, 0, 0, 0, 9, 8, 7, 6]);
        // staging 已经释放
        assert_eq!(device.live_resource_count(), live);
        assert!(device.validation_errors().is_empty());
        assert!(device.events().iter().any(|e| matches!(
            e,
            HeadlessEvent::Copy { queue: GfxQueueType::Copy, dst, .. } if dst == "vertices"
        )));
        assert_eq!(uploader.stats(), GfxUploadStats { uploads: 1, bytes: 4 });

        manager.destroy_mut();
        queue.destroy().unwrap();
    }

    #[test]
    fn test_texture_upload_size_is_checked() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut queue = GfxCommandQueue::new(device.clone(), GfxQueueType::Copy, "copy").unwrap();
        let mut manager = GfxResourceManager::new(device.clone());
        let mut uploader = GfxUploadContext::new(device.clone());

        let handle = manager
            .create_texture(&GfxResourceDesc::texture_2d(
                GfxExtent2D::new(2, 2),
                GfxFormat::Rgba8Unorm,
                GfxResourceUsage::SHADER_RESOURCE | GfxResourceUsage::COPY_DST,
                "checker",
            ))
            .unwrap();
        let texture = manager.texture_mut(handle).unwrap();

        let err = uploader.upload_texture(&mut queue, texture, &[0; 3]).unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::InvalidUsage);

        uploader.upload_texture(&mut queue, texture, &[255; 16]).unwrap();
        assert_eq!(texture.current_state(), GfxResourceState::CopyDest);
        assert!(device.validation_errors().is_empty());

        manager.destroy_mut();
        queue.destroy().unwrap();
    }

    #[test]
    fn test_upload_heap_is_written_directly() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut queue = GfxCommandQueue::new(device.clone(), GfxQueueType::Copy, "copy").unwrap();
        let mut manager = GfxResourceManager::new(device.clone());
        let mut uploader = GfxUploadContext::new(device.clone());

        let handle = manager
            .create_buffer(&GfxResourceDesc::buffer(
                4,
                GfxResourceUsage::CONSTANT | GfxResourceUsage::UPLOAD,
                "constants",
            ))
            .unwrap();
        let buffer = manager.buffer_mut(handle).unwrap();
        uploader.upload_buffer(&mut queue, buffer, 0, &[1, 2, 3, 4]).unwrap();

        assert_eq!(buffer.current_state(), GfxResourceState::GenericRead);
        assert_eq!(queue.last_signaled_value(), 0);
        assert!(uploader.upload_buffer(&mut queue, buffer, 2, &[0; 4]).is_err());

        manager.destroy_mut();
        queue.destroy().unwrap();
    }
}
