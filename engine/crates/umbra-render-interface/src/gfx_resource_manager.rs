use std::sync::Arc;

use slotmap::SlotMap;
use umbra_gfx::{
    basic::extent::GfxExtent2D,
    commands::barrier::GfxResourceState,
    device::{GfxDevice, GfxResourceHandle},
    error::{GfxError, GfxResult},
    resources::{GfxDescriptorHeapKind, GfxResourceDesc, GfxResourceShape, GfxResourceUsage, GfxViewDesc},
};

use crate::{
    descriptor_allocator::{DescriptorAllocator, DescriptorRange},
    handles::{GfxBufferHandle, GfxTextureHandle},
    resources::{GfxBuffer, GfxResourceViews, GfxTexture, GfxTextureKind},
};

/// 资源管理器
///
/// 持有所有的 buffer 与 texture，并负责它们在 bindless 表中的槽位。
/// 对外提供 slotmap 句柄；销毁是延迟的，以 graphics 队列的 fence 值为界：
/// GPU 内存与描述符槽位都在 fence 完成之后才真正释放。
pub struct GfxResourceManager {
    device: Arc<dyn GfxDevice>,

    buffers: SlotMap<GfxBufferHandle, GfxBuffer>,
    textures: SlotMap<GfxTextureHandle, GfxTexture>,

    /// 按 [`GfxDescriptorHeapKind::ALL`] 的顺序
    descriptors: [DescriptorAllocator; 3],

    // 待销毁队列
    // (resource, fence value)
    pending_destroy: Vec<(GfxResourceHandle, u64)>,

    destroyed: bool,
}

// new & init
impl GfxResourceManager {
    pub fn new(device: Arc<dyn GfxDevice>) -> Self {
        let capacity = device.descriptor_capacity();
        let descriptors = GfxDescriptorHeapKind::ALL.map(|heap| DescriptorAllocator::new(heap, capacity.of(heap)));
        log::info!(
            "create resource manager: cbv/srv/uav {}, rtv {}, dsv {}",
            capacity.cbv_srv_uav,
            capacity.rtv,
            capacity.dsv
        );

        Self {
            device,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            descriptors,
            pending_destroy: Vec::new(),
            destroyed: false,
        }
    }
}

// destroy
impl GfxResourceManager {
    /// 立即销毁所有资源，调用方保证 GPU 已经空闲
    pub fn destroy_mut(&mut self) {
        let _span = tracy_client::span!("GfxResourceManager::destroy_all");

        for (_, texture) in self.textures.drain() {
            if texture.kind != GfxTextureKind::External {
                self.device.destroy_resource(texture.resource);
            }
        }
        for (_, buffer) in self.buffers.drain() {
            self.device.destroy_resource(buffer.resource);
        }
        for (resource, _) in self.pending_destroy.drain(..) {
            self.device.destroy_resource(resource);
        }

        self.destroyed = true;
    }
}
impl Drop for GfxResourceManager {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            if !std::thread::panicking() {
                assert!(self.destroyed, "GfxResourceManager dropped without destroy_mut");
            }
        }
    }
}

// getters
impl GfxResourceManager {
    #[inline]
    pub fn descriptor_allocator(&self, heap: GfxDescriptorHeapKind) -> &DescriptorAllocator {
        &self.descriptors[Self::heap_slot(heap)]
    }

    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// 等待 GPU 完成后才会销毁的资源数
    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy.len()
    }
}

// Subsystem API
impl GfxResourceManager {
    /// 释放所有 fence 值不大于 `completed_value` 的资源与描述符槽位
    pub fn cleanup(&mut self, completed_value: u64) {
        let _span = tracy_client::span!("GfxResourceManager::cleanup");

        let mut resources_to_destroy = Vec::new();
        self.pending_destroy.retain(|(resource, fence_value)| {
            if *fence_value <= completed_value {
                resources_to_destroy.push(*resource);
                false
            } else {
                true
            }
        });
        for resource in resources_to_destroy {
            self.device.destroy_resource(resource);
        }

        for allocator in &mut self.descriptors {
            for range in allocator.recycle(completed_value) {
                for index in range.indices() {
                    self.device.clear_descriptor(range.heap, index);
                }
            }
        }
    }
}

// Buffer API
impl GfxResourceManager {
    pub fn create_buffer(&mut self, desc: &GfxResourceDesc) -> GfxResult<GfxBufferHandle> {
        if !desc.is_buffer() {
            return Err(GfxError::invalid_usage(format!("create_buffer: {} is not a buffer desc", desc.name)));
        }
        let resource = self.device.create_resource(desc)?;
        let views = self.create_views(resource, desc)?;
        let state =
            if desc.usage.contains(GfxResourceUsage::UPLOAD) { GfxResourceState::GenericRead } else { GfxResourceState::Undefined };

        log::debug!("create buffer {} ({} bytes)", desc.name, desc.byte_size());
        Ok(self.buffers.insert(GfxBuffer {
            resource,
            desc: desc.clone(),
            state,
            views,
        }))
    }

    pub fn get_buffer(&self, handle: GfxBufferHandle) -> Option<&GfxBuffer> {
        self.buffers.get(handle)
    }

    pub fn get_buffer_mut(&mut self, handle: GfxBufferHandle) -> Option<&mut GfxBuffer> {
        self.buffers.get_mut(handle)
    }

    #[track_caller]
    pub fn buffer(&self, handle: GfxBufferHandle) -> GfxResult<&GfxBuffer> {
        self.buffers.get(handle).ok_or_else(|| GfxError::invalid_handle(format!("unknown buffer {:?}", handle)))
    }

    #[track_caller]
    pub fn buffer_mut(&mut self, handle: GfxBufferHandle) -> GfxResult<&mut GfxBuffer> {
        self.buffers.get_mut(handle).ok_or_else(|| GfxError::invalid_handle(format!("unknown buffer {:?}", handle)))
    }

    /// 句柄立即失效；GPU 内存与描述符在 `fence_value` 完成后释放
    pub fn destroy_buffer(&mut self, handle: GfxBufferHandle, fence_value: u64) -> GfxResult<()> {
        let buffer = self
            .buffers
            .remove(handle)
            .ok_or_else(|| GfxError::invalid_handle(format!("destroy of unknown buffer {:?}", handle)))?;
        self.release_views(&buffer.views, fence_value)?;
        self.pending_destroy.push((buffer.resource, fence_value));
        Ok(())
    }
}

// Texture API
impl GfxResourceManager {
    pub fn create_texture(&mut self, desc: &GfxResourceDesc) -> GfxResult<GfxTextureHandle> {
        let kind = match desc.shape {
            GfxResourceShape::Buffer { .. } => {
                return Err(GfxError::invalid_usage(format!("create_texture: {} is not a texture desc", desc.name)));
            }
            GfxResourceShape::Texture2D { format, .. } if format.is_depth() => GfxTextureKind::DepthTarget,
            GfxResourceShape::Texture2D { .. } if desc.usage.contains(GfxResourceUsage::RENDER_TARGET) => {
                GfxTextureKind::RenderTarget
            }
            GfxResourceShape::Texture2D { .. } => GfxTextureKind::Texture,
        };

        let resource = self.device.create_resource(desc)?;
        let views = self.create_views(resource, desc)?;

        log::debug!("create texture {} {:?} ({:?})", desc.name, desc.extent(), kind);
        Ok(self.textures.insert(GfxTexture {
            resource,
            desc: desc.clone(),
            state: GfxResourceState::Undefined,
            views,
            kind,
        }))
    }

    /// 登记一个内存由外部持有的纹理（交换链 back buffer）
    ///
    /// 会按用途分配描述符，但销毁时不会释放 GPU 内存。
    pub fn register_external_texture(
        &mut self,
        resource: GfxResourceHandle,
        desc: &GfxResourceDesc,
        state: GfxResourceState,
    ) -> GfxResult<GfxTextureHandle> {
        let views = self.create_views_external(resource, desc)?;
        Ok(self.textures.insert(GfxTexture {
            resource,
            desc: desc.clone(),
            state,
            views,
            kind: GfxTextureKind::External,
        }))
    }

    pub fn get_texture(&self, handle: GfxTextureHandle) -> Option<&GfxTexture> {
        self.textures.get(handle)
    }

    pub fn get_texture_mut(&mut self, handle: GfxTextureHandle) -> Option<&mut GfxTexture> {
        self.textures.get_mut(handle)
    }

    #[track_caller]
    pub fn texture(&self, handle: GfxTextureHandle) -> GfxResult<&GfxTexture> {
        self.textures.get(handle).ok_or_else(|| GfxError::invalid_handle(format!("unknown texture {:?}", handle)))
    }

    #[track_caller]
    pub fn texture_mut(&mut self, handle: GfxTextureHandle) -> GfxResult<&mut GfxTexture> {
        self.textures.get_mut(handle).ok_or_else(|| GfxError::invalid_handle(format!("unknown texture {:?}", handle)))
    }

    /// 同时可变借用两张纹理，用于拷贝这类同时改变两者状态的操作
    #[track_caller]
    pub fn texture_pair_mut(
        &mut self,
        a: GfxTextureHandle,
        b: GfxTextureHandle,
    ) -> GfxResult<(&mut GfxTexture, &mut GfxTexture)> {
        match self.textures.get_disjoint_mut([a, b]) {
            Some([a, b]) => Ok((a, b)),
            None => Err(GfxError::invalid_handle(format!("texture pair {:?} / {:?} is invalid or aliased", a, b))),
        }
    }

    /// 句柄立即失效；外部纹理只释放描述符
    pub fn destroy_texture(&mut self, handle: GfxTextureHandle, fence_value: u64) -> GfxResult<()> {
        let texture = self
            .textures
            .remove(handle)
            .ok_or_else(|| GfxError::invalid_handle(format!("destroy of unknown texture {:?}", handle)))?;
        self.release_views(&texture.views, fence_value)?;
        if texture.kind != GfxTextureKind::External {
            self.pending_destroy.push((texture.resource, fence_value));
        }
        Ok(())
    }

    /// 以新的尺寸重建纹理的 GPU 内存
    ///
    /// 描述符索引与 epoch 都保持不变，只重写描述符内容；旧内存在 `fence_value` 完成后释放。
    pub fn resize_texture(&mut self, handle: GfxTextureHandle, extent: GfxExtent2D, fence_value: u64) -> GfxResult<()> {
        let device = self.device.clone();
        let texture = self.texture_mut(handle)?;
        if texture.kind == GfxTextureKind::External {
            return Err(GfxError::invalid_usage(format!("resize of external texture {}", texture.name())));
        }
        if texture.extent() == extent {
            return Ok(());
        }

        let mut desc = texture.desc.clone();
        if let GfxResourceShape::Texture2D { extent: e, .. } = &mut desc.shape {
            *e = extent;
        }
        let resource = device.create_resource(&desc)?;
        let mut written: Vec<(GfxViewDesc, DescriptorRange)> = Vec::new();
        for (view, range) in texture.views.iter() {
            if let Err(err) = device.write_descriptor(range.heap, range.start, resource, view) {
                // 已经改写的描述符指回旧内存
                for (view, range) in written {
                    if let Err(e) = device.write_descriptor(range.heap, range.start, texture.resource, view) {
                        log::error!("failed to restore {:?} view of {}: {}", view, texture.name(), e);
                    }
                }
                device.destroy_resource(resource);
                return Err(err);
            }
            written.push((view, range));
        }

        let old = std::mem::replace(&mut texture.resource, resource);
        texture.desc = desc;
        texture.state = GfxResourceState::Undefined;
        log::info!("resize texture {} to {}", texture.name(), extent);

        self.pending_destroy.push((old, fence_value));
        Ok(())
    }
}

// tools
impl GfxResourceManager {
    #[inline]
    fn heap_slot(heap: GfxDescriptorHeapKind) -> usize {
        match heap {
            GfxDescriptorHeapKind::CbvSrvUav => 0,
            GfxDescriptorHeapKind::Rtv => 1,
            GfxDescriptorHeapKind::Dsv => 2,
        }
    }

    /// 分配并写入视图；失败时回滚已经分配的槽位并销毁 `resource`
    fn create_views(&mut self, resource: GfxResourceHandle, desc: &GfxResourceDesc) -> GfxResult<GfxResourceViews> {
        self.create_views_external(resource, desc).inspect_err(|_| self.device.destroy_resource(resource))
    }

    /// 分配并写入视图；失败时只回滚槽位
    fn create_views_external(
        &mut self,
        resource: GfxResourceHandle,
        desc: &GfxResourceDesc,
    ) -> GfxResult<GfxResourceViews> {
        let mut views = GfxResourceViews::default();
        for view in GfxResourceViews::required(desc) {
            let allocator = &mut self.descriptors[Self::heap_slot(view.heap_kind())];
            let written = allocator.allocate(1).and_then(|range| {
                match self.device.write_descriptor(range.heap, range.start, resource, view) {
                    Ok(()) => Ok(range),
                    Err(err) => {
                        let _ = allocator.release_immediate(range);
                        Err(err)
                    }
                }
            });
            match written {
                Ok(range) => views.set(view, range),
                Err(err) => {
                    self.rollback_views(&views);
                    return Err(err);
                }
            }
        }
        Ok(views)
    }

    fn rollback_views(&mut self, views: &GfxResourceViews) {
        for (_, range) in views.iter() {
            self.device.clear_descriptor(range.heap, range.start);
            if let Err(err) = self.descriptors[Self::heap_slot(range.heap)].release_immediate(range) {
                log::error!("rollback of descriptor range failed: {}", err);
            }
        }
    }

    fn release_views(&mut self, views: &GfxResourceViews, fence_value: u64) -> GfxResult<()> {
        for (_, range) in views.iter() {
            self.release_range(range, fence_value)?;
        }
        Ok(())
    }

    #[inline]
    fn release_range(&mut self, range: DescriptorRange, fence_value: u64) -> GfxResult<()> {
        self.descriptors[Self::heap_slot(range.heap)].release(range, fence_value)
    }
}

#[cfg(test)]
mod tests {
    use umbra_gfx::{
        backend::headless::{HeadlessDevice, HeadlessExecutionMode},
        basic::format::GfxFormat,
        commands::graphics_context::GfxStateTracked,
        device::{GfxDescriptorCapacity, GfxDeviceDesc},
        error::GfxErrorKind,
        resources::GfxViewDesc,
    };

    use super::*;

    fn render_target_desc(extent: GfxExtent2D, name: &str) -> GfxResourceDesc {
        GfxResourceDesc::texture_2d(
            extent,
            GfxFormat::Rgba16Float,
            GfxResourceUsage::RENDER_TARGET | GfxResourceUsage::SHADER_RESOURCE,
            name,
        )
    }

    #[test]
    fn test_views_follow_usage() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut manager = GfxResourceManager::new(device.clone());

        let handle = manager.create_texture(&render_target_desc(GfxExtent2D::new(16, 16), "lit")).unwrap();
        let texture = manager.texture(handle).unwrap();
        assert_eq!(texture.kind(), GfxTextureKind::RenderTarget);
        assert!(texture.srv().is_some());
        assert!(texture.rtv().is_some());
        assert!(texture.dsv().is_none());

        let srv = texture.srv().unwrap();
        assert_eq!(device.descriptor(GfxDescriptorHeapKind::CbvSrvUav, srv.index), Some(texture.resource()));
        assert!(manager.descriptor_allocator(GfxDescriptorHeapKind::CbvSrvUav).is_live(srv));

        manager.destroy_mut();
    }

    #[test]
    fn test_destroy_is_deferred_until_fence() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut manager = GfxResourceManager::new(device.clone());

        let baseline = device.live_resource_count();
        let handle = manager.create_texture(&render_target_desc(GfxExtent2D::new(16, 16), "temp")).unwrap();
        let srv = manager.texture(handle).unwrap().srv().unwrap();

        manager.destroy_texture(handle, 3).unwrap();
        assert!(manager.get_texture(handle).is_none());
        assert!(!manager.descriptor_allocator(GfxDescriptorHeapKind::CbvSrvUav).is_live(srv));

        manager.cleanup(2);
        assert_eq!(device.live_resource_count(), baseline + 1);
        assert_eq!(manager.descriptor_allocator(GfxDescriptorHeapKind::CbvSrvUav).retiring_count(), 1);

        manager.cleanup(3);
        assert_eq!(device.live_resource_count(), baseline);
        assert_eq!(manager.descriptor_allocator(GfxDescriptorHeapKind::CbvSrvUav).retiring_count(), 0);
        assert_eq!(device.descriptor(GfxDescriptorHeapKind::CbvSrvUav, srv.index), None);

        assert_eq!(manager.destroy_texture(handle, 4).unwrap_err().kind(), GfxErrorKind::InvalidHandle);
        manager.destroy_mut();
    }

    #[test]
    fn test_resize_keeps_descriptor_indices() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut manager = GfxResourceManager::new(device.clone());

        let handle = manager.create_texture(&render_target_desc(GfxExtent2D::new(1920, 1080), "albedo")).unwrap();
        let (srv, rtv) = {
            let t = manager.texture(handle).unwrap();
            (t.srv().unwrap(), t.rtv().unwrap())
        };

        manager.resize_texture(handle, GfxExtent2D::new(1280, 720), 1).unwrap();
        let texture = manager.texture(handle).unwrap();
        assert_eq!(texture.extent(), GfxExtent2D::new(1280, 720));
        assert_eq!(texture.srv(), Some(srv));
        assert_eq!(texture.rtv(), Some(rtv));
        assert_eq!(texture.current_state(), GfxResourceState::Undefined);
        assert_eq!(device.descriptor(GfxDescriptorHeapKind::Rtv, rtv.index), Some(texture.resource()));
        assert_eq!(manager.pending_destroy_count(), 1);

        manager.cleanup(1);
        assert_eq!(manager.pending_destroy_count(), 0);
        manager.destroy_mut();
    }

    #[test]
    fn test_failed_resize_restores_descriptors() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut manager = GfxResourceManager::new(device.clone());

        let handle = manager.create_texture(&render_target_desc(GfxExtent2D::new(64, 64), "lit")).unwrap();
        let (old, srv, rtv) = {
            let t = manager.texture(handle).unwrap();
            (t.resource(), t.srv().unwrap(), t.rtv().unwrap())
        };
        let live = device.live_resource_count();

        // srv 写入成功，rtv 写入失败
        device.fail_descriptor_write_after(1);
        let err = manager.resize_texture(handle, GfxExtent2D::new(32, 32), 1).unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::InvalidUsage);

        let texture = manager.texture(handle).unwrap();
        assert_eq!(texture.resource(), old);
        assert_eq!(texture.extent(), GfxExtent2D::new(64, 64));
        assert_eq!(device.descriptor(GfxDescriptorHeapKind::CbvSrvUav, srv.index), Some(old));
        assert_eq!(device.descriptor(GfxDescriptorHeapKind::Rtv, rtv.index), Some(old));
        assert_eq!(device.live_resource_count(), live);
        assert_eq!(manager.pending_destroy_count(), 0);

        manager.destroy_mut();
    }

    #[test]
    fn test_out_of_descriptors_rolls_back() {
        let mut desc = GfxDeviceDesc::default();
        desc.descriptor_capacity = GfxDescriptorCapacity {
            cbv_srv_uav: 1,
            rtv: 4,
            dsv: 4,
        };
        let device = Arc::new(HeadlessDevice::new(&desc, HeadlessExecutionMode::Immediate));
        let mut manager = GfxResourceManager::new(device.clone());

        manager.create_texture(&render_target_desc(GfxExtent2D::new(4, 4), "first")).unwrap();
        let live = device.live_resource_count();

        let err = manager.create_texture(&render_target_desc(GfxExtent2D::new(4, 4), "second")).unwrap_err();
        assert_eq!(err.kind(), GfxErrorKind::OutOfDescriptors);
        assert_eq!(device.live_resource_count(), live);
        assert_eq!(manager.descriptor_allocator(GfxDescriptorHeapKind::Rtv).allocated_count(), 1);

        manager.destroy_mut();
    }

    #[test]
    fn test_buffer_views() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let mut manager = GfxResourceManager::new(device.clone());

        let handle = manager
            .create_buffer(&GfxResourceDesc::buffer(
                64,
                GfxResourceUsage::SHADER_RESOURCE | GfxResourceUsage::UNORDERED_ACCESS,
                "particles",
            ))
            .unwrap();
        let buffer = manager.buffer(handle).unwrap();
        assert!(buffer.cbv().is_none());
        assert_eq!(buffer.bindless_index(), buffer.srv().unwrap().index);
        assert_eq!(buffer.views().get(GfxViewDesc::UnorderedAccess).map(|r| r.count), Some(1));

        manager.destroy_mut();
    }
}
