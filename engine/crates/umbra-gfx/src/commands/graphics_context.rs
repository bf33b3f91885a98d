use crate::{
    basic::viewport::GfxViewport,
    commands::{
        barrier::{GfxBarrier, GfxBarrierBatch, GfxResourceState},
        command::{GFX_MAX_ROOT_CONSTANTS, GfxCommand, GfxRenderingDesc, GfxTopology},
    },
    device::{GfxCommandAllocatorHandle, GfxCommandListHandle, GfxPipelineHandle, GfxQueueType, GfxResourceHandle},
    error::{GfxError, GfxResult},
};

/// 能够记录自身当前状态的资源
///
/// context 通过它生成 barrier，并在生成的同时更新记录的状态。
pub trait GfxStateTracked {
    fn gfx_resource(&self) -> GfxResourceHandle;
    fn current_state(&self) -> GfxResourceState;
    fn set_current_state(&mut self, state: GfxResourceState);
}

/// 一个正在录制的 command list，以及尚未 flush 的 barrier
///
/// barrier 只会被攒起来，在下一条需要它们生效的命令之前一次性发出。
pub struct GfxGraphicsContext {
    queue_type: GfxQueueType,
    list: GfxCommandListHandle,
    allocator: GfxCommandAllocatorHandle,

    commands: Vec<GfxCommand>,
    barriers: GfxBarrierBatch,

    label_depth: u32,
    in_rendering: bool,
    name: String,
}

// new & init
impl GfxGraphicsContext {
    pub(crate) fn new(
        queue_type: GfxQueueType,
        list: GfxCommandListHandle,
        allocator: GfxCommandAllocatorHandle,
        name: impl Into<String>,
    ) -> Self {
        Self {
            queue_type,
            list,
            allocator,
            commands: Vec::new(),
            barriers: GfxBarrierBatch::new(),
            label_depth: 0,
            in_rendering: false,
            name: name.into(),
        }
    }

    /// 结束录制，交出 list、allocator 和命令流
    pub(crate) fn close(
        mut self,
    ) -> GfxResult<(GfxCommandListHandle, GfxCommandAllocatorHandle, Vec<GfxCommand>)> {
        self.flush_barriers();
        if self.in_rendering {
            return Err(GfxError::invalid_usage(format!("context {} closed inside a rendering scope", self.name)));
        }
        if self.label_depth != 0 {
            return Err(GfxError::invalid_usage(format!(
                "context {} closed with {} unbalanced labels",
                self.name, self.label_depth
            )));
        }
        Ok((self.list, self.allocator, self.commands))
    }

    /// close 失败时用于归还 list 与 allocator
    pub(crate) fn handles(&self) -> (GfxCommandListHandle, GfxCommandAllocatorHandle) {
        (self.list, self.allocator)
    }
}

// getters
impl GfxGraphicsContext {
    #[inline]
    pub fn queue_type(&self) -> GfxQueueType {
        self.queue_type
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 已经录制的命令（不含尚未 flush 的 barrier）
    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }

    #[inline]
    pub fn pending_barriers(&self) -> &[GfxBarrier] {
        self.barriers.pending()
    }
}

// barrier
impl GfxGraphicsContext {
    /// 将资源转换到 `after`，状态未变化时不产生 barrier
    ///
    /// UAV -> UAV 会产生一个 UAV barrier。
    pub fn transition(&mut self, resource: &mut impl GfxStateTracked, after: GfxResourceState) {
        let before = resource.current_state();
        if before == after && after != GfxResourceState::UnorderedAccess {
            return;
        }
        self.barriers.push(GfxBarrier::transition(resource.gfx_resource(), before, after));
        resource.set_current_state(after);
    }

    /// 不经过状态跟踪的转换，用于交换链 back buffer 等外部资源
    pub fn transition_raw(&mut self, resource: GfxResourceHandle, before: GfxResourceState, after: GfxResourceState) {
        self.barriers.push(GfxBarrier::transition(resource, before, after));
    }

    pub fn uav_barrier(&mut self, resource: GfxResourceHandle) {
        self.barriers.push(GfxBarrier::uav(resource));
    }

    /// 将攒下的 barrier 作为一条命令发出；没有 barrier 时什么也不做
    pub fn flush_barriers(&mut self) {
        if let Some(barriers) = self.barriers.flush() {
            self.commands.push(GfxCommand::Barriers(barriers));
        }
    }
}

// label
impl GfxGraphicsContext {
    pub fn begin_label(&mut self, label: impl Into<String>) {
        self.label_depth += 1;
        self.commands.push(GfxCommand::BeginLabel(label.into()));
    }

    pub fn end_label(&mut self) {
        if self.label_depth == 0 {
            log::warn!("context {}: end_label without begin_label", self.name);
            return;
        }
        self.label_depth -= 1;
        self.commands.push(GfxCommand::EndLabel);
    }
}

// draw
impl GfxGraphicsContext {
    pub fn begin_rendering(&mut self, desc: GfxRenderingDesc) -> GfxResult<()> {
        self.require_queue(GfxQueueType::Graphics, "begin_rendering")?;
        if self.in_rendering {
            return Err(GfxError::invalid_usage(format!("context {}: nested begin_rendering", self.name)));
        }
        self.flush_barriers();
        self.in_rendering = true;
        self.commands.push(GfxCommand::BeginRendering(desc));
        Ok(())
    }

    pub fn end_rendering(&mut self) {
        if !self.in_rendering {
            log::warn!("context {}: end_rendering without begin_rendering", self.name);
            return;
        }
        self.in_rendering = false;
        self.commands.push(GfxCommand::EndRendering);
    }

    pub fn set_viewport(&mut self, viewport: GfxViewport) {
        self.commands.push(GfxCommand::SetViewport(viewport));
    }

    pub fn set_topology(&mut self, topology: GfxTopology) {
        self.commands.push(GfxCommand::SetTopology(topology));
    }

    pub fn set_pipeline(&mut self, pipeline: GfxPipelineHandle) {
        self.commands.push(GfxCommand::SetPipeline(pipeline));
    }

    /// bindless 索引等少量数据，最多 [`GFX_MAX_ROOT_CONSTANTS`] 个 u32
    pub fn set_root_constants(&mut self, constants: &[u32]) -> GfxResult<()> {
        if constants.len() > GFX_MAX_ROOT_CONSTANTS {
            return Err(GfxError::invalid_usage(format!(
                "context {}: {} root constants exceed the limit of {}",
                self.name,
                constants.len(),
                GFX_MAX_ROOT_CONSTANTS
            )));
        }
        self.commands.push(GfxCommand::SetRootConstants(constants.to_vec()));
        Ok(())
    }

    /// 以 POD 结构体的形式设置 root constants
    pub fn set_root_constants_pod<T: bytemuck::Pod>(&mut self, constants: &T) -> GfxResult<()> {
        let bytes = bytemuck::bytes_of(constants);
        if bytes.len() % 4 != 0 {
            return Err(GfxError::invalid_usage(format!(
                "context {}: root constants must be a multiple of 4 bytes",
                self.name
            )));
        }
        let words = bytes.chunks_exact(4).map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect::<Vec<_>>();
        self.set_root_constants(&words)
    }

    pub fn set_index_buffer(&mut self, buffer: GfxResourceHandle, offset: u64) {
        self.commands.push(GfxCommand::SetIndexBuffer { buffer, offset });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> GfxResult<()> {
        self.require_rendering("draw")?;
        self.flush_barriers();
        self.commands.push(GfxCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> GfxResult<()> {
        self.require_rendering("draw_indexed")?;
        self.flush_barriers();
        self.commands.push(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> GfxResult<()> {
        if self.queue_type == GfxQueueType::Copy {
            return Err(GfxError::invalid_usage(format!("context {}: dispatch on a copy queue", self.name)));
        }
        if self.in_rendering {
            return Err(GfxError::invalid_usage(format!("context {}: dispatch inside a rendering scope", self.name)));
        }
        self.flush_barriers();
        self.commands.push(GfxCommand::Dispatch { x, y, z });
        Ok(())
    }
}

// copy
impl GfxGraphicsContext {
    pub fn copy_resource(&mut self, src: GfxResourceHandle, dst: GfxResourceHandle) -> GfxResult<()> {
        self.require_outside_rendering("copy_resource")?;
        self.flush_barriers();
        self.commands.push(GfxCommand::CopyResource { src, dst });
        Ok(())
    }

    pub fn copy_buffer_region(
        &mut self,
        src: GfxResourceHandle,
        src_offset: u64,
        dst: GfxResourceHandle,
        dst_offset: u64,
        size: u64,
    ) -> GfxResult<()> {
        self.require_outside_rendering("copy_buffer_region")?;
        self.flush_barriers();
        self.commands.push(GfxCommand::CopyBufferRegion {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        Ok(())
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: GfxResourceHandle,
        src_offset: u64,
        dst: GfxResourceHandle,
    ) -> GfxResult<()> {
        self.require_outside_rendering("copy_buffer_to_texture")?;
        self.flush_barriers();
        self.commands.push(GfxCommand::CopyBufferToTexture { src, src_offset, dst });
        Ok(())
    }
}

// tools
impl GfxGraphicsContext {
    fn require_queue(&self, queue_type: GfxQueueType, op: &str) -> GfxResult<()> {
        if self.queue_type != queue_type {
            return Err(GfxError::invalid_usage(format!(
                "context {}: {} requires a {:?} queue, got {:?}",
                self.name, op, queue_type, self.queue_type
            )));
        }
        Ok(())
    }

    fn require_rendering(&self, op: &str) -> GfxResult<()> {
        if !self.in_rendering {
            return Err(GfxError::invalid_usage(format!("context {}: {} outside a rendering scope", self.name, op)));
        }
        Ok(())
    }

    fn require_outside_rendering(&self, op: &str) -> GfxResult<()> {
        if self.in_rendering {
            return Err(GfxError::invalid_usage(format!("context {}: {} inside a rendering scope", self.name, op)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;
    use crate::basic::extent::GfxExtent2D;

    struct Tracked {
        handle: GfxResourceHandle,
        state: GfxResourceState,
    }

    impl GfxStateTracked for Tracked {
        fn gfx_resource(&self) -> GfxResourceHandle {
            self.handle
        }
        fn current_state(&self) -> GfxResourceState {
            self.state
        }
        fn set_current_state(&mut self, state: GfxResourceState) {
            self.state = state;
        }
    }

    fn context(queue_type: GfxQueueType) -> GfxGraphicsContext {
        let mut lists = SlotMap::<GfxCommandListHandle, ()>::with_key();
        let mut allocators = SlotMap::<GfxCommandAllocatorHandle, ()>::with_key();
        GfxGraphicsContext::new(queue_type, lists.insert(()), allocators.insert(()), "test")
    }

    fn tracked(state: GfxResourceState) -> Tracked {
        let mut map = SlotMap::<GfxResourceHandle, ()>::with_key();
        Tracked {
            handle: map.insert(()),
            state,
        }
    }

    #[test]
    fn test_transition_updates_state_and_batches() {
        let mut ctx = context(GfxQueueType::Graphics);
        let mut rt = tracked(GfxResourceState::ShaderResource);

        ctx.transition(&mut rt, GfxResourceState::RenderTarget);
        ctx.transition(&mut rt, GfxResourceState::RenderTarget);
        assert_eq!(rt.state, GfxResourceState::RenderTarget);
        assert_eq!(ctx.pending_barriers().len(), 1);
        assert!(ctx.commands().is_empty());

        ctx.begin_rendering(GfxRenderingDesc {
            colors: vec![],
            depth: None,
            extent: GfxExtent2D::new(4, 4),
        })
        .unwrap();
        assert!(ctx.pending_barriers().is_empty());
        assert!(matches!(ctx.commands()[0], GfxCommand::Barriers(ref b) if b.len() == 1));
        assert!(matches!(ctx.commands()[1], GfxCommand::BeginRendering(_)));
    }

    #[test]
    fn test_flush_without_barriers_records_nothing() {
        let mut ctx = context(GfxQueueType::Graphics);
        ctx.flush_barriers();
        ctx.flush_barriers();
        assert!(ctx.commands().is_empty());
    }

    #[test]
    fn test_root_constant_limit() {
        let mut ctx = context(GfxQueueType::Graphics);
        assert!(ctx.set_root_constants(&[0; GFX_MAX_ROOT_CONSTANTS]).is_ok());
        let err = ctx.set_root_constants(&[0; GFX_MAX_ROOT_CONSTANTS + 1]).unwrap_err();
        assert_eq!(err.kind(), crate::error::GfxErrorKind::InvalidUsage);
    }

    #[test]
    fn test_draw_requires_rendering_scope() {
        let mut ctx = context(GfxQueueType::Graphics);
        assert!(ctx.draw(3, 1, 0, 0).is_err());
    }

    #[test]
    fn test_copy_queue_rejects_dispatch_and_rendering() {
        let mut ctx = context(GfxQueueType::Copy);
        assert!(ctx.dispatch(1, 1, 1).is_err());
        assert!(
            ctx.begin_rendering(GfxRenderingDesc {
                colors: vec![],
                depth: None,
                extent: GfxExtent2D::new(1, 1),
            })
            .is_err()
        );
    }

    #[test]
    fn test_unbalanced_label_fails_close() {
        let mut ctx = context(GfxQueueType::Graphics);
        ctx.begin_label("shadow");
        assert!(ctx.close().is_err());
    }
}
