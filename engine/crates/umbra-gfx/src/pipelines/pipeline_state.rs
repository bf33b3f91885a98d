use std::{sync::Arc, thread};

use crossbeam_channel::Receiver;

use crate::{
    device::{GfxDevice, GfxPipelineHandle},
    error::{GfxError, GfxResult},
    pipelines::{
        desc::{GfxComputePipelineDesc, GfxGraphicsPipelineDesc},
        shader_library::ShaderLibrary,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfxPipelineKind {
    Graphics,
    Compute,
}

/// 可绑定的管线对象
///
/// # Destroy
/// 需要手动调用 [`GfxPipelineState::destroy`]
pub struct GfxPipelineState {
    device: Arc<dyn GfxDevice>,
    handle: GfxPipelineHandle,
    kind: GfxPipelineKind,
    name: String,
}

// new & init
impl GfxPipelineState {
    pub fn new_graphics(
        device: Arc<dyn GfxDevice>,
        library: &ShaderLibrary,
        desc: &GfxGraphicsPipelineDesc,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxPipelineState::new_graphics");
        let vs = library.load(&desc.vs)?;
        let ps = library.load(&desc.ps)?;
        let handle = device.create_graphics_pipeline(desc, &vs, &ps)?;
        log::info!("create graphics pipeline: {}", desc.name);

        Ok(Self {
            device,
            handle,
            kind: GfxPipelineKind::Graphics,
            name: desc.name.clone(),
        })
    }

    pub fn new_compute(
        device: Arc<dyn GfxDevice>,
        library: &ShaderLibrary,
        desc: &GfxComputePipelineDesc,
    ) -> GfxResult<Self> {
        let cs = library.load(&desc.cs)?;
        let handle = device.create_compute_pipeline(desc, &cs)?;
        log::info!("create compute pipeline: {}", desc.name);

        Ok(Self {
            device,
            handle,
            kind: GfxPipelineKind::Compute,
            name: desc.name.clone(),
        })
    }

    /// 在工作线程上创建，首次 [`GfxPendingPipeline::get`] 时等待完成
    pub fn new_graphics_async(
        device: Arc<dyn GfxDevice>,
        library: Arc<ShaderLibrary>,
        desc: GfxGraphicsPipelineDesc,
    ) -> GfxPendingPipeline {
        let name = desc.name.clone();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let spawned = thread::Builder::new().name(format!("pso-{}", name)).spawn(move || {
            let result = Self::new_graphics(device, &library, &desc);
            // 接收端可能已经被丢弃，此时结果也不再需要
            let _ = tx.send(result);
        });

        match spawned {
            Ok(_) => GfxPendingPipeline {
                name,
                state: PendingState::Building(rx),
            },
            Err(err) => GfxPendingPipeline {
                name: name.clone(),
                state: PendingState::Failed(GfxError::resource_creation(format!(
                    "failed to spawn pipeline worker for {}: {}",
                    name, err
                ))),
            },
        }
    }
}

// destroy
impl GfxPipelineState {
    pub fn destroy(self) {
        self.device.destroy_pipeline(self.handle);
    }
}

// getters
impl GfxPipelineState {
    #[inline]
    pub fn handle(&self) -> GfxPipelineHandle {
        self.handle
    }

    #[inline]
    pub fn kind(&self) -> GfxPipelineKind {
        self.kind
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

enum PendingState {
    Building(Receiver<GfxResult<GfxPipelineState>>),
    Ready(GfxPipelineState),
    Failed(GfxError),
    /// 已经通过 `into_ready` 取走
    Taken,
}

/// 正在工作线程上创建的管线
pub struct GfxPendingPipeline {
    name: String,
    state: PendingState,
}

impl GfxPendingPipeline {
    /// 直接包装一个已经创建好的管线
    pub fn ready(pipeline: GfxPipelineState) -> Self {
        Self {
            name: pipeline.name().to_string(),
            state: PendingState::Ready(pipeline),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 首次调用时阻塞等待工作线程
    pub fn get(&mut self) -> GfxResult<&GfxPipelineState> {
        self.join();
        match &self.state {
            PendingState::Ready(pipeline) => Ok(pipeline),
            PendingState::Failed(err) => Err(err.clone()),
            PendingState::Building(_) | PendingState::Taken => {
                Err(GfxError::invalid_usage(format!("pipeline {} is not available", self.name)))
            }
        }
    }

    pub fn into_ready(mut self) -> GfxResult<GfxPipelineState> {
        self.join();
        match std::mem::replace(&mut self.state, PendingState::Taken) {
            PendingState::Ready(pipeline) => Ok(pipeline),
            PendingState::Failed(err) => Err(err),
            PendingState::Building(_) | PendingState::Taken => {
                Err(GfxError::invalid_usage(format!("pipeline {} is not available", self.name)))
            }
        }
    }

    /// 销毁已经完成的管线；仍在创建中的会先等待完成
    pub fn destroy(self) {
        if let Ok(pipeline) = self.into_ready() {
            pipeline.destroy();
        }
    }

    fn join(&mut self) {
        if let PendingState::Building(rx) = &self.state {
            let result = rx.recv().unwrap_or_else(|_| {
                Err(GfxError::resource_creation(format!("pipeline worker for {} exited without a result", self.name)))
            });
            self.state = match result {
                Ok(pipeline) => PendingState::Ready(pipeline),
                Err(err) => PendingState::Failed(err),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::headless::{HeadlessDevice, HeadlessExecutionMode},
        basic::format::GfxFormat,
        error::GfxErrorKind,
    };

    #[test]
    fn test_async_pipeline_joins_on_first_use() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let library = Arc::new(ShaderLibrary::synthetic());
        let desc = GfxGraphicsPipelineDesc::fullscreen("post", "post.ps", GfxFormat::Rgba8Unorm);

        let mut pending = GfxPipelineState::new_graphics_async(device.clone(), library, desc);
        let handle = pending.get().unwrap().handle();
        assert_eq!(pending.get().unwrap().handle(), handle);
        assert_eq!(device.pipeline_count(), 1);

        pending.destroy();
        assert_eq!(device.pipeline_count(), 0);
    }

    #[test]
    fn test_missing_shader_fails_pipeline() {
        let device = HeadlessDevice::with_mode(HeadlessExecutionMode::Immediate);
        let library = Arc::new(ShaderLibrary::in_memory());
        let desc = GfxGraphicsPipelineDesc::new("geometry", "geometry.vs", "geometry.ps");

        let mut pending = GfxPipelineState::new_graphics_async(device.clone(), library, desc);
        let kind = pending.get().err().map(|err| err.kind());
        assert_eq!(kind, Some(GfxErrorKind::ShaderNotFound));
        assert_eq!(device.pipeline_count(), 0);
    }
}
