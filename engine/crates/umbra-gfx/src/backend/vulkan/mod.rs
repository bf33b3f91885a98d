//! Vulkan 1.3 后端
//!
//! - fence 使用 timeline semaphore 实现
//! - 三种逻辑队列映射到同一个 graphics | compute 的 vk queue，提交顺序即执行顺序
//! - barrier 使用 synchronization2，渲染使用 dynamic rendering
//! - 所有资源通过一个 bindless descriptor set 访问

mod bindless;
mod convert;
mod instance;
mod physical_device;
mod pipeline;
mod recorder;
mod resources;
mod swapchain;

use std::{
    ffi::CString,
    mem::ManuallyDrop,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use ash::{prelude::VkResult, vk};
use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    backend::vulkan::{
        bindless::VulkanBindless, instance::VulkanInstance, physical_device::VulkanPhysicalDevice,
        pipeline::VulkanPipeline, recorder::VulkanRecorder, resources::VulkanResource, swapchain::VulkanSwapchain,
    },
    basic::extent::GfxExtent2D,
    commands::command::GfxCommand,
    device::{
        GfxBackendKind, GfxCommandAllocatorHandle, GfxCommandListHandle, GfxDescriptorCapacity, GfxDevice,
        GfxDeviceDesc, GfxFenceHandle, GfxPipelineHandle, GfxQueueType, GfxResourceHandle, GfxSwapchainHandle,
    },
    error::{GfxError, GfxErrorKind, GfxResult},
    pipelines::desc::{GfxComputePipelineDesc, GfxGraphicsPipelineDesc},
    resources::{GfxDescriptorHeapKind, GfxResourceDesc, GfxViewDesc},
    swapchain::{GfxPresentMode, GfxSwapchainDesc},
};

/// 将 `VkResult` 转换为带出错位置的 [`GfxResult`]
pub(crate) trait VkResultExt<T> {
    fn or_gfx(self, kind: GfxErrorKind, what: &str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    #[track_caller]
    fn or_gfx(self, kind: GfxErrorKind, what: &str) -> GfxResult<T> {
        match self {
            Ok(value) => Ok(value),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GfxError::device_lost(format!("{}: device lost", what))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(GfxError::swapchain_out_of_date(format!("{}: swapchain out of date", what)))
            }
            Err(err) => Err(GfxError::new(kind, format!("{}: {:?}", what, err))),
        }
    }
}

struct VulkanCommandAllocator {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    /// 自上次 reset 以来已经使用的 command buffer 数量
    used: usize,
}

struct VulkanCommandList {
    queue: GfxQueueType,
    cmd: Option<vk::CommandBuffer>,
}

struct VulkanSwapchainEntry {
    swapchain: VulkanSwapchain,
    back_buffers: Vec<GfxResourceHandle>,
}

/// 需要互斥访问的部分：vk queue 以及所有对象表
struct VulkanState {
    queue: vk::Queue,
    fences: SlotMap<GfxFenceHandle, vk::Semaphore>,
    allocators: SlotMap<GfxCommandAllocatorHandle, VulkanCommandAllocator>,
    lists: SlotMap<GfxCommandListHandle, VulkanCommandList>,
    resources: SlotMap<GfxResourceHandle, VulkanResource>,
    pipelines: SlotMap<GfxPipelineHandle, VulkanPipeline>,
    swapchains: SlotMap<GfxSwapchainHandle, VulkanSwapchainEntry>,
    rtv_table: Vec<Option<GfxResourceHandle>>,
    dsv_table: Vec<Option<GfxResourceHandle>>,
    bindless: Option<VulkanBindless>,
    /// 每个逻辑队列下一次提交需要等待的 semaphore 与值；binary semaphore 的值为 0
    pending_waits: [Vec<(vk::Semaphore, u64)>; 3],
}

pub struct VulkanDevice {
    instance: VulkanInstance,
    pdevice: VulkanPhysicalDevice,
    device: ash::Device,
    allocator: ManuallyDrop<vk_mem::Allocator>,

    debug_utils: Option<ash::ext::debug_utils::Device>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: Option<ash::khr::swapchain::Device>,

    descriptor_capacity: GfxDescriptorCapacity,
    state: Mutex<VulkanState>,
}

// new & init
impl VulkanDevice {
    pub fn new(desc: &GfxDeviceDesc) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanDevice::new");

        let mut instance = VulkanInstance::new(&desc.app_name, desc.enable_validation, desc.display_handle)?;
        match Self::new_with_instance(&instance, desc) {
            Ok((pdevice, device, allocator, state)) => {
                let debug_utils = instance
                    .debug_utils
                    .as_ref()
                    .map(|_| ash::ext::debug_utils::Device::new(&instance.instance, &device));
                let surface_loader = ash::khr::surface::Instance::new(&instance.entry, &instance.instance);
                let swapchain_loader = desc
                    .display_handle
                    .is_some()
                    .then(|| ash::khr::swapchain::Device::new(&instance.instance, &device));

                log::info!("vulkan device created on {}", pdevice.name());
                Ok(Self {
                    instance,
                    pdevice,
                    device,
                    allocator: ManuallyDrop::new(allocator),
                    debug_utils,
                    surface_loader,
                    swapchain_loader,
                    descriptor_capacity: desc.descriptor_capacity,
                    state: Mutex::new(state),
                })
            }
            Err(err) => {
                instance.destroy();
                Err(err)
            }
        }
    }

    fn new_with_instance(
        instance: &VulkanInstance,
        desc: &GfxDeviceDesc,
    ) -> GfxResult<(VulkanPhysicalDevice, ash::Device, vk_mem::Allocator, VulkanState)> {
        let pdevice = VulkanPhysicalDevice::pick(&instance.instance)?;

        let mut exts = Vec::new();
        if desc.display_handle.is_some() {
            if !pdevice.supports_extension(ash::khr::swapchain::NAME) {
                return Err(GfxError::device_creation(format!("{} does not support swapchain", pdevice.name())));
            }
            exts.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let queue_priorities = [1.0];
        let queue_ci = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(pdevice.queue_family_index)
            .queue_priorities(&queue_priorities);

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_image_array_non_uniform_indexing(true)
            .shader_storage_buffer_array_non_uniform_indexing(true);
        let mut features13 =
            vk::PhysicalDeviceVulkan13Features::default().synchronization2(true).dynamic_rendering(true);

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_ci))
            .enabled_extension_names(&exts)
            .push_next(&mut features12)
            .push_next(&mut features13);
        let device = unsafe { instance.instance.create_device(pdevice.handle, &device_ci, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_device")?;
        let queue = unsafe { device.get_device_queue(pdevice.queue_family_index, 0) };

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&instance.instance, &device, pdevice.handle);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = match unsafe { vk_mem::Allocator::new(vma_ci) } {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(GfxError::device_creation(format!("vk_mem::Allocator::new: {:?}", err)));
            }
        };

        let bindless = match VulkanBindless::new(&device, desc.descriptor_capacity.cbv_srv_uav) {
            Ok(bindless) => bindless,
            Err(err) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(err);
            }
        };

        let state = VulkanState {
            queue,
            fences: SlotMap::with_key(),
            allocators: SlotMap::with_key(),
            lists: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            swapchains: SlotMap::with_key(),
            rtv_table: vec![None; desc.descriptor_capacity.rtv as usize],
            dsv_table: vec![None; desc.descriptor_capacity.dsv as usize],
            bindless: Some(bindless),
            pending_waits: Default::default(),
        };
        Ok((pdevice, device, allocator, state))
    }
}

// destroy
impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("destroying vulkan device");
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during destroy: {:?}", err);
            }
        }

        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !state.resources.is_empty() || !state.pipelines.is_empty() {
            log::warn!(
                "vulkan device dropped with {} resources and {} pipelines alive",
                state.resources.len(),
                state.pipelines.len()
            );
        }

        unsafe {
            for (_, entry) in state.swapchains.drain() {
                if let Some(loader) = self.swapchain_loader.as_ref() {
                    entry.swapchain.destroy(&self.surface_loader, loader, &self.device);
                }
            }
            for (_, resource) in state.resources.drain() {
                resource.destroy(&self.device, &self.allocator);
            }
            for (_, pipeline) in state.pipelines.drain() {
                pipeline.destroy(&self.device);
            }
            for (_, allocator) in state.allocators.drain() {
                self.device.destroy_command_pool(allocator.pool, None);
            }
            for (_, semaphore) in state.fences.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            if let Some(bindless) = state.bindless.take() {
                bindless.destroy(&self.device);
            }

            // vma 需要在 device 之前销毁
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        self.instance.destroy();
    }
}

// tools
impl VulkanDevice {
    fn lock_state(&self) -> MutexGuard<'_, VulkanState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = self.debug_utils.as_ref() else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(&name);
        unsafe {
            if let Err(err) = debug_utils.set_debug_utils_object_name(&name_info) {
                log::warn!("failed to set debug name {:?}: {:?}", name, err);
            }
        }
    }

    /// 在逻辑队列上提交，消耗该队列上挂起的 wait
    fn submit(
        &self,
        state: &mut VulkanState,
        queue: GfxQueueType,
        cmds: &[vk::CommandBuffer],
        signals: &[vk::SemaphoreSubmitInfo],
    ) -> GfxResult<()> {
        let waits = std::mem::take(&mut state.pending_waits[queue.index()])
            .into_iter()
            .map(|(semaphore, value)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .value(value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect_vec();
        let cmd_infos = cmds.iter().map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd)).collect_vec();
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&cmd_infos)
            .signal_semaphore_infos(signals);
        unsafe { self.device.queue_submit2(state.queue, std::slice::from_ref(&submit_info), vk::Fence::null()) }
            .or_gfx(GfxErrorKind::Submission, "queue_submit2")
    }

    fn fence_semaphore(state: &VulkanState, fence: GfxFenceHandle) -> GfxResult<vk::Semaphore> {
        state.fences.get(fence).copied().ok_or_else(|| GfxError::invalid_handle(format!("fence {:?}", fence)))
    }

    fn pipeline_layout(&self) -> GfxResult<vk::PipelineLayout> {
        self.lock_state()
            .bindless
            .as_ref()
            .map(|bindless| bindless.pipeline_layout)
            .ok_or_else(|| GfxError::invalid_usage("bindless set is destroyed"))
    }

    fn insert_back_buffers(
        &self,
        state: &mut VulkanState,
        swapchain: &VulkanSwapchain,
    ) -> GfxResult<Vec<GfxResourceHandle>> {
        swapchain
            .images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                let name = format!("back-buffer-{}", idx);
                let resource =
                    VulkanResource::from_swapchain_image(&self.device, *image, swapchain.format, swapchain.extent, name)?;
                Ok(state.resources.insert(resource))
            })
            .collect()
    }
}

impl GfxDevice for VulkanDevice {
    fn backend(&self) -> GfxBackendKind {
        GfxBackendKind::Vulkan
    }

    fn adapter_name(&self) -> String {
        self.pdevice.name()
    }

    fn descriptor_capacity(&self) -> GfxDescriptorCapacity {
        self.descriptor_capacity
    }

    fn create_fence(&self, name: &str) -> GfxResult<GfxFenceHandle> {
        let mut timeline_ci =
            vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::TIMELINE).initial_value(0);
        let semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_ci);
        let semaphore = unsafe { self.device.create_semaphore(&semaphore_ci, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_semaphore")?;
        self.set_debug_name(semaphore, &format!("Fence::{}", name));
        Ok(self.lock_state().fences.insert(semaphore))
    }

    fn destroy_fence(&self, fence: GfxFenceHandle) {
        if let Some(semaphore) = self.lock_state().fences.remove(fence) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn fence_completed_value(&self, fence: GfxFenceHandle) -> GfxResult<u64> {
        let semaphore = Self::fence_semaphore(&self.lock_state(), fence)?;
        unsafe { self.device.get_semaphore_counter_value(semaphore) }
            .or_gfx(GfxErrorKind::Submission, "get_semaphore_counter_value")
    }

    fn wait_fence(&self, fence: GfxFenceHandle, value: u64, timeout: Option<Duration>) -> GfxResult<bool> {
        // 等待期间不持有锁，其他线程仍然可以提交
        let semaphore = Self::fence_semaphore(&self.lock_state(), fence)?;
        let timeout_ns = timeout.map_or(u64::MAX, |timeout| timeout.as_nanos().min(u64::MAX as u128) as u64);
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(std::slice::from_ref(&semaphore))
            .values(std::slice::from_ref(&value));
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err).or_gfx(GfxErrorKind::Submission, "wait_semaphores"),
        }
    }

    fn queue_submit(&self, queue: GfxQueueType, lists: &[GfxCommandListHandle]) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanDevice::queue_submit");
        let mut state = self.lock_state();
        let cmds = lists
            .iter()
            .map(|list| {
                let vk_list =
                    state.lists.get(*list).ok_or_else(|| GfxError::invalid_handle(format!("command list {:?}", list)))?;
                if vk_list.queue != queue {
                    return Err(GfxError::invalid_usage(format!(
                        "command list for {:?} submitted to {:?}",
                        vk_list.queue, queue
                    )));
                }
                vk_list.cmd.ok_or_else(|| GfxError::invalid_usage(format!("command list {:?} is not recorded", list)))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        self.submit(&mut state, queue, &cmds, &[])
    }

    fn queue_signal(&self, queue: GfxQueueType, fence: GfxFenceHandle, value: u64) -> GfxResult<()> {
        let mut state = self.lock_state();
        let semaphore = Self::fence_semaphore(&state, fence)?;
        let signal = vk::SemaphoreSubmitInfo::default()
            .semaphore(semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        self.submit(&mut state, queue, &[], std::slice::from_ref(&signal))
    }

    fn queue_wait(&self, queue: GfxQueueType, fence: GfxFenceHandle, value: u64) -> GfxResult<()> {
        let mut state = self.lock_state();
        let semaphore = Self::fence_semaphore(&state, fence)?;
        state.pending_waits[queue.index()].push((semaphore, value));
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanDevice::wait_idle");
        // device_wait_idle 要求外部同步所有 queue
        let _state = self.lock_state();
        unsafe { self.device.device_wait_idle() }.or_gfx(GfxErrorKind::Submission, "device_wait_idle")
    }

    fn create_command_allocator(&self, queue: GfxQueueType, name: &str) -> GfxResult<GfxCommandAllocatorHandle> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.pdevice.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { self.device.create_command_pool(&pool_ci, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_command_pool")?;
        self.set_debug_name(pool, &format!("CommandPool::{:?}::{}", queue, name));
        Ok(self.lock_state().allocators.insert(VulkanCommandAllocator {
            pool,
            buffers: vec![],
            used: 0,
        }))
    }

    fn reset_command_allocator(&self, allocator: GfxCommandAllocatorHandle) -> GfxResult<()> {
        let mut state = self.lock_state();
        let vk_allocator = state
            .allocators
            .get_mut(allocator)
            .ok_or_else(|| GfxError::invalid_handle(format!("command allocator {:?}", allocator)))?;
        unsafe { self.device.reset_command_pool(vk_allocator.pool, vk::CommandPoolResetFlags::empty()) }
            .or_gfx(GfxErrorKind::Submission, "reset_command_pool")?;
        vk_allocator.used = 0;
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: GfxCommandAllocatorHandle) {
        let mut state = self.lock_state();
        if let Some(vk_allocator) = state.allocators.remove(allocator) {
            let buffers = vk_allocator.buffers.iter().copied().collect::<std::collections::HashSet<_>>();
            // 还引用着这些 command buffer 的 list 失效
            for (_, list) in state.lists.iter_mut() {
                if list.cmd.is_some_and(|cmd| buffers.contains(&cmd)) {
                    list.cmd = None;
                }
            }
            unsafe { self.device.destroy_command_pool(vk_allocator.pool, None) };
        }
    }

    fn create_command_list(&self, queue: GfxQueueType, _name: &str) -> GfxResult<GfxCommandListHandle> {
        Ok(self.lock_state().lists.insert(VulkanCommandList { queue, cmd: None }))
    }

    fn record_command_list(
        &self,
        list: GfxCommandListHandle,
        allocator: GfxCommandAllocatorHandle,
        commands: &[GfxCommand],
    ) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanDevice::record_command_list");
        let mut guard = self.lock_state();
        let state = &mut *guard;

        if !state.lists.contains_key(list) {
            return Err(GfxError::invalid_handle(format!("command list {:?}", list)));
        }
        let vk_allocator = state
            .allocators
            .get_mut(allocator)
            .ok_or_else(|| GfxError::invalid_handle(format!("command allocator {:?}", allocator)))?;

        if vk_allocator.used == vk_allocator.buffers.len() {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(vk_allocator.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
                .or_gfx(GfxErrorKind::ResourceCreation, "allocate_command_buffers")?;
            vk_allocator.buffers.extend(buffers);
        }
        let cmd = vk_allocator.buffers[vk_allocator.used];
        vk_allocator.used += 1;

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .or_gfx(GfxErrorKind::Submission, "begin_command_buffer")?;

        let bindless =
            state.bindless.as_ref().ok_or_else(|| GfxError::invalid_usage("bindless set is destroyed"))?;
        let mut recorder = VulkanRecorder::new(
            &self.device,
            self.debug_utils.as_ref(),
            &state.resources,
            &state.pipelines,
            &state.rtv_table,
            &state.dsv_table,
            bindless,
            cmd,
        );
        let recorded = recorder.record(commands);
        let ended = unsafe { self.device.end_command_buffer(cmd) }.or_gfx(GfxErrorKind::Submission, "end_command_buffer");
        recorded?;
        ended?;

        if let Some(vk_list) = state.lists.get_mut(list) {
            vk_list.cmd = Some(cmd);
        }
        Ok(())
    }

    fn destroy_command_list(&self, list: GfxCommandListHandle) {
        // command buffer 属于 allocator，随 pool 一起释放
        self.lock_state().lists.remove(list);
    }

    fn create_resource(&self, desc: &GfxResourceDesc) -> GfxResult<GfxResourceHandle> {
        let _span = tracy_client::span!("VulkanDevice::create_resource");
        let resource = VulkanResource::new(&self.device, &self.allocator, desc)?;
        match (resource.vk_buffer(), resource.vk_image()) {
            (Some(buffer), _) => self.set_debug_name(buffer, &format!("Buffer::{}", desc.name)),
            (_, Some((image, view, _, _))) => {
                self.set_debug_name(image, &format!("Image::{}", desc.name));
                self.set_debug_name(view, &format!("ImageView::{}", desc.name));
            }
            _ => {}
        }
        Ok(self.lock_state().resources.insert(resource))
    }

    fn destroy_resource(&self, resource: GfxResourceHandle) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if let Some(vk_resource) = state.resources.remove(resource) {
            for slot in state.rtv_table.iter_mut().chain(state.dsv_table.iter_mut()) {
                if *slot == Some(resource) {
                    *slot = None;
                }
            }
            vk_resource.destroy(&self.device, &self.allocator);
        }
    }

    fn write_resource(&self, resource: GfxResourceHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut state = self.lock_state();
        let vk_resource = state
            .resources
            .get_mut(resource)
            .ok_or_else(|| GfxError::invalid_handle(format!("resource {:?}", resource)))?;
        vk_resource.write(&self.allocator, offset, data)
    }

    fn live_resource_count(&self) -> usize {
        self.lock_state().resources.len()
    }

    fn write_descriptor(
        &self,
        heap: GfxDescriptorHeapKind,
        index: u32,
        resource: GfxResourceHandle,
        view: GfxViewDesc,
    ) -> GfxResult<()> {
        if view.heap_kind() != heap {
            return Err(GfxError::invalid_usage(format!("{:?} view can not be written to {:?} heap", view, heap)));
        }

        let mut guard = self.lock_state();
        let state = &mut *guard;
        let vk_resource =
            state.resources.get(resource).ok_or_else(|| GfxError::invalid_handle(format!("resource {:?}", resource)))?;
        if !vk_resource.desc.usage.contains(view.required_usage()) {
            return Err(GfxError::invalid_usage(format!(
                "{} lacks {:?} usage for {:?} view",
                vk_resource.desc.name,
                view.required_usage(),
                view
            )));
        }

        let table = match heap {
            GfxDescriptorHeapKind::CbvSrvUav => {
                let bindless =
                    state.bindless.as_ref().ok_or_else(|| GfxError::invalid_usage("bindless set is destroyed"))?;
                return bindless.write(&self.device, index, vk_resource, view);
            }
            GfxDescriptorHeapKind::Rtv => &mut state.rtv_table,
            GfxDescriptorHeapKind::Dsv => &mut state.dsv_table,
        };
        let slot = table
            .get_mut(index as usize)
            .ok_or_else(|| GfxError::invalid_usage(format!("{:?} index {} out of range", heap, index)))?;
        *slot = Some(resource);
        Ok(())
    }

    fn clear_descriptor(&self, heap: GfxDescriptorHeapKind, index: u32) {
        let mut state = self.lock_state();
        let table = match heap {
            // partially bound：槽位失效后 shader 不会再访问，旧的描述符留在原处即可
            GfxDescriptorHeapKind::CbvSrvUav => return,
            GfxDescriptorHeapKind::Rtv => &mut state.rtv_table,
            GfxDescriptorHeapKind::Dsv => &mut state.dsv_table,
        };
        if let Some(slot) = table.get_mut(index as usize) {
            *slot = None;
        }
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GfxGraphicsPipelineDesc,
        vs: &[u8],
        ps: &[u8],
    ) -> GfxResult<GfxPipelineHandle> {
        // 编译管线期间不持有锁
        let layout = self.pipeline_layout()?;
        let pipeline = VulkanPipeline::new_graphics(&self.device, layout, desc, vs, ps)?;
        self.set_debug_name(pipeline.pipeline, &format!("Pipeline::{}", desc.name));
        Ok(self.lock_state().pipelines.insert(pipeline))
    }

    fn create_compute_pipeline(&self, desc: &GfxComputePipelineDesc, cs: &[u8]) -> GfxResult<GfxPipelineHandle> {
        let layout = self.pipeline_layout()?;
        let pipeline = VulkanPipeline::new_compute(&self.device, layout, desc, cs)?;
        self.set_debug_name(pipeline.pipeline, &format!("Pipeline::{}", desc.name));
        Ok(self.lock_state().pipelines.insert(pipeline))
    }

    fn destroy_pipeline(&self, pipeline: GfxPipelineHandle) {
        if let Some(vk_pipeline) = self.lock_state().pipelines.remove(pipeline) {
            vk_pipeline.destroy(&self.device);
        }
    }

    fn create_swapchain(
        &self,
        desc: &GfxSwapchainDesc,
    ) -> GfxResult<(GfxSwapchainHandle, Vec<GfxResourceHandle>)> {
        let Some(window) = desc.window else {
            return Err(GfxError::invalid_usage("vulkan swapchain needs a window"));
        };
        let Some(swapchain_loader) = self.swapchain_loader.as_ref() else {
            return Err(GfxError::invalid_usage("device was created without a display handle"));
        };

        let swapchain = VulkanSwapchain::new(
            &self.instance.entry,
            &self.instance.instance,
            &self.surface_loader,
            swapchain_loader,
            &self.device,
            self.pdevice.handle,
            self.pdevice.queue_family_index,
            window,
            desc.extent,
            desc.format,
            desc.image_count,
            desc.present_mode,
        )?;

        let mut state = self.lock_state();
        let back_buffers = self.insert_back_buffers(&mut state, &swapchain)?;
        let handle = state.swapchains.insert(VulkanSwapchainEntry {
            swapchain,
            back_buffers: back_buffers.clone(),
        });
        Ok((handle, back_buffers))
    }

    fn recreate_swapchain(
        &self,
        swapchain: GfxSwapchainHandle,
        extent: GfxExtent2D,
        present_mode: GfxPresentMode,
    ) -> GfxResult<Vec<GfxResourceHandle>> {
        let _span = tracy_client::span!("VulkanDevice::recreate_swapchain");
        let Some(swapchain_loader) = self.swapchain_loader.as_ref() else {
            return Err(GfxError::invalid_usage("device was created without a display handle"));
        };

        let mut guard = self.lock_state();
        let state = &mut *guard;
        unsafe { self.device.device_wait_idle() }.or_gfx(GfxErrorKind::Submission, "device_wait_idle")?;

        let entry = state
            .swapchains
            .get_mut(swapchain)
            .ok_or_else(|| GfxError::invalid_handle(format!("swapchain {:?}", swapchain)))?;
        for back_buffer in entry.back_buffers.drain(..) {
            if let Some(resource) = state.resources.remove(back_buffer) {
                resource.destroy(&self.device, &self.allocator);
            }
        }
        // 之前 acquire 但没有 present 的 wait 已经失效
        for waits in state.pending_waits.iter_mut() {
            waits.retain(|(_, value)| *value != 0);
        }
        entry.swapchain.rebuild(
            &self.surface_loader,
            swapchain_loader,
            &self.device,
            self.pdevice.handle,
            extent,
            present_mode,
        )?;

        let new_buffers = entry
            .swapchain
            .images
            .iter()
            .enumerate()
            .map(|(idx, image)| {
                VulkanResource::from_swapchain_image(
                    &self.device,
                    *image,
                    entry.swapchain.format,
                    entry.swapchain.extent,
                    format!("back-buffer-{}", idx),
                )
                .map(|resource| state.resources.insert(resource))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        entry.back_buffers = new_buffers.clone();
        Ok(new_buffers)
    }

    fn destroy_swapchain(&self, swapchain: GfxSwapchainHandle) {
        let mut state = self.lock_state();
        let Some(entry) = state.swapchains.remove(swapchain) else {
            return;
        };
        for back_buffer in &entry.back_buffers {
            if let Some(resource) = state.resources.remove(*back_buffer) {
                resource.destroy(&self.device, &self.allocator);
            }
        }
        if let Some(loader) = self.swapchain_loader.as_ref() {
            entry.swapchain.destroy(&self.surface_loader, loader, &self.device);
        }
    }

    fn acquire_next_back_buffer(&self, swapchain: GfxSwapchainHandle) -> GfxResult<u32> {
        let _span = tracy_client::span!("VulkanDevice::acquire_next_back_buffer");
        let Some(swapchain_loader) = self.swapchain_loader.as_ref() else {
            return Err(GfxError::invalid_usage("device was created without a display handle"));
        };

        let mut state = self.lock_state();
        let entry = state
            .swapchains
            .get_mut(swapchain)
            .ok_or_else(|| GfxError::invalid_handle(format!("swapchain {:?}", swapchain)))?;
        let (image_index, semaphore) = entry.swapchain.acquire(swapchain_loader)?;

        state.pending_waits[GfxQueueType::Graphics.index()].push((semaphore, 0));
        Ok(image_index)
    }

    fn present(&self, swapchain: GfxSwapchainHandle, queue: GfxQueueType) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanDevice::present");
        let Some(swapchain_loader) = self.swapchain_loader.as_ref() else {
            return Err(GfxError::invalid_usage("device was created without a display handle"));
        };

        let mut guard = self.lock_state();
        let state = &mut *guard;
        let entry = state
            .swapchains
            .get(swapchain)
            .ok_or_else(|| GfxError::invalid_handle(format!("swapchain {:?}", swapchain)))?;
        let Some((image_index, _)) = entry.swapchain.current else {
            return Err(GfxError::invalid_usage("present without acquire"));
        };

        // 空提交：等待队列上之前的工作完成后 signal present semaphore
        let signal = vk::SemaphoreSubmitInfo::default()
            .semaphore(entry.swapchain.present_semaphores[image_index as usize])
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        self.submit(state, queue, &[], std::slice::from_ref(&signal))?;

        let queue = state.queue;
        let entry = state
            .swapchains
            .get_mut(swapchain)
            .ok_or_else(|| GfxError::invalid_handle(format!("swapchain {:?}", swapchain)))?;
        entry.swapchain.present(swapchain_loader, queue, image_index)
    }
}
