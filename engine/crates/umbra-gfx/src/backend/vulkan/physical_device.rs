use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::vulkan::VkResultExt,
    error::{GfxError, GfxErrorKind, GfxResult},
};

/// 选中的物理显卡
pub(super) struct VulkanPhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub props: vk::PhysicalDeviceProperties,
    pub device_extensions: Vec<vk::ExtensionProperties>,
    /// 同时支持 graphics 与 compute 的 queue family
    pub queue_family_index: u32,
}

impl VulkanPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    pub fn pick(instance: &ash::Instance) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }
            .or_gfx(GfxErrorKind::DeviceCreation, "enumerate_physical_devices")?;

        pdevices
            .iter()
            .filter_map(|pdevice| Self::new(instance, *pdevice))
            .find_or_first(Self::is_discrete_gpu)
            .ok_or_else(|| GfxError::device_creation("no gpu supports graphics and compute on one queue family"))
    }

    fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> Option<Self> {
        unsafe {
            let props = instance.get_physical_device_properties(pdevice);
            let name = CStr::from_ptr(props.device_name.as_ptr());
            log::info!("found gpu: {:?}", name);

            if props.api_version < vk::API_VERSION_1_3 {
                log::warn!("skip gpu {:?}: vulkan 1.3 is not supported", name);
                return None;
            }

            let queue_family_index = instance
                .get_physical_device_queue_family_properties(pdevice)
                .iter()
                .position(|prop| prop.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))?
                as u32;

            let device_extensions = instance.enumerate_device_extension_properties(pdevice).unwrap_or_default();

            Some(Self {
                handle: pdevice,
                props,
                device_extensions,
                queue_family_index,
            })
        }
    }
}

// getters
impl VulkanPhysicalDevice {
    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    pub fn name(&self) -> String {
        self.props.device_name_as_c_str().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
    }

    pub fn supports_extension(&self, ext: &CStr) -> bool {
        self.device_extensions.iter().any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == ext))
    }
}
