use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;
use raw_window_handle::RawDisplayHandle;

use crate::{
    backend::vulkan::VkResultExt,
    error::{GfxError, GfxErrorKind, GfxResult},
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// instance 以及可选的 debug messenger
pub(super) struct VulkanInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

// new & init
impl VulkanInstance {
    pub fn new(app_name: &str, enable_validation: bool, display: Option<RawDisplayHandle>) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanInstance::new");

        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| GfxError::device_creation(format!("failed to load vulkan library: {}", err)))?;

        let app_name = CString::new(app_name).map_err(|_| GfxError::device_creation("app name contains NUL"))?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"umbra")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let supported_exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "enumerate_instance_extension_properties")?;
        let is_ext_supported = |ext: &CStr| {
            supported_exts.iter().any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == ext))
        };

        let mut exts: Vec<*const c_char> = Vec::new();
        if let Some(display) = display {
            let window_exts = ash_window::enumerate_required_extensions(display)
                .or_gfx(GfxErrorKind::DeviceCreation, "enumerate_required_extensions")?;
            exts.extend_from_slice(window_exts);
        }
        // debug messenger、debug name 以及 command buffer 中的 label 都依赖这个扩展
        let debug_utils_enabled = is_ext_supported(vk::EXT_DEBUG_UTILS_NAME);
        if debug_utils_enabled {
            exts.push(vk::EXT_DEBUG_UTILS_NAME.as_ptr());
        }

        let mut layers: Vec<*const c_char> = Vec::new();
        if enable_validation {
            let supported_layers = unsafe { entry.enumerate_instance_layer_properties() }
                .or_gfx(GfxErrorKind::DeviceCreation, "enumerate_instance_layer_properties")?;
            if supported_layers.iter().any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER))
            {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("validation layer requested but not available");
            }
        }

        log::info!(
            "instance extensions: {}",
            exts.iter().map(|ext| format!("{:?}", unsafe { CStr::from_ptr(*ext) })).join(", ")
        );
        log::info!("instance layers: {}", layers.len());

        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&exts)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&instance_ci, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_instance")?;

        let debug_utils = if debug_utils_enabled {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vk_debug_callback));
            match unsafe { loader.create_debug_utils_messenger(&messenger_ci, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(err) => {
                    log::warn!("failed to create debug messenger: {:?}", err);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }
}

// destroy
impl VulkanInstance {
    pub fn destroy(&mut self) {
        log::info!("destroying vulkan instance");
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// debug messenger 的回调函数
///
/// # Safety
/// 由驱动调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let msg = if p_callback_data.is_null() {
        std::borrow::Cow::from("")
    } else {
        let callback_data = unsafe { *p_callback_data };
        if callback_data.p_message.is_null() {
            std::borrow::Cow::from("")
        } else {
            unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
        }
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{:?}] {}", message_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{:?}] {}", message_type, msg),
        _ => log::info!("[{:?}] {}", message_type, msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}
