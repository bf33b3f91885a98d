use ash::vk;

use crate::{
    backend::vulkan::{VkResultExt, convert},
    basic::{extent::GfxExtent2D, format::GfxFormat},
    error::{GfxError, GfxErrorKind, GfxResult},
    swapchain::{GfxPresentMode, GfxWindowHandles},
};

/// surface 与交换链
///
/// - acquire semaphore 环形复用，数量比图像多一个
/// - present semaphore 每张图像一个，由呈现前的空提交 signal
pub(super) struct VulkanSwapchain {
    surface: vk::SurfaceKHR,
    pub handle: vk::SwapchainKHR,

    pub images: Vec<vk::Image>,
    pub format: GfxFormat,
    pub extent: GfxExtent2D,
    pub present_mode: GfxPresentMode,
    image_count: u32,

    acquire_semaphores: Vec<vk::Semaphore>,
    acquire_cursor: usize,
    pub present_semaphores: Vec<vk::Semaphore>,

    /// 最近一次 acquire 得到的图像，以及对应的 acquire semaphore
    pub current: Option<(u32, vk::Semaphore)>,
}

// new & init
impl VulkanSwapchain {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        swapchain_loader: &ash::khr::swapchain::Device,
        device: &ash::Device,
        pdevice: vk::PhysicalDevice,
        queue_family_index: u32,
        window: GfxWindowHandles,
        extent: GfxExtent2D,
        format: GfxFormat,
        image_count: u32,
        present_mode: GfxPresentMode,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanSwapchain::new");

        let surface = unsafe { ash_window::create_surface(entry, instance, window.display, window.window, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_surface")?;
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(pdevice, queue_family_index, surface)
        }
        .or_gfx(GfxErrorKind::DeviceCreation, "get_physical_device_surface_support")?;
        if !supported {
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(GfxError::device_creation("queue family can not present to the surface"));
        }

        let mut swapchain = Self {
            surface,
            handle: vk::SwapchainKHR::null(),
            images: vec![],
            format,
            extent,
            present_mode,
            image_count,
            acquire_semaphores: vec![],
            acquire_cursor: 0,
            present_semaphores: vec![],
            current: None,
        };
        swapchain.rebuild(surface_loader, swapchain_loader, device, pdevice, extent, present_mode)?;
        Ok(swapchain)
    }

    /// 以新的尺寸与呈现模式重建交换链，旧的交换链作为 `old_swapchain` 传入后销毁
    ///
    /// 调用方保证 GPU 已经不再使用旧的图像
    pub fn rebuild(
        &mut self,
        surface_loader: &ash::khr::surface::Instance,
        swapchain_loader: &ash::khr::swapchain::Device,
        device: &ash::Device,
        pdevice: vk::PhysicalDevice,
        extent: GfxExtent2D,
        present_mode: GfxPresentMode,
    ) -> GfxResult<()> {
        let capabilities = unsafe { surface_loader.get_physical_device_surface_capabilities(pdevice, self.surface) }
            .or_gfx(GfxErrorKind::SwapchainOutOfDate, "get_physical_device_surface_capabilities")?;
        let surface_modes = unsafe { surface_loader.get_physical_device_surface_present_modes(pdevice, self.surface) }
            .or_gfx(GfxErrorKind::SwapchainOutOfDate, "get_physical_device_surface_present_modes")?;

        let vk_extent = Self::calculate_swapchain_extent(&capabilities, extent);
        let vk_present_mode = Self::choose_present_mode(present_mode, &surface_modes);
        let image_count = if capabilities.max_image_count == 0 {
            self.image_count.max(capabilities.min_image_count)
        } else {
            self.image_count.clamp(capabilities.min_image_count, capabilities.max_image_count)
        };
        log::info!(
            "create swapchain: window extent {}, surface extent {}x{}, present mode {:?}, images {}",
            extent,
            vk_extent.width,
            vk_extent.height,
            vk_present_mode,
            image_count
        );

        let old_swapchain = self.handle;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(convert::format(self.format))
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(vk_extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于把合成结果拷贝到交换链
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk_present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .or_gfx(GfxErrorKind::SwapchainOutOfDate, "create_swapchain")?;
        self.destroy_sync_objects(device);
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.handle = handle;

        self.images = unsafe { swapchain_loader.get_swapchain_images(handle) }
            .or_gfx(GfxErrorKind::SwapchainOutOfDate, "get_swapchain_images")?;
        self.extent = GfxExtent2D::new(vk_extent.width, vk_extent.height);
        self.present_mode = present_mode;
        self.current = None;
        self.acquire_cursor = 0;

        let semaphore_ci = vk::SemaphoreCreateInfo::default();
        self.acquire_semaphores = (0..=self.images.len())
            .map(|_| unsafe { device.create_semaphore(&semaphore_ci, None) })
            .collect::<ash::prelude::VkResult<Vec<_>>>()
            .or_gfx(GfxErrorKind::DeviceCreation, "create_semaphore")?;
        self.present_semaphores = (0..self.images.len())
            .map(|_| unsafe { device.create_semaphore(&semaphore_ci, None) })
            .collect::<ash::prelude::VkResult<Vec<_>>>()
            .or_gfx(GfxErrorKind::DeviceCreation, "create_semaphore")?;
        Ok(())
    }
}

// destroy
impl VulkanSwapchain {
    fn destroy_sync_objects(&mut self, device: &ash::Device) {
        unsafe {
            for semaphore in self.acquire_semaphores.drain(..).chain(self.present_semaphores.drain(..)) {
                device.destroy_semaphore(semaphore, None);
            }
        }
    }

    pub fn destroy(
        mut self,
        surface_loader: &ash::khr::surface::Instance,
        swapchain_loader: &ash::khr::swapchain::Device,
        device: &ash::Device,
    ) {
        self.destroy_sync_objects(device);
        unsafe {
            swapchain_loader.destroy_swapchain(self.handle, None);
            surface_loader.destroy_surface(self.surface, None);
        }
    }
}

// update
impl VulkanSwapchain {
    /// 返回图像序号，以及呈现前需要等待的 acquire semaphore
    pub fn acquire(&mut self, swapchain_loader: &ash::khr::swapchain::Device) -> GfxResult<(u32, vk::Semaphore)> {
        let semaphore = self.acquire_semaphores[self.acquire_cursor];
        let result =
            unsafe { swapchain_loader.acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null()) };

        match result {
            Ok((image_index, is_suboptimal)) => {
                if is_suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", image_index);
                }
                self.acquire_cursor = (self.acquire_cursor + 1) % self.acquire_semaphores.len();
                self.current = Some((image_index, semaphore));
                Ok((image_index, semaphore))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Err(GfxError::swapchain_out_of_date("acquire_next_image"))
            }
            Err(err) => Err(err).or_gfx(GfxErrorKind::Submission, "acquire_next_image"),
        }
    }

    /// 交换链过期时返回 `SwapchainOutOfDate`，由上层重建
    pub fn present(
        &mut self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
    ) -> GfxResult<()> {
        let wait_semaphore = self.present_semaphores[image_index as usize];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(std::slice::from_ref(&wait_semaphore))
            .image_indices(std::slice::from_ref(&image_index))
            .swapchains(std::slice::from_ref(&self.handle));

        self.current = None;
        match unsafe { swapchain_loader.queue_present(queue, &present_info) } {
            Ok(is_suboptimal) => {
                if is_suboptimal {
                    log::warn!("swapchain present image index {} is not optimal", image_index);
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Err(GfxError::swapchain_out_of_date("queue_present"))
            }
            Err(err) => Err(err).or_gfx(GfxErrorKind::Submission, "queue_present"),
        }
    }
}

// tools
impl VulkanSwapchain {
    /// 如果 current_extent 为特殊值 0xFFFFFFFF，则由窗口尺寸决定交换链尺寸
    fn calculate_swapchain_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: GfxExtent2D) -> vk::Extent2D {
        let surface_extent = capabilities.current_extent;
        if surface_extent.width == 0xFFFFFFFF || surface_extent.height == 0xFFFFFFFF {
            vk::Extent2D {
                width: window_extent
                    .width
                    .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                height: window_extent
                    .height
                    .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
            }
        } else {
            surface_extent
        }
    }

    /// vsync 使用 FIFO；否则允许撕裂时优先 IMMEDIATE，不允许时优先 MAILBOX；都不支持时回退到 FIFO
    fn choose_present_mode(mode: GfxPresentMode, supported: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        if mode.vsync {
            return vk::PresentModeKHR::FIFO;
        }
        let preferred = if mode.allow_tearing {
            vk::PresentModeKHR::IMMEDIATE
        } else {
            vk::PresentModeKHR::MAILBOX
        };
        if supported.contains(&preferred) {
            preferred
        } else {
            log::warn!("present mode {:?} is not supported, fallback to FIFO", preferred);
            vk::PresentModeKHR::FIFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_present_mode() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        let vsync = GfxPresentMode {
            vsync: true,
            allow_tearing: true,
        };
        assert_eq!(VulkanSwapchain::choose_present_mode(vsync, &all), vk::PresentModeKHR::FIFO);

        let tearing = GfxPresentMode {
            vsync: false,
            allow_tearing: true,
        };
        assert_eq!(VulkanSwapchain::choose_present_mode(tearing, &all), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(VulkanSwapchain::choose_present_mode(tearing, &[vk::PresentModeKHR::FIFO]), vk::PresentModeKHR::FIFO);

        let no_tearing = GfxPresentMode {
            vsync: false,
            allow_tearing: false,
        };
        assert_eq!(VulkanSwapchain::choose_present_mode(no_tearing, &all), vk::PresentModeKHR::MAILBOX);
    }
}
