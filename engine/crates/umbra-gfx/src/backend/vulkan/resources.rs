use ash::vk;
use vk_mem::Alloc;

use crate::{
    backend::vulkan::{VkResultExt, convert},
    basic::{extent::GfxExtent2D, format::GfxFormat},
    error::{GfxError, GfxErrorKind, GfxResult},
    resources::{GfxResourceDesc, GfxResourceShape, GfxResourceUsage},
};

pub(super) enum VulkanResourceKind {
    Buffer {
        buffer: vk::Buffer,
        size: u64,
    },
    Image {
        image: vk::Image,
        view: vk::ImageView,
        format: GfxFormat,
        extent: GfxExtent2D,
    },
}

/// buffer 或 image，以及它的内存
pub(super) struct VulkanResource {
    pub desc: GfxResourceDesc,
    pub kind: VulkanResourceKind,
    /// 交换链图像的内存由交换链持有，此处为 `None`
    allocation: Option<vk_mem::Allocation>,
}

// new & init
impl VulkanResource {
    pub fn new(device: &ash::Device, allocator: &vk_mem::Allocator, desc: &GfxResourceDesc) -> GfxResult<Self> {
        let host_visible = desc.usage.contains(GfxResourceUsage::UPLOAD);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if host_visible {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };

        match desc.shape {
            GfxResourceShape::Buffer { size } => {
                let mut usage = convert::buffer_usage(desc.usage);
                if host_visible {
                    usage |= vk::BufferUsageFlags::TRANSFER_SRC;
                }
                let buffer_ci = vk::BufferCreateInfo::default().size(size.max(4)).usage(usage);
                let (buffer, allocation) = unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci) }
                    .or_gfx(GfxErrorKind::ResourceCreation, &desc.name)?;

                Ok(Self {
                    desc: desc.clone(),
                    kind: VulkanResourceKind::Buffer { buffer, size },
                    allocation: Some(allocation),
                })
            }
            GfxResourceShape::Texture2D {
                extent,
                format,
                mip_levels,
                array_layers,
            } => {
                if extent.is_empty() {
                    return Err(GfxError::resource_creation(format!("texture {} has empty extent", desc.name)));
                }
                let image_ci = vk::ImageCreateInfo::default()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(convert::format(format))
                    .extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .mip_levels(mip_levels)
                    .array_layers(array_layers)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(convert::image_usage(desc.usage))
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED);
                let (image, mut allocation) = unsafe { allocator.create_image(&image_ci, &alloc_ci) }
                    .or_gfx(GfxErrorKind::ResourceCreation, &desc.name)?;

                let view = match Self::create_view(device, image, format, mip_levels, array_layers) {
                    Ok(view) => view,
                    Err(err) => {
                        unsafe { allocator.destroy_image(image, &mut allocation) };
                        return Err(err);
                    }
                };

                Ok(Self {
                    desc: desc.clone(),
                    kind: VulkanResourceKind::Image {
                        image,
                        view,
                        format,
                        extent,
                    },
                    allocation: Some(allocation),
                })
            }
        }
    }

    /// 包装交换链图像，只创建 view
    pub fn from_swapchain_image(
        device: &ash::Device,
        image: vk::Image,
        format: GfxFormat,
        extent: GfxExtent2D,
        name: String,
    ) -> GfxResult<Self> {
        let view = Self::create_view(device, image, format, 1, 1)?;
        Ok(Self {
            desc: GfxResourceDesc::texture_2d(
                extent,
                format,
                GfxResourceUsage::RENDER_TARGET | GfxResourceUsage::COPY_DST,
                name,
            ),
            kind: VulkanResourceKind::Image {
                image,
                view,
                format,
                extent,
            },
            allocation: None,
        })
    }

    fn create_view(
        device: &ash::Device,
        image: vk::Image,
        format: GfxFormat,
        mip_levels: u32,
        array_layers: u32,
    ) -> GfxResult<vk::ImageView> {
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(if array_layers > 1 {
                vk::ImageViewType::TYPE_2D_ARRAY
            } else {
                vk::ImageViewType::TYPE_2D
            })
            .format(convert::format(format))
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(convert::aspect(format))
                    .base_mip_level(0)
                    .level_count(mip_levels)
                    .base_array_layer(0)
                    .layer_count(array_layers),
            );
        unsafe { device.create_image_view(&view_ci, None) }.or_gfx(GfxErrorKind::ResourceCreation, "create_image_view")
    }
}

// destroy
impl VulkanResource {
    pub fn destroy(mut self, device: &ash::Device, allocator: &vk_mem::Allocator) {
        unsafe {
            match self.kind {
                VulkanResourceKind::Buffer { buffer, .. } => {
                    if let Some(allocation) = self.allocation.as_mut() {
                        allocator.destroy_buffer(buffer, allocation);
                    }
                }
                VulkanResourceKind::Image { image, view, .. } => {
                    device.destroy_image_view(view, None);
                    if let Some(allocation) = self.allocation.as_mut() {
                        allocator.destroy_image(image, allocation);
                    }
                }
            }
        }
    }
}

// getters
impl VulkanResource {
    #[inline]
    pub fn vk_buffer(&self) -> Option<vk::Buffer> {
        match self.kind {
            VulkanResourceKind::Buffer { buffer, .. } => Some(buffer),
            VulkanResourceKind::Image { .. } => None,
        }
    }

    #[inline]
    pub fn vk_image(&self) -> Option<(vk::Image, vk::ImageView, GfxFormat, GfxExtent2D)> {
        match self.kind {
            VulkanResourceKind::Buffer { .. } => None,
            VulkanResourceKind::Image {
                image,
                view,
                format,
                extent,
            } => Some((image, view, format, extent)),
        }
    }
}

// tools
impl VulkanResource {
    /// 写入 host visible 的 buffer
    pub fn write(&mut self, allocator: &vk_mem::Allocator, offset: u64, data: &[u8]) -> GfxResult<()> {
        let VulkanResourceKind::Buffer { size, .. } = self.kind else {
            return Err(GfxError::invalid_usage(format!("{} is not a buffer", self.desc.name)));
        };
        if !self.desc.usage.contains(GfxResourceUsage::UPLOAD) {
            return Err(GfxError::invalid_usage(format!("{} is not an upload buffer", self.desc.name)));
        }
        if offset + data.len() as u64 > size {
            return Err(GfxError::invalid_usage(format!(
                "write of {} bytes at {} overflows {} ({} bytes)",
                data.len(),
                offset,
                self.desc.name,
                size
            )));
        }
        let Some(allocation) = self.allocation.as_mut() else {
            return Err(GfxError::invalid_usage(format!("{} has no memory", self.desc.name)));
        };

        unsafe {
            let ptr = allocator.map_memory(allocation).or_gfx(GfxErrorKind::Submission, "map_memory")?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
            let flushed = allocator.flush_allocation(allocation, offset, data.len() as u64);
            allocator.unmap_memory(allocation);
            flushed.or_gfx(GfxErrorKind::Submission, "flush_allocation")?;
        }
        Ok(())
    }
}
