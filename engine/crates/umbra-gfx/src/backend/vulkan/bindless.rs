//! bindless 描述符集
//!
//! 整个设备只有一个 descriptor set：
//! - binding 0: sampled image，对应 SRV 纹理
//! - binding 1: storage image，对应 UAV 纹理
//! - binding 2: storage buffer，对应所有 buffer 视图
//! - binding 3: 两个不可变 sampler（linear / point）
//!
//! 三个数组共用同一个索引空间，索引由上层的描述符分配器决定。

use ash::vk;

use crate::{
    backend::vulkan::{
        VkResultExt,
        resources::{VulkanResource, VulkanResourceKind},
    },
    commands::command::GFX_MAX_ROOT_CONSTANTS,
    error::{GfxError, GfxErrorKind, GfxResult},
    resources::GfxViewDesc,
};

const BINDING_SAMPLED_IMAGE: u32 = 0;
const BINDING_STORAGE_IMAGE: u32 = 1;
const BINDING_STORAGE_BUFFER: u32 = 2;
const BINDING_SAMPLERS: u32 = 3;

pub(super) struct VulkanBindless {
    pub set_layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    pub pipeline_layout: vk::PipelineLayout,
    samplers: [vk::Sampler; 2],
    capacity: u32,
}

// new & init
impl VulkanBindless {
    pub fn new(device: &ash::Device, capacity: u32) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanBindless::new");

        let samplers = [
            Self::create_sampler(device, vk::Filter::LINEAR)?,
            Self::create_sampler(device, vk::Filter::NEAREST)?,
        ];

        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(BINDING_SAMPLED_IMAGE)
                .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(capacity)
                .stage_flags(vk::ShaderStageFlags::ALL),
            vk::DescriptorSetLayoutBinding::default()
                .binding(BINDING_STORAGE_IMAGE)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(capacity)
                .stage_flags(vk::ShaderStageFlags::ALL),
            vk::DescriptorSetLayoutBinding::default()
                .binding(BINDING_STORAGE_BUFFER)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(capacity)
                .stage_flags(vk::ShaderStageFlags::ALL),
            vk::DescriptorSetLayoutBinding::default()
                .binding(BINDING_SAMPLERS)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .immutable_samplers(&samplers)
                .stage_flags(vk::ShaderStageFlags::ALL),
        ];
        let bindless_flags = vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
        let binding_flags = [bindless_flags, bindless_flags, bindless_flags, vk::DescriptorBindingFlags::empty()];
        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let set_layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_ci);
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_ci, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_descriptor_set_layout")?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: capacity,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: capacity,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: capacity,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: samplers.len() as u32,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_descriptor_pool")?;

        let set_alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&set_layout));
        let set = unsafe { device.allocate_descriptor_sets(&set_alloc_info) }
            .or_gfx(GfxErrorKind::DeviceCreation, "allocate_descriptor_sets")?
            .into_iter()
            .next()
            .ok_or_else(|| GfxError::device_creation("descriptor pool returned no set"))?;

        // 所有管线共用同一个 layout：bindless set + root constants
        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size((GFX_MAX_ROOT_CONSTANTS * size_of::<u32>()) as u32);
        let pipeline_layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(&set_layout))
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let pipeline_layout = unsafe { device.create_pipeline_layout(&pipeline_layout_ci, None) }
            .or_gfx(GfxErrorKind::DeviceCreation, "create_pipeline_layout")?;

        log::info!("bindless descriptor set created with capacity {}", capacity);
        Ok(Self {
            set_layout,
            pool,
            set,
            pipeline_layout,
            samplers,
            capacity,
        })
    }

    fn create_sampler(device: &ash::Device, filter: vk::Filter) -> GfxResult<vk::Sampler> {
        let mipmap_mode = if filter == vk::Filter::LINEAR {
            vk::SamplerMipmapMode::LINEAR
        } else {
            vk::SamplerMipmapMode::NEAREST
        };
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(vk::LOD_CLAMP_NONE);
        unsafe { device.create_sampler(&sampler_ci, None) }.or_gfx(GfxErrorKind::DeviceCreation, "create_sampler")
    }
}

// destroy
impl VulkanBindless {
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            // set 随 pool 一起释放
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            for sampler in self.samplers {
                device.destroy_sampler(sampler, None);
            }
        }
    }
}

// tools
impl VulkanBindless {
    /// 将资源写入 bindless 数组的 `index` 槽位
    pub fn write(&self, device: &ash::Device, index: u32, resource: &VulkanResource, view: GfxViewDesc) -> GfxResult<()> {
        if index >= self.capacity {
            return Err(GfxError::invalid_usage(format!("descriptor index {} out of range {}", index, self.capacity)));
        }

        match (&resource.kind, view) {
            (
                VulkanResourceKind::Buffer { buffer, .. },
                GfxViewDesc::ConstantBuffer | GfxViewDesc::ShaderResource | GfxViewDesc::UnorderedAccess,
            ) => {
                let buffer_info = vk::DescriptorBufferInfo::default().buffer(*buffer).offset(0).range(vk::WHOLE_SIZE);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(BINDING_STORAGE_BUFFER)
                    .dst_array_element(index)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(&buffer_info));
                unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
            }
            (VulkanResourceKind::Image { view: image_view, format, .. }, GfxViewDesc::ShaderResource) => {
                let layout = if format.is_depth() {
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                };
                let image_info = vk::DescriptorImageInfo::default().image_view(*image_view).image_layout(layout);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(BINDING_SAMPLED_IMAGE)
                    .dst_array_element(index)
                    .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                    .image_info(std::slice::from_ref(&image_info));
                unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
            }
            (VulkanResourceKind::Image { view: image_view, .. }, GfxViewDesc::UnorderedAccess) => {
                let image_info =
                    vk::DescriptorImageInfo::default().image_view(*image_view).image_layout(vk::ImageLayout::GENERAL);
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(BINDING_STORAGE_IMAGE)
                    .dst_array_element(index)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(std::slice::from_ref(&image_info));
                unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
            }
            (_, view) => {
                return Err(GfxError::invalid_usage(format!(
                    "{:?} view is not valid for {} in the bindless set",
                    view, resource.desc.name
                )));
            }
        }
        Ok(())
    }
}
