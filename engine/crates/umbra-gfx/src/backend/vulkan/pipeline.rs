use ash::vk;
use itertools::Itertools;

use crate::{
    backend::vulkan::{VkResultExt, convert},
    error::{GfxError, GfxErrorKind, GfxResult},
    pipelines::{
        desc::{GfxComputePipelineDesc, GfxGraphicsPipelineDesc},
        pipeline_state::GfxPipelineKind,
    },
};

pub(super) struct VulkanPipeline {
    pub pipeline: vk::Pipeline,
    pub kind: GfxPipelineKind,
}

impl VulkanPipeline {
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self.kind {
            GfxPipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            GfxPipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

// new & init
impl VulkanPipeline {
    pub fn new_graphics(
        device: &ash::Device,
        layout: vk::PipelineLayout,
        desc: &GfxGraphicsPipelineDesc,
        vs: &[u8],
        ps: &[u8],
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanPipeline::new_graphics");

        let vs_module = create_shader_module(device, &desc.vs, vs)?;
        let ps_module = match create_shader_module(device, &desc.ps, ps) {
            Ok(module) => module,
            Err(err) => {
                unsafe { device.destroy_shader_module(vs_module, None) };
                return Err(err);
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vs_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(ps_module)
                .name(c"main"),
        ];

        // 顶点数据由 shader 通过 bindless 索引读取
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(convert::topology(desc.topology));
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert::cull_mode(desc.cull_mode))
            .front_face(convert::front_face(desc.front_face))
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_format.is_some())
            .depth_write_enable(desc.depth_format.is_some() && desc.depth_write)
            .depth_compare_op(convert::compare_op(desc.depth_compare));

        let blend_attachments = desc
            .rtv_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(desc.blend)
                    .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                    .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::ONE)
                    .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect_vec();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states =
            [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR, vk::DynamicState::PRIMITIVE_TOPOLOGY];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = desc.rtv_formats.iter().map(|format| convert::format(*format)).collect_vec();
        let depth_format = desc.depth_format.map_or(vk::Format::UNDEFINED, convert::format);
        let stencil_format = desc
            .depth_format
            .filter(|format| format.has_stencil())
            .map_or(vk::Format::UNDEFINED, convert::format);
        let mut rendering_ci = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_ci);

        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
        };
        unsafe {
            device.destroy_shader_module(vs_module, None);
            device.destroy_shader_module(ps_module, None);
        }

        let pipeline = first_pipeline(result, &desc.name)?;
        log::info!("graphics pipeline created: {}", desc.name);
        Ok(Self {
            pipeline,
            kind: GfxPipelineKind::Graphics,
        })
    }

    pub fn new_compute(
        device: &ash::Device,
        layout: vk::PipelineLayout,
        desc: &GfxComputePipelineDesc,
        cs: &[u8],
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanPipeline::new_compute");

        let cs_module = create_shader_module(device, &desc.cs, cs)?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(cs_module)
            .name(c"main");
        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

        let result = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
        };
        unsafe { device.destroy_shader_module(cs_module, None) };

        let pipeline = first_pipeline(result, &desc.name)?;
        log::info!("compute pipeline created: {}", desc.name);
        Ok(Self {
            pipeline,
            kind: GfxPipelineKind::Compute,
        })
    }
}

// destroy
impl VulkanPipeline {
    pub fn destroy(self, device: &ash::Device) {
        unsafe { device.destroy_pipeline(self.pipeline, None) };
    }
}

fn create_shader_module(device: &ash::Device, name: &str, code: &[u8]) -> GfxResult<vk::ShaderModule> {
    let words = ash::util::read_spv(&mut std::io::Cursor::new(code))
        .map_err(|err| GfxError::resource_creation(format!("invalid spir-v {}: {}", name, err)))?;
    let module_ci = vk::ShaderModuleCreateInfo::default().code(&words);
    unsafe { device.create_shader_module(&module_ci, None) }.or_gfx(GfxErrorKind::ResourceCreation, name)
}

fn first_pipeline(result: Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>, name: &str) -> GfxResult<vk::Pipeline> {
    result
        .map_err(|(_, err)| err)
        .or_gfx(GfxErrorKind::ResourceCreation, name)?
        .into_iter()
        .next()
        .ok_or_else(|| GfxError::resource_creation(format!("driver returned no pipeline for {}", name)))
}
