//! 将通用命令流翻译为 Vulkan command buffer 中的调用

use std::{collections::HashMap, ffi::CString};

use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;

use crate::{
    backend::vulkan::{bindless::VulkanBindless, convert, pipeline::VulkanPipeline, resources::VulkanResource},
    basic::format::GfxFormat,
    commands::{
        barrier::GfxBarrier,
        command::{GfxCommand, GfxRenderingDesc},
    },
    device::{GfxPipelineHandle, GfxResourceHandle},
    error::{GfxError, GfxResult},
};

/// 录制一个 command buffer 所需的只读视图
pub(super) struct VulkanRecorder<'a> {
    pub device: &'a ash::Device,
    pub debug_utils: Option<&'a ash::ext::debug_utils::Device>,
    pub resources: &'a SlotMap<GfxResourceHandle, VulkanResource>,
    pub pipelines: &'a SlotMap<GfxPipelineHandle, VulkanPipeline>,
    pub rtv_table: &'a [Option<GfxResourceHandle>],
    pub dsv_table: &'a [Option<GfxResourceHandle>],
    pub bindless: &'a VulkanBindless,
    pub cmd: vk::CommandBuffer,
    /// 本次录制中 barrier 之后各个 image 的 layout
    layouts: HashMap<GfxResourceHandle, vk::ImageLayout>,
}

// new & init
impl<'a> VulkanRecorder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &'a ash::Device,
        debug_utils: Option<&'a ash::ext::debug_utils::Device>,
        resources: &'a SlotMap<GfxResourceHandle, VulkanResource>,
        pipelines: &'a SlotMap<GfxPipelineHandle, VulkanPipeline>,
        rtv_table: &'a [Option<GfxResourceHandle>],
        dsv_table: &'a [Option<GfxResourceHandle>],
        bindless: &'a VulkanBindless,
        cmd: vk::CommandBuffer,
    ) -> Self {
        Self {
            device,
            debug_utils,
            resources,
            pipelines,
            rtv_table,
            dsv_table,
            bindless,
            cmd,
            layouts: HashMap::new(),
        }
    }
}

// record
impl VulkanRecorder<'_> {
    pub fn record(&mut self, commands: &[GfxCommand]) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanRecorder::record");

        unsafe {
            // 所有队列都来自同一个 family，两个 bind point 都绑定 bindless set
            for bind_point in [vk::PipelineBindPoint::GRAPHICS, vk::PipelineBindPoint::COMPUTE] {
                self.device.cmd_bind_descriptor_sets(
                    self.cmd,
                    bind_point,
                    self.bindless.pipeline_layout,
                    0,
                    std::slice::from_ref(&self.bindless.set),
                    &[],
                );
            }
        }

        for command in commands {
            self.record_one(command)?;
        }
        Ok(())
    }

    fn record_one(&mut self, command: &GfxCommand) -> GfxResult<()> {
        let device = self.device;
        let cmd = self.cmd;
        unsafe {
            match command {
                GfxCommand::BeginLabel(name) => {
                    if let Some(debug_utils) = self.debug_utils {
                        let name = CString::new(name.as_str()).unwrap_or_default();
                        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
                        debug_utils.cmd_begin_debug_utils_label(cmd, &label);
                    }
                }
                GfxCommand::EndLabel => {
                    if let Some(debug_utils) = self.debug_utils {
                        debug_utils.cmd_end_debug_utils_label(cmd);
                    }
                }
                GfxCommand::Barriers(barriers) => self.record_barriers(barriers)?,
                GfxCommand::BeginRendering(desc) => self.record_begin_rendering(desc)?,
                GfxCommand::EndRendering => device.cmd_end_rendering(cmd),
                GfxCommand::SetViewport(viewport) => {
                    let vk_viewport = vk::Viewport {
                        x: viewport.x,
                        y: viewport.y,
                        width: viewport.width,
                        height: viewport.height,
                        min_depth: viewport.min_depth,
                        max_depth: viewport.max_depth,
                    };
                    let scissor = vk::Rect2D {
                        offset: vk::Offset2D {
                            x: viewport.x as i32,
                            y: viewport.y as i32,
                        },
                        extent: vk::Extent2D {
                            width: viewport.width as u32,
                            height: viewport.height as u32,
                        },
                    };
                    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vk_viewport));
                    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
                }
                GfxCommand::SetTopology(topology) => {
                    device.cmd_set_primitive_topology(cmd, convert::topology(*topology));
                }
                GfxCommand::SetPipeline(handle) => {
                    let pipeline = self
                        .pipelines
                        .get(*handle)
                        .ok_or_else(|| GfxError::invalid_handle(format!("pipeline {:?}", handle)))?;
                    device.cmd_bind_pipeline(cmd, pipeline.bind_point(), pipeline.pipeline);
                }
                GfxCommand::SetRootConstants(values) => {
                    device.cmd_push_constants(
                        cmd,
                        self.bindless.pipeline_layout,
                        vk::ShaderStageFlags::ALL,
                        0,
                        bytemuck::cast_slice(values),
                    );
                }
                GfxCommand::SetIndexBuffer { buffer, offset } => {
                    let buffer = self.buffer(*buffer)?;
                    device.cmd_bind_index_buffer(cmd, buffer, *offset, vk::IndexType::UINT32);
                }
                GfxCommand::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => device.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance),
                GfxCommand::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => device.cmd_draw_indexed(
                    cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                ),
                GfxCommand::Dispatch { x, y, z } => device.cmd_dispatch(cmd, *x, *y, *z),
                GfxCommand::CopyResource { src, dst } => self.record_copy_resource(*src, *dst)?,
                GfxCommand::CopyBufferRegion {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let region = vk::BufferCopy {
                        src_offset: *src_offset,
                        dst_offset: *dst_offset,
                        size: *size,
                    };
                    device.cmd_copy_buffer(cmd, self.buffer(*src)?, self.buffer(*dst)?, std::slice::from_ref(&region));
                }
                GfxCommand::CopyBufferToTexture { src, src_offset, dst } => {
                    let src_buffer = self.buffer(*src)?;
                    let (image, format) = self.image(*dst)?;
                    let extent = self.resource(*dst)?.desc.extent().unwrap_or_default();
                    let region = vk::BufferImageCopy::default()
                        .buffer_offset(*src_offset)
                        .image_subresource(
                            vk::ImageSubresourceLayers::default()
                                .aspect_mask(convert::aspect(format))
                                .mip_level(0)
                                .base_array_layer(0)
                                .layer_count(1),
                        )
                        .image_extent(vk::Extent3D {
                            width: extent.width,
                            height: extent.height,
                            depth: 1,
                        });
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        src_buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(&region),
                    );
                }
            }
        }
        Ok(())
    }

    fn record_barriers(&mut self, barriers: &[GfxBarrier]) -> GfxResult<()> {
        let mut buffer_barriers = Vec::new();
        let mut image_barriers = Vec::new();

        for barrier in barriers {
            let resource = self.resource(barrier.resource)?;
            let src = convert::src_state(barrier.before);
            let dst = convert::dst_state(barrier.after);

            if let Some(buffer) = resource.vk_buffer() {
                buffer_barriers.push(
                    vk::BufferMemoryBarrier2::default()
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                        .src_stage_mask(src.stage)
                        .src_access_mask(src.access)
                        .dst_stage_mask(dst.stage)
                        .dst_access_mask(dst.access),
                );
            } else if let Some((image, _, format, _)) = resource.vk_image() {
                let old_layout = depth_aware_layout(src.layout, format);
                let new_layout = depth_aware_layout(dst.layout, format);
                image_barriers.push(
                    vk::ImageMemoryBarrier2::default()
                        .image(image)
                        .old_layout(old_layout)
                        .new_layout(new_layout)
                        .src_stage_mask(src.stage)
                        .src_access_mask(src.access)
                        .dst_stage_mask(dst.stage)
                        .dst_access_mask(dst.access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .subresource_range(
                            vk::ImageSubresourceRange::default()
                                .aspect_mask(convert::aspect(format))
                                .base_mip_level(0)
                                .level_count(vk::REMAINING_MIP_LEVELS)
                                .base_array_layer(0)
                                .layer_count(vk::REMAINING_ARRAY_LAYERS),
                        ),
                );
                self.layouts.insert(barrier.resource, new_layout);
            }
        }

        let dependency_info = vk::DependencyInfo::default()
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency_info) };
        Ok(())
    }

    fn record_begin_rendering(&mut self, desc: &GfxRenderingDesc) -> GfxResult<()> {
        let color_attachments = desc
            .colors
            .iter()
            .map(|color| {
                let handle = Self::table_entry(self.rtv_table, color.rtv, "rtv")?;
                let (_, view, _, _) = self
                    .resource(handle)?
                    .vk_image()
                    .ok_or_else(|| GfxError::invalid_usage("render target is not an image"))?;
                let (load_op, clear_value) = convert::load_op(color.load_op);
                Ok(vk::RenderingAttachmentInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(clear_value))
            })
            .collect::<GfxResult<Vec<_>>>()?;

        let depth_attachment = match desc.depth {
            Some(depth) => {
                let handle = Self::table_entry(self.dsv_table, depth.dsv, "dsv")?;
                let (_, view, _, _) = self
                    .resource(handle)?
                    .vk_image()
                    .ok_or_else(|| GfxError::invalid_usage("depth target is not an image"))?;
                let layout =
                    self.layouts.get(&handle).copied().unwrap_or(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
                let (load_op, clear_value) = convert::load_op(depth.load_op);
                let store_op = if layout == vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL {
                    vk::AttachmentStoreOp::NONE
                } else {
                    vk::AttachmentStoreOp::STORE
                };
                Some(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(view)
                        .image_layout(layout)
                        .load_op(load_op)
                        .store_op(store_op)
                        .clear_value(clear_value),
                )
            }
            None => None,
        };

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: desc.extent.width,
                height: desc.extent.height,
            },
        };
        let mut rendering_info =
            vk::RenderingInfo::default().render_area(render_area).layer_count(1).color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }
        unsafe { self.device.cmd_begin_rendering(self.cmd, &rendering_info) };
        Ok(())
    }

    fn record_copy_resource(&mut self, src: GfxResourceHandle, dst: GfxResourceHandle) -> GfxResult<()> {
        let src_res = self.resource(src)?;
        let dst_res = self.resource(dst)?;
        match (src_res.vk_buffer(), dst_res.vk_buffer()) {
            (Some(src_buffer), Some(dst_buffer)) => {
                let size = src_res.desc.byte_size().min(dst_res.desc.byte_size());
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                };
                unsafe {
                    self.device.cmd_copy_buffer(self.cmd, src_buffer, dst_buffer, std::slice::from_ref(&region));
                }
                return Ok(());
            }
            (None, None) => {}
            _ => return Err(GfxError::invalid_usage("copy between a buffer and a texture needs a region")),
        }

        let Some((src_image, _, src_format, src_extent)) = src_res.vk_image() else {
            return Err(GfxError::invalid_usage("copy source is not an image"));
        };
        let Some((dst_image, _, dst_format, dst_extent)) = dst_res.vk_image() else {
            return Err(GfxError::invalid_usage("copy destination is not an image"));
        };
        let src_layers = subresource_layers(src_format);
        let dst_layers = subresource_layers(dst_format);

        unsafe {
            if src_format == dst_format && src_extent == dst_extent {
                let region = vk::ImageCopy::default()
                    .src_subresource(src_layers)
                    .dst_subresource(dst_layers)
                    .extent(vk::Extent3D {
                        width: src_extent.width,
                        height: src_extent.height,
                        depth: 1,
                    });
                self.device.cmd_copy_image(
                    self.cmd,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                );
            } else {
                // 格式或尺寸不同，例如 HDR 输出拷贝到交换链
                let region = vk::ImageBlit::default()
                    .src_subresource(src_layers)
                    .src_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: src_extent.width as i32,
                            y: src_extent.height as i32,
                            z: 1,
                        },
                    ])
                    .dst_subresource(dst_layers)
                    .dst_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: dst_extent.width as i32,
                            y: dst_extent.height as i32,
                            z: 1,
                        },
                    ]);
                self.device.cmd_blit_image(
                    self.cmd,
                    src_image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    dst_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                    if src_format.is_depth() { vk::Filter::NEAREST } else { vk::Filter::LINEAR },
                );
            }
        }
        Ok(())
    }
}

// tools
impl VulkanRecorder<'_> {
    fn resource(&self, handle: GfxResourceHandle) -> GfxResult<&VulkanResource> {
        self.resources.get(handle).ok_or_else(|| GfxError::invalid_handle(format!("resource {:?}", handle)))
    }

    fn buffer(&self, handle: GfxResourceHandle) -> GfxResult<vk::Buffer> {
        self.resource(handle)?
            .vk_buffer()
            .ok_or_else(|| GfxError::invalid_usage(format!("resource {:?} is not a buffer", handle)))
    }

    fn image(&self, handle: GfxResourceHandle) -> GfxResult<(vk::Image, GfxFormat)> {
        self.resource(handle)?
            .vk_image()
            .map(|(image, _, format, _)| (image, format))
            .ok_or_else(|| GfxError::invalid_usage(format!("resource {:?} is not an image", handle)))
    }

    fn table_entry(table: &[Option<GfxResourceHandle>], index: u32, table_name: &str) -> GfxResult<GfxResourceHandle> {
        table.get(index as usize).copied().flatten().ok_or_else(|| {
            GfxError::invalid_handle(format!(
                "{} slot {} is empty (occupied: {})",
                table_name,
                index,
                table.iter().positions(Option::is_some).join(",")
            ))
        })
    }
}

/// 深度图作为 shader resource 时使用只读的深度 layout
fn depth_aware_layout(layout: vk::ImageLayout, format: GfxFormat) -> vk::ImageLayout {
    if format.is_depth() && layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        layout
    }
}

fn subresource_layers(format: GfxFormat) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(convert::aspect(format))
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
}
