use crate::{
    asset_importer::{AccessorSource, PrimitiveSource, SceneSource},
    contexts::VulkanContext,
    rendering::{
        buffer::HostBuffer,
        descriptors::{Descriptors, TextureTable, SCENE_DATA_BINDING},
        fence::TimelineFence,
        frame::Frame,
        geometry::{BufferId, GeometryRegistry, IndexStreamView, VertexStreamView},
        material::{resolve_material_index, MaterialStore},
        primitive::{draw_order, resolve_texture_slots, Primitive, TEXTURE_KIND_COUNT},
        scene_data::SceneData,
        shadow_map::ShadowMap,
        swapchain::{Swapchain, SwapchainInfo},
        texture::TextureStore,
        upload::Uploader,
    },
    Result, YarraError, COLOR_FORMAT, DEPTH_FORMAT, SHADOW_MAP_SIZE,
};
use ash::vk;
use glam::Mat4;
use std::slice::from_ref as slice_from_ref;

/// Number of frames cycled through. Submissions are fully serialised against
/// the fence, so this only bounds how many command pools exist.
pub const PIPELINE_DEPTH: usize = 2;

/// SPIR-V for the renderer's pipelines, supplied by the caller. Shader
/// compilation is out of scope for this crate.
pub struct Shaders {
    /// Vertex shader for the main pass
    pub vertex: Vec<u32>,
    /// Fragment shader for the main pass
    pub fragment: Vec<u32>,
    /// Vertex shader for the depth-only shadow pass
    pub shadow_vertex: Vec<u32>,
}

/// The two passes a frame records, in the order they must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Depth-only pass into the shadow map
    Shadow,
    /// Colour pass into the swapchain
    Main,
}

/// Per-draw data pushed to the shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DrawData {
    /// World transform of the primitive
    pub model: Mat4,
    /// Index into the material record buffer
    pub material_index: u32,
    /// Texture table slots, one per canonical texture map
    pub texture_slots: [u32; TEXTURE_KIND_COUNT],
}

struct Scene {
    materials: MaterialStore,
    textures: TextureStore,
    primitives: Vec<Primitive>,
    order: Vec<usize>,
}

/// Owns everything needed to record and submit frames: the descriptor tables,
/// the geometry registry, the pipelines, the shadow map and the fence. One
/// instance drives one swapchain.
pub struct RenderContext {
    /// The CPU/GPU synchronisation fence
    pub fence: TimelineFence,
    /// The staging uploader used at load time
    pub uploader: Uploader,
    /// All geometry buffers
    pub geometry: GeometryRegistry,
    /// The bindless texture table
    pub texture_table: TextureTable,
    descriptors: Descriptors,
    scene_buffer: HostBuffer<SceneData>,
    shadow_map: ShadowMap,
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    opaque_pipeline: vk::Pipeline,
    blend_pipeline: vk::Pipeline,
    shadow_pipeline: vk::Pipeline,
    frames: Vec<Frame>,
    frame_index: usize,
    swapchain_index: usize,
    scene: Option<Scene>,
}

impl RenderContext {
    /// Create the render context over the caller's swapchain images.
    pub fn new(
        vulkan_context: &VulkanContext,
        swapchain_info: &SwapchainInfo,
        shaders: &Shaders,
    ) -> Result<Self> {
        let device = &vulkan_context.device;
        println!("[YARRA_RENDER] Creating render context..");

        let fence = TimelineFence::new(device)?;
        let uploader = Uploader::new(vulkan_context)?;
        let descriptors = unsafe { Descriptors::new(vulkan_context) }?;
        let texture_table = TextureTable::new(descriptors.set);

        let mut scene_buffer: HostBuffer<SceneData> =
            HostBuffer::new(vulkan_context, vk::BufferUsageFlags::UNIFORM_BUFFER, 1)?;
        unsafe { scene_buffer.overwrite(&[SceneData::default()]) };
        write_scene_buffer_descriptor(device, descriptors.set, scene_buffer.buffer);

        let shadow_map = ShadowMap::new(vulkan_context)?;
        shadow_map.update_descriptor_set(device, descriptors.set);

        let render_pass = create_main_render_pass(device)?;
        let swapchain = Swapchain::new(vulkan_context, swapchain_info, render_pass)?;

        let pipeline_layout = unsafe {
            device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(slice_from_ref(&descriptors.graphics_layout))
                    .push_constant_ranges(&[vk::PushConstantRange {
                        stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                        offset: 0,
                        size: std::mem::size_of::<DrawData>() as u32,
                    }]),
                None,
            )
        }?;

        let (opaque_pipeline, blend_pipeline, shadow_pipeline) = create_pipelines(
            device,
            pipeline_layout,
            render_pass,
            shadow_map.render_pass,
            shaders,
        )?;

        let mut frames = Vec::with_capacity(PIPELINE_DEPTH);
        for _ in 0..PIPELINE_DEPTH {
            frames.push(Frame::new(vulkan_context)?);
        }

        println!("[YARRA_RENDER] ..done");

        Ok(Self {
            fence,
            uploader,
            geometry: GeometryRegistry::new(),
            texture_table,
            descriptors,
            scene_buffer,
            shadow_map,
            swapchain,
            render_pass,
            pipeline_layout,
            opaque_pipeline,
            blend_pipeline,
            shadow_pipeline,
            frames,
            frame_index: 0,
            swapchain_index: 0,
            scene: None,
        })
    }

    /// Upload a scene's buffers, materials and textures, then build its
    /// drawable primitives. Replaces any previously loaded scene once the
    /// uploads have demonstrably finished.
    pub fn load_scene(
        &mut self,
        vulkan_context: &VulkanContext,
        source: &SceneSource,
    ) -> Result<()> {
        let device = &vulkan_context.device;

        let mut buffer_ids: Vec<BufferId> = Vec::with_capacity(source.buffers.len());
        for bytes in &source.buffers {
            buffer_ids.push(self.geometry.register_buffer(
                vulkan_context,
                &mut self.uploader,
                bytes,
            )?);
        }

        let records: Vec<_> = source.materials.iter().map(|m| m.record).collect();
        let materials = MaterialStore::new(vulkan_context, &mut self.uploader, &records)?;
        materials.update_descriptor_set(device, self.descriptors.set);

        let mut textures =
            TextureStore::new(vulkan_context, &mut self.uploader, &mut self.texture_table)?;
        let mut scene_slots = Vec::with_capacity(source.images.len());
        for bytes in &source.images {
            scene_slots.push(textures.add_encoded(
                vulkan_context,
                &mut self.uploader,
                &mut self.texture_table,
                bytes,
            )?);
        }

        self.uploader.flush(vulkan_context, &mut self.fence)?;

        let mut primitives = Vec::with_capacity(source.primitives.len());
        for primitive in &source.primitives {
            primitives.push(build_primitive(
                primitive,
                &buffer_ids,
                materials.len(),
                source,
                &scene_slots,
            )?);
        }

        let order = draw_order(&primitives);
        println!(
            "[YARRA_RENDER] Loaded scene: {} primitives, {} materials, {} textures",
            primitives.len(),
            materials.len(),
            textures.len(),
        );

        self.scene = Some(Scene {
            materials,
            textures,
            primitives,
            order,
        });
        Ok(())
    }

    /// Begin recording a frame: rewrite the scene constants and open the
    /// frame's command buffer targeting swapchain image `swapchain_index`.
    pub fn begin_frame(
        &mut self,
        vulkan_context: &VulkanContext,
        swapchain_index: usize,
        scene_data: &SceneData,
    ) -> Result<()> {
        let device = &vulkan_context.device;
        self.frame_index = (self.frame_index + 1) % PIPELINE_DEPTH;
        self.swapchain_index = swapchain_index;

        let frame = &mut self.frames[self.frame_index];
        frame.begin_recording()?;

        // The frame is provably idle, so resetting its pool is safe.
        unsafe {
            device.reset_command_pool(frame.command_pool, vk::CommandPoolResetFlags::empty())?;
            device.begin_command_buffer(
                frame.command_buffer,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
            self.scene_buffer.overwrite(slice_from_ref(scene_data));
        }
        Ok(())
    }

    /// Record one pass into the current frame. The shadow pass must be
    /// recorded before the main pass.
    pub fn record_pass(&mut self, vulkan_context: &VulkanContext, kind: PassKind) -> Result<()> {
        let device = &vulkan_context.device;
        let command_buffer = self.frames[self.frame_index].command_buffer;

        unsafe {
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                slice_from_ref(&self.descriptors.set),
                &[],
            );
        }

        match kind {
            PassKind::Shadow => {
                self.shadow_map.record_begin(device, command_buffer);
                set_viewport(device, command_buffer, SHADOW_MAP_SIZE, SHADOW_MAP_SIZE);
                unsafe {
                    device.cmd_bind_pipeline(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.shadow_pipeline,
                    );
                }
                self.record_draws(device, command_buffer, kind);
                self.shadow_map.record_end(device, command_buffer);
            }
            PassKind::Main => {
                self.swapchain
                    .record_acquire_barrier(device, command_buffer, self.swapchain_index);

                let clear_values = [
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [0., 0., 0., 1.],
                        },
                    },
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 1.,
                            stencil: 0,
                        },
                    },
                ];
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(self.render_pass)
                    .framebuffer(self.swapchain.framebuffers[self.swapchain_index])
                    .render_area(self.swapchain.render_area)
                    .clear_values(&clear_values);

                unsafe {
                    device.cmd_begin_render_pass(
                        command_buffer,
                        &begin_info,
                        vk::SubpassContents::INLINE,
                    );
                }
                let extent = self.swapchain.render_area.extent;
                set_viewport(device, command_buffer, extent.width, extent.height);
                unsafe {
                    device.cmd_bind_pipeline(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.opaque_pipeline,
                    );
                }
                self.record_draws(device, command_buffer, kind);
                unsafe { device.cmd_end_render_pass(command_buffer) };

                self.swapchain
                    .record_present_barrier(device, command_buffer, self.swapchain_index);
            }
        }
        Ok(())
    }

    /// Close the current frame, submit it and wait for the GPU to finish it.
    /// Returns the fence value the submission signalled.
    pub fn end_frame(&mut self, vulkan_context: &VulkanContext) -> Result<u64> {
        let device = &vulkan_context.device;
        let frame = &mut self.frames[self.frame_index];
        unsafe { device.end_command_buffer(frame.command_buffer) }?;

        let target = self.fence.next_target();
        let signal_values = [target];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(slice_from_ref(&frame.command_buffer))
            .signal_semaphores(slice_from_ref(&self.fence.semaphore))
            .push_next(&mut timeline_info);

        unsafe {
            device.queue_submit(
                vulkan_context.graphics_queue,
                slice_from_ref(&submit_info),
                vk::Fence::null(),
            )
        }?;
        frame.mark_submitted(target)?;

        // Frames are fully serialised: the next frame may rewrite the scene
        // constants this one is reading.
        self.fence.wait_until(device, target)?;
        frame.retire()?;
        Ok(target)
    }

    fn record_draws(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        kind: PassKind,
    ) {
        let Some(scene) = &self.scene else { return };

        let mut bound_blend = false;
        for &index in &scene.order {
            let primitive = &scene.primitives[index];
            if primitive.transparent {
                // Transparent surfaces do not cast shadows.
                if kind == PassKind::Shadow {
                    continue;
                }
                // Draw order guarantees all opaque draws come first, so the
                // pipeline switches at most once per pass.
                if !bound_blend {
                    unsafe {
                        device.cmd_bind_pipeline(
                            command_buffer,
                            vk::PipelineBindPoint::GRAPHICS,
                            self.blend_pipeline,
                        );
                    }
                    bound_blend = true;
                }
            }
            self.record_primitive(device, command_buffer, primitive);
        }
    }

    fn record_primitive(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        primitive: &Primitive,
    ) {
        let position = stream_binding(&self.geometry, &primitive.position_view);
        let normal = stream_binding(&self.geometry, &primitive.normal_view);
        let uv = stream_binding(&self.geometry, &primitive.uv_view);
        let tangent = primitive
            .tangent_view
            .as_ref()
            .map(|view| stream_binding(&self.geometry, view))
            // Stride zero replays the first normal as a stand-in tangent.
            .unwrap_or((normal.0, normal.1, 0));

        let buffers = [position.0, normal.0, uv.0, tangent.0];
        let offsets = [position.1, normal.1, uv.1, tangent.1];
        let strides = [position.2, normal.2, uv.2, tangent.2];

        let draw_data = DrawData {
            model: primitive.transform,
            material_index: primitive.material_index,
            texture_slots: primitive.texture_slots,
        };
        let push_constant = unsafe {
            std::slice::from_raw_parts(
                &draw_data as *const DrawData as *const u8,
                std::mem::size_of::<DrawData>(),
            )
        };

        let index_buffer = self.geometry.get(primitive.index_view.buffer).buffer;
        unsafe {
            device.cmd_bind_vertex_buffers2(
                command_buffer,
                0,
                &buffers,
                &offsets,
                None,
                Some(&strides),
            );
            device.cmd_bind_index_buffer(
                command_buffer,
                index_buffer,
                primitive.index_view.byte_offset,
                IndexStreamView::INDEX_TYPE,
            );
            device.cmd_push_constants(
                command_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                push_constant,
            );
            device.cmd_draw_indexed(command_buffer, primitive.index_view.count, 1, 0, 0, 0);
        }
    }

    /// safety: no in-flight work may reference the context.
    pub unsafe fn destroy(&mut self, vulkan_context: &VulkanContext) {
        let device = &vulkan_context.device;
        if let Some(mut scene) = self.scene.take() {
            scene.materials.destroy(device);
            scene.textures.destroy(device);
        }
        for frame in &mut self.frames {
            frame.destroy(device);
        }
        device.destroy_pipeline(self.opaque_pipeline, None);
        device.destroy_pipeline(self.blend_pipeline, None);
        device.destroy_pipeline(self.shadow_pipeline, None);
        device.destroy_pipeline_layout(self.pipeline_layout, None);
        self.swapchain.destroy(device);
        device.destroy_render_pass(self.render_pass, None);
        self.shadow_map.destroy(device);
        self.scene_buffer.destroy(device);
        self.descriptors.destroy(device);
        self.geometry.destroy(device);
        self.uploader.destroy(vulkan_context);
        self.fence.destroy(device);
    }
}

fn build_primitive(
    source: &PrimitiveSource,
    buffer_ids: &[BufferId],
    material_count: u32,
    scene: &SceneSource,
    scene_slots: &[u32],
) -> Result<Primitive> {
    let buffer_id = |index: u32| -> Result<BufferId> {
        buffer_ids
            .get(index as usize)
            .copied()
            .ok_or(YarraError::IndexOutOfBounds {
                kind: "buffer",
                index: index as usize,
                len: buffer_ids.len(),
            })
    };
    let vertex_view = |accessor: &AccessorSource| -> Result<VertexStreamView> {
        Ok(VertexStreamView::new(
            buffer_id(accessor.buffer)?,
            accessor.view_byte_offset,
            accessor.accessor_byte_offset,
            accessor.byte_stride,
            accessor.count,
        ))
    };

    let material_index = resolve_material_index(source.material, material_count)?;
    let (texture_slots, transparent) = match source.material.and_then(|i| scene.materials.get(i as usize)) {
        Some(material) => (
            resolve_texture_slots(material.texture_images, scene_slots)?,
            material.transparent,
        ),
        None => (
            resolve_texture_slots([None; TEXTURE_KIND_COUNT], scene_slots)?,
            false,
        ),
    };

    Ok(Primitive {
        transform: source.transform,
        position_view: vertex_view(&source.position)?,
        normal_view: vertex_view(&source.normal)?,
        uv_view: vertex_view(&source.uv)?,
        tangent_view: source.tangent.as_ref().map(|a| vertex_view(a)).transpose()?,
        index_view: IndexStreamView::new(
            buffer_id(source.indices.buffer)?,
            source.indices.view_byte_offset,
            source.indices.accessor_byte_offset,
            source.indices.count,
        ),
        material_index,
        texture_slots,
        transparent,
    })
}

fn stream_binding(
    geometry: &GeometryRegistry,
    view: &VertexStreamView,
) -> (vk::Buffer, vk::DeviceSize, vk::DeviceSize) {
    (
        geometry.get(view.buffer).buffer,
        view.byte_offset,
        view.byte_stride,
    )
}

fn set_viewport(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    width: u32,
    height: u32,
) {
    let viewport = vk::Viewport {
        x: 0.,
        y: 0.,
        width: width as f32,
        height: height as f32,
        min_depth: 0.,
        max_depth: 1.,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent: vk::Extent2D { width, height },
    };
    unsafe {
        device.cmd_set_viewport(command_buffer, 0, slice_from_ref(&viewport));
        device.cmd_set_scissor(command_buffer, 0, slice_from_ref(&scissor));
    }
}

fn write_scene_buffer_descriptor(
    device: &ash::Device,
    set: vk::DescriptorSet,
    buffer: vk::Buffer,
) {
    let buffer_info = vk::DescriptorBufferInfo {
        buffer,
        offset: 0,
        range: vk::WHOLE_SIZE,
    };
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(SCENE_DATA_BINDING)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(slice_from_ref(&buffer_info));
    unsafe { device.update_descriptor_sets(slice_from_ref(&write), &[]) };
}

fn create_main_render_pass(device: &ash::Device) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::builder()
            .format(COLOR_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build(),
        vk::AttachmentDescription::builder()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build(),
    ];

    let color_reference = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();
    let depth_reference = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(slice_from_ref(&color_reference))
        .depth_stencil_attachment(&depth_reference);

    unsafe {
        device.create_render_pass(
            &vk::RenderPassCreateInfo::builder()
                .attachments(&attachments)
                .subpasses(slice_from_ref(&subpass)),
            None,
        )
    }
    .map_err(Into::into)
}

fn create_shader_module(device: &ash::Device, spirv: &[u32]) -> Result<vk::ShaderModule> {
    unsafe {
        device.create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(spirv), None)
    }
    .map_err(Into::into)
}

fn create_pipelines(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    shadow_render_pass: vk::RenderPass,
    shaders: &Shaders,
) -> Result<(vk::Pipeline, vk::Pipeline, vk::Pipeline)> {
    let vertex_module = create_shader_module(device, &shaders.vertex)?;
    let fragment_module = create_shader_module(device, &shaders.fragment)?;
    let shadow_module = create_shader_module(device, &shaders.shadow_vertex)?;

    let entry = std::ffi::CString::new("main").map_err(anyhow::Error::new)?;
    let main_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_module)
            .name(&entry)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_module)
            .name(&entry)
            .build(),
    ];
    let shadow_stages = [vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(shadow_module)
        .name(&entry)
        .build()];

    // Strides are dynamic; only formats and locations are pipeline state.
    let vertex_bindings: Vec<_> = (0..4)
        .map(|binding| vk::VertexInputBindingDescription {
            binding,
            stride: 0,
            input_rate: vk::VertexInputRate::VERTEX,
        })
        .collect();
    let vertex_attributes = [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 1,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 2,
            format: vk::Format::R32G32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 3,
            binding: 3,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: 0,
        },
    ];
    let main_vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);
    let shadow_vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&vertex_bindings[0..1])
        .vertex_attribute_descriptions(&vertex_attributes[0..1]);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.);
    let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
    // Transparent draws keep depth testing but stop writing, so they cannot
    // occlude each other.
    let depth_read_only = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(false)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

    let opaque_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build();
    let blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build();
    let opaque_blend = vk::PipelineColorBlendStateCreateInfo::builder()
        .attachments(slice_from_ref(&opaque_attachment));
    let transparent_blend = vk::PipelineColorBlendStateCreateInfo::builder()
        .attachments(slice_from_ref(&blend_attachment));
    let no_color_blend = vk::PipelineColorBlendStateCreateInfo::builder();

    let dynamic_states = [
        vk::DynamicState::VIEWPORT,
        vk::DynamicState::SCISSOR,
        vk::DynamicState::VERTEX_INPUT_BINDING_STRIDE,
    ];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let create_infos = [
        vk::GraphicsPipelineCreateInfo::builder()
            .stages(&main_stages)
            .vertex_input_state(&main_vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&opaque_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build(),
        vk::GraphicsPipelineCreateInfo::builder()
            .stages(&main_stages)
            .vertex_input_state(&main_vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_read_only)
            .color_blend_state(&transparent_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build(),
        vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shadow_stages)
            .vertex_input_state(&shadow_vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&no_color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(shadow_render_pass)
            .subpass(0)
            .build(),
    ];

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &create_infos, None)
    }
    .map_err(|(_, err)| err)?;

    unsafe {
        device.destroy_shader_module(vertex_module, None);
        device.destroy_shader_module(fragment_module, None);
        device.destroy_shader_module(shadow_module, None);
    }

    Ok((pipelines[0], pipelines[1], pipelines[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::buffer::{DeviceBuffer, ResourceState};
    use id_arena::Arena;
    use memoffset::offset_of;

    #[test]
    pub fn draw_data_layout_fits_push_constants() {
        // 128 bytes is the guaranteed minimum push constant budget.
        assert!(std::mem::size_of::<DrawData>() <= 128);
        assert_eq!(offset_of!(DrawData, model), 0);
        assert_eq!(offset_of!(DrawData, material_index), 64);
        assert_eq!(offset_of!(DrawData, texture_slots), 68);
    }

    fn dummy_buffer_ids(count: usize) -> Vec<BufferId> {
        let mut arena: Arena<DeviceBuffer> = Arena::new();
        (0..count)
            .map(|_| {
                arena.alloc(DeviceBuffer {
                    buffer: vk::Buffer::null(),
                    device_memory: vk::DeviceMemory::null(),
                    size: 0,
                    device_address: 0,
                    state: ResourceState::CopyDest,
                })
            })
            .collect()
    }

    fn accessor(buffer: u32) -> AccessorSource {
        AccessorSource {
            buffer,
            view_byte_offset: 0,
            accessor_byte_offset: 0,
            byte_stride: 12,
            count: 3,
        }
    }

    fn primitive_source(buffer: u32, material: Option<u32>) -> PrimitiveSource {
        PrimitiveSource {
            transform: Mat4::IDENTITY,
            position: accessor(buffer),
            normal: accessor(buffer),
            uv: accessor(buffer),
            tangent: None,
            indices: accessor(buffer),
            material,
        }
    }

    #[test]
    pub fn dangling_buffer_references_are_rejected() {
        let buffer_ids = dummy_buffer_ids(1);
        let scene = SceneSource::default();
        let source = primitive_source(3, None);

        match build_primitive(&source, &buffer_ids, 1, &scene, &[]) {
            Err(YarraError::IndexOutOfBounds { kind, index, len }) => {
                assert_eq!(kind, "buffer");
                assert_eq!(index, 3);
                assert_eq!(len, 1);
            }
            other => panic!("expected IndexOutOfBounds, got {other:?}"),
        }
    }

    #[test]
    pub fn dangling_material_references_are_rejected() {
        let buffer_ids = dummy_buffer_ids(1);
        let scene = SceneSource::default();
        let source = primitive_source(0, Some(2));

        match build_primitive(&source, &buffer_ids, 1, &scene, &[]) {
            Err(YarraError::IndexOutOfBounds { kind, index, len }) => {
                assert_eq!(kind, "material");
                assert_eq!(index, 2);
                assert_eq!(len, 1);
            }
            other => panic!("expected IndexOutOfBounds, got {other:?}"),
        }
    }

    #[test]
    pub fn in_bounds_references_resolve() {
        let buffer_ids = dummy_buffer_ids(1);
        let scene = SceneSource::default();
        let source = primitive_source(0, None);

        let primitive = build_primitive(&source, &buffer_ids, 1, &scene, &[]).unwrap();
        assert_eq!(primitive.material_index, 0);
        assert!(!primitive.transparent);
    }
}
