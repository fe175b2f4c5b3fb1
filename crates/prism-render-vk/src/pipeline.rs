// SPDX-License-Identifier: CEPL-1.0
//! Render pass, descriptor layout and the fixed graphics pipeline.
//!
//! Viewport and scissor are baked into the pipeline, so it has to be rebuilt
//! whenever the swapchain extent changes.

use crate::error::{Result, VkError, VkResultExt};
use ash::util::read_spv;
use ash::vk;
use prism_render::{AttributeFormat, RenderFeatures, VertexLayout};
use std::io::Cursor;
use std::path::Path;

const ENTRY: &std::ffi::CStr = c"main";

pub const VERTEX_SPV: &str = "mesh.vert.spv";
pub const COLOR_FRAGMENT_SPV: &str = "color.frag.spv";
pub const TEXTURED_FRAGMENT_SPV: &str = "textured.frag.spv";

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;

/// Color attachment, then the depth attachment when one is used.
pub fn render_pass_attachments(
    color: vk::Format,
    depth: Option<vk::Format>,
) -> Vec<vk::AttachmentDescription> {
    let mut attachments = vec![vk::AttachmentDescription {
        format: color,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];
    if let Some(format) = depth {
        attachments.push(vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        });
    }
    attachments
}

/// Orders this frame's attachment writes after whatever the presentation
/// engine was still doing with the image.
pub fn subpass_dependency(depth: bool) -> vk::SubpassDependency {
    let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    if depth {
        stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: stages,
        dst_access_mask: access,
        ..Default::default()
    }
}

pub unsafe fn create_render_pass(
    device: &ash::Device,
    color: vk::Format,
    depth: Option<vk::Format>,
) -> Result<vk::RenderPass> {
    let attachments = render_pass_attachments(color, depth);
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: if depth.is_some() {
            &depth_ref
        } else {
            std::ptr::null()
        },
        ..Default::default()
    };
    let dependency = subpass_dependency(depth.is_some());

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .map_vk(VkError::RenderPassCreation, "create_render_pass")
}

/// SPIR-V words for every stage the renderer may need.
#[derive(Clone, Debug, Default)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub color_fragment: Vec<u32>,
    pub textured_fragment: Vec<u32>,
}

impl ShaderSet {
    /// Reads `*.spv` from `dir`, or uses the set embedded at build time.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Ok(Self {
                vertex: read_file(&dir.join(VERTEX_SPV))?,
                color_fragment: read_file(&dir.join(COLOR_FRAGMENT_SPV))?,
                textured_fragment: read_file(&dir.join(TEXTURED_FRAGMENT_SPV))?,
            }),
            None => Self::embedded(),
        }
    }

    #[cfg(feature = "embed-shaders")]
    fn embedded() -> Result<Self> {
        Ok(Self {
            vertex: decode(
                VERTEX_SPV,
                include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv")),
            )?,
            color_fragment: decode(
                COLOR_FRAGMENT_SPV,
                include_bytes!(concat!(env!("OUT_DIR"), "/color.frag.spv")),
            )?,
            textured_fragment: decode(
                TEXTURED_FRAGMENT_SPV,
                include_bytes!(concat!(env!("OUT_DIR"), "/textured.frag.spv")),
            )?,
        })
    }

    #[cfg(not(feature = "embed-shaders"))]
    fn embedded() -> Result<Self> {
        Err(VkError::Shader(
            "no shader_dir configured and this build has no embedded SPIR-V \
             (enable the `embed-shaders` feature)"
                .into(),
        ))
    }

    pub fn fragment(&self, features: RenderFeatures) -> &[u32] {
        if features.contains(RenderFeatures::TEXTURING) {
            &self.textured_fragment
        } else {
            &self.color_fragment
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|e| VkError::Shader(format!("{}: {e}", path.display())))?;
    decode(&path.display().to_string(), &bytes)
}

/// Checks magic and alignment and converts to words.
pub fn decode(name: &str, bytes: &[u8]) -> Result<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).map_err(|e| VkError::Shader(format!("{name}: {e}")))
}

pub fn attribute_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
    }
}

/// One interleaved per-vertex binding at 0.
pub fn vertex_input(
    layout: &VertexLayout,
) -> (vk::VertexInputBindingDescription, Vec<vk::VertexInputAttributeDescription>) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: layout.stride,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = layout
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: 0,
            format: attribute_format(a.format),
            offset: a.offset,
        })
        .collect();
    (binding, attributes)
}

pub fn descriptor_bindings(features: RenderFeatures) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    let mut bindings = vec![vk::DescriptorSetLayoutBinding {
        binding: UNIFORM_BINDING,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::VERTEX,
        ..Default::default()
    }];
    if features.contains(RenderFeatures::TEXTURING) {
        bindings.push(vk::DescriptorSetLayoutBinding {
            binding: SAMPLER_BINDING,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        });
    }
    bindings
}

pub unsafe fn create_descriptor_set_layout(
    device: &ash::Device,
    features: RenderFeatures,
) -> Result<vk::DescriptorSetLayout> {
    let bindings = descriptor_bindings(features);
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    device
        .create_descriptor_set_layout(&ci, None)
        .map_vk(VkError::PipelineCreation, "create_descriptor_set_layout")
}

/// Inputs to one pipeline build.
pub struct PipelineDesc<'a> {
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    pub set_layout: vk::DescriptorSetLayout,
    pub vertex_layout: &'a VertexLayout,
    pub shaders: &'a ShaderSet,
    pub features: RenderFeatures,
}

unsafe fn shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: std::mem::size_of_val(code),
        p_code: code.as_ptr(),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .map_vk(VkError::PipelineCreation, "create_shader_module")
}

/// Builds the layout and pipeline. Shader modules only live for the call.
pub unsafe fn create_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let vs = shader_module(device, &desc.shaders.vertex)?;
    let fs = match shader_module(device, desc.shaders.fragment(desc.features)) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };
    let built = build_pipeline(device, desc, vs, fs);
    device.destroy_shader_module(fs, None);
    device.destroy_shader_module(vs, None);
    built
}

unsafe fn build_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
    ];

    let (binding, attributes) = vertex_input(desc.vertex_layout);
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: attributes.len() as u32,
        p_vertex_attribute_descriptions: attributes.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: desc.extent.width as f32,
        height: desc.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: desc.extent,
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: &viewport,
        scissor_count: 1,
        p_scissors: &scissor,
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let depth_on = desc.features.contains(RenderFeatures::DEPTH);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        max_depth_bounds: 1.0,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &desc.set_layout,
        ..Default::default()
    };
    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .map_vk(VkError::PipelineCreation, "create_pipeline_layout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: if depth_on {
            &depth_stencil
        } else {
            std::ptr::null()
        },
        p_color_blend_state: &color_blend,
        layout,
        render_pass: desc.render_pass,
        subpass: 0,
        ..Default::default()
    };

    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => Ok((layout, p[0])),
        Err((_, err)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(VkError::PipelineCreation("create_graphics_pipelines", err))
        }
    }
}
