//! Shader modules, graphics pipelines and compute pipelines

use anyhow::Context;
use ash::vk;
use log::debug;

use super::{Device, RenderPass};

/// Represents a compiled shader module.
pub struct ShaderModule {
    handle: vk::ShaderModule,
    device: ash::Device,
}

impl ShaderModule {
    /// Creates a shader module from SPIR-V words.
    pub fn from_spirv(device: &Device, spirv: &[u32]) -> anyhow::Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);

        let handle = unsafe { device.handle().create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self {
            handle,
            device: device.handle().clone(),
        })
    }

    /// Returns the shader module handle.
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}

/// How fragment outputs combine with the attachment contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Outputs replace the attachment
    Replace,
    /// Outputs are added to the attachment
    Additive,
}

impl BlendMode {
    fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .color_blend_op(vk::BlendOp::ADD)
            .alpha_blend_op(vk::BlendOp::ADD);
        match self {
            Self::Replace => state.blend_enable(false),
            Self::Additive => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE),
        }
    }
}

/// Represents a Vulkan graphics pipeline together with its layout.
pub struct GraphicsPipeline {
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
    device: ash::Device,
}

/// Builder for creating graphics pipelines.
pub struct GraphicsPipelineBuilder<'a> {
    device: &'a Device,
    render_pass: &'a RenderPass,
    subpass: u32,
    vertex_shader: Option<&'a ShaderModule>,
    fragment_shader: Option<&'a ShaderModule>,
    descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    color_attachments: usize,
    blend: BlendMode,
    fixed_viewport: Option<vk::Extent2D>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Creates a new pipeline builder for subpass 0 of `render_pass` with one color attachment.
    pub fn new(device: &'a Device, render_pass: &'a RenderPass) -> Self {
        Self {
            device,
            render_pass,
            subpass: 0,
            vertex_shader: None,
            fragment_shader: None,
            descriptor_set_layouts: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            color_attachments: 1,
            blend: BlendMode::Replace,
            fixed_viewport: None,
        }
    }

    /// Sets the vertex shader.
    pub fn vertex_shader(mut self, shader: &'a ShaderModule) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    /// Sets the fragment shader.
    pub fn fragment_shader(mut self, shader: &'a ShaderModule) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    /// Adds a descriptor set layout.
    pub fn descriptor_set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.descriptor_set_layouts.push(layout);
        self
    }

    /// Adds a vertex buffer binding with its attributes.
    pub fn vertex_binding(
        mut self,
        binding: vk::VertexInputBindingDescription,
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.vertex_bindings.push(binding);
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    /// Selects the subpass the pipeline is used in.
    pub fn subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }

    /// Sets the number of color attachments of the subpass and how they blend.
    pub fn color_attachments(mut self, count: usize, blend: BlendMode) -> Self {
        self.color_attachments = count;
        self.blend = blend;
        self
    }

    /// Bakes a viewport and scissor covering `extent` into the pipeline instead of setting them
    /// while recording.
    pub fn fixed_viewport(mut self, extent: vk::Extent2D) -> Self {
        self.fixed_viewport = Some(extent);
        self
    }

    /// Builds the graphics pipeline.
    pub fn build(self) -> anyhow::Result<GraphicsPipeline> {
        let Some(vertex_shader) = self.vertex_shader else {
            anyhow::bail!("A graphics pipeline needs a vertex shader");
        };

        let mut shader_stages = vec![
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.handle())
                .name(c"main"),
        ];
        if let Some(fragment_shader) = self.fragment_shader {
            shader_stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment_shader.handle())
                    .name(c"main"),
            );
        }

        let layout_create_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&self.descriptor_set_layouts);

        let layout = unsafe {
            self.device
                .handle()
                .create_pipeline_layout(&layout_create_info, None)
        }
        .context("Failed to create pipeline layout")?;

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports;
        let scissors;
        let mut viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let mut dynamic_states = Vec::new();
        match self.fixed_viewport {
            Some(extent) => {
                viewports = [full_viewport(extent)];
                scissors = [vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }];
                viewport_state = viewport_state.viewports(&viewports).scissors(&scissors);
            }
            None => {
                dynamic_states.extend([vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);
            }
        }

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments =
            vec![self.blend.attachment_state(); self.color_attachments];

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(self.render_pass.handle())
            .subpass(self.subpass);

        let result = unsafe {
            self.device.handle().create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info],
                None,
            )
        };

        let handle = match result {
            Ok(pipelines) if !pipelines.is_empty() => pipelines[0],
            Ok(_) => {
                unsafe { self.device.handle().destroy_pipeline_layout(layout, None) };
                anyhow::bail!("No pipelines were created");
            }
            Err((_pipelines, err)) => {
                unsafe { self.device.handle().destroy_pipeline_layout(layout, None) };
                anyhow::bail!("Failed to create graphics pipeline: {:?}", err);
            }
        };

        debug!(
            "Created graphics pipeline for subpass {} ({} color attachments)",
            self.subpass, self.color_attachments
        );

        Ok(GraphicsPipeline {
            handle,
            layout,
            device: self.device.handle().clone(),
        })
    }
}

impl GraphicsPipeline {
    /// Returns the pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    /// Returns the pipeline layout.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed graphics pipeline");
    }
}

/// A compute pipeline together with its layout.
pub struct ComputePipeline {
    handle: vk::Pipeline,
    layout: vk::PipelineLayout,
    device: ash::Device,
}

impl ComputePipeline {
    /// Creates a compute pipeline running `main` of `shader`.
    pub fn new(
        device: &Device,
        shader: &ShaderModule,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> anyhow::Result<Self> {
        let layout_create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe {
            device
                .handle()
                .create_pipeline_layout(&layout_create_info, None)
        }
        .context("Failed to create compute pipeline layout")?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(c"main");

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let result = unsafe {
            device.handle().create_compute_pipelines(
                vk::PipelineCache::null(),
                &[create_info],
                None,
            )
        };

        let handle = match result {
            Ok(pipelines) if !pipelines.is_empty() => pipelines[0],
            Ok(_) => {
                unsafe { device.handle().destroy_pipeline_layout(layout, None) };
                anyhow::bail!("No compute pipelines were created");
            }
            Err((_pipelines, err)) => {
                unsafe { device.handle().destroy_pipeline_layout(layout, None) };
                anyhow::bail!("Failed to create compute pipeline: {:?}", err);
            }
        };

        debug!("Created compute pipeline");

        Ok(Self {
            handle,
            layout,
            device: device.handle().clone(),
        })
    }

    /// Returns the pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    /// Returns the pipeline layout.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed compute pipeline");
    }
}

/// A viewport covering `extent` with the default depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_blend_is_disabled() {
        let state = BlendMode::Replace.attachment_state();
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn additive_blend_sums_colors() {
        let state = BlendMode::Additive.attachment_state();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
    }

    #[test]
    fn viewport_covers_extent() {
        let viewport = full_viewport(vk::Extent2D {
            width: 512,
            height: 256,
        });
        assert_eq!(viewport.width, 512.0);
        assert_eq!(viewport.height, 256.0);
        assert_eq!(viewport.max_depth, 1.0);
    }
}
