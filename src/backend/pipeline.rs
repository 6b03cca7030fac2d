// Graphics pipeline creation
//
// `PipelineBuilder` collects the render pass layout (attachments, subpasses,
// dependencies) and the fixed-function state, then is consumed once by
// `build` to create the render pass, pipeline layout and pipeline.

use anyhow::{Context, Result};
use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use super::device::Device;
use super::shader::{load_stages, ShaderStage};
use crate::error::SetupError;

/// Colour attachment that is cleared, stored and handed to presentation
pub fn present_color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()
}

/// Blend state that writes source colour over the destination
pub fn replace_blend() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::ONE)
        .dst_color_blend_factor(vk::BlendFactor::ZERO)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()
}

/// One subpass; owns the attachment references it points at
#[derive(Debug, Clone, Default)]
pub struct SubpassSpec {
    pub flags: vk::SubpassDescriptionFlags,
    pub bind_point: vk::PipelineBindPoint,
    pub input_attachments: Vec<vk::AttachmentReference>,
    pub color_attachments: Vec<vk::AttachmentReference>,
    /// Empty, or one entry per colour attachment
    pub resolve_attachments: Vec<vk::AttachmentReference>,
    pub depth_stencil_attachment: Option<vk::AttachmentReference>,
    pub preserve_attachments: Vec<u32>,
}

impl SubpassSpec {
    pub fn graphics() -> Self {
        Self {
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            ..Default::default()
        }
    }

    pub fn color(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.color_attachments.push(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn input(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.input_attachments.push(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn depth_stencil(mut self, attachment: u32, layout: vk::ImageLayout) -> Self {
        self.depth_stencil_attachment = Some(vk::AttachmentReference { attachment, layout });
        self
    }

    pub fn preserve(mut self, attachment: u32) -> Self {
        self.preserve_attachments.push(attachment);
        self
    }

    /// Borrowing view for `vk::RenderPassCreateInfo`; valid while `self` is
    fn description(&self) -> vk::SubpassDescription {
        let mut builder = vk::SubpassDescription::builder()
            .flags(self.flags)
            .pipeline_bind_point(self.bind_point)
            .input_attachments(&self.input_attachments)
            .color_attachments(&self.color_attachments)
            .preserve_attachments(&self.preserve_attachments);
        if !self.resolve_attachments.is_empty() {
            builder = builder.resolve_attachments(&self.resolve_attachments);
        }
        if let Some(depth) = self.depth_stencil_attachment.as_ref() {
            builder = builder.depth_stencil_attachment(depth);
        }
        builder.build()
    }

    fn references(&self) -> impl Iterator<Item = u32> + '_ {
        self.input_attachments
            .iter()
            .chain(&self.color_attachments)
            .chain(&self.resolve_attachments)
            .chain(self.depth_stencil_attachment.iter())
            .map(|r| r.attachment)
            .chain(self.preserve_attachments.iter().copied())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

/// Everything needed to build a render pass and a graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    shaders: Vec<PathBuf>,

    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    primitive_restart: bool,

    viewport: vk::Viewport,
    scissor: vk::Rect2D,

    depth_clamp: bool,
    rasterizer_discard: bool,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    depth_bias: Option<DepthBias>,
    line_width: f32,

    rasterization_samples: vk::SampleCountFlags,
    min_sample_shading: Option<f32>,
    alpha_to_coverage: bool,
    alpha_to_one: bool,

    color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    logic_op: Option<vk::LogicOp>,
    blend_constants: [f32; 4],

    push_constant_ranges: Vec<vk::PushConstantRange>,

    attachments: Vec<vk::AttachmentDescription>,
    subpasses: Vec<SubpassSpec>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl PipelineBuilder {
    /// Triangle list, filled, back-face culled, covering all of `extent`
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            shaders: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            viewport: vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            scissor: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            depth_clamp: false,
            rasterizer_discard: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_bias: None,
            line_width: 1.0,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: None,
            alpha_to_coverage: false,
            alpha_to_one: false,
            color_blend_attachments: Vec::new(),
            logic_op: None,
            blend_constants: [0.0; 4],
            push_constant_ranges: Vec::new(),
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn shader(mut self, path: impl Into<PathBuf>) -> Self {
        self.shaders.push(path.into());
        self
    }

    pub fn shaders<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.shaders.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attribute(mut self, attribute: vk::VertexInputAttributeDescription) -> Self {
        self.vertex_attributes.push(attribute);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology, primitive_restart: bool) -> Self {
        self.topology = topology;
        self.primitive_restart = primitive_restart;
        self
    }

    pub fn viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn scissor(mut self, scissor: vk::Rect2D) -> Self {
        self.scissor = scissor;
        self
    }

    pub fn depth_clamp(mut self, enable: bool) -> Self {
        self.depth_clamp = enable;
        self
    }

    pub fn rasterizer_discard(mut self, enable: bool) -> Self {
        self.rasterizer_discard = enable;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn depth_bias(mut self, bias: DepthBias) -> Self {
        self.depth_bias = Some(bias);
        self
    }

    pub fn line_width(mut self, width: f32) -> Self {
        self.line_width = width;
        self
    }

    pub fn rasterization_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.rasterization_samples = samples;
        self
    }

    pub fn sample_shading(mut self, min_sample_shading: f32) -> Self {
        self.min_sample_shading = Some(min_sample_shading);
        self
    }

    pub fn alpha_to_coverage(mut self, enable: bool) -> Self {
        self.alpha_to_coverage = enable;
        self
    }

    pub fn alpha_to_one(mut self, enable: bool) -> Self {
        self.alpha_to_one = enable;
        self
    }

    pub fn color_blend_attachment(mut self, state: vk::PipelineColorBlendAttachmentState) -> Self {
        self.color_blend_attachments.push(state);
        self
    }

    pub fn logic_op(mut self, op: vk::LogicOp) -> Self {
        self.logic_op = Some(op);
        self
    }

    pub fn blend_constants(mut self, constants: [f32; 4]) -> Self {
        self.blend_constants = constants;
        self
    }

    pub fn push_constant_range(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }

    pub fn attachment(mut self, description: vk::AttachmentDescription) -> Self {
        self.attachments.push(description);
        self
    }

    pub fn subpass(mut self, subpass: SubpassSpec) -> Self {
        self.subpasses.push(subpass);
        self
    }

    pub fn dependency(mut self, dependency: vk::SubpassDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Catch descriptions Vulkan would reject before any object is created
    pub fn validate(&self) -> Result<(), SetupError> {
        let invalid = |msg: String| Err(SetupError::InvalidPipeline(msg));

        let Some(first) = self.subpasses.first() else {
            return invalid("at least one subpass is required".into());
        };

        let count = self.attachments.len() as u32;
        for (index, subpass) in self.subpasses.iter().enumerate() {
            if let Some(bad) = subpass
                .references()
                .find(|&a| a != vk::ATTACHMENT_UNUSED && a >= count)
            {
                return invalid(format!(
                    "subpass {} references attachment {} but only {} exist",
                    index, bad, count
                ));
            }
            if !subpass.resolve_attachments.is_empty()
                && subpass.resolve_attachments.len() != subpass.color_attachments.len()
            {
                return invalid(format!(
                    "subpass {} has {} resolve attachments for {} colour attachments",
                    index,
                    subpass.resolve_attachments.len(),
                    subpass.color_attachments.len()
                ));
            }
        }

        // The pipeline is built for subpass 0
        if self.color_blend_attachments.len() != first.color_attachments.len() {
            return invalid(format!(
                "{} colour blend states for {} colour attachments",
                self.color_blend_attachments.len(),
                first.color_attachments.len()
            ));
        }

        Ok(())
    }

    /// Create the render pass, layout and pipeline, consuming the builder
    pub fn build(self, device: &Arc<Device>) -> Result<GraphicsPipeline> {
        self.validate()?;

        let modules = load_stages(device, &self.shaders)?;
        if !modules.iter().any(|m| m.stage == ShaderStage::Vertex) {
            return Err(SetupError::InvalidPipeline("no vertex shader was loaded".into()).into());
        }
        let stages: Vec<_> = modules.iter().map(|m| m.stage_info()).collect();

        // Null handles are skipped by Drop, so partial failure cleans up.
        let mut pipeline = GraphicsPipeline {
            pipeline: vk::Pipeline::null(),
            render_pass: vk::RenderPass::null(),
            layout: vk::PipelineLayout::null(),
            device: device.clone(),
        };

        let layout_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(&self.push_constant_ranges);
        pipeline.layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;
        log::info!("Created Pipeline Layout");

        let subpasses: Vec<_> = self.subpasses.iter().map(SubpassSpec::description).collect();
        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&self.attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);
        pipeline.render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;
        log::info!("Created Render Pass");

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(self.primitive_restart);

        let viewports = [self.viewport];
        let scissors = [self.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let bias = self.depth_bias;
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(self.depth_clamp)
            .rasterizer_discard_enable(self.rasterizer_discard)
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(bias.is_some())
            .depth_bias_constant_factor(bias.map_or(0.0, |b| b.constant_factor))
            .depth_bias_clamp(bias.map_or(0.0, |b| b.clamp))
            .depth_bias_slope_factor(bias.map_or(0.0, |b| b.slope_factor))
            .line_width(self.line_width);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(self.rasterization_samples)
            .sample_shading_enable(self.min_sample_shading.is_some())
            .min_sample_shading(self.min_sample_shading.unwrap_or(1.0))
            .alpha_to_coverage_enable(self.alpha_to_coverage)
            .alpha_to_one_enable(self.alpha_to_one);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(self.logic_op.is_some())
            .logic_op(self.logic_op.unwrap_or(vk::LogicOp::COPY))
            .attachments(&self.color_blend_attachments)
            .blend_constants(self.blend_constants);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(pipeline.layout)
            .render_pass(pipeline.render_pass)
            .subpass(0)
            .base_pipeline_index(-1)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };
        pipeline.pipeline = pipelines[0];
        log::info!("Created Graphics Pipeline");

        // Shader modules are no longer needed once the pipeline exists
        drop(modules);

        Ok(pipeline)
    }
}

/// Render pass, layout and pipeline, destroyed together
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    device: Arc<Device>,
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_render_pass(self.render_pass, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent() -> vk::Extent2D {
        vk::Extent2D { width: 640, height: 480 }
    }

    fn single_color_pass() -> PipelineBuilder {
        PipelineBuilder::new(extent())
            .attachment(present_color_attachment(vk::Format::B8G8R8A8_SRGB))
            .color_blend_attachment(replace_blend())
            .subpass(SubpassSpec::graphics().color(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
    }

    #[test]
    fn viewport_and_scissor_cover_the_extent() {
        let builder = PipelineBuilder::new(extent());
        assert_eq!(builder.viewport.width, 640.0);
        assert_eq!(builder.viewport.height, 480.0);
        assert_eq!(builder.scissor.extent.width, 640);
        assert_eq!(builder.scissor.extent.height, 480);
    }

    #[test]
    fn single_color_pass_is_valid() {
        assert!(single_color_pass().validate().is_ok());
    }

    #[test]
    fn sequences_keep_insertion_order() {
        let builder = single_color_pass()
            .attachment(present_color_attachment(vk::Format::R8G8B8A8_UNORM))
            .subpass(SubpassSpec::graphics().input(1, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(builder.attachments[1].format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(builder.subpasses.len(), 2);
        assert_eq!(builder.subpasses[1].input_attachments[0].attachment, 1);
    }

    #[test]
    fn needs_a_subpass() {
        let builder = PipelineBuilder::new(extent());
        assert!(matches!(builder.validate(), Err(SetupError::InvalidPipeline(_))));
    }

    #[test]
    fn rejects_out_of_range_reference() {
        let builder = single_color_pass().subpass(SubpassSpec::graphics().preserve(3));
        assert!(matches!(builder.validate(), Err(SetupError::InvalidPipeline(_))));
    }

    #[test]
    fn unused_attachment_is_allowed() {
        let builder = single_color_pass().subpass(
            SubpassSpec::graphics().depth_stencil(vk::ATTACHMENT_UNUSED, vk::ImageLayout::UNDEFINED),
        );
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn blend_states_must_match_color_attachments() {
        let builder = single_color_pass().color_blend_attachment(replace_blend());
        assert!(matches!(builder.validate(), Err(SetupError::InvalidPipeline(_))));
    }

    #[test]
    fn resolve_count_must_match_color_count() {
        let mut subpass = SubpassSpec::graphics()
            .color(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .color(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        subpass.resolve_attachments.push(vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        let builder = PipelineBuilder::new(extent())
            .attachment(present_color_attachment(vk::Format::B8G8R8A8_SRGB))
            .color_blend_attachment(replace_blend())
            .color_blend_attachment(replace_blend())
            .subpass(subpass);
        assert!(matches!(builder.validate(), Err(SetupError::InvalidPipeline(_))));
    }

    #[test]
    fn subpass_description_points_at_owned_references() {
        let subpass = SubpassSpec::graphics()
            .color(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .depth_stencil(1, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let description = subpass.description();
        assert_eq!(description.color_attachment_count, 1);
        assert_eq!(description.p_color_attachments, subpass.color_attachments.as_ptr());
        assert!(!description.p_depth_stencil_attachment.is_null());
        assert!(description.p_resolve_attachments.is_null());
    }
}
