use std::borrow::Cow;
use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::error::{RenderError, Result};
use crate::program::{ProgramLayout, ProgramSpec};
use crate::uniforms::{UniformBlock, UniformValue};

/// Attachment formats a pipeline is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TargetFormat {
    pub color: wgpu::TextureFormat,
    pub depth: Option<wgpu::TextureFormat>,
}

/// One compiled program on the device: shader modules, its uniform buffer
/// and bind group, and render pipelines built lazily per target format.
pub(crate) struct ProgramBinding {
    layout: ProgramLayout,
    block: UniformBlock,
    vertex_module: wgpu::ShaderModule,
    fragment_module: wgpu::ShaderModule,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<TargetFormat, wgpu::RenderPipeline>,
}

impl ProgramBinding {
    /// Validates and compiles `spec`. Diagnostics from either stage or from
    /// linking are returned unchanged.
    pub(crate) fn new(device: &wgpu::Device, spec: ProgramSpec) -> Result<Self> {
        let layout = ProgramLayout::build(spec)?;
        let block = layout.uniform_block();
        for name in block.unresolved() {
            tracing::warn!(program = layout.label(), uniform = name, "uniform is inert");
        }

        let vertex_module = shader_module(
            device,
            layout.label(),
            &layout.spec().vertex_source,
            wgpu::naga::ShaderStage::Vertex,
        );
        let fragment_module = shader_module(
            device,
            layout.label(),
            &layout.spec().fragment_source,
            wgpu::naga::ShaderStage::Fragment,
        );

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} uniforms", layout.label())),
            size: block.as_bytes().len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} uniform bind group", layout.label())),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} texture layout", layout.label())),
            entries: &texture_layout_entries(&layout),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} pipeline layout", layout.label())),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            layout,
            block,
            vertex_module,
            fragment_module,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        })
    }

    pub(crate) fn label(&self) -> &str {
        self.layout.label()
    }

    /// Makes sure a pipeline exists for `format`.
    pub(crate) fn prepare(&mut self, device: &wgpu::Device, format: TargetFormat) {
        if self.pipelines.contains_key(&format) {
            return;
        }
        let pipeline = self.build_pipeline(device, format);
        self.pipelines.insert(format, pipeline);
    }

    /// Stages `values` for the next [`Self::upload`]. The whole list is
    /// checked first; a rejected call leaves the staged block unchanged.
    pub(crate) fn set_uniforms(&mut self, values: &[UniformValue]) -> Result<()> {
        self.block.set(values)
    }

    /// Copies the staged block into the uniform buffer ahead of the pass
    /// recorded next on `encoder`.
    pub(crate) fn upload(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder) {
        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("uniform staging"),
            contents: self.block.as_bytes(),
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        encoder.copy_buffer_to_buffer(
            &staging,
            0,
            &self.uniform_buffer,
            0,
            self.block.as_bytes().len() as u64,
        );
    }

    /// Binds the texture/sampler pairs in binding order.
    pub(crate) fn texture_bind_group(
        &self,
        device: &wgpu::Device,
        inputs: &[(&wgpu::TextureView, &wgpu::Sampler)],
    ) -> Result<wgpu::BindGroup> {
        let interface = self.layout.interface();
        if inputs.len() != interface.textures.len() || inputs.len() != interface.samplers.len() {
            return Err(RenderError::SpecMismatch(format!(
                "{}: {} texture inputs supplied for {} texture slots",
                self.label(),
                inputs.len(),
                interface.textures.len()
            )));
        }

        let mut entries = Vec::with_capacity(inputs.len() * 2);
        for (&(view, sampler), (texture, sampler_slot)) in inputs
            .iter()
            .zip(interface.textures.iter().zip(&interface.samplers))
        {
            entries.push(wgpu::BindGroupEntry {
                binding: texture.binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: sampler_slot.binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }

        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} texture bind group", self.label())),
            layout: &self.texture_layout,
            entries: &entries,
        }))
    }

    /// Activates the pipeline for `format` and the uniform bind group.
    /// [`Self::prepare`] must have run for `format`.
    pub(crate) fn use_program(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        format: TargetFormat,
    ) -> Result<()> {
        let pipeline = self.pipelines.get(&format).ok_or_else(|| {
            RenderError::Lifecycle(format!("{}: no pipeline prepared for {format:?}", self.label()))
        })?;
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.uniform_bind_group, &[]);
        Ok(())
    }

    /// Binds one vertex buffer per declared attribute, skipping attributes
    /// the shader does not use, and the optional 16-bit index buffer.
    pub(crate) fn bind_attributes(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        buffers: &[&wgpu::Buffer],
        indices: Option<&wgpu::Buffer>,
    ) -> Result<()> {
        self.layout.check_attribute_buffers(buffers.len())?;
        let resolved = buffers
            .iter()
            .zip(self.layout.attribute_locations())
            .filter(|(_, location)| location.is_some());
        for (slot, (buffer, _)) in resolved.enumerate() {
            pass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }
        if let Some(indices) = indices {
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint16);
        }
        Ok(())
    }

    fn build_pipeline(&self, device: &wgpu::Device, format: TargetFormat) -> wgpu::RenderPipeline {
        let strides = &self.layout.spec().strides;
        let attributes: Vec<[wgpu::VertexAttribute; 1]> = self
            .layout
            .attribute_locations()
            .iter()
            .zip(strides)
            .filter_map(|(location, stride)| {
                location.map(|location| {
                    [wgpu::VertexAttribute {
                        format: vertex_format(*stride),
                        offset: 0,
                        shader_location: location,
                    }]
                })
            })
            .collect();
        let strides: Vec<u32> = self
            .layout
            .attribute_locations()
            .iter()
            .zip(strides)
            .filter(|(location, _)| location.is_some())
            .map(|(_, stride)| *stride)
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = attributes
            .iter()
            .zip(&strides)
            .map(|(attribute, stride)| wgpu::VertexBufferLayout {
                array_stride: u64::from(*stride) * std::mem::size_of::<f32>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();

        tracing::debug!(program = self.label(), ?format, "building render pipeline");
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(self.label()),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.vertex_module,
                entry_point: Some("main"),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: format.depth.map(|depth| wgpu::DepthStencilState {
                format: depth,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &self.fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: format.color,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        })
    }
}

fn shader_module(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    stage: wgpu::naga::ShaderStage,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("{label} {stage:?}")),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source.to_string()),
            stage,
            defines: &[],
        },
    })
}

fn vertex_format(stride: u32) -> wgpu::VertexFormat {
    match stride {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

fn texture_layout_entries(layout: &ProgramLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    let interface = layout.interface();
    let mut entries = Vec::with_capacity(interface.textures.len() + interface.samplers.len());
    for texture in &interface.textures {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: texture.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    for sampler in &interface.samplers {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: sampler.binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}
