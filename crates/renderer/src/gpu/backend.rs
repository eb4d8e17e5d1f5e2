use std::collections::HashMap;

use image::RgbaImage;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use crate::effects::ProgramKind;
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;
use crate::orchestrator::{DrawPass, FrameOutput, PassInput, PassTarget, RenderBackend};
use crate::texture::PreparedImage;

use super::context::{GpuContext, DEPTH_FORMAT, OFFSCREEN_FORMAT};
use super::program::{ProgramBinding, TargetFormat};
use super::readback::Readback;
use super::targets::OffscreenTargetSet;
use super::texture::TextureSlot;

struct MeshBuffers {
    attributes: Vec<wgpu::Buffer>,
    indices: wgpu::Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn destroy(self) {
        for buffer in self.attributes {
            buffer.destroy();
        }
        self.indices.destroy();
    }
}

enum FrameTarget {
    Surface(wgpu::SurfaceTexture),
    Export {
        texture: wgpu::Texture,
        size: (u32, u32),
    },
}

struct Frame {
    encoder: wgpu::CommandEncoder,
    target: FrameTarget,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

/// [`RenderBackend`] that draws with `wgpu`.
pub(crate) struct WgpuBackend {
    context: GpuContext,
    programs: HashMap<ProgramKind, ProgramBinding>,
    mesh: Option<MeshBuffers>,
    source: TextureSlot,
    offscreen: OffscreenTargetSet,
    frame: Option<Frame>,
}

impl WgpuBackend {
    /// Compiles all programs up front; any compile or link failure is fatal.
    pub(crate) fn new(context: GpuContext) -> Result<Self> {
        let mut programs = HashMap::with_capacity(ProgramKind::ALL.len());
        for kind in ProgramKind::ALL {
            programs.insert(kind, ProgramBinding::new(&context.device, kind.spec())?);
        }
        let source = TextureSlot::new(&context.device);
        let offscreen = OffscreenTargetSet::new(&context.device);
        Ok(Self {
            context,
            programs,
            mesh: None,
            source,
            offscreen,
            frame: None,
        })
    }

    pub(crate) fn resize(&mut self, size: PhysicalSize<u32>) {
        self.context.resize(size);
    }

    /// Reconfigures a lost or outdated surface.
    pub(crate) fn reconfigure(&mut self) {
        self.context.reconfigure();
    }
}

impl RenderBackend for WgpuBackend {
    fn load_mesh(&mut self, mesh: &Mesh) -> Result<()> {
        let device = &self.context.device;
        let attributes = mesh
            .attribute_streams()
            .into_iter()
            .zip(crate::mesh::MESH_ATTRIBUTES)
            .map(|(stream, name)| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(name),
                    contents: bytemuck::cast_slice(stream),
                    usage: wgpu::BufferUsages::VERTEX,
                })
            })
            .collect();
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh indices"),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });

        if let Some(previous) = self.mesh.replace(MeshBuffers {
            attributes,
            indices,
            index_count: mesh.indices().len() as u32,
        }) {
            previous.destroy();
        }
        tracing::debug!(
            rows = mesh.rows(),
            columns = mesh.columns(),
            vertices = mesh.vertex_count(),
            "mesh uploaded"
        );
        Ok(())
    }

    fn replace_source(&mut self, image: &PreparedImage<'_>) -> Result<()> {
        self.context.check_extent(image.upload_size())?;
        self.source
            .replace(&self.context.device, &self.context.queue, image);
        Ok(())
    }

    fn allocate_offscreen(&mut self, size: (u32, u32)) -> Result<()> {
        self.context.check_extent(size)?;
        self.offscreen.allocate(&self.context.device, size)
    }

    fn release_offscreen(&mut self) {
        self.offscreen.release();
    }

    fn surface_size(&self) -> (u32, u32) {
        self.context.surface_size()
    }

    fn begin_frame(&mut self, output: FrameOutput) -> Result<()> {
        if self.frame.take().is_some() {
            tracing::debug!("discarding unfinished frame");
        }

        let (target, view, format) = match output {
            FrameOutput::Live => {
                let state = self.context.surface.as_ref().ok_or_else(|| {
                    RenderError::Lifecycle("no surface to present to".to_string())
                })?;
                let frame = state.surface.get_current_texture()?;
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                (FrameTarget::Surface(frame), view, state.config.format)
            }
            FrameOutput::Export { width, height } => {
                self.context.check_extent((width, height))?;
                let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("export target"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: OFFSCREEN_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                        | wgpu::TextureUsages::COPY_SRC,
                    view_formats: &[],
                });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                (
                    FrameTarget::Export {
                        texture,
                        size: (width, height),
                    },
                    view,
                    OFFSCREEN_FORMAT,
                )
            }
        };

        let encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        self.frame = Some(Frame {
            encoder,
            target,
            view,
            format,
        });
        Ok(())
    }

    fn draw(&mut self, pass: &DrawPass<'_>) -> Result<()> {
        let Self {
            context,
            programs,
            mesh,
            source,
            offscreen,
            frame,
        } = self;
        let frame = frame
            .as_mut()
            .ok_or_else(|| RenderError::Lifecycle("draw outside of a frame".to_string()))?;
        let mesh = mesh
            .as_ref()
            .ok_or_else(|| RenderError::Lifecycle("no mesh uploaded".to_string()))?;
        let program = programs.get_mut(&pass.program).ok_or_else(|| {
            RenderError::Lifecycle(format!("program {} was released", pass.program.label()))
        })?;

        let (view, depth_view, format, clear) = match pass.target {
            PassTarget::Output => {
                let clear = match frame.target {
                    FrameTarget::Surface(_) => wgpu::Color::BLACK,
                    FrameTarget::Export { .. } => wgpu::Color::TRANSPARENT,
                };
                let format = TargetFormat {
                    color: frame.format,
                    depth: None,
                };
                (&frame.view, None, format, clear)
            }
            PassTarget::Offscreen(index) => {
                let target = offscreen.target(index).ok_or_else(|| {
                    RenderError::Lifecycle(format!("offscreen target {index} is not allocated"))
                })?;
                let format = TargetFormat {
                    color: OFFSCREEN_FORMAT,
                    depth: Some(DEPTH_FORMAT),
                };
                (
                    &target.color_view,
                    Some(&target.depth_view),
                    format,
                    wgpu::Color::TRANSPARENT,
                )
            }
        };

        let inputs = match pass.input {
            PassInput::Source => {
                let texture = source
                    .current()
                    .ok_or_else(|| RenderError::Lifecycle("no source image uploaded".to_string()))?;
                vec![(&texture.view, &source.sampler)]
            }
            PassInput::Layers => {
                let mut inputs = Vec::with_capacity(2);
                for index in 0..2 {
                    let target = offscreen.target(index).ok_or_else(|| {
                        RenderError::Lifecycle(format!("offscreen target {index} is not allocated"))
                    })?;
                    inputs.push((&target.color_view, &offscreen.sampler));
                }
                inputs
            }
        };

        program.set_uniforms(pass.uniforms)?;
        program.prepare(&context.device, format);
        let textures = program.texture_bind_group(&context.device, &inputs)?;
        program.upload(&context.device, &mut frame.encoder);

        let buffers: Vec<&wgpu::Buffer> = mesh.attributes.iter().collect();
        let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth_view.map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        program.use_program(&mut render_pass, format)?;
        render_pass.set_bind_group(1, &textures, &[]);
        program.bind_attributes(&mut render_pass, &buffers, Some(&mesh.indices))?;
        render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<Option<RgbaImage>> {
        let Frame {
            mut encoder,
            target,
            view,
            ..
        } = self
            .frame
            .take()
            .ok_or_else(|| RenderError::Lifecycle("no frame to finish".to_string()))?;
        drop(view);

        match target {
            FrameTarget::Surface(surface_texture) => {
                self.context.queue.submit(std::iter::once(encoder.finish()));
                surface_texture.present();
                Ok(None)
            }
            FrameTarget::Export { texture, size } => {
                let readback = Readback::record(&self.context.device, &mut encoder, &texture, size);
                self.context.queue.submit(std::iter::once(encoder.finish()));
                let image = readback.finish(&self.context.device);
                texture.destroy();
                image.map(Some)
            }
        }
    }

    fn release_all(&mut self) {
        self.frame = None;
        self.offscreen.release();
        self.source.release();
        if let Some(mesh) = self.mesh.take() {
            mesh.destroy();
        }
        self.programs.clear();
        tracing::debug!("GPU resources released");
    }
}
