use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::texture::PreparedImage;

use super::context::OFFSCREEN_FORMAT;

pub(crate) struct SourceTexture {
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: (u32, u32),
}

/// Holds the single live source texture and the sampler it is read with.
pub(crate) struct TextureSlot {
    current: Option<SourceTexture>,
    pub sampler: wgpu::Sampler,
}

impl TextureSlot {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        // Mirrored wrap keeps shifted and rippled lookups seamless.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("source sampler"),
            address_mode_u: wgpu::AddressMode::MirrorRepeat,
            address_mode_v: wgpu::AddressMode::MirrorRepeat,
            address_mode_w: wgpu::AddressMode::MirrorRepeat,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            current: None,
            sampler,
        }
    }

    pub(crate) fn current(&self) -> Option<&SourceTexture> {
        self.current.as_ref()
    }

    /// Destroys the held texture before creating the replacement.
    pub(crate) fn replace(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &PreparedImage<'_>,
    ) {
        self.release();

        let (width, height) = image.upload_size();
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("source texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            image.pixels.as_raw(),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        tracing::debug!(width, height, "source texture uploaded");

        self.current = Some(SourceTexture {
            texture,
            view,
            size: (width, height),
        });
    }

    pub(crate) fn release(&mut self) {
        if let Some(old) = self.current.take() {
            old.texture.destroy();
            tracing::trace!(width = old.size.0, height = old.size.1, "source texture released");
        }
    }
}
