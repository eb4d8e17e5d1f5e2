use crate::error::{RenderError, Result};

use super::context::{DEPTH_FORMAT, OFFSCREEN_FORMAT};

/// Color and depth attachment for one parameter layer.
pub(crate) struct OffscreenTarget {
    color: wgpu::Texture,
    pub color_view: wgpu::TextureView,
    depth: wgpu::Texture,
    pub depth_view: wgpu::TextureView,
}

impl OffscreenTarget {
    fn new(device: &wgpu::Device, index: usize, (width, height): (u32, u32)) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("layer {index} color")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("layer {index} depth")),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            color,
            color_view,
            depth,
            depth_view,
        }
    }

    fn destroy(self) {
        self.color.destroy();
        self.depth.destroy();
    }
}

/// The pair of layer targets used in dual mode, plus the sampler the
/// finishing pass reads them with.
pub(crate) struct OffscreenTargetSet {
    targets: Option<[OffscreenTarget; 2]>,
    size: (u32, u32),
    pub sampler: wgpu::Sampler,
}

impl OffscreenTargetSet {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("layer sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            targets: None,
            size: (0, 0),
            sampler,
        }
    }

    /// Creates both targets at `size`. A pair that is still alive is
    /// released first.
    pub(crate) fn allocate(&mut self, device: &wgpu::Device, size: (u32, u32)) -> Result<()> {
        if size.0 == 0 || size.1 == 0 {
            return Err(RenderError::SpecMismatch(format!(
                "offscreen targets need a non-empty size, got {}x{}",
                size.0, size.1
            )));
        }
        if self.targets.is_some() {
            tracing::warn!(
                width = self.size.0,
                height = self.size.1,
                "offscreen targets reallocated without release"
            );
            self.release();
        }
        self.targets = Some([
            OffscreenTarget::new(device, 0, size),
            OffscreenTarget::new(device, 1, size),
        ]);
        self.size = size;
        tracing::debug!(width = size.0, height = size.1, "offscreen targets allocated");
        Ok(())
    }

    /// Destroys both targets; later lookups return `None`.
    pub(crate) fn release(&mut self) {
        if let Some(targets) = self.targets.take() {
            for target in targets {
                target.destroy();
            }
            tracing::debug!(width = self.size.0, height = self.size.1, "offscreen targets released");
        }
        self.size = (0, 0);
    }

    pub(crate) fn target(&self, index: usize) -> Option<&OffscreenTarget> {
        self.targets.as_ref().and_then(|targets| targets.get(index))
    }
}
