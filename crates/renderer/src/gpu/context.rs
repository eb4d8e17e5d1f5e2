use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;

use crate::error::{RenderError, Result};

/// Format of exported frames and offscreen layer targets.
pub(crate) const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth16Unorm;

pub(crate) struct SurfaceState {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

/// Instance, device and queue, plus the window surface when there is one.
pub(crate) struct GpuContext {
    _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub surface: Option<SurfaceState>,
    pub max_texture_dimension: u32,
}

impl GpuContext {
    /// Creates a context presenting to `target`.
    ///
    /// The caller keeps `target` alive for as long as the context exists.
    pub(crate) fn windowed<T>(target: &T, initial_size: PhysicalSize<u32>) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = new_instance();

        let window_handle = target
            .window_handle()
            .map_err(|err| RenderError::NoGpuContext(format!("failed to acquire window handle: {err}")))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| RenderError::NoGpuContext(format!("failed to acquire display handle: {err}")))?;

        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .map_err(|err| RenderError::NoGpuContext(format!("failed to create rendering surface: {err}")))?;

        let adapter = request_adapter(&instance, Some(&surface))?;
        let (device, queue) = request_device(&adapter)?;
        let max_texture_dimension = adapter.limits().max_texture_dimension_2d;

        let caps = surface.get_capabilities(&adapter);
        // Shaders write display values directly, so prefer a non-sRGB format.
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| RenderError::NoGpuContext("surface reports no formats".to_string()))?;
        if format.is_srgb() {
            tracing::warn!(?format, "no non-sRGB surface format available");
        }
        let present_mode = caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .unwrap_or(wgpu::PresentMode::AutoVsync);
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: initial_size.width.clamp(1, max_texture_dimension),
            height: initial_size.height.clamp(1, max_texture_dimension),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        tracing::debug!(?format, ?present_mode, "surface configured");

        Ok(Self {
            _instance: instance,
            device,
            queue,
            surface: Some(SurfaceState { surface, config }),
            max_texture_dimension,
        })
    }

    /// Creates a context without a surface, for offline export.
    pub(crate) fn headless() -> Result<Self> {
        let instance = new_instance();
        let adapter = request_adapter(&instance, None)?;
        let (device, queue) = request_device(&adapter)?;
        let max_texture_dimension = adapter.limits().max_texture_dimension_2d;
        Ok(Self {
            _instance: instance,
            device,
            queue,
            surface: None,
            max_texture_dimension,
        })
    }

    pub(crate) fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        let Some(state) = self.surface.as_mut() else {
            return;
        };
        state.config.width = new_size.width.min(self.max_texture_dimension);
        state.config.height = new_size.height.min(self.max_texture_dimension);
        state.surface.configure(&self.device, &state.config);
    }

    /// Reconfigures the surface at its current size after it was lost.
    pub(crate) fn reconfigure(&mut self) {
        if let Some(state) = self.surface.as_ref() {
            state.surface.configure(&self.device, &state.config);
        }
    }

    pub(crate) fn surface_size(&self) -> (u32, u32) {
        self.surface
            .as_ref()
            .map(|state| (state.config.width, state.config.height))
            .unwrap_or((1, 1))
    }

    pub(crate) fn check_extent(&self, (width, height): (u32, u32)) -> Result<()> {
        if width > self.max_texture_dimension || height > self.max_texture_dimension {
            return Err(RenderError::SpecMismatch(format!(
                "{width}x{height} exceeds the GPU texture limit of {}",
                self.max_texture_dimension
            )));
        }
        Ok(())
    }
}

fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn request_adapter(
    instance: &wgpu::Instance,
    compatible_surface: Option<&wgpu::Surface<'_>>,
) -> Result<wgpu::Adapter> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface,
        force_fallback_adapter: false,
    }))
    .map_err(|err| RenderError::NoGpuContext(format!("no suitable GPU adapter: {err}")))?;

    let info = adapter.get_info();
    tracing::debug!(
        name = %info.name,
        backend = ?info.backend,
        device_type = ?info.device_type,
        "selected GPU adapter"
    );
    Ok(adapter)
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("fxdrop device"),
        required_features: wgpu::Features::empty(),
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .map_err(|err| RenderError::NoGpuContext(format!("failed to create GPU device: {err}")))
}
