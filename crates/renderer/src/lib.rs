//! Renderer crate for fxdrop, a layered image-effects previewer.
//!
//! A dropped image is uploaded once and redrawn every display refresh through
//! a stack of GLSL effects whose parameters live in two independent layers.
//! The overall flow is:
//!
//! ```text
//!   CLI / config.toml
//!          │ RendererConfig
//!          ▼
//!   Renderer::run ──▶ WindowState ──▶ winit event loop ──▶ RenderOrchestrator::tick
//!                                                                │
//!                         single layer: effect ─▶ surface         │
//!                         dual layer:   effect ×2 ─▶ offscreen ─▶ finish ─▶ surface
//! ```
//!
//! [`orchestrator::RenderOrchestrator`] owns all scheduling decisions and talks
//! to the GPU only through the [`orchestrator::RenderBackend`] trait, so the
//! whole frame sequence can be exercised without a device. Programs are
//! compiled and reflected on the CPU by `naga` before `wgpu` ever sees them.

pub mod compile;
pub mod effects;
pub mod error;
pub mod export;
mod gpu;
pub mod mesh;
pub mod orchestrator;
pub mod panel;
pub mod params;
pub mod program;
pub mod runtime;
mod shaders;
pub mod texture;
pub mod types;
pub mod uniforms;
mod window;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;

pub use error::RenderError;
pub use orchestrator::{RenderOrchestrator, StateChange, TickOutcome};
pub use params::{KeyPolicy, ParamValue, ParameterStore};
pub use types::{BlendMode, ExportFormat, LayerMode, RendererConfig};

use gpu::{GpuContext, WgpuBackend};

/// Entry point for the interactive window.
#[derive(Debug, Clone)]
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Opens the window and blocks until it is closed.
    pub fn run(&self) -> Result<()> {
        tracing::info!(
            mode = ?self.config.layer_mode,
            blend = %self.config.blend_mode,
            output = %self.config.output_dir.display(),
            "opening preview window"
        );
        window::run_window(self.config.clone())
    }
}

/// Renders one export frame of `image_path` without opening a window.
///
/// The parameter files in `config.initial_params` are applied first. The
/// frame goes through the same one-shot export request the `S` key uses.
pub fn render_headless(config: &RendererConfig, image_path: &Path) -> Result<RgbaImage> {
    let image = export::load_image(image_path)
        .with_context(|| format!("failed to read {}", image_path.display()))?;

    let context = GpuContext::headless().context("failed to initialise GPU context")?;
    let backend = WgpuBackend::new(context).context("failed to build shader programs")?;
    let mut orchestrator = RenderOrchestrator::new(backend, config)?;

    for (layer, path) in config.initial_params.iter().enumerate() {
        if let Some(path) = path {
            let text = export::read_params(path)?;
            orchestrator
                .import_params(layer, &text)
                .with_context(|| format!("failed to apply {}", path.display()))?;
        }
    }

    let stem = export::export_stem(Some(image_path));
    orchestrator.load_image(&image, Some(&stem))?;

    let captured = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&captured);
    orchestrator.request_export(Box::new(move |frame: RgbaImage| {
        *slot.borrow_mut() = Some(frame);
        Ok(())
    }))?;

    // Headless frames are rendered at time zero.
    let outcome = orchestrator.tick(0.0);
    orchestrator.dispose();
    let outcome = outcome?;

    let frame = captured.borrow_mut().take();
    frame.ok_or_else(|| anyhow!("export frame produced no image ({outcome:?})"))
}
