//! Interactive preview window.
//!
//! One winit event loop drives the orchestrator: drag-and-drop loads the
//! source image, the pointer and mouse wheel feed the live view fields, the
//! keyboard maps to [`StateChange`]s and file actions, and `AboutToWait`
//! asks the [`FrameScheduler`] whether the next redraw is due.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, KeyEvent, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, ModifiersState, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::export;
use crate::gpu::{GpuContext, WgpuBackend};
use crate::orchestrator::{pointer_to_ndc, RenderOrchestrator, StateChange, TickOutcome};
use crate::panel::{PanelControl, ParameterPanelAdapter, CREVICE_KEY, VERTEX_SCALE_KEY};
use crate::params::ParamValue;
use crate::runtime::{EffectClock, FrameScheduler};
use crate::types::{LayerMode, RendererConfig};

const WINDOW_TITLE: &str = "fxdrop";
/// Crevice change per scrolled line.
const CREVICE_STEP: f32 = 0.01;
/// Wheel pixels counted as one line on touchpads.
const PIXELS_PER_LINE: f64 = 40.0;
const VERTEX_SCALE_STEP: f32 = 0.05;

/// Actions bound to single keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    ExportImage,
    TogglePointerFix,
    ExportParams,
    ImportParams,
    Randomize,
    ResetLayer,
    SwitchLayer,
    CopyOtherLayer,
    CycleBlend,
    ToggleLayerMode,
    ToggleLoop,
    GrowScale,
    ShrinkScale,
    Quit,
}

fn command_for_key(key: &Key) -> Option<Command> {
    match key {
        Key::Named(NamedKey::Backspace) => Some(Command::ResetLayer),
        Key::Named(NamedKey::Tab) => Some(Command::SwitchLayer),
        Key::Named(NamedKey::Space) => Some(Command::ToggleLoop),
        Key::Named(NamedKey::Escape) => Some(Command::Quit),
        Key::Character(text) => match text.to_ascii_lowercase().as_str() {
            "s" => Some(Command::ExportImage),
            "f" => Some(Command::TogglePointerFix),
            "p" => Some(Command::ExportParams),
            "o" => Some(Command::ImportParams),
            "r" => Some(Command::Randomize),
            "c" => Some(Command::CopyOtherLayer),
            "b" => Some(Command::CycleBlend),
            "d" => Some(Command::ToggleLayerMode),
            " " => Some(Command::ToggleLoop),
            "=" | "+" => Some(Command::GrowScale),
            "-" => Some(Command::ShrinkScale),
            _ => None,
        },
        _ => None,
    }
}

/// Panel control without a widget: remembers and traces what it was shown.
#[derive(Debug)]
struct MirrorControl {
    key: &'static str,
    shown: Option<ParamValue>,
}

impl PanelControl for MirrorControl {
    fn key(&self) -> &str {
        self.key
    }

    fn display(&mut self, value: &ParamValue) {
        if self.shown.as_ref() != Some(value) {
            tracing::trace!(key = self.key, ?value, "control updated");
        }
        self.shown = Some(value.clone());
    }
}

/// Everything the event loop needs. Field order matters: the orchestrator
/// owns the surface and must drop before the window.
struct WindowState {
    orchestrator: RenderOrchestrator<WgpuBackend>,
    panel: ParameterPanelAdapter<MirrorControl>,
    scheduler: FrameScheduler,
    clock: EffectClock,
    config: RendererConfig,
    modifiers: ModifiersState,
    /// Set once the first file of a drop batch was handled.
    drop_handled: bool,
    window: Arc<Window>,
}

impl WindowState {
    fn new(window: Arc<Window>, config: RendererConfig) -> Result<Self> {
        let context = GpuContext::windowed(window.as_ref(), window.inner_size())
            .context("failed to initialise GPU context")?;
        let backend = WgpuBackend::new(context).context("failed to build shader programs")?;
        let orchestrator = RenderOrchestrator::new(backend, &config)?;
        let panel = ParameterPanelAdapter::with_catalogue(0, |key| MirrorControl {
            key,
            shown: None,
        });

        let mut state = Self {
            orchestrator,
            panel,
            scheduler: FrameScheduler::new(config.target_fps),
            clock: EffectClock::new(),
            config,
            modifiers: ModifiersState::empty(),
            drop_handled: false,
            window,
        };

        if let Some(path) = state.config.initial_image.clone() {
            state.load_path(&path)?;
        }
        let initial_params = state.config.initial_params.clone();
        for (layer, path) in initial_params.iter().enumerate() {
            if let Some(path) = path {
                let text = export::read_params(path)?;
                state
                    .orchestrator
                    .import_params(layer, &text)
                    .with_context(|| format!("failed to apply {}", path.display()))?;
            }
        }
        state.refresh_panel();
        state.update_title();
        Ok(state)
    }

    fn window(&self) -> &Window {
        &self.window
    }

    fn load_path(&mut self, path: &Path) -> Result<()> {
        let image = export::load_image(path)?;
        let stem = export::export_stem(Some(path));
        self.orchestrator.load_image(&image, Some(&stem))?;
        self.scheduler.reset();
        self.clock.restart();
        self.update_title();
        Ok(())
    }

    fn handle_dropped_file(&mut self, path: PathBuf) {
        if self.drop_handled {
            tracing::debug!(path = %path.display(), "ignoring additional dropped file");
            return;
        }
        self.drop_handled = true;
        if let Err(err) = self.load_path(&path) {
            tracing::error!(path = %path.display(), "failed to load dropped image: {err:#}");
        }
    }

    fn handle_cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        let size = self.window.inner_size();
        let pointer = pointer_to_ndc((position.x, position.y), (size.width, size.height));
        self.apply(StateChange::Pointer(pointer));
    }

    fn handle_wheel(&mut self, delta: MouseScrollDelta) {
        let (lines_x, lines_y) = match delta {
            MouseScrollDelta::LineDelta(x, y) => (x, y),
            MouseScrollDelta::PixelDelta(position) => (
                (position.x / PIXELS_PER_LINE) as f32,
                (position.y / PIXELS_PER_LINE) as f32,
            ),
        };
        let [x, y] = self.orchestrator.state().crevice;
        let value = ParamValue::Vector(vec![
            f64::from(x + lines_x * CREVICE_STEP),
            f64::from(y + lines_y * CREVICE_STEP),
        ]);
        if let Some(change) = self.panel.on_change(CREVICE_KEY, value) {
            self.apply(change);
        }
    }

    fn nudge_vertex_scale(&mut self, step: f32) {
        let scale = self.orchestrator.state().vertex_scale + step;
        let value = ParamValue::Number(f64::from(scale));
        if let Some(change) = self.panel.on_change(VERTEX_SCALE_KEY, value) {
            self.apply(change);
        }
    }

    /// Applies a change, logging rejected ones.
    fn apply(&mut self, change: StateChange) {
        if let Err(err) = self.orchestrator.apply(change) {
            tracing::warn!("state change rejected: {err}");
        }
    }

    fn handle_key(&mut self, event: &KeyEvent) -> Option<Command> {
        if event.state != ElementState::Pressed || event.repeat {
            return None;
        }
        if self.modifiers.control_key() || self.modifiers.alt_key() || self.modifiers.super_key()
        {
            return None;
        }
        command_for_key(&event.logical_key)
    }

    fn run_command(&mut self, command: Command) -> Result<()> {
        let active = self.orchestrator.state().active_layer;
        match command {
            Command::ExportImage => self.request_image_export()?,
            Command::TogglePointerFix => self.apply(StateChange::TogglePointerFixed),
            Command::ExportParams => {
                let json = self.orchestrator.export_params(active)?;
                let path = export::params_path(&self.config.output_dir, &self.stem(), active);
                export::write_params(&path, &json)?;
            }
            Command::ImportParams => {
                let path = export::params_path(&self.config.output_dir, &self.stem(), active);
                if !path.exists() {
                    tracing::warn!(path = %path.display(), "no parameter file to import");
                    return Ok(());
                }
                let text = export::read_params(&path)?;
                self.orchestrator.import_params(active, &text)?;
                self.refresh_panel();
            }
            Command::Randomize => {
                let layer = self.orchestrator.randomize_active(&mut rand::thread_rng());
                tracing::info!(layer, "layer randomized");
                self.refresh_panel();
            }
            Command::ResetLayer => {
                self.apply(StateChange::ResetLayer(active));
                self.refresh_panel();
            }
            Command::SwitchLayer => {
                self.apply(StateChange::SwitchLayer);
                self.panel.set_layer(self.orchestrator.state().active_layer);
                self.refresh_panel();
            }
            Command::CopyOtherLayer => {
                let from = (active + 1) % crate::orchestrator::LAYER_COUNT;
                self.apply(StateChange::CopyLayer { from, to: active });
                self.refresh_panel();
            }
            Command::CycleBlend => self.apply(StateChange::CycleBlend),
            Command::ToggleLayerMode => self.apply(StateChange::ToggleLayerMode),
            Command::ToggleLoop => {
                if self.orchestrator.is_running() {
                    self.orchestrator.stop()?;
                    self.scheduler.set_stopped(true);
                } else {
                    self.orchestrator.start()?;
                    self.scheduler.set_stopped(false);
                    self.scheduler.reset();
                }
            }
            Command::GrowScale => self.nudge_vertex_scale(VERTEX_SCALE_STEP),
            Command::ShrinkScale => self.nudge_vertex_scale(-VERTEX_SCALE_STEP),
            Command::Quit => {}
        }
        self.update_title();
        Ok(())
    }

    fn request_image_export(&mut self) -> Result<()> {
        let Some(size) = self.orchestrator.export_size() else {
            tracing::warn!("nothing to export before an image is loaded");
            return Ok(());
        };
        let format = self.config.export_format;
        let path = export::image_path(&self.config.output_dir, &self.stem(), format);
        tracing::info!(width = size.0, height = size.1, path = %path.display(), "export requested");
        self.orchestrator.request_export(Box::new(move |image: RgbaImage| {
            export::save_image(&image, &path, format)
        }))?;
        if !self.orchestrator.is_running() {
            tracing::info!("export waits until the frame loop is resumed");
        }
        Ok(())
    }

    fn stem(&self) -> String {
        self.orchestrator
            .source()
            .and_then(|source| source.name.clone())
            .unwrap_or_else(|| export::DEFAULT_STEM.to_string())
    }

    fn refresh_panel(&mut self) {
        let state = self.orchestrator.state().clone();
        self.panel.refresh_from(self.orchestrator.active_store(), &state);
    }

    fn update_title(&self) {
        let state = self.orchestrator.state();
        let name = self
            .orchestrator
            .source()
            .and_then(|source| source.name.as_deref())
            .unwrap_or("drop an image");
        let mode = match state.layer_mode {
            LayerMode::Single => "single".to_string(),
            LayerMode::Dual => format!("dual, {}", state.blend),
        };
        self.window.set_title(&format!(
            "{WINDOW_TITLE}: {name} | layer {} | {mode}",
            state.active_layer + 1
        ));
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.orchestrator.backend_mut().resize(size);
    }

    fn render_frame(&mut self) -> crate::error::Result<TickOutcome> {
        self.orchestrator.tick(self.clock.seconds())
    }

    /// Stops the loop after a frame failed for a reason other than the
    /// surface. Space resumes it.
    fn halt_after_error(&mut self) {
        if let Err(err) = self.orchestrator.stop() {
            tracing::debug!("stop after failure: {err}");
        }
        self.scheduler.set_stopped(true);
        self.update_title();
    }
}

pub(crate) fn run_window(config: RendererConfig) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    let (width, height) = config.window_size;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(WINDOW_TITLE)
            .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
            .build(&event_loop)
            .context("failed to create window")?,
    );

    let mut state = WindowState::new(window, config)?;
    if state.scheduler.ready_for_frame(Instant::now()) {
        state.window().request_redraw();
    }

    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == state.window().id() => {
            match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    state.orchestrator.dispose();
                    elwt.exit();
                }
                WindowEvent::ModifiersChanged(modifiers) => {
                    state.modifiers = modifiers.state();
                }
                WindowEvent::KeyboardInput { event, .. } => match state.handle_key(&event) {
                    Some(Command::Quit) => {
                        state.orchestrator.dispose();
                        elwt.exit();
                    }
                    Some(command) => {
                        if let Err(err) = state.run_command(command) {
                            tracing::error!(?command, "command failed: {err:#}");
                        }
                    }
                    None => {}
                },
                WindowEvent::DroppedFile(path) => state.handle_dropped_file(path),
                WindowEvent::CursorMoved { position, .. } => state.handle_cursor_moved(position),
                WindowEvent::MouseWheel { delta, .. } => state.handle_wheel(delta),
                WindowEvent::Resized(new_size) => state.resize(new_size),
                WindowEvent::Occluded(occluded) => state.scheduler.set_occluded(occluded),
                WindowEvent::RedrawRequested => match state.render_frame() {
                    Ok(TickOutcome::Skipped) => {}
                    Ok(TickOutcome::Presented) => state.scheduler.mark_rendered(Instant::now()),
                    Ok(TickOutcome::Exported { width, height }) => {
                        tracing::debug!(width, height, "export frame finished");
                        state.scheduler.mark_rendered(Instant::now());
                    }
                    Err(err) => match err.as_surface_error() {
                        Some(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                            state.orchestrator.backend_mut().reconfigure();
                        }
                        Some(wgpu::SurfaceError::OutOfMemory) => {
                            tracing::error!("surface out of memory; exiting");
                            state.orchestrator.dispose();
                            elwt.exit();
                        }
                        Some(wgpu::SurfaceError::Timeout) => {
                            tracing::warn!("surface timeout; retrying next frame");
                        }
                        Some(other) => {
                            tracing::warn!("surface error: {other:?}; retrying next frame");
                        }
                        None => {
                            tracing::error!("frame failed, loop stopped: {err}");
                            state.halt_after_error();
                        }
                    },
                },
                _ => {}
            }
        }
        Event::AboutToWait => {
            state.drop_handled = false;
            let now = Instant::now();
            if state.scheduler.ready_for_frame(now) {
                state.window().request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            } else if let Some(deadline) = state.scheduler.next_deadline() {
                elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
            } else {
                elwt.set_control_flow(ControlFlow::Wait);
            }
        }
        Event::LoopExiting => state.orchestrator.dispose(),
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_map_regardless_of_case() {
        assert_eq!(
            command_for_key(&Key::Character("s".into())),
            Some(Command::ExportImage)
        );
        assert_eq!(
            command_for_key(&Key::Character("S".into())),
            Some(Command::ExportImage)
        );
        assert_eq!(
            command_for_key(&Key::Character("d".into())),
            Some(Command::ToggleLayerMode)
        );
        assert_eq!(command_for_key(&Key::Character("x".into())), None);
    }

    #[test]
    fn named_keys_map_to_commands() {
        assert_eq!(
            command_for_key(&Key::Named(NamedKey::Tab)),
            Some(Command::SwitchLayer)
        );
        assert_eq!(
            command_for_key(&Key::Named(NamedKey::Backspace)),
            Some(Command::ResetLayer)
        );
        assert_eq!(
            command_for_key(&Key::Named(NamedKey::Space)),
            Some(Command::ToggleLoop)
        );
        assert_eq!(
            command_for_key(&Key::Character(" ".into())),
            Some(Command::ToggleLoop)
        );
        assert_eq!(command_for_key(&Key::Named(NamedKey::Escape)), Some(Command::Quit));
        assert_eq!(command_for_key(&Key::Named(NamedKey::Enter)), None);
    }

    #[test]
    fn mirror_controls_keep_the_last_value() {
        let mut control = MirrorControl {
            key: "uTint",
            shown: None,
        };
        control.display(&ParamValue::Number(0.2));
        control.display(&ParamValue::Number(0.4));
        assert_eq!(control.shown, Some(ParamValue::Number(0.4)));
        assert_eq!(control.key(), "uTint");
    }
}
