//! Frame scheduling and pass selection.
//!
//! [`RenderOrchestrator`] is the single writer of render state. It decides
//! per tick whether to draw one layer straight to the output or two layers
//! offscreen followed by a finishing pass, and whether that output is the
//! live surface or a one-shot export target. The GPU work itself sits behind
//! [`RenderBackend`] so the scheduling logic runs without a device.

use image::RgbaImage;
use rand::Rng;

use crate::effects::{effect_uniforms, finish_uniforms, PassView, ProgramKind};
use crate::error::{RenderError, Result};
use crate::mesh::Mesh;
use crate::params::{ParamValue, ParameterStore};
use crate::texture::{prepare_image, PreparedImage};
use crate::types::{BlendMode, LayerMode, RendererConfig};
use crate::uniforms::UniformValue;

/// Number of parameter layers the pipeline carries.
pub const LAYER_COUNT: usize = 2;
/// Crevice values are clamped to `[0, CREVICE_LIMIT]` on both axes.
pub const CREVICE_LIMIT: f32 = 0.95;

/// Where the frame being built ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutput {
    /// The visible surface at window size.
    Live,
    /// An offscreen export target that is read back after the frame.
    Export { width: u32, height: u32 },
}

/// Render target of a single pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassTarget {
    /// The frame output chosen in [`RenderBackend::begin_frame`].
    Output,
    /// One of the two offscreen layer targets.
    Offscreen(usize),
}

/// Textures a pass samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassInput {
    /// The uploaded source image.
    Source,
    /// Both offscreen layer targets, first then second.
    Layers,
}

/// One draw call: program, target, inputs and the ordered uniform values.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawPass<'a> {
    pub program: ProgramKind,
    pub target: PassTarget,
    pub input: PassInput,
    pub uniforms: &'a [UniformValue],
}

/// GPU operations the orchestrator needs.
pub trait RenderBackend {
    /// Uploads the shared grid once at construction.
    fn load_mesh(&mut self, mesh: &Mesh) -> Result<()>;
    /// Releases the current source texture, then uploads `image`.
    fn replace_source(&mut self, image: &PreparedImage<'_>) -> Result<()>;
    /// Creates both layer targets at `size`.
    fn allocate_offscreen(&mut self, size: (u32, u32)) -> Result<()>;
    fn release_offscreen(&mut self);
    /// Current live surface size in pixels.
    fn surface_size(&self) -> (u32, u32);
    fn begin_frame(&mut self, output: FrameOutput) -> Result<()>;
    fn draw(&mut self, pass: &DrawPass<'_>) -> Result<()>;
    /// Submits the frame. Export frames return their pixels.
    fn finish_frame(&mut self) -> Result<Option<RgbaImage>>;
    /// Releases every GPU resource the backend holds.
    fn release_all(&mut self);
}

/// Receives the pixels of an exported frame.
pub type ExportCallback = Box<dyn FnOnce(RgbaImage) -> Result<()>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// No image loaded yet.
    Idle,
    Running,
    Stopped,
    /// Resources released; the orchestrator is unusable.
    Disposed,
}

/// Facts kept about the loaded source image.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceInfo {
    pub native_size: (u32, u32),
    pub aspect: f32,
    /// File stem the image was loaded from, when known.
    pub name: Option<String>,
}

/// Interactive state that is not part of a parameter layer.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderState {
    /// Pointer in normalized device coordinates, Y up.
    pub pointer: [f32; 2],
    pub pointer_fixed: bool,
    pub active_layer: usize,
    pub blend: BlendMode,
    pub layer_mode: LayerMode,
    pub crevice: [f32; 2],
    pub vertex_scale: f32,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            pointer: [0.0, 0.0],
            pointer_fixed: false,
            active_layer: 0,
            blend: BlendMode::default(),
            layer_mode: LayerMode::default(),
            crevice: [0.0, 0.0],
            vertex_scale: 1.0,
        }
    }
}

/// Every external mutation of render state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    Pointer([f32; 2]),
    SetPointerFixed(bool),
    TogglePointerFixed,
    Crevice([f32; 2]),
    VertexScale(f32),
    ActiveLayer(usize),
    SwitchLayer,
    Blend(BlendMode),
    CycleBlend,
    LayerMode(LayerMode),
    ToggleLayerMode,
    Param {
        layer: usize,
        key: String,
        value: ParamValue,
    },
    ResetLayer(usize),
    /// Pulls every parameter of `from` into `to`.
    CopyLayer {
        from: usize,
        to: usize,
    },
}

/// What a call to [`RenderOrchestrator::tick`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running; nothing was drawn.
    Skipped,
    Presented,
    Exported { width: u32, height: u32 },
}

pub struct RenderOrchestrator<B: RenderBackend> {
    backend: B,
    mesh: Mesh,
    stores: [ParameterStore; LAYER_COUNT],
    state: RenderState,
    source: Option<SourceInfo>,
    lifecycle: Lifecycle,
    pending_export: Option<ExportCallback>,
}

impl<B: RenderBackend> RenderOrchestrator<B> {
    /// Builds the shared mesh, hands it to `backend` and seeds both layers.
    pub fn new(mut backend: B, config: &RendererConfig) -> Result<Self> {
        let mesh = Mesh::build(config.mesh_rows, config.mesh_columns)?;
        backend.load_mesh(&mesh)?;

        let state = RenderState {
            blend: config.blend_mode,
            layer_mode: config.layer_mode,
            ..RenderState::default()
        };

        Ok(Self {
            backend,
            mesh,
            stores: [
                ParameterStore::new("first", config.key_policy),
                ParameterStore::new("second", config.key_policy),
            ],
            state,
            source: None,
            lifecycle: Lifecycle::Idle,
            pending_export: None,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn source(&self) -> Option<&SourceInfo> {
        self.source.as_ref()
    }

    pub fn store(&self, layer: usize) -> Result<&ParameterStore> {
        self.stores.get(layer).ok_or_else(|| layer_out_of_range(layer))
    }

    pub fn store_mut(&mut self, layer: usize) -> Result<&mut ParameterStore> {
        self.stores.get_mut(layer).ok_or_else(|| layer_out_of_range(layer))
    }

    pub fn active_store(&self) -> &ParameterStore {
        &self.stores[self.state.active_layer]
    }

    /// Uploads a new source image and starts the loop if it was idle.
    ///
    /// The previous texture is released before the new one is created. In
    /// dual mode the layer targets are reallocated at the new native size.
    pub fn load_image(&mut self, image: &RgbaImage, name: Option<&str>) -> Result<()> {
        self.ensure_alive()?;
        let prepared = prepare_image(image)?;
        self.backend.replace_source(&prepared)?;

        let info = SourceInfo {
            native_size: prepared.native_size,
            aspect: prepared.aspect,
            name: name.map(str::to_string),
        };
        tracing::info!(
            width = info.native_size.0,
            height = info.native_size.1,
            padded = prepared.was_padded(),
            name = info.name.as_deref().unwrap_or("-"),
            "source image loaded"
        );
        if self.state.layer_mode == LayerMode::Dual {
            if let Err(err) = self.reallocate_offscreen(info.native_size) {
                // The previous image is already gone from the backend.
                self.source = None;
                return Err(err);
            }
        }
        self.source = Some(info);
        if self.lifecycle == Lifecycle::Idle {
            self.start()?;
        }
        Ok(())
    }

    /// Starts or resumes the frame loop. Requires a loaded image.
    pub fn start(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Disposed => Err(disposed()),
            Lifecycle::Running => Ok(()),
            Lifecycle::Idle if self.source.is_none() => Err(RenderError::Lifecycle(
                "cannot start before an image is loaded".to_string(),
            )),
            Lifecycle::Idle | Lifecycle::Stopped => {
                self.lifecycle = Lifecycle::Running;
                tracing::info!("frame loop started");
                Ok(())
            }
        }
    }

    /// Halts drawing. Later ticks are skipped until [`Self::start`].
    pub fn stop(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Disposed => Err(disposed()),
            Lifecycle::Running => {
                self.lifecycle = Lifecycle::Stopped;
                tracing::info!("frame loop stopped");
                Ok(())
            }
            Lifecycle::Idle | Lifecycle::Stopped => Ok(()),
        }
    }

    /// Releases all GPU resources and drops any pending export.
    pub fn dispose(&mut self) {
        if self.lifecycle == Lifecycle::Disposed {
            return;
        }
        if self.pending_export.take().is_some() {
            tracing::debug!("pending export dropped on dispose");
        }
        self.backend.release_all();
        self.source = None;
        self.lifecycle = Lifecycle::Disposed;
        tracing::info!("renderer disposed");
    }

    pub fn apply(&mut self, change: StateChange) -> Result<()> {
        self.ensure_alive()?;
        match change {
            StateChange::Pointer(pointer) => {
                if !self.state.pointer_fixed {
                    self.state.pointer = pointer;
                }
            }
            StateChange::SetPointerFixed(fixed) => self.state.pointer_fixed = fixed,
            StateChange::TogglePointerFixed => {
                self.state.pointer_fixed = !self.state.pointer_fixed;
                tracing::debug!(fixed = self.state.pointer_fixed, "pointer fix toggled");
            }
            StateChange::Crevice([x, y]) => {
                self.state.crevice = [clamp_crevice(x), clamp_crevice(y)];
            }
            StateChange::VertexScale(scale) => {
                if scale.is_finite() {
                    self.state.vertex_scale = scale;
                }
            }
            StateChange::ActiveLayer(layer) => {
                self.store(layer)?;
                self.state.active_layer = layer;
            }
            StateChange::SwitchLayer => {
                self.state.active_layer = (self.state.active_layer + 1) % LAYER_COUNT;
                tracing::info!(layer = self.state.active_layer, "active layer switched");
            }
            StateChange::Blend(mode) => self.state.blend = mode,
            StateChange::CycleBlend => {
                self.state.blend = self.state.blend.next();
                tracing::info!(blend = %self.state.blend, "blend mode changed");
            }
            StateChange::LayerMode(mode) => self.set_layer_mode(mode)?,
            StateChange::ToggleLayerMode => self.set_layer_mode(self.state.layer_mode.toggled())?,
            StateChange::Param { layer, key, value } => {
                self.store_mut(layer)?.set(&key, value)?;
            }
            StateChange::ResetLayer(layer) => self.store_mut(layer)?.reset(),
            StateChange::CopyLayer { from, to } => {
                if from == to {
                    return Ok(());
                }
                let source = self.store(from)?.clone();
                self.store_mut(to)?.copy_from(&source);
            }
        }
        Ok(())
    }

    /// Randomizes the active layer and returns its index.
    pub fn randomize_active<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        let layer = self.state.active_layer;
        self.stores[layer].randomize(rng);
        layer
    }

    /// Serializes one layer as a parameter file.
    pub fn export_params(&self, layer: usize) -> Result<String> {
        self.store(layer)?.to_json()
    }

    /// Applies a parameter file to one layer, returning the applied keys.
    pub fn import_params(&mut self, layer: usize, text: &str) -> Result<Vec<String>> {
        self.ensure_alive()?;
        let applied = self.store_mut(layer)?.apply_json(text)?;
        tracing::info!(layer, applied = applied.len(), "parameters imported");
        Ok(applied)
    }

    /// Schedules a one-shot export on the next tick. A later request replaces
    /// an earlier one that has not fired yet.
    pub fn request_export(&mut self, callback: ExportCallback) -> Result<()> {
        self.ensure_alive()?;
        if self.pending_export.replace(callback).is_some() {
            tracing::debug!("replacing pending export request");
        }
        Ok(())
    }

    pub fn has_pending_export(&self) -> bool {
        self.pending_export.is_some()
    }

    /// Size of an export of the current source at the current crevice.
    pub fn export_size(&self) -> Option<(u32, u32)> {
        self.source
            .as_ref()
            .map(|source| export_size(source.native_size, self.state.crevice))
    }

    /// Draws one frame. At most one export fires per request: the pending
    /// callback is taken before any drawing starts.
    pub fn tick(&mut self, time: f32) -> Result<TickOutcome> {
        if self.lifecycle != Lifecycle::Running {
            return Ok(TickOutcome::Skipped);
        }
        let Some(source) = self.source.clone() else {
            return Ok(TickOutcome::Skipped);
        };

        let export = self.pending_export.take();
        let output = match export {
            Some(_) => {
                let (width, height) = export_size(source.native_size, self.state.crevice);
                FrameOutput::Export { width, height }
            }
            None => FrameOutput::Live,
        };
        let exporting = matches!(output, FrameOutput::Export { .. });
        let resolution = match output {
            FrameOutput::Export { width, height } => (width, height),
            FrameOutput::Live => self.backend.surface_size(),
        };
        let view = PassView {
            resolution: [resolution.0 as f32, resolution.1 as f32],
            image_aspect: source.aspect,
            mouse: self.state.pointer,
            crevice: self.state.crevice,
            vertex_scale: self.state.vertex_scale,
            time,
        };

        self.backend.begin_frame(output)?;
        match self.state.layer_mode {
            LayerMode::Single => {
                let uniforms = effect_uniforms(&view, &self.stores[self.state.active_layer].get());
                self.backend.draw(&DrawPass {
                    program: if exporting {
                        ProgramKind::EffectExport
                    } else {
                        ProgramKind::Effect
                    },
                    target: PassTarget::Output,
                    input: PassInput::Source,
                    uniforms: &uniforms,
                })?;
            }
            LayerMode::Dual => {
                let layer_view =
                    PassView::layer(source.native_size, source.aspect, self.state.pointer, time);
                for (index, store) in self.stores.iter().enumerate() {
                    let uniforms = effect_uniforms(&layer_view, &store.get());
                    self.backend.draw(&DrawPass {
                        program: ProgramKind::EffectExport,
                        target: PassTarget::Offscreen(index),
                        input: PassInput::Source,
                        uniforms: &uniforms,
                    })?;
                }
                let uniforms = finish_uniforms(&view, self.state.blend);
                self.backend.draw(&DrawPass {
                    program: if exporting {
                        ProgramKind::FinishExport
                    } else {
                        ProgramKind::Finish
                    },
                    target: PassTarget::Output,
                    input: PassInput::Layers,
                    uniforms: &uniforms,
                })?;
            }
        }
        let pixels = self.backend.finish_frame()?;

        match (export, output) {
            (Some(callback), FrameOutput::Export { width, height }) => {
                let image = pixels.ok_or_else(|| {
                    RenderError::Readback("export frame produced no pixels".to_string())
                })?;
                callback(image)?;
                tracing::info!(width, height, "export frame delivered");
                Ok(TickOutcome::Exported { width, height })
            }
            _ => Ok(TickOutcome::Presented),
        }
    }

    fn set_layer_mode(&mut self, mode: LayerMode) -> Result<()> {
        if mode == self.state.layer_mode {
            return Ok(());
        }
        self.state.layer_mode = mode;
        match mode {
            LayerMode::Dual => {
                if let Some(size) = self.source.as_ref().map(|source| source.native_size) {
                    self.reallocate_offscreen(size)?;
                }
            }
            LayerMode::Single => self.backend.release_offscreen(),
        }
        tracing::info!(mode = ?mode, "layer mode changed");
        Ok(())
    }

    fn reallocate_offscreen(&mut self, size: (u32, u32)) -> Result<()> {
        self.backend.release_offscreen();
        self.backend.allocate_offscreen(size)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.lifecycle == Lifecycle::Disposed {
            return Err(disposed());
        }
        Ok(())
    }
}

/// Export extent that keeps the whole displaced image visible at its native
/// resolution: `native / (1 - crevice)` per axis, rounded.
pub fn export_size(native: (u32, u32), crevice: [f32; 2]) -> (u32, u32) {
    let axis = |length: u32, crevice: f32| -> u32 {
        let crevice = f64::from(clamp_crevice(crevice));
        ((f64::from(length) / (1.0 - crevice)).round() as u32).max(1)
    };
    (axis(native.0, crevice[0]), axis(native.1, crevice[1]))
}

/// Maps a cursor position in physical pixels to normalized device
/// coordinates with Y pointing up.
pub fn pointer_to_ndc(position: (f64, f64), size: (u32, u32)) -> [f32; 2] {
    let width = f64::from(size.0.max(1));
    let height = f64::from(size.1.max(1));
    let x = position.0 / width * 2.0 - 1.0;
    let y = 1.0 - position.1 / height * 2.0;
    [x.clamp(-1.0, 1.0) as f32, y.clamp(-1.0, 1.0) as f32]
}

fn clamp_crevice(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, CREVICE_LIMIT)
    } else {
        0.0
    }
}

fn layer_out_of_range(layer: usize) -> RenderError {
    RenderError::SpecMismatch(format!(
        "layer {layer} out of range (expected 0..{LAYER_COUNT})"
    ))
}

fn disposed() -> RenderError {
    RenderError::Lifecycle("renderer has been disposed".to_string())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::effects::EFFECT_UNIFORMS;
    use crate::params::KeyPolicy;

    #[derive(Clone, Debug, PartialEq)]
    pub(crate) enum Call {
        LoadMesh { vertices: usize },
        ReplaceSource { upload: (u32, u32), native: (u32, u32) },
        Allocate((u32, u32)),
        Release,
        Begin(FrameOutput),
        Draw {
            program: ProgramKind,
            target: PassTarget,
            input: PassInput,
            uniforms: Vec<UniformValue>,
        },
        Finish,
        ReleaseAll,
    }

    /// Records every backend call instead of touching a GPU.
    #[derive(Debug)]
    pub(crate) struct RecordingBackend {
        pub calls: Vec<Call>,
        pub surface: (u32, u32),
        output: Option<FrameOutput>,
        pub offscreen_live: bool,
        pub fail_allocation: bool,
    }

    impl RecordingBackend {
        pub(crate) fn new(surface: (u32, u32)) -> Self {
            Self {
                calls: Vec::new(),
                surface,
                output: None,
                offscreen_live: false,
                fail_allocation: false,
            }
        }

        pub(crate) fn draws(&self) -> Vec<&Call> {
            self.calls
                .iter()
                .filter(|call| matches!(call, Call::Draw { .. }))
                .collect()
        }

        pub(crate) fn clear(&mut self) {
            self.calls.clear();
        }
    }

    impl RenderBackend for RecordingBackend {
        fn load_mesh(&mut self, mesh: &Mesh) -> Result<()> {
            self.calls.push(Call::LoadMesh {
                vertices: mesh.vertex_count(),
            });
            Ok(())
        }

        fn replace_source(&mut self, image: &PreparedImage<'_>) -> Result<()> {
            self.calls.push(Call::ReplaceSource {
                upload: image.upload_size(),
                native: image.native_size,
            });
            Ok(())
        }

        fn allocate_offscreen(&mut self, size: (u32, u32)) -> Result<()> {
            if self.fail_allocation {
                return Err(RenderError::SpecMismatch(format!(
                    "{}x{} exceeds the texture limit",
                    size.0, size.1
                )));
            }
            assert!(!self.offscreen_live, "offscreen pair allocated twice");
            self.offscreen_live = true;
            self.calls.push(Call::Allocate(size));
            Ok(())
        }

        fn release_offscreen(&mut self) {
            self.offscreen_live = false;
            self.calls.push(Call::Release);
        }

        fn surface_size(&self) -> (u32, u32) {
            self.surface
        }

        fn begin_frame(&mut self, output: FrameOutput) -> Result<()> {
            self.output = Some(output);
            self.calls.push(Call::Begin(output));
            Ok(())
        }

        fn draw(&mut self, pass: &DrawPass<'_>) -> Result<()> {
            if matches!(pass.target, PassTarget::Offscreen(_)) {
                assert!(self.offscreen_live, "draw into released offscreen target");
            }
            self.calls.push(Call::Draw {
                program: pass.program,
                target: pass.target,
                input: pass.input,
                uniforms: pass.uniforms.to_vec(),
            });
            Ok(())
        }

        fn finish_frame(&mut self) -> Result<Option<RgbaImage>> {
            self.calls.push(Call::Finish);
            Ok(match self.output.take() {
                Some(FrameOutput::Export { width, height }) => Some(RgbaImage::new(width, height)),
                _ => None,
            })
        }

        fn release_all(&mut self) {
            self.offscreen_live = false;
            self.calls.push(Call::ReleaseAll);
        }
    }

    fn config(layer_mode: LayerMode) -> RendererConfig {
        RendererConfig {
            layer_mode,
            key_policy: KeyPolicy::Strict,
            ..RendererConfig::default()
        }
    }

    fn orchestrator(layer_mode: LayerMode) -> RenderOrchestrator<RecordingBackend> {
        RenderOrchestrator::new(RecordingBackend::new((800, 600)), &config(layer_mode)).unwrap()
    }

    fn uniform(values: &[UniformValue], name: &str) -> UniformValue {
        let index = EFFECT_UNIFORMS
            .iter()
            .position(|(uniform, _)| *uniform == name)
            .unwrap();
        values[index].clone()
    }

    fn capture() -> (Rc<RefCell<Vec<(u32, u32)>>>, impl Fn() -> ExportCallback) {
        let exports = Rc::new(RefCell::new(Vec::new()));
        let sink = exports.clone();
        let make = move || -> ExportCallback {
            let sink = sink.clone();
            Box::new(move |image: RgbaImage| {
                sink.borrow_mut().push(image.dimensions());
                Ok(())
            })
        };
        (exports, make)
    }

    #[test]
    fn mesh_is_uploaded_at_construction() {
        let renderer = orchestrator(LayerMode::Single);
        assert_eq!(renderer.backend().calls, vec![Call::LoadMesh { vertices: 16 }]);
        assert_eq!(renderer.lifecycle(), Lifecycle::Idle);
    }

    #[test]
    fn ticks_are_skipped_until_an_image_loads() {
        let mut renderer = orchestrator(LayerMode::Single);
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Skipped);
        assert!(renderer.start().is_err());

        renderer.load_image(&RgbaImage::new(300, 450), Some("photo")).unwrap();
        assert_eq!(renderer.lifecycle(), Lifecycle::Running);
        assert!(renderer.backend().calls.contains(&Call::ReplaceSource {
            upload: (512, 512),
            native: (300, 450),
        }));
        let source = renderer.source().unwrap();
        assert!((source.aspect - 0.6667).abs() < 1e-4);
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Presented);
    }

    #[test]
    fn single_mode_draws_active_layer_to_the_output() {
        let mut renderer = orchestrator(LayerMode::Single);
        renderer.load_image(&RgbaImage::new(64, 64), None).unwrap();
        renderer
            .apply(StateChange::Param {
                layer: 1,
                key: "uMosaic".into(),
                value: 12.0.into(),
            })
            .unwrap();
        renderer
            .apply(StateChange::Param {
                layer: 1,
                key: "isMosaic".into(),
                value: true.into(),
            })
            .unwrap();
        renderer.apply(StateChange::SwitchLayer).unwrap();
        renderer.backend_mut().clear();

        renderer.tick(1.5).unwrap();
        let calls = &renderer.backend().calls;
        assert_eq!(calls.first(), Some(&Call::Begin(FrameOutput::Live)));
        assert_eq!(calls.last(), Some(&Call::Finish));
        let draws = renderer.backend().draws();
        assert_eq!(draws.len(), 1);
        let Call::Draw {
            program,
            target,
            input,
            uniforms,
        } = draws[0]
        else {
            unreachable!()
        };
        assert_eq!(*program, ProgramKind::Effect);
        assert_eq!(*target, PassTarget::Output);
        assert_eq!(*input, PassInput::Source);
        assert_eq!(uniform(uniforms, "uMosaic"), UniformValue::Float(12.0));
        assert_eq!(uniform(uniforms, "uResolution"), UniformValue::Vec2([800.0, 600.0]));
        assert_eq!(uniform(uniforms, "uTime"), UniformValue::Float(1.5));
    }

    #[test]
    fn failed_target_allocation_drops_the_new_source() {
        let mut renderer = orchestrator(LayerMode::Dual);
        renderer.load_image(&RgbaImage::new(64, 32), Some("small")).unwrap();
        assert_eq!(renderer.source().unwrap().native_size, (64, 32));

        renderer.backend_mut().fail_allocation = true;
        assert!(renderer.load_image(&RgbaImage::new(300, 200), Some("big")).is_err());
        assert!(renderer.source().is_none());
        assert_eq!(renderer.export_size(), None);
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Skipped);

        renderer.backend_mut().fail_allocation = false;
        renderer.load_image(&RgbaImage::new(300, 200), Some("big")).unwrap();
        assert_eq!(renderer.source().unwrap().native_size, (300, 200));
        assert!(renderer.backend().offscreen_live);
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Presented);
    }

    #[test]
    fn dual_mode_renders_each_layer_offscreen_then_finishes() {
        let mut renderer = orchestrator(LayerMode::Dual);
        renderer.load_image(&RgbaImage::new(200, 100), None).unwrap();
        assert!(renderer.backend().calls.contains(&Call::Allocate((200, 100))));
        renderer.apply(StateChange::Blend(BlendMode::Difference)).unwrap();
        renderer.apply(StateChange::Crevice([0.3, 0.3])).unwrap();
        renderer.backend_mut().clear();

        renderer.tick(0.0).unwrap();
        let draws = renderer.backend().draws();
        assert_eq!(draws.len(), 3);

        let expected = [
            (ProgramKind::EffectExport, PassTarget::Offscreen(0), PassInput::Source),
            (ProgramKind::EffectExport, PassTarget::Offscreen(1), PassInput::Source),
            (ProgramKind::Finish, PassTarget::Output, PassInput::Layers),
        ];
        for (call, (kind, at, from)) in draws.iter().zip(expected) {
            let Call::Draw {
                program,
                target,
                input,
                ..
            } = call
            else {
                unreachable!()
            };
            assert_eq!((*program, *target, *input), (kind, at, from));
        }

        let Call::Draw { uniforms, .. } = draws[0] else {
            unreachable!()
        };
        assert_eq!(uniform(uniforms, "uResolution"), UniformValue::Vec2([200.0, 100.0]));
        assert_eq!(uniform(uniforms, "uCrevice"), UniformValue::Vec2([0.0, 0.0]));

        let Call::Draw { uniforms, .. } = draws[2] else {
            unreachable!()
        };
        assert_eq!(uniforms[3], UniformValue::Vec2([0.3, 0.3]));
        assert_eq!(uniforms[5], UniformValue::Int(BlendMode::Difference.shader_index()));
    }

    #[test]
    fn export_fires_once_at_crevice_compensated_size() {
        let mut renderer = orchestrator(LayerMode::Single);
        renderer.load_image(&RgbaImage::new(1000, 800), None).unwrap();
        renderer.apply(StateChange::Crevice([0.2, 0.1])).unwrap();
        assert_eq!(renderer.export_size(), Some((1250, 889)));

        let (exports, make) = capture();
        renderer.request_export(make()).unwrap();
        assert!(renderer.has_pending_export());
        renderer.backend_mut().clear();

        let outcome = renderer.tick(0.0).unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Exported {
                width: 1250,
                height: 889
            }
        );
        assert!(!renderer.has_pending_export());
        assert_eq!(
            renderer.backend().calls[0],
            Call::Begin(FrameOutput::Export {
                width: 1250,
                height: 889
            })
        );
        let Call::Draw {
            program, uniforms, ..
        } = renderer.backend().draws()[0]
        else {
            unreachable!()
        };
        assert_eq!(*program, ProgramKind::EffectExport);
        assert_eq!(uniform(uniforms, "uResolution"), UniformValue::Vec2([1250.0, 889.0]));

        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Presented);
        assert_eq!(*exports.borrow(), vec![(1250, 889)]);
    }

    #[test]
    fn dual_export_uses_the_export_finishing_program() {
        let mut renderer = orchestrator(LayerMode::Dual);
        renderer.load_image(&RgbaImage::new(64, 32), None).unwrap();
        let (exports, make) = capture();
        renderer.request_export(make()).unwrap();
        renderer.backend_mut().clear();

        renderer.tick(0.0).unwrap();
        let programs: Vec<ProgramKind> = renderer
            .backend()
            .draws()
            .iter()
            .map(|call| match call {
                Call::Draw { program, .. } => *program,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            programs,
            vec![
                ProgramKind::EffectExport,
                ProgramKind::EffectExport,
                ProgramKind::FinishExport
            ]
        );
        assert_eq!(*exports.borrow(), vec![(64, 32)]);
    }

    #[test]
    fn failing_export_callback_is_not_retried() {
        let mut renderer = orchestrator(LayerMode::Single);
        renderer.load_image(&RgbaImage::new(8, 8), None).unwrap();
        renderer
            .request_export(Box::new(|_: RgbaImage| -> Result<()> {
                Err(RenderError::Readback("disk full".into()))
            }))
            .unwrap();
        assert!(renderer.tick(0.0).is_err());
        assert!(!renderer.has_pending_export());
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Presented);
    }

    #[test]
    fn switching_layer_mode_allocates_and_releases_targets() {
        let mut renderer = orchestrator(LayerMode::Single);
        renderer.load_image(&RgbaImage::new(40, 30), None).unwrap();
        renderer.backend_mut().clear();

        renderer.apply(StateChange::ToggleLayerMode).unwrap();
        assert_eq!(renderer.state().layer_mode, LayerMode::Dual);
        assert!(renderer.backend().offscreen_live);

        renderer.load_image(&RgbaImage::new(50, 20), None).unwrap();
        assert!(renderer.backend().calls.ends_with(&[Call::Release, Call::Allocate((50, 20))]));

        renderer.apply(StateChange::LayerMode(LayerMode::Single)).unwrap();
        assert!(!renderer.backend().offscreen_live);
    }

    #[test]
    fn pointer_updates_are_ignored_while_fixed() {
        let mut renderer = orchestrator(LayerMode::Single);
        renderer.apply(StateChange::Pointer([0.5, 0.5])).unwrap();
        renderer.apply(StateChange::TogglePointerFixed).unwrap();
        renderer.apply(StateChange::Pointer([-0.5, -0.5])).unwrap();
        assert_eq!(renderer.state().pointer, [0.5, 0.5]);
        renderer.apply(StateChange::SetPointerFixed(false)).unwrap();
        renderer.apply(StateChange::Pointer([-0.5, -0.5])).unwrap();
        assert_eq!(renderer.state().pointer, [-0.5, -0.5]);
    }

    #[test]
    fn crevice_is_clamped() {
        let mut renderer = orchestrator(LayerMode::Single);
        renderer.apply(StateChange::Crevice([1.5, -0.2])).unwrap();
        assert_eq!(renderer.state().crevice, [CREVICE_LIMIT, 0.0]);
    }

    #[test]
    fn stop_start_and_dispose() {
        let mut renderer = orchestrator(LayerMode::Dual);
        renderer.load_image(&RgbaImage::new(16, 16), None).unwrap();
        renderer.stop().unwrap();
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Skipped);
        renderer.start().unwrap();
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Presented);

        let (_, make) = capture();
        renderer.request_export(make()).unwrap();
        renderer.dispose();
        assert_eq!(renderer.lifecycle(), Lifecycle::Disposed);
        assert!(!renderer.has_pending_export());
        assert_eq!(renderer.backend().calls.last(), Some(&Call::ReleaseAll));
        assert!(renderer.start().is_err());
        assert!(renderer.apply(StateChange::SwitchLayer).is_err());
        assert_eq!(renderer.tick(0.0).unwrap(), TickOutcome::Skipped);
    }

    #[test]
    fn copy_layer_and_import() {
        let mut renderer = orchestrator(LayerMode::Single);
        renderer
            .apply(StateChange::Param {
                layer: 0,
                key: "uTint".into(),
                value: 0.4.into(),
            })
            .unwrap();
        renderer.apply(StateChange::CopyLayer { from: 0, to: 1 }).unwrap();
        assert_eq!(
            renderer.store(1).unwrap().get_one("uTint"),
            Some(&ParamValue::Number(0.4))
        );

        let applied = renderer.import_params(1, r#"{"uContrast": 0.8}"#).unwrap();
        assert_eq!(applied, vec!["uContrast".to_string()]);
        assert_eq!(
            renderer.store(1).unwrap().get_one("uTint"),
            Some(&ParamValue::Number(0.4))
        );
        assert!(renderer.import_params(1, r#"{"bogus": 1}"#).is_err());
        assert!(renderer.store(2).is_err());
    }

    #[test]
    fn randomize_touches_only_the_active_layer() {
        let mut renderer = orchestrator(LayerMode::Single);
        let before = renderer.store(1).unwrap().get();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(renderer.randomize_active(&mut rng), 0);
        assert_eq!(renderer.store(1).unwrap().get(), before);
    }

    #[test]
    fn pointer_maps_to_ndc_with_y_up() {
        assert_eq!(pointer_to_ndc((0.0, 0.0), (200, 100)), [-1.0, 1.0]);
        assert_eq!(pointer_to_ndc((200.0, 100.0), (200, 100)), [1.0, -1.0]);
        assert_eq!(pointer_to_ndc((100.0, 50.0), (200, 100)), [0.0, 0.0]);
    }
}
