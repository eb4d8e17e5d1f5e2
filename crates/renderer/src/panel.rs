//! Translation between parameter controls and render state changes.
//!
//! The adapter never touches the renderer itself. Control edits become
//! [`StateChange`] values the caller hands to the orchestrator. After a
//! programmatic change (randomize, reset, import)
//! [`ParameterPanelAdapter::refresh_from`] pushes the new values back through
//! [`PanelControl::display`], which never produces a change.

use crate::orchestrator::{RenderState, StateChange};
use crate::params::{ParamValue, ParameterStore, PARAMETERS};

/// Key of the live crevice control.
pub const CREVICE_KEY: &str = "uCrevice";
/// Key of the live vertex scale control.
pub const VERTEX_SCALE_KEY: &str = "uVertexScale";

/// One displayed control bound to a parameter key.
pub trait PanelControl {
    fn key(&self) -> &str;
    /// Shows `value` without firing the control's change callback.
    fn display(&mut self, value: &ParamValue);
}

pub struct ParameterPanelAdapter<C: PanelControl> {
    controls: Vec<C>,
    layer: usize,
}

impl<C: PanelControl> ParameterPanelAdapter<C> {
    pub fn new(layer: usize) -> Self {
        Self {
            controls: Vec::new(),
            layer,
        }
    }

    pub fn bind(&mut self, control: C) {
        self.controls.push(control);
    }

    pub fn controls(&self) -> &[C] {
        &self.controls
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    /// Points later edits at another layer.
    pub fn set_layer(&mut self, layer: usize) {
        self.layer = layer;
    }

    /// Maps an edited control value to the change it requests. Live
    /// controls given a value of the wrong shape yield `None`.
    pub fn on_change(&self, key: &str, value: ParamValue) -> Option<StateChange> {
        match key {
            CREVICE_KEY => match value.as_vector() {
                Some(&[x, y]) => Some(StateChange::Crevice([x as f32, y as f32])),
                _ => {
                    tracing::warn!(key, "crevice control expects a pair");
                    None
                }
            },
            VERTEX_SCALE_KEY => match value.as_number() {
                Some(scale) => Some(StateChange::VertexScale(scale as f32)),
                None => {
                    tracing::warn!(key, "vertex scale control expects a number");
                    None
                }
            },
            _ => Some(StateChange::Param {
                layer: self.layer,
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Pushes the store's values and the live fields into every bound
    /// control. Controls for keys the store lacks are left alone.
    pub fn refresh_from(&mut self, store: &ParameterStore, state: &RenderState) {
        for control in &mut self.controls {
            let value = match control.key() {
                CREVICE_KEY => Some(ParamValue::Vector(
                    state.crevice.iter().map(|&v| f64::from(v)).collect(),
                )),
                VERTEX_SCALE_KEY => Some(ParamValue::Number(f64::from(state.vertex_scale))),
                key => store.get_one(key).cloned(),
            };
            if let Some(value) = value {
                control.display(&value);
            }
        }
    }

    /// Adapter with one control per catalogue key plus the live controls.
    pub fn with_catalogue(layer: usize, mut make: impl FnMut(&'static str) -> C) -> Self {
        let mut adapter = Self::new(layer);
        for spec in PARAMETERS {
            adapter.bind(make(spec.key));
        }
        adapter.bind(make(CREVICE_KEY));
        adapter.bind(make(VERTEX_SCALE_KEY));
        adapter
    }
}
