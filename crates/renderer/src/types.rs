use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::params::KeyPolicy;

/// How the two offscreen layers are combined in the finishing pass.
///
/// The discriminant is the value handed to the finishing shader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Show the first layer only.
    #[default]
    None,
    Under,
    Add,
    Subtract,
    InvertSubtract,
    Multiply,
    Screen,
    Darken,
    Lighten,
    Difference,
    Exclusion,
}

impl BlendMode {
    pub const ALL: [BlendMode; 11] = [
        BlendMode::None,
        BlendMode::Under,
        BlendMode::Add,
        BlendMode::Subtract,
        BlendMode::InvertSubtract,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::Difference,
        BlendMode::Exclusion,
    ];

    pub fn shader_index(self) -> i32 {
        self as i32
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Next mode in declaration order, wrapping around.
    pub fn next(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }

    pub fn name(self) -> &'static str {
        match self {
            BlendMode::None => "none",
            BlendMode::Under => "under",
            BlendMode::Add => "add",
            BlendMode::Subtract => "subtract",
            BlendMode::InvertSubtract => "invert-subtract",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
        }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|mode| mode.name() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|mode| mode.name()).collect();
                format!("unknown blend mode `{value}` (expected one of {})", names.join(", "))
            })
    }
}

/// Whether frames come from one layer drawn directly or two layers
/// composited through offscreen targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerMode {
    #[default]
    Single,
    Dual,
}

impl LayerMode {
    pub fn toggled(self) -> Self {
        match self {
            LayerMode::Single => LayerMode::Dual,
            LayerMode::Dual => LayerMode::Single,
        }
    }
}

impl FromStr for LayerMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" | "1" => Ok(LayerMode::Single),
            "dual" | "2" => Ok(LayerMode::Dual),
            other => Err(format!("unknown layer mode `{other}` (expected single or dual)")),
        }
    }
}

/// Raster format for exported frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ExportFormat::Png),
            "jpg" | "jpeg" => Ok(ExportFormat::Jpeg),
            other => Err(format!("unsupported export format `{other}` (expected png or jpeg)")),
        }
    }
}

/// Everything the interactive renderer needs to start.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Initial window size in physical pixels.
    pub window_size: (u32, u32),
    /// Grid used for the crevice mesh.
    pub mesh_rows: u32,
    pub mesh_columns: u32,
    pub layer_mode: LayerMode,
    pub blend_mode: BlendMode,
    pub export_format: ExportFormat,
    /// Directory that receives exported images and parameter files.
    pub output_dir: PathBuf,
    pub key_policy: KeyPolicy,
    /// Optional frame-rate cap; `None` redraws every display refresh.
    pub target_fps: Option<f32>,
    /// Image loaded before the first frame.
    pub initial_image: Option<PathBuf>,
    /// Parameter files applied to the first and second layer at startup.
    pub initial_params: [Option<PathBuf>; 2],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_size: (1280, 800),
            mesh_rows: 2,
            mesh_columns: 2,
            layer_mode: LayerMode::default(),
            blend_mode: BlendMode::default(),
            export_format: ExportFormat::default(),
            output_dir: PathBuf::from("."),
            key_policy: KeyPolicy::Permissive,
            target_fps: None,
            initial_image: None,
            initial_params: [None, None],
        }
    }
}
