//! `config.toml` and its merge into [`RendererConfig`].
//!
//! Precedence, lowest first: built-in defaults, the file, command-line flags.
//!
//! ```toml
//! [window]
//! width = 1600
//! height = 1000
//! fps = 60
//!
//! [mesh]
//! rows = 8
//! columns = 8
//!
//! [render]
//! layers = "dual"
//! blend = "screen"
//! strict_params = false
//!
//! [export]
//! format = "jpeg"
//! output_dir = "~/Pictures/fxdrop"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fxdrop_renderer::{BlendMode, ExportFormat, KeyPolicy, LayerMode, RendererConfig};
use serde::Deserialize;

use crate::cli::RunArgs;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub window: WindowSection,
    pub mesh: MeshSection,
    pub render: RenderSection,
    pub export: ExportSection,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSection {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeshSection {
    pub rows: Option<u32>,
    pub columns: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSection {
    pub layers: Option<LayerMode>,
    pub blend: Option<BlendMode>,
    pub strict_params: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportSection {
    pub format: Option<ExportFormat>,
    pub output_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file at {}", path.display()))
    }

    /// Missing files yield the defaults; unreadable or invalid ones are errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Ok(Self::default())
        }
    }

    pub fn apply(&self, config: &mut RendererConfig) {
        let (width, height) = config.window_size;
        config.window_size = (
            self.window.width.unwrap_or(width),
            self.window.height.unwrap_or(height),
        );
        if let Some(fps) = self.window.fps {
            config.target_fps = positive_fps(fps);
        }
        if let Some(rows) = self.mesh.rows {
            config.mesh_rows = rows;
        }
        if let Some(columns) = self.mesh.columns {
            config.mesh_columns = columns;
        }
        if let Some(layers) = self.render.layers {
            config.layer_mode = layers;
        }
        if let Some(blend) = self.render.blend {
            config.blend_mode = blend;
        }
        if let Some(strict) = self.render.strict_params {
            config.key_policy = key_policy(strict);
        }
        if let Some(format) = self.export.format {
            config.export_format = format;
        }
        if let Some(dir) = &self.export.output_dir {
            config.output_dir = expand_home(dir);
        }
    }
}

impl RunArgs {
    pub fn apply(&self, config: &mut RendererConfig) {
        if let Some(size) = self.size {
            config.window_size = size;
        }
        if let Some((rows, columns)) = self.mesh {
            config.mesh_rows = rows;
            config.mesh_columns = columns;
        }
        if let Some(layers) = self.layers {
            config.layer_mode = layers;
        }
        if let Some(blend) = self.blend {
            config.blend_mode = blend;
        }
        if let Some(format) = self.format {
            config.export_format = format;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if self.strict_params {
            config.key_policy = KeyPolicy::Strict;
        }
        if let Some(fps) = self.fps {
            config.target_fps = positive_fps(fps);
        }
        if let Some(image) = &self.image {
            config.initial_image = Some(image.clone());
        }
        if let Some(params) = &self.params {
            config.initial_params[0] = Some(params.clone());
        }
        if let Some(params) = &self.second_params {
            config.initial_params[1] = Some(params.clone());
        }
    }
}

/// Defaults, then `file`, then `args`.
pub fn resolve(file: &FileConfig, args: &RunArgs) -> RendererConfig {
    let mut config = RendererConfig::default();
    file.apply(&mut config);
    args.apply(&mut config);
    config
}

fn positive_fps(fps: f32) -> Option<f32> {
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn key_policy(strict: bool) -> KeyPolicy {
    if strict {
        KeyPolicy::Strict
    } else {
        KeyPolicy::Permissive
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match directories_next::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[window]
width = 1600
height = 1000
fps = 0

[mesh]
rows = 8

[render]
layers = "dual"
blend = "invert-subtract"
strict_params = true

[export]
format = "jpeg"
output_dir = "renders"
"#;

    #[test]
    fn parses_every_section() {
        let file: FileConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(file.window.width, Some(1600));
        assert_eq!(file.mesh.columns, None);
        assert_eq!(file.render.layers, Some(LayerMode::Dual));
        assert_eq!(file.render.blend, Some(BlendMode::InvertSubtract));
        assert_eq!(file.export.format, Some(ExportFormat::Jpeg));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<FileConfig>("[render]\nlayer = \"dual\"\n").unwrap_err();
        assert!(err.to_string().contains("layer"));
        assert!(toml::from_str::<FileConfig>("[colors]\n").is_err());
    }

    #[test]
    fn file_values_sit_between_defaults_and_flags() {
        let file: FileConfig = toml::from_str(SAMPLE).unwrap();
        let args = RunArgs {
            blend: Some(BlendMode::Screen),
            mesh: Some((2, 3)),
            ..RunArgs::default()
        };
        let config = resolve(&file, &args);

        assert_eq!(config.window_size, (1600, 1000));
        assert_eq!(config.target_fps, None);
        assert_eq!((config.mesh_rows, config.mesh_columns), (2, 3));
        assert_eq!(config.layer_mode, LayerMode::Dual);
        assert_eq!(config.blend_mode, BlendMode::Screen);
        assert_eq!(config.key_policy, KeyPolicy::Strict);
        assert_eq!(config.export_format, ExportFormat::Jpeg);
        assert_eq!(config.output_dir, PathBuf::from("renders"));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileConfig::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(file, FileConfig::default());
        let config = resolve(&file, &RunArgs::default());
        assert_eq!(config.mesh_rows, RendererConfig::default().mesh_rows);
    }

    #[test]
    fn invalid_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[window]\nwidth = \"wide\"\n").unwrap();
        let err = FileConfig::load_or_default(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
