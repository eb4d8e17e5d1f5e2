use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fxdrop_renderer::{BlendMode, ExportFormat, LayerMode};

#[derive(Parser, Debug)]
#[command(
    name = "fxdrop",
    author,
    version,
    about = "Drop an image, tune layered GPU effects live, export the result",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Options for the interactive window. Every flag overrides `config.toml`.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Image to load before the first frame (drag-and-drop works too).
    #[arg(value_name = "IMAGE")]
    pub image: Option<PathBuf>,

    /// Configuration file; defaults to `config.toml` in the config directory.
    #[arg(long, value_name = "FILE", env = "FXDROP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Initial window size (e.g. `1280x800`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_dimensions)]
    pub size: Option<(u32, u32)>,

    /// Crevice mesh grid (e.g. `8x8`).
    #[arg(long, value_name = "ROWSxCOLUMNS", value_parser = parse_dimensions)]
    pub mesh: Option<(u32, u32)>,

    /// `single` draws one layer directly, `dual` composites two.
    #[arg(long, value_name = "MODE")]
    pub layers: Option<LayerMode>,

    /// Blend mode of the dual-layer finishing pass (e.g. `screen`).
    #[arg(long, value_name = "MODE")]
    pub blend: Option<BlendMode>,

    /// Raster format for `S` exports: `png` or `jpeg`.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<ExportFormat>,

    /// Directory for exported images and parameter files.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Reject parameter keys outside the catalogue instead of warning.
    #[arg(long)]
    pub strict_params: bool,

    /// Optional FPS cap (0=uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Parameter file applied to the first layer at startup.
    #[arg(long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Parameter file applied to the second layer at startup.
    #[arg(long, value_name = "FILE")]
    pub second_params: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render one export frame without opening a window.
    Render(RenderArgs),
    /// Inspect and generate parameter files.
    Params(ParamsCommand),
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Source image.
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Output path; the extension picks PNG or JPEG.
    #[arg(long, value_name = "PATH")]
    pub out: PathBuf,

    /// Parameter file for the first layer.
    #[arg(long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Parameter file for the second layer.
    #[arg(long, value_name = "FILE")]
    pub second_params: Option<PathBuf>,

    #[arg(long, value_name = "MODE")]
    pub layers: Option<LayerMode>,

    #[arg(long, value_name = "MODE")]
    pub blend: Option<BlendMode>,
}

#[derive(Parser, Debug)]
pub struct ParamsCommand {
    #[command(subcommand)]
    pub action: ParamsAction,
}

#[derive(Subcommand, Debug)]
pub enum ParamsAction {
    /// Write the default parameter set as JSON.
    Defaults {
        /// Destination file; prints to stdout when omitted.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Apply a parameter file to a fresh layer and list the applied keys.
    Check {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Fail on keys outside the catalogue.
        #[arg(long)]
        strict: bool,
    },
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_dimensions(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok((width, height))
}

/// Export format implied by an output path's extension.
pub fn export_format_for(path: &std::path::Path) -> Result<ExportFormat, String> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => ext.parse(),
        None => Err("output path has no extension; expected .png or .jpg".to_string()),
    }
}
