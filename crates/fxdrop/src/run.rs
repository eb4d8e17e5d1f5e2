use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use fxdrop_renderer::export::save_image;
use fxdrop_renderer::{KeyPolicy, ParameterStore, Renderer, RenderError, RendererConfig};
use tracing_subscriber::EnvFilter;

use crate::cli::{export_format_for, ParamsAction, RenderArgs, RunArgs};
use crate::config::{self, FileConfig};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    tracing::debug!(?config, "resolved renderer configuration");
    Renderer::new(config).run()
}

pub fn render(base: &RunArgs, args: RenderArgs) -> Result<()> {
    let format = export_format_for(&args.out).map_err(anyhow::Error::msg)?;
    let mut config = load_config(base)?;
    if let Some(layers) = args.layers {
        config.layer_mode = layers;
    }
    if let Some(blend) = args.blend {
        config.blend_mode = blend;
    }
    if args.params.is_some() {
        config.initial_params[0] = args.params;
    }
    if args.second_params.is_some() {
        config.initial_params[1] = args.second_params;
    }

    let image = fxdrop_renderer::render_headless(&config, &args.image)?;
    save_image(&image, &args.out, format)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    println!(
        "{} ({}x{})",
        args.out.display(),
        image.width(),
        image.height()
    );
    Ok(())
}

pub fn params(action: ParamsAction) -> Result<()> {
    match action {
        ParamsAction::Defaults { out } => {
            let json = ParameterStore::new("defaults", KeyPolicy::Permissive).to_json()?;
            match out {
                Some(path) => write_file(&path, &json)?,
                None => println!("{json}"),
            }
            Ok(())
        }
        ParamsAction::Check { file, strict } => check_params(&file, strict),
    }
}

fn check_params(path: &Path, strict: bool) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read parameter file at {}", path.display()))?;
    let policy = if strict {
        KeyPolicy::Strict
    } else {
        KeyPolicy::Permissive
    };
    let mut store = ParameterStore::new("check", policy);
    let applied = match store.apply_json(&text) {
        Ok(applied) => applied,
        Err(RenderError::UnknownParameter(key)) => {
            bail!("{}: unknown parameter `{key}`", path.display())
        }
        Err(err) => {
            return Err(err).with_context(|| format!("invalid parameter file {}", path.display()))
        }
    };

    println!("{}: {} parameters applied", path.display(), applied.len());
    for key in applied {
        println!("  {key}");
    }
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<RendererConfig> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => {
            let paths = AppPaths::discover()?;
            tracing::debug!(config = %paths.config_dir().display(), "resolved fxdrop paths");
            FileConfig::load_or_default(&paths.config_file())?
        }
    };
    Ok(config::resolve(&file, args))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to prepare directory {}", dir.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "default parameters written");
    Ok(())
}
