//! File naming and encoding for exported frames and parameter files.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::error::{RenderError, Result};
use crate::types::ExportFormat;

/// Stem used when the source image has no file name.
pub const DEFAULT_STEM: &str = "fxdrop";

/// File stem of `source`, or [`DEFAULT_STEM`].
pub fn export_stem(source: Option<&Path>) -> String {
    source
        .and_then(Path::file_stem)
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(DEFAULT_STEM)
        .to_string()
}

pub fn image_path(dir: &Path, stem: &str, format: ExportFormat) -> PathBuf {
    dir.join(format!("{stem}.{}", format.extension()))
}

/// `<stem>.json` for the first layer, `<stem>.layer2.json` for the second.
pub fn params_path(dir: &Path, stem: &str, layer: usize) -> PathBuf {
    if layer == 0 {
        dir.join(format!("{stem}.json"))
    } else {
        dir.join(format!("{stem}.layer{}.json", layer + 1))
    }
}

/// Encodes `image` at `path`. JPEG output drops the alpha channel.
pub fn save_image(image: &RgbaImage, path: &Path, format: ExportFormat) -> Result<()> {
    ensure_parent(path)?;
    match format {
        ExportFormat::Png => image.save_with_format(path, ImageFormat::Png)?,
        ExportFormat::Jpeg => DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .save_with_format(path, ImageFormat::Jpeg)?,
    }
    tracing::info!(path = %path.display(), "image exported");
    Ok(())
}

pub fn write_params(path: &Path, json: &str) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, json).map_err(|err| RenderError::io(path, err))?;
    tracing::info!(path = %path.display(), "parameters exported");
    Ok(())
}

pub fn read_params(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| RenderError::io(path, err))
}

/// Decodes an image file into RGBA pixels.
pub fn load_image(path: &Path) -> Result<RgbaImage> {
    let reader = image::ImageReader::open(path).map_err(|err| RenderError::io(path, err))?;
    let reader = reader
        .with_guessed_format()
        .map_err(|err| RenderError::io(path, err))?;
    Ok(reader.decode()?.to_rgba8())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|err| RenderError::io(parent, err))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn stems_come_from_the_source_name() {
        assert_eq!(export_stem(Some(Path::new("/photos/beach.day.jpeg"))), "beach.day");
        assert_eq!(export_stem(None), DEFAULT_STEM);
    }

    #[test]
    fn export_paths() {
        let dir = Path::new("out");
        assert_eq!(image_path(dir, "beach", ExportFormat::Png), dir.join("beach.png"));
        assert_eq!(image_path(dir, "beach", ExportFormat::Jpeg), dir.join("beach.jpg"));
        assert_eq!(params_path(dir, "beach", 0), dir.join("beach.json"));
        assert_eq!(params_path(dir, "beach", 1), dir.join("beach.layer2.json"));
    }

    #[test]
    fn images_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbaImage::from_pixel(4, 2, Rgba([10, 200, 30, 128]));

        let png = image_path(dir.path(), "frame", ExportFormat::Png);
        save_image(&image, &png, ExportFormat::Png).unwrap();
        let loaded = load_image(&png).unwrap();
        assert_eq!(loaded, image);

        let jpeg = image_path(&dir.path().join("nested"), "frame", ExportFormat::Jpeg);
        save_image(&image, &jpeg, ExportFormat::Jpeg).unwrap();
        let loaded = load_image(&jpeg).unwrap();
        assert_eq!(loaded.dimensions(), (4, 2));
        assert!(loaded.pixels().all(|pixel| pixel[3] == 255));
    }

    #[test]
    fn params_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = params_path(dir.path(), "frame", 1);
        write_params(&path, "{}").unwrap();
        assert_eq!(read_params(&path).unwrap(), "{}");
        assert!(matches!(
            read_params(&dir.path().join("missing.json")),
            Err(RenderError::Io { .. })
        ));
    }
}
