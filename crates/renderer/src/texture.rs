//! Source image preparation ahead of upload.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::{RenderError, Result};

/// `true` for 1, 2, 4, 8, ... and `false` for zero.
pub fn is_power_of_two(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Smallest power of two that is `>= value`. Zero maps to one, and values
/// above `2^31` have no `u32` answer.
pub fn next_power_of_two(value: u32) -> Option<u32> {
    value.max(1).checked_next_power_of_two()
}

/// Power-of-two extent that contains `(width, height)` on both axes.
pub fn padded_size(width: u32, height: u32) -> Result<(u32, u32)> {
    match (next_power_of_two(width), next_power_of_two(height)) {
        (Some(padded_width), Some(padded_height)) => Ok((padded_width, padded_height)),
        _ => Err(RenderError::SpecMismatch(format!(
            "{width}x{height} has no power-of-two texture extent"
        ))),
    }
}

/// A decoded image ready for upload, along with the facts the pipeline keeps
/// about the original.
#[derive(Clone, Debug)]
pub struct PreparedImage<'a> {
    pub pixels: Cow<'a, RgbaImage>,
    /// Dimensions before padding.
    pub native_size: (u32, u32),
    /// `native width / native height`.
    pub aspect: f32,
}

impl PreparedImage<'_> {
    pub fn upload_size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn was_padded(&self) -> bool {
        matches!(self.pixels, Cow::Owned(_))
    }
}

/// Redraws `image` onto a power-of-two canvas when either side is not
/// already a power of two. The image is stretched over the whole canvas so
/// texture coordinates keep spanning `[0, 1]`; the native aspect ratio is
/// carried separately for display.
pub fn prepare_image(image: &RgbaImage) -> Result<PreparedImage<'_>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(RenderError::EmptyImage);
    }

    let aspect = width as f32 / height as f32;
    let pixels = if is_power_of_two(width) && is_power_of_two(height) {
        Cow::Borrowed(image)
    } else {
        let (padded_width, padded_height) = padded_size(width, height)?;
        tracing::debug!(
            width,
            height,
            padded_width,
            padded_height,
            "padding source image to power-of-two canvas"
        );
        Cow::Owned(imageops::resize(
            image,
            padded_width,
            padded_height,
            FilterType::Triangle,
        ))
    };

    Ok(PreparedImage {
        pixels,
        native_size: (width, height),
        aspect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_predicate() {
        assert!(!is_power_of_two(0));
        for value in [1, 2, 4, 8, 1024, 1 << 31] {
            assert!(is_power_of_two(value), "{value}");
        }
        for value in [3, 5, 6, 7, 300, 450, 1000] {
            assert!(!is_power_of_two(value), "{value}");
        }
    }

    #[test]
    fn padding_never_shrinks() {
        for (w, h) in [(1, 1), (3, 5), (300, 450), (512, 513), (1000, 800), (64, 64)] {
            let (pw, ph) = padded_size(w, h).unwrap();
            assert!(is_power_of_two(pw) && is_power_of_two(ph));
            assert!(pw >= w && ph >= h);
            assert!(pw / 2 < w.max(1) && ph / 2 < h.max(1));
        }
    }

    #[test]
    fn padding_past_the_u32_range_is_rejected() {
        assert_eq!(next_power_of_two(1 << 31), Some(1 << 31));
        assert_eq!(next_power_of_two((1 << 31) + 1), None);
        assert!(matches!(
            padded_size((1 << 31) + 1, 4),
            Err(RenderError::SpecMismatch(_))
        ));
        assert!(padded_size(4, u32::MAX).is_err());
    }

    #[test]
    fn non_power_of_two_image_is_padded() {
        let image = RgbaImage::new(300, 450);
        let prepared = prepare_image(&image).unwrap();
        assert_eq!(prepared.upload_size(), (512, 512));
        assert_eq!(prepared.native_size, (300, 450));
        assert!((prepared.aspect - 0.6667).abs() < 1e-4);
        assert!(prepared.was_padded());
    }

    #[test]
    fn power_of_two_image_is_uploaded_as_is() {
        let image = RgbaImage::new(256, 128);
        let prepared = prepare_image(&image).unwrap();
        assert_eq!(prepared.upload_size(), (256, 128));
        assert!(!prepared.was_padded());
    }

    #[test]
    fn empty_image_is_rejected() {
        let image = RgbaImage::new(0, 10);
        assert!(matches!(prepare_image(&image), Err(RenderError::EmptyImage)));
    }
}
