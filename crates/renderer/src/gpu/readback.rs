use std::sync::mpsc;

use image::RgbaImage;

use crate::error::{RenderError, Result};

const BYTES_PER_PIXEL: u32 = 4;

/// Row pitch of a texture-to-buffer copy, padded to the copy alignment.
pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Buffer a texture is copied into so its pixels can be mapped.
pub(crate) struct Readback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
}

impl Readback {
    /// Records a copy of `texture` into a fresh mappable buffer.
    pub(crate) fn record(
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
        (width, height): (u32, u32),
    ) -> Self {
        let padded_bytes_per_row = padded_bytes_per_row(width);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("export readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Self {
            buffer,
            width,
            height,
            padded_bytes_per_row,
        }
    }

    /// Blocks until the copy has landed and returns the tightly packed image.
    /// Call after the encoder holding the copy was submitted.
    pub(crate) fn finish(self, device: &wgpu::Device) -> Result<RgbaImage> {
        let slice = self.buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Readback(format!("device poll failed: {err}")))?;
        receiver
            .recv()
            .map_err(|_| RenderError::Readback("map callback never ran".to_string()))?
            .map_err(|err| RenderError::Readback(format!("buffer mapping failed: {err}")))?;

        let pixels = {
            let mapped = slice.get_mapped_range();
            unpad_rows(&mapped, self.width, self.height, self.padded_bytes_per_row)
        };
        self.buffer.unmap();

        RgbaImage::from_raw(self.width, self.height, pixels).ok_or_else(|| {
            RenderError::Readback(format!(
                "readback size does not match {}x{}",
                self.width, self.height
            ))
        })
    }
}

fn unpad_rows(data: &[u8], width: u32, height: u32, padded_bytes_per_row: u32) -> Vec<u8> {
    let row = (width * BYTES_PER_PIXEL) as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for chunk in data
        .chunks(padded_bytes_per_row as usize)
        .take(height as usize)
    {
        pixels.extend_from_slice(&chunk[..row.min(chunk.len())]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_the_copy_alignment() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn padding_is_stripped_per_row() {
        let width = 3;
        let padded = padded_bytes_per_row(width) as usize;
        let mut data = vec![0u8; padded * 2];
        data[..12].copy_from_slice(&[1; 12]);
        data[padded..padded + 12].copy_from_slice(&[2; 12]);
        let pixels = unpad_rows(&data, width, 2, padded as u32);
        assert_eq!(pixels.len(), 24);
        assert!(pixels[..12].iter().all(|&byte| byte == 1));
        assert!(pixels[12..].iter().all(|&byte| byte == 2));
    }
}
