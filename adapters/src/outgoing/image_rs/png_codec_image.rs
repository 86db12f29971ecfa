use image::{ImageBuffer, ImageFormat, Rgba};
use std::io::Cursor;
use tracing::{debug, instrument};

use domain::coords::CanvasSize;
use oekaki_application::{
    error::{AppError, AppResult},
    ports::outgoing::image_codec::ImageCodecPort,
};

/// PNG codec over image-rs: straight-alpha RGBA8 in both directions.
/// Snapshots are decoded to raw pixels and re-encoded on send, so the
/// bytes differ across encoders while the pixels stay exact.
#[derive(Clone, Default)]
pub struct ImagePngAdapter;

impl ImagePngAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, rgba_bytes))]
    fn encode_impl(&self, size: CanvasSize, rgba_bytes: &[u8]) -> AppResult<Vec<u8>> {
        let expected = size.pixel_count() * 4;
        if rgba_bytes.len() != expected {
            return Err(AppError::Codec {
                message: format!("Expected {expected} bytes, got {}", rgba_bytes.len()),
            });
        }

        let img_buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
            u32::from(size.width),
            u32::from(size.height),
            rgba_bytes.to_vec(),
        )
        .ok_or_else(|| AppError::Codec {
            message: "Failed to create image buffer from RGBA data".to_string(),
        })?;

        let mut png_bytes = Vec::new();
        let mut cursor = Cursor::new(&mut png_bytes);
        img_buffer
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| AppError::Codec {
                message: format!("Failed to encode PNG: {e}"),
            })?;

        debug!("encoded PNG: {} bytes", png_bytes.len());

        if png_bytes.is_empty() {
            return Err(AppError::Codec {
                message: "PNG encoding produced empty output".to_string(),
            });
        }
        Ok(png_bytes)
    }

    #[instrument(skip(self, png_data))]
    fn decode_impl(&self, png_data: &[u8]) -> AppResult<(CanvasSize, Vec<u8>)> {
        let cursor = Cursor::new(png_data);
        let reader = image::ImageReader::with_format(cursor, ImageFormat::Png);

        let img = reader.decode().map_err(|e| AppError::Decode {
            message: format!("Failed to decode PNG: {e}"),
        })?;

        let rgba_img = img.to_rgba8();
        let (width, height) = rgba_img.dimensions();
        let size = CanvasSize::new(
            u16::try_from(width).map_err(|_| AppError::Decode {
                message: format!("PNG width {width} exceeds 16 bits"),
            })?,
            u16::try_from(height).map_err(|_| AppError::Decode {
                message: format!("PNG height {height} exceeds 16 bits"),
            })?,
        );

        debug!(
            "decoded PNG: {} bytes -> {} raster",
            png_data.len(),
            size
        );
        Ok((size, rgba_img.into_raw()))
    }
}

impl ImageCodecPort for ImagePngAdapter {
    fn encode_png(&self, size: CanvasSize, rgba: &[u8]) -> AppResult<Vec<u8>> {
        self.encode_impl(size, rgba)
    }

    fn decode_png(&self, png: &[u8]) -> AppResult<(CanvasSize, Vec<u8>)> {
        self.decode_impl(png)
    }
}
