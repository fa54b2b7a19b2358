//! Decoded image buffers handed to detectors.
//!
//! - `Frame`: owned RGB8 pixels plus dimensions.
//! - `Frame::decode`: bytes in any enabled `image` format to RGB8.
//! - `Frame::crop`: copy of a `Region`, at native resolution.

use anyhow::{anyhow, Result};
use image::{GenericImageView, RgbImage};

use crate::error::CascadeError;
use crate::geometry::Region;

/// RGB8 image. Detectors receive `&Frame` and must treat it as read-only.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: RgbImage,
}

impl Frame {
    /// Wrap packed RGB24 bytes (`width * height * 3`).
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        let pixels = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB buffer rejected for {}x{}", width, height))?;
        Ok(Self { pixels })
    }

    pub fn from_image(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    /// Decode an encoded image (JPEG or PNG) and normalize it to RGB8.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, CascadeError> {
        if bytes.is_empty() {
            return Err(CascadeError::Decode {
                message: "empty payload".to_string(),
            });
        }
        let image = image::load_from_memory(bytes).map_err(|e| CascadeError::Decode {
            message: e.to_string(),
        })?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(CascadeError::Decode {
                message: format!("image has zero extent ({}x{})", width, height),
            });
        }
        Ok(Self {
            pixels: image.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Copy the pixels covered by `region`.
    ///
    /// Edges are rounded to whole pixels and clamped to the frame. The crop is
    /// not rescaled, so detector output on it differs from image-local
    /// coordinates only by `region.offset`.
    pub fn crop(&self, region: &Region) -> Frame {
        let left = round_to_pixel(region.left, self.width());
        let top = round_to_pixel(region.top, self.height());
        let right = round_to_pixel(region.right, self.width()).max(left);
        let bottom = round_to_pixel(region.bottom, self.height()).max(top);
        let view = image::imageops::crop_imm(&self.pixels, left, top, right - left, bottom - top);
        Frame {
            pixels: view.to_image(),
        }
    }
}

fn round_to_pixel(value: f32, limit: u32) -> u32 {
    value.round().clamp(0.0, limit as f32) as u32
}
