//! Thin wrapper around the `image` crate used to decode a configured
//! background image into ARGB8888 for the compositor, and to encode a
//! screenshot of the current scanout back out as PNG.

use std::path::Path;

use image::{GenericImageView, ImageBuffer, Rgba};

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// ARGB8888, row-major, no padding.
    pub pixels: Vec<u8>,
}

pub fn decode(path: &Path) -> Result<DecodedImage, ImageError> {
    let img = image::open(path)?;
    let (width, height) = img.dimensions();
    let rgba = img.to_rgba8();
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for p in rgba.pixels() {
        let [r, g, b, a] = p.0;
        pixels.extend_from_slice(&[b, g, r, a]);
    }
    Ok(DecodedImage { width, height, pixels })
}

/// Writes `pixels` (ARGB8888, row-major) to `path` as a PNG.
pub fn write_screenshot(path: &Path, width: u32, height: u32, pixels: &[u8]) -> Result<(), ImageError> {
    let mut rgba = ImageBuffer::<Rgba<u8>, Vec<u8>>::new(width, height);
    for (i, px) in rgba.pixels_mut().enumerate() {
        let off = i * 4;
        if off + 4 > pixels.len() {
            break;
        }
        let b = pixels[off];
        let g = pixels[off + 1];
        let r = pixels[off + 2];
        let a = pixels[off + 3];
        *px = Rgba([r, g, b, a]);
    }
    rgba.save(path).map_err(|e| ImageError::Decode(image::ImageError::IoError(e)))
}
