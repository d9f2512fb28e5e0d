use crate::error::Result;
use image::{ImageEncoder, RgbImage};
use std::path::Path;

/// Decodes any format the `image` crate understands into 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage> {
    let decoded = image::open(path)?;
    Ok(decoded.to_rgb8())
}

/// Writes an RGB frame as PNG.
pub fn save_rgb(path: &Path, frame: &RgbImage) -> Result<()> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);

    encoder.write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;

    Ok(())
}

/// True for file extensions the frame replay understands.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
        .unwrap_or(false)
}
