use std::path::{Path, PathBuf};

use image::{ColorType, DynamicImage};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("could not decode texture {path}: {source}")]
pub struct DecodeError {
    pub path: PathBuf,
    #[source]
    pub source: image::ImageError,
}

/// 8-bit pixels, rows top to bottom, channels in R, G, B, A order.
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// 1 (red only), 3 (RGB) or 4 (RGBA).
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Converts the image to the closest of the three supported layouts.
    /// Gray with alpha is widened to RGBA, and deeper formats are reduced to
    /// 8 bits per channel.
    pub fn from_dynamic(image: DynamicImage) -> DecodedImage {
        let (width, height) = (image.width(), image.height());
        let (channels, pixels) = match image.color() {
            ColorType::L8 | ColorType::L16 => (1, image.into_luma8().into_raw()),
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => {
                (3, image.into_rgb8().into_raw())
            }
            _ => (4, image.into_rgba8().into_raw()),
        };
        DecodedImage {
            width,
            height,
            channels,
            pixels,
        }
    }
}

pub fn decode_image(path: &Path) -> Result<DecodedImage, DecodeError> {
    let image = image::open(path).map_err(|source| DecodeError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(DecodedImage::from_dynamic(image))
}
