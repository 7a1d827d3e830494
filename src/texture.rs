use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, imageops::FilterType};
use serde::{Deserialize, Serialize};

/// Interpolation method used when textures are downscaled for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeInterpolation {
    Nearest,
    /// `image`'s `Triangle` filter.
    #[default]
    Bilinear,
    /// `image`'s `CatmullRom` filter.
    Bicubic,
    Gaussian,
    Lanczos3,
}

impl From<ResizeInterpolation> for FilterType {
    fn from(value: ResizeInterpolation) -> Self {
        match value {
            ResizeInterpolation::Nearest => FilterType::Nearest,
            ResizeInterpolation::Bilinear => FilterType::Triangle,
            ResizeInterpolation::Bicubic => FilterType::CatmullRom,
            ResizeInterpolation::Gaussian => FilterType::Gaussian,
            ResizeInterpolation::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Shrink `image` so both edges fit in `max_size`, keeping the aspect ratio.
/// Smaller images are returned unchanged; nothing is upscaled.
pub fn fit_texture(
    image: DynamicImage,
    max_size: u32,
    interpolation: ResizeInterpolation,
) -> DynamicImage {
    if image.width() <= max_size && image.height() <= max_size {
        return image;
    }
    image.resize(max_size, max_size, interpolation.into())
}

/// Texture bytes ready to embed in the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTexture {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode an embedded PNG/JPEG texture, fit it to `max_size` and encode it
/// back as PNG.
pub fn reencode_texture(
    name: &str,
    bytes: &[u8],
    max_size: u32,
    interpolation: ResizeInterpolation,
) -> Result<EncodedTexture> {
    let decoded = image::load_from_memory(bytes)
        .with_context(|| format!("failed to decode texture '{}'", name))?;
    let fitted = fit_texture(decoded, max_size.max(1), interpolation);

    let mut png = Vec::<u8>::new();
    fitted
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .with_context(|| format!("failed to encode texture '{}' as PNG", name))?;

    Ok(EncodedTexture {
        png,
        width: fitted.width(),
        height: fitted.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode");
        bytes
    }

    #[test]
    fn given_wide_texture_when_fitting_with_lanczos_then_aspect_ratio_is_kept() {
        let source = DynamicImage::ImageRgba8(RgbaImage::new(2048, 1024));

        let fitted = fit_texture(source, 1024, ResizeInterpolation::Lanczos3);

        assert_eq!(fitted.dimensions(), (1024, 512));
    }

    #[test]
    fn given_small_texture_when_reencoding_then_size_is_unchanged_and_output_is_png() {
        let encoded = reencode_texture("skin", &png_bytes(64, 32), 2048, ResizeInterpolation::Bilinear)
            .expect("reencodes");

        assert_eq!((encoded.width, encoded.height), (64, 32));
        assert_eq!(&encoded.png[1..4], b"PNG");
    }

    #[test]
    fn given_oversized_texture_when_reencoding_then_it_fits_the_limit() {
        let encoded = reencode_texture("hair", &png_bytes(256, 128), 64, ResizeInterpolation::Nearest)
            .expect("reencodes");

        assert_eq!((encoded.width, encoded.height), (64, 32));
    }

    #[test]
    fn given_garbage_bytes_when_reencoding_then_error_names_the_texture() {
        let error = reencode_texture("eyes", b"not an image", 1024, ResizeInterpolation::Bilinear)
            .expect_err("cannot decode");

        assert!(error.to_string().contains("eyes"));
    }

    #[test]
    fn given_interpolation_name_when_deserializing_then_lowercase_is_accepted() {
        let parsed: ResizeInterpolation = serde_json::from_str("\"bicubic\"").expect("parses");

        assert_eq!(parsed, ResizeInterpolation::Bicubic);
        assert_eq!(FilterType::from(parsed), FilterType::CatmullRom);
    }
}
