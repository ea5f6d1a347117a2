//! Image decoding with the `image` crate.

use std::io::Cursor;

use image::DynamicImage;
use image::imageops::FilterType;
use tracing::trace;

use crate::domain::entities::{DecodeSignature, DecodedImage, Dimensions, PixelFormat};
use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::ImageDecoderPort;

/// Decodes PNG, JPEG and WebP sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageCrateDecoder {
    /// Creates a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn convert(image: DynamicImage, format: PixelFormat) -> DynamicImage {
    match format {
        PixelFormat::Rgba8 => DynamicImage::ImageRgba8(image.to_rgba8()),
        PixelFormat::Rgb8 => DynamicImage::ImageRgb8(image.to_rgb8()),
        PixelFormat::LumaA8 => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        PixelFormat::Luma8 => DynamicImage::ImageLuma8(image.to_luma8()),
    }
}

impl ImageDecoderPort for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8], signature: &DecodeSignature) -> LoadResult<DecodedImage> {
        let mut image = image::load_from_memory(bytes)
            .map_err(|e| LoadError::decode(&signature.uri, e.to_string()))?;

        let sample_size = signature.sample_size.max(1);
        if sample_size > 1 {
            let width = (image.width() / sample_size).max(1);
            let height = (image.height() / sample_size).max(1);
            image = image.resize_exact(width, height, FilterType::Triangle);
        }
        if let Some(format) = signature.format {
            image = convert(image, format);
        }

        trace!(
            signature = %signature,
            width = image.width(),
            height = image.height(),
            "Decoded"
        );
        Ok(DecodedImage::new(image, signature.format))
    }

    fn probe_dimensions(&self, uri: &str, bytes: &[u8]) -> LoadResult<Dimensions> {
        let (width, height) = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| LoadError::metadata(uri, e.to_string()))?
            .into_dimensions()
            .map_err(|e| LoadError::metadata(uri, e.to_string()))?;
        Ok(Dimensions::new(width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_probe_reads_header_dimensions() {
        let dims = ImageCrateDecoder::new()
            .probe_dimensions("u", &png(64, 32))
            .unwrap();
        assert_eq!(dims, Dimensions::new(64, 32));
    }

    #[test]
    fn test_decode_applies_sample_size_and_format() {
        let signature = DecodeSignature::new("u", 2, Some(PixelFormat::Rgba8));
        let decoded = ImageCrateDecoder::new().decode(&png(64, 32), &signature).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
        assert_eq!(decoded.format(), Some(PixelFormat::Rgba8));
        assert_eq!(decoded.byte_cost(), 32 * 16 * 4);
    }

    #[test]
    fn test_decode_native_format_at_full_size() {
        let signature = DecodeSignature::new("u", 1, None);
        let decoded = ImageCrateDecoder::new().decode(&png(10, 10), &signature).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
        assert_eq!(decoded.byte_cost(), 10 * 10 * 3);
    }

    #[test]
    fn test_garbage_bytes() {
        let decoder = ImageCrateDecoder::new();
        assert!(matches!(
            decoder.decode(b"not an image", &DecodeSignature::new("u", 1, None)),
            Err(LoadError::DecodeFailure { .. })
        ));
        assert!(matches!(
            decoder.probe_dimensions("u", b"not an image"),
            Err(LoadError::MetadataFailure { .. })
        ));
    }
}
