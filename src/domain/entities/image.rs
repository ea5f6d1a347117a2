//! Domain types for decoded images and their provenance.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::DecodeSignature;

/// Content address of a cached source file.
/// Generated from a hash of the resource URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(pub String);

impl ImageId {
    /// Creates a new `ImageId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates an `ImageId` from a URI by hashing it.
    #[must_use]
    pub fn from_uri(uri: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(uri.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Width and height of a source image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Creates new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout a decode is converted to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit RGBA, four bytes per pixel.
    Rgba8,
    /// 8-bit RGB, three bytes per pixel.
    Rgb8,
    /// 8-bit luminance with alpha, two bytes per pixel.
    LumaA8,
    /// 8-bit luminance, one byte per pixel.
    Luma8,
}

impl PixelFormat {
    /// Bytes used by one pixel in this format.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgb8 => 3,
            Self::LumaA8 => 2,
            Self::Luma8 => 1,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rgba8 => write!(f, "rgba8"),
            Self::Rgb8 => write!(f, "rgb8"),
            Self::LumaA8 => write!(f, "lumaa8"),
            Self::Luma8 => write!(f, "luma8"),
        }
    }
}

/// A decoded image payload held by the memory cache.
#[derive(Debug)]
pub struct DecodedImage {
    image: image::DynamicImage,
    format: Option<PixelFormat>,
}

impl DecodedImage {
    /// Wraps a decoded image. `format` is the layout it was converted to, if any.
    #[must_use]
    pub const fn new(image: image::DynamicImage, format: Option<PixelFormat>) -> Self {
        Self { image, format }
    }

    /// Returns the underlying pixel buffer.
    #[must_use]
    pub const fn image(&self) -> &image::DynamicImage {
        &self.image
    }

    /// Returns the decoded width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Returns the decoded height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns the format the pixels were converted to.
    #[must_use]
    pub const fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    /// Resident cost in bytes.
    ///
    /// Uses the real buffer length; falls back to an estimate from the
    /// dimensions when the buffer reports no bytes.
    #[must_use]
    pub fn byte_cost(&self) -> usize {
        let exact = self.image.as_bytes().len();
        if exact > 0 {
            return exact;
        }
        let bpp = self.format.map_or_else(
            || usize::from(self.image.color().bytes_per_pixel()),
            PixelFormat::bytes_per_pixel,
        );
        estimated_cost(self.width(), self.height(), bpp)
    }
}

/// Estimated cost of a `width` x `height` buffer with `bytes_per_pixel` bytes per pixel.
#[must_use]
pub fn estimated_cost(width: u32, height: u32, bytes_per_pixel: usize) -> usize {
    (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(bytes_per_pixel)
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from in-memory LRU cache.
    MemoryCache,
    /// Decoded from a previously downloaded file.
    DiskCache,
    /// Downloaded from network.
    Network,
    /// Read from the local filesystem.
    LocalFile,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
            Self::LocalFile => write!(f, "local"),
        }
    }
}

/// A fully loaded image ready for the caller.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Exact decode parameters of the payload.
    pub signature: DecodeSignature,
    /// The decoded payload, shared with the memory cache.
    pub image: Arc<DecodedImage>,
    /// Where the bytes came from.
    pub source: ImageSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_id_from_uri() {
        let uri = "https://cdn.example.com/attachments/123/456/image.png";
        let id = ImageId::from_uri(uri);
        assert_eq!(id.0.len(), 32);
        assert_eq!(id, ImageId::from_uri(uri));
        assert_ne!(id, ImageId::from_uri("https://cdn.example.com/other.png"));
    }

    #[test]
    fn test_byte_cost_uses_buffer_length() {
        let decoded = DecodedImage::new(image::DynamicImage::new_rgb8(10, 4), None);
        assert_eq!(decoded.byte_cost(), 10 * 4 * 3);
    }

    #[test]
    fn test_byte_cost_falls_back_to_estimate() {
        let decoded = DecodedImage::new(
            image::DynamicImage::new_rgba8(0, 0),
            Some(PixelFormat::Rgba8),
        );
        assert_eq!(decoded.byte_cost(), 0);
        assert_eq!(estimated_cost(8, 2, PixelFormat::Rgb8.bytes_per_pixel()), 48);
    }
}
