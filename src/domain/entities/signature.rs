//! Decode signature: the key of one decoded variant of a resource.

use std::fmt;

use super::{Dimensions, PixelFormat, TargetBounds};
use crate::domain::services::calculate_sample_size;

/// Exact decode parameters of a payload.
///
/// Two requests for the same URI share a payload only when their signatures
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodeSignature {
    /// Resource identifier.
    pub uri: String,
    /// Power-of-two divisor applied to both dimensions.
    pub sample_size: u32,
    /// Pixel layout, or `None` for the decoder's native layout.
    pub format: Option<PixelFormat>,
}

impl DecodeSignature {
    /// Creates a signature from explicit parameters.
    #[must_use]
    pub fn new(uri: impl Into<String>, sample_size: u32, format: Option<PixelFormat>) -> Self {
        Self {
            uri: uri.into(),
            sample_size: sample_size.max(1),
            format,
        }
    }

    /// Computes the signature for decoding an image of `dimensions` into `bounds`.
    #[must_use]
    pub fn for_bounds(
        uri: &str,
        dimensions: Dimensions,
        bounds: TargetBounds,
        format: Option<PixelFormat>,
    ) -> Self {
        Self::new(uri, calculate_sample_size(dimensions, bounds), format)
    }
}

impl fmt::Display for DecodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.format {
            Some(format) => write!(f, "{}@1/{}:{}", self.uri, self.sample_size, format),
            None => write!(f, "{}@1/{}", self.uri, self.sample_size),
        }
    }
}
