//! Port for turning encoded bytes into pixels.

use crate::domain::entities::{DecodeSignature, DecodedImage, Dimensions};
use crate::domain::errors::LoadResult;

/// Decodes encoded image bytes.
///
/// Called only from decode worker threads; implementations may be CPU heavy.
#[cfg_attr(test, mockall::automock)]
pub trait ImageDecoderPort: Send + Sync {
    /// Decodes `bytes` with the sample size and pixel format of `signature`.
    ///
    /// # Errors
    /// Returns `LoadError::DecodeFailure` if the bytes are not a decodable image.
    fn decode(&self, bytes: &[u8], signature: &DecodeSignature) -> LoadResult<DecodedImage>;

    /// Reads the source dimensions without decoding pixels.
    ///
    /// # Errors
    /// Returns `LoadError::MetadataFailure` if the header cannot be read.
    fn probe_dimensions(&self, uri: &str, bytes: &[u8]) -> LoadResult<Dimensions>;
}
