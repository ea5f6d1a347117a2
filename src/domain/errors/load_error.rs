//! Load failure taxonomy delivered to listeners.

use thiserror::Error;

/// Reasons a request can fail.
///
/// Cloneable because one failure is fanned out to every listener waiting on
/// the failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("failed to fetch {uri}: {reason}")]
    TransportFailure { uri: String, reason: String },

    #[error("failed to decode {uri}: {reason}")]
    DecodeFailure { uri: String, reason: String },

    #[error("failed to read image dimensions of {uri}: {reason}")]
    MetadataFailure { uri: String, reason: String },

    #[error("local resource does not exist: {path}")]
    NotFoundLocally { path: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("queued work for {uri} was evicted from its look-ahead window")]
    Evicted { uri: String },
}

impl LoadError {
    /// Creates transport failure error.
    #[must_use]
    pub fn transport(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransportFailure {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Creates decode failure error.
    #[must_use]
    pub fn decode(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecodeFailure {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Creates metadata failure error.
    #[must_use]
    pub fn metadata(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetadataFailure {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Creates local not-found error.
    #[must_use]
    pub fn not_found_locally(path: impl Into<String>) -> Self {
        Self::NotFoundLocally { path: path.into() }
    }

    /// Creates invalid request error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Creates evicted error.
    #[must_use]
    pub fn evicted(uri: impl Into<String>) -> Self {
        Self::Evicted { uri: uri.into() }
    }

    /// Returns true if the error is reported before any work is queued.
    #[must_use]
    pub const fn is_synchronous(&self) -> bool {
        matches!(
            self,
            Self::NotFoundLocally { .. } | Self::InvalidRequest { .. }
        )
    }
}

/// Result type for load operations.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_resource() {
        let err = LoadError::transport("https://example.com/a.png", "HTTP 404");
        assert_eq!(
            err.to_string(),
            "failed to fetch https://example.com/a.png: HTTP 404"
        );
    }

    #[test]
    fn test_synchronous_classification() {
        assert!(LoadError::invalid("blank uri").is_synchronous());
        assert!(LoadError::not_found_locally("/nope.png").is_synchronous());
        assert!(!LoadError::decode("u", "bad header").is_synchronous());
        assert!(!LoadError::evicted("u").is_synchronous());
    }
}
