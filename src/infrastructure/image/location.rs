//! Classification of request URIs into remote and local resources.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqwest::Url;

use crate::domain::errors::{LoadError, LoadResult};

/// Where a resource's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocation {
    /// An http(s) URL, fetched by the transport and kept in the disk cache.
    Remote(String),
    /// A file on the local filesystem, read directly and never disk cached.
    Local(PathBuf),
}

impl ResourceLocation {
    /// Classifies `uri`.
    ///
    /// # Errors
    /// Returns `LoadError::InvalidRequest` for blank URIs, unparseable URIs
    /// and unsupported schemes.
    pub fn parse(uri: &str) -> LoadResult<Self> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(LoadError::invalid("blank uri"));
        }
        if Path::new(trimmed).is_absolute() {
            return Ok(Self::Local(PathBuf::from(trimmed)));
        }

        let url = Url::parse(trimmed).map_err(|e| LoadError::invalid(format!("{uri}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Remote(uri.to_string())),
            "file" => url
                .to_file_path()
                .map(Self::Local)
                .map_err(|()| LoadError::invalid(format!("{uri}: not a local path"))),
            scheme => Err(LoadError::invalid(format!("unsupported scheme '{scheme}'"))),
        }
    }

    /// Returns true for local files.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Checks that a local file exists. Remote resources always pass.
    ///
    /// # Errors
    /// Returns `LoadError::NotFoundLocally` if the file is missing.
    pub fn ensure_exists(&self) -> LoadResult<()> {
        match self {
            Self::Local(path) if !path.is_file() => {
                Err(LoadError::not_found_locally(path.display().to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Reads a local file.
///
/// # Errors
/// Returns `LoadError::NotFoundLocally` if the file is missing and
/// `LoadError::TransportFailure` for other read errors.
pub fn read_local(uri: &str, path: &Path) -> LoadResult<Bytes> {
    match std::fs::read(path) {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LoadError::not_found_locally(path.display().to_string()))
        }
        Err(e) => Err(LoadError::transport(uri, e.to_string())),
    }
}
