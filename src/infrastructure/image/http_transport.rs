//! HTTP transport backed by reqwest.

use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::domain::errors::{LoadError, LoadResult};
use crate::domain::ports::Transport;

/// Fetches remote resources over HTTP(S).
///
/// Requests run on the given tokio runtime; `fetch` blocks the calling
/// worker thread until the body is read. It must not be called from inside
/// the runtime itself.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    handle: Handle,
}

impl HttpTransport {
    /// Creates a transport.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(handle: Handle, timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, handle })
    }

    async fn fetch_async(&self, uri: &str) -> LoadResult<Bytes> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| LoadError::transport(uri, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::transport(uri, format!("HTTP {status}")));
        }

        response
            .bytes()
            .await
            .map_err(|e| LoadError::transport(uri, format!("Failed to read body: {e}")))
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, uri: &str) -> LoadResult<Bytes> {
        trace!(uri, "Downloading");
        let result = self.handle.block_on(self.fetch_async(uri));
        match &result {
            Ok(bytes) => debug!(uri, size = bytes.len(), "Downloaded"),
            Err(e) => debug!(uri, error = %e, "Download failed"),
        }
        result
    }
}
