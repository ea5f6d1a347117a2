//! Network, metadata and decode phases of a load, with single-flight
//! deduplication and result fan-out.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::tracker::{CancelOutcome, OperationTracker};
use crate::application::dto::{ImageLoadedEvent, ListenerParams};
use crate::domain::entities::{DecodeSignature, Dimensions, LoadedImage, PixelFormat, RequestHandle};
use crate::domain::errors::{LoadError, LoadResult};

/// Identifies one pending operation across all phases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKey {
    /// Download of a remote resource.
    Network(String),
    /// Dimension probe of a resource.
    Metadata(String),
    /// Decode of one variant.
    Decode(DecodeSignature),
}

impl OperationKey {
    /// Resource identifier the operation works on.
    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::Network(uri) | Self::Metadata(uri) => uri,
            Self::Decode(signature) => &signature.uri,
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(uri) => write!(f, "network:{uri}"),
            Self::Metadata(uri) => write!(f, "metadata:{uri}"),
            Self::Decode(signature) => write!(f, "decode:{signature}"),
        }
    }
}

/// Where a listener was attached by [`OperationCoordinator::queue_if_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    /// Nothing pending; the caller must start work.
    NotQueued,
    /// Joined a pending download.
    Network,
    /// Joined a pending dimension probe.
    Metadata,
    /// Joined a pending decode.
    Decode(DecodeSignature),
}

impl QueueStatus {
    /// Key of the joined operation.
    #[must_use]
    pub fn key(&self, uri: &str) -> Option<OperationKey> {
        match self {
            Self::NotQueued => None,
            Self::Network => Some(OperationKey::Network(uri.to_string())),
            Self::Metadata => Some(OperationKey::Metadata(uri.to_string())),
            Self::Decode(signature) => Some(OperationKey::Decode(signature.clone())),
        }
    }
}

/// Pending operations per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Downloads.
    pub network: usize,
    /// Dimension probes.
    pub metadata: usize,
    /// Decodes.
    pub decode: usize,
    /// Listeners across all phases.
    pub listeners: usize,
}

impl fmt::Display for PendingCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} downloads, {} probes, {} decodes pending for {} listeners",
            self.network, self.metadata, self.decode, self.listeners
        )
    }
}

type UriTracker = OperationTracker<String, RequestHandle, ListenerParams>;
type DecodeTracker = OperationTracker<DecodeSignature, RequestHandle, ListenerParams>;

/// Owns the three phase trackers and delivers results to listeners.
///
/// A listener moves network, then metadata, then decode; transfers between
/// phases are atomic. Only listeners with a delivering intent produce events.
#[derive(Debug)]
pub struct OperationCoordinator {
    network: UriTracker,
    metadata: UriTracker,
    decode: DecodeTracker,
    events: mpsc::UnboundedSender<ImageLoadedEvent>,
    default_format: Option<PixelFormat>,
}

impl OperationCoordinator {
    /// Creates a coordinator delivering results on `events`.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<ImageLoadedEvent>, default_format: Option<PixelFormat>) -> Self {
        Self {
            network: OperationTracker::new("network"),
            metadata: OperationTracker::new("metadata"),
            decode: OperationTracker::new("decode"),
            events,
            default_format,
        }
    }

    /// Decode signature a listener needs for an image of `dimensions`, or
    /// `None` if it needs no decode.
    #[must_use]
    pub fn signature_for(&self, uri: &str, dimensions: Dimensions, params: &ListenerParams) -> Option<DecodeSignature> {
        params.intent.needs_decode().then(|| {
            DecodeSignature::for_bounds(
                uri,
                dimensions,
                params.bounds,
                params.format.or(self.default_format),
            )
        })
    }

    /// Attaches the listener to the first pending operation that will
    /// satisfy it: a download, a probe, then a decode of the signature
    /// implied by `dimensions`.
    pub fn queue_if_pending(
        &self,
        uri: &str,
        handle: RequestHandle,
        params: ListenerParams,
        dimensions: Option<Dimensions>,
    ) -> QueueStatus {
        let key = uri.to_string();
        let Err(params) = self.network.join(&key, handle, params) else {
            return QueueStatus::Network;
        };
        let Err(params) = self.metadata.join(&key, handle, params) else {
            return QueueStatus::Metadata;
        };
        let Some(signature) = dimensions.and_then(|dims| self.signature_for(uri, dims, &params)) else {
            return QueueStatus::NotQueued;
        };
        match self.decode.join(&signature, handle, params) {
            Ok(()) => QueueStatus::Decode(signature),
            Err(_) => QueueStatus::NotQueued,
        }
    }

    /// Registers a listener on a download. Returns true if the caller must
    /// start it.
    pub fn start_network(&self, uri: &str, handle: RequestHandle, params: ListenerParams) -> bool {
        self.network.register(uri.to_string(), handle, params)
    }

    /// Registers a listener on a dimension probe. Returns true if the caller
    /// must start it.
    pub fn start_metadata(&self, uri: &str, handle: RequestHandle, params: ListenerParams) -> bool {
        self.metadata.register(uri.to_string(), handle, params)
    }

    /// Registers a listener on a decode. Returns true if the caller must
    /// start it.
    pub fn start_decode(&self, signature: DecodeSignature, handle: RequestHandle, params: ListenerParams) -> bool {
        self.decode.register(signature, handle, params)
    }

    /// Moves a finished download's listeners to the probe phase. Returns
    /// true if the caller must start the probe.
    pub fn on_download_complete(&self, uri: &str) -> bool {
        let key = uri.to_string();
        let outcome = self
            .network
            .transfer_to(&key, &self.metadata, |_, params| Ok((key.clone(), params)));
        debug!(uri, listeners = outcome.moved, "Download complete");
        !outcome.created.is_empty()
    }

    /// Fails every listener of a download.
    pub fn on_download_failed(&self, uri: &str, error: &LoadError) -> usize {
        let listeners = self.network.remove_all(&uri.to_string());
        warn!(uri, error = %error, listeners = listeners.len(), "Download failed");
        self.fail(uri, listeners, error)
    }

    /// Moves a finished probe's listeners to their decode signatures.
    ///
    /// Listeners needing no decode are done and dropped. Returns the
    /// signatures the caller must start decoding, deduplicated.
    pub fn on_metadata_complete(&self, uri: &str, dimensions: Dimensions) -> Vec<DecodeSignature> {
        let outcome = self
            .metadata
            .transfer_to(&uri.to_string(), &self.decode, |_, params| {
                match self.signature_for(uri, dimensions, &params) {
                    Some(signature) => Ok((signature, params)),
                    None => Err(params),
                }
            });
        debug!(
            uri,
            %dimensions,
            decodes = outcome.created.len(),
            satisfied = outcome.dropped.len(),
            "Metadata complete"
        );
        outcome.created
    }

    /// Fails every listener of a probe.
    pub fn on_metadata_failed(&self, uri: &str, error: &LoadError) -> usize {
        let listeners = self.metadata.remove_all(&uri.to_string());
        warn!(uri, error = %error, listeners = listeners.len(), "Metadata probe failed");
        self.fail(uri, listeners, error)
    }

    /// Delivers a decode result to every listener of `signature`, in
    /// registration order. Returns the number of listeners.
    pub fn on_decode_complete(&self, signature: &DecodeSignature, result: &LoadResult<LoadedImage>) -> usize {
        let listeners = self.decode.remove_all(signature);
        let count = listeners.len();
        for (handle, params) in listeners {
            self.deliver(handle, &params, &signature.uri, result.clone());
        }
        trace!(signature = %signature, listeners = count, ok = result.is_ok(), "Decode complete");
        count
    }

    /// Drops an operation that will never run, failing its listeners.
    pub fn abandon(&self, key: &OperationKey, error: &LoadError) -> usize {
        let listeners = match key {
            OperationKey::Network(uri) => self.network.remove_all(uri),
            OperationKey::Metadata(uri) => self.metadata.remove_all(uri),
            OperationKey::Decode(signature) => self.decode.remove_all(signature),
        };
        debug!(operation = %key, error = %error, listeners = listeners.len(), "Operation abandoned");
        self.fail(key.uri(), listeners, error)
    }

    /// Removes a listener from whichever phase holds it.
    pub fn cancel(&self, handle: RequestHandle) -> Option<CancelOutcome<OperationKey>> {
        if let Some(outcome) = self.network.cancel(&handle) {
            return Some(CancelOutcome {
                key: OperationKey::Network(outcome.key),
                key_removed: outcome.key_removed,
            });
        }
        if let Some(outcome) = self.metadata.cancel(&handle) {
            return Some(CancelOutcome {
                key: OperationKey::Metadata(outcome.key),
                key_removed: outcome.key_removed,
            });
        }
        self.decode.cancel(&handle).map(|outcome| CancelOutcome {
            key: OperationKey::Decode(outcome.key),
            key_removed: outcome.key_removed,
        })
    }

    /// Returns true if `key` is pending.
    #[must_use]
    pub fn is_pending(&self, key: &OperationKey) -> bool {
        match key {
            OperationKey::Network(uri) => self.network.has_pending(uri),
            OperationKey::Metadata(uri) => self.metadata.has_pending(uri),
            OperationKey::Decode(signature) => self.decode.has_pending(signature),
        }
    }

    /// Returns pending counts.
    #[must_use]
    pub fn pending(&self) -> PendingCounts {
        PendingCounts {
            network: self.network.len(),
            metadata: self.metadata.len(),
            decode: self.decode.len(),
            listeners: self.network.listener_count()
                + self.metadata.listener_count()
                + self.decode.listener_count(),
        }
    }

    fn fail(&self, uri: &str, listeners: Vec<(RequestHandle, ListenerParams)>, error: &LoadError) -> usize {
        let count = listeners.len();
        for (handle, params) in listeners {
            self.deliver(handle, &params, uri, Err(error.clone()));
        }
        count
    }

    fn deliver(&self, handle: RequestHandle, params: &ListenerParams, uri: &str, result: LoadResult<LoadedImage>) {
        if !params.intent.delivers() {
            return;
        }
        let event = ImageLoadedEvent {
            handle,
            uri: uri.to_string(),
            result,
        };
        if self.events.send(event).is_err() {
            trace!(%handle, "Event receiver dropped");
        }
    }
}
