//! Image request DTOs.

use crate::domain::entities::{LoadedImage, PixelFormat, Priority, RequestHandle, TargetBounds};
use crate::domain::errors::LoadError;

/// What a listener wants out of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Receive the decoded image.
    Deliver,
    /// Leave the decoded image in the memory cache.
    PrecacheMemory,
    /// Leave the source file in the disk cache.
    PrecacheDisk,
}

impl Intent {
    /// Returns true if the listener needs a decode.
    #[must_use]
    pub const fn needs_decode(self) -> bool {
        !matches!(self, Self::PrecacheDisk)
    }

    /// Returns true if results are sent to the caller.
    #[must_use]
    pub const fn delivers(self) -> bool {
        matches!(self, Self::Deliver)
    }
}

/// Per-listener parameters recorded with a pending operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerParams {
    /// Scaling hint.
    pub bounds: TargetBounds,
    /// Requested pixel layout.
    pub format: Option<PixelFormat>,
    /// What the listener wants.
    pub intent: Intent,
    /// Scheduling class it asked for.
    pub priority: Priority,
}

impl ListenerParams {
    /// Creates parameters for a delivering request.
    #[must_use]
    pub const fn deliver(bounds: TargetBounds, format: Option<PixelFormat>, priority: Priority) -> Self {
        Self {
            bounds,
            format,
            intent: Intent::Deliver,
            priority,
        }
    }

    /// Creates parameters for a precache request.
    #[must_use]
    pub const fn precache(bounds: TargetBounds, format: Option<PixelFormat>, intent: Intent) -> Self {
        let priority = match intent {
            Intent::PrecacheDisk => Priority::DiskPrecache,
            Intent::Deliver | Intent::PrecacheMemory => Priority::MemoryPrecache,
        };
        Self {
            bounds,
            format,
            intent,
            priority,
        }
    }
}

/// Result of an asynchronous request, sent on the loader's event channel.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// Handle returned when the request was queued.
    pub handle: RequestHandle,
    /// Resource identifier.
    pub uri: String,
    /// The image, or why it could not be produced.
    pub result: Result<LoadedImage, LoadError>,
}

/// Immediate answer to a request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Served synchronously from the memory cache.
    Ready(LoadedImage),
    /// Queued; the result arrives as an [`ImageLoadedEvent`] with this handle.
    Queued(RequestHandle),
}

impl RequestOutcome {
    /// Returns the handle of a queued request.
    #[must_use]
    pub const fn handle(&self) -> Option<RequestHandle> {
        match self {
            Self::Ready(_) => None,
            Self::Queued(handle) => Some(*handle),
        }
    }
}
