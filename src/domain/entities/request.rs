//! Request value objects handed to the loader.

use std::fmt;

use super::PixelFormat;

/// Upper bounds an image is scaled down towards.
///
/// Missing or zero bounds do not constrain the decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TargetBounds {
    /// Maximum width the caller will display.
    pub width: Option<u32>,
    /// Maximum height the caller will display.
    pub height: Option<u32>,
}

impl TargetBounds {
    /// No scaling: the image is decoded at full size.
    pub const ORIGINAL: Self = Self {
        width: None,
        height: None,
    };

    /// Bounds on both axes.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }

    /// Bounds on the width only.
    #[must_use]
    pub const fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            height: None,
        }
    }

    /// Bounds on the height only.
    #[must_use]
    pub const fn height(height: u32) -> Self {
        Self {
            width: None,
            height: Some(height),
        }
    }
}

/// Scheduling class a request is queued under.
///
/// Declaration order is priority order: earlier variants run first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Currently on screen. Newest request wins.
    #[default]
    Visible,
    /// Look-ahead work that should end up decoded in memory.
    MemoryPrecache,
    /// Look-ahead work that only needs the source file on disk.
    DiskPrecache,
    /// Look-ahead work for a consumer scrolling away from it.
    Deprioritized,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Visible => write!(f, "visible"),
            Self::MemoryPrecache => write!(f, "memory-precache"),
            Self::DiskPrecache => write!(f, "disk-precache"),
            Self::Deprioritized => write!(f, "deprioritized"),
        }
    }
}

/// Identifies one on-screen consumer, e.g. a scrolling list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Sizes of a consumer's look-ahead windows, in positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookAhead {
    /// Positions whose images should be decoded into memory.
    pub memory: usize,
    /// Positions beyond those whose files should only be downloaded.
    pub disk: usize,
}

impl LookAhead {
    /// Creates look-ahead window sizes.
    #[must_use]
    pub const fn new(memory: usize, disk: usize) -> Self {
        Self { memory, disk }
    }

    /// Total number of slots tracked for the consumer; never zero.
    #[must_use]
    pub const fn window(self) -> usize {
        let total = self.memory + self.disk;
        if total == 0 { 1 } else { total }
    }
}

impl Default for LookAhead {
    fn default() -> Self {
        Self::new(4, 8)
    }
}

/// Where in which consumer a piece of work was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// The requesting consumer.
    pub consumer: ConsumerId,
    /// Position inside the consumer, e.g. a list index.
    pub position: usize,
    /// The consumer's look-ahead windows.
    pub look_ahead: LookAhead,
}

impl CacheKey {
    /// Creates a placement key.
    #[must_use]
    pub const fn new(consumer: ConsumerId, position: usize, look_ahead: LookAhead) -> Self {
        Self {
            consumer,
            position,
            look_ahead,
        }
    }
}

/// What a caller wants loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Resource identifier: an http(s) URL, a `file://` URL or an absolute path.
    pub uri: String,
    /// Scaling hint.
    pub bounds: TargetBounds,
    /// Requested pixel layout; `None` uses the loader default.
    pub format: Option<PixelFormat>,
    /// Scheduling class.
    pub priority: Priority,
    /// Consumer placement for look-ahead scheduling.
    pub placement: Option<CacheKey>,
}

impl ResourceRequest {
    /// Creates a visible, full-size request.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            bounds: TargetBounds::ORIGINAL,
            format: None,
            priority: Priority::Visible,
            placement: None,
        }
    }

    /// Sets the scaling hint.
    #[must_use]
    pub const fn with_bounds(mut self, bounds: TargetBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Sets the pixel format.
    #[must_use]
    pub const fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the scheduling class.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the consumer placement.
    #[must_use]
    pub const fn with_placement(mut self, placement: CacheKey) -> Self {
        self.placement = Some(placement);
        self
    }
}

/// Opaque handle identifying one pending request. Passed back to `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub(crate) u64);

impl RequestHandle {
    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}
