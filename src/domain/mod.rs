//! Domain layer with core value types, errors, port definitions and pure calculations.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Pure domain calculations.
pub mod services;

pub use entities::{DecodeSignature, LoadedImage, RequestHandle, ResourceRequest};
pub use errors::{LoadError, LoadResult};
pub use ports::{ByteStore, ImageDecoderPort, MetadataStore, Transport};
