//! Domain entity definitions.

mod cache_entry;
mod image;
mod request;
mod signature;

pub use cache_entry::CacheEntry;
pub use image::{
    DecodedImage, Dimensions, ImageId, ImageSource, LoadedImage, PixelFormat, estimated_cost,
};
pub use request::{
    CacheKey, ConsumerId, LookAhead, Priority, RequestHandle, ResourceRequest, TargetBounds,
};
pub use signature::DecodeSignature;
