mod decoder_port;
mod storage_port;
mod transport_port;

pub use decoder_port::ImageDecoderPort;
pub use storage_port::{ByteStore, CacheError, CacheResult, MetadataStore};
pub use transport_port::Transport;

#[cfg(test)]
pub mod mocks {
    pub use super::decoder_port::MockImageDecoderPort;
    pub use super::transport_port::MockTransport;
}
