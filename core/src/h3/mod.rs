//! HTTP/3 bridge: drives an `h3` server connection over a QUIC
//! transport, translating its event stream into the same
//! [`crate::contract`] shape HTTP/1.1 and HTTP/2 expose.

mod bridge;

pub use bridge::{serve_connection, RequestBody, RequestStream};

use thiserror::Error;

/// HTTP/3 bridge failures. Transport and QUIC-level errors arrive
/// wrapped from the `h3`/`quinn` crates; the bridge classifies them by
/// [`h3::error::ErrorLevel`] to decide whether one stream or the whole
/// connection is affected.
#[derive(Debug, Error)]
pub enum H3Error {
    #[error("quic connection error: {0}")]
    Connection(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("peer reset the stream")]
    Reset,
    #[error("header compression error: {0}")]
    Qpack(String),
}
