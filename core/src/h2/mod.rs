//! HTTP/2 connection and stream engine: frame codec, HPACK, flow
//! control, stream lifecycle, SETTINGS negotiation, and GOAWAY.

mod conn;
mod flow;
mod frame;
mod hpack;
mod settings;
mod stream;

pub use conn::{Connection, ConnectionEvent};
pub use frame::PREFACE;
pub use settings::Settings;
pub use stream::StreamState;

use thiserror::Error;

/// HTTP/2 protocol failures, carrying enough detail to map onto the
/// explicit RFC 7540 §7 error codes.
#[derive(Debug, Error, Clone)]
pub enum H2Error {
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("stream closed")]
    StreamClosed,
    #[error("flow control error")]
    FlowControlError,
    #[error("frame size error")]
    FrameSizeError,
    #[error("header compression error: {0}")]
    HpackDecodeError(String),
    #[error("header list too large")]
    HeaderListTooLarge,
    #[error("stream refused")]
    RefusedStream,
    #[error("stream canceled")]
    Cancel,
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("invalid connection preface")]
    InvalidPreface,
}

impl H2Error {
    /// RFC 7540 §7 numeric error code, used in RST_STREAM/GOAWAY frames.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::ProtocolError(_) | Self::InvalidPreface => 0x1,
            Self::InternalError(_) => 0x2,
            Self::FlowControlError => 0x3,
            Self::FrameSizeError => 0x6,
            Self::RefusedStream => 0x7,
            Self::Cancel => 0x8,
            Self::HpackDecodeError(_) | Self::HeaderListTooLarge => 0x9,
            Self::StreamClosed => 0x5,
        }
    }
}
