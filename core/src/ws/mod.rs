//! WebSocket framing and connection state (RFC 6455).

mod conn;
mod frame;

pub use conn::{Connection, ConnectionEvent, Role};
pub use frame::{Frame, Opcode};

use thiserror::Error;

/// WebSocket protocol failures. Each variant maps to an RFC 6455 §7.4
/// close code via [`WsError::close_code`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WsError {
    #[error("malformed frame: {0}")]
    ProtocolError(String),
    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,
    #[error("payload exceeds the configured maximum message size")]
    MessageTooLarge,
    #[error("received a masked frame from the server or an unmasked frame from the client")]
    MaskingViolation,
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,
    #[error("non-utf8 text frame")]
    InvalidUtf8,
    #[error("handshake is missing a required header")]
    HandshakeIncomplete,
}

impl WsError {
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidUtf8 => 1007,
            Self::ProtocolError(_)
            | Self::ControlFrameTooLarge
            | Self::MaskingViolation
            | Self::UnexpectedContinuation
            | Self::HandshakeIncomplete => 1002,
            Self::MessageTooLarge => 1009,
        }
    }
}

/// Compute `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`
/// (RFC 6455 §1.3): base64(SHA1(key + the RFC 6455 GUID)).
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    use base64::Engine;
    use sha1::{Digest, Sha1};

    const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc6455_handshake_example() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
