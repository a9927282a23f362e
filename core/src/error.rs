//! Error types and handling for Junction.
//!
//! Each protocol layer defines its own leaf error type with `thiserror`.
//! The top-level [`Error`] wraps all of them plus I/O errors. Transport
//! errors never recover, protocol errors never recover at connection
//! scope, stream errors recover at connection scope, application errors
//! recover at connection scope.

use std::fmt::{self, Display, Formatter};
use std::io;

use crate::auth::AuthError;
use crate::h1::H1Error;
use crate::h2::H2Error;
#[cfg(feature = "http3")]
use crate::h3::H3Error;
use crate::ws::WsError;

/// A boxed error type used only at the application/handler boundary.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type returned by Junction's public operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-layer failure: socket closed, I/O failure, TLS handshake
    /// failure. Never recoverable; the connection is torn down.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// HTTP/1.1 framing/parsing failure.
    #[error("http/1.1 error: {0}")]
    Http1(#[from] H1Error),

    /// HTTP/2 framing, HPACK, or state-machine failure.
    #[error("http/2 error: {0}")]
    Http2(#[from] H2Error),

    /// HTTP/3 bridge failure.
    #[cfg(feature = "http3")]
    #[error("http/3 error: {0}")]
    Http3(#[from] H3Error),

    /// WebSocket framing or handshake failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Authentication pipeline failure (client challenge/response, or
    /// the SMTP streaming auth bridge).
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Raw I/O error not otherwise classified.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An application handler returned an error.
    #[error("application error: {0}")]
    Application(#[source] BoxedError),
}

impl Error {
    /// Wrap an arbitrary application error raised by handler code.
    pub fn application(err: impl Into<BoxedError>) -> Self {
        Self::Application(err.into())
    }
}

/// Transport-layer error: TCP/TLS/QUIC accept and handshake failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ClosedByPeer,
    /// The local side aborted the connection.
    #[error("connection aborted")]
    Aborted,
    /// TLS or DTLS/QUIC-TLS handshake failed.
    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// QUIC-specific transport failure.
    #[error("quic error: {0}")]
    Quic(String),
}

/// Error-taxonomy category, used by the connection driver to decide
/// recovery scope: whether the connection must close, the stream alone
/// can be reset, or the failure is reportable to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport errors. Terminal for the connection.
    Transport,
    /// Protocol errors. Terminal for the connection.
    Protocol,
    /// Stream errors (H2/H3 only). Local to one stream.
    Stream,
    /// Application errors. Local to one stream/response.
    Application,
    /// Timeouts. Mapped to stream cancellation or connection idle close
    /// depending on scope.
    Timeout,
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Stream => "stream",
            Self::Application => "application",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}
