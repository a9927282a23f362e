//! Transport layer: TCP endpoints, UDP endpoints, and the QUIC engine,
//! each integrating TLS and exposing per-endpoint I/O buffers.

pub mod tcp;
pub mod udp;

#[cfg(feature = "rustls")]
pub mod tls;

#[cfg(feature = "http3")]
pub mod quic;

use std::net::SocketAddr;

use http::uri::Scheme;

use crate::error::TransportError;

/// Negotiated protocol version for a connection, surfaced from the
/// transport layer up to the protocol codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedVersion {
    /// HTTP/1.0 or HTTP/1.1, not yet distinguished.
    Http1,
    /// HTTP/2, negotiated via ALPN or the h2c/prior-knowledge upgrade.
    Http2,
    /// HTTP/3 over QUIC.
    Http3,
}

/// Metadata captured at accept time: addresses, negotiated ALPN/version,
/// and the scheme the connection will be served under.
#[derive(Debug, Clone)]
pub struct Accepted {
    /// Local bound address.
    pub local_addr: SocketAddr,
    /// Remote peer address.
    pub remote_addr: SocketAddr,
    /// `http` or `https`, depending on whether TLS terminated here.
    pub scheme: Scheme,
    /// Version negotiated during the handshake (ALPN) or defaulted to
    /// HTTP/1.1 for cleartext connections pending an Upgrade.
    pub version: NegotiatedVersion,
}

/// Lifecycle state of a TCP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Not yet connected (client-side only).
    Unconnected,
    /// `connect()` issued, awaiting `connectable` readiness.
    Connecting,
    /// TCP connected, plaintext.
    Connected,
    /// TLS handshake in progress.
    TlsHandshaking,
    /// Handshake complete (or no TLS configured); ready for application
    /// data.
    Established,
    /// Close requested; draining the net-out buffer.
    Closing,
    /// Fully closed; no further I/O will occur.
    Closed,
}

/// Convert an I/O error observed during a handshake into a
/// [`TransportError`] with context. TLS errors abort the connection
/// with a best-effort close-notify.
pub fn handshake_failed(context: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::TlsHandshake(format!("{context}: {err}"))
}
