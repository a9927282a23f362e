//! The QUIC engine, built on the `quinn` crate (see DESIGN.md for the
//! choice of `quinn`/`h3`/`h3-quinn` over a vendored HTTP/3 stack).
//!
//! Owns the UDP socket, demuxes incoming datagrams to per-connection
//! QUIC state via connection ID (handled internally by
//! `quinn::Endpoint`), accepts new connections after address
//! validation, and exposes per-connection readiness. ALPN (`h3`) is
//! negotiated during the TLS 1.3 handshake embedded in QUIC's transport
//! parameters.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use quinn::{Endpoint, ServerConfig as QuinnServerConfig};
use rustls::ServerConfig as RustlsServerConfig;

use crate::error::TransportError;
use crate::transport::handshake_failed;
use crate::transport::tls::Keycert;

/// Owns the UDP socket backing a QUIC server and accepts new connections.
#[derive(Debug)]
pub struct QuicEngine {
    endpoint: Endpoint,
}

impl QuicEngine {
    /// Bind a QUIC server on `addr` with `keycert` and ALPN set to `h3`.
    pub fn bind(addr: SocketAddr, keycert: &Keycert) -> Result<Self, TransportError> {
        let (certs, key) = {
            let certs = rustls_pemfile::certs(&mut keycert.cert_pem.as_slice())
                .collect::<Result<Vec<_>, std::io::Error>>()
                .map_err(|e| handshake_failed("parsing certificate chain", e))?;
            let key = rustls_pemfile::private_key(&mut keycert.key_pem.as_slice())
                .map_err(|e| handshake_failed("parsing private key", e))?
                .ok_or_else(|| handshake_failed("parsing private key", "no key found in PEM"))?;
            (certs, key)
        };

        let mut tls_config = RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| handshake_failed("building quic tls config", e))?;
        tls_config.alpn_protocols = vec![b"h3".to_vec()];
        tls_config.max_early_data_size = u32::MAX;

        let quic_tls = QuicServerConfig::try_from(tls_config)
            .map_err(|e| handshake_failed("adapting rustls config for quic", e))?;
        let server_config = QuinnServerConfig::with_crypto(Arc::new(quic_tls));

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| TransportError::Quic(e.to_string()))?;

        Ok(Self { endpoint })
    }

    /// Local bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.endpoint.local_addr().map_err(TransportError::from)
    }

    /// Accept the next QUIC connection. Address validation and version
    /// negotiation are handled inside `quinn::Endpoint` before this
    /// resolves.
    pub async fn accept(&self) -> Option<Result<quinn::Connection, TransportError>> {
        let incoming = self.endpoint.accept().await?;
        match incoming.await {
            Ok(conn) => Some(Ok(conn)),
            Err(e) => Some(Err(TransportError::Quic(e.to_string()))),
        }
    }

    /// Shut the endpoint down, closing all connections.
    pub fn close(&self, reason: &[u8]) {
        self.endpoint.close(0u32.into(), reason);
    }
}
