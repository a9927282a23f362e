//! TLS integration for TCP endpoints, built on `rustls` + `tokio-rustls`.
//!
//! ALPN negotiation during the handshake is how HTTP/1.1 vs. HTTP/2 is
//! selected on an encrypted connection (ALPN set `h2`, `http/1.1`,
//! optional `http/1.0`).

use std::io;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsServerConfig;
use tokio::net::TcpStream;
use tokio_rustls::{server::TlsStream, TlsAcceptor};

use crate::error::TransportError;
use crate::transport::handshake_failed;

/// PEM-encoded private key and certificate chain.
#[derive(Clone, Debug, Default)]
pub struct Keycert {
    /// PEM certificate chain bytes.
    pub cert_pem: Vec<u8>,
    /// PEM private key bytes.
    pub key_pem: Vec<u8>,
}

impl Keycert {
    /// Build from in-memory PEM bytes.
    #[must_use]
    pub fn new(cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Self {
        Self { cert_pem, key_pem }
    }

    fn parse(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
        let certs = rustls_pemfile::certs(&mut self.cert_pem.as_slice())
            .collect::<Result<Vec<_>, io::Error>>()
            .map_err(|e| handshake_failed("parsing certificate chain", e))?;
        let key = rustls_pemfile::private_key(&mut self.key_pem.as_slice())
            .map_err(|e| handshake_failed("parsing private key", e))?
            .ok_or_else(|| handshake_failed("parsing private key", "no key found in PEM"))?;
        Ok((certs, key))
    }
}

/// Build a TLS acceptor for a server endpoint, with `alpn` advertised in
/// preference order.
pub fn build_acceptor(keycert: &Keycert, alpn: &[&str]) -> Result<TlsAcceptor, TransportError> {
    let (certs, key) = keycert.parse()?;
    let mut config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| handshake_failed("building rustls server config", e))?;
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Drive the handshake on `stream`; returns the negotiated ALPN protocol
/// (if any) alongside the established TLS stream.
pub async fn accept(acceptor: &TlsAcceptor, stream: TcpStream) -> Result<(TlsStream<TcpStream>, Option<String>), TransportError> {
    let tls_stream = acceptor.accept(stream).await.map_err(|e| handshake_failed("tls accept", e))?;
    let negotiated = tls_stream
        .get_ref()
        .1
        .alpn_protocol()
        .map(|p| String::from_utf8_lossy(p).into_owned());
    Ok((tls_stream, negotiated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keycert_parse_rejects_garbage() {
        let keycert = Keycert::new(b"not a cert".to_vec(), b"not a key".to_vec());
        assert!(keycert.parse().is_err());
    }
}
