//! Listeners & service lifecycle: bind addresses, accept loops,
//! graceful shutdown, and round-robin worker-loop assignment.
//!
//! A [`Listener`] binds and accepts, [`run`]/[`join`] drive one or more
//! listeners' accept loops feeding a shared [`ReactorPool`], and
//! [`crate::server::Server`] layers graceful shutdown on top.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::error::Error;
use crate::reactor::ReactorPool;
use crate::transport::tcp::TcpBindListener;
use crate::transport::{Accepted, NegotiatedVersion};

#[cfg(feature = "rustls")]
use crate::transport::tls::{self, Keycert};
#[cfg(feature = "rustls")]
use tokio_rustls::{server::TlsStream, TlsAcceptor};

/// Worker-pool sizing. `None` defaults to the number of available
/// cores via `std::thread::available_parallelism()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReactorPoolConfig {
    pub worker_count: Option<usize>,
}

impl ReactorPoolConfig {
    #[must_use]
    pub fn build(&self) -> ReactorPool {
        ReactorPool::new(self.worker_count)
    }
}

/// Bind configuration for one listener: address, optional TLS material,
/// and the ALPN set to negotiate over it.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    /// `None` for cleartext; `Some` to terminate TLS 1.2+ here.
    #[cfg(feature = "rustls")]
    pub tls: Option<Keycert>,
    /// ALPN protocols to advertise, in preference order (e.g. `["h2",
    /// "http/1.1"]`). Ignored for cleartext listeners.
    pub alpn: Vec<String>,
}

impl Default for ListenerConfig {
    /// Binds an ephemeral port on loopback; callers override `bind_addr`
    /// for anything real.
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            #[cfg(feature = "rustls")]
            tls: None,
            alpn: Vec::new(),
        }
    }
}

/// QUIC/HTTP/3 transport parameters (RFC 9114/9000 values the core
/// exposes as configuration rather than hardcoding).
#[cfg(feature = "http3")]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Http3Settings {
    pub max_idle_timeout_secs: u32,
    pub initial_max_data: u64,
    pub initial_max_streams_bidi: u64,
}

#[cfg(feature = "http3")]
impl Default for Http3Settings {
    fn default() -> Self {
        Self { max_idle_timeout_secs: 30, initial_max_data: 10 << 20, initial_max_streams_bidi: 100 }
    }
}

/// A connected stream from either a plaintext or a TLS-terminated
/// listener, unified so accept-loop callers don't branch on which.
pub enum Conn {
    Plain(TcpStream),
    #[cfg(feature = "rustls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Conn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "rustls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "rustls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "rustls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "rustls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A bound listener: plain TCP, or TCP with TLS termination.
pub struct Listener {
    inner: TcpBindListener,
    local_addr: SocketAddr,
    #[cfg(feature = "rustls")]
    acceptor: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind per `config`. TLS is set up eagerly so a misconfigured
    /// certificate fails at bind time, not on the first accept.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, Error> {
        let inner = TcpBindListener::bind(config.bind_addr).await?;
        let local_addr = inner.local_addr();

        #[cfg(feature = "rustls")]
        let acceptor = match &config.tls {
            Some(keycert) => {
                let alpn: Vec<&str> = config.alpn.iter().map(String::as_str).collect();
                Some(tls::build_acceptor(keycert, &alpn)?)
            }
            None => None,
        };

        Ok(Self {
            inner,
            local_addr,
            #[cfg(feature = "rustls")]
            acceptor,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and, if configured, TLS-handshake the next connection,
    /// returning it alongside the metadata the protocol codecs need to
    /// pick HTTP/1.1 vs HTTP/2.
    async fn accept_one(&self) -> Result<(Conn, Accepted), Error> {
        let (stream, remote_addr) = self.inner.accept().await?;

        #[cfg(feature = "rustls")]
        if let Some(acceptor) = &self.acceptor {
            let (tls_stream, negotiated) = tls::accept(acceptor, stream).await?;
            let version = match negotiated.as_deref() {
                Some("h2") => NegotiatedVersion::Http2,
                _ => NegotiatedVersion::Http1,
            };
            let accepted = Accepted {
                local_addr: self.local_addr,
                remote_addr,
                scheme: http::uri::Scheme::HTTPS,
                version,
            };
            return Ok((Conn::Tls(Box::new(tls_stream)), accepted));
        }

        let accepted = Accepted {
            local_addr: self.local_addr,
            remote_addr,
            scheme: http::uri::Scheme::HTTP,
            version: NegotiatedVersion::Http1,
        };
        Ok((Conn::Plain(stream), accepted))
    }
}

/// Drive one listener's accept loop, assigning each accepted connection
/// to the next [`ReactorPool`] loop in round-robin order and handing it
/// to `on_accept` there. Individual accept failures are logged and do
/// not stop the loop; `stop` being notified ends it (new connections
/// already dispatched to `on_accept` are left to drain on their own).
pub async fn run<H, Fut>(
    listener: Listener,
    pool: std::sync::Arc<ReactorPool>,
    stop: std::sync::Arc<tokio::sync::Notify>,
    on_accept: H,
) where
    H: Fn(Conn, Accepted) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            result = listener.accept_one() => {
                match result {
                    Ok((conn, accepted)) => {
                        tracing::debug!(remote = %accepted.remote_addr, version = ?accepted.version, "accepted connection");
                        let reactor = pool.assign();
                        let on_accept = on_accept.clone();
                        reactor.spawn_owned(async move {
                            on_accept(conn, accepted).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed, continuing");
                    }
                }
            }
            () = stop.notified() => {
                tracing::debug!(local = %listener.local_addr(), "listener stopping");
                break;
            }
        }
    }
}

/// Join several listeners (e.g. one plaintext, one TLS) behind a single
/// accept loop sharing one [`ReactorPool`] and one `on_accept` handler.
pub async fn join<H, Fut>(
    listeners: Vec<Listener>,
    pool: std::sync::Arc<ReactorPool>,
    stop: std::sync::Arc<tokio::sync::Notify>,
    on_accept: H,
) where
    H: Fn(Conn, Accepted) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut tasks = Vec::with_capacity(listeners.len());
    for listener in listeners {
        let pool = pool.clone();
        let stop = stop.clone();
        let on_accept = on_accept.clone();
        tasks.push(tokio::spawn(run(listener, pool, stop, on_accept)));
    }
    for task in tasks {
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn plain_listener_accepts_and_reports_http1() {
        let config = ListenerConfig { bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)), ..Default::default() };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let (_conn, accepted) = listener.accept_one().await.unwrap();
        assert_eq!(accepted.version, NegotiatedVersion::Http1);
        assert_eq!(accepted.scheme, http::uri::Scheme::HTTP);
        client.await.unwrap();
    }
}
