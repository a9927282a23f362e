//! TCP endpoint: binds and accepts connections, and owns a per-endpoint
//! network-out buffer and lock discipline so the buffer can be appended
//! to under a lock from any thread via [`TcpEndpoint::send`], while
//! being drained only by the task that owns the endpoint's reactor
//! loop.

use std::net::SocketAddr as StdSocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::transport::EndpointState;

/// Listener half: binds and accepts plain TCP connections.
#[derive(Debug)]
pub struct TcpBindListener {
    inner: TokioTcpListener,
    local_addr: StdSocketAddr,
}

impl TcpBindListener {
    /// Bind to `addr`.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let inner = TokioTcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    /// Local bound address.
    #[must_use]
    pub fn local_addr(&self) -> StdSocketAddr {
        self.local_addr
    }

    /// Accept the next inbound connection.
    pub async fn accept(&self) -> Result<(TcpStream, StdSocketAddr), TransportError> {
        self.inner.accept().await.map_err(TransportError::from)
    }
}

/// A connected TCP endpoint, owning the net-in/net-out buffers.
///
/// `net_out` is wrapped in a `parking_lot::Mutex` so [`send`](Self::send)
/// is safe to call from any thread: it copies into the net-out buffer
/// and requests write interest. The accompanying [`Notify`] stands in
/// for that write-interest request: the draining task (running on the
/// endpoint's own reactor loop) awaits it whenever the buffer is empty
/// instead of busy-polling.
pub struct TcpEndpoint {
    net_out: Arc<Mutex<Vec<u8>>>,
    writable: Arc<Notify>,
    state: Arc<Mutex<EndpointState>>,
    local_addr: StdSocketAddr,
    remote_addr: StdSocketAddr,
}

impl std::fmt::Debug for TcpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpEndpoint")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl TcpEndpoint {
    /// Split `stream` into a driver (owned by the caller's reactor loop,
    /// run via [`TcpEndpoint::drive`]) and a cheaply-cloneable handle used
    /// for cross-thread sends.
    #[must_use]
    pub fn new(stream: TcpStream, local_addr: StdSocketAddr, remote_addr: StdSocketAddr) -> (Self, TcpDriver) {
        let net_out = Arc::new(Mutex::new(Vec::new()));
        let writable = Arc::new(Notify::new());
        let state = Arc::new(Mutex::new(EndpointState::Connected));
        let endpoint = Self {
            net_out: net_out.clone(),
            writable: writable.clone(),
            state: state.clone(),
            local_addr,
            remote_addr,
        };
        let driver = TcpDriver { stream, net_out, writable, state };
        (endpoint, driver)
    }

    /// Local address.
    #[must_use]
    pub fn local_addr(&self) -> StdSocketAddr {
        self.local_addr
    }

    /// Remote address.
    #[must_use]
    pub fn remote_addr(&self) -> StdSocketAddr {
        self.remote_addr
    }

    /// Append `data` to the net-out buffer and wake the draining task.
    /// Safe from any thread.
    pub fn send(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.net_out.lock().extend_from_slice(data);
        self.writable.notify_one();
    }

    /// Request that the connection close once the net-out buffer drains.
    pub fn close(&self) {
        *self.state.lock() = EndpointState::Closing;
        self.writable.notify_one();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EndpointState {
        *self.state.lock()
    }
}

/// The half that actually owns the socket and runs on exactly one
/// reactor loop (I/O callbacks only run on the owning thread). Call
/// [`TcpDriver::drive`] from a task spawned on that loop.
pub struct TcpDriver {
    stream: TcpStream,
    net_out: Arc<Mutex<Vec<u8>>>,
    writable: Arc<Notify>,
    state: Arc<Mutex<EndpointState>>,
}

/// One inbound chunk, handed to the protocol codec layered above this
/// transport.
#[derive(Debug)]
pub enum TcpEvent {
    /// Bytes read from the socket.
    Data(Vec<u8>),
    /// Remote closed cleanly (read returned 0 bytes).
    Eof,
}

impl TcpDriver {
    /// Drive the socket: read into a scratch buffer and yield
    /// [`TcpEvent`]s, while concurrently draining `net_out` whenever it
    /// is non-empty.
    ///
    /// Returns when the peer closes, a close was requested and the
    /// buffer has fully drained, or an I/O error occurs.
    pub async fn drive<F>(mut self, mut on_event: F) -> Result<(), TransportError>
    where
        F: FnMut(TcpEvent),
    {
        let mut scratch = vec![0u8; 64 * 1024];
        loop {
            if *self.state.lock() == EndpointState::Closed {
                return Ok(());
            }

            let pending_out = {
                let mut buf = self.net_out.lock();
                if buf.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut *buf))
                }
            };

            if let Some(chunk) = pending_out {
                if let Err(err) = self.stream.write_all(&chunk).await {
                    *self.state.lock() = EndpointState::Closed;
                    return Err(TransportError::from(err));
                }
                // Loop back around: more may have been queued while we
                // were writing, or a close may now be satisfiable.
                if *self.state.lock() == EndpointState::Closing && self.net_out.lock().is_empty() {
                    let _ = self.stream.shutdown().await;
                    *self.state.lock() = EndpointState::Closed;
                    return Ok(());
                }
                continue;
            }

            if *self.state.lock() == EndpointState::Closing {
                let _ = self.stream.shutdown().await;
                *self.state.lock() = EndpointState::Closed;
                return Ok(());
            }

            tokio::select! {
                _ = self.writable.notified() => {
                    // net_out gained data, or a close was requested; loop
                    // around to drain/close.
                }
                read = self.stream.read(&mut scratch) => {
                    match read {
                        Ok(0) => {
                            *self.state.lock() = EndpointState::Closed;
                            on_event(TcpEvent::Eof);
                            return Ok(());
                        }
                        Ok(n) => on_event(TcpEvent::Data(scratch[..n].to_vec())),
                        Err(err) => {
                            *self.state.lock() = EndpointState::Closed;
                            return Err(TransportError::from(err));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn send_then_drive_writes_bytes_to_peer() {
        let listener = TcpBindListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut buf = vec![0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let (stream, remote) = listener.accept().await.unwrap();
        let local = stream.local_addr().unwrap();
        let (endpoint, driver) = TcpEndpoint::new(stream, local, remote);
        endpoint.send(b"hello");
        endpoint.close();

        driver.drive(|_event| {}).await.unwrap();
        let received = client.await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn eof_is_reported_when_peer_closes() {
        let listener = TcpBindListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"x").await.unwrap();
            stream.shutdown().await.unwrap();
        });

        let (stream, remote) = listener.accept().await.unwrap();
        let local = stream.local_addr().unwrap();
        let (_endpoint, driver) = TcpEndpoint::new(stream, local, remote);

        let mut events = Vec::new();
        driver
            .drive(|event| {
                events.push(matches!(event, TcpEvent::Eof));
            })
            .await
            .unwrap();
        assert_eq!(events, vec![false, true]);
    }
}
