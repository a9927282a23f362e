//! Service lifecycle on top of [`crate::listener`]: binds one or more
//! listeners to a shared [`ReactorPool`] and, on an optional shutdown
//! signal, stops accepting and waits for in-flight connections to
//! drain before returning.
//!
//! Graceful shutdown is tracked with an atomic in-flight counter and a
//! `Notify` rather than a single acceptor's future, since connections
//! here are spread across multiple listeners and reactor loops rather
//! than owned by one server task.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::Error;
use crate::listener::{self, Conn, Listener};
use crate::reactor::ReactorPool;
use crate::transport::Accepted;

/// Owns the listeners and reactor pool for one running service.
pub struct Server {
    listeners: Vec<Listener>,
    pool: Arc<ReactorPool>,
}

impl Server {
    #[must_use]
    pub fn new(listeners: Vec<Listener>, pool: Arc<ReactorPool>) -> Self {
        Self { listeners, pool }
    }

    /// The reactor pool backing this service, for callers that need to
    /// assign out-of-band work (e.g. a timer) to the same loops.
    #[must_use]
    pub fn pool(&self) -> &Arc<ReactorPool> {
        &self.pool
    }

    /// Serve until the process is killed; never returns under normal
    /// operation.
    pub async fn serve<H, Fut>(self, on_accept: H) -> Result<(), Error>
    where
        H: Fn(Conn, Accepted) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = Arc::new(Notify::new());
        listener::join(self.listeners, self.pool, stop, on_accept).await;
        Ok(())
    }

    /// Serve until `signal` resolves, then stop accepting new
    /// connections and wait for every in-flight connection spawned via
    /// `on_accept` to finish before returning.
    pub async fn serve_with_graceful_shutdown<H, Fut, G>(self, on_accept: H, signal: G) -> Result<(), Error>
    where
        H: Fn(Conn, Accepted) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        G: Future<Output = ()> + Send + 'static,
    {
        let active = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());

        let counted = {
            let active = active.clone();
            let drained = drained.clone();
            move |conn: Conn, accepted: Accepted| {
                let on_accept = on_accept.clone();
                let active = active.clone();
                let drained = drained.clone();
                async move {
                    active.fetch_add(1, Ordering::SeqCst);
                    on_accept(conn, accepted).await;
                    if active.fetch_sub(1, Ordering::SeqCst) == 1 {
                        drained.notify_waiters();
                    }
                }
            }
        };

        let pool = self.pool;
        let accept_task = tokio::spawn(listener::join(self.listeners, pool, stop.clone(), counted));

        signal.await;
        tracing::info!("shutdown signal received, draining in-flight connections");
        stop.notify_waiters();
        let _ = accept_task.await;

        loop {
            let notified = drained.notified();
            if active.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        tracing::info!("all connections drained, shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerConfig;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicBool;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn graceful_shutdown_drains_in_flight_connections_before_returning() {
        let config =
            ListenerConfig { bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(), ..Default::default() };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr();
        let pool = Arc::new(ReactorPool::new(Some(1)));
        let server = Server::new(vec![listener], pool);

        let handler_entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let entered = handler_entered.clone();
        let release_wait = release.clone();
        let serve = tokio::spawn(server.serve_with_graceful_shutdown(
            move |_conn: Conn, _accepted: Accepted| {
                let entered = entered.clone();
                let release_wait = release_wait.clone();
                async move {
                    entered.store(true, Ordering::SeqCst);
                    release_wait.notified().await;
                }
            },
            async move {
                let _ = shutdown_rx.await;
            },
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"x").await.unwrap();

        while !handler_entered.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!serve.is_finished(), "server returned before the in-flight connection drained");

        release.notify_waiters();
        serve.await.unwrap().unwrap();
    }
}
