//! Drives one HTTP/3 connection: accepts request streams, translates
//! each into the same headers/body/response shape HTTP/1.1 and HTTP/2
//! expose, and pumps buffered response writes past QUIC flow control.

use std::collections::VecDeque;
use std::future::Future;

use bytes::{Buf, Bytes};
use h3::error::ErrorLevel;
use h3::quic;
use h3::server::RequestStream as H3Stream;
use tracing::{debug, warn};

use crate::contract::ResponseSink;
use crate::h3::H3Error;
use crate::headers::HeaderList;

/// Translate an `h3`/`http` request head into this crate's header
/// representation, synthesizing the pseudo-headers HTTP/1.1 carries in
/// the request line instead.
fn request_headers<T>(request: &http::Request<T>) -> HeaderList {
    let mut headers = HeaderList::new();
    headers.push(":method", request.method().as_str());
    let path = request.uri().path_and_query().map_or("/", |pq| pq.as_str());
    headers.push(":path", path);
    headers.push(":scheme", request.uri().scheme_str().unwrap_or("https"));
    if let Some(authority) = request.uri().authority() {
        headers.push(":authority", authority.as_str());
    }
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            headers.push(name.as_str(), value);
        }
    }
    headers
}

/// The request half of one HTTP/3 request stream: pulls body chunks off
/// the QUIC receive side, the same `Data`-event role `h2::conn` fills
/// for HTTP/2 streams, but pulled by the handler instead of polled out
/// of a connection-wide event queue.
pub struct RequestBody<S>
where
    S: quic::RecvStream,
{
    inner: H3Stream<S, Bytes>,
    finished: bool,
}

impl<S> RequestBody<S>
where
    S: quic::RecvStream,
{
    fn new(inner: H3Stream<S, Bytes>) -> Self {
        Self { inner, finished: false }
    }

    /// Read the next chunk of request body, or `None` once the peer has
    /// sent `FIN`. Calling this again after `None` keeps returning
    /// `None` rather than re-polling a finished stream.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, H3Error> {
        if self.finished {
            return Ok(None);
        }
        match self.inner.recv_data().await {
            Ok(Some(mut buf)) => Ok(Some(buf.copy_to_bytes(buf.remaining()))),
            Ok(None) => {
                self.finished = true;
                Ok(None)
            }
            Err(err) => Err(H3Error::Stream(err.to_string())),
        }
    }
}

/// The response half of one HTTP/3 request stream. [`ResponseSink`]
/// methods stage writes synchronously so handler code reads the same
/// as HTTP/1.1 and HTTP/2; [`RequestStream::pump`] is the async half
/// that actually moves staged bytes onto the QUIC stream, leaving
/// whatever the transport's flow control refuses queued for the next
/// call.
pub struct RequestStream<S>
where
    S: quic::SendStream<Bytes>,
{
    inner: H3Stream<S, Bytes>,
    staged_response: Option<http::Response<()>>,
    pending_writes: VecDeque<Bytes>,
    end_requested: bool,
    finished: bool,
    reset: bool,
}

impl<S> RequestStream<S>
where
    S: quic::SendStream<Bytes>,
{
    fn new(inner: H3Stream<S, Bytes>) -> Self {
        Self {
            inner,
            staged_response: None,
            pending_writes: VecDeque::new(),
            end_requested: false,
            finished: false,
            reset: false,
        }
    }

    /// Move staged writes onto the wire: the response head (if not yet
    /// sent), then as many queued body chunks as the transport accepts.
    /// Stops at the first chunk the transport refuses, leaving it and
    /// everything behind it queued; the caller registers this stream
    /// for another `pump` once the connection reports more send
    /// capacity.
    pub async fn pump(&mut self) -> Result<(), H3Error> {
        if self.reset {
            return Ok(());
        }
        if let Some(response) = self.staged_response.take() {
            self.inner.send_response(response).await.map_err(|e| H3Error::Stream(e.to_string()))?;
        }
        while let Some(chunk) = self.pending_writes.pop_front() {
            if let Err(err) = self.inner.send_data(chunk.clone()).await {
                self.pending_writes.push_front(chunk);
                return Err(H3Error::Stream(err.to_string()));
            }
        }
        if self.end_requested && !self.finished {
            self.inner.finish().await.map_err(|e| H3Error::Stream(e.to_string()))?;
            self.finished = true;
        }
        Ok(())
    }

    /// True while this stream still has a response head or body bytes
    /// waiting to reach the wire. The bridge re-polls streams for which
    /// this holds after every packet the connection acknowledges.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        self.staged_response.is_some() || !self.pending_writes.is_empty()
    }
}

impl<S> ResponseSink for RequestStream<S>
where
    S: quic::SendStream<Bytes>,
{
    type Error = H3Error;

    fn set_headers(&mut self, mut headers: HeaderList) -> Result<(), H3Error> {
        headers.strip_http3_illegal();
        let status: u16 = headers.get(":status").and_then(|s| s.parse().ok()).unwrap_or(200);
        let mut builder = http::Response::builder().status(status);
        for field in headers.regular() {
            // QPACK requires lowercase field names on the wire (RFC 9114
            // §4.1.1, which defers to RFC 7540 §8.1.2), same as HPACK.
            builder = builder.header(field.name.to_ascii_lowercase(), field.value.as_str());
        }
        let response = builder.body(()).map_err(|e| H3Error::Stream(e.to_string()))?;
        self.staged_response = Some(response);
        Ok(())
    }

    fn start_body(&mut self) -> Result<(), H3Error> {
        Ok(())
    }

    fn write_body_chunk(&mut self, chunk: Vec<u8>) -> Result<(), H3Error> {
        self.pending_writes.push_back(Bytes::from(chunk));
        Ok(())
    }

    fn end_body(&mut self) -> Result<(), H3Error> {
        self.end_requested = true;
        Ok(())
    }

    fn complete(&mut self) -> Result<(), H3Error> {
        Ok(())
    }

    fn would_block(&self) -> bool {
        !self.pending_writes.is_empty()
    }

    fn push_promise(&mut self, _headers: HeaderList) -> Result<bool, H3Error> {
        Ok(false)
    }

    /// HTTP/3 has no HTTP/1.1-style Upgrade; a WebSocket bridge over
    /// HTTP/3 would use Extended CONNECT, which is out of scope here.
    fn upgrade_websocket(&mut self, _accept_key: &str) -> Result<bool, H3Error> {
        Ok(false)
    }

    fn cancel(&mut self, reason: &str) -> Result<(), H3Error> {
        debug!(reason, "cancelling http/3 response stream");
        self.reset = true;
        self.pending_writes.clear();
        self.staged_response = None;
        Ok(())
    }
}

/// Drive one QUIC connection's HTTP/3 traffic, calling `handler` once
/// per request with its headers, a receiver for the request body, and
/// the stream's response sink. Each request runs in its own spawned
/// task so a slow handler never stalls the accept loop.
///
/// Mirrors the `h3` crate's own accept-loop contract: a connection
/// error ends the loop, a stream error is logged and skipped so the
/// rest of the connection keeps going.
pub async fn serve_connection<C, H, Fut>(conn: C, handler: H) -> Result<(), H3Error>
where
    C: quic::Connection<Bytes>,
    C::BidiStream: quic::BidiStream<Bytes>,
    H: Fn(
            HeaderList,
            RequestBody<<C::BidiStream as quic::BidiStream<Bytes>>::RecvStream>,
            RequestStream<<C::BidiStream as quic::BidiStream<Bytes>>::SendStream>,
        ) -> Fut
        + Clone
        + Send
        + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut h3_conn =
        h3::server::builder().build(conn).await.map_err(|e| H3Error::Connection(e.to_string()))?;
    loop {
        match h3_conn.accept().await {
            Ok(Some((request, stream))) => {
                let headers = request_headers(&request);
                let (tx, rx) = stream.split();
                let body = RequestBody::new(rx);
                let sink = RequestStream::new(tx);
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler(headers, body, sink).await;
                });
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "error accepting http/3 request stream");
                match err.get_error_level() {
                    ErrorLevel::ConnectionError => return Err(H3Error::Connection(err.to_string())),
                    ErrorLevel::StreamError => continue,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_headers_synthesizes_pseudo_headers() {
        let request = http::Request::builder()
            .method("GET")
            .uri("https://example.com/widgets?id=1")
            .header("accept", "application/json")
            .body(())
            .unwrap();
        let headers = request_headers(&request);
        assert_eq!(headers.get(":method"), Some("GET"));
        assert_eq!(headers.get(":path"), Some("/widgets?id=1"));
        assert_eq!(headers.get(":scheme"), Some("https"));
        assert_eq!(headers.get(":authority"), Some("example.com"));
        assert_eq!(headers.get("accept"), Some("application/json"));
    }
}
