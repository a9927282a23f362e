//! Protocol-agnostic request/response contract. HTTP/1.1, HTTP/2, and
//! HTTP/3 each drive the same [`RequestEvent`] sequence into application
//! handlers and expose the same [`ResponseSink`] operations back out, so
//! a handler never branches on which protocol carried the exchange.

use crate::headers::HeaderList;

/// One step of an incoming request, delivered to the handler in order.
/// The sequence observed by a handler is always a prefix of
/// `Headers, (BodyChunk* , BodyEnd)?, Complete`.
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// Request headers, including pseudo-headers for method/path/scheme/
    /// authority (synthesized from the request line for HTTP/1.1).
    Headers(HeaderList),
    /// One chunk of request body, in arrival order.
    BodyChunk(Vec<u8>),
    /// No further body bytes will arrive.
    BodyEnd,
    /// The exchange is finished; no further events follow.
    Complete,
}

/// The response-side half of the contract. Implemented once per
/// protocol (HTTP/1.1, HTTP/2, HTTP/3) over that protocol's connection
/// and stream state; application code calls these in order:
/// `set_headers`, `start_body`, `write_body_chunk*`, `end_body`,
/// `complete`.
pub trait ResponseSink {
    type Error;

    /// Set response headers, including `:status` (or the HTTP/1.1
    /// status line equivalent). Must be called before `start_body`.
    fn set_headers(&mut self, headers: HeaderList) -> Result<(), Self::Error>;

    /// Begin the response body. A no-body response skips straight to
    /// `end_body`.
    fn start_body(&mut self) -> Result<(), Self::Error>;

    /// Write one chunk of response body. May buffer internally under
    /// flow control; callers should check [`ResponseSink::would_block`]
    /// to avoid unbounded buffering.
    fn write_body_chunk(&mut self, chunk: Vec<u8>) -> Result<(), Self::Error>;

    /// No further body bytes; finalizes chunked/length framing as the
    /// protocol requires.
    fn end_body(&mut self) -> Result<(), Self::Error>;

    /// Mark the exchange complete. Idempotent.
    fn complete(&mut self) -> Result<(), Self::Error>;

    /// True if a write right now would buffer rather than reach the
    /// wire (window exhausted, or the OS socket buffer is full).
    fn would_block(&self) -> bool {
        false
    }

    /// Offer a server push. Returns `Ok(false)` (not an error) when the
    /// protocol or peer configuration doesn't support push.
    fn push_promise(&mut self, _headers: HeaderList) -> Result<bool, Self::Error> {
        Ok(false)
    }

    /// Attempt a WebSocket upgrade on this exchange. Returns `Ok(false)`
    /// when the underlying protocol can't carry an upgrade (HTTP/2 and
    /// HTTP/3 do not support the HTTP/1.1 Upgrade mechanism; they use
    /// Extended CONNECT instead, which is out of scope here).
    fn upgrade_websocket(&mut self, _accept_key: &str) -> Result<bool, Self::Error> {
        Ok(false)
    }

    /// Abort the exchange with a best-effort RST/close. Always
    /// terminal; no further calls are made after this.
    fn cancel(&mut self, reason: &str) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<&'static str>,
    }

    impl ResponseSink for RecordingSink {
        type Error = std::convert::Infallible;

        fn set_headers(&mut self, _headers: HeaderList) -> Result<(), Self::Error> {
            self.calls.push("set_headers");
            Ok(())
        }
        fn start_body(&mut self) -> Result<(), Self::Error> {
            self.calls.push("start_body");
            Ok(())
        }
        fn write_body_chunk(&mut self, _chunk: Vec<u8>) -> Result<(), Self::Error> {
            self.calls.push("write_body_chunk");
            Ok(())
        }
        fn end_body(&mut self) -> Result<(), Self::Error> {
            self.calls.push("end_body");
            Ok(())
        }
        fn complete(&mut self) -> Result<(), Self::Error> {
            self.calls.push("complete");
            Ok(())
        }
        fn cancel(&mut self, _reason: &str) -> Result<(), Self::Error> {
            self.calls.push("cancel");
            Ok(())
        }
    }

    #[test]
    fn default_push_and_upgrade_are_unsupported_without_erroring() {
        let mut sink = RecordingSink::default();
        assert_eq!(sink.push_promise(HeaderList::new()), Ok(false));
        assert_eq!(sink.upgrade_websocket("key"), Ok(false));
    }

    #[test]
    fn canonical_call_order_is_representable() {
        let mut sink = RecordingSink::default();
        sink.set_headers(HeaderList::new()).unwrap();
        sink.start_body().unwrap();
        sink.write_body_chunk(b"hi".to_vec()).unwrap();
        sink.end_body().unwrap();
        sink.complete().unwrap();
        assert_eq!(sink.calls, vec!["set_headers", "start_body", "write_body_chunk", "end_body", "complete"]);
    }
}
