//! HTTP/1.1 connection-level behavior: response encoding,
//! persistent-connection bookkeeping, and Upgrade handling (h2c,
//! WebSocket).

use crate::h1::parser::{ParseOutcome, ParsedRequest, RequestParser};
use crate::h1::H1Error;
use crate::headers::HeaderList;

/// One driver-level event surfaced to the code wiring this connection
/// into a reactor loop.
#[derive(Debug)]
pub enum H1Event {
    /// A request's headers (and method/target/version) are available.
    RequestHead(ParsedRequest),
    /// A chunk of the request body.
    BodyChunk(Vec<u8>),
    /// The request body (if any) is complete; the connection can now
    /// read the next pipelined request.
    BodyEnd,
    /// The client requested `Upgrade: h2c` and advertised `HTTP2-Settings`;
    /// the caller should reply `101 Switching Protocols` and hand
    /// subsequent bytes to the HTTP/2 engine, replaying this request on
    /// stream 1.
    UpgradeToH2c { request: ParsedRequest, settings_b64: String },
    /// The client requested `Upgrade: websocket` with a valid
    /// `Sec-WebSocket-Version: 13`; the caller should perform the
    /// handshake and swap codecs.
    UpgradeToWebSocket { request: ParsedRequest, client_key: String },
    /// A parse error occurred; respond `400 Bad Request` if no response
    /// has been sent yet, then close.
    Error(H1Error),
}

/// Drives the parser and classifies completed request heads as plain
/// requests or protocol upgrades.
#[derive(Debug, Default)]
pub struct H1Connection {
    parser: RequestParser,
    /// False once `Connection: close` is seen or an HTTP/1.0 request
    /// lacks `Connection: keep-alive`.
    keep_alive: bool,
}

impl H1Connection {
    /// A fresh connection, keep-alive enabled by default.
    #[must_use]
    pub fn new() -> Self {
        Self { parser: RequestParser::new(), keep_alive: true }
    }

    /// Feed newly-received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.parser.feed(data);
    }

    /// Whether the connection should remain open after the current
    /// response completes.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Pull the next event. Call in a loop until it stops making
    /// progress (mirrors [`RequestParser::poll`]'s `NeedMore` contract:
    /// the caller should stop looping when no more bytes are buffered).
    pub fn poll(&mut self) -> Option<H1Event> {
        match self.parser.poll() {
            ParseOutcome::NeedMore => None,
            ParseOutcome::Error(e) => Some(H1Event::Error(e)),
            ParseOutcome::BodyChunk(chunk) => Some(H1Event::BodyChunk(chunk)),
            ParseOutcome::BodyEnd(_trailers) => {
                self.parser.reset_for_next();
                Some(H1Event::BodyEnd)
            }
            ParseOutcome::NoBody => {
                self.parser.reset_for_next();
                Some(H1Event::BodyEnd)
            }
            ParseOutcome::Headers(request) => {
                self.update_persistence(&request);
                Some(self.classify(request))
            }
        }
    }

    fn update_persistence(&mut self, request: &ParsedRequest) {
        let connection = request.headers.get("connection").map(str::to_ascii_lowercase);
        self.keep_alive = match (request.version_minor, connection.as_deref()) {
            (_, Some("close")) => false,
            (1, Some("keep-alive") | None) => true,
            (1, Some(_)) => true,
            (0, Some("keep-alive")) => true,
            (0, _) => false,
            (_, _) => false,
        };
    }

    fn classify(&self, request: ParsedRequest) -> H1Event {
        let Some(upgrade) = request.headers.get("upgrade").map(str::to_ascii_lowercase) else {
            return H1Event::RequestHead(request);
        };
        let has_upgrade_token = request
            .headers
            .get("connection")
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);
        if !has_upgrade_token {
            return H1Event::RequestHead(request);
        }

        if upgrade == "h2c" {
            if let Some(settings) = request.headers.get("http2-settings").map(str::to_string) {
                return H1Event::UpgradeToH2c { settings_b64: settings, request };
            }
        } else if upgrade == "websocket" {
            let version_ok = request.headers.get("sec-websocket-version") == Some("13");
            if let Some(key) = request.headers.get("sec-websocket-key").map(str::to_string) {
                if version_ok {
                    return H1Event::UpgradeToWebSocket { client_key: key, request };
                }
            }
        }
        H1Event::RequestHead(request)
    }
}

/// Encode a response status line + headers (not including the body).
/// `status_text` should be the RFC 7231 reason phrase.
#[must_use]
pub fn encode_response_head(version_minor: u8, status: u16, status_text: &str, headers: &HeaderList) -> Vec<u8> {
    let mut out = format!("HTTP/1.{version_minor} {status} {status_text}\r\n").into_bytes();
    for field in headers.iter() {
        out.extend_from_slice(field.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(field.value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Encode one chunk of a chunked-transfer body.
#[must_use]
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return encode_last_chunk();
    }
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Encode the terminating zero-length chunk with no trailers.
#[must_use]
pub fn encode_last_chunk() -> Vec<u8> {
    b"0\r\n\r\n".to_vec()
}

/// A [`crate::contract::ResponseSink`] for one HTTP/1.1 response.
/// Chooses `Content-Length` framing when the handler set one, otherwise
/// falls back to chunked transfer (the behavior the handler observes
/// is identical either way).
#[derive(Debug, Default)]
pub struct H1ResponseWriter {
    version_minor: u8,
    /// Bytes ready to be written to the socket.
    pub outbox: Vec<u8>,
    chunked: bool,
}

impl H1ResponseWriter {
    #[must_use]
    pub fn new(version_minor: u8) -> Self {
        Self { version_minor, outbox: Vec::new(), chunked: false }
    }
}

impl crate::contract::ResponseSink for H1ResponseWriter {
    type Error = H1Error;

    fn set_headers(&mut self, headers: HeaderList) -> Result<(), H1Error> {
        let status: u16 = headers.get(":status").and_then(|s| s.parse().ok()).unwrap_or(200);
        let mut wire_headers: HeaderList = headers.regular().cloned().collect();
        self.chunked = !wire_headers.contains("content-length");
        if self.chunked {
            wire_headers.push("Transfer-Encoding", "chunked");
        }
        self.outbox.extend_from_slice(&encode_response_head(self.version_minor, status, status_text(status), &wire_headers));
        Ok(())
    }

    fn start_body(&mut self) -> Result<(), H1Error> {
        Ok(())
    }

    fn write_body_chunk(&mut self, chunk: Vec<u8>) -> Result<(), H1Error> {
        if self.chunked {
            self.outbox.extend_from_slice(&encode_chunk(&chunk));
        } else {
            self.outbox.extend_from_slice(&chunk);
        }
        Ok(())
    }

    fn end_body(&mut self) -> Result<(), H1Error> {
        if self.chunked {
            self.outbox.extend_from_slice(&encode_last_chunk());
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), H1Error> {
        Ok(())
    }

    fn cancel(&mut self, _reason: &str) -> Result<(), H1Error> {
        // HTTP/1.1 has no mid-response abort signal; the caller must
        // close the underlying transport after this returns.
        Ok(())
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        101 => "Switching Protocols",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_request_yields_request_head_then_body_end() {
        let mut conn = H1Connection::new();
        conn.feed(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(matches!(conn.poll(), Some(H1Event::RequestHead(_))));
        assert!(matches!(conn.poll(), Some(H1Event::BodyEnd)));
        assert!(conn.is_keep_alive());
    }

    #[test]
    fn connection_close_disables_keep_alive() {
        let mut conn = H1Connection::new();
        conn.feed(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        conn.poll();
        assert!(!conn.is_keep_alive());
    }

    #[test]
    fn http_1_0_defaults_to_close() {
        let mut conn = H1Connection::new();
        conn.feed(b"GET / HTTP/1.0\r\n\r\n");
        conn.poll();
        assert!(!conn.is_keep_alive());
    }

    #[test]
    fn h2c_upgrade_is_detected() {
        let mut conn = H1Connection::new();
        conn.feed(
            b"OPTIONS * HTTP/1.1\r\nConnection: Upgrade, HTTP2-Settings\r\nUpgrade: h2c\r\nHTTP2-Settings: AAMAAABkAAQAAP__\r\n\r\n",
        );
        let event = conn.poll().unwrap();
        assert!(matches!(event, H1Event::UpgradeToH2c { .. }));
    }

    #[test]
    fn websocket_upgrade_is_detected() {
        let mut conn = H1Connection::new();
        conn.feed(
            b"GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        );
        let event = conn.poll().unwrap();
        match event {
            H1Event::UpgradeToWebSocket { client_key, .. } => {
                assert_eq!(client_key, "dGhlIHNhbXBsZSBub25jZQ==");
            }
            other => panic!("expected websocket upgrade, got {other:?}"),
        }
    }

    #[test]
    fn upgrade_without_connection_token_is_ignored() {
        let mut conn = H1Connection::new();
        conn.feed(b"GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n");
        assert!(matches!(conn.poll(), Some(H1Event::RequestHead(_))));
    }

    #[test]
    fn chunk_encoding_matches_wire_format() {
        assert_eq!(encode_chunk(b"Wiki"), b"4\r\nWiki\r\n".to_vec());
        assert_eq!(encode_last_chunk(), b"0\r\n\r\n".to_vec());
    }

    #[test]
    fn response_writer_falls_back_to_chunked_without_content_length() {
        use crate::contract::ResponseSink;
        let mut writer = H1ResponseWriter::new(1);
        let mut headers = HeaderList::new();
        headers.push(":status", "200");
        writer.set_headers(headers).unwrap();
        writer.start_body().unwrap();
        writer.write_body_chunk(b"Wiki".to_vec()).unwrap();
        writer.write_body_chunk(b"pedia".to_vec()).unwrap();
        writer.end_body().unwrap();
        let text = String::from_utf8(writer.outbox).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with("4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"));
    }

    #[test]
    fn response_writer_honors_explicit_content_length() {
        use crate::contract::ResponseSink;
        let mut writer = H1ResponseWriter::new(1);
        let mut headers = HeaderList::new();
        headers.push(":status", "204");
        headers.push("content-length", "0");
        writer.set_headers(headers).unwrap();
        writer.end_body().unwrap();
        let text = String::from_utf8(writer.outbox).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!text.contains("Transfer-Encoding"));
    }
}
