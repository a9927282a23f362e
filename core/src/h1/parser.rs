//! Incremental HTTP/1.1 request parser.
//!
//! States: *request-line → headers → (content-length-body | chunked-body
//! | no-body) → complete*. The parser consumes bytes as they arrive over
//! TCP (which may split a request line, a header, or a chunk boundary
//! across reads) and emits one [`ParseOutcome`] at a time so the driving
//! connection can act on partial progress (e.g. start streaming a body
//! before it has fully arrived).

use crate::h1::H1Error;
use crate::headers::HeaderList;

/// Maximum bytes buffered for a request line or a single header line
/// before the parser gives up (guards against unbounded memory growth
/// from a malformed or malicious frame).
const MAX_LINE_LEN: usize = 16 * 1024;

/// A fully parsed request line plus headers, handed to the connection
/// driver once the header section is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRequest {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Request target as sent on the wire (origin-form, absolute-form,
    /// or `*`).
    pub target: String,
    /// `1.0` or `1.1`.
    pub version_minor: u8,
    /// Headers in arrival order, duplicates preserved.
    pub headers: HeaderList,
}

/// Body framing selected once headers are complete (RFC 7230 §3.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyMode {
    None,
    ContentLength(u64),
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataCrlf,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body(BodyMode),
    Chunked(ChunkPhase),
    Complete,
}

/// One unit of parsing progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// More bytes are needed before progress can be made.
    NeedMore,
    /// The request line and all headers have been parsed.
    Headers(ParsedRequest),
    /// A chunk of body data (content-length or de-chunked).
    BodyChunk(Vec<u8>),
    /// The body (if any) is complete; trailers (if any) were parsed into
    /// the second field.
    BodyEnd(HeaderList),
    /// A request with no body completed immediately after headers.
    NoBody,
    /// A parse error; the connection must respond with `400 Bad Request`
    /// if nothing has been written yet, then close.
    Error(H1Error),
}

/// Incremental parser, one instance per HTTP/1.1 connection. Pipelined
/// requests are handled by calling [`RequestParser::reset_for_next`]
/// after a request completes and feeding the next request's bytes.
#[derive(Debug)]
pub struct RequestParser {
    buf: Vec<u8>,
    pos: usize,
    state: State,
    in_progress: ParsedRequest,
    trailers: HeaderList,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    /// A fresh parser awaiting a request line.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            state: State::RequestLine,
            in_progress: ParsedRequest::default(),
            trailers: HeaderList::new(),
        }
    }

    /// Feed newly-received bytes into the parser's buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Reuse this parser for the next pipelined request: requests on the
    /// same connection are processed in the order received.
    pub fn reset_for_next(&mut self) {
        self.buf.drain(..self.pos);
        self.pos = 0;
        self.state = State::RequestLine;
        self.in_progress = ParsedRequest::default();
        self.trailers = HeaderList::new();
    }

    fn find_crlf(&self, from: usize) -> Option<usize> {
        self.buf[from..].windows(2).position(|w| w == b"\r\n").map(|i| from + i)
    }

    /// Advance parsing as far as currently-buffered bytes allow, one
    /// outcome per call. Call in a loop until [`ParseOutcome::NeedMore`].
    pub fn poll(&mut self) -> ParseOutcome {
        loop {
            match self.state {
                State::RequestLine => match self.parse_request_line() {
                    Ok(Some(())) => continue,
                    Ok(None) => return ParseOutcome::NeedMore,
                    Err(e) => return ParseOutcome::Error(e),
                },
                State::Headers => match self.parse_header_line() {
                    Ok(Some(true)) => continue,  // more headers to read
                    Ok(Some(false)) => {
                        // Headers finished; decide body framing.
                        match self.select_body_mode() {
                            Ok(BodyMode::None) => {
                                self.state = State::Complete;
                                let req = std::mem::take(&mut self.in_progress);
                                return ParseOutcome::Headers(req);
                            }
                            Ok(mode @ BodyMode::ContentLength(_)) => {
                                self.state = State::Body(mode);
                                let req = std::mem::take(&mut self.in_progress);
                                return ParseOutcome::Headers(req);
                            }
                            Ok(BodyMode::Chunked) => {
                                self.state = State::Chunked(ChunkPhase::Size);
                                let req = std::mem::take(&mut self.in_progress);
                                return ParseOutcome::Headers(req);
                            }
                            Err(e) => return ParseOutcome::Error(e),
                        }
                    }
                    Ok(None) => return ParseOutcome::NeedMore,
                    Err(e) => return ParseOutcome::Error(e),
                },
                State::Body(BodyMode::None) => {
                    self.state = State::Complete;
                    return ParseOutcome::NoBody;
                }
                State::Body(BodyMode::ContentLength(remaining)) => {
                    let available = self.buf.len() - self.pos;
                    if available == 0 && remaining > 0 {
                        return ParseOutcome::NeedMore;
                    }
                    if remaining == 0 {
                        self.state = State::Complete;
                        return ParseOutcome::BodyEnd(HeaderList::new());
                    }
                    let take = available.min(remaining as usize);
                    let chunk = self.buf[self.pos..self.pos + take].to_vec();
                    self.pos += take;
                    self.state = State::Body(BodyMode::ContentLength(remaining - take as u64));
                    return ParseOutcome::BodyChunk(chunk);
                }
                State::Body(BodyMode::Chunked) => unreachable!("chunked bodies use State::Chunked"),
                State::Chunked(phase) => match self.poll_chunked(phase) {
                    Ok(Some(outcome)) => return outcome,
                    Ok(None) => continue,
                    Err(e) => return ParseOutcome::Error(e),
                },
                State::Complete => return ParseOutcome::NeedMore,
            }
        }
    }

    fn parse_request_line(&mut self) -> Result<Option<()>, H1Error> {
        let Some(end) = self.find_crlf(self.pos) else {
            if self.buf.len() - self.pos > MAX_LINE_LEN {
                return Err(H1Error::TooLarge);
            }
            return Ok(None);
        };
        let line = std::str::from_utf8(&self.buf[self.pos..end])
            .map_err(|_| H1Error::MalformedRequestLine("non-utf8 request line".into()))?
            .to_string();
        self.pos = end + 2;

        let mut parts = line.splitn(3, ' ');
        let method = parts.next().filter(|s| !s.is_empty());
        let target = parts.next().filter(|s| !s.is_empty());
        let version = parts.next().filter(|s| !s.is_empty());
        let (method, target, version) = match (method, target, version) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => return Err(H1Error::MalformedRequestLine(line)),
        };
        let version_minor = match version {
            "HTTP/1.1" => 1,
            "HTTP/1.0" => 0,
            other => return Err(H1Error::MalformedRequestLine(format!("unsupported version {other}"))),
        };

        self.in_progress.method = method.to_string();
        self.in_progress.target = target.to_string();
        self.in_progress.version_minor = version_minor;
        self.state = State::Headers;
        Ok(Some(()))
    }

    /// Returns `Ok(Some(true))` if a header was parsed (loop again),
    /// `Ok(Some(false))` if the blank line ending headers was found.
    fn parse_header_line(&mut self) -> Result<Option<bool>, H1Error> {
        let Some(end) = self.find_crlf(self.pos) else {
            if self.buf.len() - self.pos > MAX_LINE_LEN {
                return Err(H1Error::TooLarge);
            }
            return Ok(None);
        };
        if end == self.pos {
            // Blank line: end of headers.
            self.pos = end + 2;
            return Ok(Some(false));
        }
        let line = std::str::from_utf8(&self.buf[self.pos..end])
            .map_err(|_| H1Error::MalformedHeader("non-utf8 header line".into()))?
            .to_string();
        self.pos = end + 2;

        // RFC 7230 §3.2.4 obsolete line folding: a continuation line
        // starts with SP or HTAB and extends the previous header value.
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = self.in_progress.headers.iter().last() {
                let name = last.name.clone();
                let mut value = last.value.clone();
                value.push(' ');
                value.push_str(line.trim());
                self.in_progress.headers.remove(&name);
                // `remove` drops *all* entries named `name`; folding onto
                // a duplicate-name header is not meaningful traffic in
                // practice, so collapsing to one merged entry is fine.
                self.in_progress.headers.push(name, value);
                return Ok(Some(true));
            }
            return Err(H1Error::MalformedHeader("continuation with no prior header".into()));
        }

        let Some(colon) = line.find(':') else {
            return Err(H1Error::MalformedHeader(line));
        };
        let name = line[..colon].trim();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(H1Error::MalformedHeader(line));
        }
        let value = line[colon + 1..].trim();
        self.in_progress.headers.push(name, value);
        Ok(Some(true))
    }

    fn select_body_mode(&self) -> Result<BodyMode, H1Error> {
        let has_chunked = self
            .in_progress
            .headers
            .get("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        let content_length = self.in_progress.headers.get("content-length");

        match (has_chunked, content_length) {
            (true, Some(_)) => Err(H1Error::ConflictingLengthAndEncoding),
            (true, None) => Ok(BodyMode::Chunked),
            (false, Some(len)) => {
                let len: u64 = len.trim().parse().map_err(|_| H1Error::InvalidContentLength)?;
                Ok(if len == 0 { BodyMode::None } else { BodyMode::ContentLength(len) })
            }
            (false, None) => Ok(BodyMode::None),
        }
    }

    /// Advance the chunked-transfer state machine by as much as buffered
    /// bytes allow. `Ok(None)` means "loop `poll` again", `Ok(Some(_))`
    /// means "return this outcome to the caller".
    fn poll_chunked(&mut self, phase: ChunkPhase) -> Result<Option<ParseOutcome>, H1Error> {
        match phase {
            ChunkPhase::Size => {
                let Some(end) = self.find_crlf(self.pos) else {
                    if self.buf.len() - self.pos > MAX_LINE_LEN {
                        return Err(H1Error::TooLarge);
                    }
                    return Ok(Some(ParseOutcome::NeedMore));
                };
                let line = std::str::from_utf8(&self.buf[self.pos..end]).map_err(|_| H1Error::MalformedChunkSize)?;
                // Chunk extensions (after `;`) are accepted but ignored.
                let size_str = line.split(';').next().unwrap_or("").trim();
                let size = u64::from_str_radix(size_str, 16).map_err(|_| H1Error::MalformedChunkSize)?;
                self.pos = end + 2;
                self.state = State::Chunked(ChunkPhase::Data(size));
                if size == 0 {
                    self.state = State::Chunked(ChunkPhase::Trailers);
                }
                Ok(None)
            }
            ChunkPhase::Data(0) => {
                // Zero-length chunk data still has a trailing CRLF to
                // consume before trailers/size (handled by Size directly
                // when size==0; Data(0) only occurs transiently).
                self.state = State::Chunked(ChunkPhase::DataCrlf);
                Ok(None)
            }
            ChunkPhase::Data(remaining) => {
                let available = self.buf.len() - self.pos;
                if available == 0 {
                    return Ok(Some(ParseOutcome::NeedMore));
                }
                let take = available.min(remaining as usize);
                let chunk = self.buf[self.pos..self.pos + take].to_vec();
                self.pos += take;
                let left = remaining - take as u64;
                self.state =
                    State::Chunked(if left == 0 { ChunkPhase::DataCrlf } else { ChunkPhase::Data(left) });
                Ok(Some(ParseOutcome::BodyChunk(chunk)))
            }
            ChunkPhase::DataCrlf => {
                if self.buf.len() - self.pos < 2 {
                    return Ok(Some(ParseOutcome::NeedMore));
                }
                if &self.buf[self.pos..self.pos + 2] != b"\r\n" {
                    return Err(H1Error::MalformedChunkSize);
                }
                self.pos += 2;
                self.state = State::Chunked(ChunkPhase::Size);
                Ok(None)
            }
            ChunkPhase::Trailers => {
                // Trailers are parsed identically to headers, but into a
                // separate list so the main header list is untouched.
                let Some(end) = self.find_crlf(self.pos) else {
                    if self.buf.len() - self.pos > MAX_LINE_LEN {
                        return Err(H1Error::TooLarge);
                    }
                    return Ok(Some(ParseOutcome::NeedMore));
                };
                if end == self.pos {
                    self.pos = end + 2;
                    self.state = State::Complete;
                    return Ok(Some(ParseOutcome::BodyEnd(std::mem::take(&mut self.trailers))));
                }
                let line = std::str::from_utf8(&self.buf[self.pos..end])
                    .map_err(|_| H1Error::MalformedHeader("non-utf8 trailer".into()))?
                    .to_string();
                self.pos = end + 2;
                let Some(colon) = line.find(':') else {
                    return Err(H1Error::MalformedHeader(line));
                };
                let name = line[..colon].trim().to_string();
                let value = line[colon + 1..].trim().to_string();
                self.trailers.push(name, value);
                Ok(None)
            }
        }
    }
}

/// Convenience free function for one-shot tests: feed all of `input` and
/// collect every outcome up to (and including) the first `NeedMore`.
#[cfg(test)]
fn parse_step(input: &[u8]) -> (RequestParser, Vec<ParseOutcome>) {
    let mut parser = RequestParser::new();
    parser.feed(input);
    let mut outcomes = Vec::new();
    loop {
        let outcome = parser.poll();
        let done = matches!(outcome, ParseOutcome::NeedMore | ParseOutcome::Error(_));
        outcomes.push(outcome);
        if done {
            break;
        }
    }
    (parser, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_with_no_body() {
        let (_p, outcomes) = parse_step(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert!(matches!(&outcomes[0], ParseOutcome::Headers(req) if req.method == "GET" && req.target == "/index.html"));
        assert!(matches!(outcomes[1], ParseOutcome::NoBody));
    }

    #[test]
    fn parses_content_length_body() {
        let input = b"POST /echo HTTP/1.1\r\nContent-Length: 13\r\n\r\nHello, World!";
        let (_p, outcomes) = parse_step(input);
        assert!(matches!(&outcomes[0], ParseOutcome::Headers(_)));
        let body: Vec<u8> = outcomes
            .iter()
            .filter_map(|o| if let ParseOutcome::BodyChunk(c) = o { Some(c.clone()) } else { None })
            .flatten()
            .collect();
        assert_eq!(body, b"Hello, World!");
    }

    #[test]
    fn parses_chunked_body_wikipedia_example() {
        let input = b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let (_p, outcomes) = parse_step(input);
        let body: Vec<u8> = outcomes
            .iter()
            .filter_map(|o| if let ParseOutcome::BodyChunk(c) = o { Some(c.clone()) } else { None })
            .flatten()
            .collect();
        assert_eq!(body, b"Wikipedia");
        assert!(outcomes.iter().any(|o| matches!(o, ParseOutcome::BodyEnd(_))));
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4;foo=bar\r\nWiki\r\n0\r\n\r\n";
        let (_p, outcomes) = parse_step(input);
        let body: Vec<u8> = outcomes
            .iter()
            .filter_map(|o| if let ParseOutcome::BodyChunk(c) = o { Some(c.clone()) } else { None })
            .flatten()
            .collect();
        assert_eq!(body, b"Wiki");
    }

    #[test]
    fn obsolete_line_folding_is_merged() {
        let input = b"GET / HTTP/1.1\r\nX-Long: first\r\n second\r\n\r\n";
        let (_p, outcomes) = parse_step(input);
        let ParseOutcome::Headers(req) = &outcomes[0] else { panic!("expected headers") };
        assert_eq!(req.headers.get("x-long"), Some("first second"));
    }

    #[test]
    fn duplicate_headers_are_preserved_in_order() {
        let input = b"GET / HTTP/1.1\r\nX-A: 1\r\nX-A: 2\r\n\r\n";
        let (_p, outcomes) = parse_step(input);
        let ParseOutcome::Headers(req) = &outcomes[0] else { panic!("expected headers") };
        let all: Vec<_> = req.headers.get_all("x-a").collect();
        assert_eq!(all, vec!["1", "2"]);
    }

    #[test]
    fn conflicting_length_and_encoding_is_rejected() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: 4\r\nTransfer-Encoding: chunked\r\n\r\nabcd";
        let (_p, outcomes) = parse_step(input);
        assert!(matches!(outcomes.last(), Some(ParseOutcome::Error(H1Error::ConflictingLengthAndEncoding))));
    }

    #[test]
    fn split_crlfcrlf_across_feeds_is_handled() {
        let mut parser = RequestParser::new();
        parser.feed(b"GET / HTTP/1.1\r\nHost: x\r");
        assert_eq!(parser.poll(), ParseOutcome::NeedMore);
        parser.feed(b"\n\r\n");
        let outcome = parser.poll();
        assert!(matches!(outcome, ParseOutcome::Headers(_)));
    }

    #[test]
    fn pipelined_requests_reuse_the_parser() {
        let mut parser = RequestParser::new();
        parser.feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
        let first = parser.poll();
        assert!(matches!(&first, ParseOutcome::Headers(r) if r.target == "/a"));
        assert!(matches!(parser.poll(), ParseOutcome::NoBody));
        parser.reset_for_next();
        let second = parser.poll();
        assert!(matches!(&second, ParseOutcome::Headers(r) if r.target == "/b"));
    }
}
