//! Per-connection HTTP/2 engine: validates the preface, negotiates
//! SETTINGS, decodes incoming frames into stream-lifecycle events, and
//! schedules outgoing DATA under flow control.

use std::collections::{HashMap, VecDeque};

use crate::h2::flow::Window;
use crate::h2::frame::{self, encode_frame, flags, Frame, FrameParser, FrameType};
use crate::h2::hpack::{Decoder, Encoder};
use crate::h2::settings::{self, Settings};
use crate::h2::stream::{Event, Stream, StreamState};
use crate::h2::H2Error;
use crate::headers::HeaderList;

/// One unit of progress surfaced to the code driving this connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The preface and initial SETTINGS exchange completed; the caller
    /// should flush `outbox` to the peer.
    Ready,
    /// A stream received its request headers.
    Headers { stream_id: u32, headers: HeaderList, end_stream: bool },
    /// A stream received a chunk of request body.
    Data { stream_id: u32, chunk: Vec<u8>, end_stream: bool },
    /// A stream was reset by the peer.
    StreamReset { stream_id: u32, error: H2Error },
    /// The peer sent GOAWAY; no new streams should be started.
    GoAway { last_stream_id: u32, error: H2Error },
    /// A fatal connection-level error; the caller should send the
    /// accompanying GOAWAY (already queued in `outbox`) and close.
    ConnectionError(H2Error),
}

enum PrefaceState {
    AwaitingPreface,
    Established,
}

/// Server-side HTTP/2 connection state. Owns the frame parser, HPACK
/// codec pair, SETTINGS for both directions, and every open stream.
pub struct Connection {
    parser: FrameParser,
    preface_state: PrefaceState,
    preface_buf: Vec<u8>,
    local_settings: Settings,
    peer_settings: Settings,
    encoder: Encoder,
    decoder: Decoder,
    send_window: Window,
    recv_window: Window,
    streams: HashMap<u32, Stream>,
    highest_peer_stream_id: u32,
    /// A HEADERS frame seen without `END_HEADERS`, awaiting its
    /// CONTINUATION fragments: stream id, accumulated block bytes, and
    /// the `END_STREAM` flag carried on the initial HEADERS frame.
    header_block_in_progress: Option<(u32, Vec<u8>, bool)>,
    /// Outbound wire bytes accumulated by the last `feed`/poll cycle;
    /// the caller drains this after each call.
    pub outbox: Vec<u8>,
    /// Streams with buffered DATA awaiting window, visited round-robin.
    resumable: VecDeque<u32>,
    goaway_sent: bool,
}

impl Connection {
    #[must_use]
    pub fn new(local_settings: Settings) -> Self {
        let peer_settings = Settings::default();
        Self {
            parser: FrameParser::new(local_settings.max_frame_size),
            preface_state: PrefaceState::AwaitingPreface,
            preface_buf: Vec::new(),
            encoder: Encoder::new(peer_settings.header_table_size as usize),
            decoder: Decoder::new(
                local_settings.header_table_size as usize,
                local_settings.max_header_list_size.unwrap_or(1 << 20) as usize,
            ),
            send_window: Window::new(peer_settings.initial_window_size),
            recv_window: Window::new(local_settings.initial_window_size),
            streams: HashMap::new(),
            highest_peer_stream_id: 0,
            header_block_in_progress: None,
            outbox: Vec::new(),
            resumable: VecDeque::new(),
            goaway_sent: false,
            local_settings,
            peer_settings,
        }
    }

    /// Feed newly-received bytes and drain as many events as can be
    /// produced from what is currently buffered.
    pub fn feed(&mut self, data: &[u8]) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        match self.preface_state {
            PrefaceState::AwaitingPreface => {
                self.preface_buf.extend_from_slice(data);
                if self.preface_buf.len() < frame::PREFACE.len() {
                    return events;
                }
                if &self.preface_buf[..frame::PREFACE.len()] != frame::PREFACE {
                    events.push(ConnectionEvent::ConnectionError(H2Error::InvalidPreface));
                    return events;
                }
                self.preface_state = PrefaceState::Established;
                self.outbox.extend_from_slice(&self.local_settings.encode_frame());
                let rest = self.preface_buf[frame::PREFACE.len()..].to_vec();
                self.preface_buf.clear();
                self.parser.feed(&rest);
                events.push(ConnectionEvent::Ready);
            }
            PrefaceState::Established => self.parser.feed(data),
        }

        loop {
            match self.parser.poll() {
                Ok(Some(frame)) => match self.handle_frame(frame) {
                    Ok(mut new_events) => events.append(&mut new_events),
                    Err(e) => {
                        self.send_goaway(&e);
                        events.push(ConnectionEvent::ConnectionError(e));
                        break;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    self.send_goaway(&e);
                    events.push(ConnectionEvent::ConnectionError(e));
                    break;
                }
            }
        }
        events
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Vec<ConnectionEvent>, H2Error> {
        let mut events = Vec::new();
        match frame.frame_type {
            FrameType::Settings => {
                if frame.flags & flags::ACK != 0 {
                    return Ok(events);
                }
                let previous_window = self.peer_settings.apply(&frame.payload)?;
                self.encoder.set_dynamic_table_size(self.peer_settings.header_table_size as usize);
                let delta = i64::from(self.peer_settings.initial_window_size) - i64::from(previous_window);
                for stream in self.streams.values_mut() {
                    stream.send_window.shift(delta);
                }
                self.outbox.extend_from_slice(&settings::encode_ack());
            }
            FrameType::WindowUpdate => {
                let increment = parse_window_update(&frame.payload)?;
                if frame.stream_id == 0 {
                    self.send_window.increment(increment)?;
                } else if let Some(stream) = self.streams.get_mut(&frame.stream_id) {
                    stream.send_window.increment(increment)?;
                    self.resumable.push_back(frame.stream_id);
                }
                self.flush_resumable();
            }
            FrameType::Ping => {
                if frame.flags & flags::ACK == 0 {
                    self.outbox.extend_from_slice(&encode_frame(FrameType::Ping, flags::ACK, 0, &frame.payload));
                }
            }
            FrameType::Headers => {
                if self.header_block_in_progress.is_some() {
                    return Err(H2Error::ProtocolError(
                        "HEADERS received while a CONTINUATION sequence was in progress".into(),
                    ));
                }
                self.validate_stream_id(frame.stream_id)?;
                let end_stream = frame.flags & frame::flags::END_STREAM != 0;
                if frame.flags & frame::flags::END_HEADERS == 0 {
                    self.header_block_in_progress = Some((frame.stream_id, frame.payload, end_stream));
                } else {
                    self.finish_header_block(frame.stream_id, frame.payload, end_stream, &mut events)?;
                }
            }
            FrameType::Data => {
                let end_stream = frame.flags & frame::flags::END_STREAM != 0;
                let len = frame.payload.len() as u32;
                self.recv_window.consume(len);
                let stream = self.streams.get_mut(&frame.stream_id).ok_or(H2Error::StreamClosed)?;
                stream.apply(Event::RecvData { end_stream })?;
                stream.recv_window.consume(len);
                if let Some(increment) = stream.recv_accountant.consume(len) {
                    self.outbox.extend_from_slice(&encode_frame(
                        FrameType::WindowUpdate,
                        0,
                        frame.stream_id,
                        &increment.to_be_bytes(),
                    ));
                }
                events.push(ConnectionEvent::Data { stream_id: frame.stream_id, chunk: frame.payload, end_stream });
            }
            FrameType::RstStream => {
                if let Some(stream) = self.streams.get_mut(&frame.stream_id) {
                    let _ = stream.apply(Event::RecvRstStream);
                }
                events.push(ConnectionEvent::StreamReset { stream_id: frame.stream_id, error: H2Error::Cancel });
            }
            FrameType::GoAway => {
                let (last_stream_id, code) = parse_goaway(&frame.payload)?;
                events.push(ConnectionEvent::GoAway { last_stream_id, error: error_from_code(code) });
            }
            FrameType::Continuation => {
                let Some((stream_id, mut block, end_stream)) = self.header_block_in_progress.take() else {
                    return Err(H2Error::ProtocolError(
                        "CONTINUATION received without a preceding HEADERS".into(),
                    ));
                };
                if frame.stream_id != stream_id {
                    return Err(H2Error::ProtocolError(
                        "CONTINUATION stream id does not match the HEADERS it continues".into(),
                    ));
                }
                block.extend_from_slice(&frame.payload);
                if frame.flags & frame::flags::END_HEADERS == 0 {
                    self.header_block_in_progress = Some((stream_id, block, end_stream));
                } else {
                    self.finish_header_block(stream_id, block, end_stream, &mut events)?;
                }
            }
            FrameType::Priority | FrameType::PushPromise => {
                // Accepted but not acted on beyond framing validity;
                // PRIORITY carries no state this engine schedules on.
            }
        }
        Ok(events)
    }

    /// Decode a complete header block (HEADERS payload plus any
    /// CONTINUATION fragments) and surface it as one `Headers` event.
    fn finish_header_block(
        &mut self,
        stream_id: u32,
        block: Vec<u8>,
        end_stream: bool,
        events: &mut Vec<ConnectionEvent>,
    ) -> Result<(), H2Error> {
        let headers = self.decoder.decode(&block)?;
        let stream = self
            .streams
            .entry(stream_id)
            .or_insert_with(|| Stream::new(stream_id, self.local_settings.initial_window_size));
        stream.apply(Event::RecvHeaders { end_stream })?;
        stream.request_headers = headers.clone();
        events.push(ConnectionEvent::Headers { stream_id, headers, end_stream });
        Ok(())
    }

    fn validate_stream_id(&mut self, stream_id: u32) -> Result<(), H2Error> {
        if stream_id % 2 == 0 || stream_id == 0 {
            return Err(H2Error::ProtocolError("client stream id must be odd and nonzero".into()));
        }
        if stream_id <= self.highest_peer_stream_id && !self.streams.contains_key(&stream_id) {
            return Err(H2Error::ProtocolError("stream id did not strictly increase".into()));
        }
        self.highest_peer_stream_id = self.highest_peer_stream_id.max(stream_id);
        Ok(())
    }

    /// Encode and queue response headers for `stream_id`.
    pub fn send_headers(&mut self, stream_id: u32, headers: &HeaderList, end_stream: bool) -> Result<(), H2Error> {
        let block = self.encoder.encode(headers);
        let stream = self.streams.get_mut(&stream_id).ok_or(H2Error::StreamClosed)?;
        stream.apply(Event::SendHeaders { end_stream })?;
        let frame_flags = frame::flags::END_HEADERS | if end_stream { frame::flags::END_STREAM } else { 0 };
        self.outbox.extend_from_slice(&encode_frame(FrameType::Headers, frame_flags, stream_id, &block));
        Ok(())
    }

    /// Queue (or buffer, if window-exhausted) a DATA write for
    /// `stream_id`, splitting into `max_frame_size`-sized frames.
    pub fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) -> Result<(), H2Error> {
        {
            let stream = self.streams.get_mut(&stream_id).ok_or(H2Error::StreamClosed)?;
            if !data.is_empty() {
                stream.pending_writes.push_back(data.to_vec());
            }
            if end_stream {
                stream.pending_writes.push_back(Vec::new()); // sentinel marks end_stream
            }
        }
        self.resumable.push_back(stream_id);
        self.flush_resumable();
        Ok(())
    }

    fn flush_resumable(&mut self) {
        let max_frame_size = self.peer_settings.max_frame_size as usize;
        let mut rounds = self.resumable.len();
        while rounds > 0 {
            rounds -= 1;
            let Some(stream_id) = self.resumable.pop_front() else { break };
            let Some(stream) = self.streams.get_mut(&stream_id) else { continue };
            while let Some(chunk) = stream.pending_writes.front() {
                let available = self.send_window.available().min(stream.send_window.available()).max(0) as usize;
                if chunk.is_empty() {
                    // end-of-stream sentinel
                    let frame_flags = frame::flags::END_STREAM;
                    self.outbox.extend_from_slice(&encode_frame(FrameType::Data, frame_flags, stream_id, &[]));
                    let _ = stream.apply(Event::SendData { end_stream: true });
                    stream.pending_writes.pop_front();
                    continue;
                }
                if available == 0 {
                    self.resumable.push_back(stream_id);
                    break;
                }
                let take = available.min(max_frame_size).min(chunk.len());
                let piece = chunk[..take].to_vec();
                self.send_window.consume(take as u32);
                stream.send_window.consume(take as u32);
                self.outbox.extend_from_slice(&encode_frame(FrameType::Data, 0, stream_id, &piece));
                let front = stream.pending_writes.front_mut().expect("checked above");
                front.drain(..take);
                if front.is_empty() {
                    stream.pending_writes.pop_front();
                }
            }
        }
    }

    fn send_goaway(&mut self, error: &H2Error) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&(self.highest_peer_stream_id & 0x7fff_ffff).to_be_bytes());
        payload.extend_from_slice(&error.code().to_be_bytes());
        self.outbox.extend_from_slice(&encode_frame(FrameType::GoAway, 0, 0, &payload));
    }

    #[must_use]
    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(|s| s.state)
    }

    /// Borrow a [`ResponseSink`] for `stream_id`.
    pub fn response_sink(&mut self, stream_id: u32) -> StreamHandle<'_> {
        StreamHandle { conn: self, stream_id, headers_sent: false }
    }
}

/// A [`ResponseSink`] bound to one stream of a [`Connection`]; response
/// headers are buffered until `start_body` or `complete` so a no-body
/// response can still send `END_STREAM` on the HEADERS frame itself.
pub struct StreamHandle<'a> {
    conn: &'a mut Connection,
    stream_id: u32,
    headers_sent: bool,
}

impl crate::contract::ResponseSink for StreamHandle<'_> {
    type Error = H2Error;

    fn set_headers(&mut self, headers: HeaderList) -> Result<(), H2Error> {
        self.conn.send_headers(self.stream_id, &headers, false)?;
        self.headers_sent = true;
        Ok(())
    }

    fn start_body(&mut self) -> Result<(), H2Error> {
        if !self.headers_sent {
            return Err(H2Error::InternalError("start_body before set_headers".into()));
        }
        Ok(())
    }

    fn write_body_chunk(&mut self, chunk: Vec<u8>) -> Result<(), H2Error> {
        self.conn.send_data(self.stream_id, &chunk, false)
    }

    fn end_body(&mut self) -> Result<(), H2Error> {
        self.conn.send_data(self.stream_id, &[], true)
    }

    fn complete(&mut self) -> Result<(), H2Error> {
        Ok(())
    }

    fn would_block(&self) -> bool {
        self.conn
            .streams
            .get(&self.stream_id)
            .is_some_and(|s| s.send_window.available() <= 0 || self.conn.send_window.available() <= 0)
    }

    fn push_promise(&mut self, _headers: HeaderList) -> Result<bool, H2Error> {
        if !self.conn.peer_settings.enable_push {
            return Ok(false);
        }
        // Push-stream allocation and PUSH_PROMISE framing is not wired
        // up yet; report unsupported rather than half-implement it.
        Ok(false)
    }

    fn cancel(&mut self, _reason: &str) -> Result<(), H2Error> {
        let frame = encode_frame(FrameType::RstStream, 0, self.stream_id, &H2Error::Cancel.code().to_be_bytes());
        self.conn.outbox.extend_from_slice(&frame);
        if let Some(stream) = self.conn.streams.get_mut(&self.stream_id) {
            let _ = stream.apply(Event::SendRstStream);
        }
        Ok(())
    }
}

fn parse_window_update(payload: &[u8]) -> Result<u32, H2Error> {
    if payload.len() != 4 {
        return Err(H2Error::FrameSizeError);
    }
    Ok(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff)
}

fn parse_goaway(payload: &[u8]) -> Result<(u32, u32), H2Error> {
    if payload.len() < 8 {
        return Err(H2Error::FrameSizeError);
    }
    let last_stream_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Ok((last_stream_id, code))
}

fn error_from_code(code: u32) -> H2Error {
    match code {
        0x3 => H2Error::FlowControlError,
        0x6 => H2Error::FrameSizeError,
        0x7 => H2Error::RefusedStream,
        0x8 => H2Error::Cancel,
        0x9 => H2Error::HeaderListTooLarge,
        0x5 => H2Error::StreamClosed,
        _ => H2Error::ProtocolError(format!("peer GOAWAY code {code}")),
    }
}
