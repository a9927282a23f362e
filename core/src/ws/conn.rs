//! WebSocket connection state: fragmentation reassembly and the close
//! handshake on top of the frame codec.

use crate::ws::frame::{FrameParser, Opcode};
use crate::ws::{Frame, WsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug)]
enum InProgress {
    None,
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

/// One decoded application-visible event.
#[derive(Debug)]
pub enum ConnectionEvent {
    Message(Frame),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// The peer initiated or echoed a close; `reply` carries the close
    /// frame the caller should send back, if the handshake isn't
    /// already complete.
    Close { code: u16, reason: String, reply: Option<Frame> },
}

pub struct Connection {
    parser: FrameParser,
    role: Role,
    fragment: InProgress,
    sent_close: bool,
    received_close: bool,
}

impl Connection {
    /// `role` is this side's role: a server requires masked incoming
    /// frames and must send unmasked frames, and vice versa for a
    /// client.
    #[must_use]
    pub fn new(role: Role, max_payload: usize) -> Self {
        let require_masked = matches!(role, Role::Server);
        Self {
            parser: FrameParser::new(require_masked, max_payload),
            role,
            fragment: InProgress::None,
            sent_close: false,
            received_close: false,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.parser.feed(data);
    }

    /// True once the close handshake finished in both directions.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sent_close && self.received_close
    }

    pub fn note_close_sent(&mut self) {
        self.sent_close = true;
    }

    pub fn poll(&mut self) -> Result<Option<ConnectionEvent>, WsError> {
        loop {
            let Some(frame) = self.parser.poll()? else { return Ok(None) };
            match frame.opcode {
                Opcode::Ping => return Ok(Some(ConnectionEvent::Ping(frame.payload))),
                Opcode::Pong => return Ok(Some(ConnectionEvent::Pong(frame.payload))),
                Opcode::Close => {
                    let already = self.received_close;
                    self.received_close = true;
                    let (code, reason) = match frame.close_parts()? {
                        Some((code, reason)) => (code, reason.to_string()),
                        None => (1005, String::new()),
                    };
                    let reply = if already { None } else { Some(Frame::close(code, &reason)) };
                    return Ok(Some(ConnectionEvent::Close { code, reason, reply }));
                }
                Opcode::Continuation => {
                    let buf = match &mut self.fragment {
                        InProgress::None => return Err(WsError::UnexpectedContinuation),
                        InProgress::Text(buf) | InProgress::Binary(buf) => buf,
                    };
                    buf.extend_from_slice(&frame.payload);
                    if frame.fin {
                        let message = match std::mem::replace(&mut self.fragment, InProgress::None) {
                            InProgress::Text(payload) => {
                                if std::str::from_utf8(&payload).is_err() {
                                    return Err(WsError::InvalidUtf8);
                                }
                                Frame { fin: true, opcode: Opcode::Text, payload }
                            }
                            InProgress::Binary(payload) => Frame { fin: true, opcode: Opcode::Binary, payload },
                            InProgress::None => unreachable!(),
                        };
                        return Ok(Some(ConnectionEvent::Message(message)));
                    }
                    // Not yet complete: keep accumulating.
                }
                Opcode::Text | Opcode::Binary => {
                    if !matches!(self.fragment, InProgress::None) {
                        return Err(WsError::ProtocolError(
                            "data frame received while a fragmented message is in progress".into(),
                        ));
                    }
                    if frame.fin {
                        if frame.opcode == Opcode::Text && std::str::from_utf8(&frame.payload).is_err() {
                            return Err(WsError::InvalidUtf8);
                        }
                        return Ok(Some(ConnectionEvent::Message(frame)));
                    }
                    self.fragment = match frame.opcode {
                        Opcode::Text => InProgress::Text(frame.payload),
                        Opcode::Binary => InProgress::Binary(frame.payload),
                        _ => unreachable!(),
                    };
                }
            }
        }
    }

    /// Encode a frame for the wire, masking iff this side's role
    /// requires masked outgoing frames (client → server).
    #[must_use]
    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        frame.encode(matches!(self.role, Role::Client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmented_text_message_reassembles() {
        let mut conn = Connection::new(Role::Server, 1 << 20);
        let first = Frame { fin: false, opcode: Opcode::Text, payload: b"Hel".to_vec() };
        let second = Frame { fin: true, opcode: Opcode::Continuation, payload: b"lo".to_vec() };
        conn.feed(&first.encode(true));
        assert!(conn.poll().unwrap().is_none());
        conn.feed(&second.encode(true));
        let event = conn.poll().unwrap().unwrap();
        match event {
            ConnectionEvent::Message(frame) => assert_eq!(frame.payload, b"Hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn close_is_echoed_on_first_receipt() {
        let mut conn = Connection::new(Role::Server, 1 << 20);
        let close = Frame::close(1000, "bye");
        conn.feed(&close.encode(true));
        let event = conn.poll().unwrap().unwrap();
        match event {
            ConnectionEvent::Close { code, reply, .. } => {
                assert_eq!(code, 1000);
                assert!(reply.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn continuation_without_in_progress_message_is_rejected() {
        let mut conn = Connection::new(Role::Server, 1 << 20);
        let frame = Frame { fin: true, opcode: Opcode::Continuation, payload: vec![] };
        conn.feed(&frame.encode(true));
        assert!(matches!(conn.poll(), Err(WsError::UnexpectedContinuation)));
    }

    #[test]
    fn ping_between_fragments_is_allowed() {
        let mut conn = Connection::new(Role::Server, 1 << 20);
        let first = Frame { fin: false, opcode: Opcode::Text, payload: b"a".to_vec() };
        let ping = Frame::ping(vec![1, 2, 3]);
        conn.feed(&first.encode(true));
        assert!(conn.poll().unwrap().is_none());
        conn.feed(&ping.encode(true));
        assert!(matches!(conn.poll().unwrap(), Some(ConnectionEvent::Ping(_))));
        let second = Frame { fin: true, opcode: Opcode::Continuation, payload: b"b".to_vec() };
        conn.feed(&second.encode(true));
        assert!(matches!(conn.poll().unwrap(), Some(ConnectionEvent::Message(_))));
    }
}
