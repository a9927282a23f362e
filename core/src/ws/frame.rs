//! WebSocket frame layout (RFC 6455 §5.2): FIN/RSV/opcode byte,
//! MASK + 7/16/64-bit length, optional masking key, masked payload.

use rand::RngCore;

use crate::ws::WsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_nibble(b: u8) -> Result<Self, WsError> {
        Ok(match b {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => return Err(WsError::ProtocolError(format!("reserved opcode {other:#x}"))),
        })
    }

    fn to_nibble(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self { fin: true, opcode: Opcode::Text, payload: s.into().into_bytes() }
    }

    #[must_use]
    pub fn binary(payload: Vec<u8>) -> Self {
        Self { fin: true, opcode: Opcode::Binary, payload }
    }

    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self { fin: true, opcode: Opcode::Close, payload }
    }

    #[must_use]
    pub fn ping(payload: Vec<u8>) -> Self {
        Self { fin: true, opcode: Opcode::Ping, payload }
    }

    #[must_use]
    pub fn pong(payload: Vec<u8>) -> Self {
        Self { fin: true, opcode: Opcode::Pong, payload }
    }

    pub fn close_parts(&self) -> Result<Option<(u16, &str)>, WsError> {
        if self.payload.is_empty() {
            return Ok(None);
        }
        if self.payload.len() < 2 {
            return Err(WsError::ProtocolError("close frame payload shorter than 2 bytes".into()));
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = std::str::from_utf8(&self.payload[2..]).map_err(|_| WsError::InvalidUtf8)?;
        Ok(Some((code, reason)))
    }

    /// Serialize, masking the payload with a freshly generated key when
    /// `mask` is true (required for client-to-server frames; the server
    /// must send unmasked frames per RFC 6455 §5.1).
    #[must_use]
    pub fn encode(&self, mask: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 14);
        let first = (u8::from(self.fin) << 7) | self.opcode.to_nibble();
        out.push(first);

        let len = self.payload.len();
        let mask_bit = u8::from(mask) << 7;
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if mask {
            let mut key = [0u8; 4];
            rand::rngs::OsRng.fill_bytes(&mut key);
            out.extend_from_slice(&key);
            out.extend(self.payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        } else {
            out.extend_from_slice(&self.payload);
        }
        out
    }
}

/// Parses frames out of a byte stream, tracking whether the peer side
/// must mask (servers require masked client frames, and vice versa).
pub struct FrameParser {
    buf: Vec<u8>,
    pos: usize,
    require_masked: bool,
    max_payload: usize,
}

impl FrameParser {
    #[must_use]
    pub fn new(require_masked: bool, max_payload: usize) -> Self {
        Self { buf: Vec::new(), pos: 0, require_masked, max_payload }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn poll(&mut self) -> Result<Option<Frame>, WsError> {
        let remaining = &self.buf[self.pos..];
        if remaining.len() < 2 {
            self.compact();
            return Ok(None);
        }
        let first = remaining[0];
        let second = remaining[1];
        let fin = first & 0x80 != 0;
        let rsv = first & 0x70;
        if rsv != 0 {
            return Err(WsError::ProtocolError("reserved bits set without an extension".into()));
        }
        let opcode = Opcode::from_nibble(first & 0x0f)?;
        let masked = second & 0x80 != 0;
        if masked != self.require_masked {
            return Err(WsError::MaskingViolation);
        }
        let len7 = second & 0x7f;

        let mut cursor = 2usize;
        let payload_len: usize = if len7 < 126 {
            len7 as usize
        } else if len7 == 126 {
            if remaining.len() < cursor + 2 {
                self.compact();
                return Ok(None);
            }
            let len = u16::from_be_bytes([remaining[cursor], remaining[cursor + 1]]) as usize;
            cursor += 2;
            len
        } else {
            if remaining.len() < cursor + 8 {
                self.compact();
                return Ok(None);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&remaining[cursor..cursor + 8]);
            cursor += 8;
            let len = u64::from_be_bytes(bytes);
            if len & (1 << 63) != 0 {
                return Err(WsError::ProtocolError("length64 high bit must be zero".into()));
            }
            len as usize
        };

        if opcode.is_control() && (!fin || payload_len > 125) {
            return Err(WsError::ControlFrameTooLarge);
        }
        if payload_len > self.max_payload {
            return Err(WsError::MessageTooLarge);
        }

        let mask_key_len = if masked { 4 } else { 0 };
        let total = cursor + mask_key_len + payload_len;
        if remaining.len() < total {
            self.compact();
            return Ok(None);
        }

        let mut payload = remaining[cursor + mask_key_len..total].to_vec();
        if masked {
            let key = [
                remaining[cursor],
                remaining[cursor + 1],
                remaining[cursor + 2],
                remaining[cursor + 3],
            ];
            for (i, b) in payload.iter_mut().enumerate() {
                *b ^= key[i % 4];
            }
        }

        self.pos += total;
        self.compact();
        Ok(Some(Frame { fin, opcode, payload }))
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_unmasked_text() {
        let frame = Frame::text("hello");
        let encoded = frame.encode(false);
        let mut parser = FrameParser::new(false, 1 << 20);
        parser.feed(&encoded);
        let decoded = parser.poll().unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn rfc6455_masked_client_frame_example() {
        // RFC 6455 §5.7 example: "Hello" masked with key 0x37fa213d.
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let payload = b"Hello";
        let masked_payload: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]).collect();
        let mut wire = vec![0x81, 0x85];
        wire.extend_from_slice(&key);
        wire.extend_from_slice(&masked_payload);

        let mut parser = FrameParser::new(true, 1 << 20);
        parser.feed(&wire);
        let frame = parser.poll().unwrap().unwrap();
        assert_eq!(frame.payload, payload);
        assert_eq!(frame.opcode, Opcode::Text);
        assert!(frame.fin);
    }

    #[test]
    fn unmasked_client_frame_is_a_masking_violation() {
        let frame = Frame::text("hi");
        let encoded = frame.encode(false);
        let mut parser = FrameParser::new(true, 1 << 20);
        parser.feed(&encoded);
        assert!(matches!(parser.poll(), Err(WsError::MaskingViolation)));
    }

    #[test]
    fn oversized_control_frame_is_rejected() {
        let mut wire = vec![0x89, 126, 0, 200]; // PING, len 200
        wire.extend(std::iter::repeat(0u8).take(200));
        let mut parser = FrameParser::new(false, 1 << 20);
        parser.feed(&wire);
        assert!(matches!(parser.poll(), Err(WsError::ControlFrameTooLarge)));
    }

    #[test]
    fn long_length16_roundtrip() {
        let payload = vec![7u8; 1000];
        let frame = Frame::binary(payload.clone());
        let encoded = frame.encode(false);
        let mut parser = FrameParser::new(false, 1 << 20);
        parser.feed(&encoded);
        let decoded = parser.poll().unwrap().unwrap();
        assert_eq!(decoded.payload, payload);
    }
}
