//! HTTP/2 SETTINGS frame payload: recognized parameters and their
//! defaults (RFC 7540 §6.5.2).

use crate::h2::frame::{encode_frame, flags, FrameType};
use crate::h2::H2Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65535,
            max_frame_size: 16384,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Apply a peer-sent SETTINGS payload on top of the current values,
    /// returning the previous `initial_window_size` (callers must
    /// retroactively adjust open streams' send windows by the delta,
    /// RFC 7540 §6.9.2).
    pub fn apply(&mut self, payload: &[u8]) -> Result<u32, H2Error> {
        if payload.len() % 6 != 0 {
            return Err(H2Error::FrameSizeError);
        }
        let previous_window = self.initial_window_size;
        for chunk in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            match id {
                0x1 => self.header_table_size = value,
                0x2 => {
                    if value > 1 {
                        return Err(H2Error::ProtocolError("SETTINGS_ENABLE_PUSH must be 0 or 1".into()));
                    }
                    self.enable_push = value == 1;
                }
                0x3 => self.max_concurrent_streams = Some(value),
                0x4 => {
                    if value > i32::MAX as u32 {
                        return Err(H2Error::FlowControlError);
                    }
                    self.initial_window_size = value;
                }
                0x5 => {
                    if !(16384..=crate::h2::frame::MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                        return Err(H2Error::ProtocolError("SETTINGS_MAX_FRAME_SIZE out of range".into()));
                    }
                    self.max_frame_size = value;
                }
                0x6 => self.max_header_list_size = Some(value),
                _ => {} // unknown parameter: ignored per RFC 7540 §6.5.2
            }
        }
        Ok(previous_window)
    }

    /// Encode as a SETTINGS frame payload (only parameters that differ
    /// from RFC 7540 defaults need to be sent, but sending all is also
    /// conformant and simpler to reason about).
    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_param(&mut out, 0x1, self.header_table_size);
        push_param(&mut out, 0x2, u32::from(self.enable_push));
        if let Some(max) = self.max_concurrent_streams {
            push_param(&mut out, 0x3, max);
        }
        push_param(&mut out, 0x4, self.initial_window_size);
        push_param(&mut out, 0x5, self.max_frame_size);
        if let Some(max) = self.max_header_list_size {
            push_param(&mut out, 0x6, max);
        }
        out
    }

    #[must_use]
    pub fn encode_frame(&self) -> Vec<u8> {
        encode_frame(FrameType::Settings, 0, 0, &self.encode_payload())
    }
}

fn push_param(out: &mut Vec<u8>, id: u16, value: u32) {
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&value.to_be_bytes());
}

/// The empty SETTINGS-ACK frame.
#[must_use]
pub fn encode_ack() -> Vec<u8> {
    encode_frame(FrameType::Settings, flags::ACK, 0, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rfc7540() {
        let settings = Settings::default();
        assert_eq!(settings.initial_window_size, 65535);
        assert_eq!(settings.max_frame_size, 16384);
    }

    #[test]
    fn apply_updates_recognized_parameters_and_ignores_unknown() {
        let mut settings = Settings::default();
        let mut payload = Vec::new();
        push_param(&mut payload, 0x4, 100);
        push_param(&mut payload, 0x99, 1); // unknown, ignored
        let previous = settings.apply(&payload).unwrap();
        assert_eq!(previous, 65535);
        assert_eq!(settings.initial_window_size, 100);
    }

    #[test]
    fn invalid_enable_push_value_is_rejected() {
        let mut settings = Settings::default();
        let mut payload = Vec::new();
        push_param(&mut payload, 0x2, 2);
        assert!(settings.apply(&payload).is_err());
    }
}
