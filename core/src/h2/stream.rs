//! HTTP/2 stream lifecycle state machine (RFC 7540 §5.1).

use crate::h2::flow::{ReceiveAccountant, Window};
use crate::h2::H2Error;
use crate::headers::HeaderList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// What triggered a state transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SendHeaders { end_stream: bool },
    RecvHeaders { end_stream: bool },
    SendData { end_stream: bool },
    RecvData { end_stream: bool },
    SendRstStream,
    RecvRstStream,
    SendPushPromise,
    RecvPushPromise,
}

#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    pub send_window: Window,
    pub recv_window: Window,
    pub recv_accountant: ReceiveAccountant,
    pub request_headers: HeaderList,
    pub response_headers: HeaderList,
    /// DATA frames buffered because the send or connection window was
    /// exhausted when the application produced them; flushed in order
    /// once window becomes available.
    pub pending_writes: std::collections::VecDeque<Vec<u8>>,
}

impl Stream {
    #[must_use]
    pub fn new(id: u32, initial_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: Window::new(initial_window),
            recv_window: Window::new(initial_window),
            recv_accountant: ReceiveAccountant::new(initial_window),
            request_headers: HeaderList::new(),
            response_headers: HeaderList::new(),
            pending_writes: std::collections::VecDeque::new(),
        }
    }

    /// Advance the state machine, rejecting frames illegal in the
    /// current state (RFC 7540 §5.1 transition table).
    pub fn apply(&mut self, event: Event) -> Result<(), H2Error> {
        use StreamState::*;
        self.state = match (self.state, event) {
            (Idle, Event::RecvHeaders { end_stream: false }) => Open,
            (Idle, Event::RecvHeaders { end_stream: true }) => HalfClosedRemote,
            (Idle, Event::SendHeaders { end_stream: false }) => Open,
            (Idle, Event::SendHeaders { end_stream: true }) => HalfClosedLocal,
            (Idle, Event::RecvPushPromise) => ReservedRemote,
            (Idle, Event::SendPushPromise) => ReservedLocal,

            (ReservedLocal, Event::SendHeaders { .. }) => HalfClosedRemote,
            (ReservedRemote, Event::RecvHeaders { .. }) => HalfClosedLocal,

            (Open, Event::RecvData { end_stream: true } | Event::RecvHeaders { end_stream: true }) => {
                HalfClosedRemote
            }
            (Open, Event::SendData { end_stream: true } | Event::SendHeaders { end_stream: true }) => {
                HalfClosedLocal
            }
            (Open, Event::RecvData { end_stream: false } | Event::RecvHeaders { end_stream: false }) => Open,
            (Open, Event::SendData { end_stream: false } | Event::SendHeaders { end_stream: false }) => Open,

            (HalfClosedLocal, Event::RecvData { end_stream: true } | Event::RecvHeaders { end_stream: true }) => {
                Closed
            }
            (HalfClosedLocal, Event::RecvData { end_stream: false } | Event::RecvHeaders { end_stream: false }) => {
                HalfClosedLocal
            }

            (HalfClosedRemote, Event::SendData { end_stream: true } | Event::SendHeaders { end_stream: true }) => {
                Closed
            }
            (HalfClosedRemote, Event::SendData { end_stream: false } | Event::SendHeaders { end_stream: false }) => {
                HalfClosedRemote
            }

            (_, Event::SendRstStream | Event::RecvRstStream) => Closed,

            (state, event) => {
                return Err(H2Error::ProtocolError(format!("illegal event {event:?} in state {state:?}")))
            }
        };
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_scenario_transitions_through_full_lifecycle() {
        let mut stream = Stream::new(1, 65535);
        stream.apply(Event::RecvHeaders { end_stream: false }).unwrap();
        assert_eq!(stream.state, StreamState::Open);
        stream.apply(Event::RecvData { end_stream: true }).unwrap();
        assert_eq!(stream.state, StreamState::HalfClosedRemote);
        stream.apply(Event::SendHeaders { end_stream: false }).unwrap();
        assert_eq!(stream.state, StreamState::HalfClosedRemote);
        stream.apply(Event::SendData { end_stream: true }).unwrap();
        assert_eq!(stream.state, StreamState::Closed);
    }

    #[test]
    fn data_after_close_is_rejected() {
        let mut stream = Stream::new(1, 65535);
        stream.apply(Event::RecvRstStream).unwrap();
        assert!(stream.apply(Event::RecvData { end_stream: false }).is_err());
    }

    #[test]
    fn no_body_request_closes_remote_immediately() {
        let mut stream = Stream::new(1, 65535);
        stream.apply(Event::RecvHeaders { end_stream: true }).unwrap();
        assert_eq!(stream.state, StreamState::HalfClosedRemote);
    }
}
