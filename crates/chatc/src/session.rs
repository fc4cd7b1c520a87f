use crate::channel::{Channel, ChannelEvent};
use crate::error::ChatError;
use chat_common::envelope::{self, DecodeError, Envelope};
use std::fmt;
use tracing::{debug, info, warn};

/// Lifecycle of one connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection attempt yet.
    Idle,
    /// Connection attempt in progress.
    Connecting,
    /// Handshake done; frames flow both ways.
    Open,
    /// Terminated, gracefully or not. Build a new session to reconnect.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The relay closed the link.
    Remote {
        /// Close code, if any was sent.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The transport failed.
    Error(String),
    /// `close()` was called locally.
    Local,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { code: Some(code), reason } if !reason.is_empty() => {
                write!(f, "closed by server ({code}: {reason})")
            }
            Self::Remote { code: Some(code), .. } => write!(f, "closed by server ({code})"),
            Self::Remote { .. } => f.write_str("closed by server"),
            Self::Error(e) => write!(f, "connection error: {e}"),
            Self::Local => f.write_str("closed locally"),
        }
    }
}

/// Typed event produced from one channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// This client's own link is open. Distinct from peer join envelopes.
    Connected,
    /// A decoded envelope from the relay.
    Envelope(Envelope),
    /// A frame that failed to decode; it was dropped.
    Malformed(DecodeError),
    /// This client's own link is gone.
    Disconnected(DisconnectCause),
}

/// Owns one channel and its lifecycle state.
#[derive(Debug)]
pub struct Session<C> {
    channel: C,
    url: String,
    state: SessionState,
    frames_received: u64,
    frames_dropped: u64,
}

impl<C: Channel> Session<C> {
    /// Creates an idle session that will connect to `url` on [`Session::start`].
    pub fn new(channel: C, url: impl Into<String>) -> Self {
        Self {
            channel,
            url: url.into(),
            state: SessionState::Idle,
            frames_received: 0,
            frames_dropped: 0,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of frames decoded successfully.
    pub const fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Number of frames dropped, either malformed or received before the link opened.
    pub const fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Shared access to the underlying channel.
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Exclusive access to the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state change");
        self.state = next;
    }

    /// Begins connecting. Only valid from `Idle`.
    ///
    /// On [`ChatError::Channel`] the session is already `Closed`.
    pub fn start(&mut self) -> Result<(), ChatError> {
        if self.state != SessionState::Idle {
            return Err(ChatError::InvalidState {
                op: "start",
                state: self.state,
            });
        }
        self.transition(SessionState::Connecting);
        info!(url = %self.url, "connecting");
        if let Err(e) = self.channel.open(&self.url) {
            warn!(error = %e, "channel open failed");
            self.transition(SessionState::Closed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Hands `text` to the channel. Only valid while `Open`; blank text is
    /// rejected without touching the channel.
    ///
    /// On [`ChatError::Channel`] the session is already `Closed`.
    pub fn send(&mut self, text: &str) -> Result<(), ChatError> {
        if self.state != SessionState::Open {
            return Err(ChatError::NotConnected);
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if let Err(e) = self.channel.transmit(&envelope::encode(text)) {
            warn!(error = %e, "transmit failed");
            self.channel.close();
            self.transition(SessionState::Closed);
            return Err(e.into());
        }
        debug!(len = text.len(), "message handed to channel");
        Ok(())
    }

    /// Closes the link. Valid from `Connecting` or `Open`.
    ///
    /// In-flight sends are not guaranteed to be flushed, and no event
    /// produced after this call is delivered.
    pub fn close(&mut self) -> Result<DisconnectCause, ChatError> {
        match self.state {
            SessionState::Connecting | SessionState::Open => {
                self.channel.close();
                self.transition(SessionState::Closed);
                info!("session closed locally");
                Ok(DisconnectCause::Local)
            }
            state => Err(ChatError::InvalidState { op: "close", state }),
        }
    }

    /// Applies one channel event to the state machine.
    ///
    /// Events that arrive while `Idle` or `Closed` are ignored.
    pub fn handle(&mut self, event: ChannelEvent) -> Option<SessionEvent> {
        match (self.state, event) {
            (SessionState::Idle | SessionState::Closed, event) => {
                debug!(state = %self.state, ?event, "ignoring channel event");
                None
            }
            (SessionState::Connecting, ChannelEvent::Opened) => {
                self.transition(SessionState::Open);
                info!(url = %self.url, "session open");
                Some(SessionEvent::Connected)
            }
            (SessionState::Open, ChannelEvent::Opened) => {
                debug!("duplicate open event ignored");
                None
            }
            (SessionState::Connecting, ChannelEvent::Message(_) | ChannelEvent::Binary(_)) => {
                self.frames_dropped += 1;
                warn!("dropping frame received before the link opened");
                None
            }
            (SessionState::Open, ChannelEvent::Message(raw)) => {
                Some(self.decoded(envelope::decode(&raw)))
            }
            (SessionState::Open, ChannelEvent::Binary(raw)) => {
                Some(self.decoded(envelope::decode_bytes(&raw)))
            }
            (_, ChannelEvent::Closed { code, reason }) => {
                self.transition(SessionState::Closed);
                info!(?code, reason = %reason, "connection closed by server");
                Some(SessionEvent::Disconnected(DisconnectCause::Remote {
                    code,
                    reason,
                }))
            }
            (_, ChannelEvent::Error(e)) => {
                self.transition(SessionState::Closed);
                warn!(error = %e, "connection lost");
                Some(SessionEvent::Disconnected(DisconnectCause::Error(e)))
            }
        }
    }

    fn decoded(&mut self, result: Result<Envelope, DecodeError>) -> SessionEvent {
        match result {
            Ok(env) => {
                self.frames_received += 1;
                debug!(kind = %env.kind, from = %env.from, "frame received");
                SessionEvent::Envelope(env)
            }
            Err(e) => {
                self.frames_dropped += 1;
                warn!(error = %e, "dropping malformed frame");
                SessionEvent::Malformed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mock::MockChannel;
    use crate::channel::ChannelError;
    use chat_common::MessageType;

    const URL: &str = "ws://relay.test/ws/user/me";

    fn open_session() -> (Session<MockChannel>, MockChannel) {
        let channel = MockChannel::default();
        let mut session = Session::new(channel.clone(), URL);
        session.start().unwrap();
        assert_eq!(session.handle(ChannelEvent::Opened), Some(SessionEvent::Connected));
        (session, channel)
    }

    #[test]
    fn start_moves_idle_to_connecting_and_opens_channel() {
        let channel = MockChannel::default();
        let mut session = Session::new(channel.clone(), URL);
        assert_eq!(session.state(), SessionState::Idle);

        session.start().unwrap();

        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(channel.log.borrow().opened, vec![URL.to_string()]);
    }

    #[test]
    fn start_twice_is_invalid_state() {
        let (mut session, channel) = open_session();
        assert_eq!(
            session.start(),
            Err(ChatError::InvalidState {
                op: "start",
                state: SessionState::Open
            })
        );
        assert_eq!(channel.log.borrow().opened.len(), 1);
    }

    #[test]
    fn failed_open_closes_session() {
        let channel = MockChannel::default();
        channel.log.borrow_mut().fail_open = true;
        let mut session = Session::new(channel, URL);

        assert!(matches!(session.start(), Err(ChatError::Channel(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn send_requires_open_state() {
        let channel = MockChannel::default();
        let mut session = Session::new(channel.clone(), URL);
        assert_eq!(session.send("hi"), Err(ChatError::NotConnected));

        session.start().unwrap();
        assert_eq!(session.send("hi"), Err(ChatError::NotConnected));
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn blank_text_is_never_transmitted() {
        let (mut session, channel) = open_session();
        for text in ["", "   ", "\t\n"] {
            assert_eq!(session.send(text), Err(ChatError::EmptyMessage));
        }
        assert!(channel.sent().is_empty());
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn send_transmits_raw_text() {
        let (mut session, channel) = open_session();
        session.send(" yo ").unwrap();
        assert_eq!(channel.sent(), vec![" yo ".to_string()]);
    }

    #[test]
    fn transmit_failure_closes_session() {
        let (mut session, channel) = open_session();
        channel.log.borrow_mut().fail_transmit = true;

        assert_eq!(
            session.send("hi"),
            Err(ChatError::Channel(ChannelError::Closed))
        );
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.send("hi"), Err(ChatError::NotConnected));
    }

    #[test]
    fn inbound_frame_decodes_to_envelope() {
        let (mut session, _) = open_session();
        let event = session.handle(ChannelEvent::Message(
            r#"{"type":1,"from":"alice","data":"hi"}"#.to_string(),
        ));
        assert_eq!(
            event,
            Some(SessionEvent::Envelope(Envelope::text("alice", "hi")))
        );
        assert_eq!(session.frames_received(), 1);
    }

    #[test]
    fn binary_frame_with_json_decodes() {
        let (mut session, _) = open_session();
        let event = session.handle(ChannelEvent::Binary(
            br#"{"type":-1,"from":"bob"}"#.to_vec(),
        ));
        assert_eq!(event, Some(SessionEvent::Envelope(Envelope::joined("bob"))));
    }

    #[test]
    fn malformed_frame_is_reported_and_session_stays_open() {
        let (mut session, _) = open_session();
        let event = session.handle(ChannelEvent::Message("not json".to_string()));
        assert!(matches!(
            event,
            Some(SessionEvent::Malformed(DecodeError::Malformed(_)))
        ));
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.frames_dropped(), 1);

        let event = session.handle(ChannelEvent::Message(
            r#"{"type":42,"from":"x"}"#.to_string(),
        ));
        assert!(matches!(
            event,
            Some(SessionEvent::Envelope(Envelope {
                kind: MessageType::Unsupported(42),
                ..
            }))
        ));
    }

    #[test]
    fn remote_close_is_terminal() {
        let (mut session, _) = open_session();
        let event = session.handle(ChannelEvent::Closed {
            code: Some(1000),
            reason: "bye".to_string(),
        });
        assert_eq!(
            event,
            Some(SessionEvent::Disconnected(DisconnectCause::Remote {
                code: Some(1000),
                reason: "bye".to_string()
            }))
        );
        assert_eq!(session.state(), SessionState::Closed);

        // Nothing revives a closed session.
        assert_eq!(session.handle(ChannelEvent::Opened), None);
        assert_eq!(
            session.handle(ChannelEvent::Message(
                r#"{"type":1,"from":"a","data":"b"}"#.to_string()
            )),
            None
        );
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.start(),
            Err(ChatError::InvalidState { op: "start", .. })
        ));
    }

    #[test]
    fn error_while_connecting_closes() {
        let channel = MockChannel::default();
        let mut session = Session::new(channel, URL);
        session.start().unwrap();

        let event = session.handle(ChannelEvent::Error("refused".to_string()));
        assert_eq!(
            event,
            Some(SessionEvent::Disconnected(DisconnectCause::Error(
                "refused".to_string()
            )))
        );
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn frame_before_open_is_counted_as_dropped() {
        let channel = MockChannel::default();
        let mut session = Session::new(channel, URL);
        session.start().unwrap();

        let frame = chat_common::Envelope::text("alice", "early").to_wire();
        assert_eq!(session.handle(ChannelEvent::Message(frame)), None);
        assert_eq!(session.handle(ChannelEvent::Binary(b"{}".to_vec())), None);

        assert_eq!(session.frames_dropped(), 2);
        assert_eq!(session.frames_received(), 0);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn events_before_start_are_ignored() {
        let mut session = Session::new(MockChannel::default(), URL);
        assert_eq!(session.handle(ChannelEvent::Opened), None);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn close_from_open_and_then_invalid() {
        let (mut session, channel) = open_session();
        assert_eq!(session.close(), Ok(DisconnectCause::Local));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(channel.log.borrow().closes, 1);

        assert!(matches!(
            session.close(),
            Err(ChatError::InvalidState { op: "close", .. })
        ));
    }

    #[test]
    fn close_from_idle_is_invalid() {
        let mut session = Session::new(MockChannel::default(), URL);
        assert_eq!(
            session.close(),
            Err(ChatError::InvalidState {
                op: "close",
                state: SessionState::Idle
            })
        );
    }

    #[test]
    fn disconnect_cause_display() {
        let cause = DisconnectCause::Remote {
            code: Some(1001),
            reason: "going away".to_string(),
        };
        assert_eq!(cause.to_string(), "closed by server (1001: going away)");
        assert_eq!(
            DisconnectCause::Error("reset".to_string()).to_string(),
            "connection error: reset"
        );
    }
}
