use crate::channel::{Channel, ChannelEvent};
use crate::error::ChatError;
use crate::session::{DisconnectCause, Session, SessionEvent, SessionState};
use crate::transcript::{DisplayRecord, Transcript, TranscriptInput};
use chat_common::DecodeError;
use tracing::debug;

/// Event delivered to subscribers, synchronously and in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),
    /// A record was appended to the transcript.
    Record(DisplayRecord),
    /// An inbound frame was malformed and dropped.
    Dropped(DecodeError),
}

/// Handle returned by [`ChatClient::subscribe`]; pass it to
/// [`ChatClient::unsubscribe`] to stop receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener = Box<dyn FnMut(&ClientEvent)>;

/// Single object surface over one session and its transcript.
///
/// All channel events and user sends go through `&mut self`, so everything
/// happens on one logical execution context and listeners see events in
/// exactly the order they were processed.
pub struct ChatClient<C> {
    session: Session<C>,
    transcript: Transcript,
    identity: String,
    listeners: Vec<(Subscription, Listener)>,
    next_subscription: u64,
}

impl<C> std::fmt::Debug for ChatClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("identity", &self.identity)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<C: Channel> ChatClient<C> {
    /// Creates a client for `identity` that will connect to `url`.
    pub fn new(channel: C, url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::with_session(Session::new(channel, url), identity)
    }

    /// Creates a client around an already constructed session.
    pub fn with_session(session: Session<C>, identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self {
            session,
            transcript: Transcript::new(identity.clone()),
            identity,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Current session state.
    pub const fn current_state(&self) -> SessionState {
        self.session.state()
    }

    /// Local identity stamped on sent records.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Rendered transcript so far.
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Underlying session.
    pub const fn session(&self) -> &Session<C> {
        &self.session
    }

    /// Exclusive access to the channel, e.g. to await its shutdown.
    pub fn channel_mut(&mut self) -> &mut C {
        self.session.channel_mut()
    }

    /// Registers a listener for every subsequent [`ClientEvent`].
    pub fn subscribe(&mut self, listener: impl FnMut(&ClientEvent) + 'static) -> Subscription {
        let id = Subscription(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was already removed.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != subscription);
        self.listeners.len() != before
    }

    /// Starts connecting. Only valid once, from `Idle`.
    pub fn start(&mut self) -> Result<(), ChatError> {
        match self.session.start() {
            Ok(()) => {
                self.emit(&ClientEvent::StateChanged(SessionState::Connecting));
                Ok(())
            }
            Err(ChatError::Channel(e)) => {
                self.connection_lost(DisconnectCause::Error(e.to_string()));
                Err(ChatError::Channel(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Sends `text` and appends a `Sent` record once it is handed to the
    /// channel. Nothing waits for the relay to confirm delivery.
    pub fn send(&mut self, text: &str) -> Result<(), ChatError> {
        match self.session.send(text) {
            Ok(()) => {
                let record = self.transcript.apply(TranscriptInput::Sent(text.to_string()));
                self.emit(&ClientEvent::Record(record));
                Ok(())
            }
            Err(ChatError::Channel(e)) => {
                self.connection_lost(DisconnectCause::Error(e.to_string()));
                Err(ChatError::Channel(e))
            }
            Err(e) => {
                debug!(error = %e, "send rejected");
                Err(e)
            }
        }
    }

    /// Closes the session. Valid from `Connecting` or `Open`.
    pub fn close(&mut self) -> Result<(), ChatError> {
        let cause = self.session.close()?;
        self.connection_lost(cause);
        Ok(())
    }

    /// Routes one channel event through the session and transcript and
    /// notifies listeners.
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        let Some(event) = self.session.handle(event) else {
            return;
        };
        match event {
            SessionEvent::Connected => {
                self.emit(&ClientEvent::StateChanged(SessionState::Open));
            }
            SessionEvent::Envelope(env) => {
                let record = self.transcript.apply(TranscriptInput::Inbound(env));
                if record.kind().is_displayed() {
                    self.emit(&ClientEvent::Record(record));
                }
            }
            SessionEvent::Malformed(e) => self.emit(&ClientEvent::Dropped(e)),
            SessionEvent::Disconnected(cause) => self.connection_lost(cause),
        }
    }

    /// Processes the result of [`ChatClient::next_channel_event`].
    ///
    /// A channel that ends without reporting a close or error is treated as
    /// a lost link, so a live session still ends `Closed`.
    pub fn handle_next_event(&mut self, event: Option<ChannelEvent>) {
        let event = event.unwrap_or_else(|| {
            ChannelEvent::Error("channel ended without closing".to_string())
        });
        self.handle_channel_event(event);
    }

    /// Waits for the channel's next event without processing it.
    pub async fn next_channel_event(&mut self) -> Option<ChannelEvent> {
        self.session.channel_mut().next_event().await
    }

    /// Starts the session and processes events until it is `Open`.
    ///
    /// Returns [`ChatError::NotConnected`] if the link closes first.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        self.start()?;
        while self.current_state() == SessionState::Connecting {
            self.step().await;
        }
        match self.current_state() {
            SessionState::Open => Ok(()),
            _ => Err(ChatError::NotConnected),
        }
    }

    /// Processes channel events until the session is `Closed`.
    pub async fn run_until_closed(&mut self) {
        while matches!(
            self.current_state(),
            SessionState::Connecting | SessionState::Open
        ) {
            self.step().await;
        }
    }

    async fn step(&mut self) {
        let event = self.next_channel_event().await;
        self.handle_next_event(event);
    }

    fn connection_lost(&mut self, cause: DisconnectCause) {
        self.emit(&ClientEvent::StateChanged(SessionState::Closed));
        let record = self.transcript.apply(TranscriptInput::Lost(cause));
        self.emit(&ClientEvent::Record(record));
    }

    fn emit(&mut self, event: &ClientEvent) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }
}
