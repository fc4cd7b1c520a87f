use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Low-level event surfaced by a [`Channel`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The handshake completed; the link is usable.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// A binary frame arrived.
    Binary(Vec<u8>),
    /// The peer closed the link.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The link failed.
    Error(String),
}

/// Errors returned synchronously by [`Channel`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The target URL cannot be turned into a WebSocket request.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// `open` was called on a channel that was already opened.
    #[error("channel already opened")]
    AlreadyOpened,
    /// The channel was never opened.
    #[error("channel not opened")]
    NotOpened,
    /// The connection is gone; nothing can be handed to it anymore.
    #[error("channel closed")]
    Closed,
}

/// Bidirectional message transport the session drives.
///
/// Implementations must surface events from [`Channel::next_event`] in the
/// order the transport produced them, and `transmit` must hand the payload
/// off without waiting for network delivery.
#[allow(async_fn_in_trait)]
pub trait Channel {
    /// Begins connecting to `url`. Completion is reported as
    /// [`ChannelEvent::Opened`] or [`ChannelEvent::Error`].
    fn open(&mut self, url: &str) -> Result<(), ChannelError>;

    /// Queues one text frame for transmission.
    fn transmit(&mut self, text: &str) -> Result<(), ChannelError>;

    /// Starts closing the link. No further events need to be delivered.
    fn close(&mut self);

    /// Waits for the next event. Returns `None` once the channel is exhausted.
    async fn next_event(&mut self) -> Option<ChannelEvent>;
}

#[derive(Debug)]
enum Command {
    Text(String),
    Close,
}

/// [`Channel`] backed by a `tokio-tungstenite` WebSocket.
///
/// The socket is owned by a background task; `transmit` pushes onto an
/// unbounded queue and returns immediately. Must be opened from within a
/// tokio runtime.
#[derive(Debug)]
pub struct WsChannel {
    keepalive: Duration,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    events_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    task: Option<JoinHandle<()>>,
}

impl WsChannel {
    /// Creates an unopened channel that pings the server every `keepalive`.
    /// A zero interval disables keepalive pings.
    #[must_use]
    pub const fn new(keepalive: Duration) -> Self {
        Self {
            keepalive,
            cmd_tx: None,
            events_rx: None,
            task: None,
        }
    }

    /// Waits for the background connection task to finish.
    ///
    /// Call after [`Channel::close`] to let queued frames and the close
    /// handshake reach the socket before the runtime shuts down.
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "connection task ended abnormally");
            }
        }
    }
}

impl Channel for WsChannel {
    fn open(&mut self, url: &str) -> Result<(), ChannelError> {
        if self.task.is_some() || self.events_rx.is_some() {
            return Err(ChannelError::AlreadyOpened);
        }
        let request = url
            .into_client_request()
            .map_err(|e| ChannelError::InvalidUrl(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.task = Some(tokio::spawn(run_connection(
            request,
            self.keepalive,
            cmd_rx,
            events_tx,
        )));
        self.cmd_tx = Some(cmd_tx);
        self.events_rx = Some(events_rx);
        Ok(())
    }

    fn transmit(&mut self, text: &str) -> Result<(), ChannelError> {
        let tx = self.cmd_tx.as_ref().ok_or(ChannelError::NotOpened)?;
        tx.send(Command::Text(text.to_string()))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            // The task may already be gone; there is nothing left to close then.
            let _ = tx.send(Command::Close);
        }
    }

    async fn next_event(&mut self) -> Option<ChannelEvent> {
        match self.events_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

async fn run_connection(
    request: Request,
    keepalive: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    let target = request.uri().to_string();
    let ws = match tokio_tungstenite::connect_async(request).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(error = %e, url = %target, "websocket connect failed");
            let _ = events_tx.send(ChannelEvent::Error(e.to_string()));
            return;
        }
    };
    info!(url = %target, "websocket connected");
    if events_tx.send(ChannelEvent::Opened).is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws.split();
    if let Some(last) = pump(&mut ws_tx, &mut ws_rx, &mut cmd_rx, &events_tx, keepalive).await {
        debug!(event = ?last, "websocket finished");
        let _ = events_tx.send(last);
    }
}

/// Moves frames between the socket and the queues until the link ends.
///
/// Returns the terminal event to report, or `None` when the close was
/// requested locally.
async fn pump<S>(
    ws_tx: &mut SplitSink<WebSocketStream<S>, Message>,
    ws_rx: &mut SplitStream<WebSocketStream<S>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events_tx: &mpsc::UnboundedSender<ChannelEvent>,
    keepalive: Duration,
) -> Option<ChannelEvent>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping_interval = if keepalive.is_zero() {
        None
    } else {
        let mut interval = tokio::time::interval(keepalive);
        // The first tick fires immediately; skip it so the first ping waits a full period.
        interval.tick().await;
        Some(interval)
    };

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Some(ChannelEvent::Error(e.to_string())),
                    None => {
                        return Some(ChannelEvent::Closed { code: None, reason: String::new() })
                    }
                };
                match msg {
                    Message::Text(text) => {
                        if events_tx.send(ChannelEvent::Message(text)).is_err() {
                            return None;
                        }
                    }
                    Message::Binary(data) => {
                        if events_tx.send(ChannelEvent::Binary(data)).is_err() {
                            return None;
                        }
                    }
                    Message::Ping(data) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            return Some(ChannelEvent::Error(e.to_string()));
                        }
                    }
                    Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                            .unwrap_or_default();
                        return Some(ChannelEvent::Closed { code, reason });
                    }
                    Message::Pong(_) => debug!("pong received"),
                    Message::Frame(_) => {}
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Text(text)) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            return Some(ChannelEvent::Error(e.to_string()));
                        }
                    }
                    Some(Command::Close) | None => {
                        if let Err(e) = ws_tx.send(Message::Close(None)).await {
                            debug!(error = %e, "close frame not sent");
                        }
                        return None;
                    }
                }
            }

            () = next_ping(&mut ping_interval) => {
                if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                    return Some(ChannelEvent::Error(e.to_string()));
                }
            }
        }
    }
}

async fn next_ping(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{Channel, ChannelError, ChannelEvent};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// What a [`MockChannel`] was asked to do, shared with the test.
    #[derive(Debug, Default)]
    pub(crate) struct MockLog {
        pub(crate) opened: Vec<String>,
        pub(crate) sent: Vec<String>,
        pub(crate) closes: usize,
        pub(crate) fail_open: bool,
        pub(crate) fail_transmit: bool,
        pub(crate) events: VecDeque<ChannelEvent>,
    }

    #[derive(Debug, Default, Clone)]
    pub(crate) struct MockChannel {
        pub(crate) log: Rc<RefCell<MockLog>>,
    }

    impl MockChannel {
        pub(crate) fn push(&self, event: ChannelEvent) {
            self.log.borrow_mut().events.push_back(event);
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.log.borrow().sent.clone()
        }
    }

    impl Channel for MockChannel {
        fn open(&mut self, url: &str) -> Result<(), ChannelError> {
            let mut log = self.log.borrow_mut();
            if log.fail_open {
                return Err(ChannelError::InvalidUrl(url.to_string()));
            }
            log.opened.push(url.to_string());
            Ok(())
        }

        fn transmit(&mut self, text: &str) -> Result<(), ChannelError> {
            let mut log = self.log.borrow_mut();
            if log.fail_transmit {
                return Err(ChannelError::Closed);
            }
            log.sent.push(text.to_string());
            Ok(())
        }

        fn close(&mut self) {
            self.log.borrow_mut().closes += 1;
        }

        async fn next_event(&mut self) -> Option<ChannelEvent> {
            self.log.borrow_mut().events.pop_front()
        }
    }
}
