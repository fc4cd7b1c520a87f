#![allow(dead_code)]

use chat_common::Envelope;
use chatc::channel::{Channel, WsChannel};
use chatc::{ChatClient, SessionState};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// What the test asks the stub relay to put on the wire.
#[derive(Debug)]
pub enum RelayCmd {
    Text(String),
    Binary(Vec<u8>),
    Close { code: u16, reason: String },
    Drop,
}

/// Single-connection relay stand-in: records what the client sends and
/// pushes whatever the test tells it to.
pub struct StubRelay {
    pub addr: SocketAddr,
    path_rx: Option<oneshot::Receiver<String>>,
    inbound_rx: mpsc::UnboundedReceiver<String>,
    cmd_tx: mpsc::UnboundedSender<RelayCmd>,
}

impl StubRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (path_tx, path_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<RelayCmd>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let _ = path_tx.send(req.uri().path().to_string());
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, capture)
                .await
                .unwrap();
            let (mut ws_tx, mut ws_rx) = ws.split();

            loop {
                tokio::select! {
                    msg = ws_rx.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = inbound_tx.send(text);
                            }
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                            Some(Ok(_)) => {}
                        }
                    }
                    cmd = cmd_rx.recv() => {
                        let msg = match cmd {
                            Some(RelayCmd::Text(text)) => Message::Text(text),
                            Some(RelayCmd::Binary(data)) => Message::Binary(data),
                            Some(RelayCmd::Close { code, reason }) => {
                                let _ = ws_tx
                                    .send(Message::Close(Some(CloseFrame {
                                        code: CloseCode::from(code),
                                        reason: reason.into(),
                                    })))
                                    .await;
                                break;
                            }
                            Some(RelayCmd::Drop) | None => break,
                        };
                        if ws_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            addr,
            path_rx: Some(path_rx),
            inbound_rx,
            cmd_tx,
        }
    }

    pub fn url_for(&self, user: &str) -> String {
        chatc::config::endpoint_url(&format!("ws://{}", self.addr), user)
    }

    pub async fn path(&mut self) -> String {
        let rx = self.path_rx.take().expect("path already taken");
        tokio::time::timeout(STEP_TIMEOUT, rx).await.unwrap().unwrap()
    }

    pub fn push(&self, envelope: &Envelope) {
        self.cmd_tx.send(RelayCmd::Text(envelope.to_wire())).unwrap();
    }

    pub fn push_raw(&self, raw: &str) {
        self.cmd_tx.send(RelayCmd::Text(raw.to_string())).unwrap();
    }

    pub fn push_binary(&self, data: &[u8]) {
        self.cmd_tx.send(RelayCmd::Binary(data.to_vec())).unwrap();
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.cmd_tx
            .send(RelayCmd::Close {
                code,
                reason: reason.to_string(),
            })
            .unwrap();
    }

    pub fn drop_connection(&self) {
        self.cmd_tx.send(RelayCmd::Drop).unwrap();
    }

    pub async fn recv_text(&mut self) -> String {
        tokio::time::timeout(STEP_TIMEOUT, self.inbound_rx.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("relay connection ended")
    }
}

pub fn ws_client(url: String, user: &str) -> ChatClient<WsChannel> {
    ChatClient::new(WsChannel::new(Duration::from_secs(30)), url, user)
}

/// Processes channel events until `done` holds for the client.
pub async fn pump_until<C, F>(client: &mut ChatClient<C>, mut done: F)
where
    C: Channel,
    F: FnMut(&ChatClient<C>) -> bool,
{
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !done(&*client) {
            match client.next_channel_event().await {
                Some(event) => client.handle_channel_event(event),
                None => break,
            }
        }
    })
    .await
    .expect("timed out pumping client events");
}

pub async fn pump_until_len<C: Channel>(client: &mut ChatClient<C>, len: usize) {
    pump_until(client, |c| c.transcript().len() >= len).await;
}

pub async fn pump_until_closed<C: Channel>(client: &mut ChatClient<C>) {
    pump_until(client, |c| c.current_state() == SessionState::Closed).await;
}
