//! Chat relay client: connection session, transcript sequencing and the
//! client facade a presentation layer subscribes to.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Transport abstraction and the WebSocket implementation.
pub mod channel;
/// Client facade composing session, codec and transcript.
pub mod client;
/// CLI parsing and TOML configuration.
pub mod config;
/// Error types for client operations.
pub mod error;
/// Connection lifecycle state machine.
pub mod session;
/// Append-only display transcript.
pub mod transcript;

pub use client::{ChatClient, ClientEvent, Subscription};
pub use error::ChatError;
pub use session::{DisconnectCause, Session, SessionEvent, SessionState};
pub use transcript::{DisplayRecord, RecordKind, Transcript};
