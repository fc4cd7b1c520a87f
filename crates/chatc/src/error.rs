use crate::channel::ChannelError;
use crate::session::SessionState;
use chat_common::DecodeError;
use thiserror::Error;

/// Errors surfaced by the session and the client facade.
///
/// None of these are fatal: callers get them as values and decide how to
/// present them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// An inbound frame could not be decoded and was dropped.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// The operation is not valid in the current session state.
    #[error("cannot {op} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        op: &'static str,
        /// State the session was in.
        state: SessionState,
    },
    /// The message was empty or whitespace only.
    #[error("message is empty")]
    EmptyMessage,
    /// There is no open connection to send on.
    #[error("not connected")]
    NotConnected,
    /// The underlying transport failed.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}
