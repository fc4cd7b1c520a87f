//! Wire protocol shared by everything that talks to the chat relay.
//!
//! This crate provides:
//! - Envelope decoding and outbound encoding ([`envelope`])
//! - Message type codes and identity rules ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod types;

pub use envelope::{decode, decode_bytes, encode, DecodeError, Envelope, Payload};
pub use types::{is_valid_identity, MessageType};
