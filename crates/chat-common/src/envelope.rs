//! Chat relay envelope decoding and encoding.
//!
//! Inbound frames are JSON objects of the form
//! `{"type": <int>, "from": <identity>, "data": <string>}`. Outbound frames
//! are the user's raw text with no wrapping: the relay stamps the type and
//! sender itself before fanning the message out, and this client only ever
//! sends text messages.

use crate::types::MessageType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content carried by an envelope's `data` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text (text, close and notification envelopes).
    Text(String),
    /// Raw bytes (binary envelopes).
    Bytes(Vec<u8>),
}

impl Payload {
    /// Returns the payload as text, if it is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    /// Byte length of the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Bytes(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded unit of the chat protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message type, possibly [`MessageType::Unsupported`].
    pub kind: MessageType,
    /// Sender identity exactly as supplied by the relay.
    pub from: String,
    /// Optional payload; always present for text, binary and close types.
    pub data: Option<Payload>,
}

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not a JSON envelope with the expected field types.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// The envelope type requires a `data` field but none was present.
    #[error("{kind} envelope is missing its data field")]
    MissingData {
        /// Type of the offending envelope.
        kind: MessageType,
    },
}

#[derive(Debug, Deserialize, Serialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: i64,
    from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl Envelope {
    /// Creates a text envelope from the given sender.
    #[must_use]
    pub fn text(from: &str, data: &str) -> Self {
        Self {
            kind: MessageType::TextMessage,
            from: from.to_string(),
            data: Some(Payload::Text(data.to_string())),
        }
    }

    /// Creates a peer join notification.
    #[must_use]
    pub fn joined(from: &str) -> Self {
        Self {
            kind: MessageType::ClientConnected,
            from: from.to_string(),
            data: None,
        }
    }

    /// Creates a peer leave notification.
    #[must_use]
    pub fn left(from: &str) -> Self {
        Self {
            kind: MessageType::ClientDisconnected,
            from: from.to_string(),
            data: None,
        }
    }

    /// Returns the payload as text, if present and textual.
    #[must_use]
    pub fn text_data(&self) -> Option<&str> {
        self.data.as_ref().and_then(Payload::as_text)
    }

    /// Serializes this envelope in the relay-to-client wire format.
    ///
    /// Clients never send this; it is what a relay (or a test double of one)
    /// puts on the wire.
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_common::{decode, Envelope};
    /// let env = Envelope::text("alice", "hi");
    /// assert_eq!(decode(&env.to_wire()).unwrap(), env);
    /// ```
    #[must_use]
    pub fn to_wire(&self) -> String {
        let wire = WireEnvelope {
            kind: self.kind.code(),
            from: self.from.clone(),
            data: self.data.as_ref().map(|payload| match payload {
                Payload::Text(text) => text.clone(),
                Payload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            }),
        };
        // A struct of an integer and two strings always serializes.
        serde_json::to_string(&wire).unwrap_or_default()
    }
}

/// Decodes one inbound text frame into an [`Envelope`].
///
/// Unknown `type` codes decode successfully as
/// [`MessageType::Unsupported`]; extra JSON fields are ignored.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the frame is not a JSON object with
/// an integer `type` and string `from`, and [`DecodeError::MissingData`] if a
/// text, binary or close envelope has no `data`.
///
/// # Examples
///
/// ```
/// use chat_common::{decode, MessageType};
/// let env = decode(r#"{"type":1,"from":"alice","data":"hi"}"#).unwrap();
/// assert_eq!(env.kind, MessageType::TextMessage);
/// assert_eq!(env.text_data(), Some("hi"));
/// ```
pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let wire: WireEnvelope =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let kind = MessageType::from_code(wire.kind);

    let data = match (kind, wire.data) {
        (MessageType::BinaryMessage, Some(data)) => Some(Payload::Bytes(data.into_bytes())),
        (_, Some(data)) => Some(Payload::Text(data)),
        (kind, None) if kind.requires_data() => return Err(DecodeError::MissingData { kind }),
        (_, None) => None,
    };

    Ok(Envelope {
        kind,
        from: wire.from,
        data,
    })
}

/// Decodes a binary frame that carries a UTF-8 JSON envelope.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the bytes are not UTF-8, otherwise
/// the same errors as [`decode`].
pub fn decode_bytes(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    decode(text)
}

/// Encodes outbound user text for transmission.
///
/// The outbound path carries the raw text unchanged; it is never trimmed or
/// wrapped.
#[must_use]
pub fn encode(text: &str) -> String {
    text.to_string()
}
