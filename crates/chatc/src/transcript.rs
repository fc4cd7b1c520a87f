use crate::session::DisconnectCause;
use chat_common::{Envelope, MessageType, Payload};
use chrono::{DateTime, Utc};
use tracing::debug;

/// What a transcript entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// A message this client sent.
    Sent,
    /// A text message from a peer.
    Received,
    /// A peer joined.
    SystemJoin,
    /// A peer left.
    SystemLeave,
    /// This client's own link was lost.
    ConnectionLost,
    /// An envelope type that is not rendered (binary, control, unknown).
    Unsupported,
}

impl RecordKind {
    /// Whether records of this kind belong in the rendered transcript.
    #[must_use]
    pub const fn is_displayed(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// One immutable transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRecord {
    kind: RecordKind,
    user: String,
    text: String,
    timestamp: DateTime<Utc>,
}

impl DisplayRecord {
    /// Entry kind.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Identity the entry is about. Empty for `ConnectionLost`.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Message text, or a short description for non-message entries.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Time the entry was processed locally.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Input to the sequencer: everything that can produce a transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptInput {
    /// A message this client handed to the channel.
    Sent(String),
    /// A decoded envelope from the relay.
    Inbound(Envelope),
    /// This client's link went down.
    Lost(DisconnectCause),
}

/// Append-only ordered log of display records.
///
/// Records are kept in the order they were applied. `Unsupported` records
/// are returned to the caller but not kept; [`Transcript::unsupported_count`]
/// tracks how many were excluded.
#[derive(Debug)]
pub struct Transcript {
    local_user: String,
    records: Vec<DisplayRecord>,
    unsupported: u64,
}

impl Transcript {
    /// Creates an empty transcript; `local_user` is stamped on `Sent` records.
    pub fn new(local_user: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            records: Vec::new(),
            unsupported: 0,
        }
    }

    /// Maps `input` to a record stamped with the current time and appends it.
    pub fn apply(&mut self, input: TranscriptInput) -> DisplayRecord {
        self.apply_at(input, Utc::now())
    }

    /// Like [`Transcript::apply`] with an explicit capture time.
    pub fn apply_at(&mut self, input: TranscriptInput, timestamp: DateTime<Utc>) -> DisplayRecord {
        let (kind, user, text) = match input {
            TranscriptInput::Sent(text) => (RecordKind::Sent, self.local_user.clone(), text),
            TranscriptInput::Lost(cause) => (RecordKind::ConnectionLost, String::new(), cause.to_string()),
            TranscriptInput::Inbound(env) => classify(env),
        };
        let record = DisplayRecord {
            kind,
            user,
            text,
            timestamp,
        };

        if kind.is_displayed() {
            self.records.push(record.clone());
        } else {
            self.unsupported += 1;
            debug!(user = %record.user, text = %record.text, "unsupported envelope kept out of transcript");
        }
        record
    }

    /// All rendered records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[DisplayRecord] {
        &self.records
    }

    /// Most recent record.
    #[must_use]
    pub fn last(&self) -> Option<&DisplayRecord> {
        self.records.last()
    }

    /// Number of rendered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been rendered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of `Unsupported` records excluded so far.
    #[must_use]
    pub const fn unsupported_count(&self) -> u64 {
        self.unsupported
    }
}

fn classify(env: Envelope) -> (RecordKind, String, String) {
    match env.kind {
        MessageType::TextMessage => {
            let text = match env.data {
                Some(Payload::Text(text)) => text,
                Some(Payload::Bytes(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                None => String::new(),
            };
            (RecordKind::Received, env.from, text)
        }
        MessageType::ClientConnected => (RecordKind::SystemJoin, env.from, String::new()),
        MessageType::ClientDisconnected => (RecordKind::SystemLeave, env.from, String::new()),
        other => (RecordKind::Unsupported, env.from, other.to_string()),
    }
}
