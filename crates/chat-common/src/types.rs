//! Message type codes and identity rules for the chat relay protocol.

use std::fmt;

/// Path prefix under which the relay accepts WebSocket upgrades.
pub const WS_USER_PATH: &str = "/ws/user/";

/// Path prefix of the chat page served for a given identity.
pub const PAGE_USER_PATH: &str = "/user/";

/// Wire codes carried in the `type` field of an envelope.
///
/// Positive codes follow the WebSocket opcode taxonomy (RFC 6455, 11.8).
/// Negative codes are relay-synthesized session notifications.
pub mod code {
    /// A peer joined the relay.
    pub const CLIENT_CONNECTED: i64 = -1;
    /// A peer left the relay.
    pub const CLIENT_DISCONNECTED: i64 = -2;
    /// UTF-8 text message.
    pub const TEXT_MESSAGE: i64 = 1;
    /// Binary data message.
    pub const BINARY_MESSAGE: i64 = 2;
    /// Close control message.
    pub const CLOSE_MESSAGE: i64 = 8;
    /// Ping control message.
    pub const PING_MESSAGE: i64 = 9;
    /// Pong control message.
    pub const PONG_MESSAGE: i64 = 10;
}

/// Typed view of an envelope's `type` code.
///
/// Unknown codes are kept as [`MessageType::Unsupported`] instead of being
/// rejected, so newer relays can add types without breaking older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A peer joined (`-1`).
    ClientConnected,
    /// A peer left (`-2`).
    ClientDisconnected,
    /// Text message (`1`).
    TextMessage,
    /// Binary message (`2`).
    BinaryMessage,
    /// Close control message (`8`).
    CloseMessage,
    /// Ping control message (`9`).
    PingMessage,
    /// Pong control message (`10`).
    PongMessage,
    /// Any code this client does not understand.
    Unsupported(i64),
}

impl MessageType {
    /// Maps a wire code to its typed form. Never fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use chat_common::MessageType;
    /// assert_eq!(MessageType::from_code(1), MessageType::TextMessage);
    /// assert_eq!(MessageType::from_code(42), MessageType::Unsupported(42));
    /// ```
    #[must_use]
    pub const fn from_code(value: i64) -> Self {
        match value {
            code::CLIENT_CONNECTED => Self::ClientConnected,
            code::CLIENT_DISCONNECTED => Self::ClientDisconnected,
            code::TEXT_MESSAGE => Self::TextMessage,
            code::BINARY_MESSAGE => Self::BinaryMessage,
            code::CLOSE_MESSAGE => Self::CloseMessage,
            code::PING_MESSAGE => Self::PingMessage,
            code::PONG_MESSAGE => Self::PongMessage,
            other => Self::Unsupported(other),
        }
    }

    /// Returns the wire code for this type.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::ClientConnected => code::CLIENT_CONNECTED,
            Self::ClientDisconnected => code::CLIENT_DISCONNECTED,
            Self::TextMessage => code::TEXT_MESSAGE,
            Self::BinaryMessage => code::BINARY_MESSAGE,
            Self::CloseMessage => code::CLOSE_MESSAGE,
            Self::PingMessage => code::PING_MESSAGE,
            Self::PongMessage => code::PONG_MESSAGE,
            Self::Unsupported(other) => *other,
        }
    }

    /// Whether an envelope of this type must carry a `data` field.
    #[must_use]
    pub const fn requires_data(&self) -> bool {
        matches!(
            self,
            Self::TextMessage | Self::BinaryMessage | Self::CloseMessage
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientConnected => f.write_str("client-connected"),
            Self::ClientDisconnected => f.write_str("client-disconnected"),
            Self::TextMessage => f.write_str("text"),
            Self::BinaryMessage => f.write_str("binary"),
            Self::CloseMessage => f.write_str("close"),
            Self::PingMessage => f.write_str("ping"),
            Self::PongMessage => f.write_str("pong"),
            Self::Unsupported(other) => write!(f, "unsupported({other})"),
        }
    }
}

/// Returns true if `name` is an identity the relay will accept: non-empty
/// and made only of ASCII letters and digits.
#[must_use]
pub fn is_valid_identity(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric())
}
