//! Envelope Wire Protocol
//!
//! Every lobby message travels as a JSON envelope: a stable `messageTypeId`
//! naming the logical message kind plus a JSON payload object. Decoding never
//! panics on arbitrary input; callers get a `Result` and degrade gracefully.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Stable message type identifiers. Chosen by the message's logical kind,
/// never by transport framing.
pub mod tags {
    pub const CONNECT_TO_CHAT: &str = "connect-to-chat";
    pub const CHAT_SENT: &str = "chat-sent";
    pub const CHAT_RECEIVED: &str = "chat-received";
    pub const PLAYER_LISTING: &str = "player-listing";
    pub const PLAYER_JOINED: &str = "player-joined";
    pub const PLAYER_LEFT: &str = "player-left";
    pub const STATUS_UPDATE: &str = "status-update";
    pub const STATUS_CHANGED: &str = "status-changed";
    pub const CHAT_EVENT: &str = "chat-event";
    pub const SERVER_ERROR: &str = "server-error";
    pub const PLAYER_BANNED: &str = "player-banned";
    pub const SHUTDOWN_REQUEST: &str = "shutdown-request";
    pub const LOGIN_REQUEST: &str = "login-request";
    pub const LOGIN_CHALLENGE: &str = "login-challenge";
    pub const LOGIN_RESPONSE: &str = "login-response";
    pub const LOGIN_SUCCESS: &str = "login-success";
}

/// The tagged wire unit carrying one message. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(rename = "messageTypeId")]
    pub message_type_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl MessageEnvelope {
    /// Builds an envelope from a tag and a serializable payload.
    pub fn new<T: Serialize>(tag: &str, payload: &T) -> Result<Self, String> {
        let payload = serde_json::to_value(payload).map_err(|e| e.to_string())?;
        Ok(MessageEnvelope {
            message_type_id: tag.to_string(),
            payload,
        })
    }

    /// Builds an envelope with an empty payload object.
    pub fn empty(tag: &str) -> Self {
        MessageEnvelope {
            message_type_id: tag.to_string(),
            payload: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Encodes the envelope to its UTF-8 JSON wire form.
    pub fn encode(&self) -> String {
        // An envelope is a tag plus a JSON value; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decodes a raw wire string. Returns `Err` on anything that is not a
    /// well-formed envelope; never panics.
    pub fn decode(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| e.to_string())
    }

    /// Deserializes the inner payload into a typed message.
    pub fn to_payload<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(self.payload.clone()).map_err(|e| e.to_string())
    }
}

// ============================================================================
// Payload types
// ============================================================================

/// Join request from a client. First message on a chat connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectToChat {
    pub user_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub moderator: bool,
}

/// Chat line submitted by a connected participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSent {
    pub message: String,
}

/// Chat line relayed to all participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReceived {
    pub from: String,
    pub message: String,
}

/// One participant's live state as seen in the roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub user_name: String,
    pub session_id: String,
    pub moderator: bool,
    pub status: String,
}

/// Full roster, returned to a newly joined connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerListing {
    pub chatters: Vec<ParticipantInfo>,
}

/// Notice that a participant joined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerJoined {
    pub user_name: String,
    pub moderator: bool,
}

/// Notice that a participant left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerLeft {
    pub user_name: String,
}

/// Status text update submitted by a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// Broadcast of a participant's changed status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChanged {
    pub user_name: String,
    pub status: String,
}

/// Administrative notice shown in chat (bans, disconnects).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub message: String,
}

/// Generic error reply. The only error shape end users ever see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    pub error: String,
}

/// Ban notice delivered to the banned connection before closing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerBanned {
    pub message: String,
}

// ============================================================================
// Envelope constructors
// ============================================================================

/// Creates a `server-error` envelope.
pub fn create_server_error(error: &str) -> MessageEnvelope {
    MessageEnvelope::new(
        tags::SERVER_ERROR,
        &ServerError {
            error: error.to_string(),
        },
    )
    .expect("server error payload serializes")
}

/// Creates a `chat-event` administrative notice.
pub fn create_chat_event(message: &str) -> MessageEnvelope {
    MessageEnvelope::new(
        tags::CHAT_EVENT,
        &ChatEvent {
            message: message.to_string(),
        },
    )
    .expect("chat event payload serializes")
}

/// Creates a `player-banned` notice.
pub fn create_player_banned(message: &str) -> MessageEnvelope {
    MessageEnvelope::new(
        tags::PLAYER_BANNED,
        &PlayerBanned {
            message: message.to_string(),
        },
    )
    .expect("ban notice payload serializes")
}

/// Creates a `shutdown-request` envelope. The remote process is expected to
/// exit voluntarily; no payload is needed.
pub fn create_shutdown_request() -> MessageEnvelope {
    MessageEnvelope::empty(tags::SHUTDOWN_REQUEST)
}
