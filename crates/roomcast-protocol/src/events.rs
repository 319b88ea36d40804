//! Event types for the Roomcast protocol.
//!
//! Inbound and outbound events are tagged unions; the tag is the event name
//! and the payload is carried under `data`.

use serde::{Deserialize, Serialize};

/// A message as it appears on the wire, with its aggregated read-by list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Store-assigned identifier, monotonically increasing per store.
    pub id: u64,
    /// Room the message was posted to.
    pub room: String,
    /// Author display name.
    pub username: String,
    /// Message body.
    pub content: String,
    /// Creation time as Unix milliseconds.
    pub timestamp: u64,
    /// Users who have read the message, in read order. The author is
    /// always first.
    pub read_by: Vec<String>,
}

/// Per-message payload of a `read_receipts_updated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptUpdate {
    pub message_id: u64,
    pub read_by: Vec<String>,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Enter a room under a display name. Creates the room if needed.
    Join { username: String, room: String },

    /// Leave the current room immediately (no reconnect grace period).
    Leave,

    /// Post a message to the current room.
    SendMessage { content: String },

    /// Mark a batch of messages as read by the caller.
    MarkRead { message_ids: Vec<u64> },

    /// Request a fresh presence snapshot for the caller's room.
    GetOnlineUsers,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Private reply to a successful join: history plus presence snapshots.
    RoomJoined {
        room: String,
        username: String,
        messages: Vec<MessageRecord>,
        room_users: Vec<String>,
        global_online: Vec<String>,
    },

    /// Broadcast to a room when a user freshly joins (never on reconnect).
    UserJoined {
        username: String,
        room_users: Vec<String>,
        global_online: Vec<String>,
    },

    /// Broadcast to a room when a user leaves or their grace period expires.
    UserLeft {
        username: String,
        room_users: Vec<String>,
        global_online: Vec<String>,
    },

    /// Broadcast of a newly committed message.
    NewMessage(MessageRecord),

    /// Aggregated read-receipt changes from one `mark_read` batch.
    ReadReceiptsUpdated {
        updates: Vec<ReceiptUpdate>,
        reader: String,
    },

    /// Private confirmation of an explicit leave.
    LeftRoom { room: String },

    /// Private presence snapshot reply.
    OnlineUsersUpdate {
        room_users: Vec<String>,
        global_online: Vec<String>,
    },

    /// Request-scoped error report.
    Error { message: String },
}

impl ServerEvent {
    /// Create an error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoomJoined { .. } => "room_joined",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::NewMessage(_) => "new_message",
            Self::ReadReceiptsUpdated { .. } => "read_receipts_updated",
            Self::LeftRoom { .. } => "left_room",
            Self::OnlineUsersUpdate { .. } => "online_users_update",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_tags() {
        let json = serde_json::to_value(&ClientEvent::Join {
            username: "alice".into(),
            room: "lobby".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "join");
        assert_eq!(json["data"]["username"], "alice");

        let json = serde_json::to_value(&ClientEvent::Leave).unwrap();
        assert_eq!(json["event"], "leave");
    }

    #[test]
    fn test_new_message_payload_is_flat() {
        let event = ServerEvent::NewMessage(MessageRecord {
            id: 7,
            room: "lobby".into(),
            username: "alice".into(),
            content: "hello".into(),
            timestamp: 1_700_000_000_000,
            read_by: vec!["alice".into()],
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "new_message");
        assert_eq!(json["data"]["id"], 7);
        assert_eq!(json["data"]["read_by"][0], "alice");
    }

    #[test]
    fn test_server_event_names() {
        assert_eq!(ServerEvent::error("nope").name(), "error");
        assert_eq!(
            ServerEvent::LeftRoom {
                room: "lobby".into()
            }
            .name(),
            "left_room"
        );
    }
}
