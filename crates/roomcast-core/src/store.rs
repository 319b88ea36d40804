//! Message persistence.
//!
//! The engine only depends on the [`MessageStore`] trait; [`MemoryStore`] is
//! the shipped backend. Messages are immutable once appended and carry
//! store-assigned, monotonically increasing ids, which is what lets the
//! coordinator guarantee per-room broadcast order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Store-assigned identifier, monotonically increasing.
    pub id: u64,
    /// Room the message belongs to.
    pub room: String,
    /// Author display name.
    pub username: String,
    /// Message body.
    pub content: String,
    /// Creation time as Unix milliseconds.
    pub created_at: u64,
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Receipt operation against an unknown message id.
    #[error("message {0} not found")]
    MissingMessage(u64),

    /// Backend failure; fatal for the triggering operation only.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable log of messages plus read receipts per message.
///
/// Implementations may block on I/O; callers must not hold the presence
/// registry lock across these calls.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to a room's log, assigning the next id.
    async fn append(
        &self,
        room: &str,
        username: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// All messages of a room, in commit order.
    async fn history(&self, room: &str) -> Result<Vec<StoredMessage>, StoreError>;

    /// Look up a single message.
    async fn get(&self, message_id: u64) -> Result<Option<StoredMessage>, StoreError>;

    /// Record that `username` read a message.
    ///
    /// Returns `false` when the receipt already existed; creation is
    /// idempotent, never an error.
    async fn add_receipt(&self, message_id: u64, username: &str) -> Result<bool, StoreError>;

    /// Readers of a message, in the order the receipts were recorded.
    async fn receipts_for(&self, message_id: u64) -> Result<Vec<String>, StoreError>;
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[derive(Debug, Default)]
struct StoreState {
    messages: Vec<StoredMessage>,
    receipts: HashMap<u64, Vec<String>>,
    next_id: u64,
}

/// In-memory [`MessageStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("store lock poisoned")
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(
        &self,
        room: &str,
        username: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut state = self.lock();
        state.next_id += 1;
        let message = StoredMessage {
            id: state.next_id,
            room: room.to_string(),
            username: username.to_string(),
            content: content.to_string(),
            created_at: unix_millis(),
        };
        state.messages.push(message.clone());
        state.receipts.insert(message.id, Vec::new());
        Ok(message)
    }

    async fn history(&self, room: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.lock();
        Ok(state
            .messages
            .iter()
            .filter(|m| m.room == room)
            .cloned()
            .collect())
    }

    async fn get(&self, message_id: u64) -> Result<Option<StoredMessage>, StoreError> {
        let state = self.lock();
        Ok(state.messages.iter().find(|m| m.id == message_id).cloned())
    }

    async fn add_receipt(&self, message_id: u64, username: &str) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let readers = state
            .receipts
            .get_mut(&message_id)
            .ok_or(StoreError::MissingMessage(message_id))?;
        if readers.iter().any(|r| r == username) {
            return Ok(false);
        }
        readers.push(username.to_string());
        Ok(true)
    }

    async fn receipts_for(&self, message_id: u64) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        state
            .receipts
            .get(&message_id)
            .cloned()
            .ok_or(StoreError::MissingMessage(message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_monotonic_ids() {
        let store = MemoryStore::new();

        let first = store.append("lobby", "alice", "one").await.unwrap();
        let second = store.append("lobby", "alice", "two").await.unwrap();
        let third = store.append("den", "bob", "three").await.unwrap();

        assert_eq!(first.id, 1);
        assert!(second.id > first.id);
        assert!(third.id > second.id);
    }

    #[tokio::test]
    async fn test_history_is_per_room_in_commit_order() {
        let store = MemoryStore::new();

        store.append("lobby", "alice", "one").await.unwrap();
        store.append("den", "bob", "elsewhere").await.unwrap();
        store.append("lobby", "bob", "two").await.unwrap();

        let history = store.history("lobby").await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);

        assert!(store.history("nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_receipt_is_idempotent() {
        let store = MemoryStore::new();
        let message = store.append("lobby", "alice", "hi").await.unwrap();

        assert!(store.add_receipt(message.id, "bob").await.unwrap());
        assert!(!store.add_receipt(message.id, "bob").await.unwrap());

        assert_eq!(store.receipts_for(message.id).await.unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_receipts_preserve_read_order() {
        let store = MemoryStore::new();
        let message = store.append("lobby", "alice", "hi").await.unwrap();

        store.add_receipt(message.id, "alice").await.unwrap();
        store.add_receipt(message.id, "carol").await.unwrap();
        store.add_receipt(message.id, "bob").await.unwrap();

        assert_eq!(
            store.receipts_for(message.id).await.unwrap(),
            vec!["alice", "carol", "bob"]
        );
    }

    #[tokio::test]
    async fn test_unknown_message_ids() {
        let store = MemoryStore::new();

        assert!(store.get(99).await.unwrap().is_none());
        assert!(matches!(
            store.add_receipt(99, "alice").await,
            Err(StoreError::MissingMessage(99))
        ));
        assert!(store.receipts_for(99).await.is_err());
    }
}
