//! Event-driven session coordination.
//!
//! The coordinator wires inbound client events to the presence registry and
//! the message store, and emits the resulting notifications through the
//! fan-out seam. It owns no presence or message state of its own; the only
//! things it keeps are the explicit-leave flags (so a leave followed by the
//! transport's disconnect is processed once) and the per-room publish locks
//! that keep message broadcasts in commit order.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use roomcast_protocol::events::{MessageRecord, ReceiptUpdate};
use roomcast_protocol::{validate, ClientEvent, ServerEvent};

use crate::error::EngineError;
use crate::fanout::Notifier;
use crate::registry::{Expiration, JoinKind, PresenceRegistry};
use crate::store::{MessageStore, StoredMessage};

/// Validation limits applied at the session boundary.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_username_length: usize,
    pub max_room_length: usize,
    pub max_message_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_username_length: 50,
            max_room_length: 100,
            max_message_length: 2000,
        }
    }
}

/// Orchestrates connect/join/leave/send/mark-read handling for every
/// connection.
pub struct SessionCoordinator {
    registry: PresenceRegistry,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    limits: Limits,
    /// Connections whose explicit leave already ran; the trailing transport
    /// disconnect must not be processed a second time.
    explicit_leaves: DashSet<String>,
    /// Per-room lock held across persist+broadcast so `new_message` events
    /// go out in commit order within a room.
    publish_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        registry: PresenceRegistry,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        limits: Limits,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            store,
            notifier,
            limits,
            explicit_leaves: DashSet::new(),
            publish_locks: DashMap::new(),
        })
    }

    /// Spawn the task that turns grace-period expirations into `user_left`
    /// announcements. Call once with the receiver returned by
    /// [`PresenceRegistry::new`].
    pub fn spawn_expiration_pump(
        self: &Arc<Self>,
        mut expirations: mpsc::UnboundedReceiver<Expiration>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(expiration) = expirations.recv().await {
                info!(
                    user = %expiration.username,
                    room = %expiration.room,
                    "user left after grace period"
                );
                coordinator.announce_left(&expiration.username, &expiration.room);
            }
        })
    }

    /// Dispatch a decoded client event, reporting failures back to the
    /// originating connection as `error` events.
    pub async fn dispatch(&self, connection_id: &str, event: ClientEvent) {
        let result = match event {
            ClientEvent::Join { username, room } => {
                self.join(connection_id, &username, &room).await
            }
            ClientEvent::Leave => {
                self.leave(connection_id);
                Ok(())
            }
            ClientEvent::SendMessage { content } => {
                self.send_message(connection_id, &content).await
            }
            ClientEvent::MarkRead { message_ids } => {
                self.mark_read(connection_id, &message_ids).await
            }
            ClientEvent::GetOnlineUsers => {
                self.get_online_users(connection_id);
                Ok(())
            }
        };

        if let Err(error) = result {
            debug!(connection = %connection_id, %error, "request rejected");
            self.notifier
                .unicast(connection_id, ServerEvent::error(error.to_string()));
        }
    }

    /// Transport-level connect; liveness only. A room association is only
    /// established by a later join.
    pub fn connect(&self, connection_id: &str) {
        debug!(connection = %connection_id, "client connected");
    }

    /// Join a room under a display name, creating the room as needed.
    ///
    /// The joining connection receives `room_joined` with history and
    /// presence snapshots; the rest of the room hears `user_joined` only on
    /// a fresh join, never on a grace-window reconnect.
    ///
    /// # Errors
    ///
    /// `Validation` for empty/malformed names, `NameConflict` when the name
    /// is actively held in the room by someone else, `Store` if history
    /// cannot be loaded.
    pub async fn join(
        &self,
        connection_id: &str,
        username: &str,
        room: &str,
    ) -> Result<(), EngineError> {
        let username = username.trim();
        let room = room.trim();
        validate::validate_username(username, self.limits.max_username_length)
            .map_err(EngineError::Validation)?;
        validate::validate_room(room, self.limits.max_room_length)
            .map_err(EngineError::Validation)?;

        let registration = self.registry.claim(connection_id, username, room)?;

        // A connection hopping rooms left its previous room; that room gets
        // the same announcement an explicit leave would produce.
        if let Some(displaced) = &registration.displaced {
            self.announce_left(&displaced.username, &displaced.room);
        }

        let stored_messages = self.store.history(room).await?;
        let mut messages = Vec::with_capacity(stored_messages.len());
        for message in stored_messages {
            let read_by = self.store.receipts_for(message.id).await?;
            messages.push(to_record(message, read_by));
        }
        let room_users = self.registry.snapshot_room(room);
        let global_online = self.registry.snapshot_global();

        self.notifier.unicast(
            connection_id,
            ServerEvent::RoomJoined {
                room: room.to_string(),
                username: username.to_string(),
                messages,
                room_users: room_users.clone(),
                global_online: global_online.clone(),
            },
        );

        match registration.kind {
            JoinKind::Fresh => {
                info!(connection = %connection_id, user = %username, room = %room, "user joined");
                self.notifier.broadcast(
                    room,
                    &ServerEvent::UserJoined {
                        username: username.to_string(),
                        room_users,
                        global_online,
                    },
                    Some(connection_id),
                );
            }
            JoinKind::Reconnect => {
                info!(
                    connection = %connection_id,
                    user = %username,
                    room = %room,
                    "user reconnected within grace period"
                );
            }
            JoinKind::Rejoin => {
                debug!(connection = %connection_id, room = %room, "join repeated, no announcement");
            }
        }
        Ok(())
    }

    /// Explicit, user-initiated leave: immediate removal, no grace period.
    pub fn leave(&self, connection_id: &str) {
        // The transport will still emit a disconnect for this connection.
        self.explicit_leaves.insert(connection_id.to_string());

        if let Some(entry) = self.registry.unregister_explicit(connection_id) {
            info!(connection = %connection_id, user = %entry.username, room = %entry.room, "user left");
            self.announce_left(&entry.username, &entry.room);
            self.notifier
                .unicast(connection_id, ServerEvent::LeftRoom { room: entry.room });
        }
    }

    /// Transport-level disconnect.
    ///
    /// An explicit leave was already processed, so its flag is consumed and
    /// nothing else happens. Any other drop starts the reconnect grace
    /// period; the eventual `user_left`, if any, comes from the expiration
    /// pump rather than from here.
    pub fn disconnect(&self, connection_id: &str) {
        if self.explicit_leaves.remove(connection_id).is_some() {
            debug!(connection = %connection_id, "disconnect after explicit leave");
            return;
        }
        if let Some(entry) = self.registry.unregister_graceful(connection_id) {
            debug!(
                connection = %connection_id,
                user = %entry.username,
                room = %entry.room,
                "disconnected, grace period running"
            );
        }
    }

    /// Post a message to the caller's current room.
    ///
    /// The message is committed, the author's own read receipt recorded,
    /// and only then is `new_message` broadcast, carrying
    /// `read_by == [author]`.
    ///
    /// # Errors
    ///
    /// `NotInRoom` without an active room association, `Validation` for
    /// empty or oversized content, `Store` when persistence fails (presence
    /// state is untouched in every error case).
    pub async fn send_message(
        &self,
        connection_id: &str,
        content: &str,
    ) -> Result<(), EngineError> {
        let entry = self
            .registry
            .entry_for(connection_id)
            .ok_or(EngineError::NotInRoom)?;
        let content = content.trim();
        validate::validate_content(content, self.limits.max_message_length)
            .map_err(EngineError::Validation)?;

        // Commit before broadcasting, under the room's publish lock, so the
        // broadcast sequence matches commit order within the room.
        let lock = self.publish_lock(&entry.room);
        let _guard = lock.lock().await;

        let message = self
            .store
            .append(&entry.room, &entry.username, content)
            .await?;
        self.store.add_receipt(message.id, &entry.username).await?;

        debug!(connection = %connection_id, room = %entry.room, id = message.id, "message persisted");

        let record = to_record(message, vec![entry.username.clone()]);
        self.notifier
            .broadcast(&entry.room, &ServerEvent::NewMessage(record), None);
        Ok(())
    }

    /// Mark a batch of messages as read by the caller.
    ///
    /// Ids outside the caller's room, unknown ids, and already-read
    /// messages are skipped per-id. One aggregated `read_receipts_updated`
    /// is broadcast afterwards, and only if something actually changed.
    /// Callers without a room association are ignored.
    ///
    /// # Errors
    ///
    /// `Store` when the backend fails mid-batch.
    pub async fn mark_read(
        &self,
        connection_id: &str,
        message_ids: &[u64],
    ) -> Result<(), EngineError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let Some(entry) = self.registry.entry_for(connection_id) else {
            return Ok(());
        };

        let mut updated = Vec::new();
        for &message_id in message_ids {
            let Some(message) = self.store.get(message_id).await? else {
                continue;
            };
            if message.room != entry.room {
                continue;
            }
            if self.store.add_receipt(message_id, &entry.username).await? {
                updated.push(message_id);
            }
        }

        if updated.is_empty() {
            return Ok(());
        }

        let mut updates = Vec::with_capacity(updated.len());
        for message_id in updated {
            updates.push(ReceiptUpdate {
                message_id,
                read_by: self.store.receipts_for(message_id).await?,
            });
        }

        debug!(
            connection = %connection_id,
            reader = %entry.username,
            count = updates.len(),
            "read receipts recorded"
        );
        self.notifier.broadcast(
            &entry.room,
            &ServerEvent::ReadReceiptsUpdated {
                updates,
                reader: entry.username,
            },
            None,
        );
        Ok(())
    }

    /// Reply with fresh presence snapshots for the caller's room. Ignored
    /// for connections without a room association.
    pub fn get_online_users(&self, connection_id: &str) {
        if let Some(entry) = self.registry.entry_for(connection_id) {
            self.notifier.unicast(
                connection_id,
                ServerEvent::OnlineUsersUpdate {
                    room_users: self.registry.snapshot_room(&entry.room),
                    global_online: self.registry.snapshot_global(),
                },
            );
        }
    }

    /// Single formatting point for `user_left`, shared by explicit leave,
    /// room hopping, and grace-period expiry.
    fn announce_left(&self, username: &str, room: &str) {
        let event = ServerEvent::UserLeft {
            username: username.to_string(),
            room_users: self.registry.snapshot_room(room),
            global_online: self.registry.snapshot_global(),
        };
        self.notifier.broadcast(room, &event, None);
    }

    fn publish_lock(&self, room: &str) -> Arc<Mutex<()>> {
        self.publish_locks
            .entry(room.to_string())
            .or_default()
            .value()
            .clone()
    }
}

fn to_record(message: StoredMessage, read_by: Vec<String>) -> MessageRecord {
    MessageRecord {
        id: message.id,
        room: message.room,
        username: message.username,
        content: message.content,
        timestamp: message.created_at,
        read_by,
    }
}
