//! Presence tracking with reconnect grace periods.
//!
//! The registry owns all presence state: the per-connection room
//! associations, per-room membership, the global online set, and the pending
//! disconnects that keep a user "present" while their page reloads. A
//! dropped connection is announced as gone only after the grace period
//! elapses without a reconnect.
//!
//! Every mutation runs under a single internal mutex; critical sections are
//! short and never held across an await point. The expiry path re-checks a
//! per-pending generation counter under that same mutex, so a timer that
//! races a reconnect is a defined no-op rather than a double removal.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default reconnect grace period.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A live connection's room association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Transport-level connection identity.
    pub connection_id: String,
    /// Display name of the user holding the connection.
    pub username: String,
    /// Room the connection is in.
    pub room: String,
}

/// How a successful registration should be announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// A brand-new join; peers should be notified.
    Fresh,
    /// A reconnect within the grace window; peers must not be notified.
    Reconnect,
    /// The same connection repeated an identical join; nothing changed.
    Rejoin,
}

/// Result of a registration: the join kind plus any association the
/// connection previously held that was released to make room for it.
#[derive(Debug)]
pub struct Registration {
    pub kind: JoinKind,
    pub displaced: Option<PresenceEntry>,
}

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A distinct live connection already holds this username in the room.
    #[error("username {username:?} is already taken in room {room:?}")]
    NameTaken { username: String, room: String },
}

/// Notice that a grace period elapsed without a reconnect.
///
/// The consumer is responsible for broadcasting the departure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiration {
    pub username: String,
    pub room: String,
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Live connections with a room association.
    pub connection_count: usize,
    /// Rooms with at least one present user.
    pub room_count: usize,
    /// Usernames counted as online.
    pub online_count: usize,
    /// Disconnects currently inside their grace window.
    pub pending_count: usize,
}

#[derive(Debug)]
struct PendingDisconnect {
    generation: u64,
    connection_id: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// connection_id -> association. At most one entry per connection.
    entries: HashMap<String, PresenceEntry>,
    /// room -> usernames present (live or in grace). A key exists iff its
    /// set is non-empty.
    rooms: HashMap<String, HashSet<String>>,
    /// Usernames with a live entry or a pending disconnect anywhere.
    global: HashSet<String>,
    /// (username, room) -> the pending disconnect guarding its grace window.
    pending: HashMap<(String, String), PendingDisconnect>,
    next_generation: u64,
}

impl RegistryState {
    fn has_other_live(&self, username: &str, room: &str, except: &str) -> bool {
        self.entries
            .values()
            .any(|e| e.username == username && e.room == room && e.connection_id != except)
    }

    fn live_anywhere(&self, username: &str) -> bool {
        self.entries.values().any(|e| e.username == username)
    }

    fn pending_anywhere(&self, username: &str) -> bool {
        self.pending.keys().any(|(user, _)| user == username)
    }

    fn remove_from_room(&mut self, username: &str, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(username);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    /// Drop the username from the global set unless a live entry or a
    /// pending disconnect still keeps it online.
    fn remove_from_global(&mut self, username: &str) {
        if !self.live_anywhere(username) && !self.pending_anywhere(username) {
            self.global.remove(username);
        }
    }

    /// Immediate release of an association already taken out of `entries`:
    /// cancels its pending disconnect and updates room/global membership.
    fn release(&mut self, entry: &PresenceEntry) {
        self.pending
            .remove(&(entry.username.clone(), entry.room.clone()));
        if !self.has_other_live(&entry.username, &entry.room, &entry.connection_id) {
            self.remove_from_room(&entry.username, &entry.room);
        }
        self.remove_from_global(&entry.username);
    }
}

/// Tracks presence across connections and owns the reconnect grace timers.
///
/// Cloning is cheap and shares the same state, which is how the grace timer
/// tasks reach back into the registry.
#[derive(Debug, Clone)]
pub struct PresenceRegistry {
    state: Arc<Mutex<RegistryState>>,
    grace_period: Duration,
    expirations: mpsc::UnboundedSender<Expiration>,
}

impl PresenceRegistry {
    /// Create a registry with the given grace period.
    ///
    /// The returned receiver yields an [`Expiration`] each time a grace
    /// period elapses without a reconnect.
    #[must_use]
    pub fn new(grace_period: Duration) -> (Self, mpsc::UnboundedReceiver<Expiration>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            grace_period,
            expirations: tx,
        };
        (registry, rx)
    }

    /// The configured grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("presence state lock poisoned")
    }

    /// Associate a connection with a (username, room) pair.
    ///
    /// Cancels any pending disconnect for the pair and reports whether peers
    /// should be notified. If the connection previously held a different
    /// association, it is released with explicit-leave semantics and
    /// returned as `displaced`. Idempotent for repeated identical calls.
    pub fn register(&self, connection_id: &str, username: &str, room: &str) -> Registration {
        let mut state = self.lock();
        Self::register_locked(&mut state, connection_id, username, room)
    }

    /// Conflict-checked registration for join requests.
    ///
    /// # Errors
    ///
    /// Rejects with [`RegistryError::NameTaken`] when a distinct live
    /// connection already holds the username in the room and no pending
    /// disconnect exists for the pair (a genuine collision rather than a
    /// grace-window reconnect). Nothing mutates on rejection.
    pub fn claim(
        &self,
        connection_id: &str,
        username: &str,
        room: &str,
    ) -> Result<Registration, RegistryError> {
        let mut state = self.lock();
        let key = (username.to_string(), room.to_string());
        if !state.pending.contains_key(&key)
            && state.has_other_live(username, room, connection_id)
        {
            return Err(RegistryError::NameTaken {
                username: username.to_string(),
                room: room.to_string(),
            });
        }
        Ok(Self::register_locked(&mut state, connection_id, username, room))
    }

    fn register_locked(
        state: &mut RegistryState,
        connection_id: &str,
        username: &str,
        room: &str,
    ) -> Registration {
        let key = (username.to_string(), room.to_string());

        if let Some(existing) = state.entries.get(connection_id) {
            if existing.username == username && existing.room == room {
                state.pending.remove(&key);
                debug!(connection = %connection_id, room = %room, "join repeated on live connection");
                return Registration {
                    kind: JoinKind::Rejoin,
                    displaced: None,
                };
            }
        }

        let is_reconnect = state.pending.remove(&key).is_some();

        // A connection holds exactly one association; release any previous
        // one so the old room's membership cannot leak.
        let mut displaced = None;
        if let Some(previous) = state.entries.remove(connection_id) {
            state.release(&previous);
            displaced = Some(previous);
        }

        state.entries.insert(
            connection_id.to_string(),
            PresenceEntry {
                connection_id: connection_id.to_string(),
                username: username.to_string(),
                room: room.to_string(),
            },
        );
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(username.to_string());
        state.global.insert(username.to_string());

        let kind = if is_reconnect {
            JoinKind::Reconnect
        } else {
            JoinKind::Fresh
        };
        debug!(connection = %connection_id, user = %username, room = %room, kind = ?kind, "presence registered");
        Registration { kind, displaced }
    }

    /// Immediately remove a connection's association (user-initiated leave).
    ///
    /// Returns the removed association, if any.
    pub fn unregister_explicit(&self, connection_id: &str) -> Option<PresenceEntry> {
        let mut state = self.lock();
        let entry = state.entries.remove(connection_id)?;
        state.release(&entry);
        debug!(connection = %connection_id, user = %entry.username, room = %entry.room, "presence removed");
        Some(entry)
    }

    /// Remove a connection whose socket dropped.
    ///
    /// The entry goes away immediately, but if this was the user's last live
    /// connection in the room, membership is kept and a pending disconnect
    /// is scheduled instead; a reconnect within the grace period cancels it
    /// silently. If another live connection of the same user remains in the
    /// room, membership is untouched and no timer is created.
    pub fn unregister_graceful(&self, connection_id: &str) -> Option<PresenceEntry> {
        let mut state = self.lock();
        let entry = state.entries.remove(connection_id)?;

        if state.has_other_live(&entry.username, &entry.room, connection_id) {
            debug!(
                connection = %connection_id,
                user = %entry.username,
                room = %entry.room,
                "disconnected, other connection still in room"
            );
            return Some(entry);
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        state.pending.insert(
            (entry.username.clone(), entry.room.clone()),
            PendingDisconnect {
                generation,
                connection_id: connection_id.to_string(),
            },
        );
        drop(state);

        let registry = self.clone();
        let username = entry.username.clone();
        let room = entry.room.clone();
        let grace = self.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.expire(&username, &room, generation);
        });

        debug!(
            connection = %connection_id,
            user = %entry.username,
            room = %entry.room,
            grace = ?self.grace_period,
            "disconnect grace period started"
        );
        Some(entry)
    }

    /// Timer entry point: finalize a pending disconnect if it is still the
    /// current one for its key.
    ///
    /// A reconnect or explicit leave that raced ahead removed or replaced
    /// the pending entry; the generation check makes the stale timer firing
    /// a no-op.
    fn expire(&self, username: &str, room: &str, generation: u64) {
        let key = (username.to_string(), room.to_string());
        let triggered_by = {
            let mut state = self.lock();
            match state.pending.get(&key) {
                Some(pending) if pending.generation == generation => {}
                _ => return,
            }
            let triggered_by = state.pending.remove(&key).map(|p| p.connection_id);
            state.remove_from_room(username, room);
            state.remove_from_global(username);
            triggered_by
        };

        debug!(user = %username, room = %room, connection = ?triggered_by, "grace period expired");
        let expiration = Expiration {
            username: username.to_string(),
            room: room.to_string(),
        };
        if self.expirations.send(expiration).is_err() {
            warn!(user = %username, room = %room, "expiration dropped, no consumer");
        }
    }

    /// Usernames counted as present in `room`, sorted.
    #[must_use]
    pub fn snapshot_room(&self, room: &str) -> Vec<String> {
        let state = self.lock();
        let mut users: Vec<String> = state
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Usernames counted as online anywhere, sorted.
    #[must_use]
    pub fn snapshot_global(&self) -> Vec<String> {
        let state = self.lock();
        let mut users: Vec<String> = state.global.iter().cloned().collect();
        users.sort();
        users
    }

    /// The live association for a connection, if any.
    #[must_use]
    pub fn entry_for(&self, connection_id: &str) -> Option<PresenceEntry> {
        self.lock().entries.get(connection_id).cloned()
    }

    /// Connection ids with a live entry in `room`.
    #[must_use]
    pub fn connections_in_room(&self, room: &str) -> Vec<String> {
        self.lock()
            .entries
            .values()
            .filter(|e| e.room == room)
            .map(|e| e.connection_id.clone())
            .collect()
    }

    /// Whether a disconnect for the pair is inside its grace window.
    #[must_use]
    pub fn is_pending(&self, username: &str, room: &str) -> bool {
        self.lock()
            .pending
            .contains_key(&(username.to_string(), room.to_string()))
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        RegistryStats {
            connection_count: state.entries.len(),
            room_count: state.rooms.len(),
            online_count: state.global.len(),
            pending_count: state.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(5);

    fn registry() -> (PresenceRegistry, mpsc::UnboundedReceiver<Expiration>) {
        PresenceRegistry::new(GRACE)
    }

    #[tokio::test]
    async fn test_register_fresh_then_rejoin() {
        let (registry, _rx) = registry();

        let first = registry.register("conn-1", "alice", "lobby");
        assert_eq!(first.kind, JoinKind::Fresh);
        assert!(first.displaced.is_none());

        // Identical repeat on the same connection is idempotent.
        let again = registry.register("conn-1", "alice", "lobby");
        assert_eq!(again.kind, JoinKind::Rejoin);

        assert_eq!(registry.snapshot_room("lobby"), vec!["alice"]);
        assert_eq!(registry.snapshot_global(), vec!["alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancels_pending_disconnect() {
        let (registry, mut rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        registry.unregister_graceful("conn-1");
        assert!(registry.is_pending("alice", "lobby"));
        // Still present during the grace window.
        assert_eq!(registry.snapshot_room("lobby"), vec!["alice"]);
        assert_eq!(registry.snapshot_global(), vec!["alice"]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let registration = registry.register("conn-2", "alice", "lobby");
        assert_eq!(registration.kind, JoinKind::Reconnect);
        assert!(!registry.is_pending("alice", "lobby"));

        // The superseded timer fires and must be a no-op.
        tokio::time::sleep(GRACE * 2).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.snapshot_room("lobby"), vec!["alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_removes_user() {
        let (registry, mut rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        registry.unregister_graceful("conn-1");

        tokio::time::sleep(GRACE + Duration::from_millis(100)).await;

        let expiration = rx.try_recv().expect("expiration emitted");
        assert_eq!(expiration.username, "alice");
        assert_eq!(expiration.room, "lobby");
        assert!(rx.try_recv().is_err(), "exactly one expiration");

        assert!(registry.snapshot_room("lobby").is_empty());
        assert!(registry.snapshot_global().is_empty());
        assert_eq!(registry.stats().room_count, 0);
    }

    #[tokio::test]
    async fn test_claim_rejects_taken_name() {
        let (registry, _rx) = registry();

        registry.claim("conn-1", "alice", "lobby").unwrap();
        let err = registry.claim("conn-2", "alice", "lobby").unwrap_err();
        assert!(matches!(err, RegistryError::NameTaken { .. }));

        // Nothing mutated for the rejected connection.
        assert!(registry.entry_for("conn-2").is_none());
        assert_eq!(registry.snapshot_room("lobby"), vec!["alice"]);

        // A different name is fine, as is the same name in another room.
        registry.claim("conn-2", "bob", "lobby").unwrap();
        registry.claim("conn-3", "alice", "den").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_allows_grace_window_reconnect() {
        let (registry, _rx) = registry();

        registry.claim("conn-1", "alice", "lobby").unwrap();
        registry.unregister_graceful("conn-1");

        let registration = registry.claim("conn-2", "alice", "lobby").unwrap();
        assert_eq!(registration.kind, JoinKind::Reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_connection_keeps_user_present() {
        let (registry, mut rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        registry.register("conn-2", "alice", "lobby");

        // Losing one of two connections changes nothing and arms no timer.
        registry.unregister_graceful("conn-1");
        assert!(!registry.is_pending("alice", "lobby"));
        assert_eq!(registry.snapshot_room("lobby"), vec!["alice"]);
        assert_eq!(registry.snapshot_global(), vec!["alice"]);

        // Losing the last one starts the grace window, then removal.
        registry.unregister_graceful("conn-2");
        assert!(registry.is_pending("alice", "lobby"));
        tokio::time::sleep(GRACE * 2).await;
        assert!(rx.try_recv().is_ok());
        assert!(registry.snapshot_room("lobby").is_empty());
        assert!(registry.snapshot_global().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_unregister_cancels_pending() {
        let (registry, _rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        registry.unregister_graceful("conn-1");
        let registration = registry.register("conn-2", "alice", "lobby");
        assert_eq!(registration.kind, JoinKind::Reconnect);

        let entry = registry.unregister_explicit("conn-2").expect("entry");
        assert_eq!(entry.username, "alice");
        assert!(!registry.is_pending("alice", "lobby"));
        assert!(registry.snapshot_room("lobby").is_empty());
        assert!(registry.snapshot_global().is_empty());
    }

    #[tokio::test]
    async fn test_multi_room_user_stays_global() {
        let (registry, _rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        registry.register("conn-2", "alice", "den");

        registry.unregister_explicit("conn-1");
        assert!(registry.snapshot_room("lobby").is_empty());
        assert_eq!(registry.snapshot_room("den"), vec!["alice"]);
        assert_eq!(registry.snapshot_global(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_room_hop_displaces_old_association() {
        let (registry, _rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        let registration = registry.register("conn-1", "alice", "den");

        assert_eq!(registration.kind, JoinKind::Fresh);
        let displaced = registration.displaced.expect("old association");
        assert_eq!(displaced.room, "lobby");
        assert!(registry.snapshot_room("lobby").is_empty());
        assert_eq!(registry.snapshot_room("den"), vec!["alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_keeps_user_global_across_rooms() {
        let (registry, mut rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        registry.unregister_graceful("conn-1");

        // In grace: still online everywhere.
        assert_eq!(registry.snapshot_global(), vec!["alice"]);

        tokio::time::sleep(GRACE * 2).await;
        assert!(rx.try_recv().is_ok());
        assert!(registry.snapshot_global().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let (registry, _rx) = registry();

        registry.register("conn-1", "alice", "lobby");
        registry.register("conn-2", "bob", "lobby");
        registry.register("conn-3", "alice", "den");

        let stats = registry.stats();
        assert_eq!(stats.connection_count, 3);
        assert_eq!(stats.room_count, 2);
        assert_eq!(stats.online_count, 2);
        assert_eq!(stats.pending_count, 0);
    }
}
