//! Fan-out over per-connection channels.

use dashmap::DashMap;
use roomcast_core::{Notifier, PresenceRegistry};
use roomcast_protocol::ServerEvent;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Delivers server events through each connection's outbound channel.
///
/// Room recipients are resolved against the registry's live entries at send
/// time, so a connection inside its grace window never receives broadcasts.
pub struct ChannelNotifier {
    registry: PresenceRegistry,
    senders: DashMap<String, mpsc::UnboundedSender<ServerEvent>>,
}

impl ChannelNotifier {
    /// Create a notifier resolving recipients through `registry`.
    #[must_use]
    pub fn new(registry: PresenceRegistry) -> Self {
        Self {
            registry,
            senders: DashMap::new(),
        }
    }

    /// Register a connection's outbound channel.
    pub fn attach(&self, connection_id: &str, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.senders.insert(connection_id.to_string(), sender);
    }

    /// Drop a connection's outbound channel.
    pub fn detach(&self, connection_id: &str) {
        self.senders.remove(connection_id);
    }

    fn send(&self, connection_id: &str, event: ServerEvent) {
        if let Some(sender) = self.senders.get(connection_id) {
            if sender.send(event).is_err() {
                // The pump is gone; the disconnect path will detach us.
                debug!(connection = %connection_id, "dropped event for closed connection");
            }
        }
    }
}

impl Notifier for ChannelNotifier {
    fn broadcast(&self, room: &str, event: &ServerEvent, exclude: Option<&str>) {
        let recipients = self.registry.connections_in_room(room);
        trace!(room = %room, event = event.name(), recipients = recipients.len(), "broadcast");
        for connection_id in recipients {
            if exclude == Some(connection_id.as_str()) {
                continue;
            }
            self.send(&connection_id, event.clone());
        }
    }

    fn unicast(&self, connection_id: &str, event: ServerEvent) {
        self.send(connection_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_broadcast_reaches_room_except_excluded() {
        let (registry, _rx) = PresenceRegistry::new(Duration::from_secs(5));
        let notifier = ChannelNotifier::new(registry.clone());

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        notifier.attach("conn-1", tx1);
        notifier.attach("conn-2", tx2);
        notifier.attach("conn-3", tx3);

        registry.register("conn-1", "alice", "lobby");
        registry.register("conn-2", "bob", "lobby");
        registry.register("conn-3", "carol", "den");

        notifier.broadcast("lobby", &ServerEvent::error("ping"), Some("conn-1"));

        assert!(rx1.try_recv().is_err(), "excluded connection");
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err(), "different room");
    }

    #[tokio::test]
    async fn test_unicast_and_detach() {
        let (registry, _rx) = PresenceRegistry::new(Duration::from_secs(5));
        let notifier = ChannelNotifier::new(registry);

        let (tx, mut rx) = mpsc::unbounded_channel();
        notifier.attach("conn-1", tx);

        notifier.unicast("conn-1", ServerEvent::error("hi"));
        assert!(rx.try_recv().is_ok());

        notifier.detach("conn-1");
        notifier.unicast("conn-1", ServerEvent::error("gone"));
        assert!(rx.try_recv().is_err());
    }
}
