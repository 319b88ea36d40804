//! Outbound event delivery seam.

use roomcast_protocol::ServerEvent;

/// Delivers events to every connection in a room, or to one connection.
///
/// Implementations are thin glue over the transport: no queuing, ordering,
/// or retry of their own. A failed delivery means the connection is gone
/// and its disconnect path will clean up.
pub trait Notifier: Send + Sync {
    /// Deliver `event` to every live connection in `room`, optionally
    /// excluding one (typically the originator).
    fn broadcast(&self, room: &str, event: &ServerEvent, exclude: Option<&str>);

    /// Deliver `event` to a single connection.
    fn unicast(&self, connection_id: &str, event: ServerEvent);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// A captured delivery.
    #[derive(Debug, Clone)]
    pub(crate) enum Delivery {
        Broadcast {
            room: String,
            event: ServerEvent,
            exclude: Option<String>,
        },
        Unicast {
            connection_id: String,
            event: ServerEvent,
        },
    }

    impl Delivery {
        pub(crate) fn event(&self) -> &ServerEvent {
            match self {
                Self::Broadcast { event, .. } | Self::Unicast { event, .. } => event,
            }
        }
    }

    /// Records every delivery for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingNotifier {
        deliveries: Mutex<Vec<Delivery>>,
    }

    impl RecordingNotifier {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Drain and return everything delivered so far.
        pub(crate) fn take(&self) -> Vec<Delivery> {
            std::mem::take(&mut *self.deliveries.lock().unwrap())
        }

        /// Count deliveries whose event has the given wire name.
        pub(crate) fn count_named(&self, name: &str) -> usize {
            self.deliveries
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.event().name() == name)
                .count()
        }
    }

    impl Notifier for RecordingNotifier {
        fn broadcast(&self, room: &str, event: &ServerEvent, exclude: Option<&str>) {
            self.deliveries.lock().unwrap().push(Delivery::Broadcast {
                room: room.to_string(),
                event: event.clone(),
                exclude: exclude.map(str::to_string),
            });
        }

        fn unicast(&self, connection_id: &str, event: ServerEvent) {
            self.deliveries.lock().unwrap().push(Delivery::Unicast {
                connection_id: connection_id.to_string(),
                event,
            });
        }
    }
}
