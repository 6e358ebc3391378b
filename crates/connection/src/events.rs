//! Connection lifecycle notifications.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

/// Something observable happened on the connection.
///
/// Each event is published once per occurrence, at the state transition that
/// caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// Socket open and handshake attempted; commands may be sent.
    Connected,
    Disconnected,
    /// A retry was scheduled. `attempt` is 1-based.
    Reconnecting {
        attempt: u32,
        #[serde(rename = "delay_ms", serialize_with = "as_millis")]
        delay: Duration,
    },
    /// Transport failure, or a frame no caller was waiting for.
    Error { message: String },
    /// The addon's version differs from the bridge's.
    VersionMismatch {
        server_version: String,
        addon_version: String,
        project_path: String,
    },
    /// The handshake timed out or failed; the connection stays usable.
    HandshakeFailed { error: String },
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Fan-out of [`ConnectionEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(ConnectionEvent::Connected);
        bus.emit(ConnectionEvent::Disconnected);
        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::Connected);
        assert_eq!(rx.try_recv().unwrap(), ConnectionEvent::Disconnected);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        EventBus::new(1).emit(ConnectionEvent::Connected);
    }

    #[test]
    fn reconnecting_serializes_delay_as_millis() {
        let ev = ConnectionEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(2),
        };
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            serde_json::json!({"type": "reconnecting", "attempt": 2, "delay_ms": 2000})
        );
    }
}
