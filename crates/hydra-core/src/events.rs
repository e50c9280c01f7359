//! In-process event bus (§4.3, §4.7): migration progress and security
//! findings publish here; `hydra-server`'s dashboard SSE endpoints subscribe
//! and forward to clients. A lagging subscriber drops the oldest events
//! rather than blocking publishers.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// One notable occurrence a dashboard subscriber cares about.
#[derive(Debug, Clone)]
pub enum ControlPlaneEvent {
    MigrationStep { username: String, migration_id: String, step: i32, message: String },
    MigrationFailed { username: String, migration_id: String, reason: String },
    SecurityFinding { username: String, kind: String, severity: String, detail: String },
    ActivityLogged { username: String, category: String, action: String, success: bool },
}

/// A cloneable handle to the shared event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlPlaneEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns without error even if there are currently
    /// no subscribers.
    pub fn publish(&self, event: ControlPlaneEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControlPlaneEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(ControlPlaneEvent::MigrationStep {
            username: "dex".to_owned(),
            migration_id: "m1".to_owned(),
            step: 1,
            message: "stopping".to_owned(),
        });

        let received = rx.recv().await.expect("recv");
        assert!(matches!(received, ControlPlaneEvent::MigrationStep { step: 1, .. }));
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(ControlPlaneEvent::SecurityFinding {
            username: "eve".to_owned(),
            kind: "mining_detected".to_owned(),
            severity: "critical".to_owned(),
            detail: "xmrig".to_owned(),
        });
    }
}
