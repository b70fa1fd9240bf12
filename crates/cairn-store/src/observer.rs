//! Observers notified when a session context changes
//!
//! Delivery is local fan-out only: each subscriber sees at most one event per
//! update call, and nothing is queued or retried.

use cairn_core::{SessionContext, Stage};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What happened to the context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEventKind {
    Updated,
    Advanced { from: Stage, to: Stage },
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEvent {
    pub kind: ContextEventKind,
    pub context: SessionContext,
}

/// Trait for context observers
///
/// Implementations must not block; they run inline with the write.
pub trait ContextObserver: Send + Sync {
    fn on_context_event(&self, event: &ContextEvent);
}

/// Observer that forwards events onto a broadcast channel
pub struct ChannelObserver {
    sender: broadcast::Sender<ContextEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ContextEvent>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.sender.subscribe()
    }
}

impl ContextObserver for ChannelObserver {
    fn on_context_event(&self, event: &ContextEvent) {
        // No receivers is fine: the event is simply dropped
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_observer_forwards() {
        let (observer, mut rx) = ChannelObserver::new(8);
        let event = ContextEvent {
            kind: ContextEventKind::Updated,
            context: SessionContext::new("s1"),
        };
        observer.on_context_event(&event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, ContextEventKind::Updated);
        assert_eq!(received.context.session_id, "s1");
    }

    #[test]
    fn test_channel_observer_without_receivers() {
        let (observer, rx) = ChannelObserver::new(1);
        drop(rx);
        observer.on_context_event(&ContextEvent {
            kind: ContextEventKind::Updated,
            context: SessionContext::new("s1"),
        });
    }
}
