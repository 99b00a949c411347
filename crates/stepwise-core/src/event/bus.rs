//! Broadcast event bus for distributing `WorkflowEvent` to subscribers.
//!
//! Publishing with no active subscribers is a no-op; the orchestrator never
//! waits on a listener.

use stepwise_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for workflow events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning shares the sender, so
/// the machine, the executor and any listener all see the same stream.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    /// A slow subscriber that falls further behind sees `Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers. Dropped when there are none.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn waiting() -> WorkflowEvent {
        WorkflowEvent::WorkflowWaiting {
            workflow_id: Uuid::now_v7(),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(waiting());

        assert!(matches!(rx1.recv().await.unwrap(), WorkflowEvent::WorkflowWaiting { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), WorkflowEvent::WorkflowWaiting { .. }));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(waiting());
    }

    #[test]
    fn lagged_receiver_reports_lag() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        for _ in 0..10 {
            bus.publish(waiting());
        }
        match rx.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.clone().publish(waiting());
        assert!(rx.try_recv().is_ok());
    }
}
