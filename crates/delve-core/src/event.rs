use tracing::trace;

use crate::types::WorkflowEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: WorkflowEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(tokio::sync::broadcast::error::SendError(event)) => {
                trace!(run_id = %event.run_id(), "Workflow event dropped, no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunId;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let delivered = bus.publish(WorkflowEvent::StepStarted {
            run_id: RunId::from_string("r1"),
            step: "planner".into(),
            index: 0,
        });
        assert_eq!(delivered, 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id().0, "r1");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let delivered = bus.publish(WorkflowEvent::RunFinished {
            run_id: RunId::new(),
            outcome: "answered".into(),
            steps_executed: 3,
        });
        assert_eq!(delivered, 0);
    }
}
