use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::constants::events;

use super::types::{RecoveryAttempted, StepStatusChanged, WorkflowStatusChanged};

/// Broadcast publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedEvent {
    /// Decode the context back into a typed payload
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, PublishError> {
        Ok(serde_json::from_value(self.context.clone())?)
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event with the given name and context.
    ///
    /// Never blocks; callers holding instance locks may publish.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) -> Result<(), PublishError> {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        // send() only fails when nobody is subscribed, which is fine for notifications
        let _ = self.sender.send(event);
        Ok(())
    }

    pub fn publish_payload<T: Serialize>(
        &self,
        event_name: &str,
        payload: &T,
    ) -> Result<(), PublishError> {
        let context = serde_json::to_value(payload)?;
        self.publish(event_name, context)
    }

    pub fn publish_workflow_status_changed(
        &self,
        event: &WorkflowStatusChanged,
    ) -> Result<(), PublishError> {
        self.publish_payload(events::WORKFLOW_STATUS_CHANGED, event)
    }

    pub fn publish_step_changed(&self, event: &StepStatusChanged) -> Result<(), PublishError> {
        self.publish_payload(events::WORKFLOW_STEP_CHANGED, event)
    }

    pub fn publish_recovery_attempted(&self, event: &RecoveryAttempted) -> Result<(), PublishError> {
        self.publish_payload(events::WORKFLOW_RECOVERY_ATTEMPTED, event)
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
