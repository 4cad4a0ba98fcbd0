use async_trait::async_trait;
use serde_json::Value;

use crate::NotificationError;

/// Publish-subscribe transport for schedule events.
///
/// Delivery is at-most-once: implementations do not retry and callers must not
/// make state changes depend on the outcome.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), NotificationError>;
}

/// Drops every event. Used when live updates are disabled.
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

#[async_trait]
impl NotificationPublisher for NoopPublisher {
    async fn publish(&self, _channel: &str, _event: &str, _payload: &Value) -> Result<(), NotificationError> {
        Ok(())
    }
}
