use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::{NotificationError, NotificationEvent, NotificationPublisher};

pub type EventSender = broadcast::Sender<String>;
pub type EventReceiver = broadcast::Receiver<String>;

const CHANNEL_CAPACITY: usize = 100;
const GLOBAL_CAPACITY: usize = 1000;

/// In-process fan-out of schedule events to per-room subscribers.
///
/// Every published event is also mirrored to a global stream for monitoring.
pub struct BroadcastHub {
    channels: Arc<RwLock<HashMap<String, EventSender>>>,
    global_sender: EventSender,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(GLOBAL_CAPACITY);

        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            global_sender,
        }
    }

    /// Join a room, creating it on first use.
    pub async fn subscribe(&self, channel: &str) -> EventReceiver {
        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| {
                debug!("Created broadcast channel {}", channel);
                broadcast::channel(CHANNEL_CAPACITY).0
            });
        sender.subscribe()
    }

    pub async fn remove_channel(&self, channel: &str) {
        let mut channels = self.channels.write().await;
        channels.remove(channel);
        debug!("Removed broadcast channel {}", channel);
    }

    pub fn subscribe_global(&self) -> EventReceiver {
        self.global_sender.subscribe()
    }

    pub async fn active_channels(&self) -> Vec<String> {
        let channels = self.channels.read().await;
        let mut names: Vec<String> = channels.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl NotificationPublisher for BroadcastHub {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), NotificationError> {
        let envelope = NotificationEvent::new(channel, event, payload.clone());
        let message = serde_json::to_string(&envelope)?;

        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(channel) {
                // A room with no live receivers is not an error.
                if sender.send(message.clone()).is_err() {
                    debug!("No subscribers on {} for {}", channel, event);
                }
            }
        }

        if self.global_sender.send(message).is_err() {
            debug!("No global subscribers for {}", event);
        }

        debug!("Broadcast {} on {}", event, channel);
        Ok(())
    }
}

impl Clone for BroadcastHub {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            global_sender: self.global_sender.clone(),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
