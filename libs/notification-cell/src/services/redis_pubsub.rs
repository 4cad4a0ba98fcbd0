use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info};

use crate::{NotificationError, NotificationEvent, NotificationPublisher};

const CHANNEL_PREFIX: &str = "clinic";

/// Publishes schedule events to Redis pub/sub so that socket gateways running
/// in other processes can relay them to connected clients.
pub struct RedisPublisher {
    pool: Pool,
}

impl RedisPublisher {
    pub async fn new(redis_url: &str) -> Result<Self, NotificationError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| NotificationError::PoolError(format!("Pool creation error: {}", e)))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| NotificationError::PoolError(format!("Connection error: {}", e)))?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis publisher initialized");

        Ok(Self { pool })
    }

    pub fn channel_key(channel: &str) -> String {
        format!("{}:{}", CHANNEL_PREFIX, channel)
    }

    async fn get_connection(&self) -> Result<Connection, NotificationError> {
        self.pool
            .get()
            .await
            .map_err(|e| NotificationError::PoolError(e.to_string()))
    }
}

#[async_trait]
impl NotificationPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: &Value) -> Result<(), NotificationError> {
        let envelope = NotificationEvent::new(channel, event, payload.clone());
        let message = serde_json::to_string(&envelope)?;

        let mut conn = self.get_connection().await?;
        let receivers: i64 = conn
            .publish(Self::channel_key(channel), message)
            .await
            .map_err(|e| NotificationError::PublishFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Published {} on {} to {} receivers", event, channel, receivers);
        Ok(())
    }
}
