use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Publish failed on channel {channel}: {reason}")]
    PublishFailed { channel: String, reason: String },

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
