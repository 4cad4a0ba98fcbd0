pub mod publisher;
pub mod broadcast;
pub mod redis_pubsub;

pub use publisher::*;
pub use broadcast::*;
pub use redis_pubsub::*;
