//! Reliable Redis list queue for pending events

mod redis_queue;

pub use redis_queue::{RedisEventConsumer, RedisEventQueue};
