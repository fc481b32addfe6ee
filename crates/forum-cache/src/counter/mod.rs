//! Counter store adapter

mod redis_counter;

pub use redis_counter::RedisCounterStore;
