//! RedisBloom membership filter

mod redis_bloom;

pub use redis_bloom::RedisBloomFilter;
