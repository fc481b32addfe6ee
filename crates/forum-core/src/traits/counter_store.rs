//! Fast-store port: sorted sets, plain sets and hashes.
//!
//! No business logic lives behind this trait. Multi-key writes are expressed as a
//! [`CounterBatch`], which is sent as one pipeline and is only atomic when built
//! with [`CounterBatch::atomic`].

use async_trait::async_trait;
use std::time::Duration;

use super::authoritative::RepoResult;

#[derive(Debug, Clone, PartialEq)]
pub enum CounterOp {
    /// ZINCRBY, creating the member if needed
    IncrementBy { key: String, member: String, delta: f64 },
    /// ZADD XX INCR: only touches members that already exist
    IncrementExisting { key: String, member: String, delta: f64 },
    /// ZADD
    SetScore { key: String, member: String, score: f64 },
    /// ZREM
    RemoveMember { key: String, member: String },
    /// SADD
    SetAdd { key: String, member: String },
    /// SREM
    SetRemove { key: String, member: String },
    /// HSET
    HashSet { key: String, field: String, value: String },
    /// HSETNX: leaves an existing field alone
    HashSetIfAbsent { key: String, field: String, value: String },
    /// HDEL
    HashDelete { key: String, field: String },
    /// DEL
    Delete { key: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CounterBatch {
    atomic: bool,
    ops: Vec<CounterOp>,
}

impl CounterBatch {
    /// All ops apply together or not at all (MULTI/EXEC)
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            ops: Vec::new(),
        }
    }

    /// One round trip, no cross-key atomicity
    pub fn pipelined() -> Self {
        Self::default()
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[CounterOp] {
        &self.ops
    }

    pub fn push(&mut self, op: CounterOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn extend(&mut self, other: CounterBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn increment_by(&mut self, key: impl Into<String>, member: impl Into<String>, delta: f64) -> &mut Self {
        self.push(CounterOp::IncrementBy {
            key: key.into(),
            member: member.into(),
            delta,
        })
    }

    pub fn increment_existing(&mut self, key: impl Into<String>, member: impl Into<String>, delta: f64) -> &mut Self {
        self.push(CounterOp::IncrementExisting {
            key: key.into(),
            member: member.into(),
            delta,
        })
    }

    pub fn set_score(&mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> &mut Self {
        self.push(CounterOp::SetScore {
            key: key.into(),
            member: member.into(),
            score,
        })
    }

    pub fn remove_member(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(CounterOp::RemoveMember {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(CounterOp::SetAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(CounterOp::SetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn hash_set(&mut self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(CounterOp::HashSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn hash_set_if_absent(&mut self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(CounterOp::HashSetIfAbsent {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    pub fn hash_delete(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.push(CounterOp::HashDelete {
            key: key.into(),
            field: field.into(),
        })
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(CounterOp::Delete { key: key.into() })
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomic per key; returns the new score
    async fn increment_by(&self, key: &str, member: &str, delta: f64) -> RepoResult<f64>;

    async fn score(&self, key: &str, member: &str) -> RepoResult<Option<f64>>;

    /// Returns true if the member was newly added
    async fn set_add(&self, key: &str, member: &str) -> RepoResult<bool>;

    async fn set_is_member(&self, key: &str, member: &str) -> RepoResult<bool>;

    async fn set_members(&self, key: &str) -> RepoResult<Vec<String>>;

    /// Members ordered by descending score, `limit` entries starting at `offset`
    async fn range_by_score_desc(&self, key: &str, offset: usize, limit: usize) -> RepoResult<Vec<String>>;

    async fn hash_get(&self, key: &str, field: &str) -> RepoResult<Option<String>>;

    async fn exists(&self, key: &str) -> RepoResult<bool>;

    /// Intersect sets/sorted sets into `dest` keeping the max score, then expire `dest`
    async fn intersect_max(&self, dest: &str, keys: &[String], ttl: Duration) -> RepoResult<()>;

    async fn execute(&self, batch: CounterBatch) -> RepoResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_builder() {
        let mut batch = CounterBatch::atomic();
        batch
            .increment_by("post:vote_up", "1", 1.0)
            .hash_set("post:user_action:1", "7", "like");
        assert!(batch.is_atomic());
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.ops()[1],
            CounterOp::HashSet {
                key: "post:user_action:1".into(),
                field: "7".into(),
                value: "like".into()
            }
        );
        assert!(!CounterBatch::pipelined().is_atomic());
    }
}
