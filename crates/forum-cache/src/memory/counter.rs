//! In-process counter store with Redis sorted-set, set and hash semantics.
//!
//! Key expiry is not modelled: `intersect_max` ignores its TTL.

use async_trait::async_trait;
use forum_core::{CounterBatch, CounterOp, CounterStore, DomainError, RepoResult};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl State {
    fn apply(&mut self, op: &CounterOp) {
        match op {
            CounterOp::IncrementBy { key, member, delta } => {
                *self
                    .zsets
                    .entry(key.clone())
                    .or_default()
                    .entry(member.clone())
                    .or_insert(0.0) += delta;
            }
            CounterOp::IncrementExisting { key, member, delta } => {
                if let Some(score) = self.zsets.get_mut(key).and_then(|z| z.get_mut(member)) {
                    *score += delta;
                }
            }
            CounterOp::SetScore { key, member, score } => {
                self.zsets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone(), *score);
            }
            CounterOp::RemoveMember { key, member } => {
                if let Some(zset) = self.zsets.get_mut(key) {
                    zset.remove(member);
                    if zset.is_empty() {
                        self.zsets.remove(key);
                    }
                }
            }
            CounterOp::SetAdd { key, member } => {
                self.sets
                    .entry(key.clone())
                    .or_default()
                    .insert(member.clone());
            }
            CounterOp::SetRemove { key, member } => {
                if let Some(set) = self.sets.get_mut(key) {
                    set.remove(member);
                    if set.is_empty() {
                        self.sets.remove(key);
                    }
                }
            }
            CounterOp::HashSet { key, field, value } => {
                self.hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.clone());
            }
            CounterOp::HashSetIfAbsent { key, field, value } => {
                self.hashes
                    .entry(key.clone())
                    .or_default()
                    .entry(field.clone())
                    .or_insert_with(|| value.clone());
            }
            CounterOp::HashDelete { key, field } => {
                if let Some(hash) = self.hashes.get_mut(key) {
                    hash.remove(field);
                    if hash.is_empty() {
                        self.hashes.remove(key);
                    }
                }
            }
            CounterOp::Delete { key } => {
                self.zsets.remove(key);
                self.sets.remove(key);
                self.hashes.remove(key);
            }
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.zsets.contains_key(key) || self.sets.contains_key(key) || self.hashes.contains_key(key)
    }

    /// Members of a key as (member, score); plain set members score 1
    fn scored(&self, key: &str) -> Option<HashMap<String, f64>> {
        if let Some(zset) = self.zsets.get(key) {
            return Some(zset.clone());
        }
        self.sets
            .get(key)
            .map(|set| set.iter().map(|m| (m.clone(), 1.0)).collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if Redis were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> RepoResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::CacheError("fast store unavailable".into()));
        }
        Ok(())
    }

    /// Number of live keys of every type
    pub fn key_count(&self) -> usize {
        let state = self.state.lock();
        state.zsets.len() + state.sets.len() + state.hashes.len()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_by(&self, key: &str, member: &str, delta: f64) -> RepoResult<f64> {
        self.check()?;
        let mut state = self.state.lock();
        let score = state
            .zsets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn score(&self, key: &str, member: &str) -> RepoResult<Option<f64>> {
        self.check()?;
        let state = self.state.lock();
        Ok(state.zsets.get(key).and_then(|z| z.get(member)).copied())
    }

    async fn set_add(&self, key: &str, member: &str) -> RepoResult<bool> {
        self.check()?;
        let mut state = self.state.lock();
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_is_member(&self, key: &str, member: &str) -> RepoResult<bool> {
        self.check()?;
        let state = self.state.lock();
        Ok(state.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn set_members(&self, key: &str) -> RepoResult<Vec<String>> {
        self.check()?;
        let state = self.state.lock();
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn range_by_score_desc(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> RepoResult<Vec<String>> {
        self.check()?;
        let state = self.state.lock();
        let Some(zset) = state.zsets.get(key) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(&String, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
        // Ties fall back to reverse lexicographic order, like ZREVRANGE
        entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(m, _)| m.clone())
            .collect())
    }

    async fn hash_get(&self, key: &str, field: &str) -> RepoResult<Option<String>> {
        self.check()?;
        let state = self.state.lock();
        Ok(state.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn exists(&self, key: &str) -> RepoResult<bool> {
        self.check()?;
        Ok(self.state.lock().exists(key))
    }

    async fn intersect_max(&self, dest: &str, keys: &[String], _ttl: Duration) -> RepoResult<()> {
        self.check()?;
        let mut state = self.state.lock();

        let mut sources = keys.iter().map(|k| state.scored(k).unwrap_or_default());
        let mut result = sources.next().unwrap_or_default();
        for source in sources {
            result = result
                .into_iter()
                .filter_map(|(member, score)| {
                    source.get(&member).map(|other| (member, score.max(*other)))
                })
                .collect();
        }

        state.zsets.remove(dest);
        if !result.is_empty() {
            state.zsets.insert(dest.to_string(), result);
        }
        Ok(())
    }

    async fn execute(&self, batch: CounterBatch) -> RepoResult<()> {
        self.check()?;
        let mut state = self.state.lock();
        for op in batch.ops() {
            state.apply(op);
        }
        Ok(())
    }
}
