//! In-process bloom filters, one per name.
//!
//! Sized the same way RedisBloom sizes `BF.RESERVE`, so false positives are
//! possible and false negatives are not.

use async_trait::async_trait;
use dashmap::DashMap;
use forum_core::{DomainError, MembershipFilter, RepoResult};
use std::collections::hash_map::DefaultHasher;
use std::f64::consts::LN_2;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};

/// RedisBloom's parameters for a filter created implicitly by `BF.ADD`
const IMPLICIT_ERROR_RATE: f64 = 0.01;
const IMPLICIT_CAPACITY: u64 = 100;

#[derive(Debug, Clone)]
struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    fn with_rate(error_rate: f64, capacity: u64) -> Self {
        let n = capacity.max(1) as f64;
        let p = error_rate.clamp(f64::MIN_POSITIVE, 0.5);
        let num_bits = (-(n * p.ln()) / (LN_2 * LN_2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * LN_2).round().max(1.0) as u32;
        Self {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Kirsch-Mitzenmacher double hashing
    fn positions(&self, item: &str) -> impl Iterator<Item = u64> + '_ {
        let mut first = DefaultHasher::new();
        item.hash(&mut first);
        let h1 = first.finish();

        let mut second = DefaultHasher::new();
        (item, 0x9e37_79b9_u32).hash(&mut second);
        let h2 = second.finish() | 1;

        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    fn insert(&mut self, item: &str) -> bool {
        let positions: Vec<u64> = self.positions(item).collect();
        let mut fresh = false;
        for pos in positions {
            let (word, bit) = ((pos / 64) as usize, pos % 64);
            if self.bits[word] & (1 << bit) == 0 {
                fresh = true;
                self.bits[word] |= 1 << bit;
            }
        }
        fresh
    }

    fn contains(&self, item: &str) -> bool {
        self.positions(item)
            .all(|pos| self.bits[(pos / 64) as usize] & (1 << (pos % 64)) != 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryFilter {
    filters: DashMap<String, BloomFilter>,
    unavailable: AtomicBool,
}

impl InMemoryFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the RedisBloom module were missing
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> RepoResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::FilterError("membership filter unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipFilter for InMemoryFilter {
    async fn exists(&self, filter: &str) -> RepoResult<bool> {
        self.check()?;
        Ok(self.filters.contains_key(filter))
    }

    async fn reserve(&self, filter: &str, error_rate: f64, capacity: u64) -> RepoResult<()> {
        self.check()?;
        self.filters
            .entry(filter.to_string())
            .or_insert_with(|| BloomFilter::with_rate(error_rate, capacity));
        Ok(())
    }

    async fn add(&self, filter: &str, item: &str) -> RepoResult<bool> {
        self.check()?;
        let mut bloom = self
            .filters
            .entry(filter.to_string())
            .or_insert_with(|| BloomFilter::with_rate(IMPLICIT_ERROR_RATE, IMPLICIT_CAPACITY));
        Ok(bloom.insert(item))
    }

    async fn may_contain(&self, filter: &str, item: &str) -> RepoResult<bool> {
        self.check()?;
        Ok(self
            .filters
            .get(filter)
            .is_some_and(|bloom| bloom.contains(item)))
    }
}
