//! Probabilistic membership port.
//!
//! `may_contain == false` proves absence. `true` only means "go and look".

use async_trait::async_trait;

use super::authoritative::RepoResult;

#[async_trait]
pub trait MembershipFilter: Send + Sync {
    /// Whether the named filter has been created
    async fn exists(&self, filter: &str) -> RepoResult<bool>;

    /// Create the named filter; a no-op if it already exists
    async fn reserve(&self, filter: &str, error_rate: f64, capacity: u64) -> RepoResult<()>;

    /// Returns true if the item was not present before
    async fn add(&self, filter: &str, item: &str) -> RepoResult<bool>;

    async fn may_contain(&self, filter: &str, item: &str) -> RepoResult<bool>;
}
