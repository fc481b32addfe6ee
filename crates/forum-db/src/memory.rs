//! In-process relational store.
//!
//! Transactions are serializable: `begin` takes the store lock and holds it
//! until commit or rollback, writing to a private copy that replaces the live
//! state on commit. Do not call back into the store while a transaction is open.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use forum_core::entities::{
    ActionClass, ActionRecord, CommentNode, FeedOrder, Metric, TargetKind, UpsertOutcome,
};
use forum_core::error::DomainError;
use forum_core::traits::{ActionWrite, AuthoritativeStore, RepoResult, StoreTransaction};
use forum_core::value_objects::Snowflake;

type RecordKey = (ActionClass, Snowflake, Snowflake);

#[derive(Debug, Clone)]
struct PostRow {
    community_id: Snowflake,
    created_at: i64,
    click_numbers: i64,
}

#[derive(Debug, Clone, Default)]
struct State {
    /// (class, actor, target) -> (row id, record)
    records: HashMap<RecordKey, (Snowflake, ActionRecord)>,
    comments: BTreeMap<Snowflake, CommentNode>,
    posts: BTreeMap<Snowflake, PostRow>,
}

impl State {
    fn upsert(&mut self, write: &ActionWrite) -> UpsertOutcome {
        let record = write.record;
        let key = (record.class, record.actor_id, record.target_id);
        let stored = self.records.get(&key).map(|(row_id, r)| (*row_id, r.state));
        match (stored, record.state.is_none()) {
            (None, true) => UpsertOutcome::Unchanged,
            (None, false) => {
                self.records.insert(key, (write.row_id, record));
                UpsertOutcome::Inserted
            }
            (Some(_), true) => {
                self.records.remove(&key);
                UpsertOutcome::Deleted
            }
            (Some((_, state)), false) if state == record.state => UpsertOutcome::Unchanged,
            (Some((row_id, _)), false) => {
                self.records.insert(key, (row_id, record));
                UpsertOutcome::Updated
            }
        }
    }

    fn delete_comments(&mut self, ids: &[Snowflake]) -> u64 {
        let doomed: HashSet<Snowflake> = ids.iter().copied().collect();
        self.records
            .retain(|(class, _, target), _| !(*class == ActionClass::CommentVote && doomed.contains(target)));
        let before = self.comments.len();
        self.comments.retain(|id, _| !doomed.contains(id));
        (before - self.comments.len()) as u64
    }

    fn delete_target(&mut self, kind: TargetKind, id: Snowflake) -> u64 {
        match kind {
            TargetKind::Post => {
                let comment_ids: Vec<Snowflake> = self
                    .comments
                    .values()
                    .filter(|c| c.post_id == id)
                    .map(|c| c.comment_id)
                    .collect();
                self.delete_comments(&comment_ids);
                self.records.retain(|(class, _, target), _| {
                    !(matches!(class, ActionClass::PostVote | ActionClass::Collection) && *target == id)
                });
                u64::from(self.posts.remove(&id).is_some())
            }
            TargetKind::Comment => self.delete_comments(&[id]),
            TargetKind::User => {
                let before = self.records.len();
                self.records.retain(|(class, actor, target), _| {
                    *actor != id && !(*class == ActionClass::Follow && *target == id)
                });
                (before - self.records.len()) as u64
            }
        }
    }

    fn count_records(&self, metric: Metric, id: Snowflake) -> i64 {
        let Some((class, state)) = metric.counted_records() else {
            return 0;
        };
        self.records
            .values()
            .filter(|(_, r)| r.class == class && r.state == state)
            .filter(|(_, r)| {
                if metric.keyed_by_actor() {
                    r.actor_id == id
                } else {
                    r.target_id == id
                }
            })
            .count() as i64
    }

    fn descendants(&self, root: Snowflake) -> i64 {
        let mut children: HashMap<Snowflake, Vec<Snowflake>> = HashMap::new();
        for c in self.comments.values() {
            children.entry(c.parent_comment_id).or_default().push(c.comment_id);
        }
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut count = 0;
        while let Some(id) = queue.pop_front() {
            for child in children.get(&id).into_iter().flatten() {
                if seen.insert(*child) {
                    count += 1;
                    queue.push_back(*child);
                }
            }
        }
        count
    }
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    failing_commits: AtomicUsize,
}

impl Faults {
    fn check(&self) -> RepoResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::DatabaseError("relational store unavailable".into()));
        }
        Ok(())
    }
}

/// Relational store held in memory, with fault injection for tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuthoritativeStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

impl InMemoryAuthoritativeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` commits; their writes are discarded
    pub fn fail_next_commits(&self, n: usize) {
        self.faults.failing_commits.store(n, Ordering::SeqCst);
    }

    pub async fn insert_post(&self, post_id: Snowflake, community_id: Snowflake, created_at: i64) {
        self.state.lock().await.posts.insert(
            post_id,
            PostRow {
                community_id,
                created_at,
                click_numbers: 0,
            },
        );
    }

    /// Write a record directly, bypassing transactions
    pub async fn seed_record(&self, row_id: Snowflake, record: ActionRecord) {
        self.state
            .lock()
            .await
            .upsert(&ActionWrite::new(row_id, record));
    }

    pub async fn seed_comment(&self, comment: CommentNode) {
        self.state
            .lock()
            .await
            .comments
            .insert(comment.comment_id, comment);
    }

    /// Every stored record of a class
    pub async fn records(&self, class: ActionClass) -> Vec<ActionRecord> {
        self.state
            .lock()
            .await
            .records
            .values()
            .filter(|(_, r)| r.class == class)
            .map(|(_, r)| *r)
            .collect()
    }

    pub async fn row_id(&self, actor: Snowflake, target: Snowflake, class: ActionClass) -> Option<Snowflake> {
        self.state
            .lock()
            .await
            .records
            .get(&(class, actor, target))
            .map(|(row_id, _)| *row_id)
    }

    pub async fn comment_count(&self) -> usize {
        self.state.lock().await.comments.len()
    }
}

#[async_trait]
impl AuthoritativeStore for InMemoryAuthoritativeStore {
    async fn get_action_record(
        &self,
        actor_id: Snowflake,
        target_id: Snowflake,
        class: ActionClass,
    ) -> RepoResult<Option<ActionRecord>> {
        self.faults.check()?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&(class, actor_id, target_id))
            .map(|(_, r)| *r))
    }

    async fn count_by_target_and_class(&self, target_id: Snowflake, metric: Metric) -> RepoResult<i64> {
        self.faults.check()?;
        let state = self.state.lock().await;
        let count = match metric {
            Metric::ClickCount => state.posts.get(&target_id).map_or(0, |p| p.click_numbers),
            Metric::CommentCount => state
                .comments
                .values()
                .filter(|c| c.post_id == target_id)
                .count() as i64,
            Metric::Descendants => state.descendants(target_id),
            _ => state.count_records(metric, target_id),
        };
        Ok(count)
    }

    async fn begin(&self) -> RepoResult<Box<dyn StoreTransaction>> {
        self.faults.check()?;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn comment(&self, comment_id: Snowflake) -> RepoResult<Option<CommentNode>> {
        self.faults.check()?;
        Ok(self.state.lock().await.comments.get(&comment_id).cloned())
    }

    async fn root_of(&self, comment_id: Snowflake) -> RepoResult<Option<Snowflake>> {
        self.faults.check()?;
        let state = self.state.lock().await;
        let Some(mut current) = state.comments.get(&comment_id) else {
            return Ok(None);
        };
        let mut seen = HashSet::from([current.comment_id]);
        while !current.is_root() {
            match state.comments.get(&current.parent_comment_id) {
                Some(parent) if seen.insert(parent.comment_id) => current = parent,
                _ => break,
            }
        }
        Ok(Some(current.comment_id))
    }

    async fn comments_by_post(&self, post_id: Snowflake) -> RepoResult<Vec<CommentNode>> {
        self.faults.check()?;
        Ok(self
            .state
            .lock()
            .await
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn existing_posts(&self, post_ids: &[Snowflake]) -> RepoResult<Vec<Snowflake>> {
        self.faults.check()?;
        let state = self.state.lock().await;
        Ok(post_ids
            .iter()
            .filter(|id| state.posts.contains_key(id))
            .copied()
            .collect())
    }

    async fn post_scores(&self, order: FeedOrder) -> RepoResult<Vec<(Snowflake, f64)>> {
        self.faults.check()?;
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .map(|(id, post)| {
                let score = match order {
                    FeedOrder::Time => post.created_at as f64,
                    FeedOrder::Score => {
                        (state.count_records(Metric::VoteUp, *id)
                            - state.count_records(Metric::VoteDown, *id)) as f64
                    }
                };
                (*id, score)
            })
            .collect())
    }

    async fn community_posts(&self, community_id: Snowflake) -> RepoResult<Vec<Snowflake>> {
        self.faults.check()?;
        Ok(self
            .state
            .lock()
            .await
            .posts
            .iter()
            .filter(|(_, p)| p.community_id == community_id)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn post_community(&self, post_id: Snowflake) -> RepoResult<Option<Snowflake>> {
        self.faults.check()?;
        Ok(self
            .state
            .lock()
            .await
            .posts
            .get(&post_id)
            .map(|p| p.community_id))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<Faults>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn upsert_action_records(&mut self, writes: &[ActionWrite]) -> RepoResult<Vec<UpsertOutcome>> {
        self.faults.check()?;
        Ok(writes.iter().map(|w| self.working.upsert(w)).collect())
    }

    async fn delete_target(&mut self, kind: TargetKind, target_id: Snowflake) -> RepoResult<u64> {
        self.faults.check()?;
        Ok(self.working.delete_target(kind, target_id))
    }

    async fn delete_comments(&mut self, comment_ids: &[Snowflake]) -> RepoResult<u64> {
        self.faults.check()?;
        Ok(self.working.delete_comments(comment_ids))
    }

    async fn insert_comment(&mut self, comment: &CommentNode) -> RepoResult<()> {
        self.faults.check()?;
        if self.working.comments.contains_key(&comment.comment_id) {
            return Err(DomainError::ValidationError(format!(
                "comment {} already exists",
                comment.comment_id
            )));
        }
        self.working
            .comments
            .insert(comment.comment_id, comment.clone());
        Ok(())
    }

    async fn add_click_counts(&mut self, counts: &[(Snowflake, i64)]) -> RepoResult<u64> {
        self.faults.check()?;
        let mut updated = 0;
        for (post_id, delta) in counts {
            if let Some(post) = self.working.posts.get_mut(post_id) {
                post.click_numbers += delta;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> RepoResult<()> {
        self.faults.check()?;
        let failing = self
            .faults
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(DomainError::DatabaseError("injected commit failure".into()));
        }
        let Self {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepoResult<()> {
        Ok(())
    }
}
