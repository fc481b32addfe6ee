//! Top-down comment index in the fast store.
//!
//! The relational store only knows parent pointers. The fast store keeps, per
//! post, a sorted set of root comments scored by id, and per comment a set of
//! direct children. Root comments also carry a descendant counter. The whole
//! index for a post can be rebuilt from the relational rows at any time.

use std::collections::{HashMap, HashSet, VecDeque};

use forum_core::{ActionClass, CommentNode, CounterBatch, DomainError, Metric, PageQuery, Snowflake};
use tracing::{debug, info, instrument, warn};

use super::context::ServiceContext;
use super::error::ServiceResult;

/// Comments of one post linked parent to child, built from relational rows
#[derive(Debug, Default)]
pub struct CommentForest {
    nodes: Vec<CommentNode>,
    index: HashMap<Snowflake, usize>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
}

impl CommentForest {
    /// Nodes whose parent is not among `comments` are kept but left unlinked
    pub fn build(comments: Vec<CommentNode>) -> Self {
        let index: HashMap<Snowflake, usize> = comments
            .iter()
            .enumerate()
            .map(|(i, c)| (c.comment_id, i))
            .collect();
        let mut children = vec![Vec::new(); comments.len()];
        let mut roots = Vec::new();

        for (i, node) in comments.iter().enumerate() {
            if node.is_root() {
                roots.push(i);
                continue;
            }
            match index.get(&node.parent_comment_id) {
                Some(&parent) => children[parent].push(i),
                None => warn!(
                    comment_id = %node.comment_id,
                    parent_id = %node.parent_comment_id,
                    "Comment has no live parent, leaving it out of the index"
                ),
            }
        }

        Self {
            nodes: comments,
            index,
            children,
            roots,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[CommentNode] {
        &self.nodes
    }

    pub fn roots(&self) -> impl Iterator<Item = &CommentNode> + '_ {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    pub fn children_of(&self, comment_id: Snowflake) -> Vec<Snowflake> {
        self.index.get(&comment_id).map_or_else(Vec::new, |&i| {
            self.children[i]
                .iter()
                .map(|&c| self.nodes[c].comment_id)
                .collect()
        })
    }

    /// `comment_id` followed by every comment below it, breadth-first.
    /// Empty when `comment_id` is not in the forest.
    pub fn subtree(&self, comment_id: Snowflake) -> Vec<Snowflake> {
        let Some(&start) = self.index.get(&comment_id) else {
            return Vec::new();
        };
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut ordered = Vec::new();
        while let Some(i) = queue.pop_front() {
            ordered.push(self.nodes[i].comment_id);
            for &child in &self.children[i] {
                if seen.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        ordered
    }

    /// Comments below `comment_id`, not counting itself
    pub fn descendant_count(&self, comment_id: Snowflake) -> usize {
        self.subtree(comment_id).len().saturating_sub(1)
    }
}

/// Result of removing a comment and everything under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedSubtree {
    /// Relational rows deleted
    pub removed: u64,
    /// The deleted comment first, then its descendants breadth-first
    pub ids: Vec<Snowflake>,
}

pub struct CommentTree<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> CommentTree<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Link a freshly inserted comment into the index. `root_id` is the root of
    /// its reply chain (itself for a root comment).
    ///
    /// Tree entries are skipped while the post has no index; the next read
    /// rebuilds it from the relational rows, which already hold this comment.
    #[instrument(skip(self, node), fields(comment_id = %node.comment_id, post_id = %node.post_id))]
    pub async fn on_comment_created(&self, node: &CommentNode, root_id: Snowflake) -> ServiceResult<()> {
        let keys = self.ctx.keys();
        let id = node.comment_id;
        let roots_key = keys.post_roots(node.post_id);
        let indexed = self.is_indexed(node.post_id).await?;

        let mut batch = CounterBatch::atomic();
        if node.is_root() {
            if indexed {
                batch.set_score(roots_key, id.member(), root_score(id));
            }
            batch.set_score(keys.metric(Metric::Descendants), id.member(), 0.0);
        } else {
            if indexed {
                batch.set_add(keys.child_set(node.parent_comment_id), id.member());
            }
            batch.increment_existing(keys.metric(Metric::Descendants), root_id.member(), 1.0);
        }
        batch
            .increment_existing(keys.metric(Metric::CommentCount), node.post_id.member(), 1.0)
            .set_score(keys.comment_time(), id.member(), created_secs(id))
            .set_score(keys.comment_score(), id.member(), 0.0);

        self.ctx.fast(self.ctx.counters().execute(batch)).await?;
        debug!(root_id = %root_id, indexed, "Comment indexed");
        Ok(())
    }

    /// One page of root comments, newest first
    #[instrument(skip(self))]
    pub async fn get_root_comments(&self, post_id: Snowflake, page: PageQuery) -> ServiceResult<Vec<Snowflake>> {
        self.ensure_index(post_id).await?;
        let members = self
            .ctx
            .fast(self.ctx.counters().range_by_score_desc(
                &self.ctx.keys().post_roots(post_id),
                page.offset(),
                page.limit(),
            ))
            .await?;
        Ok(parse_members(members))
    }

    /// `comment_id` followed by every comment below it, breadth-first
    pub async fn collect_descendants(&self, comment_id: Snowflake) -> ServiceResult<Vec<Snowflake>> {
        let mut seen = HashSet::from([comment_id]);
        let mut queue = VecDeque::from([comment_id]);
        let mut ordered = Vec::new();

        while let Some(id) = queue.pop_front() {
            ordered.push(id);
            let members = self
                .ctx
                .fast(self.ctx.counters().set_members(&self.ctx.keys().child_set(id)))
                .await?;
            for child in parse_members(members) {
                if seen.insert(child) {
                    queue.push_back(child);
                } else {
                    warn!(comment_id = %child, parent_id = %id, "Comment index revisits a node");
                }
            }
        }
        Ok(ordered)
    }

    /// Delete a comment with all its replies: relational rows first, then
    /// every fast-store entry. A failure between the two leaves only orphaned
    /// fast-store keys that no read reaches.
    ///
    /// The subtree is taken from the relational parent pointers, so a reply the
    /// fast-store index missed is still deleted with its parent.
    #[instrument(skip(self))]
    pub async fn delete_subtree(&self, comment_id: Snowflake) -> ServiceResult<DeletedSubtree> {
        let store = self.ctx.store();
        let node = self
            .ctx
            .relational(store.comment(comment_id))
            .await?
            .ok_or(DomainError::CommentNotFound(comment_id))?;

        let root_id = self
            .ctx
            .relational(store.root_of(comment_id))
            .await?
            .unwrap_or(comment_id);
        let forest = CommentForest::build(
            self.ctx
                .relational(store.comments_by_post(node.post_id))
                .await?,
        );
        let mut ids = forest.subtree(comment_id);
        if ids.is_empty() {
            ids.push(comment_id);
        }

        let mut tx = self.ctx.relational(store.begin()).await?;
        let removed = match self.ctx.relational(tx.delete_comments(&ids)).await {
            Ok(removed) => removed,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e.into());
            }
        };
        self.ctx.relational(tx.commit()).await?;

        let keys = self.ctx.keys();
        let mut batch = CounterBatch::atomic();
        for id in &ids {
            let member = id.member();
            batch
                .delete(keys.child_set(*id))
                .delete(keys.action_map(ActionClass::CommentVote, *id))
                .remove_member(keys.metric(Metric::CommentVoteUp), member.clone())
                .remove_member(keys.metric(Metric::CommentVoteDown), member.clone())
                .remove_member(keys.metric(Metric::Descendants), member.clone())
                .remove_member(keys.comment_time(), member.clone())
                .remove_member(keys.comment_score(), member);
        }
        batch.increment_existing(
            keys.metric(Metric::CommentCount),
            node.post_id.member(),
            -(removed as f64),
        );
        if node.is_root() {
            batch.remove_member(keys.post_roots(node.post_id), comment_id.member());
        } else {
            batch
                .increment_existing(keys.metric(Metric::Descendants), root_id.member(), -(removed as f64))
                .set_remove(keys.child_set(node.parent_comment_id), comment_id.member());
        }
        self.ctx.fast(self.ctx.counters().execute(batch)).await?;

        info!(
            comment_id = %comment_id,
            post_id = %node.post_id,
            removed,
            "Deleted comment subtree"
        );
        Ok(DeletedSubtree { removed, ids })
    }

    /// Replace the post's index with one derived from the relational rows.
    /// Returns the number of comments indexed.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, post_id: Snowflake) -> ServiceResult<usize> {
        let comments = self
            .ctx
            .relational(self.ctx.store().comments_by_post(post_id))
            .await?;
        let forest = CommentForest::build(comments);

        let keys = self.ctx.keys();
        let roots_key = keys.post_roots(post_id);
        let mut batch = CounterBatch::atomic();
        batch.delete(roots_key.clone());

        for node in forest.nodes() {
            let id = node.comment_id;
            batch.delete(keys.child_set(id));
            for child in forest.children_of(id) {
                batch.set_add(keys.child_set(id), child.member());
            }
            batch.set_score(keys.comment_time(), id.member(), created_secs(id));
        }
        for root in forest.roots() {
            let id = root.comment_id;
            batch
                .set_score(roots_key.clone(), id.member(), root_score(id))
                .set_score(
                    keys.metric(Metric::Descendants),
                    id.member(),
                    forest.descendant_count(id) as f64,
                );
        }
        batch
            .set_score(
                keys.metric(Metric::CommentCount),
                post_id.member(),
                forest.len() as f64,
            )
            .set_score(
                keys.comment_indexed(),
                post_id.member(),
                chrono::Utc::now().timestamp() as f64,
            );

        self.ctx.fast(self.ctx.counters().execute(batch)).await?;
        info!(post_id = %post_id, comments = forest.len(), "Rebuilt comment index");
        Ok(forest.len())
    }

    /// Drop the post's root index so the next read rebuilds everything
    pub async fn invalidate(&self, post_id: Snowflake) -> ServiceResult<()> {
        let keys = self.ctx.keys();
        let mut batch = CounterBatch::atomic();
        batch
            .remove_member(keys.comment_indexed(), post_id.member())
            .delete(keys.post_roots(post_id));
        self.ctx.fast(self.ctx.counters().execute(batch)).await?;
        debug!(post_id = %post_id, "Comment index invalidated");
        Ok(())
    }

    async fn is_indexed(&self, post_id: Snowflake) -> ServiceResult<bool> {
        let marker = self
            .ctx
            .fast(
                self.ctx
                    .counters()
                    .score(&self.ctx.keys().comment_indexed(), &post_id.member()),
            )
            .await?;
        Ok(marker.is_some())
    }

    async fn ensure_index(&self, post_id: Snowflake) -> ServiceResult<()> {
        if !self.is_indexed(post_id).await? {
            self.rebuild(post_id).await?;
        }
        Ok(())
    }
}

/// Snowflakes grow with time, so the id itself orders roots by age
fn root_score(id: Snowflake) -> f64 {
    id.into_inner() as f64
}

fn created_secs(id: Snowflake) -> f64 {
    (id.timestamp() / 1000) as f64
}

fn parse_members(members: Vec<String>) -> Vec<Snowflake> {
    members
        .into_iter()
        .filter_map(|m| match Snowflake::parse(&m) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(member = %m, error = %e, "Skipping unreadable comment id");
                None
            }
        })
        .collect()
}
