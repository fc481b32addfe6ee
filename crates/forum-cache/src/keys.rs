//! Fast-store key layout.
//!
//! Every key is namespaced with the configured prefix (`bluebell:` by default).
//! Filter names are global and carry no prefix.

use forum_core::{ActionClass, FeedOrder, Metric, Snowflake};

pub const POST_TIME: &str = "post:create_time";
pub const POST_SCORE: &str = "post:score";
pub const COMMENT_TIME: &str = "comment:time";
pub const COMMENT_SCORE: &str = "comment:score";

/// Builds prefixed keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("bluebell:")
    }
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.prefix)
    }

    /// Sorted set holding one metric for every target, member = target id
    pub fn metric(&self, metric: Metric) -> String {
        let suffix = match metric {
            Metric::VoteUp => "post:vote_up",
            Metric::VoteDown => "post:vote_down",
            Metric::CommentCount => "post:comment_numbers",
            Metric::ClickCount => "post:click_numbers",
            Metric::CollectionCount => "post:collection_numbers",
            Metric::CommentVoteUp => "comment:vote",
            Metric::CommentVoteDown => "comment:devote",
            Metric::Followers => "user:follower_numbers",
            Metric::Following => "user:following_numbers",
            Metric::Descendants => "comment:comment_numbers",
        };
        self.key(suffix)
    }

    /// Hash of actor id -> state name for one target
    pub fn action_map(&self, class: ActionClass, target: Snowflake) -> String {
        let suffix = match class {
            ActionClass::PostVote => "post:user_action",
            ActionClass::CommentVote => "comment:voted",
            ActionClass::Collection => "post:collection_action",
            ActionClass::Follow => "user:follow_action",
        };
        self.key(&format!("{suffix}:{target}"))
    }

    /// Set of post ids a user has collected
    pub fn user_collection(&self, user: Snowflake) -> String {
        self.key(&format!("post:user_collection:{user}"))
    }

    pub fn feed_order(&self, order: FeedOrder) -> String {
        match order {
            FeedOrder::Time => self.key(POST_TIME),
            FeedOrder::Score => self.key(POST_SCORE),
        }
    }

    /// Set of post ids in a community
    pub fn community(&self, community: Snowflake) -> String {
        self.key(&format!("community:{community}"))
    }

    /// Short-lived intersection of a community with an order index
    pub fn community_feed(&self, order: FeedOrder, community: Snowflake) -> String {
        format!("{}:{community}", self.feed_order(order))
    }

    /// Root comments of a post, scored by comment id
    pub fn post_roots(&self, post: Snowflake) -> String {
        self.key(&format!("post:{post}"))
    }

    /// Posts whose comment index is materialized, scored by build time.
    /// An empty root index is not stored, so this is what marks a post as indexed.
    pub fn comment_indexed(&self) -> String {
        self.key("comment:indexed")
    }

    /// Direct children of a comment
    pub fn child_set(&self, comment: Snowflake) -> String {
        self.key(&format!("comment:child_comment_record:{comment}"))
    }

    pub fn comment_time(&self) -> String {
        self.key(COMMENT_TIME)
    }

    pub fn comment_score(&self) -> String {
        self.key(COMMENT_SCORE)
    }

    /// Bloom filter tracking which actors have ever acted in a class
    pub fn filter_name(class: ActionClass) -> &'static str {
        match class {
            ActionClass::PostVote => "user_like_or_dislike_to_post_filter",
            ActionClass::CommentVote => "user_like_or_dislike_to_comment_filter",
            ActionClass::Collection => "user_collection_to_filter",
            ActionClass::Follow => "user_follow_filter",
        }
    }

    /// Pending list for one event class
    pub fn queue(&self, class: &str) -> String {
        self.key(&format!("queue:{class}"))
    }

    /// In-flight list for one event class
    pub fn processing(&self, class: &str) -> String {
        self.key(&format!("queue:{class}:processing"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_keys() {
        let keys = KeySpace::default();
        let post = Snowflake::new(42);
        assert_eq!(keys.metric(Metric::VoteUp), "bluebell:post:vote_up");
        assert_eq!(
            keys.action_map(ActionClass::PostVote, post),
            "bluebell:post:user_action:42"
        );
        assert_eq!(keys.post_roots(post), "bluebell:post:42");
        assert_eq!(keys.comment_indexed(), "bluebell:comment:indexed");
        assert_eq!(
            keys.child_set(post),
            "bluebell:comment:child_comment_record:42"
        );
        assert_eq!(
            keys.community_feed(FeedOrder::Score, Snowflake::new(3)),
            "bluebell:post:score:3"
        );
    }

    #[test]
    fn test_custom_prefix() {
        let keys = KeySpace::new("t1:");
        assert_eq!(keys.feed_order(FeedOrder::Time), "t1:post:create_time");
        assert_eq!(
            KeySpace::filter_name(ActionClass::Follow),
            "user_follow_filter"
        );
    }
}
