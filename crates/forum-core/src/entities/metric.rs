//! Aggregate counters and the targets they hang off

use serde::{Deserialize, Serialize};
use std::fmt;

use super::action::{ActionClass, ActionState};

/// What kind of entity a counter or record refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Post,
    Comment,
    User,
}

/// A per-target aggregate kept in the fast store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    VoteUp,
    VoteDown,
    CommentCount,
    ClickCount,
    CollectionCount,
    CommentVoteUp,
    CommentVoteDown,
    Followers,
    Following,
    /// Replies under a root comment
    Descendants,
}

impl Metric {
    pub const ALL: [Self; 10] = [
        Self::VoteUp,
        Self::VoteDown,
        Self::CommentCount,
        Self::ClickCount,
        Self::CollectionCount,
        Self::CommentVoteUp,
        Self::CommentVoteDown,
        Self::Followers,
        Self::Following,
        Self::Descendants,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VoteUp => "vote_up",
            Self::VoteDown => "vote_down",
            Self::CommentCount => "comment_count",
            Self::ClickCount => "click_count",
            Self::CollectionCount => "collection_count",
            Self::CommentVoteUp => "comment_vote_up",
            Self::CommentVoteDown => "comment_vote_down",
            Self::Followers => "followers",
            Self::Following => "following",
            Self::Descendants => "descendants",
        }
    }

    pub fn target_kind(&self) -> TargetKind {
        match self {
            Self::VoteUp
            | Self::VoteDown
            | Self::CommentCount
            | Self::ClickCount
            | Self::CollectionCount => TargetKind::Post,
            Self::CommentVoteUp | Self::CommentVoteDown | Self::Descendants => TargetKind::Comment,
            Self::Followers | Self::Following => TargetKind::User,
        }
    }

    /// The action class and state whose records this metric counts, if any
    pub fn counted_records(&self) -> Option<(ActionClass, ActionState)> {
        match self {
            Self::VoteUp => Some((ActionClass::PostVote, ActionState::Like)),
            Self::VoteDown => Some((ActionClass::PostVote, ActionState::Dislike)),
            Self::CommentVoteUp => Some((ActionClass::CommentVote, ActionState::Like)),
            Self::CommentVoteDown => Some((ActionClass::CommentVote, ActionState::Dislike)),
            Self::CollectionCount => Some((ActionClass::Collection, ActionState::Collected)),
            Self::Followers | Self::Following => {
                Some((ActionClass::Follow, ActionState::Following))
            }
            Self::CommentCount | Self::ClickCount | Self::Descendants => None,
        }
    }

    /// `Following` counts records by their actor rather than their target
    pub fn keyed_by_actor(&self) -> bool {
        matches!(self, Self::Following)
    }

    /// Metrics moved by a change of state in `class`
    pub fn affected_by(class: ActionClass) -> &'static [Metric] {
        match class {
            ActionClass::PostVote => &[Self::VoteUp, Self::VoteDown],
            ActionClass::CommentVote => &[Self::CommentVoteUp, Self::CommentVoteDown],
            ActionClass::Collection => &[Self::CollectionCount],
            ActionClass::Follow => &[Self::Followers, Self::Following],
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
