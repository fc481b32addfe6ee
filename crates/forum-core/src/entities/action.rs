//! Action records - one user's stance on one target

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;
use crate::value_objects::Snowflake;

/// The kind of interaction an action record captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    PostVote,
    CommentVote,
    Collection,
    Follow,
}

impl ActionClass {
    pub const ALL: [Self; 4] = [
        Self::PostVote,
        Self::CommentVote,
        Self::Collection,
        Self::Follow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostVote => "post_vote",
            Self::CommentVote => "comment_vote",
            Self::Collection => "collection",
            Self::Follow => "follow",
        }
    }

    /// Stable numeric tag stored in the relational `class` column
    pub fn code(&self) -> i16 {
        match self {
            Self::PostVote => 1,
            Self::CommentVote => 2,
            Self::Collection => 3,
            Self::Follow => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Vote classes carry three states; the others are binary
    pub fn is_vote(&self) -> bool {
        matches!(self, Self::PostVote | Self::CommentVote)
    }

    /// The non-neutral states this class admits
    pub fn active_states(&self) -> &'static [ActionState] {
        match self {
            Self::PostVote | Self::CommentVote => &[ActionState::Like, ActionState::Dislike],
            Self::Collection => &[ActionState::Collected],
            Self::Follow => &[ActionState::Following],
        }
    }

    pub fn admits(&self, state: ActionState) -> bool {
        state == ActionState::None || self.active_states().contains(&state)
    }

    /// Decode a `{-1, 0, 1}` direction into this class's state
    pub fn state_from_direction(&self, direction: i8) -> Result<ActionState, DomainError> {
        let state = match direction {
            0 => ActionState::None,
            1 if self.is_vote() => ActionState::Like,
            -1 if self.is_vote() => ActionState::Dislike,
            1 => self.active_states()[0],
            _ => {
                return Err(DomainError::InvalidDirection {
                    class: *self,
                    direction,
                })
            }
        };
        Ok(state)
    }
}

impl fmt::Display for ActionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stance on a target. `None` means "no action".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    None,
    Like,
    Dislike,
    Collected,
    Following,
}

impl ActionState {
    /// Signed contribution to aggregate counters
    pub fn direction(&self) -> i8 {
        match self {
            Self::None => 0,
            Self::Dislike => -1,
            Self::Like | Self::Collected | Self::Following => 1,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Value written into the fast-store action map
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Like => "like",
            Self::Dislike => "dislike",
            Self::Collected => "collect",
            Self::Following => "follow",
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "cancel" => Ok(Self::None),
            "like" => Ok(Self::Like),
            "dislike" => Ok(Self::Dislike),
            "collect" => Ok(Self::Collected),
            "follow" => Ok(Self::Following),
            other => Err(DomainError::InconsistentState(format!(
                "unknown action state {other:?}"
            ))),
        }
    }
}

/// At most one exists per `(actor_id, target_id, class)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub actor_id: Snowflake,
    pub target_id: Snowflake,
    pub class: ActionClass,
    pub state: ActionState,
}

impl ActionRecord {
    /// Build a record, rejecting states the class does not admit
    pub fn new(
        actor_id: Snowflake,
        target_id: Snowflake,
        class: ActionClass,
        state: ActionState,
    ) -> Result<Self, DomainError> {
        if !class.admits(state) {
            return Err(DomainError::StateNotAdmitted { class, state });
        }
        Ok(Self {
            actor_id,
            target_id,
            class,
            state,
        })
    }

    /// Coalescing key within one class
    pub fn pair(&self) -> (Snowflake, Snowflake) {
        (self.actor_id, self.target_id)
    }
}

/// Outcome of writing one record to the relational store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Deleted,
    /// The stored state already matched, which for the drain means a redelivery
    Unchanged,
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Social-graph view of a `Follow` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEdge {
    pub follower_id: Snowflake,
    pub following_id: Snowflake,
    pub active: bool,
}

impl FollowEdge {
    pub fn new(follower_id: Snowflake, following_id: Snowflake, active: bool) -> Self {
        Self {
            follower_id,
            following_id,
            active,
        }
    }

    pub fn into_record(self) -> ActionRecord {
        ActionRecord {
            actor_id: self.follower_id,
            target_id: self.following_id,
            class: ActionClass::Follow,
            state: if self.active {
                ActionState::Following
            } else {
                ActionState::None
            },
        }
    }
}

impl TryFrom<ActionRecord> for FollowEdge {
    type Error = DomainError;

    fn try_from(record: ActionRecord) -> Result<Self, Self::Error> {
        if record.class != ActionClass::Follow {
            return Err(DomainError::ValidationError(format!(
                "{} record is not a follow edge",
                record.class
            )));
        }
        Ok(Self::new(
            record.actor_id,
            record.target_id,
            record.state == ActionState::Following,
        ))
    }
}
