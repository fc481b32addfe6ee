//! Pending events - mutations waiting in the queue for the batched drain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entities::{ActionClass, ActionRecord, ActionState};
use crate::value_objects::Snowflake;

/// Queue partition. Action classes plus clicks, which carry no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    PostVote,
    CommentVote,
    Collection,
    Follow,
    Click,
}

impl EventClass {
    pub const ALL: [Self; 5] = [
        Self::PostVote,
        Self::CommentVote,
        Self::Collection,
        Self::Follow,
        Self::Click,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostVote => "post_vote",
            Self::CommentVote => "comment_vote",
            Self::Collection => "collection",
            Self::Follow => "follow",
            Self::Click => "click",
        }
    }

    pub fn action_class(&self) -> Option<ActionClass> {
        match self {
            Self::PostVote => Some(ActionClass::PostVote),
            Self::CommentVote => Some(ActionClass::CommentVote),
            Self::Collection => Some(ActionClass::Collection),
            Self::Follow => Some(ActionClass::Follow),
            Self::Click => None,
        }
    }

    /// Events of these classes are skipped once their post is gone
    pub fn targets_post(&self) -> bool {
        matches!(self, Self::PostVote | Self::Collection | Self::Click)
    }
}

impl From<ActionClass> for EventClass {
    fn from(class: ActionClass) -> Self {
        match class {
            ActionClass::PostVote => Self::PostVote,
            ActionClass::CommentVote => Self::CommentVote,
            ActionClass::Collection => Self::Collection,
            ActionClass::Follow => Self::Follow,
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Also used as the relational row id if the event inserts a new record
    pub event_id: Snowflake,
    pub class: EventClass,
    pub actor_id: Snowflake,
    pub target_id: Snowflake,
    #[serde(default)]
    pub state: ActionState,
    pub occurred_at: DateTime<Utc>,
}

impl PendingEvent {
    pub fn action(event_id: Snowflake, record: &ActionRecord) -> Self {
        Self {
            event_id,
            class: record.class.into(),
            actor_id: record.actor_id,
            target_id: record.target_id,
            state: record.state,
            occurred_at: Utc::now(),
        }
    }

    pub fn click(event_id: Snowflake, actor_id: Snowflake, post_id: Snowflake) -> Self {
        Self {
            event_id,
            class: EventClass::Click,
            actor_id,
            target_id: post_id,
            state: ActionState::None,
            occurred_at: Utc::now(),
        }
    }

    /// The action record this event sets, `None` for clicks
    pub fn record(&self) -> Option<ActionRecord> {
        self.class.action_class().map(|class| ActionRecord {
            actor_id: self.actor_id,
            target_id: self.target_id,
            class,
            state: self.state,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
