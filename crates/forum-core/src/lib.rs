//! # forum-core
//!
//! Domain layer for the forum consistency core: action records, aggregate
//! metrics, the vote transition table, queued events, and the ports the
//! infrastructure crates implement (relational store, fast store, membership
//! filter, event queue, id issuing).
//! This crate has zero dependencies on infrastructure.

pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod transition;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    ActionClass, ActionRecord, ActionState, CommentNode, FeedOrder, FeedQuery, FollowEdge, Metric,
    PageQuery, PersistencePolicy, PolicyTable, TargetKind, UpsertOutcome,
};
pub use error::{DomainError, StoreKind};
pub use events::{EventClass, PendingEvent};
pub use traits::{
    ActionWrite, AuthoritativeStore, CounterBatch, CounterOp, CounterStore, Delivery, DeliveryTag,
    EventConsumer, EventQueue, IdentityProvider, MembershipFilter, RepoResult, StoreTransaction,
};
pub use transition::{counter_deltas, score_delta, CounterDelta};
pub use value_objects::{Snowflake, SnowflakeGenerator, SnowflakeParseError};
