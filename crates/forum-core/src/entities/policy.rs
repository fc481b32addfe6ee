//! How each mutation class reaches the relational store

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::DomainError;
use crate::events::EventClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Relational write happens inside the request, before the fast store is touched
    Synchronous,
    /// Fast store is updated in the request; the relational write is drained later
    BatchedAsync,
}

impl FromStr for PersistencePolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(Self::Synchronous),
            "batched" | "async" | "batched_async" => Ok(Self::BatchedAsync),
            other => Err(DomainError::ValidationError(format!(
                "unknown persistence policy {other:?}"
            ))),
        }
    }
}

/// Per-class policy assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policies: HashMap<EventClass, PersistencePolicy>,
}

impl PolicyTable {
    pub fn policy_for(&self, class: EventClass) -> PersistencePolicy {
        self.policies
            .get(&class)
            .copied()
            .unwrap_or(PersistencePolicy::BatchedAsync)
    }

    #[must_use]
    pub fn with(mut self, class: EventClass, policy: PersistencePolicy) -> Self {
        self.policies.insert(class, policy);
        self
    }

    /// Classes that need a drain task
    pub fn batched_classes(&self) -> Vec<EventClass> {
        EventClass::ALL
            .into_iter()
            .filter(|c| self.policy_for(*c) == PersistencePolicy::BatchedAsync)
            .collect()
    }
}

impl Default for PolicyTable {
    /// Votes write through; follows, collections and clicks are drained
    fn default() -> Self {
        Self {
            policies: HashMap::from([
                (EventClass::PostVote, PersistencePolicy::Synchronous),
                (EventClass::CommentVote, PersistencePolicy::Synchronous),
                (EventClass::Collection, PersistencePolicy::BatchedAsync),
                (EventClass::Follow, PersistencePolicy::BatchedAsync),
                (EventClass::Click, PersistencePolicy::BatchedAsync),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = PolicyTable::default();
        assert_eq!(
            table.policy_for(EventClass::PostVote),
            PersistencePolicy::Synchronous
        );
        assert_eq!(
            table.policy_for(EventClass::Follow),
            PersistencePolicy::BatchedAsync
        );
        assert_eq!(
            table.batched_classes(),
            vec![EventClass::Collection, EventClass::Follow, EventClass::Click]
        );
    }

    #[test]
    fn test_override() {
        let table = PolicyTable::default().with(EventClass::PostVote, PersistencePolicy::BatchedAsync);
        assert!(table.batched_classes().contains(&EventClass::PostVote));
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            "sync".parse::<PersistencePolicy>().unwrap(),
            PersistencePolicy::Synchronous
        );
        assert_eq!(
            "Batched".parse::<PersistencePolicy>().unwrap(),
            PersistencePolicy::BatchedAsync
        );
        assert!("later".parse::<PersistencePolicy>().is_err());
    }
}
