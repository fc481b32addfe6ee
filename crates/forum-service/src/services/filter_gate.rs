//! Membership filter in front of the relational store.
//!
//! One filter per action class, keyed by actor id. A negative answer proves
//! the actor has never acted in that class; anything else sends the caller to
//! the authoritative store.

use forum_cache::KeySpace;
use forum_core::{ActionClass, Snowflake, StoreKind};
use tracing::{debug, instrument, warn};

use super::context::ServiceContext;
use super::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The actor was never added
    Absent,
    /// The actor may have been added
    MaybePresent,
    /// The filter does not exist yet, so it proves nothing
    Inconclusive,
}

impl FilterVerdict {
    /// Whether the authoritative store has to be consulted
    pub fn needs_lookup(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

pub struct FilterGate<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> FilterGate<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Create the class filter if it is missing
    pub async fn ensure_reserved(&self, class: ActionClass) -> ServiceResult<()> {
        let name = KeySpace::filter_name(class);
        let filter = self.ctx.filter();
        if self.ctx.filtered(filter.exists(name)).await? {
            return Ok(());
        }

        let config = self.ctx.filter_config();
        self.ctx
            .filtered(filter.reserve(name, config.error_rate, config.capacity))
            .await?;
        debug!(
            filter = name,
            error_rate = config.error_rate,
            capacity = config.capacity,
            "Reserved membership filter"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn check(&self, class: ActionClass, actor_id: Snowflake) -> ServiceResult<FilterVerdict> {
        match self.query(class, actor_id).await {
            Err(e) if self.degrades(&e) => {
                warn!(class = %class, error = %e, "Membership filter unavailable, assuming absent");
                Ok(FilterVerdict::Absent)
            }
            other => other,
        }
    }

    /// Add an actor to the class filter, creating the filter on first use
    #[instrument(skip(self))]
    pub async fn record(&self, class: ActionClass, actor_id: Snowflake) -> ServiceResult<()> {
        let result: ServiceResult<()> = async {
            self.ensure_reserved(class).await?;
            let name = KeySpace::filter_name(class);
            self.ctx
                .filtered(self.ctx.filter().add(name, &actor_id.member()))
                .await?;
            Ok(())
        }
        .await;

        match result {
            Err(e) if self.degrades(&e) => {
                warn!(class = %class, error = %e, "Membership filter unavailable, actor not recorded");
                Ok(())
            }
            other => other,
        }
    }

    async fn query(&self, class: ActionClass, actor_id: Snowflake) -> ServiceResult<FilterVerdict> {
        let name = KeySpace::filter_name(class);
        let filter = self.ctx.filter();

        if !self.ctx.filtered(filter.exists(name)).await? {
            // Reserve now so later checks can answer, but this one cannot
            self.ensure_reserved(class).await?;
            return Ok(FilterVerdict::Inconclusive);
        }

        let present = self
            .ctx
            .filtered(filter.may_contain(name, &actor_id.member()))
            .await?;
        Ok(if present {
            FilterVerdict::MaybePresent
        } else {
            FilterVerdict::Absent
        })
    }

    fn degrades(&self, err: &ServiceError) -> bool {
        self.ctx.filter_config().degrade_on_unavailable
            && err.unavailable_store() == Some(StoreKind::Filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{id, Harness};
    use forum_common::FilterConfig;
    use forum_core::MembershipFilter;

    #[tokio::test]
    async fn test_missing_filter_is_inconclusive_then_reserved() {
        let h = Harness::new();
        let gate = FilterGate::new(&h.ctx);

        let verdict = gate.check(ActionClass::Follow, id(1)).await.unwrap();
        assert_eq!(verdict, FilterVerdict::Inconclusive);
        assert!(verdict.needs_lookup());
        assert!(h
            .filter
            .exists(KeySpace::filter_name(ActionClass::Follow))
            .await
            .unwrap());

        // Now the filter can prove absence
        let verdict = gate.check(ActionClass::Follow, id(1)).await.unwrap();
        assert_eq!(verdict, FilterVerdict::Absent);
    }

    #[tokio::test]
    async fn test_recorded_actor_needs_lookup() {
        let h = Harness::new();
        let gate = FilterGate::new(&h.ctx);
        gate.record(ActionClass::PostVote, id(7)).await.unwrap();

        let verdict = gate.check(ActionClass::PostVote, id(7)).await.unwrap();
        assert_eq!(verdict, FilterVerdict::MaybePresent);
        // Classes have separate filters
        let verdict = gate.check(ActionClass::CommentVote, id(7)).await.unwrap();
        assert_eq!(verdict, FilterVerdict::Inconclusive);
    }

    #[tokio::test]
    async fn test_unavailable_filter_propagates_by_default() {
        let h = Harness::new();
        h.filter.set_unavailable(true);
        let err = FilterGate::new(&h.ctx)
            .check(ActionClass::Collection, id(1))
            .await
            .unwrap_err();
        assert_eq!(err.unavailable_store(), Some(StoreKind::Filter));
    }

    #[tokio::test]
    async fn test_unavailable_filter_degrades_when_configured() {
        let h = Harness::with(|b| {
            b.filter_config(FilterConfig {
                degrade_on_unavailable: true,
                ..FilterConfig::default()
            })
        });
        h.filter.set_unavailable(true);
        let gate = FilterGate::new(&h.ctx);

        let verdict = gate.check(ActionClass::Collection, id(1)).await.unwrap();
        assert_eq!(verdict, FilterVerdict::Absent);
        gate.record(ActionClass::Collection, id(1)).await.unwrap();
    }
}
