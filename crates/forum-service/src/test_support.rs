//! In-memory wiring shared by the unit tests

use std::sync::Arc;

use forum_cache::{InMemoryCounterStore, InMemoryEventQueue, InMemoryFilter, KeySpace};
use forum_core::{CounterStore, Metric, Snowflake, SnowflakeGenerator};
use forum_db::InMemoryAuthoritativeStore;

use crate::services::{ServiceContext, ServiceContextBuilder};

pub(crate) struct Harness {
    pub store: InMemoryAuthoritativeStore,
    pub counters: Arc<InMemoryCounterStore>,
    pub filter: Arc<InMemoryFilter>,
    pub queue: InMemoryEventQueue,
    pub ctx: ServiceContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(configure: impl FnOnce(ServiceContextBuilder) -> ServiceContextBuilder) -> Self {
        let store = InMemoryAuthoritativeStore::new();
        let counters = Arc::new(InMemoryCounterStore::new());
        let filter = Arc::new(InMemoryFilter::new());
        let queue = InMemoryEventQueue::with_poll_timeout(std::time::Duration::from_millis(10));

        let builder = ServiceContext::builder()
            .store(Arc::new(store.clone()))
            .counters(counters.clone())
            .filter(filter.clone())
            .queue(Arc::new(queue.clone()))
            .ids(Arc::new(SnowflakeGenerator::new(1)));
        let ctx = configure(builder).build().unwrap();

        Self {
            store,
            counters,
            filter,
            queue,
            ctx,
        }
    }

    pub fn keys(&self) -> &KeySpace {
        self.ctx.keys()
    }

    /// Raw fast-store value of a counter
    pub async fn counter(&self, metric: Metric, id: Snowflake) -> Option<f64> {
        self.counters
            .score(&self.keys().metric(metric), &id.member())
            .await
            .unwrap()
    }
}

pub(crate) fn id(n: i64) -> Snowflake {
    Snowflake::new(n)
}
