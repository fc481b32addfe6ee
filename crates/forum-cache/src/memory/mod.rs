//! In-process doubles of the Redis-backed stores.

mod counter;
mod filter;
mod queue;

pub use counter::InMemoryCounterStore;
pub use filter::InMemoryFilter;
pub use queue::InMemoryEventQueue;
