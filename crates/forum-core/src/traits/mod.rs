//! Ports implemented by the infrastructure crates

mod authoritative;
mod counter_store;
mod filter;
mod identity;
mod queue;

pub use authoritative::{ActionWrite, AuthoritativeStore, RepoResult, StoreTransaction};
pub use counter_store::{CounterBatch, CounterOp, CounterStore};
pub use filter::MembershipFilter;
pub use identity::IdentityProvider;
pub use queue::{Delivery, DeliveryTag, EventConsumer, EventQueue};
