//! Repository implementations
//!
//! PostgreSQL implementation of the relational store port defined in forum-core.

mod authoritative;
mod error;
mod transaction;

pub use authoritative::PgAuthoritativeStore;
pub use transaction::PgStoreTransaction;
