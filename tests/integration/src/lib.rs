//! Integration test utilities for the forum consistency core
//!
//! Scenarios run against the in-memory stores by default. The live helpers
//! wire the same services to PostgreSQL and Redis when both are configured.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
