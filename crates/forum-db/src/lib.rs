//! # forum-db
//!
//! Relational side of the forum consistency core, on PostgreSQL via SQLx.
//!
//! ## Overview
//!
//! - Connection pool management
//! - Database models with SQLx `FromRow` derives and their mappers
//! - [`PgAuthoritativeStore`], the `AuthoritativeStore` implementation
//! - [`InMemoryAuthoritativeStore`], a transactional in-process double
//!
//! ## Usage
//!
//! ```rust,ignore
//! use forum_db::{create_pool, DatabaseConfig, PgAuthoritativeStore};
//!
//! let pool = create_pool(&DatabaseConfig::from_env()).await?;
//! let store = PgAuthoritativeStore::new(pool);
//! let record = store.get_action_record(actor, post, ActionClass::PostVote).await?;
//! ```

pub mod mappers;
pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;
pub mod schema;

// Re-export commonly used types
pub use memory::InMemoryAuthoritativeStore;
pub use pool::{create_pool, create_pool_from_env, DatabaseConfig, PgPool};
pub use repositories::{PgAuthoritativeStore, PgStoreTransaction};
