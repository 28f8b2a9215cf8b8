//! # Conveyor Store
//!
//! The Postgres-backed durable store (C1): the single source of truth
//! for job state. `conveyor-engine` depends only on
//! [`conveyor_core::DurableStore`]; this crate provides the concrete
//! implementation and the pool/migration plumbing around it.

mod error;
mod pool;
mod repository;

pub use error::{StoreError, StoreResult};
pub use pool::{create_pool, DatabasePool};
pub use repository::PostgresStore;
