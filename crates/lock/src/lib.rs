//! `lock` crate — the distributed advisory execution lock.
//!
//! One reference backend over a transactional store (Postgres), one
//! in-memory backend for tests and single-process deployments, and
//! `WorkflowLockProvider`, which wraps either with the workspace's
//! conventional key scheme for per-execution and per-template locks.

pub mod error;
pub mod memory;
pub mod owner;
pub mod postgres;
pub mod provider;
pub mod workflow;

pub use error::LockError;
pub use memory::InMemoryLockProvider;
pub use owner::generate_owner;
pub use postgres::PostgresLockProvider;
pub use provider::{DistributedLock, LockProvider};
pub use workflow::WorkflowLockProvider;
