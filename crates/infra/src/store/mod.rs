//! Storage boundary for grants, menu metadata and the audit trail.
//!
//! Services in this crate depend only on the traits in [`r#trait`]; the
//! in-memory store backs tests and local runs, the Postgres store backs
//! deployments.

pub mod in_memory;
pub mod postgres;
pub mod schema;
pub mod r#trait;

pub use in_memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use schema::run_migrations;
pub use r#trait::{AuditStore, MenuStore, PermissionStore, StoreError, StoreTransaction};
