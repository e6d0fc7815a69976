//! `edugate-core`: identifiers and error primitives shared by every crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{AuditEntryId, RecordId, ResourceId, UserId};
