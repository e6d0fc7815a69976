//! `edugate-auth`: pure authorization vocabulary and decision rules.
//!
//! This crate is intentionally decoupled from HTTP and storage: it defines
//! roles, actions, grants, resources and the three-tier decision. Services
//! that load grants from a store live in `edugate-infra`.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod policy;
pub mod principal;
pub mod resource;
pub mod roles;

pub use authorize::{AuthorizedActor, AuthzError, RequestContext};
pub use claims::{SessionClaims, TokenValidationError, validate_claims};
pub use permissions::{Action, ActionGrant, GrantSpec, GrantSpecError, ResourceGrant, ValidatedGrant};
pub use policy::{Decision, PermissionMatrix, PermissionPolicy, RoleGrants, Tier};
pub use principal::Actor;
pub use resource::{MenuVisibility, Resource};
pub use roles::Role;
