//! Infrastructure layer: stores, config, and the services that tie the
//! pure authorization, audit and menu crates to them.

pub mod admin;
pub mod authorizer;
pub mod config;
pub mod menu;
pub mod recorder;
pub mod resolver;
pub mod store;


pub use admin::{AdminError, GrantChange, PermissionAdmin};
pub use authorizer::{ActorResolver, Authorizer, SessionActorResolver};
pub use config::{ConfigError, EdugateConfig, StoreBackend};
pub use menu::{MenuComposer, MenuCustomizer, MenuError};
pub use recorder::{AuditError, AuditRecorder, DependentCheck, NoDependents};
pub use resolver::PermissionResolver;
