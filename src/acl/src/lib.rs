//! # CretoAI Access Control
//!
//! Role-based authorization engine over polymorphic subjects and resources.
//!
//! ## Features
//!
//! - **Polymorphic references**: subjects and resources are `Type`, `Type:id`
//!   strings, part lists, or typed objects
//! - **Role inheritance** with cycle-safe expansion
//! - **Optimistic concurrency** on action vocabularies
//! - **Async-first design** over injected repositories
//! - **Fail-closed decisions**: anything not positively granted is denied
//!
//! ## Example
//!
//! ```rust
//! use cretoai_acl::AclEngine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AclEngine::in_memory();
//!
//!     let editor = engine.roles().create_role("editor", None).await?;
//!     engine.add_user_roles("alice", &editor).await.into_result()?;
//!     engine.allow(&editor, "Article", ["read", "update"]).await?;
//!
//!     assert!(engine.is_allowed("alice", "Article", ["READ"]).await?);
//!     assert!(!engine.is_allowed("alice", "Article", ["DELETE"]).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod abilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod permissions;
pub mod repository;
pub mod roles;
pub mod types;

// Re-export commonly used types
pub use abilities::AbilityRegistry;
pub use config::AclConfig;
pub use engine::{AclEngine, AclMetrics, MetricsCollector};
pub use error::{AclError, Result};
pub use identity::{Identifiable, Identity, Polymorphic, Reference, References};
pub use permissions::PermissionStore;
pub use repository::{Entity, Filter, InMemoryRepository, Repositories, Repository};
pub use roles::{RoleGraph, RoleRemoval, RoleStore};
pub use types::{
    Ability, ActionSet, Batch, IdList, Mapping, Permission, Role, RoleId, RoleScope, UserId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
