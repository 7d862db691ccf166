#![allow(clippy::result_large_err)]
//! # Warrant Core
//!
//! Entity-scoped role and permission authorization.
//!
//! ## Architecture
//!
//! - **Registry**: Process-wide read-through cache of role/permission rows
//! - **Resolvers**: Find, find-or-create and role→permission links
//! - **Capabilities**: Per-subject grants and checks, every one scoped to an entity
//! - **Matching**: Exact or hierarchical wildcard permission matching
//! - **Gate**: Allow/deny decisions with typed failures for request layers
//! - **Telemetry**: Structured logging setup

pub mod config;
pub mod error;
pub mod rbac;
pub mod telemetry;

pub use error::{ErrorCode, ErrorSeverity, Result, WarrantError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, PermissionConfig};
    pub use crate::error::{ErrorCode, ErrorSeverity, Lookup, RequirementKind, Result, WarrantError};
    pub use crate::rbac::{
        Assignment, AuthorizationStore, Authorizer, DeferredAssignments, EntityId, Gate,
        GateMode, HasPermissions, HasRoles, InMemoryStore, NewPermission, NewRole,
        PendingAssignment, Permission, PermissionCapability, PermissionId, Requirement, Role,
        RoleCapability, RoleId, Selector, SelectorItem, Subject, SubjectId,
    };
}
