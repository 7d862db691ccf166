//! Entity-scoped role and permission authorization.
//!
//! This module provides:
//! - **Registry**: read-through cache of role/permission rows with coarse invalidation
//! - **Resolvers**: lookup, find-or-create and role→permission links
//! - **Capabilities**: per-subject permission and role checks and grants
//! - **Gate**: allow/deny decisions with typed failures for request layers
//!
//! # Usage
//!
//! ```rust,ignore
//! use warrant_core::rbac::{Authorizer, HasPermissions, HasRoles, InMemoryStore};
//!
//! let authz = Authorizer::new(Arc::new(InMemoryStore::new()), config.permission)?;
//! authz.permission_resolver().find_or_create("posts.edit").await?;
//!
//! let _ = user.permissions(&authz).give_permission_to("posts.edit", project).await?;
//! assert!(user.permissions(&authz).has_permission_to("posts.edit", project).await?);
//! ```

pub mod gate;
pub mod matcher;
pub mod models;
pub mod permissions;
pub mod registry;
pub mod resolver;
pub mod roles;
pub mod selector;
pub mod store;
pub mod subject;

pub use gate::{Gate, GateMode, Requirement};
pub use matcher::{ExactMatcher, PermissionMatcher, WildcardMatcher, WildcardPermission};
pub use models::{
    AssignmentKind, EntityId, NewPermission, NewRole, Permission, PermissionId, Pivot, Role,
    RoleId, ScopedAssignment, SubjectId, SubjectKey,
};
pub use permissions::PermissionCapability;
pub use registry::{PermissionRegistry, RegistryStats};
pub use resolver::{PermissionResolver, RoleResolver};
pub use roles::RoleCapability;
pub use selector::{convert_pipe_to_array, PipeSplit, Selector, SelectorItem};
pub use store::{AuthorizationStore, InMemoryStore, RecordFilter};
pub use subject::{
    Assignment, DeferredAssignments, HasPermissions, HasRoles, PendingAssignment, Subject,
};

use std::sync::Arc;
use tracing::info;

use crate::config::PermissionConfig;
use crate::error::{Result, WarrantError};

// ═══════════════════════════════════════════════════════════════════════════════
// Authorizer
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared engine handle: store, registry, configuration and matching strategy.
///
/// Cheap to clone; clones share the registry cache.
#[derive(Clone)]
pub struct Authorizer {
    inner: Arc<AuthorizerInner>,
}

struct AuthorizerInner {
    store: Arc<dyn AuthorizationStore>,
    registry: PermissionRegistry,
    matcher: Arc<dyn PermissionMatcher>,
    config: PermissionConfig,
}

impl Authorizer {
    pub fn new(store: Arc<dyn AuthorizationStore>, config: PermissionConfig) -> Result<Self> {
        config.validate()?;

        let matcher = matcher::matcher_for(&config);
        let registry = PermissionRegistry::new(
            Arc::clone(&store),
            config.cache.clone(),
            config.models.clone(),
        );

        info!(
            store = store.name(),
            matcher = matcher.name(),
            entity_key = %config.entity_key,
            "Authorizer initialized"
        );

        Ok(Self {
            inner: Arc::new(AuthorizerInner {
                store,
                registry,
                matcher,
                config,
            }),
        })
    }

    pub fn store(&self) -> &dyn AuthorizationStore {
        self.inner.store.as_ref()
    }

    pub fn registry(&self) -> &PermissionRegistry {
        &self.inner.registry
    }

    pub fn matcher(&self) -> &dyn PermissionMatcher {
        self.inner.matcher.as_ref()
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.inner.config
    }

    pub fn permission_resolver(&self) -> PermissionResolver<'_> {
        PermissionResolver::new(self)
    }

    pub fn role_resolver(&self) -> RoleResolver<'_> {
        RoleResolver::new(self)
    }

    /// Drop the registry cache. Called by every write path.
    pub fn forget_cached_permissions(&self) {
        self.inner.registry.forget_cached_permissions();
    }

    /// Fail with `EntityNotFound` unless the entity exists.
    pub async fn ensure_entity_exists(&self, entity_id: EntityId) -> Result<()> {
        if self.inner.store.entity_exists(entity_id).await? {
            Ok(())
        } else {
            Err(WarrantError::EntityNotFound(entity_id).recorded())
        }
    }

    /// The scope column value for rows on `entity_id`.
    pub(crate) fn pivot(&self, entity_id: EntityId) -> Pivot {
        Pivot::new(self.inner.config.entity_key.clone(), entity_id)
    }
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("store", &self.inner.store.name())
            .field("matcher", &self.inner.matcher.name())
            .field("entity_key", &self.inner.config.entity_key)
            .finish()
    }
}
