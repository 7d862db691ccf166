//! Storage collaborator contract.
//!
//! The engine never owns rows; it reads and writes through
//! [`AuthorizationStore`]. Role and permission rows live under a model name
//! (the registry's current binding). Implementations must enforce name
//! uniqueness within a model (reporting conflicts as `*AlreadyExists`) and the
//! one-row-per `(subject, target, entity)` rule for assignments.
//!
//! [`InMemoryStore`] is the reference implementation used for embedding and tests.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use super::models::{
    AssignmentKind, AssignmentRow, EntityId, NewPermission, NewRole, Permission, PermissionId,
    Pivot, Role, RoleId, ScopedAssignment, SubjectKey,
};
use crate::error::{Result, WarrantError};

// ═══════════════════════════════════════════════════════════════════════════════
// Lookup filters
// ═══════════════════════════════════════════════════════════════════════════════

/// Lookup parameters for role/permission rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordFilter {
    All,
    Name(String),
    Id(u64),
}

impl RecordFilter {
    fn accepts(&self, id: u64, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Name(wanted) => wanted == name,
            Self::Id(wanted) => *wanted == id,
        }
    }
}

impl fmt::Display for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Name(name) => write!(f, "name={}", name),
            Self::Id(id) => write!(f, "id={}", id),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistence operations the engine consumes.
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Permission rows of `model` matching `filter`.
    async fn find_permissions(&self, model: &str, filter: &RecordFilter) -> Result<Vec<Permission>>;

    /// Role rows of `model` matching `filter`.
    async fn find_roles(&self, model: &str, filter: &RecordFilter) -> Result<Vec<Role>>;

    /// Insert a permission under `model`; a duplicate name is
    /// `PermissionAlreadyExists`.
    async fn create_permission(&self, model: &str, attributes: NewPermission) -> Result<Permission>;

    /// Insert a role under `model`; a duplicate name is `RoleAlreadyExists`.
    async fn create_role(&self, model: &str, attributes: NewRole) -> Result<Role>;

    /// Assignment rows for a subject, optionally limited to one scope.
    async fn list_assignments(
        &self,
        subject: &SubjectKey,
        kind: AssignmentKind,
        scope: Option<&Pivot>,
    ) -> Result<Vec<ScopedAssignment>>;

    /// Write one assignment row. Returns `false` if it already existed.
    async fn attach_assignment(
        &self,
        subject: &SubjectKey,
        kind: AssignmentKind,
        row: &AssignmentRow,
    ) -> Result<bool>;

    /// Remove assignment rows. `target_id == None` removes every target and
    /// `scope == None` every scope. Returns the number of rows removed.
    async fn detach_assignments(
        &self,
        subject: &SubjectKey,
        kind: AssignmentKind,
        target_id: Option<u64>,
        scope: Option<&Pivot>,
    ) -> Result<u64>;

    /// Whether the protected resource exists.
    async fn entity_exists(&self, entity_id: EntityId) -> Result<bool>;

    /// Permissions linked to a role (unscoped).
    async fn role_permissions(&self, role_id: RoleId) -> Result<Vec<Permission>>;

    /// Link a permission to a role. Returns `false` if already linked.
    async fn attach_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<bool>;

    /// Unlink one permission (or all with `None`) from a role.
    async fn detach_role_permission(
        &self,
        role_id: RoleId,
        permission_id: Option<PermissionId>,
    ) -> Result<u64>;

    /// Store name for logs.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════════════

/// A row tagged with the model it was created under.
struct Modeled<T> {
    model: String,
    row: T,
}

#[derive(Default)]
struct Tables {
    permissions: BTreeMap<PermissionId, Modeled<Permission>>,
    roles: BTreeMap<RoleId, Modeled<Role>>,
    entities: BTreeSet<EntityId>,
    assignments: Vec<ScopedAssignment>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    next_permission_id: AtomicU64,
    next_role_id: AtomicU64,
    /// Number of role/permission lookups served (for cache diagnostics)
    lookups: AtomicU64,
    /// Simulated outage: every call fails with a storage error
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protected resource.
    pub fn insert_entity(&self, entity_id: EntityId) {
        self.tables.write().entities.insert(entity_id);
    }

    /// Forget a protected resource. Assignment rows are left alone.
    pub fn remove_entity(&self, entity_id: EntityId) -> bool {
        self.tables.write().entities.remove(&entity_id)
    }

    /// Total assignment rows of a kind, across all subjects.
    pub fn assignment_count(&self, kind: AssignmentKind) -> usize {
        self.tables
            .read()
            .assignments
            .iter()
            .filter(|a| a.kind == kind)
            .count()
    }

    /// How many role/permission lookups reached the store.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Toggle a simulated outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(WarrantError::storage("in-memory store is unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryStore {
    async fn find_permissions(&self, model: &str, filter: &RecordFilter) -> Result<Vec<Permission>> {
        self.check_available()?;
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        Ok(tables
            .permissions
            .values()
            .filter(|p| p.model == model && filter.accepts(p.row.id.get(), &p.row.name))
            .map(|p| p.row.clone())
            .collect())
    }

    async fn find_roles(&self, model: &str, filter: &RecordFilter) -> Result<Vec<Role>> {
        self.check_available()?;
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read();
        Ok(tables
            .roles
            .values()
            .filter(|r| r.model == model && filter.accepts(r.row.id.get(), &r.row.name))
            .map(|r| r.row.clone())
            .collect())
    }

    async fn create_permission(&self, model: &str, attributes: NewPermission) -> Result<Permission> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if tables
            .permissions
            .values()
            .any(|p| p.model == model && p.row.name == attributes.name)
        {
            return Err(WarrantError::PermissionAlreadyExists(attributes.name));
        }

        let now = Utc::now();
        let permission = Permission {
            id: PermissionId::new(self.next_permission_id.fetch_add(1, Ordering::Relaxed) + 1),
            name: attributes.name,
            guard_name: attributes.guard_name,
            created_at: now,
            updated_at: now,
        };
        tables.permissions.insert(
            permission.id,
            Modeled {
                model: model.to_string(),
                row: permission.clone(),
            },
        );
        debug!(
            permission_id = %permission.id,
            name = %permission.name,
            model = %model,
            "Inserted permission"
        );
        Ok(permission)
    }

    async fn create_role(&self, model: &str, attributes: NewRole) -> Result<Role> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if tables
            .roles
            .values()
            .any(|r| r.model == model && r.row.name == attributes.name)
        {
            return Err(WarrantError::RoleAlreadyExists(attributes.name));
        }

        let now = Utc::now();
        let role = Role {
            id: RoleId::new(self.next_role_id.fetch_add(1, Ordering::Relaxed) + 1),
            name: attributes.name,
            guard_name: attributes.guard_name,
            created_at: now,
            updated_at: now,
        };
        tables.roles.insert(
            role.id,
            Modeled {
                model: model.to_string(),
                row: role.clone(),
            },
        );
        debug!(role_id = %role.id, name = %role.name, model = %model, "Inserted role");
        Ok(role)
    }

    async fn list_assignments(
        &self,
        subject: &SubjectKey,
        kind: AssignmentKind,
        scope: Option<&Pivot>,
    ) -> Result<Vec<ScopedAssignment>> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(tables
            .assignments
            .iter()
            .filter(|a| a.kind == kind && &a.subject == subject)
            .filter(|a| scope.map_or(true, |s| a.pivot == *s))
            .cloned()
            .collect())
    }

    async fn attach_assignment(
        &self,
        subject: &SubjectKey,
        kind: AssignmentKind,
        row: &AssignmentRow,
    ) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let exists = tables.assignments.iter().any(|a| {
            a.kind == kind
                && &a.subject == subject
                && a.target_id == row.target_id
                && a.pivot == row.pivot
        });
        if exists {
            return Ok(false);
        }

        tables.assignments.push(ScopedAssignment {
            subject: subject.clone(),
            kind,
            target_id: row.target_id,
            pivot: row.pivot.clone(),
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn detach_assignments(
        &self,
        subject: &SubjectKey,
        kind: AssignmentKind,
        target_id: Option<u64>,
        scope: Option<&Pivot>,
    ) -> Result<u64> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let before = tables.assignments.len();
        tables.assignments.retain(|a| {
            let selected = a.kind == kind
                && &a.subject == subject
                && target_id.map_or(true, |t| a.target_id == t)
                && scope.map_or(true, |s| a.pivot == *s);
            !selected
        });
        Ok((before - tables.assignments.len()) as u64)
    }

    async fn entity_exists(&self, entity_id: EntityId) -> Result<bool> {
        self.check_available()?;
        Ok(self.tables.read().entities.contains(&entity_id))
    }

    async fn role_permissions(&self, role_id: RoleId) -> Result<Vec<Permission>> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(tables
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| tables.permissions.get(p).map(|p| p.row.clone()))
            .collect())
    }

    async fn attach_role_permission(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> Result<bool> {
        self.check_available()?;
        Ok(self.tables.write().role_permissions.insert((role_id, permission_id)))
    }

    async fn detach_role_permission(
        &self,
        role_id: RoleId,
        permission_id: Option<PermissionId>,
    ) -> Result<u64> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let before = tables.role_permissions.len();
        tables
            .role_permissions
            .retain(|(r, p)| !(*r == role_id && permission_id.map_or(true, |wanted| *p == wanted)));
        Ok((before - tables.role_permissions.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::models::SubjectId;

    const PERMISSION: &str = "permission";
    const ROLE: &str = "role";

    fn subject() -> SubjectKey {
        SubjectKey::new("user", SubjectId::new(1))
    }

    fn row(target_id: u64, entity: u64) -> AssignmentRow {
        AssignmentRow {
            target_id,
            pivot: Pivot::new("entity_id", EntityId::new(entity)),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_names() {
        let store = InMemoryStore::new();
        let first = store.create_permission(PERMISSION, NewPermission::new("edit")).await.unwrap();
        assert_eq!(first.id, PermissionId::new(1));

        let err = store
            .create_permission(PERMISSION, NewPermission::new("edit"))
            .await
            .unwrap_err();
        assert!(matches!(err, WarrantError::PermissionAlreadyExists(name) if name == "edit"));

        let role_err = {
            store.create_role(ROLE, NewRole::new("admin")).await.unwrap();
            store.create_role(ROLE, NewRole::new("admin")).await.unwrap_err()
        };
        assert!(matches!(role_err, WarrantError::RoleAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_rows_are_partitioned_by_model() {
        let store = InMemoryStore::new();
        store.create_permission(PERMISSION, NewPermission::new("edit")).await.unwrap();
        store.create_permission("team_permission", NewPermission::new("edit")).await.unwrap();
        store.create_role("team_role", NewRole::new("lead")).await.unwrap();

        let filter = RecordFilter::Name("edit".into());
        assert_eq!(store.find_permissions(PERMISSION, &filter).await.unwrap().len(), 1);
        assert_eq!(store.find_permissions("team_permission", &filter).await.unwrap().len(), 1);
        assert!(store.find_permissions("other", &filter).await.unwrap().is_empty());
        assert!(store.find_roles(ROLE, &RecordFilter::All).await.unwrap().is_empty());
        assert_eq!(store.find_roles("team_role", &RecordFilter::All).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_is_idempotent_per_scope() {
        let store = InMemoryStore::new();
        let s = subject();

        assert!(store.attach_assignment(&s, AssignmentKind::Permission, &row(1, 10)).await.unwrap());
        assert!(!store.attach_assignment(&s, AssignmentKind::Permission, &row(1, 10)).await.unwrap());
        assert!(store.attach_assignment(&s, AssignmentKind::Permission, &row(1, 11)).await.unwrap());

        assert_eq!(store.assignment_count(AssignmentKind::Permission), 2);
        assert_eq!(store.assignment_count(AssignmentKind::Role), 0);
    }

    #[tokio::test]
    async fn test_detach_by_scope_and_target() {
        let store = InMemoryStore::new();
        let s = subject();
        for (target, entity) in [(1, 10), (2, 10), (1, 11)] {
            store.attach_assignment(&s, AssignmentKind::Role, &row(target, entity)).await.unwrap();
        }

        let scope = Pivot::new("entity_id", EntityId::new(10));
        let removed = store
            .detach_assignments(&s, AssignmentKind::Role, Some(1), Some(&scope))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let removed = store
            .detach_assignments(&s, AssignmentKind::Role, None, None)
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        let err = store.find_permissions(PERMISSION, &RecordFilter::All).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StorageError);
    }

    #[tokio::test]
    async fn test_role_permission_links() {
        let store = InMemoryStore::new();
        let role = store.create_role(ROLE, NewRole::new("writer")).await.unwrap();
        let edit = store.create_permission(PERMISSION, NewPermission::new("edit")).await.unwrap();
        let view = store.create_permission(PERMISSION, NewPermission::new("view")).await.unwrap();

        store.attach_role_permission(role.id, edit.id).await.unwrap();
        store.attach_role_permission(role.id, view.id).await.unwrap();
        assert_eq!(store.role_permissions(role.id).await.unwrap().len(), 2);

        assert_eq!(store.detach_role_permission(role.id, Some(edit.id)).await.unwrap(), 1);
        let left = store.role_permissions(role.id).await.unwrap();
        assert_eq!(left, vec![view]);
    }
}
