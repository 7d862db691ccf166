//! Lookup and find-or-create over role and permission rows.
//!
//! Reads go through the [`PermissionRegistry`]; every write invalidates it
//! before returning.

use tracing::{debug, instrument};

use super::models::{NewPermission, NewRole, Permission, PermissionId, Role, RoleId};
use super::selector::{Selector, SelectorItem};
use super::store::RecordFilter;
use super::Authorizer;
use crate::error::{Lookup, Result, WarrantError};

// ═══════════════════════════════════════════════════════════════════════════════
// Permissions
// ═══════════════════════════════════════════════════════════════════════════════

/// Permission lookups bound to an [`Authorizer`].
#[derive(Debug, Clone, Copy)]
pub struct PermissionResolver<'a> {
    authz: &'a Authorizer,
}

impl<'a> PermissionResolver<'a> {
    pub(crate) fn new(authz: &'a Authorizer) -> Self {
        Self { authz }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Permission> {
        let rows = self
            .authz
            .registry()
            .get_permissions(&RecordFilter::Name(name.to_string()))
            .await?;
        rows.first()
            .cloned()
            .ok_or_else(|| WarrantError::PermissionNotFound(Lookup::Name(name.to_string())))
    }

    pub async fn find_by_id(&self, id: PermissionId) -> Result<Permission> {
        let rows = self
            .authz
            .registry()
            .get_permissions(&RecordFilter::Id(id.get()))
            .await?;
        rows.first()
            .cloned()
            .ok_or(WarrantError::PermissionNotFound(Lookup::Id(id.get())))
    }

    /// Every stored permission.
    pub async fn all(&self) -> Result<Vec<Permission>> {
        let rows = self.authz.registry().get_permissions(&RecordFilter::All).await?;
        Ok(rows.as_ref().clone())
    }

    /// Existing row, or a new one with default attributes.
    #[instrument(skip(self))]
    pub async fn find_or_create(&self, name: &str) -> Result<Permission> {
        match self.find_by_name(name).await {
            Ok(permission) => Ok(permission),
            Err(WarrantError::PermissionNotFound(_)) => self.create(NewPermission::new(name)).await,
            Err(err) => Err(err),
        }
    }

    /// Insert a permission; a taken name is `PermissionAlreadyExists`.
    #[instrument(skip(self), fields(name = %attributes.name))]
    pub async fn create(&self, attributes: NewPermission) -> Result<Permission> {
        let model = self.authz.registry().bindings().permission;
        let created = self.authz.store().create_permission(&model, attributes).await;
        self.authz.forget_cached_permissions();
        let permission = created.map_err(WarrantError::recorded)?;
        debug!(permission_id = %permission.id, "Created permission");
        Ok(permission)
    }

    /// Resolve a name, id or model to a stored row.
    pub async fn resolve(&self, item: SelectorItem<Permission>) -> Result<Permission> {
        match item {
            SelectorItem::Name(name) => self.find_by_name(&name).await,
            SelectorItem::Id(id) => self.find_by_id(PermissionId::new(id)).await,
            SelectorItem::Model(permission) => Ok(permission),
        }
    }

    /// Resolve every item, silently dropping empty and unknown ones.
    pub async fn resolve_existing(&self, selector: Selector<Permission>) -> Result<Vec<Permission>> {
        let mut resolved: Vec<Permission> = Vec::new();
        for item in selector.items() {
            if matches!(&item, SelectorItem::Name(name) if name.is_empty()) {
                continue;
            }
            match self.resolve(item).await {
                Ok(permission) => {
                    if !resolved.iter().any(|p| p.id == permission.id) {
                        resolved.push(permission);
                    }
                }
                Err(err) if err.is_not_found() => debug!(error = %err, "Skipping unknown permission"),
                Err(err) => return Err(err),
            }
        }
        Ok(resolved)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

/// Role lookups and role→permission links bound to an [`Authorizer`].
#[derive(Debug, Clone, Copy)]
pub struct RoleResolver<'a> {
    authz: &'a Authorizer,
}

impl<'a> RoleResolver<'a> {
    pub(crate) fn new(authz: &'a Authorizer) -> Self {
        Self { authz }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Role> {
        let rows = self
            .authz
            .registry()
            .get_roles(&RecordFilter::Name(name.to_string()))
            .await?;
        rows.first()
            .cloned()
            .ok_or_else(|| WarrantError::RoleNotFound(Lookup::Name(name.to_string())))
    }

    pub async fn find_by_id(&self, id: RoleId) -> Result<Role> {
        let rows = self
            .authz
            .registry()
            .get_roles(&RecordFilter::Id(id.get()))
            .await?;
        rows.first()
            .cloned()
            .ok_or(WarrantError::RoleNotFound(Lookup::Id(id.get())))
    }

    pub async fn all(&self) -> Result<Vec<Role>> {
        let rows = self.authz.registry().get_roles(&RecordFilter::All).await?;
        Ok(rows.as_ref().clone())
    }

    #[instrument(skip(self))]
    pub async fn find_or_create(&self, name: &str) -> Result<Role> {
        match self.find_by_name(name).await {
            Ok(role) => Ok(role),
            Err(WarrantError::RoleNotFound(_)) => self.create(NewRole::new(name)).await,
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self), fields(name = %attributes.name))]
    pub async fn create(&self, attributes: NewRole) -> Result<Role> {
        let model = self.authz.registry().bindings().role;
        let created = self.authz.store().create_role(&model, attributes).await;
        self.authz.forget_cached_permissions();
        let role = created.map_err(WarrantError::recorded)?;
        debug!(role_id = %role.id, "Created role");
        Ok(role)
    }

    pub async fn resolve(&self, item: SelectorItem<Role>) -> Result<Role> {
        match item {
            SelectorItem::Name(name) => self.find_by_name(&name).await,
            SelectorItem::Id(id) => self.find_by_id(RoleId::new(id)).await,
            SelectorItem::Model(role) => Ok(role),
        }
    }

    /// Resolve every item, silently dropping empty and unknown ones.
    pub async fn resolve_existing(&self, selector: Selector<Role>) -> Result<Vec<Role>> {
        let mut resolved: Vec<Role> = Vec::new();
        for item in selector.items() {
            if matches!(&item, SelectorItem::Name(name) if name.is_empty()) {
                continue;
            }
            match self.resolve(item).await {
                Ok(role) => {
                    if !resolved.iter().any(|r| r.id == role.id) {
                        resolved.push(role);
                    }
                }
                Err(err) if err.is_not_found() => debug!(error = %err, "Skipping unknown role"),
                Err(err) => return Err(err),
            }
        }
        Ok(resolved)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role → permission links (unscoped)
    // ─────────────────────────────────────────────────────────────────────────

    /// Permissions linked to a role.
    pub async fn permissions_of(&self, role: &Role) -> Result<Vec<Permission>> {
        self.authz.store().role_permissions(role.id).await
    }

    /// Link permissions to a role. Unknown items are skipped.
    #[instrument(skip(self, permissions), fields(role = %role.name))]
    pub async fn give_permission_to_role(
        &self,
        role: &Role,
        permissions: impl Into<Selector<Permission>>,
    ) -> Result<usize> {
        let resolved = self
            .authz
            .permission_resolver()
            .resolve_existing(permissions.into())
            .await?;

        let mut linked = 0;
        for permission in &resolved {
            if self
                .authz
                .store()
                .attach_role_permission(role.id, permission.id)
                .await?
            {
                linked += 1;
            }
        }
        self.authz.forget_cached_permissions();
        debug!(linked, "Linked permissions to role");
        Ok(linked)
    }

    /// Unlink one permission from a role.
    #[instrument(skip(self, permission), fields(role = %role.name))]
    pub async fn revoke_permission_from_role(
        &self,
        role: &Role,
        permission: impl Into<SelectorItem<Permission>>,
    ) -> Result<u64> {
        let permission = self
            .authz
            .permission_resolver()
            .resolve(permission.into())
            .await?;
        let removed = self
            .authz
            .store()
            .detach_role_permission(role.id, Some(permission.id))
            .await;
        self.authz.forget_cached_permissions();
        removed
    }

    /// Make the role's permission set exactly `permissions`.
    #[instrument(skip(self, permissions), fields(role = %role.name))]
    pub async fn sync_role_permissions(
        &self,
        role: &Role,
        permissions: impl Into<Selector<Permission>>,
    ) -> Result<usize> {
        self.authz.store().detach_role_permission(role.id, None).await?;
        self.give_permission_to_role(role, permissions).await
    }

    /// Whether the role itself carries a permission, independent of any entity.
    ///
    /// With wildcard matching the requested name is compared against the
    /// role's permission names; otherwise the permission is resolved and
    /// looked up by id.
    pub async fn role_has_permission(
        &self,
        role: &Role,
        permission: impl Into<SelectorItem<Permission>>,
    ) -> Result<bool> {
        let held = self.permissions_of(role).await?;
        let matcher = self.authz.matcher();
        let item = permission.into();

        if !matcher.requires_stored_permission() {
            let required = match item {
                SelectorItem::Name(name) => name,
                other => self.authz.permission_resolver().resolve(other).await?.name,
            };
            let names: Vec<&str> = held.iter().map(|p| p.name.as_str()).collect();
            return matcher.any_implies(&names, &required);
        }

        let permission = self.authz.permission_resolver().resolve(item).await?;
        Ok(held.iter().any(|p| p.id == permission.id))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
