//! Direct, entity-scoped permissions of a subject.

use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::models::{AssignmentKind, AssignmentRow, EntityId, Permission, PermissionId};
use super::selector::{Selector, SelectorItem};
use super::subject::{write_rows, Assignment, PendingAssignment, Subject};
use super::Authorizer;
use crate::error::{Result, WarrantError};

/// Permission operations for one subject.
///
/// Every check and mutation takes the entity it is scoped to. Checks on a
/// subject that has not been saved yet see no assignments.
#[derive(Clone, Copy)]
pub struct PermissionCapability<'a> {
    authz: &'a Authorizer,
    subject: &'a dyn Subject,
}

impl<'a> PermissionCapability<'a> {
    pub fn new(authz: &'a Authorizer, subject: &'a dyn Subject) -> Self {
        Self { authz, subject }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the subject holds `permission` on `entity_id`.
    ///
    /// Fails with `EntityNotFound` for an unknown entity. With exact matching
    /// an unknown permission is `PermissionNotFound`; wildcard matching works on
    /// the requested string and needs no stored row.
    pub async fn has_permission_to(
        &self,
        permission: impl Into<SelectorItem<Permission>>,
        entity_id: EntityId,
    ) -> Result<bool> {
        self.authz.ensure_entity_exists(entity_id).await?;
        self.matches(permission.into(), entity_id).await
    }

    /// [`has_permission_to`](Self::has_permission_to), with an unknown or
    /// malformed permission reported as `false`.
    pub async fn check_permission_to(
        &self,
        permission: impl Into<SelectorItem<Permission>>,
        entity_id: EntityId,
    ) -> Result<bool> {
        self.authz.ensure_entity_exists(entity_id).await?;
        self.check(permission.into(), entity_id).await
    }

    /// True on the first held item. Unknown items count as not held.
    pub async fn has_any_permission(
        &self,
        permissions: impl Into<Selector<Permission>>,
        entity_id: EntityId,
    ) -> Result<bool> {
        self.authz.ensure_entity_exists(entity_id).await?;
        for item in permissions.into().items() {
            if self.check(item, entity_id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// False on the first item not held. An unknown item fails the whole
    /// check with `PermissionNotFound`.
    pub async fn has_all_permissions(
        &self,
        permissions: impl Into<Selector<Permission>>,
        entity_id: EntityId,
    ) -> Result<bool> {
        self.authz.ensure_entity_exists(entity_id).await?;
        for item in permissions.into().items() {
            if !self.matches(item, entity_id).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Exact lookup of the `(subject, permission, entity)` row.
    pub async fn has_direct_permission(
        &self,
        permission: impl Into<SelectorItem<Permission>>,
        entity_id: EntityId,
    ) -> Result<bool> {
        let permission = self
            .authz
            .permission_resolver()
            .resolve(permission.into())
            .await?;
        self.holds(permission.id, entity_id).await
    }

    async fn check(&self, item: SelectorItem<Permission>, entity_id: EntityId) -> Result<bool> {
        match self.matches(item, entity_id).await {
            Err(WarrantError::PermissionNotFound(_) | WarrantError::MalformedWildcard(_)) => {
                Ok(false)
            }
            other => other,
        }
    }

    async fn matches(&self, item: SelectorItem<Permission>, entity_id: EntityId) -> Result<bool> {
        let matcher = self.authz.matcher();
        if matcher.requires_stored_permission() {
            let permission = self.authz.permission_resolver().resolve(item).await?;
            return self.holds(permission.id, entity_id).await;
        }

        let required = match item {
            SelectorItem::Name(name) => name,
            SelectorItem::Model(permission) => permission.name,
            id @ SelectorItem::Id(_) => self.authz.permission_resolver().resolve(id).await?.name,
        };
        let held = self.held(Some(entity_id)).await?;
        let names: Vec<&str> = held.iter().map(|p| p.name.as_str()).collect();
        matcher.any_implies(&names, &required)
    }

    async fn holds(&self, permission_id: PermissionId, entity_id: EntityId) -> Result<bool> {
        let Some(subject) = self.subject.subject_key() else {
            return Ok(false);
        };
        let pivot = self.authz.pivot(entity_id);
        let rows = self
            .authz
            .store()
            .list_assignments(&subject, AssignmentKind::Permission, Some(&pivot))
            .await?;
        Ok(rows.iter().any(|row| row.target_id == permission_id.get()))
    }

    /// Permission rows held directly, for one entity or across all of them.
    async fn held(&self, entity_id: Option<EntityId>) -> Result<Vec<Permission>> {
        let Some(subject) = self.subject.subject_key() else {
            return Ok(Vec::new());
        };
        let pivot = entity_id.map(|id| self.authz.pivot(id));
        let rows = self
            .authz
            .store()
            .list_assignments(&subject, AssignmentKind::Permission, pivot.as_ref())
            .await?;

        let resolver = self.authz.permission_resolver();
        let mut permissions = Vec::with_capacity(rows.len());
        for row in rows {
            match resolver.find_by_id(PermissionId::new(row.target_id)).await {
                Ok(permission) => permissions.push(permission),
                Err(WarrantError::PermissionNotFound(_)) => {
                    debug!(permission_id = row.target_id, "Ignoring assignment to a missing permission")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(permissions)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listing
    // ─────────────────────────────────────────────────────────────────────────

    /// Every permission held directly on any entity, once each, ordered by
    /// name then id.
    pub async fn get_all_permissions(&self) -> Result<Vec<Permission>> {
        let unique: BTreeMap<(String, PermissionId), Permission> = self
            .held(None)
            .await?
            .into_iter()
            .map(|p| ((p.name.clone(), p.id), p))
            .collect();
        Ok(unique.into_values().collect())
    }

    pub async fn get_permission_names(&self) -> Result<Vec<String>> {
        Ok(self
            .get_all_permissions()
            .await?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant permissions on `entity_id`. Empty and unknown items are skipped.
    ///
    /// An unsaved subject gets [`Assignment::Deferred`] back.
    #[instrument(skip(self, permissions), fields(subject = ?self.subject.subject_key()))]
    pub async fn give_permission_to(
        &self,
        permissions: impl Into<Selector<Permission>>,
        entity_id: EntityId,
    ) -> Result<Assignment> {
        self.authz.ensure_entity_exists(entity_id).await?;
        let resolved = self
            .authz
            .permission_resolver()
            .resolve_existing(permissions.into())
            .await?;
        let rows: Vec<AssignmentRow> = resolved
            .iter()
            .map(|permission| AssignmentRow {
                target_id: permission.id.get(),
                pivot: self.authz.pivot(entity_id),
            })
            .collect();

        let outcome = match self.subject.subject_key() {
            Some(subject) => {
                let written = write_rows(self.authz, &subject, AssignmentKind::Permission, &rows).await;
                self.authz.forget_cached_permissions();
                let attached = written?;
                debug!(attached, "Granted permissions");
                Assignment::Applied { attached }
            }
            None => {
                self.authz.forget_cached_permissions();
                debug!(rows = rows.len(), "Deferring permission grant until the subject is saved");
                Assignment::Deferred(PendingAssignment::new(
                    self.subject.model_type(),
                    AssignmentKind::Permission,
                    rows,
                ))
            }
        };
        Ok(outcome)
    }

    /// Make the subject's permissions on `entity_id` exactly `permissions`.
    #[instrument(skip(self, permissions), fields(subject = ?self.subject.subject_key()))]
    pub async fn sync_permissions(
        &self,
        permissions: impl Into<Selector<Permission>>,
        entity_id: EntityId,
    ) -> Result<Assignment> {
        self.authz.ensure_entity_exists(entity_id).await?;
        if let Some(subject) = self.subject.subject_key() {
            let pivot = self.authz.pivot(entity_id);
            let detached = self
                .authz
                .store()
                .detach_assignments(&subject, AssignmentKind::Permission, None, Some(&pivot))
                .await?;
            debug!(detached, "Cleared permissions before sync");
        }
        self.give_permission_to(permissions, entity_id).await
    }

    /// Remove one permission on `entity_id`. Returns the rows removed.
    #[instrument(skip(self, permission), fields(subject = ?self.subject.subject_key()))]
    pub async fn revoke_permission_to(
        &self,
        permission: impl Into<SelectorItem<Permission>>,
        entity_id: EntityId,
    ) -> Result<u64> {
        self.authz.ensure_entity_exists(entity_id).await?;
        let permission = self
            .authz
            .permission_resolver()
            .resolve(permission.into())
            .await?;

        let Some(subject) = self.subject.subject_key() else {
            return Ok(0);
        };
        let pivot = self.authz.pivot(entity_id);
        let removed = self
            .authz
            .store()
            .detach_assignments(
                &subject,
                AssignmentKind::Permission,
                Some(permission.id.get()),
                Some(&pivot),
            )
            .await;
        self.authz.forget_cached_permissions();
        removed
    }

    /// Deletion hook: a forced delete drops every permission row of the
    /// subject; a soft delete keeps them.
    #[instrument(skip(self), fields(subject = ?self.subject.subject_key()))]
    pub async fn on_deleting(&self, force: bool) -> Result<u64> {
        let Some(subject) = self.subject.subject_key().filter(|_| force) else {
            return Ok(0);
        };
        let removed = self
            .authz
            .store()
            .detach_assignments(&subject, AssignmentKind::Permission, None, None)
            .await;
        self.authz.forget_cached_permissions();
        removed
    }
}

impl std::fmt::Debug for PermissionCapability<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCapability")
            .field("subject", &self.subject.subject_key())
            .finish()
    }
}
