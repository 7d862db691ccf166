//! Entity-scoped roles of a subject.
//!
//! Role checks compare against the roles the subject holds; they never look
//! up whether a requested role exists. Role names given as a single string may
//! be pipe-delimited (`"admin|editor"`), see [`convert_pipe_to_array`].

use tracing::{debug, instrument};

use super::models::{AssignmentKind, AssignmentRow, EntityId, Role, RoleId};
use super::selector::{convert_pipe_to_array, PipeSplit, Selector, SelectorItem};
use super::subject::{write_rows, Assignment, PendingAssignment, Subject};
use super::Authorizer;
use crate::error::{Result, WarrantError};

/// Role operations for one subject.
#[derive(Clone, Copy)]
pub struct RoleCapability<'a> {
    authz: &'a Authorizer,
    subject: &'a dyn Subject,
}

impl<'a> RoleCapability<'a> {
    pub fn new(authz: &'a Authorizer, subject: &'a dyn Subject) -> Self {
        Self { authz, subject }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add roles on `entity_id` without touching the ones already held.
    /// Empty and unknown items are skipped; repeated calls add no rows.
    #[instrument(skip(self, roles), fields(subject = ?self.subject.subject_key()))]
    pub async fn assign_role(
        &self,
        roles: impl Into<Selector<Role>>,
        entity_id: EntityId,
    ) -> Result<Assignment> {
        self.authz.ensure_entity_exists(entity_id).await?;
        let resolved = self.authz.role_resolver().resolve_existing(roles.into()).await?;
        let rows: Vec<AssignmentRow> = resolved
            .iter()
            .map(|role| AssignmentRow {
                target_id: role.id.get(),
                pivot: self.authz.pivot(entity_id),
            })
            .collect();

        let outcome = match self.subject.subject_key() {
            Some(subject) => {
                let written = write_rows(self.authz, &subject, AssignmentKind::Role, &rows).await;
                self.authz.forget_cached_permissions();
                let attached = written?;
                debug!(attached, "Assigned roles");
                Assignment::Applied { attached }
            }
            None => {
                self.authz.forget_cached_permissions();
                debug!(rows = rows.len(), "Deferring role assignment until the subject is saved");
                Assignment::Deferred(PendingAssignment::new(
                    self.subject.model_type(),
                    AssignmentKind::Role,
                    rows,
                ))
            }
        };
        Ok(outcome)
    }

    /// Remove one role on `entity_id`. Returns the rows removed.
    #[instrument(skip(self, role), fields(subject = ?self.subject.subject_key()))]
    pub async fn remove_role(
        &self,
        role: impl Into<SelectorItem<Role>>,
        entity_id: EntityId,
    ) -> Result<u64> {
        self.authz.ensure_entity_exists(entity_id).await?;
        let role = self.authz.role_resolver().resolve(role.into()).await?;

        let Some(subject) = self.subject.subject_key() else {
            return Ok(0);
        };
        let pivot = self.authz.pivot(entity_id);
        let removed = self
            .authz
            .store()
            .detach_assignments(&subject, AssignmentKind::Role, Some(role.id.get()), Some(&pivot))
            .await;
        self.authz.forget_cached_permissions();
        removed
    }

    /// Make the subject's roles on `entity_id` exactly `roles`.
    #[instrument(skip(self, roles), fields(subject = ?self.subject.subject_key()))]
    pub async fn sync_roles(
        &self,
        roles: impl Into<Selector<Role>>,
        entity_id: EntityId,
    ) -> Result<Assignment> {
        self.authz.ensure_entity_exists(entity_id).await?;
        if let Some(subject) = self.subject.subject_key() {
            let pivot = self.authz.pivot(entity_id);
            self.authz
                .store()
                .detach_assignments(&subject, AssignmentKind::Role, None, Some(&pivot))
                .await?;
        }
        self.assign_role(roles, entity_id).await
    }

    /// Deletion hook: a forced delete drops every role row of the subject.
    #[instrument(skip(self), fields(subject = ?self.subject.subject_key()))]
    pub async fn on_deleting(&self, force: bool) -> Result<u64> {
        let Some(subject) = self.subject.subject_key().filter(|_| force) else {
            return Ok(0);
        };
        let removed = self
            .authz
            .store()
            .detach_assignments(&subject, AssignmentKind::Role, None, None)
            .await;
        self.authz.forget_cached_permissions();
        removed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether the subject holds any of `roles` on `entity_id`.
    ///
    /// Accepts a name (pipe-delimited names are split), an id, a role, a list
    /// (any element matching) or a collection (non-empty intersection).
    pub async fn has_role(&self, roles: impl Into<Selector<Role>>, entity_id: EntityId) -> Result<bool> {
        self.authz.ensure_entity_exists(entity_id).await?;
        let scoped = self.held(Some(entity_id)).await?;
        Ok(matches_any(&roles.into(), &scoped))
    }

    /// Same as [`has_role`](Self::has_role).
    pub async fn has_any_role(&self, roles: impl Into<Selector<Role>>, entity_id: EntityId) -> Result<bool> {
        self.has_role(roles, entity_id).await
    }

    /// Whether the subject holds every one of `roles`.
    ///
    /// A single name or role is checked on `entity_id`. Lists are compared
    /// against every role the subject holds on any entity, and the entity is
    /// not validated, unless `strict_entity_check` is configured, in which case
    /// the entity is validated and only its roles count. Ids in lists match by id.
    pub async fn has_all_roles(&self, roles: impl Into<Selector<Role>>, entity_id: EntityId) -> Result<bool> {
        let strict = self.authz.config().strict_entity_check;
        if strict {
            self.authz.ensure_entity_exists(entity_id).await?;
        }

        let roles: Selector<Role> = roles.into();
        let requested = match roles {
            Selector::Name(name) if name.contains('|') => match convert_pipe_to_array(&name) {
                PipeSplit::Single(name) => return self.holds_on(entity_id, |r| r.name == name).await,
                PipeSplit::Many(names) => names.into_iter().map(Selector::Name).collect(),
            },
            Selector::Name(name) => return self.holds_on(entity_id, |r| r.name == name).await,
            Selector::Model(role) => return self.holds_on(entity_id, |r| r.id == role.id).await,
            other => other.flatten(),
        };

        let pool = if strict {
            self.held(Some(entity_id)).await?
        } else {
            self.held(None).await?
        };
        Ok(requested.iter().all(|item| match item {
            Selector::Name(name) => pool.iter().any(|r| &r.name == name),
            Selector::Id(id) => pool.iter().any(|r| r.id.get() == *id),
            Selector::Model(role) => pool.iter().any(|r| r.name == role.name),
            Selector::List(_) | Selector::Collection(_) => false,
        }))
    }

    /// Names of every role held on any entity, each once, in assignment order.
    pub async fn get_role_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for role in self.held(None).await? {
            if !names.contains(&role.name) {
                names.push(role.name);
            }
        }
        Ok(names)
    }

    async fn holds_on<F>(&self, entity_id: EntityId, predicate: F) -> Result<bool>
    where
        F: Fn(&Role) -> bool,
    {
        Ok(self.held(Some(entity_id)).await?.iter().any(predicate))
    }

    /// Role rows held, for one entity or across all of them.
    async fn held(&self, entity_id: Option<EntityId>) -> Result<Vec<Role>> {
        let Some(subject) = self.subject.subject_key() else {
            return Ok(Vec::new());
        };
        let pivot = entity_id.map(|id| self.authz.pivot(id));
        let rows = self
            .authz
            .store()
            .list_assignments(&subject, AssignmentKind::Role, pivot.as_ref())
            .await?;

        let resolver = self.authz.role_resolver();
        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            match resolver.find_by_id(RoleId::new(row.target_id)).await {
                Ok(role) => roles.push(role),
                Err(WarrantError::RoleNotFound(_)) => {
                    debug!(role_id = row.target_id, "Ignoring assignment to a missing role")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(roles)
    }
}

/// Whether any requested role is among the held ones.
fn matches_any(wanted: &Selector<Role>, held: &[Role]) -> bool {
    match wanted {
        Selector::Name(name) if name.contains('|') => match convert_pipe_to_array(name) {
            PipeSplit::Single(name) => held.iter().any(|r| r.name == name),
            PipeSplit::Many(names) => names.iter().any(|n| held.iter().any(|r| &r.name == n)),
        },
        Selector::Name(name) => held.iter().any(|r| &r.name == name),
        Selector::Id(id) => held.iter().any(|r| r.id.get() == *id),
        Selector::Model(role) => held.iter().any(|r| r.id == role.id),
        Selector::List(items) => items.iter().any(|item| matches_any(item, held)),
        Selector::Collection(roles) => roles.iter().any(|role| held.iter().any(|r| r.id == role.id)),
    }
}

impl std::fmt::Debug for RoleCapability<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleCapability")
            .field("subject", &self.subject.subject_key())
            .finish()
    }
}
