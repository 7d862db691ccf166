//! Allow/deny decisions for request handling layers.
//!
//! The [`Gate`] turns a raw requirement (`"posts.edit|posts.delete"` or a list
//! of names) plus an entity into either `Ok(())` or a typed failure:
//! `NotLoggedIn` when there is no subject, `Unauthorized` carrying the
//! requested names when the check is false. Other errors from the underlying
//! check (unknown entity, unknown permission in an all-of check, storage)
//! pass through unchanged.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument, warn};

use super::models::EntityId;
use super::permissions::PermissionCapability;
use super::roles::RoleCapability;
use super::selector::Selector;
use super::subject::Subject;
use super::Authorizer;
use crate::error::{RequirementKind, Result, WarrantError};

// ═══════════════════════════════════════════════════════════════════════════════
// Modes and requirements
// ═══════════════════════════════════════════════════════════════════════════════

/// Which check the gate runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    AnyPermission,
    AllPermissions,
    AnyRole,
    AllRoles,
    /// Any of the names as a role, otherwise any of them as a permission.
    AnyRoleOrPermission,
}

impl GateMode {
    pub fn requirement_kind(&self) -> RequirementKind {
        match self {
            Self::AnyPermission | Self::AllPermissions => RequirementKind::Permissions,
            Self::AnyRole | Self::AllRoles => RequirementKind::Roles,
            Self::AnyRoleOrPermission => RequirementKind::RolesOrPermissions,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnyPermission => "any_permission",
            Self::AllPermissions => "all_permissions",
            Self::AnyRole => "any_role",
            Self::AllRoles => "all_roles",
            Self::AnyRoleOrPermission => "any_role_or_permission",
        }
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The names a route asks for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Requirement {
    names: Vec<String>,
}

impl Requirement {
    /// Split a raw `a|b|c` string. Quotes are not interpreted.
    pub fn parse(raw: &str) -> Self {
        Self {
            names: raw.split('|').map(str::to_string).collect(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn selector<T>(&self) -> Selector<T> {
        Selector::List(self.names.iter().map(Selector::from).collect())
    }
}

impl From<&str> for Requirement {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for Requirement {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<Vec<&str>> for Requirement {
    fn from(names: Vec<&str>) -> Self {
        Self::from_names(names)
    }
}

impl From<Vec<String>> for Requirement {
    fn from(names: Vec<String>) -> Self {
        Self::from_names(names)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Gate
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Gate {
    authz: Authorizer,
}

impl Gate {
    pub fn new(authz: Authorizer) -> Self {
        Self { authz }
    }

    /// `Ok(())` when `subject` satisfies the requirement on `entity_id`.
    #[instrument(skip(self, subject, requirement))]
    pub async fn authorize(
        &self,
        subject: Option<&dyn Subject>,
        mode: GateMode,
        requirement: impl Into<Requirement>,
        entity_id: EntityId,
    ) -> Result<()> {
        let Some(subject) = subject else {
            record_decision(mode, "not_logged_in");
            warn!("Rejected guest request");
            return Err(WarrantError::NotLoggedIn.recorded());
        };

        let requirement = requirement.into();
        if self.evaluate(subject, mode, &requirement, entity_id).await? {
            record_decision(mode, "allow");
            debug!(requested = ?requirement.names(), "Authorized");
            return Ok(());
        }

        record_decision(mode, "deny");
        let err = WarrantError::unauthorized(mode.requirement_kind(), requirement.names.iter().cloned());
        err.log();
        Err(err.recorded())
    }

    /// Boolean form of [`authorize`](Self::authorize): denials and guests are
    /// `false`, every other failure is returned.
    pub async fn allows(
        &self,
        subject: Option<&dyn Subject>,
        mode: GateMode,
        requirement: impl Into<Requirement>,
        entity_id: EntityId,
    ) -> Result<bool> {
        match self.authorize(subject, mode, requirement, entity_id).await {
            Ok(()) => Ok(true),
            Err(WarrantError::Unauthorized { .. } | WarrantError::NotLoggedIn) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn evaluate(
        &self,
        subject: &dyn Subject,
        mode: GateMode,
        requirement: &Requirement,
        entity_id: EntityId,
    ) -> Result<bool> {
        let permissions = PermissionCapability::new(&self.authz, subject);
        let roles = RoleCapability::new(&self.authz, subject);

        match mode {
            GateMode::AnyPermission => {
                permissions
                    .has_any_permission(requirement.selector(), entity_id)
                    .await
            }
            GateMode::AllPermissions => {
                permissions
                    .has_all_permissions(requirement.selector(), entity_id)
                    .await
            }
            GateMode::AnyRole => roles.has_any_role(requirement.selector(), entity_id).await,
            GateMode::AllRoles => roles.has_all_roles(requirement.selector(), entity_id).await,
            GateMode::AnyRoleOrPermission => {
                if roles.has_any_role(requirement.selector(), entity_id).await? {
                    return Ok(true);
                }
                permissions
                    .has_any_permission(requirement.selector(), entity_id)
                    .await
            }
        }
    }
}

fn record_decision(mode: GateMode, outcome: &'static str) {
    counter!(
        "warrant_gate_decisions_total",
        "mode" => mode.as_str(),
        "outcome" => outcome,
    )
    .increment(1);
}
