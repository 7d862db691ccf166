//! RBAC data models: identifiers, Permission, Role, subjects and scoped assignment rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Strongly-typed permission identifier.
    PermissionId
);
numeric_id!(
    /// Strongly-typed role identifier.
    RoleId
);
numeric_id!(
    /// Identifier of the protected resource an assignment is scoped to.
    EntityId
);
numeric_id!(
    /// Identifier of a persisted subject.
    SubjectId
);

// ═══════════════════════════════════════════════════════════════════════════════
// Permission
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored permission row. `name` is unique among permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub guard_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes for creating a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub name: String,
    pub guard_name: Option<String>,
}

impl NewPermission {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guard_name: None,
        }
    }

    pub fn with_guard(mut self, guard_name: impl Into<String>) -> Self {
        self.guard_name = Some(guard_name.into());
        self
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role
// ═══════════════════════════════════════════════════════════════════════════════

/// A stored role row. `name` is unique among roles.
///
/// The permissions a role carries are unscoped links kept by the store; see
/// [`RoleResolver::role_has_permission`](super::resolver::RoleResolver::role_has_permission).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub guard_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes for creating a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub guard_name: Option<String>,
}

impl NewRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guard_name: None,
        }
    }

    pub fn with_guard(mut self, guard_name: impl Into<String>) -> Self {
        self.guard_name = Some(guard_name.into());
        self
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subjects and scoped assignments
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifies a persisted subject across model types (e.g. `user#42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub model_type: String,
    pub id: SubjectId,
}

impl SubjectKey {
    pub fn new(model_type: impl Into<String>, id: SubjectId) -> Self {
        Self {
            model_type: model_type.into(),
            id,
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model_type, self.id)
    }
}

/// Which assignment table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    Role,
    Permission,
}

impl fmt::Display for AssignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role => f.write_str("role"),
            Self::Permission => f.write_str("permission"),
        }
    }
}

/// The scope column of an assignment row: `{entity_key: entity_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pivot {
    pub key: String,
    pub entity_id: EntityId,
}

impl Pivot {
    pub fn new(key: impl Into<String>, entity_id: EntityId) -> Self {
        Self {
            key: key.into(),
            entity_id,
        }
    }

    /// Whether this pivot scopes a row to `entity_id` under column `key`.
    pub fn matches(&self, key: &str, entity_id: EntityId) -> bool {
        self.key == key && self.entity_id == entity_id
    }
}

/// A row to be written: the role/permission id plus its scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub target_id: u64,
    pub pivot: Pivot,
}

/// A stored `(subject, role|permission, entity)` binding.
///
/// A subject holds a given role/permission at most once per entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedAssignment {
    pub subject: SubjectKey,
    pub kind: AssignmentKind,
    pub target_id: u64,
    pub pivot: Pivot,
    pub created_at: DateTime<Utc>,
}

impl ScopedAssignment {
    pub fn is_for(&self, key: &str, entity_id: EntityId) -> bool {
        self.pivot.matches(key, entity_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
