//! Subjects and the assignment lifecycle.
//!
//! Any model that can hold roles or permissions implements [`Subject`] and
//! opts into the capabilities with empty `impl HasPermissions for User {}` /
//! `impl HasRoles for User {}` blocks.
//!
//! Grants on a subject that has not been persisted yet cannot be written, so
//! they come back as [`Assignment::Deferred`]. The [`PendingAssignment`] token
//! is consumed by [`PendingAssignment::apply`] once the subject has an id,
//! which makes a second application impossible. [`DeferredAssignments`] is a
//! small queue for persistence layers that prefer to flush on save.

use parking_lot::Mutex;
use std::mem;
use tracing::{debug, instrument};

use super::models::{AssignmentKind, AssignmentRow, SubjectId, SubjectKey};
use super::permissions::PermissionCapability;
use super::roles::RoleCapability;
use super::Authorizer;
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// Subject traits
// ═══════════════════════════════════════════════════════════════════════════════

/// A principal that can be granted roles and permissions.
pub trait Subject: Send + Sync {
    /// Model type recorded on assignment rows (e.g. `"user"`).
    fn model_type(&self) -> &str;

    /// Persisted id, or `None` before the first save.
    fn subject_id(&self) -> Option<SubjectId>;

    fn subject_key(&self) -> Option<SubjectKey> {
        self.subject_id()
            .map(|id| SubjectKey::new(self.model_type(), id))
    }
}

/// Direct, entity-scoped permissions.
pub trait HasPermissions: Subject + Sized {
    fn permissions<'a>(&'a self, authz: &'a Authorizer) -> PermissionCapability<'a> {
        PermissionCapability::new(authz, self)
    }
}

/// Entity-scoped roles.
pub trait HasRoles: HasPermissions {
    fn roles<'a>(&'a self, authz: &'a Authorizer) -> RoleCapability<'a> {
        RoleCapability::new(authz, self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Assignment outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a grant.
#[derive(Debug)]
#[must_use = "a deferred assignment must be applied once the subject is saved"]
pub enum Assignment {
    /// Rows were written; `attached` counts the ones that did not exist yet.
    Applied { attached: usize },
    /// The subject is unsaved; apply the token after the first save.
    Deferred(PendingAssignment),
}

impl Assignment {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Newly written rows, zero while deferred.
    pub fn attached(&self) -> usize {
        match self {
            Self::Applied { attached } => *attached,
            Self::Deferred(_) => 0,
        }
    }
}

/// Rows waiting for their subject to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAssignment {
    model_type: String,
    kind: AssignmentKind,
    rows: Vec<AssignmentRow>,
}

impl PendingAssignment {
    pub(crate) fn new(model_type: impl Into<String>, kind: AssignmentKind, rows: Vec<AssignmentRow>) -> Self {
        Self {
            model_type: model_type.into(),
            kind,
            rows,
        }
    }

    pub fn kind(&self) -> AssignmentKind {
        self.kind
    }

    pub fn rows(&self) -> &[AssignmentRow] {
        &self.rows
    }

    /// Write the rows for the now persisted subject.
    #[instrument(skip(self, authz), fields(kind = %self.kind, rows = self.rows.len()))]
    pub async fn apply(self, authz: &Authorizer, subject_id: SubjectId) -> Result<usize> {
        let subject = SubjectKey::new(self.model_type, subject_id);
        let attached = write_rows(authz, &subject, self.kind, &self.rows).await;
        authz.forget_cached_permissions();
        let attached = attached?;
        debug!(subject = %subject, attached, "Applied deferred assignment");
        Ok(attached)
    }
}

/// Attach rows, counting the new ones. Existing rows are left as they are.
pub(crate) async fn write_rows(
    authz: &Authorizer,
    subject: &SubjectKey,
    kind: AssignmentKind,
    rows: &[AssignmentRow],
) -> Result<usize> {
    let mut attached = 0;
    for row in rows {
        if authz.store().attach_assignment(subject, kind, row).await? {
            attached += 1;
        }
    }
    Ok(attached)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Deferred queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-instance queue of pending grants, drained on save.
#[derive(Debug, Default)]
pub struct DeferredAssignments {
    pending: Mutex<Vec<PendingAssignment>>,
}

impl DeferredAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a deferred grant. Applied grants pass through untouched and
    /// their attached count is returned.
    pub fn push(&self, assignment: Assignment) -> usize {
        match assignment {
            Assignment::Applied { attached } => attached,
            Assignment::Deferred(pending) => {
                self.pending.lock().push(pending);
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Apply and drain everything queued. A later flush finds nothing to do.
    ///
    /// On failure the unapplied grants go back on the queue.
    pub async fn flush(&self, authz: &Authorizer, subject_id: SubjectId) -> Result<usize> {
        let mut queued = mem::take(&mut *self.pending.lock()).into_iter();
        let mut attached = 0;

        while let Some(pending) = queued.next() {
            let retry = pending.clone();
            match pending.apply(authz, subject_id).await {
                Ok(count) => attached += count,
                Err(err) => {
                    let mut guard = self.pending.lock();
                    guard.push(retry);
                    guard.extend(queued);
                    return Err(err);
                }
            }
        }
        Ok(attached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PermissionConfig;
    use crate::rbac::models::{EntityId, Pivot};
    use crate::rbac::store::InMemoryStore;
    use std::sync::Arc;

    struct Guest;

    impl Subject for Guest {
        fn model_type(&self) -> &str {
            "guest"
        }

        fn subject_id(&self) -> Option<SubjectId> {
            None
        }
    }

    fn pending(target_id: u64) -> PendingAssignment {
        PendingAssignment::new(
            "user",
            AssignmentKind::Permission,
            vec![AssignmentRow {
                target_id,
                pivot: Pivot::new("entity_id", EntityId::new(1)),
            }],
        )
    }

    #[test]
    fn test_unsaved_subject_has_no_key() {
        assert!(Guest.subject_key().is_none());
    }

    #[test]
    fn test_queue_passes_applied_through() {
        let queue = DeferredAssignments::new();
        assert_eq!(queue.push(Assignment::Applied { attached: 2 }), 2);
        assert!(queue.is_empty());

        assert_eq!(queue.push(Assignment::Deferred(pending(1))), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_flush_drains_queue() {
        let store = Arc::new(InMemoryStore::new());
        let authz = Authorizer::new(store.clone(), PermissionConfig::default()).unwrap();
        let queue = DeferredAssignments::new();
        queue.push(Assignment::Deferred(pending(1)));
        queue.push(Assignment::Deferred(pending(2)));

        let attached = tokio_test::block_on(queue.flush(&authz, SubjectId::new(4))).unwrap();
        assert_eq!(attached, 2);
        assert!(queue.is_empty());
        assert_eq!(store.assignment_count(AssignmentKind::Permission), 2);

        let again = tokio_test::block_on(queue.flush(&authz, SubjectId::new(4))).unwrap();
        assert_eq!(again, 0);
    }
}
