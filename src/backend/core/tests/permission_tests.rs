//! Integration tests for direct, entity-scoped permissions.

use std::sync::Arc;

use warrant_core::config::PermissionConfig;
use warrant_core::error::{ErrorCode, Lookup, WarrantError};
use warrant_core::rbac::{
    AssignmentKind, AuthorizationStore, Authorizer, DeferredAssignments, EntityId, HasPermissions,
    HasRoles, InMemoryStore, NewPermission, Subject, SubjectId, SubjectKey,
};

struct User {
    id: Option<SubjectId>,
}

impl User {
    fn saved(id: u64) -> Self {
        Self { id: Some(SubjectId::new(id)) }
    }

    fn unsaved() -> Self {
        Self { id: None }
    }
}

impl Subject for User {
    fn model_type(&self) -> &str {
        "user"
    }

    fn subject_id(&self) -> Option<SubjectId> {
        self.id
    }
}

impl HasPermissions for User {}
impl HasRoles for User {}

fn project(id: u64) -> EntityId {
    EntityId::new(id)
}

fn setup_with(config: PermissionConfig) -> (Arc<InMemoryStore>, Authorizer) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_entity(project(1));
    store.insert_entity(project(2));
    let authz = Authorizer::new(store.clone(), config).unwrap();
    (store, authz)
}

fn setup() -> (Arc<InMemoryStore>, Authorizer) {
    setup_with(PermissionConfig::default())
}

async fn seed(authz: &Authorizer, names: &[&str]) {
    for name in names {
        authz.permission_resolver().create(NewPermission::new(*name)).await.unwrap();
    }
}

#[tokio::test]
async fn test_find_or_create_returns_same_identity() {
    let (_, authz) = setup();

    let first = authz.permission_resolver().find_or_create("posts.edit").await.unwrap();
    let second = authz.permission_resolver().find_or_create("posts.edit").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(authz.permission_resolver().all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_twice_fails_with_already_exists() {
    let (_, authz) = setup();
    authz.permission_resolver().create(NewPermission::new("edit")).await.unwrap();

    let err = authz
        .permission_resolver()
        .create(NewPermission::new("edit"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionAlreadyExists);
}

#[tokio::test]
async fn test_grant_is_scoped_to_entity() {
    let (_, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);

    let assignment = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();
    assert_eq!(assignment.attached(), 1);

    assert!(user.permissions(&authz).has_permission_to("edit", project(1)).await.unwrap());
    assert!(!user.permissions(&authz).has_permission_to("edit", project(2)).await.unwrap());
    assert!(user.permissions(&authz).has_direct_permission("edit", project(1)).await.unwrap());
}

#[tokio::test]
async fn test_permission_accepts_id_and_model() {
    let (_, authz) = setup();
    seed(&authz, &["edit"]).await;
    let edit = authz.permission_resolver().find_by_name("edit").await.unwrap();
    let user = User::saved(1);

    let assignment = user.permissions(&authz).give_permission_to(edit.id, project(1)).await.unwrap();
    assert!(!assignment.is_deferred());

    assert!(user.permissions(&authz).has_permission_to(edit.id.get(), project(1)).await.unwrap());
    assert!(user.permissions(&authz).has_permission_to(&edit, project(1)).await.unwrap());
}

#[tokio::test]
async fn test_repeated_grant_is_idempotent() {
    let (store, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);

    let first = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();
    let second = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();

    assert_eq!((first.attached(), second.attached()), (1, 0));
    assert_eq!(store.assignment_count(AssignmentKind::Permission), 1);
}

#[tokio::test]
async fn test_grant_skips_unknown_and_empty_items() {
    let (store, authz) = setup();
    seed(&authz, &["edit", "view"]).await;
    let user = User::saved(1);

    let assignment = user
        .permissions(&authz)
        .give_permission_to(vec!["", "missing", "edit", "view"], project(1))
        .await
        .unwrap();

    assert_eq!(assignment.attached(), 2);
    assert_eq!(store.assignment_count(AssignmentKind::Permission), 2);
}

#[tokio::test]
async fn test_revoke_removes_grant() {
    let (_, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);

    let assignment = permissions.give_permission_to("edit", project(1)).await.unwrap();
    assert_eq!(assignment.attached(), 1);
    assert_eq!(permissions.revoke_permission_to("edit", project(1)).await.unwrap(), 1);

    assert!(!permissions.has_permission_to("edit", project(1)).await.unwrap());
}

#[tokio::test]
async fn test_revoke_on_other_entity_keeps_grant() {
    let (_, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);

    let _applied = permissions.give_permission_to("edit", project(1)).await.unwrap();
    assert_eq!(permissions.revoke_permission_to("edit", project(2)).await.unwrap(), 0);
    assert!(permissions.has_permission_to("edit", project(1)).await.unwrap());
}

#[tokio::test]
async fn test_sync_replaces_entity_permissions() {
    let (_, authz) = setup();
    seed(&authz, &["p1", "p2"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);

    let _applied = permissions.give_permission_to("p1", project(2)).await.unwrap();
    let _applied = permissions.sync_permissions(vec!["p1", "p2"], project(1)).await.unwrap();
    let _applied = permissions.sync_permissions(vec!["p2"], project(1)).await.unwrap();

    assert!(!permissions.has_permission_to("p1", project(1)).await.unwrap());
    assert!(permissions.has_permission_to("p2", project(1)).await.unwrap());
    // Other entities are untouched.
    assert!(permissions.has_permission_to("p1", project(2)).await.unwrap());
}

#[tokio::test]
async fn test_has_any_permission_ignores_unknown_items() {
    let (_, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);
    let _applied = permissions.give_permission_to("edit", project(1)).await.unwrap();

    assert!(permissions.has_any_permission(vec!["nonexistent", "edit"], project(1)).await.unwrap());
    assert!(!permissions.has_any_permission(vec!["nonexistent"], project(1)).await.unwrap());
    assert!(!permissions.has_any_permission(Vec::<&str>::new(), project(1)).await.unwrap());
}

#[tokio::test]
async fn test_has_all_permissions_fails_fast_on_unknown_item() {
    let (_, authz) = setup();
    seed(&authz, &["edit", "view"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);
    let _applied = permissions.give_permission_to(vec!["edit", "view"], project(1)).await.unwrap();

    assert!(permissions.has_all_permissions(vec!["edit", "view"], project(1)).await.unwrap());

    let err = permissions
        .has_all_permissions(vec!["nonexistent", "edit"], project(1))
        .await
        .unwrap_err();
    assert!(matches!(err, WarrantError::PermissionNotFound(Lookup::Name(name)) if name == "nonexistent"));
}

#[tokio::test]
async fn test_check_permission_to_swallows_not_found() {
    let (_, authz) = setup();
    let user = User::saved(1);
    let permissions = user.permissions(&authz);

    assert!(!permissions.check_permission_to("missing", project(1)).await.unwrap());
    let err = permissions.has_permission_to("missing", project(1)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionNotFound);
}

#[tokio::test]
async fn test_unknown_entity_is_rejected() {
    let (_, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);
    let missing = project(99);

    for err in [
        permissions.has_permission_to("edit", missing).await.unwrap_err(),
        permissions.check_permission_to("edit", missing).await.unwrap_err(),
        permissions.has_any_permission(vec!["edit"], missing).await.unwrap_err(),
        permissions.revoke_permission_to("edit", missing).await.unwrap_err(),
    ] {
        assert!(matches!(err, WarrantError::EntityNotFound(id) if id == missing));
    }
    assert!(permissions.give_permission_to("edit", missing).await.is_err());
}

#[tokio::test]
async fn test_deferred_grant_applies_once() {
    let (store, authz) = setup();
    seed(&authz, &["edit"]).await;
    let mut user = User::unsaved();
    let queue = DeferredAssignments::new();

    let assignment = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();
    assert!(assignment.is_deferred());
    assert_eq!(queue.push(assignment), 0);
    assert_eq!(store.assignment_count(AssignmentKind::Permission), 0);

    // First save.
    user.id = Some(SubjectId::new(5));
    assert_eq!(queue.flush(&authz, SubjectId::new(5)).await.unwrap(), 1);
    // Second save of the same instance.
    assert_eq!(queue.flush(&authz, SubjectId::new(5)).await.unwrap(), 0);

    assert_eq!(store.assignment_count(AssignmentKind::Permission), 1);
    assert!(user.permissions(&authz).has_permission_to("edit", project(1)).await.unwrap());
}

#[tokio::test]
async fn test_pending_assignment_apply() {
    let (store, authz) = setup();
    seed(&authz, &["edit", "view"]).await;
    let user = User::unsaved();

    let assignment = user
        .permissions(&authz)
        .give_permission_to(vec!["edit", "view"], project(2))
        .await
        .unwrap();
    let pending = match assignment {
        warrant_core::rbac::Assignment::Deferred(pending) => pending,
        other => panic!("expected deferred assignment, got {:?}", other),
    };
    assert_eq!(pending.rows().len(), 2);

    assert_eq!(pending.apply(&authz, SubjectId::new(3)).await.unwrap(), 2);
    assert_eq!(store.assignment_count(AssignmentKind::Permission), 2);
}

#[tokio::test]
async fn test_failed_flush_keeps_pending_grants() {
    let (store, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::unsaved();
    let queue = DeferredAssignments::new();

    queue.push(user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap());

    store.set_unavailable(true);
    assert!(queue.flush(&authz, SubjectId::new(1)).await.is_err());
    assert_eq!(queue.len(), 1);

    store.set_unavailable(false);
    assert_eq!(queue.flush(&authz, SubjectId::new(1)).await.unwrap(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_lookups_reflect_latest_state_after_writes() {
    let (store, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);
    let resolver = authz.permission_resolver();

    assert!(resolver.find_by_name("audit").await.is_err());
    store.create_permission("permission", NewPermission::new("audit")).await.unwrap();
    // Written behind the engine's back: the cached miss is still served.
    assert!(resolver.find_by_name("audit").await.is_err());

    let _applied = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();
    assert_eq!(resolver.find_by_name("audit").await.unwrap().name, "audit");
}

#[tokio::test]
async fn test_repeated_checks_hit_the_cache() {
    let (store, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);
    let _applied = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();

    assert!(user.permissions(&authz).has_permission_to("edit", project(1)).await.unwrap());
    let lookups = store.lookup_count();
    assert!(user.permissions(&authz).has_permission_to("edit", project(1)).await.unwrap());
    assert_eq!(store.lookup_count(), lookups);
}

#[tokio::test]
async fn test_get_all_permissions_is_sorted_and_unique() {
    let (_, authz) = setup();
    seed(&authz, &["write", "read"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);

    let _applied = permissions.give_permission_to(vec!["write", "read"], project(1)).await.unwrap();
    let _applied = permissions.give_permission_to("read", project(2)).await.unwrap();

    let all = permissions.get_all_permissions().await.unwrap();
    let names: Vec<&str> = all.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["read", "write"]);
    assert_eq!(permissions.get_permission_names().await.unwrap(), ["read", "write"]);
}

#[tokio::test]
async fn test_force_delete_detaches_everything() {
    let (store, authz) = setup();
    seed(&authz, &["edit"]).await;
    authz.role_resolver().find_or_create("admin").await.unwrap();
    let user = User::saved(1);

    let _applied = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();
    let _applied = user.roles(&authz).assign_role("admin", project(1)).await.unwrap();

    // Soft delete keeps rows.
    assert_eq!(user.permissions(&authz).on_deleting(false).await.unwrap(), 0);
    assert_eq!(user.roles(&authz).on_deleting(false).await.unwrap(), 0);
    assert_eq!(store.assignment_count(AssignmentKind::Permission), 1);
    assert_eq!(store.assignment_count(AssignmentKind::Role), 1);

    assert_eq!(user.permissions(&authz).on_deleting(true).await.unwrap(), 1);
    assert_eq!(user.roles(&authz).on_deleting(true).await.unwrap(), 1);
    assert_eq!(store.assignment_count(AssignmentKind::Permission), 0);
    assert_eq!(store.assignment_count(AssignmentKind::Role), 0);
}

#[tokio::test]
async fn test_custom_entity_key_scopes_rows() {
    let config = PermissionConfig {
        entity_key: "project_id".to_string(),
        ..PermissionConfig::default()
    };
    let (store, authz) = setup_with(config);
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);

    let _applied = user.permissions(&authz).give_permission_to("edit", project(1)).await.unwrap();

    let rows = store
        .list_assignments(&SubjectKey::new("user", SubjectId::new(1)), AssignmentKind::Permission, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_for("project_id", project(1)));
    assert!(user.permissions(&authz).has_permission_to("edit", project(1)).await.unwrap());
}

#[tokio::test]
async fn test_wildcard_matching() {
    let config = PermissionConfig {
        enable_wildcard_permission: true,
        ..PermissionConfig::default()
    };
    let (_, authz) = setup_with(config);
    seed(&authz, &["posts.*"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);

    let _applied = permissions.give_permission_to("posts.*", project(1)).await.unwrap();

    // No stored `posts.edit` row is needed.
    assert!(permissions.has_permission_to("posts.edit", project(1)).await.unwrap());
    assert!(!permissions.has_permission_to("posts.edit", project(2)).await.unwrap());
    assert!(!permissions.has_permission_to("comments.edit", project(1)).await.unwrap());

    let err = permissions.has_permission_to("", project(1)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::MalformedWildcard);
}

#[tokio::test]
async fn test_wildcard_skips_malformed_held_permission() {
    let config = PermissionConfig {
        enable_wildcard_permission: true,
        ..PermissionConfig::default()
    };
    let (_, authz) = setup_with(config);
    seed(&authz, &["posts..legacy", "posts.*"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);

    let _applied = permissions
        .give_permission_to(vec!["posts..legacy", "posts.*"], project(1))
        .await
        .unwrap();

    assert!(permissions.has_permission_to("posts.edit", project(1)).await.unwrap());
    assert!(permissions
        .has_any_permission(vec!["comments.view", "posts.edit"], project(1))
        .await
        .unwrap());
    assert!(permissions
        .has_all_permissions(vec!["posts.edit", "posts.view"], project(1))
        .await
        .unwrap());
    assert!(!permissions.has_permission_to("comments.view", project(1)).await.unwrap());
}

#[tokio::test]
async fn test_wildcard_any_check_treats_malformed_request_as_no_match() {
    let config = PermissionConfig {
        enable_wildcard_permission: true,
        ..PermissionConfig::default()
    };
    let (_, authz) = setup_with(config);
    seed(&authz, &["posts.*"]).await;
    let user = User::saved(1);
    let permissions = user.permissions(&authz);
    let _applied = permissions.give_permission_to("posts.*", project(1)).await.unwrap();

    assert!(permissions.has_any_permission(vec!["", "posts.edit"], project(1)).await.unwrap());
    assert!(!permissions
        .has_any_permission(vec!["posts..edit", "comments.view"], project(1))
        .await
        .unwrap());
    assert!(!permissions.check_permission_to("posts..edit", project(1)).await.unwrap());
}

#[tokio::test]
async fn test_model_binding_scopes_resolution() {
    let (_, authz) = setup();
    seed(&authz, &["edit"]).await;
    let resolver = authz.permission_resolver();

    authz.registry().set_permission_model("team_permission");
    assert!(resolver.find_by_name("edit").await.is_err());
    let audit = resolver.create(NewPermission::new("audit")).await.unwrap();
    assert_eq!(resolver.find_by_name("audit").await.unwrap().id, audit.id);
    // Names only need to be unique within a model.
    resolver.create(NewPermission::new("edit")).await.unwrap();

    authz.registry().clear_model_bindings();
    assert!(resolver.find_by_name("audit").await.is_err());
    assert_eq!(resolver.all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_storage_failure_propagates() {
    let (store, authz) = setup();
    seed(&authz, &["edit"]).await;
    let user = User::saved(1);

    store.set_unavailable(true);
    let err = user.permissions(&authz).has_permission_to("edit", project(1)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::StorageError);
}
