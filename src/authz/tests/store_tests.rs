//! Store building, validation and change propagation

mod common;

use anyhow::anyhow;
use common::*;
use simple_authz::{
    AuthorisableItem, AuthorizationProvider, AuthorizationType, AuthzError, ChangeSignal,
    DefaultCodec, EntityKind, MemoryPolicy, Providers, SecurityStore, StorageAuthorization,
    StoreConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn build(policy: &MemoryPolicy) -> simple_authz::Result<SecurityStore<DefaultCodec>> {
    SecurityStore::new(policy.providers(), DefaultCodec::new())
}

// ============================================================================
// CONFIGURATION ERRORS
// ============================================================================

#[test]
fn test_grant_on_unknown_item_fails_build() {
    let policy = task_hierarchy();
    policy.authorizations.grant(allow("user", "Ghost").with_key("grant-1"));

    let err = build(&policy).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(
        err,
        AuthzError::UnknownReference {
            kind: EntityKind::SecurityItem,
            key: "Ghost".to_string(),
            referenced_by: "authorization 'grant-1'".to_string(),
        }
    );
}

#[test]
fn test_grant_to_unknown_grantee_fails_build() {
    let policy = task_hierarchy();
    policy.authorizations.grant(allow("nobody", "Task1"));

    match build(&policy) {
        Err(AuthzError::UnknownReference { kind, key, .. }) => {
            assert_eq!(kind, EntityKind::AuthorisableItem);
            assert_eq!(key, "nobody");
        }
        other => panic!("expected unknown grantee, got {:?}", other),
    }
}

#[test]
fn test_unknown_member_builds_unless_validated() {
    let policy = task_hierarchy();
    policy.grantees.add_group("Staff", ["user", "ghost"]);

    let store = build(&policy).unwrap();
    let staff = store.snapshot().grantee(&"Staff".into()).cloned().unwrap();
    assert_eq!(staff.members.len(), 2);

    let strict = StoreConfig {
        validate_memberships: true,
        ..StoreConfig::default()
    };
    let err = SecurityStore::with_config(policy.providers(), DefaultCodec::new(), strict)
        .unwrap_err();
    assert!(matches!(
        err,
        AuthzError::UnknownReference { kind: EntityKind::SecurityIdentity, ref key, .. } if key == "ghost"
    ));
}

#[test]
fn test_unknown_delegator_builds_unless_validated() {
    let policy = task_hierarchy();
    policy
        .authorizations
        .grant(allow("user", "Task1").delegated_by("ghost"));

    let store = build(&policy).unwrap();
    let snapshot = store.snapshot();
    let grant = snapshot.authorizations().next().unwrap();
    assert_eq!(grant.delegated_by().map(|k| k.as_str()), Some("ghost"));

    let strict = StoreConfig {
        validate_delegations: true,
        ..StoreConfig::default()
    };
    assert!(SecurityStore::with_config(policy.providers(), DefaultCodec::new(), strict).is_err());
}

#[test]
fn test_group_with_external_members_grants_them_access() {
    let policy = task_hierarchy();
    policy.grantees.add_group("Contractors", ["ext-1"]);
    policy.authorizations.grant(allow("Contractors", "Task2"));

    let engine = build(&policy).unwrap().engine();
    assert!(engine.check_access(&"ext-1".into(), &"Operation2_1".into()).unwrap());
    assert!(!engine.check_access(&"ext-1".into(), &"Operation1_1".into()).unwrap());
}

#[test]
fn test_duplicate_grantee_across_providers_fails_build() {
    let first = task_hierarchy();
    let second = MemoryPolicy::new();
    second.grantees.add(AuthorisableItem::user("user"));

    let providers = first.providers().with_grantees(second.grantees.clone());
    let err = SecurityStore::new(providers, DefaultCodec::new()).unwrap_err();
    assert_eq!(
        err,
        AuthzError::DuplicateKey {
            kind: EntityKind::AuthorisableItem,
            key: "user".to_string(),
        }
    );
}

#[test]
fn test_items_from_several_providers_merge() {
    let first = task_hierarchy();
    let second = MemoryPolicy::new();
    second.items.add_edge("Operation1_3", "Task1");

    let providers = first.providers().with_items(second.items.clone());
    let store = SecurityStore::new(providers, DefaultCodec::new()).unwrap();
    let snapshot = store.snapshot();

    assert_eq!(snapshot.items().filter(|item| item.key().as_str() == "Task1").count(), 1);
    let task = snapshot.item(&"Task1".into()).unwrap();
    assert_eq!(task.children().count(), 3);
}

// ============================================================================
// CYCLES
// ============================================================================

#[test]
fn test_cyclic_hierarchy_fails_build() {
    let policy = task_hierarchy();
    policy.items.add_edge("Role", "Operation1_1");

    match build(&policy) {
        Err(AuthzError::CircularHierarchy { path }) => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"Role".to_string()));
        }
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_cycle_introduced_later_keeps_previous_snapshot() {
    let policy = task_hierarchy();
    policy.authorizations.grant(allow("user", "Task1"));
    let store = build(&policy).unwrap();
    let engine = store.engine();
    assert!(engine.check_access(&"user".into(), &"Task1".into()).unwrap());

    policy.items.add_edge("Role", "Operation1_1");

    assert_eq!(store.generation(), 1);
    assert!(engine.check_access(&"user".into(), &"Task1".into()).unwrap());
    assert!(matches!(
        store.rebuild(),
        Err(AuthzError::CircularHierarchy { .. })
    ));
}

// ============================================================================
// LOOKUPS
// ============================================================================

#[test]
fn test_lookups_return_none_for_missing_keys() {
    let policy = task_hierarchy();
    let key = policy.authorizations.grant(allow("user", "Task1"));
    let store = build(&policy).unwrap();
    let snapshot = store.snapshot();

    assert!(snapshot.item(&"Task1".into()).is_some());
    assert!(snapshot.item(&"Nope".into()).is_none());
    assert!(snapshot.identity(&"user".into()).is_some());
    assert!(snapshot.identity(&"nope".into()).is_none());
    assert!(snapshot.grantee(&"user".into()).is_some());
    assert!(snapshot.grantee(&"nope".into()).is_none());
    assert!(snapshot.authorization(&key).is_some());
    assert!(snapshot.authorization(&"nope".into()).is_none());

    assert_eq!(snapshot.items().count(), 7);
    assert_eq!(snapshot.identities().count(), 2);
    assert_eq!(snapshot.grantees().count(), 2);
    assert_eq!(snapshot.authorizations().count(), 1);
}

#[test]
fn test_undecodable_payload_is_kept_and_flagged() {
    let policy = task_hierarchy();
    let key = policy
        .authorizations
        .grant(allow("user", "Task1").with_condition(b"{broken".to_vec()));
    let store = build(&policy).unwrap();

    let snapshot = store.snapshot();
    let grant = snapshot.authorization(&key).unwrap();
    assert!(!grant.is_decoded());
    assert!(grant.payload_error().unwrap().starts_with("condition"));
    assert_eq!(grant.kind(), AuthorizationType::Allow);
}

// ============================================================================
// CHANGE PROPAGATION
// ============================================================================

#[test]
fn test_changed_fires_once_per_provider_change() {
    let policy = task_hierarchy();
    let store = build(&policy).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    store.changed().subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    policy.authorizations.grant(allow("user", "Task1"));
    policy.identities.add("newcomer");
    policy.identities.add("newcomer");

    assert_eq!(fired.load(Ordering::SeqCst), 2);
    assert_eq!(store.generation(), 3);
}

#[test]
fn test_failed_rebuild_does_not_signal() {
    let policy = task_hierarchy();
    let store = build(&policy).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    store.changed().subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    policy.authorizations.grant(allow("user", "Ghost"));

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(store.generation(), 1);
}

#[test]
fn test_explicit_rebuild_bumps_generation() {
    let policy = task_hierarchy();
    let store = build(&policy).unwrap();

    assert_eq!(store.rebuild().unwrap(), 2);
    assert_eq!(store.snapshot().generation(), 2);
}

// ============================================================================
// CUSTOM PROVIDERS
// ============================================================================

struct FailingAuthorizations {
    fail: std::sync::atomic::AtomicBool,
    changed: ChangeSignal,
}

impl AuthorizationProvider for FailingAuthorizations {
    fn provide(&self) -> simple_authz::Result<Vec<StorageAuthorization>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable").into());
        }
        Ok(vec![StorageAuthorization::allow("user", "Task1")])
    }

    fn changed(&self) -> &ChangeSignal {
        &self.changed
    }
}

#[test]
fn test_provider_failure_surfaces_as_provider_error() {
    let policy = task_hierarchy();
    let backend = Arc::new(FailingAuthorizations {
        fail: std::sync::atomic::AtomicBool::new(false),
        changed: ChangeSignal::new(),
    });
    let providers: Providers = MemoryPolicy {
        authorizations: Default::default(),
        ..policy.clone()
    }
    .providers()
    .with_authorizations(backend.clone());

    let store = SecurityStore::new(providers, DefaultCodec::new()).unwrap();
    assert_eq!(store.snapshot().authorizations().count(), 1);

    backend.fail.store(true, Ordering::SeqCst);
    backend.changed.notify();
    assert_eq!(store.generation(), 1);

    let err = store.rebuild().unwrap_err();
    assert!(matches!(err, AuthzError::Provider(ref msg) if msg.contains("backend unavailable")));
    assert!(!err.is_configuration());
}
