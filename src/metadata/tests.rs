//! Tests for the metadata store.

use super::*;
use crate::config::EngineConfig;
use crate::events::MemoryAuditSink;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    layout: StateContext,
    locks: LockManager,
    audit: Arc<MemoryAuditSink>,
    store: MetadataStore,
}

fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let layout = StateContext::resolve_from(temp_dir.path()).unwrap();
    layout.ensure_dirs().unwrap();
    let config = EngineConfig {
        lock_poll_interval_ms: 5,
        ..EngineConfig::default()
    };
    let locks = LockManager::open(&layout, &config);
    let audit = Arc::new(MemoryAuditSink::new());
    let store = MetadataStore::new(&layout, locks.clone(), audit.clone());
    Fixture {
        _temp_dir: temp_dir,
        layout,
        locks,
        audit,
        store,
    }
}

fn values(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn server(id: &str) -> ResourceRef {
    ResourceRef::new("server", id)
}

fn ctx() -> CallContext {
    CallContext::with_timeout(Duration::from_secs(5))
}

#[test]
fn test_key_classes() {
    assert!(is_system_admin_key("_secret"));
    assert!(!is_system_admin_key("color"));
    assert_eq!(sysadmin_key("secret"), "_secret");
    assert!(is_system_admin_key(&sysadmin_key("x")));
    assert!(is_cloud_tag_key("ext:owner"));
    assert!(!is_cloud_tag_key("owner"));
}

#[test]
fn test_normalize_value() {
    assert_eq!(normalize_value(&json!("red")), "red");
    assert_eq!(normalize_value(&json!("None")), "");
    assert_eq!(normalize_value(&json!("NULL")), "");
    assert_eq!(normalize_value(&Value::Null), "");
    assert_eq!(normalize_value(&json!(42)), "42");
    assert_eq!(normalize_value(&json!({"a": 1})), r#"{"a":1}"#);
}

#[test]
fn test_set_all_skips_unchanged_values() {
    let f = fixture();
    let alice = Identity::user("alice");
    let obj = server("s1");

    let changes = f
        .store
        .set_all(&ctx(), &obj, &values(json!({"color": "red"})), &alice)
        .unwrap();
    assert_eq!(
        changes,
        vec![MetadataChange {
            key: "color".to_string(),
            old_value: String::new(),
            new_value: "red".to_string(),
        }]
    );

    let changes = f
        .store
        .set_all(&ctx(), &obj, &values(json!({"color": "red"})), &alice)
        .unwrap();
    assert!(changes.is_empty());

    let events = f.audit.events_with(EventAction::SetMetadata);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].actor, "alice");
    assert_eq!(events[0].target.as_deref(), Some("server::s1"));
    assert_eq!(events[0].details["key"], "color");
    assert_eq!(events[0].details["new_value"], "red");
}

#[test]
fn test_set_all_records_old_value() {
    let f = fixture();
    let alice = Identity::user("alice");
    let obj = server("s1");

    f.store.set_value(&ctx(), &obj, "color", "red", &alice).unwrap();
    let change = f
        .store
        .set_value(&ctx(), &obj, "color", "blue", &alice)
        .unwrap()
        .unwrap();

    assert_eq!(change.old_value, "red");
    assert_eq!(change.new_value, "blue");
    assert_eq!(
        f.store.get_string_value(&obj, "color", &alice).unwrap(),
        Some("blue".to_string())
    );
}

#[test]
fn test_non_admin_cannot_set_system_keys() {
    let f = fixture();
    let alice = Identity::user("alice");
    let obj = server("s1");

    let err = f
        .store
        .set_all(
            &ctx(),
            &obj,
            &values(json!({"color": "red", "_quota": "10"})),
            &alice,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    // Nothing from the rejected call is written.
    assert!(f.store.get_all(&obj, &[], &Identity::admin("root")).unwrap().is_empty());
    assert!(f.audit.events().is_empty());
    assert!(!f.layout.metadata_path("server::s1").exists());
}

#[test]
fn test_empty_key_rejected() {
    let f = fixture();
    let err = f
        .store
        .set_value(&ctx(), &server("s1"), " ", "x", &Identity::admin("root"))
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationError(_)));
}

#[test]
fn test_get_all_hides_system_keys_from_users() {
    let f = fixture();
    let root = Identity::admin("root");
    let alice = Identity::user("alice");
    let obj = server("s1");

    f.store
        .set_all(
            &ctx(),
            &obj,
            &values(json!({"color": "red", "_quota": "10"})),
            &root,
        )
        .unwrap();

    let for_admin = f.store.get_all(&obj, &[], &root).unwrap();
    assert_eq!(for_admin.get("color").map(String::as_str), Some("red"));
    assert_eq!(for_admin.get("quota").map(String::as_str), Some("10"));
    assert!(!for_admin.contains_key("_quota"));

    let for_user = f.store.get_all(&obj, &[], &alice).unwrap();
    assert_eq!(for_user.len(), 1);
    assert_eq!(for_user.get("color").map(String::as_str), Some("red"));

    assert_eq!(f.store.get_string_value(&obj, "_quota", &alice).unwrap(), None);
    assert_eq!(
        f.store.get_string_value(&obj, "_quota", &root).unwrap(),
        Some("10".to_string())
    );
}

#[test]
fn test_get_all_filters_keys() {
    let f = fixture();
    let alice = Identity::user("alice");
    let obj = server("s1");
    f.store
        .set_all(&ctx(), &obj, &values(json!({"a": "1", "b": "2", "c": "3"})), &alice)
        .unwrap();

    let got = f.store.get_all(&obj, &["a", "c", "missing"], &alice).unwrap();
    assert_eq!(got.keys().cloned().collect::<Vec<_>>(), vec!["a", "c"]);
}

#[test]
fn test_null_value_unsets_key() {
    let f = fixture();
    let alice = Identity::user("alice");
    let obj = server("s1");

    f.store.set_value(&ctx(), &obj, "color", "red", &alice).unwrap();
    let change = f
        .store
        .set_value(&ctx(), &obj, "color", "none", &alice)
        .unwrap()
        .unwrap();
    assert_eq!(change.new_value, "");

    assert_eq!(f.store.get_string_value(&obj, "color", &alice).unwrap(), None);
    assert!(f.store.get_all(&obj, &[], &alice).unwrap().is_empty());

    // Unsetting a key that has no value is not a change.
    let change = f
        .store
        .set_all(&ctx(), &obj, &values(json!({"color": null})), &alice)
        .unwrap();
    assert!(change.is_empty());
}

#[test]
fn test_get_json_value() {
    let f = fixture();
    let alice = Identity::user("alice");
    let obj = server("s1");
    f.store
        .set_all(
            &ctx(),
            &obj,
            &values(json!({"spec": {"cpu": 2}, "plain": "not json"})),
            &alice,
        )
        .unwrap();

    assert_eq!(
        f.store.get_json_value(&obj, "spec", &alice).unwrap(),
        Some(json!({"cpu": 2}))
    );
    assert_eq!(f.store.get_json_value(&obj, "plain", &alice).unwrap(), None);
    assert_eq!(f.store.get_json_value(&obj, "missing", &alice).unwrap(), None);
}

#[test]
fn test_remove_all() {
    let f = fixture();
    let root = Identity::admin("root");
    let obj = server("s1");
    f.store
        .set_all(&ctx(), &obj, &values(json!({"a": "1", "_b": "2"})), &root)
        .unwrap();

    let removed = f.store.remove_all(&ctx(), &obj, &root).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|c| c.new_value.is_empty()));
    assert!(f.store.get_all(&obj, &[], &root).unwrap().is_empty());
    assert_eq!(f.audit.events_with(EventAction::DelMetadata).len(), 2);

    // Second pass has nothing left to clear.
    assert!(f.store.remove_all(&ctx(), &obj, &root).unwrap().is_empty());
    assert_eq!(f.audit.events_with(EventAction::DelMetadata).len(), 2);
}

#[test]
fn test_list_filters() {
    let f = fixture();
    let root = Identity::admin("root");
    f.store
        .set_all(
            &ctx(),
            &server("s1"),
            &values(json!({"color": "red", "_quota": "10", "ext:owner": "ops"})),
            &root,
        )
        .unwrap();
    f.store
        .set_value(&ctx(), &ResourceRef::new("disk", "d1"), "size", "20", &root)
        .unwrap();

    let all = f.store.list(&MetadataFilter::default(), &root).unwrap();
    let keys: Vec<_> = all.iter().map(|e| (e.object.keyword.as_str(), e.key.as_str())).collect();
    assert_eq!(keys, vec![("disk", "size"), ("server", "color")]);

    let with_extra = f
        .store
        .list(
            &MetadataFilter {
                with_sys: true,
                with_cloud: true,
                ..MetadataFilter::default()
            },
            &root,
        )
        .unwrap();
    assert_eq!(with_extra.len(), 4);

    let servers = f
        .store
        .list(
            &MetadataFilter {
                resources: vec!["server".to_string()],
                with_cloud: true,
                ..MetadataFilter::default()
            },
            &root,
        )
        .unwrap();
    let keys: Vec<_> = servers.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["color", "ext:owner"]);

    let by_key = f
        .store
        .list(
            &MetadataFilter {
                keys: vec!["size".to_string()],
                ..MetadataFilter::default()
            },
            &root,
        )
        .unwrap();
    assert_eq!(by_key.len(), 1);
    assert_eq!(by_key[0].object, ResourceRef::new("disk", "d1"));
}

#[test]
fn test_list_empty_when_no_directory() {
    let temp_dir = TempDir::new().unwrap();
    let layout = StateContext::resolve_from(temp_dir.path().join("missing")).unwrap();
    let store = MetadataStore::new(
        &layout,
        LockManager::in_memory(),
        Arc::new(MemoryAuditSink::new()),
    );
    assert!(
        store
            .list(&MetadataFilter::default(), &Identity::admin("root"))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_list_scopes_non_admins_to_their_project() {
    let f = fixture();
    let alice = Identity::user("alice").with_project("p1");
    let bob = Identity::user("bob").with_project("p2");
    f.store.set_value(&ctx(), &server("s1"), "color", "red", &alice).unwrap();
    f.store.set_value(&ctx(), &server("s2"), "color", "blue", &bob).unwrap();
    // A later writer from another project does not take ownership.
    f.store.set_value(&ctx(), &server("s1"), "size", "xl", &bob).unwrap();

    let objects = |actor: &Identity| -> Vec<String> {
        f.store
            .list(&MetadataFilter::default(), actor)
            .unwrap()
            .into_iter()
            .map(|e| format!("{}/{}", e.object.id, e.key))
            .collect()
    };

    assert_eq!(objects(&alice), vec!["s1/color", "s1/size"]);
    assert_eq!(objects(&bob), vec!["s2/color"]);
    assert!(objects(&Identity::user("drifter")).is_empty());
    assert_eq!(objects(&Identity::admin("root")).len(), 3);

    let doc: MetadataDocument = read_json(f.layout.metadata_path(&server("s1").resource_key()))
        .unwrap()
        .unwrap();
    assert_eq!(doc.project.as_deref(), Some("p1"));
}

#[test]
fn test_list_rejects_malformed_resource_keyword() {
    let f = fixture();
    let root = Identity::admin("root");
    for keyword in ["", "Server", "disk list"] {
        let err = f
            .store
            .list(
                &MetadataFilter {
                    resources: vec![keyword.to_string()],
                    ..MetadataFilter::default()
                },
                &root,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)), "{:?}", keyword);
    }
}

#[test]
fn test_set_all_times_out_on_held_lock() {
    let f = fixture();
    let obj = server("s1");
    let _held = f.locks.lock_object(&ctx(), &obj).unwrap();

    let short = CallContext::with_timeout(Duration::from_millis(50));
    let err = f
        .store
        .set_value(&short, &obj, "color", "red", &Identity::user("alice"))
        .unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout(_)));
    assert!(!f.layout.metadata_path("server::s1").exists());
}

#[test]
fn test_concurrent_writers_keep_every_key() {
    let f = fixture();
    let obj = server("shared");
    let alice = Identity::user("alice");

    thread::scope(|s| {
        for i in 0..8 {
            let store = &f.store;
            let obj = &obj;
            let alice = &alice;
            s.spawn(move || {
                store
                    .set_value(&ctx(), obj, &format!("k{}", i), "v", alice)
                    .unwrap();
            });
        }
    });

    let all = f.store.get_all(&obj, &[], &alice).unwrap();
    assert_eq!(all.len(), 8);
    assert_eq!(f.audit.events_with(EventAction::SetMetadata).len(), 8);
}
