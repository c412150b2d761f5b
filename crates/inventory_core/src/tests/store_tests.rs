use super::*;
use crate::test_support::{patch, server};
use shared::domain::{ServerStatus, Severity};

#[test]
fn replace_patches_only_touches_the_given_server() {
    let mut store = EntityStore::new();
    store.replace_patches(
        ServerId(1),
        vec![
            patch(10, 1, Severity::Critical, PatchStatus::Pending),
            patch(11, 1, Severity::Low, PatchStatus::Applied),
        ],
    );
    store.replace_patches(
        ServerId(2),
        vec![patch(20, 2, Severity::High, PatchStatus::Pending)],
    );

    store.replace_patches(
        ServerId(1),
        vec![patch(12, 1, Severity::Medium, PatchStatus::Pending)],
    );

    let first: Vec<_> = store.patches_for(ServerId(1)).map(|p| p.id).collect();
    let second: Vec<_> = store.patches_for(ServerId(2)).map(|p| p.id).collect();
    assert_eq!(first, vec![PatchId(12)]);
    assert_eq!(second, vec![PatchId(20)]);
}

#[test]
fn replace_patches_drops_records_owned_by_other_servers() {
    let mut store = EntityStore::new();
    store.replace_patches(
        ServerId(1),
        vec![
            patch(10, 1, Severity::Critical, PatchStatus::Pending),
            patch(99, 7, Severity::Critical, PatchStatus::Pending),
        ],
    );

    assert!(store.patch(PatchId(10)).is_some());
    assert!(store.patch(PatchId(99)).is_none());
}

#[test]
fn patches_may_reference_servers_not_yet_loaded() {
    let mut store = EntityStore::new();
    store.replace_patches(
        ServerId(42),
        vec![patch(1, 42, Severity::High, PatchStatus::Pending)],
    );

    assert!(!store.contains_server(ServerId(42)));
    assert!(store.patches_loaded(ServerId(42)));
    assert_eq!(store.patches_for(ServerId(42)).count(), 1);
}

#[test]
fn unknown_ids_are_silent_no_ops() {
    let mut store = EntityStore::new();
    assert!(!store.set_patch_status(PatchId(5), PatchStatus::Applied));
    assert!(!store.replace_patch(patch(5, 1, Severity::Low, PatchStatus::Applied)));
    assert!(store.patch(PatchId(5)).is_none());
}

#[test]
fn set_patch_status_reports_actual_changes_only() {
    let mut store = EntityStore::new();
    store.replace_patches(
        ServerId(1),
        vec![patch(10, 1, Severity::Critical, PatchStatus::Pending)],
    );

    assert!(store.set_patch_status(PatchId(10), PatchStatus::Applying));
    assert!(!store.set_patch_status(PatchId(10), PatchStatus::Applying));
    assert_eq!(
        store.patch(PatchId(10)).map(|p| p.status),
        Some(PatchStatus::Applying)
    );
}

#[test]
fn failed_refresh_keeps_previous_data() {
    let mut store = EntityStore::new();
    store.replace_servers(vec![server(1, ServerStatus::Online)]);

    store.mark_loading(CollectionKey::Servers);
    store.mark_error(CollectionKey::Servers, "connection refused");

    let state = store.collection(CollectionKey::Servers);
    assert_eq!(state.status, LoadStatus::Error);
    assert_eq!(state.last_error.as_deref(), Some("connection refused"));
    assert!(state.has_loaded());
    assert!(store.contains_server(ServerId(1)));
}

#[test]
fn mark_loading_bumps_generation_and_clears_error() {
    let mut store = EntityStore::new();
    let key = CollectionKey::Patches(ServerId(3));
    let first = store.mark_loading(key);
    store.mark_error(key, "timeout");
    let second = store.mark_loading(key);

    assert!(second > first);
    let state = store.collection(key);
    assert!(state.is_loading());
    assert_eq!(state.last_error, None);
    assert_eq!(store.generation(key), second);
}

#[test]
fn clear_keeps_generations_monotonic() {
    let mut store = EntityStore::new();
    let before = store.mark_loading(CollectionKey::Servers);
    store.replace_servers(vec![server(1, ServerStatus::Online)]);

    store.clear();

    assert_eq!(store.servers().count(), 0);
    assert_eq!(store.collection(CollectionKey::Servers), CollectionState::default());
    let after = store.mark_loading(CollectionKey::Servers);
    assert!(after > before);
}

#[test]
fn latest_generation_spans_every_key() {
    let mut store = EntityStore::new();
    assert_eq!(store.latest_generation(), 0);

    store.mark_loading(CollectionKey::Servers);
    let patches = store.mark_loading(CollectionKey::Patches(ServerId(3)));

    assert_eq!(store.latest_generation(), patches);
    store.clear();
    assert_eq!(store.latest_generation(), patches);
}

#[test]
fn unseen_collections_report_idle() {
    let store = EntityStore::new();
    let state = store.collection(CollectionKey::Patches(ServerId(8)));
    assert_eq!(state.status, LoadStatus::Idle);
    assert!(!state.has_loaded());
}
