//! Tests for the manager lock.

use super::*;
use chrono::{Duration, Utc};
use tempfile::TempDir;

#[test]
fn test_lock_metadata_creation() {
    let meta = LockMetadata::new("container-create");

    assert!(meta.owner.contains('@'));
    assert_eq!(meta.pid, Some(std::process::id()));
    assert_eq!(meta.action, "container-create");
    assert!(!meta.is_stale(60));
}

#[test]
fn test_lock_metadata_staleness() {
    let mut meta = LockMetadata::new("clone");
    meta.created_at = Utc::now() - Duration::seconds(120);

    assert!(meta.is_stale(60));
    assert!(!meta.is_stale(600));
    assert!(meta.age_string().starts_with("2m "));
}

#[test]
fn test_acquire_and_drop_releases() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lxc").join(".manager.lock");

    {
        let guard = acquire_lock(&path, "destroy").unwrap();
        assert!(guard.path().exists());
        assert!(lock_state(&path, 600).is_locked());
    }

    assert!(!path.exists());
    assert!(matches!(lock_state(&path, 600), LockState::Unlocked));
}

#[test]
fn test_second_acquire_fails_with_holder_info() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".manager.lock");

    let _guard = acquire_lock(&path, "clone").unwrap();
    let err = acquire_lock(&path, "destroy").unwrap_err();

    assert_eq!(err.exit_code(), crate::exit_codes::LOCK_FAILURE);
    let message = err.to_string();
    assert!(message.contains("held by another process"));
    assert!(message.contains("clone"));
}

#[test]
fn test_explicit_release() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".manager.lock");

    let guard = acquire_lock(&path, "start").unwrap();
    assert_eq!(guard.metadata().action, "start");
    assert!(guard.is_owned());
    assert!(guard.release().unwrap());
    assert!(!path.exists());
}

#[test]
fn test_guard_leaves_lock_taken_over_by_another_holder() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".manager.lock");

    let guard = acquire_lock(&path, "clone").unwrap();
    // Operator force-clears, then another holder takes the lock.
    assert!(clear_lock(&path).unwrap());
    let mut other = LockMetadata::new("destroy");
    other.pid = Some(std::process::id().wrapping_add(1));
    std::fs::write(&path, other.to_json().unwrap()).unwrap();

    assert!(!guard.is_owned());
    drop(guard);

    assert!(path.exists());
    let LockState::Held(Some(holder)) = lock_state(&path, 600) else {
        panic!("expected the other holder's lock to survive");
    };
    assert_eq!(holder.action, "destroy");
}

#[test]
fn test_release_after_clear_reports_nothing_removed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".manager.lock");

    let guard = acquire_lock(&path, "freeze").unwrap();
    clear_lock(&path).unwrap();
    assert!(!guard.release().unwrap());
}

#[test]
fn test_stale_lock_is_not_locked() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".manager.lock");

    let mut meta = LockMetadata::new("freeze");
    meta.created_at = Utc::now() - Duration::seconds(3600);
    std::fs::write(&path, meta.to_json().unwrap()).unwrap();

    let state = lock_state(&path, 600);
    assert!(matches!(state, LockState::Stale(_)));
    assert!(!state.is_locked());
}

#[test]
fn test_unparseable_lock_counts_as_held() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".manager.lock");
    std::fs::write(&path, "").unwrap();

    assert!(matches!(lock_state(&path, 600), LockState::Held(None)));
}

#[test]
fn test_clear_lock() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".manager.lock");
    std::fs::write(&path, "{}").unwrap();

    assert!(clear_lock(&path).unwrap());
    assert!(!clear_lock(&path).unwrap());
}
