//! Integration tests for `LockManager` beyond the unit tests embedded in
//! `src/lock/mod.rs`: scope isolation and the recovery helpers crash
//! recovery relies on.

use otterstack::lock::{is_process_alive, read_lock_owner, LockManager};

#[test]
fn locks_in_different_scopes_do_not_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let manager = LockManager::new(dir.path().to_path_buf());

    let project_lock = manager.acquire("project", "demo").unwrap();
    let deployment_lock = manager.acquire("deployment", "demo").unwrap();

    assert!(project_lock.path().exists());
    assert!(deployment_lock.path().exists());
    assert_ne!(project_lock.path(), deployment_lock.path());
}

#[test]
fn lock_path_matches_the_path_acquire_actually_uses() {
    let dir = tempfile::tempdir().unwrap();
    let manager = LockManager::new(dir.path().to_path_buf());

    let predicted = manager.lock_path("deployment", "demo");
    let lock = manager.acquire("deployment", "demo").unwrap();
    assert_eq!(lock.path(), predicted);
}

#[test]
fn read_lock_owner_sees_the_current_process_as_alive() {
    let dir = tempfile::tempdir().unwrap();
    let manager = LockManager::new(dir.path().to_path_buf());
    let lock = manager.acquire("deployment", "demo").unwrap();

    let owner = read_lock_owner(lock.path()).unwrap();
    assert_eq!(owner, Some(std::process::id()));
    assert!(is_process_alive(owner.unwrap()));
}

#[test]
fn read_lock_owner_is_none_for_a_path_with_no_lock_file() {
    let dir = tempfile::tempdir().unwrap();
    let manager = LockManager::new(dir.path().to_path_buf());
    let path = manager.lock_path("deployment", "never-acquired");
    assert_eq!(read_lock_owner(&path).unwrap(), None);
}

#[test]
fn releasing_and_reacquiring_in_the_same_scope_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let manager = LockManager::new(dir.path().to_path_buf());

    let lock = manager.acquire("deployment", "demo").unwrap();
    lock.release().unwrap();

    let reacquired = manager.acquire("deployment", "demo");
    assert!(reacquired.is_ok());
}
