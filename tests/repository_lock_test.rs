//! Lock contention between independent processes sharing a repository.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeProcessIdentity, ManualClock};
use steward::domain::errors::LockError;
use steward::domain::models::{lock_file_path, RepositoryOperation};
use steward::services::RepositoryLock;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(1);

/// Two lock services with distinct pids that can see each other as alive.
fn two_processes(clock: Arc<ManualClock>) -> (Arc<FakeProcessIdentity>, RepositoryLock, Arc<FakeProcessIdentity>, RepositoryLock) {
    let first_id = FakeProcessIdentity::new(1001);
    let second_id = FakeProcessIdentity::new(2002);
    first_id.mark_alive(2002);
    second_id.mark_alive(1001);

    let first = RepositoryLock::new(first_id.clone(), clock.clone());
    let second = RepositoryLock::new(second_id.clone(), clock);
    (first_id, first, second_id, second)
}

#[tokio::test]
async fn test_live_holder_blocks_other_process() {
    let repo = TempDir::new().unwrap();
    let (_, first, _, second) = two_processes(ManualClock::monday(3, 0));

    first
        .acquire(repo.path(), RepositoryOperation::Backup, TIMEOUT)
        .await
        .unwrap();

    match second.acquire(repo.path(), RepositoryOperation::Prune, TIMEOUT).await {
        Err(LockError::AlreadyLocked(holder)) => {
            assert_eq!(holder.pid, 1001);
            assert_eq!(holder.operation, RepositoryOperation::Backup);
        }
        other => panic!("expected AlreadyLocked, got {other:?}"),
    }
    assert_eq!(second.metrics().snapshot().get(RepositoryOperation::Prune).contentions, 1);
}

#[tokio::test]
async fn test_crashed_holder_is_taken_over() {
    let repo = TempDir::new().unwrap();
    let (_, first, second_id, second) = two_processes(ManualClock::monday(3, 0));

    first
        .acquire(repo.path(), RepositoryOperation::Backup, TIMEOUT)
        .await
        .unwrap();
    second_id.mark_dead(1001);

    let info = second
        .acquire(repo.path(), RepositoryOperation::Check, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(info.pid, 2002);
    let on_disk = second.check_lock_status(repo.path()).await.unwrap().unwrap();
    assert_eq!(on_disk, info);
    assert_eq!(
        second.metrics().snapshot().get(RepositoryOperation::Check).stale_locks_broken,
        1
    );

    // The original holder can no longer release what it lost.
    assert!(first.release(repo.path(), RepositoryOperation::Backup).await.is_err());
    assert!(lock_file_path(repo.path()).exists());
}

#[tokio::test]
async fn test_old_lock_expires_even_with_live_holder() {
    let repo = TempDir::new().unwrap();
    let clock = ManualClock::monday(3, 0);
    let (_, first, _, second) = two_processes(clock.clone());

    first
        .acquire(repo.path(), RepositoryOperation::Prune, TIMEOUT)
        .await
        .unwrap();

    clock.advance(chrono::Duration::minutes(59));
    assert!(second.break_stale_lock(repo.path()).await.is_err());

    clock.advance(chrono::Duration::minutes(2));
    let broken = second.break_stale_lock(repo.path()).await.unwrap();
    assert_eq!(broken.map(|info| info.pid), Some(1001));
    assert!(second.check_lock_status(repo.path()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_guard_hands_over_between_processes() {
    let repo = TempDir::new().unwrap();
    let (_, first, _, second) = two_processes(ManualClock::monday(3, 0));
    let first = Arc::new(first);

    let guard = first
        .acquire_guard(repo.path(), RepositoryOperation::Maintenance, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(guard.info().operation, RepositoryOperation::Maintenance);
    assert!(second
        .acquire(repo.path(), RepositoryOperation::Backup, TIMEOUT)
        .await
        .is_err());

    guard.release().await.unwrap();

    second
        .acquire(repo.path(), RepositoryOperation::Backup, TIMEOUT)
        .await
        .unwrap();
    second
        .release(repo.path(), RepositoryOperation::Backup)
        .await
        .unwrap();
    assert!(!lock_file_path(repo.path()).exists());
}

#[tokio::test]
async fn test_many_contenders_one_winner() {
    let repo = TempDir::new().unwrap();
    let clock = ManualClock::monday(3, 0);

    let pids: Vec<u32> = (1..=8).map(|n| 5000 + n).collect();
    let mut handles = Vec::new();
    for &pid in &pids {
        let identity = FakeProcessIdentity::new(pid);
        for &other in &pids {
            identity.mark_alive(other);
        }
        let lock = RepositoryLock::new(identity, clock.clone());
        let path = repo.path().to_path_buf();
        handles.push(tokio::spawn(async move {
            lock.acquire(&path, RepositoryOperation::Backup, TIMEOUT).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(LockError::AlreadyLocked(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_contenders_over_one_stale_lock() {
    let clock = ManualClock::monday(3, 0);
    let pids: Vec<u32> = (1..=8).map(|n| 6000 + n).collect();

    for _ in 0..50 {
        let repo = TempDir::new().unwrap();
        let crashed = RepositoryLock::new(FakeProcessIdentity::new(4242), clock.clone());
        crashed
            .acquire(repo.path(), RepositoryOperation::Backup, TIMEOUT)
            .await
            .unwrap();

        let start = Arc::new(tokio::sync::Barrier::new(pids.len()));
        let mut handles = Vec::new();
        for &pid in &pids {
            let identity = FakeProcessIdentity::new(pid);
            for &other in &pids {
                identity.mark_alive(other);
            }
            let lock = RepositoryLock::new(identity, clock.clone()).with_retry_interval(Duration::from_millis(5));
            let path = repo.path().to_path_buf();
            let start = Arc::clone(&start);
            handles.push(tokio::spawn(async move {
                start.wait().await;
                lock.acquire(&path, RepositoryOperation::Prune, TIMEOUT).await
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(info) => winners.push(info),
                Err(LockError::AlreadyLocked(holder)) => assert_ne!(holder.pid, 4242),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners.len(), 1, "exactly one contender may take over a stale lock");

        let on_disk = crashed.check_lock_status(repo.path()).await.unwrap();
        assert_eq!(on_disk.as_ref(), winners.first());

        let leftovers: Vec<_> = std::fs::read_dir(repo.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, [std::ffi::OsString::from(".lock")]);
    }
}
