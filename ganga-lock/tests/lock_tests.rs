use ganga_lock::{IdLock, LockConfig, LockError, SessionLockManager};
use ganga_types::ObjectId;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

#[cfg(unix)]
use std::os::unix::fs::symlink;

// ===== FIXTURES =====

fn config(root: &Path) -> LockConfig {
    LockConfig::new(root)
        .with_heartbeat_interval(Duration::from_millis(200))
        .with_poll_interval(Duration::from_millis(5))
}

fn session(root: &Path) -> SessionLockManager {
    SessionLockManager::start(config(root)).unwrap()
}

fn ids(raw: &[u64]) -> Vec<ObjectId> {
    raw.iter().copied().map(ObjectId::new).collect()
}

fn read_count(root: &Path) -> u64 {
    fs::read_to_string(root.join("count"))
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

/// Leaves behind a session file last touched an hour ago, as a crashed
/// process would.
fn dead_session(root: &Path) -> std::path::PathBuf {
    let dir = fs::canonicalize(root.join("sessions")).unwrap();
    let path = dir.join("crashed.1.session");
    let file = File::create(&path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();
    path
}

// ── Sessions ─────────────────────────────────────────────────────

#[test]
fn start_creates_presence_file() {
    let tmp = TempDir::new().unwrap();
    let lock = session(tmp.path());
    assert!(lock.session_path().exists());
    assert!(lock.session_path().starts_with(fs::canonicalize(tmp.path().join("sessions")).unwrap()));
    assert!(tmp.path().join("locks").is_dir());
}

#[test]
fn shutdown_removes_presence_and_locks() {
    let tmp = TempDir::new().unwrap();
    let lock = session(tmp.path());
    let path = lock.session_path().to_path_buf();
    assert_eq!(lock.lock_ids(&ids(&[3, 4])), ids(&[3, 4]));
    lock.shutdown();
    assert!(!path.exists());
    assert!(fs::symlink_metadata(tmp.path().join("locks/3")).is_err());
    assert!(lock.make_new_ids(1).is_err());
    assert!(lock.lock_ids(&ids(&[5])).is_empty());
}

#[test]
fn sessions_see_each_other() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    let b = session(tmp.path());
    assert_ne!(a.session(), b.session());
    assert_eq!(a.other_sessions(), vec![b.session().clone()]);
    assert_eq!(b.other_sessions(), vec![a.session().clone()]);
}

#[test]
fn expired_sessions_are_purged_on_start() {
    let tmp = TempDir::new().unwrap();
    let first = session(tmp.path());
    let stale = dead_session(tmp.path());
    drop(first);
    let _second = session(tmp.path());
    assert!(!stale.exists());
}

#[test]
fn heartbeat_recreates_a_deleted_presence_file() {
    let tmp = TempDir::new().unwrap();
    let lock = session(tmp.path());
    fs::remove_file(lock.session_path()).unwrap();
    lock.touch();
    assert!(lock.session_path().exists());
}

// ── Id locks ─────────────────────────────────────────────────────

#[test]
fn lock_is_exclusive_between_sessions() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    let b = session(tmp.path());

    assert_eq!(a.lock_ids(&ids(&[1, 2])), ids(&[1, 2]));
    assert_eq!(b.lock_ids(&ids(&[2, 3])), ids(&[3]));
    assert!(b.is_locked_by_other(ObjectId::new(1)));
    assert!(!a.is_locked_by_other(ObjectId::new(1)));
    assert_eq!(b.get_lock_session(ObjectId::new(1)), Some(a.session().clone()));
    assert_eq!(b.get_lock_session(ObjectId::new(9)), None);

    assert_eq!(a.release_ids(&ids(&[2])), ids(&[2]));
    assert_eq!(b.lock_ids(&ids(&[2])), ids(&[2]));
    assert_eq!(a.locked().into_iter().collect::<Vec<_>>(), ids(&[1]));
    assert_eq!(b.locked().into_iter().collect::<Vec<_>>(), ids(&[2, 3]));
}

#[test]
fn relocking_own_id_succeeds() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    assert_eq!(a.lock_ids(&ids(&[7])), ids(&[7]));
    assert_eq!(a.lock_ids(&ids(&[7])), ids(&[7]));
    assert_eq!(a.locked().len(), 1);
}

#[test]
fn release_leaves_foreign_locks_alone() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    let b = session(tmp.path());
    a.lock_ids(&ids(&[4]));
    b.release_ids(&ids(&[4]));
    assert!(b.is_locked_by_other(ObjectId::new(4)));
}

#[test]
fn at_most_one_holder_under_contention() {
    let tmp = TempDir::new().unwrap();
    let root = Arc::new(tmp.path().to_path_buf());
    let sessions = 4;
    let rounds = 25;
    let barrier = Arc::new(Barrier::new(sessions));
    let handles: Vec<_> = (0..sessions)
        .map(|_| {
            let root = Arc::clone(&root);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let lock = session(&root);
                let target = ObjectId::new(11);
                let mut wins = 0;
                barrier.wait();
                for _ in 0..rounds {
                    if lock.lock_ids(&[target]) == [target] {
                        // while we hold it the link must point at us
                        let holder = fs::read_link(root.join("locks/11")).unwrap();
                        assert_eq!(holder, lock.session_path());
                        wins += 1;
                        lock.release_ids(&[target]);
                    }
                    thread::yield_now();
                }
                wins
            })
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(total > 0);
}

#[cfg(unix)]
#[test]
fn stale_lock_is_taken_over() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    let dead = dead_session(tmp.path());
    symlink(&dead, tmp.path().join("locks/5")).unwrap();

    assert!(!a.is_locked_by_other(ObjectId::new(5)));
    assert_eq!(a.lock_ids(&ids(&[5])), ids(&[5]));
    assert_eq!(fs::read_link(tmp.path().join("locks/5")).unwrap(), a.session_path());
}

#[cfg(unix)]
#[test]
fn stale_lock_goes_to_exactly_one_racer() {
    let tmp = TempDir::new().unwrap();
    let root = Arc::new(tmp.path().to_path_buf());
    let racers = 4;
    let locks: Vec<_> = (0..racers).map(|_| Arc::new(session(&root))).collect();
    let dead = dead_session(&root);
    symlink(&dead, root.join("locks/8")).unwrap();

    let barrier = Arc::new(Barrier::new(racers));
    let handles: Vec<_> = locks
        .iter()
        .map(|lock| {
            let lock = Arc::clone(lock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                !lock.lock_ids(&ids(&[8])).is_empty()
            })
        })
        .collect();
    let winners: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(winners.iter().filter(|w| **w).count(), 1);

    let holder = fs::read_link(root.join("locks/8")).unwrap();
    let winner = winners.iter().position(|w| *w).unwrap();
    assert_eq!(holder, locks[winner].session_path());
}

#[cfg(unix)]
#[test]
fn reap_clears_only_dead_locks() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    let b = session(tmp.path());
    let dead = dead_session(tmp.path());
    symlink(&dead, tmp.path().join("locks/20")).unwrap();
    b.lock_ids(&ids(&[21]));

    assert!(a.reap_locks());
    assert!(fs::symlink_metadata(tmp.path().join("locks/20")).is_err());
    assert!(a.is_locked_by_other(ObjectId::new(21)));
    assert!(!dead.exists());
}

// ── Counter ──────────────────────────────────────────────────────

#[test]
fn new_ids_are_sequential_and_locked() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    assert_eq!(a.make_new_ids(3).unwrap(), ids(&[0, 1, 2]));
    assert_eq!(a.make_new_ids(1).unwrap(), ids(&[3]));
    assert_eq!(read_count(tmp.path()), 4);
    assert_eq!(a.locked().len(), 4);
    assert!(fs::symlink_metadata(tmp.path().join("locks/counter")).is_err());
}

#[test]
fn new_ids_skip_foreign_locks() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    let b = session(tmp.path());
    b.lock_ids(&ids(&[0]));
    assert_eq!(a.make_new_ids(1).unwrap(), ids(&[1]));
    assert_eq!(read_count(tmp.path()), 2);
}

#[cfg(unix)]
#[test]
fn new_ids_fail_on_a_broken_lock_entry() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    assert_eq!(a.make_new_ids(1).unwrap(), ids(&[0]));
    // not a link, so it can never be acquired or stolen
    fs::create_dir(tmp.path().join("locks/2")).unwrap();

    let err = a.make_new_ids(2).unwrap_err();
    assert!(matches!(err, LockError::Io { .. }));
    assert!(fs::symlink_metadata(tmp.path().join("locks/1")).is_err());
    assert_eq!(read_count(tmp.path()), 1);
    assert_eq!(a.locked().into_iter().collect::<Vec<_>>(), ids(&[0]));
}

#[test]
fn new_ids_never_reuse_forced_ids() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    a.lock_ids(&ids(&[10]));
    assert_eq!(a.make_new_ids(1).unwrap(), ids(&[11]));
}

#[test]
fn counter_only_moves_forward() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    a.ensure_count_above(ObjectId::new(41)).unwrap();
    assert_eq!(read_count(tmp.path()), 42);
    a.ensure_count_above(ObjectId::new(3)).unwrap();
    assert_eq!(read_count(tmp.path()), 42);
}

#[test]
fn corrupt_counter_recovers_from_last_value() {
    let tmp = TempDir::new().unwrap();
    let a = session(tmp.path());
    a.make_new_ids(2).unwrap();
    fs::write(tmp.path().join("count"), "garbage").unwrap();
    assert_eq!(a.make_new_ids(1).unwrap(), ids(&[2]));
    assert_eq!(read_count(tmp.path()), 3);
}

#[test]
fn two_sessions_race_for_new_ids() {
    let tmp = TempDir::new().unwrap();
    let root = Arc::new(tmp.path().to_path_buf());
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let root = Arc::clone(&root);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let lock = session(&root);
                barrier.wait();
                let ids = lock.make_new_ids(1).unwrap();
                // keep the session (and its lock) alive until both are done
                (ids, lock)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let all: HashSet<ObjectId> = results.iter().flat_map(|(ids, _)| ids.clone()).collect();
    assert_eq!(all.len(), 2);
    assert_eq!(read_count(&root), 2);
}
