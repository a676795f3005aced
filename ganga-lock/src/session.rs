//! Symlink lock protocol.
//!
//! - Every session owns one empty file `sessions/<host>.<ms>.session`
//!   whose mtime a heartbeat thread refreshes. A session file older than
//!   the timeout belongs to a dead session and may be purged by anyone.
//! - The lock on id `N` is the symlink `locks/N` pointing at the holder's
//!   session file. Creating it is the atomic acquire.
//! - A link whose target is dead may be replaced, but only under the
//!   exclusive dot-lock `locks/.N.lock` and after re-checking that it is
//!   still stale. Every removal or replacement of a foreign link goes
//!   through the dot-lock.
//! - The shared `count` file is guarded by the link `locks/counter`.

use crate::{IdLock, LockConfig, LockError, LockResult};
use ganga_types::{ObjectId, SessionName, SESSION_SUFFIX};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::symlink;
#[cfg(windows)]
use std::os::windows::fs::symlink_file as symlink;

const COUNTER_LOCK: &str = "counter";

/// Attempts at the create/inspect cycle before a single acquire gives up.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Session presence plus symlink locks on a shared directory.
pub struct SessionLockManager {
    shared: Arc<Shared>,
    heartbeat: Mutex<Option<Heartbeat>>,
    shut_down: AtomicBool,
}

struct Heartbeat {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct Shared {
    config: LockConfig,
    session: SessionName,
    session_path: PathBuf,
    locks_dir: PathBuf,
    sessions_dir: PathBuf,
    locked: Mutex<BTreeSet<ObjectId>>,
    last_count: Mutex<u64>,
}

impl SessionLockManager {
    /// Registers a new session under `config.root` and starts its heartbeat.
    pub fn start(config: LockConfig) -> LockResult<Self> {
        let sessions_dir = config.sessions_dir();
        let locks_dir = config.locks_dir();
        for dir in [&sessions_dir, &locks_dir] {
            fs::create_dir_all(dir).map_err(|e| LockError::io(dir, e))?;
        }
        // link targets must mean the same file to every process
        let sessions_dir =
            fs::canonicalize(&sessions_dir).map_err(|e| LockError::io(&sessions_dir, e))?;

        let (session, session_path) = create_session_file(&sessions_dir)?;
        info!(session = %session, root = %config.root.display(), "session started");

        let shared = Arc::new(Shared {
            config,
            session,
            session_path,
            locks_dir,
            sessions_dir,
            locked: Mutex::new(BTreeSet::new()),
            last_count: Mutex::new(0),
        });
        shared.purge_expired_sessions();

        let heartbeat = if shared.config.heartbeat_interval.is_zero() {
            None
        } else {
            Some(spawn_heartbeat(Arc::clone(&shared)))
        };

        Ok(Self {
            shared,
            heartbeat: Mutex::new(heartbeat),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Path of this session's presence file.
    #[must_use]
    pub fn session_path(&self) -> &Path {
        &self.shared.session_path
    }

    /// Refreshes the presence file immediately.
    pub fn touch(&self) {
        self.shared.touch();
    }

    fn ensure_running(&self) -> LockResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(LockError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Runs `f` while holding the counter lock.
    fn with_counter<T>(&self, f: impl FnOnce(&Shared) -> LockResult<T>) -> LockResult<T> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.counter_timeout;
        while !shared.acquire(COUNTER_LOCK) {
            if Instant::now() >= deadline {
                return Err(LockError::CounterTimeout(shared.config.counter_timeout));
            }
            thread::sleep(shared.config.poll_interval);
        }
        let result = f(shared);
        shared.release(COUNTER_LOCK);
        result
    }
}

impl IdLock for SessionLockManager {
    fn session(&self) -> &SessionName {
        &self.shared.session
    }

    fn make_new_ids(&self, n: usize) -> LockResult<Vec<ObjectId>> {
        self.ensure_running()?;
        self.with_counter(|shared| {
            let mut next = shared.read_count()?;
            let held = shared.locked_guard().clone();
            // ids locked by force (imports) must never be handed out again
            if let Some(max) = held.iter().next_back() {
                next = next.max(max.get() + 1);
            }
            let mut ids: Vec<ObjectId> = Vec::with_capacity(n);
            while ids.len() < n {
                let id = ObjectId::new(next);
                next += 1;
                let name = id.to_string();
                let acquired = match shared.try_acquire(&name) {
                    Ok(acquired) => acquired,
                    Err(e) => {
                        for taken in &ids {
                            shared.release(&taken.to_string());
                        }
                        return Err(LockError::io(shared.lock_path(&name), e));
                    }
                };
                if acquired {
                    ids.push(id);
                } else {
                    warn!(%id, "fresh id already locked by another session, skipping");
                }
            }
            shared.write_count(next)?;
            shared.locked_guard().extend(ids.iter().copied());
            debug!(session = %shared.session, ids = ?ids, "reserved new ids");
            Ok(ids)
        })
    }

    fn lock_ids(&self, ids: &[ObjectId]) -> Vec<ObjectId> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Vec::new();
        }
        let shared = &self.shared;
        let acquired: Vec<ObjectId> = ids
            .iter()
            .copied()
            .filter(|id| shared.acquire(&id.to_string()))
            .collect();
        shared.locked_guard().extend(acquired.iter().copied());
        acquired
    }

    fn release_ids(&self, ids: &[ObjectId]) -> Vec<ObjectId> {
        let shared = &self.shared;
        let released: Vec<ObjectId> = ids
            .iter()
            .copied()
            .filter(|id| shared.release(&id.to_string()))
            .collect();
        let mut locked = shared.locked_guard();
        for id in &released {
            locked.remove(id);
        }
        released
    }

    fn locked(&self) -> BTreeSet<ObjectId> {
        self.shared.locked_guard().clone()
    }

    fn is_locked_by_other(&self, id: ObjectId) -> bool {
        let shared = &self.shared;
        match fs::read_link(shared.lock_path(&id.to_string())) {
            Ok(target) => target != shared.session_path && shared.holder_alive(&target),
            Err(_) => false,
        }
    }

    fn get_lock_session(&self, id: ObjectId) -> Option<SessionName> {
        let shared = &self.shared;
        let target = fs::read_link(shared.lock_path(&id.to_string())).ok()?;
        if !shared.holder_alive(&target) {
            return None;
        }
        target.file_name()?.to_str()?.parse().ok()
    }

    fn other_sessions(&self) -> Vec<SessionName> {
        let shared = &self.shared;
        let Ok(entries) = fs::read_dir(&shared.sessions_dir) else {
            return Vec::new();
        };
        let mut sessions: Vec<SessionName> = entries
            .flatten()
            .filter(|e| e.path() != shared.session_path && shared.holder_alive(&e.path()))
            .filter_map(|e| e.file_name().to_str()?.parse().ok())
            .collect();
        sessions.sort();
        sessions
    }

    fn reap_locks(&self) -> bool {
        let shared = &self.shared;
        shared.purge_expired_sessions();
        let entries = match fs::read_dir(&shared.locks_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cannot list lock directory");
                return false;
            }
        };
        let mut ok = true;
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            if target == shared.session_path || shared.holder_alive(&target) {
                continue;
            }
            if shared.with_dot_lock(&name, |link| match fs::read_link(link) {
                Ok(target) if !shared.holder_alive(&target) => fs::remove_file(link).is_ok(),
                _ => true,
            }) == Some(true)
            {
                info!(lock = %name, holder = %target.display(), "reaped stale lock");
            } else {
                ok = false;
            }
        }
        ok
    }

    fn ensure_count_above(&self, id: ObjectId) -> LockResult<()> {
        self.ensure_running()?;
        self.with_counter(|shared| {
            let count = shared.read_count()?;
            if count <= id.get() {
                debug!(count, %id, "moving id counter forward");
                shared.write_count(id.get() + 1)?;
            }
            Ok(())
        })
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let heartbeat = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(heartbeat) = heartbeat {
            let _ = heartbeat.stop.send(());
            if heartbeat.handle.join().is_err() {
                warn!("heartbeat thread panicked");
            }
        }
        let held: Vec<ObjectId> = self.locked().into_iter().collect();
        self.release_ids(&held);
        let shared = &self.shared;
        if let Err(e) = fs::remove_file(&shared.session_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(error = %e, "could not remove session file");
            }
        }
        info!(session = %shared.session, "session closed");
    }
}

impl Drop for SessionLockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn locked_guard(&self) -> std::sync::MutexGuard<'_, BTreeSet<ObjectId>> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.locks_dir.join(name)
    }

    // ================================================================
    // Presence
    // ================================================================

    fn touch(&self) {
        let opened = OpenOptions::new().write(true).open(&self.session_path);
        let result = match opened {
            Ok(file) => file.set_modified(SystemTime::now()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(session = %self.session, "session file vanished, recreating it");
                File::create(&self.session_path).map(drop)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(session = %self.session, error = %e, "heartbeat failed");
        }
    }

    /// Whether `session_file` exists and was touched within the timeout.
    fn holder_alive(&self, session_file: &Path) -> bool {
        if session_file == self.session_path {
            return true;
        }
        match fs::metadata(session_file).and_then(|m| m.modified()) {
            Ok(mtime) => !is_expired(mtime, self.config.session_timeout),
            Err(_) => false,
        }
    }

    fn purge_expired_sessions(&self) {
        let Ok(entries) = fs::read_dir(&self.sessions_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_session = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(SESSION_SUFFIX));
            if !is_session || path == self.session_path || self.holder_alive(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!(session = %path.display(), "purged expired session"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(session = %path.display(), error = %e, "could not purge session"),
            }
        }
    }

    // ================================================================
    // Link locks
    // ================================================================

    /// Takes the lock `name`. Returns true if this session holds it afterwards.
    fn acquire(&self, name: &str) -> bool {
        self.try_acquire(name).unwrap_or_else(|e| {
            warn!(lock = %name, error = %e, "cannot create lock link");
            false
        })
    }

    /// `Ok(false)` means another session holds the lock; anything that is
    /// not contention comes back as an error.
    fn try_acquire(&self, name: &str) -> io::Result<bool> {
        let link = self.lock_path(name);
        for _ in 0..ACQUIRE_ATTEMPTS {
            match symlink(&self.session_path, &link) {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
            match fs::read_link(&link) {
                Ok(target) if target == self.session_path => return Ok(true),
                Ok(target) if self.holder_alive(&target) => return Ok(false),
                Ok(_) => return Ok(self.steal(name)),
                // released between our create and our read, try again
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Replaces a stale lock link under its dot-lock.
    fn steal(&self, name: &str) -> bool {
        let stolen = self.with_dot_lock(name, |link| {
            match fs::read_link(link) {
                Ok(target) if target == self.session_path => return true,
                Ok(target) if self.holder_alive(&target) => return false,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return symlink(&self.session_path, link).is_ok();
                }
                Err(_) => return false,
            }
            let tmp = self
                .locks_dir
                .join(format!(".{name}.{}.tmp", self.session.file_name()));
            let _ = fs::remove_file(&tmp);
            if symlink(&self.session_path, &tmp).is_err() {
                return false;
            }
            if fs::rename(&tmp, link).is_err() {
                let _ = fs::remove_file(&tmp);
                return false;
            }
            true
        });
        let stolen = stolen == Some(true);
        if stolen {
            info!(lock = %name, session = %self.session, "took over stale lock");
        }
        stolen
    }

    /// Runs `f` on the link path while holding `locks/.<name>.lock`.
    /// Returns `None` when the dot-lock is busy.
    fn with_dot_lock<T>(&self, name: &str, f: impl FnOnce(&Path) -> T) -> Option<T> {
        let dot = self.locks_dir.join(format!(".{name}.lock"));
        match OpenOptions::new().write(true).create_new(true).open(&dot) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // a stealer that died mid-way leaves its dot-lock behind
                let abandoned = fs::metadata(&dot)
                    .and_then(|m| m.modified())
                    .is_ok_and(|mtime| is_expired(mtime, self.config.session_timeout));
                if abandoned {
                    debug!(lock = %name, "removing abandoned dot-lock");
                    let _ = fs::remove_file(&dot);
                }
                return None;
            }
            Err(_) => return None,
        }
        let result = f(&self.lock_path(name));
        let _ = fs::remove_file(&dot);
        Some(result)
    }

    /// Removes our own link `name`. True if we no longer hold it.
    fn release(&self, name: &str) -> bool {
        let link = self.lock_path(name);
        match fs::read_link(&link) {
            Ok(target) if target == self.session_path => match fs::remove_file(&link) {
                Ok(()) => true,
                Err(e) => {
                    warn!(lock = %name, error = %e, "could not release lock");
                    false
                }
            },
            // not ours (any more)
            Ok(_) | Err(_) => true,
        }
    }

    // ================================================================
    // Counter
    // ================================================================

    fn read_count(&self) -> LockResult<u64> {
        let path = self.config.count_path();
        let mut last = self.last_count.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = match fs::read_to_string(&path) {
            Ok(text) => match text.trim().parse::<u64>() {
                Ok(count) => count,
                Err(_) => {
                    warn!(path = %path.display(), "corrupt id counter, recovering from the last known value");
                    *last
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(LockError::io(path, e)),
        };
        if stored < *last {
            warn!(stored, last = *last, "id counter went backwards, keeping the higher value");
        }
        *last = stored.max(*last);
        Ok(*last)
    }

    fn write_count(&self, count: u64) -> LockResult<()> {
        let path = self.config.count_path();
        let tmp = self
            .config
            .root
            .join(format!(".count.{}.tmp", self.session.file_name()));
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{count}")?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| LockError::io(&path, e))?;
        *self.last_count.lock().unwrap_or_else(PoisonError::into_inner) = count;
        Ok(())
    }
}

fn spawn_heartbeat(shared: Arc<Shared>) -> Heartbeat {
    let (stop, rx) = mpsc::channel::<()>();
    let interval = shared.config.heartbeat_interval;
    let handle = thread::spawn(move || loop {
        match rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                shared.touch();
                shared.purge_expired_sessions();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    });
    Heartbeat { stop, handle }
}

fn create_session_file(dir: &Path) -> LockResult<(SessionName, PathBuf)> {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let mut name = SessionName::new(host, epoch_millis());
    loop {
        let path = dir.join(name.file_name());
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok((name, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => name = name.bump(),
            Err(e) => return Err(LockError::io(path, e)),
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn is_expired(mtime: SystemTime, timeout: Duration) -> bool {
    SystemTime::now()
        .duration_since(mtime)
        .is_ok_and(|age| age > timeout)
}
