//! The registry: the owner of one repository's root objects.
//!
//! Objects reach back into their registry through [`RegistryHook`]: a read
//! of an unloaded attribute loads the body, the first write takes the
//! object's lock (polling while another session holds it), and every
//! change lands in the dirty set that [`Registry::flush_all`] writes out.

use crate::index::IndexCacheProvider;
use crate::{
    GangaRepository, LocalRepository, RepositoryConfig, RepositoryError, RepositoryResult,
    TransientRepository,
};
use ganga_schema::{ObjectRef, PluginRegistry, RegistryHook, SchemaError, SchemaResult};
use ganga_types::{ObjectId, SessionName};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on how long a write waits for a foreign lock.
const DEFAULT_WRITE_ACCESS_TIMEOUT: Duration = Duration::from_secs(7);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Registry {
    name: String,
    repository: Mutex<Box<dyn GangaRepository>>,
    /// Roots with unflushed changes. Never guarded by the repository mutex:
    /// objects report changes while the repository is working on them.
    dirty: Mutex<BTreeSet<ObjectId>>,
    started: AtomicBool,
    write_access_timeout: Duration,
    poll_interval: Duration,
    me: Weak<Registry>,
}

impl Registry {
    /// Wraps `repository`; call [`Registry::startup`] before use.
    #[must_use]
    pub fn new(
        name: &str,
        repository: Box<dyn GangaRepository>,
        write_access_timeout: Duration,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_string(),
            repository: Mutex::new(repository),
            dirty: Mutex::new(BTreeSet::new()),
            started: AtomicBool::new(false),
            write_access_timeout,
            poll_interval,
            me: me.clone(),
        })
    }

    /// Registry backed by a [`LocalRepository`].
    #[must_use]
    pub fn local(
        config: RepositoryConfig,
        plugins: Arc<PluginRegistry>,
        index: Box<dyn IndexCacheProvider>,
    ) -> Arc<Self> {
        let name = config.name.clone();
        let timeout = config.write_access_timeout;
        let poll = config.lock_poll_interval;
        Self::new(
            &name,
            Box::new(LocalRepository::new(config, plugins, index)),
            timeout,
            poll,
        )
    }

    /// Registry backed by a [`TransientRepository`].
    #[must_use]
    pub fn transient(name: &str) -> Arc<Self> {
        Self::new(
            name,
            Box::new(TransientRepository::new(name)),
            DEFAULT_WRITE_ACCESS_TIMEOUT,
            DEFAULT_POLL_INTERVAL,
        )
    }

    fn repo(&self) -> MutexGuard<'_, Box<dyn GangaRepository>> {
        self.repository.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dirty_set(&self) -> MutexGuard<'_, BTreeSet<ObjectId>> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ================================================================
    // Lifecycle
    // ================================================================

    pub fn startup(&self) -> RepositoryResult<()> {
        let hook: Weak<dyn RegistryHook> = self.me.clone();
        self.repo().startup(Some(hook))?;
        self.started.store(true, Ordering::SeqCst);
        info!(registry = %self.name, "registry started");
        Ok(())
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Flushes every dirty object and closes the repository.
    ///
    /// The repository is shut down even when some flush fails; the first
    /// flush error is returned.
    pub fn shutdown(&self) -> RepositoryResult<()> {
        if !self.is_started() {
            return Ok(());
        }
        // flush needs the registry started, so stop only afterwards
        let flushed = self.flush_all();
        if let Err(e) = &flushed {
            warn!(registry = %self.name, error = %e, "not every object could be flushed at shutdown");
        }
        if !self.started.swap(false, Ordering::SeqCst) {
            return flushed;
        }
        self.repo().shutdown()?;
        info!(registry = %self.name, "registry shut down");
        flushed
    }

    fn ensure_started(&self) -> RepositoryResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(RepositoryError::NotStarted(self.name.clone()))
        }
    }

    // ================================================================
    // Objects
    // ================================================================

    /// Stores a new root object and returns its id.
    pub fn add(&self, obj: &ObjectRef) -> RepositoryResult<ObjectId> {
        self.ensure_started()?;
        let mut repo = self.repo();
        let ids = repo.add(std::slice::from_ref(obj), None)?;
        let id = ids[0];
        repo.flush(&ids)?;
        drop(repo);
        self.dirty_set().remove(&id);
        debug!(registry = %self.name, id = %id, "object added");
        Ok(id)
    }

    /// Stores a new root object under a chosen id.
    pub fn add_with_id(&self, obj: &ObjectRef, id: ObjectId) -> RepositoryResult<()> {
        self.ensure_started()?;
        let mut repo = self.repo();
        if repo.object(id).is_some() || repo.lock(&[id]).is_empty() {
            return Err(RepositoryError::Locked {
                id,
                holder: repo.get_lock_session(id),
            });
        }
        repo.add(std::slice::from_ref(obj), Some(&[id]))?;
        repo.flush(&[id])?;
        drop(repo);
        self.dirty_set().remove(&id);
        Ok(())
    }

    /// The object stored under `id`; its body may not be loaded yet.
    pub fn get(&self, id: ObjectId) -> RepositoryResult<ObjectRef> {
        let repo = self.repo();
        if let Some(obj) = repo.object(id) {
            return Ok(obj);
        }
        if repo.incomplete_ids().contains(&id) {
            Err(RepositoryError::Incomplete(id))
        } else {
            Err(RepositoryError::NotFound(id))
        }
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        self.repo().ids()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.repo().ids().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.repo().object(id).is_some()
    }

    /// Objects that could not be read in this session.
    #[must_use]
    pub fn incomplete_ids(&self) -> Vec<ObjectId> {
        self.repo().incomplete_ids()
    }

    #[must_use]
    pub fn is_loaded(&self, id: ObjectId) -> bool {
        self.repo().is_loaded(id)
    }

    /// Picks up changes made by other sessions.
    pub fn update_index(&self) -> RepositoryResult<Vec<ObjectId>> {
        self.ensure_started()?;
        self.repo().update_index()
    }

    /// Writes the given objects if they are loaded and dirty.
    pub fn flush(&self, ids: &[ObjectId]) -> RepositoryResult<()> {
        self.ensure_started()?;
        let mut repo = self.repo();
        let wanted: Vec<ObjectId> = ids
            .iter()
            .copied()
            .filter(|&id| {
                repo.object(id)
                    .is_some_and(|obj| obj.is_loaded() && obj.is_dirty())
            })
            .collect();
        if wanted.is_empty() {
            return Ok(());
        }
        repo.flush(&wanted)?;
        drop(repo);
        let mut dirty = self.dirty_set();
        for id in &wanted {
            dirty.remove(id);
        }
        Ok(())
    }

    /// Writes every dirty object. Each is attempted; the first error is
    /// returned.
    pub fn flush_all(&self) -> RepositoryResult<()> {
        let pending: Vec<ObjectId> = self.dirty_set().iter().copied().collect();
        let mut first_error = None;
        for id in pending {
            match self.flush(&[id]) {
                Ok(()) => {}
                Err(e) => {
                    warn!(registry = %self.name, id = %id, error = %e, "flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Deletes an object from memory and disk.
    pub fn remove(&self, id: ObjectId) -> RepositoryResult<()> {
        self.ensure_started()?;
        self.acquire(id)?;
        let mut repo = self.repo();
        let deleted = repo.delete(&[id]);
        repo.unlock(&[id]);
        drop(repo);
        self.dirty_set().remove(&id);
        deleted?;
        info!(registry = %self.name, id = %id, "object removed");
        Ok(())
    }

    /// Flushes an object and gives up its write lock.
    pub fn release(&self, id: ObjectId) -> RepositoryResult<()> {
        self.flush(&[id])?;
        self.repo().unlock(&[id]);
        Ok(())
    }

    // ================================================================
    // Sessions
    // ================================================================

    #[must_use]
    pub fn get_lock_session(&self, id: ObjectId) -> Option<SessionName> {
        self.repo().get_lock_session(id)
    }

    #[must_use]
    pub fn other_sessions(&self) -> Vec<SessionName> {
        self.repo().get_other_sessions()
    }

    /// Clears locks left behind by dead sessions.
    pub fn reap_locks(&self) -> bool {
        self.repo().reap_locks()
    }

    /// Takes the lock on `id`, polling until the write-access timeout.
    ///
    /// The repository is not held between attempts, so objects keep
    /// working while another session finishes its write.
    fn acquire(&self, id: ObjectId) -> RepositoryResult<()> {
        let deadline = Instant::now() + self.write_access_timeout;
        loop {
            let mut repo = self.repo();
            if !repo.lock(&[id]).is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RepositoryError::Locked {
                    id,
                    holder: repo.get_lock_session(id),
                });
            }
            drop(repo);
            debug!(registry = %self.name, id = %id, "waiting for lock");
            thread::sleep(self.poll_interval);
        }
    }

    fn load(&self, id: ObjectId) -> RepositoryResult<()> {
        let mut repo = self.repo();
        if repo.is_loaded(id) {
            return Ok(());
        }
        repo.load(&[id])
    }
}

impl RegistryHook for Registry {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_access(&self, root: &ObjectRef) -> SchemaResult<()> {
        let Some(id) = root.registry_id() else {
            return Ok(());
        };
        self.load(id)
            .map_err(|e| SchemaError::RegistryAccess(format!("cannot load #{id}: {e}")))
    }

    fn write_access(&self, root: &ObjectRef) -> SchemaResult<()> {
        let Some(id) = root.registry_id() else {
            return Ok(());
        };
        self.acquire(id)
            .and_then(|()| self.load(id))
            .map_err(|e| SchemaError::RegistryAccess(format!("no write access to #{id}: {e}")))
    }

    fn mark_dirty(&self, root: &ObjectRef) {
        if let Some(id) = root.registry_id() {
            self.dirty_set().insert(id);
        }
    }
}
