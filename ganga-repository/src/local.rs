//! On-disk repository.
//!
//! Each root object lives in its own directory under a bucket of a
//! thousand ids, next to a small index file (see [`crate::layout`]).
//! Startup reads only the index files, or the master index when it is
//! current; bodies are parsed on first access. Several processes may share
//! one tree: every write is made under the object's session lock, and a
//! reconciliation pass picks up what other sessions added, changed or
//! deleted.

use crate::index::{IndexCacheProvider, IndexRecord, MasterEntry, MasterIndex};
use crate::layout::{backup_path, Layout};
use crate::repository::{ObjectTable, ID_ATTRIBUTE};
use crate::safe_io::{is_numeric, rmrf, safe_save, write_atomic};
use crate::{GangaRepository, RepositoryConfig, RepositoryError, RepositoryResult};
use ganga_lock::{IdLock, SessionLockManager};
use ganga_schema::{IndexCache, ObjectRef, PluginRegistry, RegistryHook, Value};
use ganga_types::{ObjectId, SessionName};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Repository storing one XML record per object on the local filesystem.
pub struct LocalRepository {
    config: RepositoryConfig,
    layout: Layout,
    plugins: Arc<PluginRegistry>,
    index: Box<dyn IndexCacheProvider>,
    table: ObjectTable,
    lock: Option<Arc<dyn IdLock>>,
    /// Modification time of each `.index` file when last read or written.
    index_timestamps: HashMap<ObjectId, SystemTime>,
    /// What each `.index` file is believed to contain.
    index_records: HashMap<ObjectId, IndexRecord>,
    /// Ids whose bodies were read or written by this session.
    fully_loaded: BTreeSet<ObjectId>,
    /// Ids already reported as unreadable.
    known_bad: BTreeSet<ObjectId>,
    printed_explanation: bool,
}

impl LocalRepository {
    #[must_use]
    pub fn new(
        config: RepositoryConfig,
        plugins: Arc<PluginRegistry>,
        index: Box<dyn IndexCacheProvider>,
    ) -> Self {
        let layout = Layout::new(&config.location, &config.name, &config.data_file_name);
        Self {
            config,
            layout,
            plugins,
            index,
            table: ObjectTable::default(),
            lock: None,
            index_timestamps: HashMap::new(),
            index_records: HashMap::new(),
            fully_loaded: BTreeSet::new(),
            known_bad: BTreeSet::new(),
            printed_explanation: false,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn session(&self) -> RepositoryResult<Arc<dyn IdLock>> {
        self.lock
            .clone()
            .ok_or_else(|| RepositoryError::NotStarted(self.config.name.clone()))
    }

    fn holds(&self, id: ObjectId) -> bool {
        self.lock.as_ref().is_some_and(|l| l.locked().contains(&id))
    }

    // ================================================================
    // Index files
    // ================================================================

    /// Every object slot on disk; the flag tells whether it has an index.
    ///
    /// Index files without an object directory are deleted on the way.
    pub fn index_listing(&self) -> RepositoryResult<BTreeMap<ObjectId, bool>> {
        let slots = self
            .layout
            .scan()
            .map_err(|e| RepositoryError::storage(self.layout.root(), e))?;
        for id in slots.orphan_indexes {
            let path = self.layout.index_path(id);
            match rmrf(&path) {
                Ok(()) => warn!(path = %path.display(), "deleted index file without data"),
                Err(e) => debug!(path = %path.display(), error = %e, "could not delete orphaned index"),
            }
        }
        Ok(slots.objects)
    }

    /// Reads the index of `id` if it changed since it was last seen and
    /// creates or refreshes the in-memory placeholder.
    ///
    /// Returns whether anything changed.
    pub fn index_load(&mut self, id: ObjectId) -> RepositoryResult<bool> {
        let path = self.layout.index_path(id);
        let mtime = modified(&path).map_err(|e| RepositoryError::io(id, &path, e))?;
        if self.index_timestamps.get(&id) != Some(&mtime) {
            debug!(id = %id, "index changed on disk");
            let record = IndexRecord::read(&path)?;
            self.apply_record(id, &record)?;
            self.index_timestamps.insert(id, mtime);
            self.index_records.insert(id, record);
            return Ok(true);
        }
        if self.table.contains(id) {
            return Ok(false);
        }
        // current entry from the master index
        match self.index_records.get(&id).cloned() {
            Some(record) => {
                self.apply_record(id, &record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply_record(&mut self, id: ObjectId, record: &IndexRecord) -> RepositoryResult<()> {
        let schema = self
            .plugins
            .find(&record.category, &record.name)
            .map_err(|source| RepositoryError::Plugin { id, source })?;
        let cache = record
            .decode_cache()
            .map_err(|message| RepositoryError::IndexCorrupt {
                path: self.layout.index_path(id),
                message,
            })?;
        let holds = self.holds(id);
        match self.table.get(id) {
            Some(obj) if obj.is_loaded() => {
                // rewritten by another session; reread on next access
                if !holds && !obj.is_dirty() {
                    obj.unload();
                    obj.set_index_cache(Some(cache));
                    self.fully_loaded.remove(&id);
                }
            }
            Some(obj) if obj.schema().same_class(&schema) => obj.set_index_cache(Some(cache)),
            _ => {
                self.table.insert_placeholder(id, schema, &self.plugins, cache);
            }
        }
        Ok(())
    }

    fn compute_cache(&self, id: ObjectId, obj: &ObjectRef) -> IndexCache {
        let mut cache = self.index.index_cache(obj);
        if obj.schema().has_attribute(ID_ATTRIBUTE) {
            cache.insert(
                ID_ATTRIBUTE.to_string(),
                Value::Int(i64::try_from(id.get()).unwrap_or(i64::MAX)),
            );
        }
        cache
    }

    /// Writes the index of a loaded object if it differs from what is on
    /// disk, or unconditionally with `force`. The caller must hold the lock.
    ///
    /// Failures are logged, never raised: the index is only a cache.
    pub fn index_write(&mut self, id: ObjectId, force: bool) -> bool {
        let Some(obj) = self.table.get(id) else {
            return false;
        };
        if !obj.is_loaded() || obj.is_empty_placeholder() {
            return false;
        }
        let record = IndexRecord::new(&obj.category(), &obj.class_name(), &self.compute_cache(id, &obj));
        let path = self.layout.index_path(id);
        if !force && path.exists() && self.index_records.get(&id) == Some(&record) {
            return false;
        }
        let written = record
            .to_json()
            .map_err(io::Error::from)
            .and_then(|bytes| write_atomic(&path, &bytes));
        match written {
            Ok(()) => {
                debug!(id = %id, "index written");
                if let Ok(mtime) = modified(&path) {
                    self.index_timestamps.insert(id, mtime);
                }
                self.index_records.insert(id, record);
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "index saving failed");
                false
            }
        }
    }

    fn forget_index(&mut self, id: ObjectId) {
        let path = self.layout.index_path(id);
        if let Err(e) = rmrf(&path) {
            debug!(path = %path.display(), error = %e, "could not remove index");
        }
        self.index_timestamps.remove(&id);
        self.index_records.remove(&id);
    }

    // ================================================================
    // Master index
    // ================================================================

    fn read_master_index(&mut self) {
        let path = self.layout.master_index_path();
        if !path.is_file() {
            debug!("no master index");
            return;
        }
        match MasterIndex::read(&path) {
            Ok(master) => {
                debug!(entries = master.entries.len(), "reading master index");
                for entry in master.entries {
                    self.index_timestamps.insert(entry.id, entry.timestamp);
                    self.index_records.insert(entry.id, entry.record);
                }
            }
            Err(e) => {
                debug!(error = %e, "master index corrupt, ignoring it");
                self.index_timestamps.clear();
                self.index_records.clear();
            }
        }
    }

    /// Snapshots every current index record into `master.idx`.
    ///
    /// Skipped while the existing file is younger than the configured
    /// interval, unless `force` is set.
    fn write_master_index(&mut self, force: bool) {
        let path = self.layout.master_index_path();
        if !force {
            let age = modified(&path)
                .ok()
                .and_then(|t| SystemTime::now().duration_since(t).ok());
            if age.is_some_and(|age| age < self.config.master_index_interval) {
                return;
            }
        }

        if let Some(lock) = self.lock.clone() {
            let held = lock.locked();
            for id in self.fully_loaded.clone() {
                if held.contains(&id) {
                    self.index_write(id, false);
                } else if !lock.lock_ids(&[id]).is_empty() {
                    self.index_write(id, false);
                    lock.release_ids(&[id]);
                }
            }
        }

        let mut ids: Vec<ObjectId> = self.index_records.keys().copied().collect();
        ids.sort();
        let entries = ids
            .into_iter()
            .filter_map(|id| {
                let seen = *self.index_timestamps.get(&id)?;
                // entries that changed since they were read would mask the change
                let current = modified(&self.layout.index_path(id)).ok()?;
                (current == seen).then(|| MasterEntry {
                    id,
                    timestamp: seen,
                    record: self.index_records[&id].clone(),
                })
            })
            .collect();

        let written = MasterIndex::new(entries)
            .to_json()
            .map_err(io::Error::from)
            .and_then(|bytes| write_atomic(&path, &bytes));
        if let Err(e) = written {
            debug!(error = %e, "could not write master index");
            if let Err(e) = rmrf(&path) {
                debug!(error = %e, "could not remove master index");
            }
        }
    }

    // ================================================================
    // Bodies
    // ================================================================

    fn read_body(&self, id: ObjectId, path: &Path) -> RepositoryResult<ObjectRef> {
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                RepositoryError::NotFound(id)
            } else {
                RepositoryError::io(id, path, e)
            }
        })?;
        let loaded = ganga_streamer::from_str(&self.plugins, &text)
            .map_err(|source| RepositoryError::Record { id, source })?;
        let count = loaded.errors.len();
        match loaded.errors.into_iter().next() {
            Some(first) => {
                error!(id = %id, path = %path.display(), errors = count, "error(s) loading record");
                Err(RepositoryError::Record { id, source: first })
            }
            None => Ok(loaded.object),
        }
    }

    /// Sub-split children stored as `<id>/<n>/data`, in order.
    fn load_children(&self, id: ObjectId) -> RepositoryResult<Vec<Value>> {
        let mut children = Vec::new();
        loop {
            let primary = self.layout.child_data_path(id, children.len());
            let path = if primary.is_file() {
                primary
            } else {
                let backup = backup_path(&primary);
                // an interrupted write leaves only `data.new` behind
                if !backup.is_file() {
                    break;
                }
                backup
            };
            // a missing child must not read as the parent having vanished
            let child = self.read_body(id, &path).map_err(|e| match e {
                RepositoryError::NotFound(_) => {
                    RepositoryError::io(id, &path, io::Error::from(ErrorKind::NotFound))
                }
                other => other,
            })?;
            child.set_flushed();
            children.push(Value::Object(child));
        }
        Ok(children)
    }

    /// Reads the primary record (or the backup) of `id` into memory.
    ///
    /// Returns whether the body came from a backup copy.
    fn load_one(&mut self, id: ObjectId, from_backup: bool) -> RepositoryResult<bool> {
        let primary = self.layout.data_path(id);
        let mut used_backup = from_backup;
        let path = if from_backup {
            backup_path(&primary)
        } else {
            let backup = backup_path(&primary);
            if !primary.is_file() && backup.is_file() {
                warn!(path = %primary.display(), "record missing, recovering from backup, recent changes may have been lost");
                if let Err(e) = fs::copy(&backup, &primary) {
                    warn!(error = %e, "could not restore the backup file");
                }
                used_backup = true;
            }
            primary
        };

        let body = match self.read_body(id, &path) {
            Err(RepositoryError::NotFound(_)) if !from_backup => {
                self.forget(id);
                return Err(RepositoryError::NotFound(id));
            }
            other => other?,
        };
        if let Some(attr) = self.config.sub_split.clone() {
            if body.schema().has_attribute(&attr) {
                let children = self.load_children(id)?;
                if !children.is_empty() {
                    body.set_raw_attribute(&attr, Value::List(children));
                }
            }
        }
        self.install(id, body);
        Ok(used_backup)
    }

    /// Moves a freshly read body into the object handed out for `id`.
    fn install(&mut self, id: ObjectId, body: ObjectRef) {
        let mut class_changed = false;
        let (target, previous_cache) = match self.table.get(id) {
            Some(obj) if obj.schema().same_class(&body.schema()) => {
                let cache = obj.index_cache();
                obj.replace_data(body.data_snapshot().unwrap_or_default());
                (obj, cache)
            }
            // placeholder built from an index naming another class
            Some(obj) if !obj.is_loaded() => {
                class_changed = true;
                let cache = obj.index_cache();
                obj.replace_body(body.schema(), body.data_snapshot().unwrap_or_default());
                (obj, cache)
            }
            _ => {
                self.table.insert(id, body.clone());
                (body, None)
            }
        };
        crate::repository::set_id(&target, id);
        if let Some(old) = previous_cache.filter(|c| class_changed || !c.is_empty()) {
            self.check_index_cache(id, &target, &old, class_changed);
        }
        target.set_index_cache(None);
        self.fully_loaded.insert(id);
    }

    /// Compares the cache the placeholder was built from with the one the
    /// body yields, and rewrites the index file when they disagree.
    fn check_index_cache(&mut self, id: ObjectId, obj: &ObjectRef, old: &IndexCache, class_changed: bool) {
        let new = self.compute_cache(id, obj);
        if !class_changed && &new == old {
            return;
        }
        debug!(id = %id, ?old, ?new, "index cache out of date");
        let Some(lock) = self.lock.clone() else {
            return;
        };
        let held = lock.locked().contains(&id);
        // without the lock another session is most likely rewriting it
        if !held && lock.lock_ids(&[id]).is_empty() {
            return;
        }
        self.index_write(id, true);
        let old_subset = old.iter().all(|(k, v)| new.get(k) == Some(v));
        let new_subset = new.iter().all(|(k, v)| old.get(k) == Some(v));
        if class_changed || (!old_subset && !new_subset) {
            warn!(registry = %self.config.name, id = %id, "incorrect index cache was corrected");
        }
        if !held {
            lock.release_ids(&[id]);
        }
    }

    /// Drops every trace of an object whose record has vanished.
    fn forget(&mut self, id: ObjectId) {
        self.table.remove(id);
        self.forget_index(id);
        self.fully_loaded.remove(&id);
        let dir = self.layout.object_dir(id);
        let empty = fs::read_dir(&dir).is_ok_and(|mut entries| entries.next().is_none());
        if empty && fs::remove_dir(&dir).is_ok() {
            warn!(path = %dir.display(), "no index or data found, removed empty directory");
        }
    }

    fn finish_load(&self, id: ObjectId, from_backup: bool) {
        if let Some(obj) = self.table.get(id) {
            if from_backup {
                obj.set_dirty();
            } else {
                obj.set_flushed();
            }
        }
    }

    /// Non-empty sub-split collection of `obj`: attribute name and children.
    fn split_children(&self, obj: &ObjectRef) -> Option<(String, Vec<ObjectRef>)> {
        let attr = self.config.sub_split.as_deref()?;
        if !obj.schema().has_attribute(attr) {
            return None;
        }
        let children = obj.raw_attribute(attr)?.child_objects();
        (!children.is_empty()).then(|| (attr.to_string(), children))
    }

    fn write_body(&self, id: ObjectId, obj: &ObjectRef) -> RepositoryResult<()> {
        let data = self.layout.data_path(id);
        let record = |obj: &ObjectRef, exclude: &str| {
            ganga_streamer::to_string(obj, exclude)
                .map_err(|source| RepositoryError::Record { id, source })
        };
        let keep = match self.split_children(obj) {
            Some((attr, children)) => {
                for (n, child) in children.iter().enumerate() {
                    let path = self.layout.child_data_path(id, n);
                    if child.is_dirty() || !path.is_file() {
                        let xml = record(child, "")?;
                        safe_save(&path, xml.as_bytes())
                            .map_err(|e| RepositoryError::io(id, &path, e))?;
                        child.set_flushed();
                    }
                }
                let xml = record(obj, &attr)?;
                safe_save(&data, xml.as_bytes()).map_err(|e| RepositoryError::io(id, &data, e))?;
                children.len()
            }
            None => {
                let xml = record(obj, "")?;
                safe_save(&data, xml.as_bytes()).map_err(|e| RepositoryError::io(id, &data, e))?;
                0
            }
        };
        self.remove_stale_children(id, keep)
    }

    /// Deletes child directories numbered `keep` and above.
    fn remove_stale_children(&self, id: ObjectId, keep: usize) -> RepositoryResult<()> {
        let dir = self.layout.object_dir(id);
        for entry in fs::read_dir(&dir).map_err(|e| RepositoryError::io(id, &dir, e))? {
            let entry = entry.map_err(|e| RepositoryError::io(id, &dir, e))?;
            let stale = entry
                .file_name()
                .to_str()
                .filter(|n| is_numeric(n))
                .and_then(|n| n.parse::<usize>().ok())
                .is_some_and(|n| n >= keep);
            if stale {
                let path = entry.path();
                rmrf(&path).map_err(|e| RepositoryError::io(id, &path, e))?;
            }
        }
        Ok(())
    }

    /// Number of consecutive sub-split children stored for `id`.
    #[must_use]
    pub fn count_nodes(&self, id: ObjectId) -> usize {
        let mut n = 0;
        while self.layout.child_data_path(id, n).is_file() {
            n += 1;
        }
        n
    }

    // ================================================================
    // Reconciliation
    // ================================================================

    fn reconcile(&mut self, first_run: bool) -> RepositoryResult<Vec<ObjectId>> {
        let lock = self.session()?;
        debug!(registry = %self.config.name, "updating index");
        let listing = self.index_listing()?;
        if first_run {
            self.read_master_index();
        }

        let ours = lock.locked();
        let mut vanished: BTreeSet<ObjectId> = self.table.ids().into_iter().collect();
        let mut changed = Vec::new();
        let mut failures = Vec::new();

        for (&id, &has_index) in &listing {
            vanished.remove(&id);
            if ours.contains(&id) || self.table.is_incomplete(id) {
                continue;
            }
            if lock.is_locked_by_other(id) {
                debug!(id = %id, "locked by another session, skipping");
                continue;
            }
            if has_index {
                match self.index_load(id) {
                    Ok(true) => {
                        changed.push(id);
                        continue;
                    }
                    Ok(false) => continue,
                    Err(e @ RepositoryError::Plugin { .. }) => {
                        // the body names the same class, do not try it
                        failures.push((id, e));
                        continue;
                    }
                    Err(e) => {
                        debug!(id = %id, error = %e, "failed to load index");
                        self.index_timestamps.remove(&id);
                        self.index_records.remove(&id);
                    }
                }
            }
            if self.table.contains(id) {
                continue;
            }
            match self.load(&[id]) {
                Ok(()) => {
                    changed.push(id);
                    if !lock.lock_ids(&[id]).is_empty() {
                        self.index_write(id, false);
                        lock.release_ids(&[id]);
                    }
                }
                Err(RepositoryError::NotFound(_)) => changed.push(id),
                Err(e) => failures.push((id, e)),
            }
        }

        if let Some(&highest) = listing.keys().next_back() {
            lock.ensure_count_above(highest)?;
        }

        if !vanished.is_empty() {
            for &id in &vanished {
                self.table.remove(id);
                self.forget_index(id);
                self.fully_loaded.remove(&id);
                changed.push(id);
            }
            warn!(registry = %self.config.name, ids = ?vanished, "objects externally deleted");
        }

        self.report_failures(failures);

        if !changed.is_empty() {
            self.write_master_index(false);
        }
        debug!(registry = %self.config.name, changed = changed.len(), "index updated");
        Ok(changed)
    }

    /// Logs one error per failure class and parks the ids as incomplete.
    fn report_failures(&mut self, failures: Vec<(ObjectId, RepositoryError)>) {
        let mut groups: BTreeMap<&'static str, (Vec<ObjectId>, String)> = BTreeMap::new();
        for (id, err) in failures {
            if !self.known_bad.insert(id) {
                continue;
            }
            self.table.mark_incomplete(id);
            groups
                .entry(err.kind())
                .or_insert_with(|| (Vec::new(), err.to_string()))
                .0
                .push(id);
        }
        if groups.is_empty() {
            return;
        }
        for (kind, (ids, first)) in &groups {
            error!(
                registry = %self.config.name,
                count = ids.len(),
                ids = ?ids,
                kind,
                first_error = %first,
                "failed to load objects"
            );
        }
        if !self.printed_explanation {
            error!(
                registry = %self.config.name,
                "incomplete objects are listed by incomplete_ids() and can be removed; removing deletes them from disk"
            );
            self.printed_explanation = true;
        }
    }
}

impl GangaRepository for LocalRepository {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn startup(&mut self, hook: Option<Weak<dyn RegistryHook>>) -> RepositoryResult<()> {
        self.table.set_hook(hook);
        let root = self.layout.root().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| RepositoryError::storage(&root, e))?;
        let lock = SessionLockManager::start(self.config.lock_config())?;
        self.lock = Some(Arc::new(lock));
        self.reconcile(true)?;
        info!(
            registry = %self.config.name,
            root = %root.display(),
            objects = self.table.len(),
            incomplete = self.table.incomplete_ids().len(),
            "repository started"
        );
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.lock.is_some()
    }

    fn update_index(&mut self) -> RepositoryResult<Vec<ObjectId>> {
        self.reconcile(false)
    }

    fn add(
        &mut self,
        objs: &[ObjectRef],
        force_ids: Option<&[ObjectId]>,
    ) -> RepositoryResult<Vec<ObjectId>> {
        let lock = self.session()?;
        let ids = match force_ids {
            Some(forced) if !forced.is_empty() => {
                if forced.len() != objs.len() {
                    return Err(RepositoryError::InvalidArgument(format!(
                        "{} objects but {} forced ids",
                        objs.len(),
                        forced.len()
                    )));
                }
                forced.to_vec()
            }
            _ => lock.make_new_ids(objs.len())?,
        };
        for (obj, &id) in objs.iter().zip(&ids) {
            let dir = self.layout.object_dir(id);
            fs::create_dir_all(&dir).map_err(|e| RepositoryError::io(id, &dir, e))?;
            self.table.insert(id, obj.clone());
            // children are only written when dirty
            if let Some((_, children)) = self.split_children(obj) {
                for child in children {
                    child.set_dirty();
                }
            }
        }
        debug!(registry = %self.config.name, ids = ?ids, "added");
        Ok(ids)
    }

    fn flush(&mut self, ids: &[ObjectId]) -> RepositoryResult<()> {
        let lock = self.session()?;
        for &id in ids {
            let obj = self.table.get(id).ok_or(RepositoryError::NotFound(id))?;
            if obj.is_empty_placeholder() {
                return Err(RepositoryError::EmptyObject(id));
            }
            if !obj.is_loaded() {
                debug!(id = %id, "body not loaded, nothing to flush");
                continue;
            }
            if !lock.locked().contains(&id) && lock.lock_ids(&[id]).is_empty() {
                return Err(RepositoryError::Locked {
                    id,
                    holder: lock.get_lock_session(id),
                });
            }
            debug!(id = %id, "flushing");
            self.write_body(id, &obj)?;
            self.index_write(id, false);
            obj.set_flushed();
            self.fully_loaded.insert(id);
        }
        Ok(())
    }

    fn load(&mut self, ids: &[ObjectId]) -> RepositoryResult<()> {
        self.session()?;
        for &id in ids {
            if self.table.is_incomplete(id) {
                return Err(RepositoryError::Incomplete(id));
            }
            let err = match self.load_one(id, false) {
                Ok(from_backup) => {
                    self.finish_load(id, from_backup);
                    continue;
                }
                Err(e @ RepositoryError::NotFound(_)) => return Err(e),
                Err(e) => e,
            };
            debug!(id = %id, error = %err, "could not load object, trying backup");
            match self.load_one(id, true) {
                Ok(_) => {
                    warn!(registry = %self.config.name, id = %id, "object loaded from backup file, recent changes may be lost");
                    self.finish_load(id, true);
                }
                Err(backup_err) => {
                    error!(
                        registry = %self.config.name,
                        id = %id,
                        error = %err,
                        backup_error = %backup_err,
                        "object could not be loaded, it will not be tried again in this session"
                    );
                    self.table.mark_incomplete(id);
                    self.forget_index(id);
                    return Err(RepositoryError::Inaccessible {
                        id,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, ids: &[ObjectId]) -> RepositoryResult<()> {
        for &id in ids {
            // index first, so nobody trusts an index whose data is going
            self.forget_index(id);
            self.table.remove(id);
            self.fully_loaded.remove(&id);
            self.known_bad.remove(&id);
            let dir = self.layout.object_dir(id);
            rmrf(&dir).map_err(|e| RepositoryError::io(id, &dir, e))?;
            debug!(registry = %self.config.name, id = %id, "deleted");
        }
        Ok(())
    }

    fn lock(&mut self, ids: &[ObjectId]) -> Vec<ObjectId> {
        let Some(lock) = self.lock.clone() else {
            return Vec::new();
        };
        let held = lock.locked();
        let (mut got, wanted): (Vec<ObjectId>, Vec<ObjectId>) =
            ids.iter().partition(|id| held.contains(*id));
        if !wanted.is_empty() {
            got.extend(lock.lock_ids(&wanted));
        }
        got
    }

    fn unlock(&mut self, ids: &[ObjectId]) -> Vec<ObjectId> {
        let Some(lock) = self.lock.clone() else {
            return Vec::new();
        };
        let released = lock.release_ids(ids);
        if released.len() < ids.len() {
            error!(registry = %self.config.name, "the write locks of some objects could not be released");
        }
        released
    }

    fn shutdown(&mut self) -> RepositoryResult<()> {
        let Some(lock) = self.lock.clone() else {
            return Ok(());
        };
        debug!(registry = %self.config.name, "shutting down repository");
        self.write_master_index(true);
        lock.shutdown();
        self.lock = None;
        Ok(())
    }

    fn clean(&mut self) -> RepositoryResult<()> {
        let hook = self.table.hook();
        self.shutdown()?;
        let root = self.layout.root().to_path_buf();
        rmrf(&root).map_err(|e| RepositoryError::storage(&root, e))?;
        let counter = self.config.lock_config().count_path();
        rmrf(&counter).map_err(|e| RepositoryError::storage(&counter, e))?;
        self.table.clear();
        self.index_timestamps.clear();
        self.index_records.clear();
        self.fully_loaded.clear();
        self.known_bad.clear();
        warn!(registry = %self.config.name, "repository cleaned");
        self.startup(hook)
    }

    fn get_lock_session(&self, id: ObjectId) -> Option<SessionName> {
        self.lock.as_ref()?.get_lock_session(id)
    }

    fn get_other_sessions(&self) -> Vec<SessionName> {
        self.lock
            .as_ref()
            .map(|l| l.other_sessions())
            .unwrap_or_default()
    }

    fn reap_locks(&mut self) -> bool {
        self.lock.as_ref().is_some_and(|l| l.reap_locks())
    }

    fn object(&self, id: ObjectId) -> Option<ObjectRef> {
        self.table.get(id)
    }

    fn ids(&self) -> Vec<ObjectId> {
        self.table.ids()
    }

    fn incomplete_ids(&self) -> Vec<ObjectId> {
        self.table.incomplete_ids()
    }
}

fn modified(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}
