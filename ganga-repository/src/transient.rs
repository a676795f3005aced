use crate::repository::ObjectTable;
use crate::{GangaRepository, RepositoryError, RepositoryResult};
use ganga_schema::{ObjectRef, RegistryHook};
use ganga_types::{ObjectId, SessionName};
use std::sync::Weak;
use tracing::debug;

/// Repository that never touches the disk.
///
/// Ids are handed out sequentially, every lock is granted, and nothing
/// survives the process. Used for scratch registries and in tests.
pub struct TransientRepository {
    name: String,
    table: ObjectTable,
    next_id: u64,
    started: bool,
}

impl TransientRepository {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            table: ObjectTable::default(),
            next_id: 0,
            started: false,
        }
    }

    fn ensure_started(&self) -> RepositoryResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(RepositoryError::NotStarted(self.name.clone()))
        }
    }
}

impl GangaRepository for TransientRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn startup(&mut self, hook: Option<Weak<dyn RegistryHook>>) -> RepositoryResult<()> {
        self.table.set_hook(hook);
        self.started = true;
        debug!(registry = %self.name, "transient repository started");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn update_index(&mut self) -> RepositoryResult<Vec<ObjectId>> {
        self.ensure_started()?;
        Ok(Vec::new())
    }

    fn add(
        &mut self,
        objs: &[ObjectRef],
        force_ids: Option<&[ObjectId]>,
    ) -> RepositoryResult<Vec<ObjectId>> {
        self.ensure_started()?;
        let ids: Vec<ObjectId> = match force_ids {
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
            _ => (0..objs.len() as u64)
                .map(|offset| ObjectId::new(self.next_id + offset))
                .collect(),
        };
        for (obj, &id) in objs.iter().zip(&ids) {
            self.next_id = self.next_id.max(id.get() + 1);
            self.table.insert(id, obj.clone());
        }
        Ok(ids)
    }

    fn flush(&mut self, ids: &[ObjectId]) -> RepositoryResult<()> {
        self.ensure_started()?;
        for &id in ids {
            let obj = self.table.get(id).ok_or(RepositoryError::NotFound(id))?;
            obj.set_flushed();
        }
        Ok(())
    }

    fn load(&mut self, ids: &[ObjectId]) -> RepositoryResult<()> {
        self.ensure_started()?;
        match ids.iter().find(|id| !self.table.contains(**id)) {
            Some(&missing) => Err(RepositoryError::NotFound(missing)),
            None => Ok(()),
        }
    }

    fn delete(&mut self, ids: &[ObjectId]) -> RepositoryResult<()> {
        self.ensure_started()?;
        for &id in ids {
            self.table.remove(id);
        }
        Ok(())
    }

    fn lock(&mut self, ids: &[ObjectId]) -> Vec<ObjectId> {
        if self.started {
            ids.to_vec()
        } else {
            Vec::new()
        }
    }

    fn unlock(&mut self, ids: &[ObjectId]) -> Vec<ObjectId> {
        ids.to_vec()
    }

    fn shutdown(&mut self) -> RepositoryResult<()> {
        self.started = false;
        Ok(())
    }

    fn clean(&mut self) -> RepositoryResult<()> {
        self.table.clear();
        self.next_id = 0;
        Ok(())
    }

    fn get_lock_session(&self, _id: ObjectId) -> Option<SessionName> {
        None
    }

    fn get_other_sessions(&self) -> Vec<SessionName> {
        Vec::new()
    }

    fn reap_locks(&mut self) -> bool {
        true
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
