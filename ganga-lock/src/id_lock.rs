use crate::LockResult;
use ganga_types::{ObjectId, SessionName};
use std::collections::BTreeSet;

/// Mutual exclusion over object ids shared by every session on one root.
///
/// Batch operations are best effort: they return the subset that
/// succeeded and leave it to the caller to decide whether that is enough.
pub trait IdLock: Send + Sync {
    /// Name of this session.
    fn session(&self) -> &SessionName;

    /// Reserves `n` fresh ids, already locked by this session.
    fn make_new_ids(&self, n: usize) -> LockResult<Vec<ObjectId>>;

    /// Locks as many of `ids` as possible and returns those now held.
    fn lock_ids(&self, ids: &[ObjectId]) -> Vec<ObjectId>;

    /// Releases `ids` and returns those no longer held.
    fn release_ids(&self, ids: &[ObjectId]) -> Vec<ObjectId>;

    /// Ids currently held by this session.
    fn locked(&self) -> BTreeSet<ObjectId>;

    /// Whether a live session other than this one holds `id`.
    fn is_locked_by_other(&self, id: ObjectId) -> bool;

    /// Session holding `id`, if any.
    fn get_lock_session(&self, id: ObjectId) -> Option<SessionName>;

    /// Other live sessions on the same root.
    fn other_sessions(&self) -> Vec<SessionName>;

    /// Clears every lock not held by a live session. Returns false if some
    /// entry could not be removed.
    fn reap_locks(&self) -> bool;

    /// Moves the shared counter past `id` if it is not already.
    fn ensure_count_above(&self, id: ObjectId) -> LockResult<()>;

    /// Releases every lock and ends the session.
    fn shutdown(&self);
}
