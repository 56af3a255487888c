use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, ReentrantMutex};

use crate::account::AccountId;

/// Per-account mutual exclusion. Reentrant for the owning thread and
/// acquirable with a bounded wait through `try_lock_for`.
pub type AccountLock = ReentrantMutex<()>;

/// One lock per account identifier ever referenced by a transaction.
///
/// Entries are created lazily and never removed, so the registry grows for
/// the lifetime of the process.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<AccountId, Arc<AccountLock>>>,
}

impl LockRegistry {
    /// Returns the lock for `id`, creating it on first use. Concurrent
    /// callers for the same identifier always get the same lock.
    pub fn get_or_create(&self, id: &str) -> Arc<AccountLock> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(id) {
            return Arc::clone(lock);
        }
        let lock = Arc::new(AccountLock::new(()));
        locks.insert(id.to_owned(), Arc::clone(&lock));
        lock
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
