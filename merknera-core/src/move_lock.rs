//! Per-move mutual exclusion, so that if the same move ends up in the queue
//! twice only one worker processes it at a time.
//!
//! `acquire` returns an RAII guard whose `Drop` releases the lock, so a
//! release can't be forgotten along an early-return or `?` error path.
//! Entries are refcounted and opportunistically swept on every `acquire`
//! once their count reaches zero; a lock recreated after a premature sweep
//! only races with workers that have not yet re-read the move from the
//! store, which is safe by construction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::MoveId;

struct Entry {
    lock: Arc<Mutex<()>>,
    refcount: usize,
}

/// A process-local mapping from Move id to mutex.
#[derive(Default)]
pub struct MoveLockManager {
    entries: StdMutex<HashMap<MoveId, Entry>>,
}

/// Held while a worker processes one move. Releases on drop.
pub struct MoveLockGuard {
    move_id: MoveId,
    manager: Arc<MoveLockManager>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for MoveLockGuard {
    fn drop(&mut self) {
        self.manager.release(self.move_id);
    }
}

impl MoveLockManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until the lock for `move_id` is held. A second caller for the
    /// same id waits behind the first.
    pub async fn acquire(self: &Arc<Self>, move_id: MoveId) -> MoveLockGuard {
        let lock = {
            let mut entries = self.entries.lock().expect("move lock map poisoned");
            entries.retain(|_, entry| entry.refcount > 0);
            let entry = entries.entry(move_id).or_insert_with(|| Entry {
                lock: Arc::new(Mutex::new(())),
                refcount: 0,
            });
            entry.refcount += 1;
            entry.lock.clone()
        };

        let guard = lock.lock_owned().await;
        MoveLockGuard {
            move_id,
            manager: self.clone(),
            _guard: guard,
        }
    }

    fn release(&self, move_id: MoveId) {
        let mut entries = self.entries.lock().expect("move lock map poisoned");
        if let Some(entry) = entries.get_mut(&move_id) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }
}
