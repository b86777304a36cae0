use std::sync::{Arc, Mutex};

use dashmap::DashMap;

/// One mutex per key. Used to serialize read-modify-write sequences on a
/// single account record.
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `key`. Not reentrant: `f` must not
    /// lock the same key again.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        // Clone the Arc out so the shard guard is released before blocking.
        let lock = Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }
}
