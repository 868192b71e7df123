//! Per-file write locks
//!
//! Stores and re-encryptions of the same file serialize on a lock keyed by the file's
//! location; writes to different files proceed concurrently.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Lock manager keyed by file location (`<node path>#<file id>`).
pub struct FileLockManager {
    locks: RwLock<HashMap<String, Arc<RwLock<()>>>>,
}

impl FileLockManager {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Key identifying one file.
    pub fn key(node_path: &str, file_id: &str) -> String {
        format!("{}#{}", node_path, file_id)
    }

    /// Get or create the lock for `key`.
    pub fn get_lock(&self, key: &str) -> Arc<RwLock<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(key) {
                return lock.clone();
            }
        }

        // Another thread may have inserted it between the two lookups.
        let mut map = self.locks.write();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Run `f` under the write lock of `key`. The entry is dropped afterwards unless
    /// another caller still holds or waits on the lock.
    pub fn with_write<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.get_lock(key);
        let result = {
            let _guard = lock.write();
            f()
        };
        self.release(key, lock);
        result
    }

    fn release(&self, key: &str, lock: Arc<RwLock<()>>) {
        // Clones are only handed out under the map lock, so the count is stable here.
        let mut map = self.locks.write();
        let unused = map
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if unused {
            map.remove(key);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.read().len()
    }
}

impl Default for FileLockManager {
    fn default() -> Self {
        Self::new()
    }
}
