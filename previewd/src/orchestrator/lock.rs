//! Per-key async mutex

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes work per key while letting distinct keys run concurrently
#[derive(Default)]
pub struct KeyedLock {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently held or awaited
    pub async fn held_keys(&self) -> usize {
        let locks = self.locks.lock().await;
        locks.values().filter(|l| Arc::strong_count(l) > 1).count()
    }
}
