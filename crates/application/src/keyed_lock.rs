use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutex per string key; entries are dropped once nobody holds or awaits them.
#[derive(Clone, Default)]
pub struct KeyedLock {
    entries: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

/// Guard holding one key of a [`KeyedLock`].
pub struct KeyedLockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLockGuard {
    /// Returns the held key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }
}

impl KeyedLock {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to the key.
    pub async fn acquire(&self, key: impl Into<String>) -> KeyedLockGuard {
        let key = key.into();
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.retain(|_, entry| Arc::strong_count(entry) > 1);
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        KeyedLockGuard {
            key,
            _guard: entry.lock_owned().await,
        }
    }

    /// Number of keys currently tracked.
    pub async fn tracked_keys(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::KeyedLock;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let lock = KeyedLock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first_guard = lock.acquire("triple").await;
        let second = {
            let lock = lock.clone();
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let _guard = lock.acquire("triple").await;
                order.lock().await.push("second");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("first");
        drop(first_guard);
        let _ = second.await;

        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn different_keys_do_not_block_and_entries_are_pruned() {
        let lock = KeyedLock::new();

        let first = lock.acquire("a").await;
        let second = tokio::time::timeout(Duration::from_millis(100), lock.acquire("b")).await;
        assert!(second.is_ok());
        assert_eq!(first.key(), "a");

        drop(first);
        drop(second);
        let _third = lock.acquire("c").await;
        assert_eq!(lock.tracked_keys().await, 1);
    }
}
