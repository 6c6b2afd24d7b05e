//! Per-key write serialization

use crate::storage::types::StorageKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per key
///
/// Writers hold the guard across read-check-reconstruct-store so two
/// updates of the same key never interleave. Readers do not lock.
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<StorageKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &StorageKey) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self.locks.entry(*key).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on
    pub fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::Id160;
    use std::time::Duration;

    fn key(n: u64) -> StorageKey {
        StorageKey::new(Id160::from_u64(n), Id160::ZERO, Id160::ZERO)
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock(&key(1)).await;

        let locks_clone = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = locks_clone.lock(&key(1)).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock(&key(1)).await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock(&key(2)))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = KeyLocks::new();
        let held = locks.lock(&key(1)).await;
        drop(locks.lock(&key(2)).await);

        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);

        locks.prune();
        assert!(locks.is_empty());
    }
}
