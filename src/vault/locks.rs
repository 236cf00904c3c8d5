//! Per-vault exclusive sections.
//!
//! Held only around local validate + persist steps, never across a chain
//! or signer call. An entry lives only while someone holds or waits for
//! it, so ids that turn out not to exist leave nothing behind.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core_types::VaultId;

type LockMap = DashMap<VaultId, Arc<Mutex<()>>>;

#[derive(Debug, Default)]
pub struct VaultLocks {
    locks: Arc<LockMap>,
}

impl VaultLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the vault's exclusive section
    pub async fn lock(&self, vault_id: VaultId) -> VaultGuard {
        // Clone the Arc out so the shard lock is released before awaiting
        let mutex = self
            .locks
            .entry(vault_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        VaultGuard {
            vault_id,
            guard: Some(mutex.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive section of one vault; releasing the last holder drops the entry
#[derive(Debug)]
pub struct VaultGuard {
    vault_id: VaultId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for VaultGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the Arc under the shard lock, so a count of one
        // (the map itself) means nobody else wants this vault
        self.locks
            .remove_if(&self.vault_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_vault_is_exclusive() {
        let locks = Arc::new(VaultLocks::new());
        let vault = VaultId::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(vault).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_vaults_do_not_block() {
        let locks = VaultLocks::new();
        let _a = locks.lock(VaultId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(VaultId::new())).await;
        assert!(b.is_ok());
        // `b` released on drop, `_a` still held
        drop(b);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_entry_survives_while_someone_waits() {
        let locks = Arc::new(VaultLocks::new());
        let vault = VaultId::new();
        let first = locks.lock(vault).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(vault).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert!(locks.len() <= 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
