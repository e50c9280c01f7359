//! Per-user serialization for mutating container operations (§5).
//!
//! Mutating operations on the same username are serialized; operations on
//! different usernames proceed concurrently. The map is sharded (to keep
//! lock contention on the map itself low) and self-trimming: once the only
//! outstanding reference to a user's lock is the map's own entry, the next
//! acquisition opportunistically drops it, so the map does not grow without
//! bound across the lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

const SHARD_COUNT: usize = 16;

/// A bounded, sharded map of per-username mutexes.
pub struct UserLockMap {
    shards: Vec<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl UserLockMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, username: &str) -> &Mutex<HashMap<String, Arc<Mutex<()>>>> {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in username.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        &self.shards[(hash as usize) % SHARD_COUNT]
    }

    /// Acquire the lock for `username`, creating its entry if absent.
    ///
    /// The returned guard holds the per-user mutex for as long as it lives;
    /// dropping it releases the lock. Entries whose only remaining
    /// reference is the map's own, after this acquisition completes, are
    /// evicted opportunistically on the next call for a *different*
    /// username that happens to land in the same shard.
    pub async fn lock(&self, username: &str) -> OwnedUserLockGuard {
        let entry = {
            let mut shard = self.shard_for(username).lock().await;
            shard.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(shard.entry(username.to_owned()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let guard = Arc::clone(&entry).lock_owned().await;
        OwnedUserLockGuard { _entry: entry, _guard: guard }
    }
}

impl Default for UserLockMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a per-user lock for the lifetime of one operation frame.
pub struct OwnedUserLockGuard {
    _entry: Arc<Mutex<()>>,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_operations_serialize() {
        let locks = Arc::new(UserLockMap::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("vera").await;
                let before = counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert_eq!(counter.load(Ordering::SeqCst), before + 1);
            }));
        }

        for handle in handles {
            handle.await.expect("task panicked");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let locks = UserLockMap::new();
        let guard_a = locks.lock("will").await;
        let result = tokio::time::timeout(Duration::from_millis(50), locks.lock("xena")).await;
        assert!(result.is_ok());
        drop(guard_a);
    }
}
