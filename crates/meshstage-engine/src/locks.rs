//! # Per-Resource Locks
//!
//! Keyed async mutexes serialising transitions of the same resource within
//! one process. Cross-process exclusion comes from the conditional pointer
//! write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed lock table. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct ResourceLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one resource's transition.
#[derive(Debug)]
pub struct ResourceGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock of `resource_id`.
    pub async fn acquire(&self, resource_id: &str) -> ResourceGuard {
        let slot = {
            let mut table = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody holds or waits on.
            table.retain(|_, slot| Arc::strong_count(slot) > 1);
            table
                .entry(resource_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        ResourceGuard {
            _guard: slot.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_same_resource_is_serialised() {
        let locks = ResourceLocks::new();
        let inside = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("svc-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_resources_do_not_block() {
        let locks = ResourceLocks::new();
        let a = locks.acquire("svc-1").await;
        let b = locks.acquire("svc-2").await;
        assert_eq!(locks.inner.lock().unwrap().len(), 2);

        drop(a);
        drop(b);
        let _c = locks.acquire("svc-3").await;
        assert_eq!(locks.inner.lock().unwrap().len(), 1);
    }
}
