use crate::fingerprint::Fingerprint;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes work on a single fingerprint. Operations on different
/// fingerprints never wait on each other.
#[derive(Debug, Default, Clone)]
pub struct FingerprintLocks {
    table: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one reconciler operation.
#[derive(Debug)]
pub struct FingerprintGuard {
    _guard: OwnedMutexGuard<()>,
}

impl FingerprintLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, fingerprint: &Fingerprint) -> FingerprintGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop entries nobody holds or waits on.
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            table
                .entry(fingerprint.as_str().to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        FingerprintGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of fingerprints currently tracked.
    pub fn tracked(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_fingerprint_is_exclusive() {
        let locks = FingerprintLocks::new();
        let fp = Fingerprint::from_stored("aa");
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let fp = fp.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _g = locks.acquire(&fp).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_fingerprints_do_not_block() {
        let locks = FingerprintLocks::new();
        let _a = locks.acquire(&Fingerprint::from_stored("aa")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&Fingerprint::from_stored("bb")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = FingerprintLocks::new();
        {
            let _g = locks.acquire(&Fingerprint::from_stored("aa")).await;
        }
        let _g = locks.acquire(&Fingerprint::from_stored("bb")).await;
        assert_eq!(locks.tracked(), 1);
    }
}
