//! Lazy per-device exclusive lock table (C4 in the design notes).
//!
//! A caller must hold the guard returned by [`DeviceLockTable::acquire`] for
//! the entire duration of any TCP interaction with that device — a single
//! request/response or a streaming session that may run for hours.
//! Acquisition is cancellable via a caller-supplied timeout; on timeout the
//! caller gets [`Busy`], not an error, so the Background Poller can treat a
//! long-running stream as a skip rather than a failure.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Busy;

pub struct DeviceLockTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceLockTable {
    pub fn new() -> Self {
        DeviceLockTable {
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, unit_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(unit_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the exclusive lock for `unit_id`, waiting at most `timeout`.
    /// `tokio::sync::Mutex` queues waiters FIFO, so this is fair.
    pub async fn acquire(
        &self,
        unit_id: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, Busy> {
        let lock = self.lock_for(unit_id);
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| Busy)
    }
}

impl Default for DeviceLockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_holder_waits_then_succeeds() {
        let table = Arc::new(DeviceLockTable::new());
        let guard = table.acquire("u1", Duration::from_secs(1)).await.unwrap();

        let table2 = table.clone();
        let handle = tokio::spawn(async move { table2.acquire("u1", Duration::from_secs(1)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        let second = handle.await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn acquire_times_out_as_busy_not_error() {
        let table = DeviceLockTable::new();
        let _guard = table.acquire("u1", Duration::from_secs(1)).await.unwrap();

        let result = table.acquire("u1", Duration::from_millis(50)).await;
        assert_eq!(result.err(), Some(Busy));
    }

    #[tokio::test]
    async fn distinct_units_do_not_contend() {
        let table = DeviceLockTable::new();
        let _g1 = table.acquire("u1", Duration::from_millis(50)).await.unwrap();
        let g2 = table.acquire("u2", Duration::from_millis(50)).await;
        assert!(g2.is_ok());
    }
}
