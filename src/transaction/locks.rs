// ============================================================================
// Row Locks
// ============================================================================
//
// Pessimistic, exclusive row locks in the spirit of SELECT ... FOR UPDATE.
// A lock is held until the owning transaction commits or rolls back.
// Callers acquire plan rows before user rows, and user rows in ascending id
// order, so lock waits cannot form a cycle.
//
// ============================================================================

use crate::core::{LedgerError, PlanId, Result, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Plan(PlanId),
    User(UserId),
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKey::Plan(id) => write!(f, "subscription_plans#{}", id),
            RowKey::User(id) => write!(f, "users#{}", id),
        }
    }
}

/// Exclusive hold on one row; released on drop.
#[derive(Debug)]
pub struct RowLockGuard {
    key: RowKey,
    _guard: OwnedMutexGuard<()>,
}

impl RowLockGuard {
    pub fn key(&self) -> RowKey {
        self.key
    }
}

#[derive(Default)]
pub struct RowLockTable {
    rows: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
}

impl RowLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `wait` for an exclusive lock on `key`.
    pub async fn acquire(&self, key: RowKey, wait: Duration) -> Result<RowLockGuard> {
        let row = {
            let mut rows = self.rows.lock()?;
            rows.entry(key).or_default().clone()
        };

        let guard = timeout(wait, row.lock_owned()).await.map_err(|_| {
            LedgerError::Persistence(format!(
                "lock wait timeout on {} after {}ms",
                key,
                wait.as_millis()
            ))
        })?;

        Ok(RowLockGuard { key, _guard: guard })
    }

    /// Releases `guards` and forgets lock entries nobody else is waiting on.
    pub fn release(&self, guards: Vec<RowLockGuard>) {
        let keys: Vec<RowKey> = guards.iter().map(RowLockGuard::key).collect();
        drop(guards);

        if let Ok(mut rows) = self.rows.lock() {
            for key in keys {
                let idle = rows
                    .get(&key)
                    .map(|row| Arc::strong_count(row) == 1)
                    .unwrap_or(false);
                if idle {
                    rows.remove(&key);
                }
            }
        }
    }

    /// Number of rows with a live lock entry.
    pub fn tracked_rows(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }
}
