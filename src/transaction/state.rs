// ============================================================================
// Ledger Transaction State
// ============================================================================
//
// State Pattern over a ledger transaction: Open -> Committed | RolledBack.
// The transaction owns the row locks it acquired and the changes it buffered;
// both go back to the store when it reaches a terminal state.
//
// ============================================================================

use super::Change;
use super::locks::{RowKey, RowLockGuard};
use crate::core::{LedgerError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static TXN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique ledger transaction id, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(TXN_SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ltx-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_open(&self) -> bool {
        *self == TransactionState::Open
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    locks: Vec<RowLockGuard>,
    /// Buffered writes, applied in order on commit.
    changes: Vec<Change>,
    opened_at: Instant,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new(TransactionId::new())
    }
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Open,
            locks: Vec::new(),
            changes: Vec::new(),
            opened_at: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn holds(&self, key: RowKey) -> bool {
        self.locks.iter().any(|guard| guard.key() == key)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.state.is_open() {
            return Ok(());
        }
        Err(LedgerError::State(format!(
            "transaction {} is already {}",
            self.id, self.state
        )))
    }

    /// Writes are only allowed on rows this transaction has locked.
    pub fn ensure_holds(&self, key: RowKey) -> Result<()> {
        if self.holds(key) {
            return Ok(());
        }
        Err(LedgerError::State(format!(
            "transaction {} must lock {} before writing it",
            self.id, key
        )))
    }

    pub fn hold(&mut self, guard: RowLockGuard) -> Result<()> {
        self.ensure_open()?;
        self.locks.push(guard);
        Ok(())
    }

    pub fn record_change(&mut self, change: Change) -> Result<()> {
        self.ensure_open()?;
        self.changes.push(change);
        Ok(())
    }

    /// Moves to `Committed` and hands over the buffered changes.
    pub fn commit(&mut self) -> Result<Vec<Change>> {
        self.ensure_open()?;
        self.state = TransactionState::Committed;
        Ok(std::mem::take(&mut self.changes))
    }

    /// Moves to `RolledBack`, discarding the buffered changes.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TransactionState::RolledBack;
        self.changes.clear();
        Ok(())
    }

    /// Hands the row locks back so the lock table can release them.
    pub fn take_locks(&mut self) -> Vec<RowLockGuard> {
        std::mem::take(&mut self.locks)
    }
}
