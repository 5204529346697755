// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Ledger transactions use pessimistic row locks and a buffered change log:
// - State Pattern: open, committed, rolled back
// - Command Pattern: changes are buffered, then applied together on commit
// - Row locks: exclusive per-row mutexes held until commit or rollback
//
// ============================================================================

pub mod change;
pub mod locks;
pub mod state;

pub use change::Change;
pub use locks::{RowKey, RowLockGuard, RowLockTable};
pub use state::{Transaction, TransactionId, TransactionState};
