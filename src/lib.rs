// ============================================================================
// taskledger Library
// ============================================================================
//
// Billing and job-lifecycle core of an LLM API gateway:
// - reconciler: polls external platforms for the state of submitted jobs
// - ledger: pay-as-you-go and subscription balances, plan purchases, refunds
// - side_effects: post-commit cache propagation and audit entries
//
// ============================================================================

pub mod adaptor;
pub mod app;
pub mod channel;
pub mod config;
pub mod core;
pub mod ledger;
pub mod reconciler;
pub mod side_effects;
pub mod storage;
pub mod task;
pub mod transaction;
pub mod web;

pub use adaptor::{AdaptorRegistry, SunoAdaptor, TaskAdaptor};
pub use app::{ServiceConfig, Services};
pub use channel::{Channel, ChannelDirectory};
pub use config::{AppConfig, LedgerConfig, ReconcilerConfig, SideEffectConfig};
pub use core::{BalanceDelta, BalanceField, LedgerError, QuotaDisplay, Result, UserBalance};
pub use ledger::{LedgerStore, QuotaLedger};
pub use reconciler::{SweepReport, TaskReconciler};
pub use storage::{MemoryDatabase, SnapshotManager};
pub use task::{Task, TaskStatus, TaskStore};
pub use web::build_router;
