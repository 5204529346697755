//! Wiring of the store, ledger, reconciler and side effect queue.

use crate::adaptor::AdaptorRegistry;
use crate::config::{AppConfig, LedgerConfig, ReconcilerConfig, SideEffectConfig};
use crate::core::Result;
use crate::ledger::QuotaLedger;
use crate::reconciler::{ReconcilerWorker, TaskReconciler, spawn_reconciler_worker};
use crate::side_effects::{
    DEFAULT_BALANCE_CACHE_CAPACITY, LruBalanceCache, MemoryAuditLog, SideEffectSender,
    SideEffectWorker, spawn_side_effect_worker,
};
use crate::storage::MemoryDatabase;
use crate::web::AppState;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub reconciler: ReconcilerConfig,
    pub ledger: LedgerConfig,
    pub side_effects: SideEffectConfig,
    pub balance_cache_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reconciler: ReconcilerConfig::default(),
            ledger: LedgerConfig::default(),
            side_effects: SideEffectConfig::default(),
            balance_cache_capacity: DEFAULT_BALANCE_CACHE_CAPACITY,
        }
    }
}

impl From<&AppConfig> for ServiceConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            reconciler: config.reconciler.clone(),
            ledger: config.ledger.clone(),
            side_effects: config.side_effects.clone(),
            balance_cache_capacity: config.balance_cache_capacity,
        }
    }
}

/// Running components sharing one store.
pub struct Services {
    pub db: MemoryDatabase,
    pub cache: Arc<LruBalanceCache>,
    pub audit: Arc<MemoryAuditLog>,
    pub ledger: Arc<QuotaLedger>,
    pub reconciler: Arc<TaskReconciler>,
    effects: SideEffectSender,
    side_effects: SideEffectWorker,
    reconciler_worker: Option<ReconcilerWorker>,
}

impl Services {
    /// Builds every component and starts the side effect queue. Must run
    /// inside a tokio runtime.
    pub fn start(db: MemoryDatabase, adaptors: AdaptorRegistry, config: ServiceConfig) -> Self {
        let cache = Arc::new(LruBalanceCache::new(config.balance_cache_capacity));
        let audit = Arc::new(MemoryAuditLog::new());
        let (effects, side_effects) =
            spawn_side_effect_worker(&config.side_effects, cache.clone(), audit.clone());

        let ledger = Arc::new(QuotaLedger::new(
            Arc::new(db.clone()),
            cache.clone(),
            effects.clone(),
            config.ledger,
        ));
        let reconciler = Arc::new(TaskReconciler::new(
            Arc::new(db.clone()),
            Arc::new(db.clone()),
            adaptors,
            ledger.clone(),
            config.reconciler,
        ));

        Self {
            db,
            cache,
            audit,
            ledger,
            reconciler,
            effects,
            side_effects,
            reconciler_worker: None,
        }
    }

    /// Starts the periodic reconciler loop; a second call is a no-op.
    pub fn start_reconciler(&mut self) {
        if self.reconciler_worker.is_none() {
            self.reconciler_worker = Some(spawn_reconciler_worker(self.reconciler.clone()));
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.ledger.clone(), Arc::new(self.db.clone()))
    }

    /// Side effects dropped so far because the queue was full or closed.
    pub fn dropped_side_effects(&self) -> u64 {
        self.effects.dropped()
    }

    /// Stops the reconciler (its current sweep finishes), closes the ledger
    /// once in-flight operations are done, then drains the side effect queue.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(worker) = self.reconciler_worker.take() {
            worker.stop().await?;
        }
        self.ledger.close().await;
        self.side_effects.stop().await?;
        info!("services stopped");
        Ok(())
    }
}
