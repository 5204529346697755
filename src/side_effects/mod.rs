// ============================================================================
// Post-commit Side Effects
// ============================================================================
//
// Cache deltas and audit entries are produced after a ledger commit and run
// detached from the caller:
// - SideEffectSender: cloneable, non-blocking producer over a bounded queue
// - SideEffectWorker: one dispatcher task, concurrency bounded by a semaphore
// - Shutdown closes the queue and drains what was already accepted
//
// ============================================================================

pub mod audit;
pub mod cache;

pub use audit::{AuditEntry, AuditKind, AuditLog, MemoryAuditLog};
pub use cache::{BalanceCache, DEFAULT_BALANCE_CACHE_CAPACITY, LruBalanceCache};

use crate::config::SideEffectConfig;
use crate::core::{BalanceDelta, LedgerError, Result, UserId, unix_now};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    AdjustCache(BalanceDelta),
    Audit {
        user_id: UserId,
        kind: AuditKind,
        message: String,
    },
}

impl SideEffect {
    pub fn user_id(&self) -> UserId {
        match self {
            SideEffect::AdjustCache(delta) => delta.user_id,
            SideEffect::Audit { user_id, .. } => *user_id,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SideEffect::AdjustCache(_) => "adjust_cache",
            SideEffect::Audit { .. } => "audit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SideEffectEnvelope {
    pub id: Uuid,
    pub created_at: i64,
    pub effect: SideEffect,
}

impl SideEffectEnvelope {
    fn new(effect: SideEffect) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: unix_now(),
            effect,
        }
    }
}

// ============================================================================
// Producer
// ============================================================================

#[derive(Clone)]
pub struct SideEffectSender {
    tx: mpsc::Sender<SideEffectEnvelope>,
    dropped: Arc<AtomicU64>,
}

impl SideEffectSender {
    /// Queues `effect` without waiting; returns false when it was dropped.
    pub fn dispatch(&self, effect: SideEffect) -> bool {
        let envelope = SideEffectEnvelope::new(effect);
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    effect_id = %envelope.id,
                    kind = envelope.effect.label(),
                    user_id = envelope.effect.user_id(),
                    "side effect queue full, effect dropped"
                );
                false
            }
            Err(TrySendError::Closed(envelope)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    effect_id = %envelope.id,
                    kind = envelope.effect.label(),
                    user_id = envelope.effect.user_id(),
                    "side effect queue closed, effect dropped"
                );
                false
            }
        }
    }

    /// Queues a committed cache delta; zero deltas are not sent.
    pub fn adjust_cache(&self, delta: BalanceDelta) {
        if delta.delta != 0 {
            self.dispatch(SideEffect::AdjustCache(delta));
        }
    }

    pub fn audit(&self, user_id: UserId, kind: AuditKind, message: impl Into<String>) {
        self.dispatch(SideEffect::Audit {
            user_id,
            kind,
            message: message.into(),
        });
    }

    /// Effects dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct SideEffectWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SideEffectWorker {
    /// Stops accepting effects, runs everything already queued, then returns.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await.map_err(|err| {
                LedgerError::Persistence(format!("side effect worker join: {}", err))
            })?;
        }
        Ok(())
    }
}

impl Drop for SideEffectWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

pub fn spawn_side_effect_worker(
    config: &SideEffectConfig,
    cache: Arc<dyn BalanceCache>,
    audit: Arc<dyn AuditLog>,
) -> (SideEffectSender, SideEffectWorker) {
    let (tx, mut rx) = mpsc::channel::<SideEffectEnvelope>(config.queue_capacity.max(1));
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let workers = config.workers.max(1);
    let slots = Arc::new(Semaphore::new(workers));

    let join_handle = tokio::spawn(async move {
        let mut stopping = false;
        let mut applied: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut stop_rx, if !stopping => {
                    stopping = true;
                    rx.close();
                }
                next = rx.recv() => {
                    let Some(envelope) = next else { break };
                    let Ok(permit) = slots.clone().acquire_owned().await else { break };
                    let cache = cache.clone();
                    let audit = audit.clone();
                    applied += 1;
                    tokio::spawn(async move {
                        let _permit = permit;
                        apply(envelope, cache.as_ref(), audit.as_ref()).await;
                    });
                }
            }
        }

        // Wait for effects still running.
        let _ = slots.acquire_many(workers as u32).await;
        info!(applied, "side effect worker drained");
    });

    let sender = SideEffectSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    let worker = SideEffectWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    };
    (sender, worker)
}

async fn apply(envelope: SideEffectEnvelope, cache: &dyn BalanceCache, audit: &dyn AuditLog) {
    let SideEffectEnvelope { id, effect, .. } = envelope;
    let outcome = match &effect {
        SideEffect::AdjustCache(delta) => cache.adjust_balance(*delta).await,
        SideEffect::Audit {
            user_id,
            kind,
            message,
        } => audit.record(*user_id, *kind, message.clone()).await,
    };

    match outcome {
        Ok(()) => debug!(effect_id = %id, kind = effect.label(), "side effect applied"),
        Err(err) => warn!(
            effect_id = %id,
            kind = effect.label(),
            user_id = effect.user_id(),
            error = %err,
            "side effect failed"
        ),
    }
}
