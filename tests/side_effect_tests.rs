use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use taskledger::SideEffectConfig;
use taskledger::core::{BalanceDelta, BalanceField, LedgerError, Result, UserBalance, UserId};
use taskledger::side_effects::{
    AuditKind, BalanceCache, LruBalanceCache, MemoryAuditLog, SideEffect,
    spawn_side_effect_worker,
};

/// Cache whose every call fails.
#[derive(Default)]
struct BrokenCache {
    calls: AtomicUsize,
}

#[async_trait]
impl BalanceCache for BrokenCache {
    async fn get(&self, _user_id: UserId) -> Result<Option<UserBalance>> {
        Err(LedgerError::Persistence("cache offline".into()))
    }

    async fn put(&self, _balance: UserBalance) -> Result<()> {
        Err(LedgerError::Persistence("cache offline".into()))
    }

    async fn adjust_balance(&self, _delta: BalanceDelta) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LedgerError::Persistence("cache offline".into()))
    }

    async fn invalidate(&self, _user_id: UserId) -> Result<()> {
        Err(LedgerError::Persistence("cache offline".into()))
    }
}

fn quota_delta(user_id: UserId, delta: i64, version: u64) -> BalanceDelta {
    BalanceDelta {
        user_id,
        field: BalanceField::Quota,
        delta,
        version,
    }
}

#[tokio::test]
async fn stop_drains_queued_effects() {
    let cache = Arc::new(LruBalanceCache::new(16));
    cache.put(UserBalance::new(1, 100, 0)).await.unwrap();
    let audit = Arc::new(MemoryAuditLog::new());
    // A single worker applies deltas in queue order.
    let config = SideEffectConfig::default().workers(1);
    let (sender, worker) = spawn_side_effect_worker(&config, cache.clone(), audit.clone());

    for version in 1..=20 {
        sender.adjust_cache(quota_delta(1, 5, version));
    }
    sender.audit(1, AuditKind::Topup, "bought");
    worker.stop().await.unwrap();

    let cached = cache.get(1).await.unwrap().unwrap();
    assert_eq!((cached.quota, cached.version), (200, 20));
    let entries = audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "bought");
    assert_eq!(sender.dropped(), 0);
}

#[tokio::test]
async fn full_queue_drops_instead_of_blocking() {
    let cache = Arc::new(LruBalanceCache::new(16));
    let audit = Arc::new(MemoryAuditLog::new());
    let config = SideEffectConfig::default().queue_capacity(1);
    let (sender, worker) = spawn_side_effect_worker(&config, cache, audit.clone());

    // Nothing yields between these sends, so the worker cannot drain in between.
    assert!(sender.dispatch(SideEffect::Audit {
        user_id: 1,
        kind: AuditKind::System,
        message: "first".into(),
    }));
    assert!(!sender.dispatch(SideEffect::Audit {
        user_id: 1,
        kind: AuditKind::System,
        message: "second".into(),
    }));
    sender.audit(1, AuditKind::System, "third");
    assert_eq!(sender.dropped(), 2);

    worker.stop().await.unwrap();
    let messages: Vec<String> = audit.entries().await.into_iter().map(|e| e.message).collect();
    assert_eq!(messages, vec!["first".to_string()]);
}

#[tokio::test]
async fn zero_delta_is_never_queued() {
    let cache = Arc::new(LruBalanceCache::new(16));
    let audit = Arc::new(MemoryAuditLog::new());
    let config = SideEffectConfig::default().queue_capacity(1);
    let (sender, worker) = spawn_side_effect_worker(&config, cache, audit);

    sender.adjust_cache(BalanceDelta {
        user_id: 1,
        field: BalanceField::SubscriptionQuota,
        delta: 0,
        version: 1,
    });
    sender.adjust_cache(quota_delta(1, 3, 1));
    assert_eq!(sender.dropped(), 0);
    worker.stop().await.unwrap();
}

#[tokio::test]
async fn cache_failure_does_not_block_audit() {
    let cache = Arc::new(BrokenCache::default());
    let audit = Arc::new(MemoryAuditLog::new());
    let (sender, worker) =
        spawn_side_effect_worker(&SideEffectConfig::default(), cache.clone(), audit.clone());

    sender.adjust_cache(quota_delta(7, -10, 1));
    sender.audit(7, AuditKind::System, "refund");
    worker.stop().await.unwrap();

    assert_eq!(cache.calls.load(Ordering::SeqCst), 1);
    assert_eq!(audit.entries_for(7).await.len(), 1);
}

#[tokio::test]
async fn effects_after_stop_are_dropped() {
    let cache = Arc::new(LruBalanceCache::new(16));
    let audit = Arc::new(MemoryAuditLog::new());
    let (sender, worker) =
        spawn_side_effect_worker(&SideEffectConfig::default(), cache, audit.clone());

    worker.stop().await.unwrap();
    sender.audit(1, AuditKind::System, "late");

    assert_eq!(sender.dropped(), 1);
    assert!(audit.entries().await.is_empty());
}

#[tokio::test]
async fn adjusting_an_uncached_user_caches_nothing() {
    let cache = Arc::new(LruBalanceCache::new(16));
    let audit = Arc::new(MemoryAuditLog::new());
    let (sender, worker) =
        spawn_side_effect_worker(&SideEffectConfig::default(), cache.clone(), audit);

    sender.adjust_cache(quota_delta(3, 40, 4));
    worker.stop().await.unwrap();

    assert!(cache.get(3).await.unwrap().is_none());
    assert!(cache.is_empty());

    // A fill read before that commit is refused; a current one is kept.
    let mut before = UserBalance::new(3, 10, 0);
    before.version = 3;
    cache.put(before).await.unwrap();
    assert!(cache.get(3).await.unwrap().is_none());

    let current = UserBalance {
        quota: 50,
        version: 4,
        ..before
    };
    cache.put(current).await.unwrap();
    assert_eq!(cache.get(3).await.unwrap(), Some(current));
}
