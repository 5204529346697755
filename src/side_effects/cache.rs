use crate::core::{BalanceDelta, Result, UserBalance, UserId};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub const DEFAULT_BALANCE_CACHE_CAPACITY: usize = 10_000;

/// Secondary read cache of user balances.
///
/// Never authoritative: the store's transactional value wins. Entries carry
/// the row version they reflect, so a delta is applied at most once and a
/// read-through never replaces a newer view with an older one.
#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<Option<UserBalance>>;

    /// Fills the entry from a store read, unless the cache already saw a
    /// later version of the row.
    async fn put(&self, balance: UserBalance) -> Result<()>;

    /// Applies a committed delta to the cached field, if the user is cached.
    async fn adjust_balance(&self, delta: BalanceDelta) -> Result<()>;

    async fn invalidate(&self, user_id: UserId) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Cached(UserBalance),
    /// The row reached `version` while no usable value was cached.
    Stale { version: u64 },
}

impl Slot {
    fn version(&self) -> u64 {
        match self {
            Slot::Cached(balance) => balance.version,
            Slot::Stale { version } => *version,
        }
    }
}

pub struct LruBalanceCache {
    entries: Mutex<LruCache<UserId, Slot>>,
}

impl LruBalanceCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached balances.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, slot)| matches!(slot, Slot::Cached(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LruBalanceCache {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCE_CACHE_CAPACITY)
    }
}

#[async_trait]
impl BalanceCache for LruBalanceCache {
    async fn get(&self, user_id: UserId) -> Result<Option<UserBalance>> {
        let mut entries = self.entries.lock()?;
        Ok(match entries.get(&user_id) {
            Some(Slot::Cached(balance)) => Some(*balance),
            _ => None,
        })
    }

    async fn put(&self, balance: UserBalance) -> Result<()> {
        let mut entries = self.entries.lock()?;
        if entries
            .peek(&balance.user_id)
            .is_some_and(|slot| slot.version() > balance.version)
        {
            return Ok(());
        }
        entries.put(balance.user_id, Slot::Cached(balance));
        Ok(())
    }

    async fn adjust_balance(&self, delta: BalanceDelta) -> Result<()> {
        let mut entries = self.entries.lock()?;
        let next = match entries.peek(&delta.user_id) {
            // Remember the version so an older read-through cannot land.
            None => Slot::Stale {
                version: delta.version,
            },
            Some(Slot::Stale { version }) => Slot::Stale {
                version: (*version).max(delta.version),
            },
            Some(Slot::Cached(balance)) if delta.version <= balance.version => return Ok(()),
            Some(Slot::Cached(balance)) if delta.version == balance.version + 1 => {
                let mut balance = *balance;
                balance.apply(delta.field, delta.delta);
                balance.version = delta.version;
                Slot::Cached(balance)
            }
            // A delta in between is missing; the next read-through refills.
            Some(Slot::Cached(_)) => Slot::Stale {
                version: delta.version,
            },
        };
        entries.put(delta.user_id, next);
        Ok(())
    }

    async fn invalidate(&self, user_id: UserId) -> Result<()> {
        let mut entries = self.entries.lock()?;
        entries.pop(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BalanceField;

    fn delta(user_id: UserId, field: BalanceField, delta: i64, version: u64) -> BalanceDelta {
        BalanceDelta {
            user_id,
            field,
            delta,
            version,
        }
    }

    #[tokio::test]
    async fn applies_the_next_version_once() {
        let cache = LruBalanceCache::new(4);
        cache.put(UserBalance::new(1, 100, 0)).await.unwrap();

        let grant = delta(1, BalanceField::SubscriptionQuota, 40, 1);
        cache.adjust_balance(grant).await.unwrap();
        cache.adjust_balance(grant).await.unwrap();

        let cached = cache.get(1).await.unwrap().unwrap();
        assert_eq!((cached.quota, cached.subscription_quota), (100, 40));
        assert_eq!(cached.version, 1);
    }

    #[tokio::test]
    async fn skips_deltas_already_in_a_fresher_read() {
        let cache = LruBalanceCache::new(4);
        let mut fresh = UserBalance::new(1, 800, 500);
        fresh.version = 2;
        cache.put(fresh).await.unwrap();

        cache
            .adjust_balance(delta(1, BalanceField::Quota, -200, 1))
            .await
            .unwrap();
        cache
            .adjust_balance(delta(1, BalanceField::SubscriptionQuota, 500, 2))
            .await
            .unwrap();
        assert_eq!(cache.get(1).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn uncached_user_rejects_older_fill() {
        let cache = LruBalanceCache::new(4);
        cache
            .adjust_balance(delta(2, BalanceField::Quota, -5, 3))
            .await
            .unwrap();
        assert_eq!(cache.get(2).await.unwrap(), None);

        let mut old = UserBalance::new(2, 50, 0);
        old.version = 2;
        cache.put(old).await.unwrap();
        assert_eq!(cache.get(2).await.unwrap(), None);

        let current = UserBalance {
            quota: 45,
            version: 3,
            ..old
        };
        cache.put(current).await.unwrap();
        assert_eq!(cache.get(2).await.unwrap(), Some(current));
    }

    #[tokio::test]
    async fn gap_in_versions_drops_the_entry() {
        let cache = LruBalanceCache::new(4);
        cache.put(UserBalance::new(1, 100, 0)).await.unwrap();
        cache
            .adjust_balance(delta(1, BalanceField::Quota, 10, 2))
            .await
            .unwrap();
        assert_eq!(cache.get(1).await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = LruBalanceCache::new(2);
        for user_id in 1..=3 {
            cache.put(UserBalance::new(user_id, 0, 0)).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).await.unwrap().is_none());

        cache.invalidate(3).await.unwrap();
        assert!(cache.get(3).await.unwrap().is_none());
    }
}
