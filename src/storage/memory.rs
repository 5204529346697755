use crate::channel::{Channel, ChannelDirectory};
use crate::core::{
    BalanceDelta, BalanceField, ChannelId, LedgerError, OrderId, PlanId, Result, TaskRowId, UserBalance, UserId,
    unix_now,
};
use crate::ledger::{
    LedgerStore, LedgerTransaction, NewOrder, OrderStatus, PlanRefund, PlanRequest, PlanStatus,
    SubscriptionPlan, UserPlanOrder,
};
use crate::task::{NewTask, Task, TaskPatch, TaskQuery, TaskStore};
use crate::transaction::{Change, RowKey, RowLockTable, Transaction, TransactionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default wait for a row lock before the statement fails.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Last id handed out per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    pub plan: i64,
    pub order: i64,
    pub task: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    pub users: BTreeMap<UserId, UserBalance>,
    pub channels: BTreeMap<ChannelId, Channel>,
    pub plans: BTreeMap<PlanId, SubscriptionPlan>,
    pub orders: BTreeMap<OrderId, UserPlanOrder>,
    pub tasks: BTreeMap<TaskRowId, Task>,
    pub sequences: Sequences,
}

impl Tables {
    pub fn row_count(&self) -> usize {
        self.users.len()
            + self.channels.len()
            + self.plans.len()
            + self.orders.len()
            + self.tasks.len()
    }

    fn apply(&mut self, change: Change) {
        match change {
            Change::AdjustBalance {
                user_id,
                field,
                delta,
            } => match self.users.get_mut(&user_id) {
                Some(user) => {
                    user.apply(field, delta);
                    user.version += 1;
                }
                None => warn!(user_id, %field, delta, "balance change for a missing user dropped"),
            },
            Change::InsertOrder { order } => {
                self.orders.insert(order.id, order);
            }
            Change::DeletePlanOrders {
                plan_id,
                deleted_at,
            } => {
                for order in self
                    .orders
                    .values_mut()
                    .filter(|order| order.plan_id == plan_id && !order.is_deleted())
                {
                    order.deleted_at = Some(deleted_at);
                }
            }
            Change::DeletePlan {
                plan_id,
                deleted_at,
            } => {
                if let Some(plan) = self.plans.get_mut(&plan_id) {
                    plan.deleted_at = Some(deleted_at);
                }
            }
        }
    }
}

struct Shared {
    tables: RwLock<Tables>,
    locks: RowLockTable,
    lock_timeout: Duration,
}

/// In-memory store for jobs, channels, plans, orders and user balances.
///
/// Cloning is cheap; all clones share the same tables.
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::from_tables(Tables::default(), DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self::from_tables(Tables::default(), lock_timeout)
    }

    pub fn from_tables(tables: Tables, lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(tables),
                locks: RowLockTable::new(),
                lock_timeout,
            }),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.shared.lock_timeout
    }

    /// Consistent copy of every table.
    pub async fn tables(&self) -> Tables {
        self.shared.tables.read().await.clone()
    }

    /// Inserts or replaces a user balance row. A replaced row moves past the
    /// version it overwrote.
    pub async fn insert_user(&self, mut balance: UserBalance) {
        let mut tables = self.shared.tables.write().await;
        if let Some(existing) = tables.users.get(&balance.user_id) {
            balance.version = balance.version.max(existing.version + 1);
        }
        tables.users.insert(balance.user_id, balance);
    }

    /// Removes a user row; returns whether it existed.
    pub async fn remove_user(&self, user_id: UserId) -> bool {
        let mut tables = self.shared.tables.write().await;
        tables.users.remove(&user_id).is_some()
    }

    pub async fn insert_channel(&self, channel: Channel) {
        let mut tables = self.shared.tables.write().await;
        tables.channels.insert(channel.id, channel);
    }

    pub async fn remove_channel(&self, channel_id: ChannelId) -> bool {
        let mut tables = self.shared.tables.write().await;
        tables.channels.remove(&channel_id).is_some()
    }

    /// Inserts a plan row as given, keeping the id sequence ahead of it.
    pub async fn insert_plan(&self, plan: SubscriptionPlan) {
        let mut tables = self.shared.tables.write().await;
        tables.sequences.plan = tables.sequences.plan.max(plan.id);
        tables.plans.insert(plan.id, plan);
    }

    /// Orders of a plan, including soft-deleted ones.
    pub async fn plan_orders(&self, plan_id: PlanId) -> Vec<UserPlanOrder> {
        let tables = self.shared.tables.read().await;
        tables
            .orders
            .values()
            .filter(|order| order.plan_id == plan_id)
            .cloned()
            .collect()
    }

    /// Plan row, including a soft-deleted one.
    pub async fn plan_row(&self, plan_id: PlanId) -> Option<SubscriptionPlan> {
        let tables = self.shared.tables.read().await;
        tables.plans.get(&plan_id).cloned()
    }
}

// ============================================================================
// Task Store
// ============================================================================

#[async_trait]
impl TaskStore for MemoryDatabase {
    async fn insert(&self, task: NewTask) -> Result<Task> {
        let platform = task
            .platform
            .ok_or_else(|| LedgerError::Validation("task platform is required".into()))?;
        let now = unix_now();

        let mut tables = self.shared.tables.write().await;
        let id = next_id(&mut tables.sequences.task);
        let record = Task {
            id,
            created_at: now,
            updated_at: now,
            external_id: task.external_id,
            platform,
            user_id: task.user_id,
            channel_id: task.channel_id,
            quota: task.quota,
            action: task.action,
            status: task.status,
            fail_reason: String::new(),
            submit_time: task.submit_time,
            start_time: 0,
            finish_time: 0,
            progress: task.progress,
            data: task.data,
        };
        tables.tasks.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: TaskRowId) -> Result<Option<Task>> {
        let tables = self.shared.tables.read().await;
        Ok(tables.tasks.get(&id).cloned())
    }

    async fn load_unfinished(&self, limit: usize) -> Result<Vec<Task>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|task| !task.is_finished())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn bulk_update_by_ids(&self, ids: &[TaskRowId], patch: &TaskPatch) -> Result<u64> {
        let now = unix_now();
        let mut tables = self.shared.tables.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(task) = tables.tasks.get_mut(id) {
                patch.apply(task);
                task.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn bulk_update_by_external_ids(
        &self,
        external_ids: &[String],
        patch: &TaskPatch,
    ) -> Result<u64> {
        let wanted: HashSet<&str> = external_ids.iter().map(String::as_str).collect();
        let now = unix_now();
        let mut tables = self.shared.tables.write().await;
        let mut updated = 0;
        for task in tables
            .tasks
            .values_mut()
            .filter(|task| wanted.contains(task.external_id.as_str()))
        {
            patch.apply(task);
            task.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let mut tables = self.shared.tables.write().await;
        let stored = tables
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| LedgerError::NotFound(format!("task {} not found", task.id)))?;
        *stored = task.clone();
        stored.updated_at = unix_now();
        Ok(())
    }

    async fn list(&self, query: &TaskQuery, offset: usize, limit: usize) -> Result<Vec<Task>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .rev()
            .filter(|task| query.matches(task))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Channel Directory
// ============================================================================

#[async_trait]
impl ChannelDirectory for MemoryDatabase {
    async fn channel(&self, channel_id: ChannelId) -> Result<Channel> {
        let tables = self.shared.tables.read().await;
        tables
            .channels
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("channel {} not found", channel_id)))
    }
}

// ============================================================================
// Ledger Store
// ============================================================================

#[async_trait]
impl LedgerStore for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let txn = Transaction::new(TransactionId::new());
        debug!(txn = %txn.id(), "transaction started");
        Ok(Box::new(MemoryTransaction {
            db: self.clone(),
            txn,
        }))
    }

    async fn list_plans(&self, include_disabled: bool) -> Result<Vec<SubscriptionPlan>> {
        let tables = self.shared.tables.read().await;
        let mut plans: Vec<SubscriptionPlan> = tables
            .plans
            .values()
            .filter(|plan| !plan.is_deleted())
            .filter(|plan| include_disabled || plan.status == PlanStatus::Enabled)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(b.id.cmp(&a.id)));
        Ok(plans)
    }

    async fn get_plan(&self, plan_id: PlanId) -> Result<Option<SubscriptionPlan>> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .plans
            .get(&plan_id)
            .filter(|plan| !plan.is_deleted())
            .cloned())
    }

    async fn create_plan(&self, request: &PlanRequest) -> Result<SubscriptionPlan> {
        let now = unix_now();
        let mut tables = self.shared.tables.write().await;
        let id = next_id(&mut tables.sequences.plan);
        let plan = SubscriptionPlan {
            id,
            name: request.name.clone(),
            description: request.description.clone(),
            price: request.price,
            total_quota: request.total_quota,
            daily_quota: request.daily_quota,
            duration_days: request.duration_days,
            status: request.status,
            sort_order: request.sort_order,
            created_time: now,
            updated_time: now,
            deleted_at: None,
        };
        tables.plans.insert(id, plan.clone());
        Ok(plan)
    }

    async fn update_plan(
        &self,
        plan_id: PlanId,
        request: &PlanRequest,
    ) -> Result<SubscriptionPlan> {
        // Serialise with purchases that hold the plan row.
        let guard = self
            .shared
            .locks
            .acquire(RowKey::Plan(plan_id), self.shared.lock_timeout)
            .await?;

        let updated = {
            let mut tables = self.shared.tables.write().await;
            match tables
                .plans
                .get_mut(&plan_id)
                .filter(|plan| !plan.is_deleted())
            {
                Some(plan) => {
                    plan.name = request.name.clone();
                    plan.description = request.description.clone();
                    plan.price = request.price;
                    plan.total_quota = request.total_quota;
                    plan.daily_quota = request.daily_quota;
                    plan.duration_days = request.duration_days;
                    plan.status = request.status;
                    plan.sort_order = request.sort_order;
                    plan.updated_time = unix_now();
                    Ok(plan.clone())
                }
                None => Err(LedgerError::NotFound(format!("plan {} not found", plan_id))),
            }
        };

        self.shared.locks.release(vec![guard]);
        updated
    }

    async fn expire_user_orders(&self, user_id: UserId, now: i64) -> Result<u64> {
        let mut tables = self.shared.tables.write().await;
        let mut expired = 0;
        for order in tables.orders.values_mut().filter(|order| {
            order.user_id == user_id && !order.is_deleted() && order.has_expired_at(now)
        }) {
            order.status = OrderStatus::Expired;
            expired += 1;
        }
        Ok(expired)
    }

    async fn list_user_orders(
        &self,
        user_id: UserId,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<UserPlanOrder>, u64)> {
        let tables = self.shared.tables.read().await;
        let orders: Vec<&UserPlanOrder> = tables
            .orders
            .values()
            .rev()
            .filter(|order| order.user_id == user_id && !order.is_deleted())
            .collect();
        let total = orders.len() as u64;
        let page = orders
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn user_balance(&self, user_id: UserId) -> Result<Option<UserBalance>> {
        let tables = self.shared.tables.read().await;
        Ok(tables.users.get(&user_id).copied())
    }
}

// ============================================================================
// Ledger Transaction
// ============================================================================

pub struct MemoryTransaction {
    db: MemoryDatabase,
    txn: Transaction,
}

impl MemoryTransaction {
    async fn lock_row(&mut self, key: RowKey) -> Result<()> {
        self.txn.ensure_open()?;
        if self.txn.holds(key) {
            return Ok(());
        }
        let guard = self
            .db
            .shared
            .locks
            .acquire(key, self.db.shared.lock_timeout)
            .await?;
        self.txn.hold(guard)
    }

    fn release_locks(&mut self) {
        let locks = self.txn.take_locks();
        if !locks.is_empty() {
            self.db.shared.locks.release(locks);
        }
    }

    fn pending_delta(&self, user_id: UserId, field: BalanceField) -> i64 {
        self.txn
            .changes()
            .iter()
            .map(|change| change.balance_delta(user_id, field))
            .sum()
    }

    fn pending_versions(&self, user_id: UserId) -> u64 {
        self.txn
            .changes()
            .iter()
            .filter(|change| change.adjusts_user(user_id))
            .count() as u64
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    fn id(&self) -> TransactionId {
        self.txn.id()
    }

    async fn lock_plan(&mut self, plan_id: PlanId) -> Result<Option<SubscriptionPlan>> {
        self.lock_row(RowKey::Plan(plan_id)).await?;
        if self
            .txn
            .changes()
            .iter()
            .any(|change| change.deletes_plan(plan_id))
        {
            return Ok(None);
        }
        let tables = self.db.shared.tables.read().await;
        Ok(tables
            .plans
            .get(&plan_id)
            .filter(|plan| !plan.is_deleted())
            .cloned())
    }

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<UserBalance>> {
        self.lock_row(RowKey::User(user_id)).await?;
        let committed = {
            let tables = self.db.shared.tables.read().await;
            tables.users.get(&user_id).copied()
        };
        Ok(committed.map(|mut balance| {
            balance.quota += self.pending_delta(user_id, BalanceField::Quota);
            balance.subscription_quota +=
                self.pending_delta(user_id, BalanceField::SubscriptionQuota);
            balance.version += self.pending_versions(user_id);
            balance
        }))
    }

    async fn adjust_balance(
        &mut self,
        user_id: UserId,
        field: BalanceField,
        delta: i64,
    ) -> Result<Option<BalanceDelta>> {
        self.txn.ensure_holds(RowKey::User(user_id))?;
        if delta == 0 {
            return Ok(None);
        }
        // The row lock is held until commit, so the committed version plus
        // the pending changes is exactly the version this change produces.
        let committed = {
            let tables = self.db.shared.tables.read().await;
            tables
                .users
                .get(&user_id)
                .map(|user| user.version)
                .ok_or_else(|| LedgerError::NotFound(format!("user {} not found", user_id)))?
        };
        let version = committed + self.pending_versions(user_id) + 1;
        self.txn.record_change(Change::AdjustBalance {
            user_id,
            field,
            delta,
        })?;
        Ok(Some(BalanceDelta {
            user_id,
            field,
            delta,
            version,
        }))
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<UserPlanOrder> {
        self.txn.ensure_holds(RowKey::Plan(order.plan_id))?;
        self.txn.ensure_holds(RowKey::User(order.user_id))?;
        let now = unix_now();
        let id = {
            let mut tables = self.db.shared.tables.write().await;
            next_id(&mut tables.sequences.order)
        };
        let order = order.into_order(id, now);
        self.txn.record_change(Change::InsertOrder {
            order: order.clone(),
        })?;
        Ok(order)
    }

    async fn plan_refunds(&mut self, plan_id: PlanId) -> Result<Vec<PlanRefund>> {
        self.txn.ensure_holds(RowKey::Plan(plan_id))?;
        let tables = self.db.shared.tables.read().await;
        let mut per_user: BTreeMap<UserId, PlanRefund> = BTreeMap::new();
        for order in tables
            .orders
            .values()
            .filter(|order| order.plan_id == plan_id && !order.is_deleted())
        {
            let refund = per_user.entry(order.user_id).or_insert(PlanRefund {
                user_id: order.user_id,
                refund_quota: 0,
                clear_quota: 0,
            });
            refund.refund_quota += order.price;
            refund.clear_quota += order.granted_quota;
        }
        Ok(per_user.into_values().collect())
    }

    async fn delete_plan_orders(&mut self, plan_id: PlanId) -> Result<u64> {
        self.txn.ensure_holds(RowKey::Plan(plan_id))?;
        let count = {
            let tables = self.db.shared.tables.read().await;
            tables
                .orders
                .values()
                .filter(|order| order.plan_id == plan_id && !order.is_deleted())
                .count() as u64
        };
        self.txn.record_change(Change::DeletePlanOrders {
            plan_id,
            deleted_at: unix_now(),
        })?;
        Ok(count)
    }

    async fn delete_plan(&mut self, plan_id: PlanId) -> Result<()> {
        self.txn.ensure_holds(RowKey::Plan(plan_id))?;
        self.txn.record_change(Change::DeletePlan {
            plan_id,
            deleted_at: unix_now(),
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let changes = this.txn.commit()?;
        let change_count = changes.len();
        {
            let mut tables = this.db.shared.tables.write().await;
            for change in changes {
                tables.apply(change);
            }
        }
        this.release_locks();
        debug!(
            txn = %this.txn.id(),
            changes = change_count,
            elapsed_ms = this.txn.elapsed().as_millis() as u64,
            "transaction committed"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.txn.rollback()?;
        this.release_locks();
        debug!(txn = %this.txn.id(), "transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.txn.state().is_open() {
            let _ = self.txn.rollback();
            debug!(txn = %self.txn.id(), "transaction dropped without commit, rolled back");
        }
        self.release_locks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPlatform, TaskStatus};

    async fn seeded() -> (MemoryDatabase, SubscriptionPlan) {
        let db = MemoryDatabase::with_lock_timeout(Duration::from_millis(50));
        db.insert_user(UserBalance::new(1, 1_000, 0)).await;
        let plan = db
            .create_plan(&PlanRequest::new("Basic", 100, 50))
            .await
            .unwrap();
        (db, plan)
    }

    #[tokio::test]
    async fn uncommitted_changes_are_invisible_and_dropped() {
        let (db, _) = seeded().await;
        {
            let mut tx = db.begin().await.unwrap();
            tx.lock_user(1).await.unwrap();
            tx.adjust_balance(1, BalanceField::Quota, -300).await.unwrap();

            let inside = tx.lock_user(1).await.unwrap().unwrap();
            assert_eq!(inside.quota, 700);
            assert_eq!(db.user_balance(1).await.unwrap().unwrap().quota, 1_000);
        }
        assert_eq!(db.user_balance(1).await.unwrap().unwrap().quota, 1_000);

        // The dropped transaction released its lock.
        let mut tx = db.begin().await.unwrap();
        assert!(tx.lock_user(1).await.unwrap().is_some());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn commit_applies_all_changes_together() {
        let (db, plan) = seeded().await;
        let mut tx = db.begin().await.unwrap();
        tx.lock_plan(plan.id).await.unwrap().unwrap();
        tx.lock_user(1).await.unwrap().unwrap();
        let paid = tx
            .adjust_balance(1, BalanceField::Quota, -100)
            .await
            .unwrap()
            .unwrap();
        let granted = tx
            .adjust_balance(1, BalanceField::SubscriptionQuota, 50)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((paid.version, granted.version), (1, 2));
        assert!(tx.adjust_balance(1, BalanceField::Quota, 0).await.unwrap().is_none());
        assert_eq!(tx.lock_user(1).await.unwrap().unwrap().version, 2);
        let order = tx
            .insert_order(NewOrder::snapshot(&plan, 1, unix_now()).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let balance = db.user_balance(1).await.unwrap().unwrap();
        assert_eq!((balance.quota, balance.subscription_quota), (900, 50));
        assert_eq!(balance.version, 2);
        assert_eq!(db.plan_orders(plan.id).await, vec![order]);
    }

    #[tokio::test]
    async fn replacing_a_user_row_moves_its_version_forward() {
        let (db, _) = seeded().await;
        let mut tx = db.begin().await.unwrap();
        tx.lock_user(1).await.unwrap();
        tx.adjust_balance(1, BalanceField::Quota, 5).await.unwrap();
        tx.commit().await.unwrap();

        db.insert_user(UserBalance::new(1, 10, 0)).await;
        let replaced = db.user_balance(1).await.unwrap().unwrap();
        assert_eq!((replaced.quota, replaced.version), (10, 2));
    }

    #[tokio::test]
    async fn write_without_lock_is_rejected() {
        let (db, _) = seeded().await;
        let mut tx = db.begin().await.unwrap();
        let result = tx.adjust_balance(1, BalanceField::Quota, 5).await;
        assert!(matches!(result, Err(LedgerError::State(_))));
    }

    #[tokio::test]
    async fn concurrent_lock_waits_then_times_out() {
        let (db, plan) = seeded().await;
        let mut first = db.begin().await.unwrap();
        first.lock_plan(plan.id).await.unwrap();

        let mut second = db.begin().await.unwrap();
        let blocked = second.lock_plan(plan.id).await;
        assert!(matches!(blocked, Err(LedgerError::Persistence(_))));

        first.commit().await.unwrap();
        assert!(second.lock_plan(plan.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleted_plan_disappears_from_listing() {
        let (db, plan) = seeded().await;
        let mut tx = db.begin().await.unwrap();
        tx.lock_plan(plan.id).await.unwrap();
        tx.delete_plan(plan.id).await.unwrap();
        assert!(tx.lock_plan(plan.id).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert!(db.get_plan(plan.id).await.unwrap().is_none());
        assert!(db.list_plans(true).await.unwrap().is_empty());
        assert!(db.plan_row(plan.id).await.unwrap().is_deleted());
    }

    #[tokio::test]
    async fn unfinished_tasks_load_in_id_order() {
        let db = MemoryDatabase::new();
        for index in 0..3 {
            db.insert(
                NewTask::new(TaskPlatform::suno(), 1, 1).external_id(format!("ext-{}", index)),
            )
            .await
            .unwrap();
        }
        db.bulk_update_by_ids(&[2], &TaskPatch::failed(None))
            .await
            .unwrap();

        let unfinished = db.load_unfinished(10).await.unwrap();
        let ids: Vec<TaskRowId> = unfinished.iter().map(|task| task.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(
            db.get(2).await.unwrap().unwrap().status,
            TaskStatus::Failure
        );
    }

    #[tokio::test]
    async fn bulk_update_by_external_ids_touches_every_match() {
        let db = MemoryDatabase::new();
        for external_id in ["a", "b", "a"] {
            db.insert(NewTask::new(TaskPlatform::suno(), 1, 1).external_id(external_id))
                .await
                .unwrap();
        }
        let updated = db
            .bulk_update_by_external_ids(&["a".to_string()], &TaskPatch::failed(None))
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(db.load_unfinished(10).await.unwrap().len(), 1);
    }
}
