use super::model::{NewOrder, PlanRefund, PlanRequest, SubscriptionPlan, UserPlanOrder};
use crate::core::{BalanceDelta, BalanceField, PlanId, Result, UserBalance, UserId};
use crate::transaction::TransactionId;
use async_trait::async_trait;

/// Storage the quota ledger runs on.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a transaction. Dropping it without commit rolls it back.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    /// Non-deleted plans, by sort order ascending then id descending.
    async fn list_plans(&self, include_disabled: bool) -> Result<Vec<SubscriptionPlan>>;

    async fn get_plan(&self, plan_id: PlanId) -> Result<Option<SubscriptionPlan>>;

    /// Inserts a plan from an already validated request.
    async fn create_plan(&self, request: &PlanRequest) -> Result<SubscriptionPlan>;

    /// Overwrites the editable columns of a plan from an already validated request.
    async fn update_plan(&self, plan_id: PlanId, request: &PlanRequest)
    -> Result<SubscriptionPlan>;

    /// Marks the user's active orders that expired at or before `now`.
    async fn expire_user_orders(&self, user_id: UserId, now: i64) -> Result<u64>;

    /// One page of the user's orders, newest first, and the total count.
    async fn list_user_orders(
        &self,
        user_id: UserId,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<UserPlanOrder>, u64)>;

    /// Committed balance of a user, without locking.
    async fn user_balance(&self, user_id: UserId) -> Result<Option<UserBalance>>;
}

/// A unit of atomicity over plan, order, and balance rows.
///
/// Writes require the row lock of the row they touch. Reads of locked rows
/// observe this transaction's own pending changes.
#[async_trait]
pub trait LedgerTransaction: Send {
    fn id(&self) -> TransactionId;

    /// Locks the plan row; `None` if it does not exist or was deleted.
    async fn lock_plan(&mut self, plan_id: PlanId) -> Result<Option<SubscriptionPlan>>;

    /// Locks the user row; `None` if the user does not exist.
    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<UserBalance>>;

    /// Buffers a balance change. Returns the change stamped with the row
    /// version it produces on commit, or `None` for a zero delta.
    async fn adjust_balance(
        &mut self,
        user_id: UserId,
        field: BalanceField,
        delta: i64,
    ) -> Result<Option<BalanceDelta>>;

    async fn insert_order(&mut self, order: NewOrder) -> Result<UserPlanOrder>;

    /// Per-user sums of price and granted quota over the plan's orders.
    async fn plan_refunds(&mut self, plan_id: PlanId) -> Result<Vec<PlanRefund>>;

    async fn delete_plan_orders(&mut self, plan_id: PlanId) -> Result<u64>;

    async fn delete_plan(&mut self, plan_id: PlanId) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
