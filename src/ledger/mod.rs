// ============================================================================
// Quota Ledger
// ============================================================================
//
// Dual-balance accounting: `quota` (pay-as-you-go) and `subscription_quota`
// (prepaid through plan purchases). Every balance mutation runs inside one
// store transaction holding the user's row lock. Rows are locked plan first,
// then users in ascending id order.
//
// Cache deltas and audit entries are queued only after a commit succeeded.
//
// ============================================================================

pub mod model;
pub mod store;

pub use model::{
    MAX_PLAN_DURATION_DAYS, MAX_PLAN_NAME_CHARS, NewOrder, OrderStatus, PlanRefund, PlanRequest,
    PlanStatus, SubscriptionPlan, UserPlanOrder,
};
pub use store::{LedgerStore, LedgerTransaction};

use crate::config::LedgerConfig;
use crate::core::{
    BalanceDelta, BalanceField, LedgerError, MAX_PAGE_SIZE, Page, PlanId, QuotaDisplay, Result,
    UserBalance, UserId, page_offset, unix_now,
};
use crate::side_effects::{AuditKind, BalanceCache, SideEffectSender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{Instrument, debug, info, info_span, warn};

pub struct QuotaLedger {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    effects: SideEffectSender,
    config: LedgerConfig,
    inflight: Arc<Semaphore>,
    closed: AtomicBool,
}

impl QuotaLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        effects: SideEffectSender,
        config: LedgerConfig,
    ) -> Self {
        let inflight = Arc::new(Semaphore::new(config.max_inflight.max(1)));
        Self {
            store,
            cache,
            effects,
            config,
            inflight,
            closed: AtomicBool::new(false),
        }
    }

    pub fn display(&self) -> QuotaDisplay {
        self.config.display
    }

    pub fn items_per_page(&self) -> usize {
        self.config.items_per_page.clamp(1, MAX_PAGE_SIZE)
    }

    // ------------------------------------------------------------------------
    // Purchase
    // ------------------------------------------------------------------------

    /// Buys `plan_id` for `user_id`: charges the price to `quota`, grants the
    /// plan quota to `subscription_quota` and records a snapshot order.
    pub async fn purchase(&self, user_id: UserId, plan_id: PlanId) -> Result<UserPlanOrder> {
        ensure_id("user", user_id)?;
        ensure_id("plan", plan_id)?;
        let _permit = self.admit().await?;

        let (order, deltas) = async {
            let mut tx = self.store.begin().await?;
            let outcome = purchase_rows(tx.as_mut(), user_id, plan_id).await;
            finish(tx, outcome).await
        }
        .instrument(info_span!("ledger.purchase", user_id, plan_id))
        .await?;

        for delta in deltas {
            self.effects.adjust_cache(delta);
        }
        let display = self.config.display;
        self.effects.audit(
            user_id,
            AuditKind::Topup,
            format!(
                "purchased plan {}, paid {}, granted subscription quota {}",
                order.plan_name,
                display.format(order.price),
                display.format(order.granted_quota)
            ),
        );

        info!(
            user_id,
            plan_id,
            order_id = order.id,
            price = order.price,
            granted_quota = order.granted_quota,
            "plan purchased"
        );
        Ok(order)
    }

    // ------------------------------------------------------------------------
    // Delete with refund
    // ------------------------------------------------------------------------

    /// Deletes a plan and its orders, refunding every buyer's payments and
    /// clawing back the granted subscription quota they still hold.
    ///
    /// Returns the adjustments actually applied, by ascending user id.
    pub async fn delete_plan(&self, plan_id: PlanId) -> Result<Vec<PlanRefund>> {
        ensure_id("plan", plan_id)?;
        let _permit = self.admit().await?;

        let (plan, applied, deltas) = async {
            let mut tx = self.store.begin().await?;
            let outcome = delete_plan_rows(tx.as_mut(), plan_id).await;
            finish(tx, outcome).await
        }
        .instrument(info_span!("ledger.delete_plan", plan_id))
        .await?;

        for delta in deltas {
            self.effects.adjust_cache(delta);
        }
        let display = self.config.display;
        for refund in &applied {
            self.effects.audit(
                refund.user_id,
                AuditKind::System,
                format!(
                    "plan {} was deleted, refunded {} and cleared subscription quota {}",
                    plan.name,
                    display.format(refund.refund_quota),
                    display.format(refund.clear_quota)
                ),
            );
        }

        info!(plan_id, refunded_users = applied.len(), "plan deleted");
        Ok(applied)
    }

    // ------------------------------------------------------------------------
    // Task compensation
    // ------------------------------------------------------------------------

    /// Credits the reserved quota of a failed job back to `quota`.
    pub async fn refund_task_quota(
        &self,
        user_id: UserId,
        quota: i64,
        external_id: &str,
    ) -> Result<()> {
        ensure_id("user", user_id)?;
        if quota == 0 {
            return Ok(());
        }
        let _permit = self.admit().await?;

        let delta = async {
            let mut tx = self.store.begin().await?;
            let outcome = credit_rows(tx.as_mut(), user_id, quota).await;
            finish(tx, outcome).await
        }
        .instrument(info_span!("ledger.refund_task", user_id, quota))
        .await?;

        if let Some(delta) = delta {
            self.effects.adjust_cache(delta);
        }
        self.effects.audit(
            user_id,
            AuditKind::System,
            format!(
                "task {} failed, refunded {}",
                external_id,
                self.config.display.format(quota)
            ),
        );

        info!(user_id, quota, external_id, "task quota refunded");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Plan catalogue
    // ------------------------------------------------------------------------

    pub async fn list_plans(&self, include_disabled: bool) -> Result<Vec<SubscriptionPlan>> {
        self.store.list_plans(include_disabled).await
    }

    pub async fn get_plan(&self, plan_id: PlanId) -> Result<SubscriptionPlan> {
        ensure_id("plan", plan_id)?;
        self.store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("plan {} not found", plan_id)))
    }

    pub async fn create_plan(&self, request: PlanRequest) -> Result<SubscriptionPlan> {
        let request = request.validated()?;
        let plan = self.store.create_plan(&request).await?;
        info!(plan_id = plan.id, name = %plan.name, "plan created");
        Ok(plan)
    }

    /// Edits a plan. Orders already bought keep their snapshot terms.
    pub async fn update_plan(
        &self,
        plan_id: PlanId,
        request: PlanRequest,
    ) -> Result<SubscriptionPlan> {
        ensure_id("plan", plan_id)?;
        let request = request.validated()?;
        let plan = self.store.update_plan(plan_id, &request).await?;
        info!(plan_id, name = %plan.name, "plan updated");
        Ok(plan)
    }

    /// One page of the user's orders, newest first, after marking the ones
    /// past their expire time as expired. `page` is one-based; `page_size`
    /// is capped at `MAX_PAGE_SIZE`.
    pub async fn list_user_orders(
        &self,
        user_id: UserId,
        page: i64,
        page_size: i64,
    ) -> Result<Page<UserPlanOrder>> {
        ensure_id("user", user_id)?;
        let page = u32::try_from(page.max(1))
            .map_err(|_| LedgerError::Validation(format!("page {} is out of range", page)))?;
        let page_size = if page_size < 1 {
            self.items_per_page()
        } else {
            usize::try_from(page_size).map_or(MAX_PAGE_SIZE, |size| size.min(MAX_PAGE_SIZE))
        };
        let offset = page_offset(page as usize - 1, page_size)?;

        let expired = self.store.expire_user_orders(user_id, unix_now()).await?;
        if expired > 0 {
            debug!(user_id, expired, "orders marked expired");
        }

        let (items, total) = self
            .store
            .list_user_orders(user_id, offset, page_size)
            .await?;
        Ok(Page {
            items,
            total,
            page,
            page_size: page_size as u32,
        })
    }

    /// Balance of a user, read through the cache.
    pub async fn user_balance(&self, user_id: UserId) -> Result<UserBalance> {
        match self.cache.get(user_id).await {
            Ok(Some(balance)) => return Ok(balance),
            Ok(None) => {}
            Err(err) => warn!(user_id, error = %err, "balance cache read failed"),
        }

        let balance = self
            .store
            .user_balance(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user {} not found", user_id)))?;
        if let Err(err) = self.cache.put(balance).await {
            warn!(user_id, error = %err, "balance cache fill failed");
        }
        Ok(balance)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Stops admitting operations and waits for the running ones.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let slots = self.config.max_inflight.max(1) as u32;
        if let Ok(permits) = self.inflight.acquire_many(slots).await {
            drop(permits);
        }
        self.inflight.close();
        info!("quota ledger closed");
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LedgerError::State("ledger is shutting down".into()));
        }
        let wait = self.config.admission_timeout;
        timeout(wait, self.inflight.clone().acquire_owned())
            .await
            .map_err(|_| {
                LedgerError::Persistence(format!(
                    "could not acquire a ledger slot within {}ms",
                    wait.as_millis()
                ))
            })?
            .map_err(|_| LedgerError::State("ledger is shutting down".into()))
    }
}

fn ensure_id(kind: &str, id: i64) -> Result<()> {
    if id <= 0 {
        return Err(LedgerError::Validation(format!("invalid {} id: {}", kind, id)));
    }
    Ok(())
}

/// Commits on success; otherwise rolls back and returns the original error.
async fn finish<T>(tx: Box<dyn LedgerTransaction>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            let txn = tx.id();
            if !err.is_rejection() {
                warn!(%txn, error = %err, "ledger transaction aborted");
            }
            if let Err(rollback_err) = tx.rollback().await {
                warn!(%txn, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn purchase_rows(
    tx: &mut dyn LedgerTransaction,
    user_id: UserId,
    plan_id: PlanId,
) -> Result<(UserPlanOrder, Vec<BalanceDelta>)> {
    let plan = tx
        .lock_plan(plan_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("plan {} not found", plan_id)))?;
    plan.ensure_purchasable()?;

    let balance = tx
        .lock_user(user_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {} not found", user_id)))?;
    if balance.quota < plan.price {
        return Err(LedgerError::InsufficientBalance(format!(
            "user {} has quota {}, plan {} costs {}",
            user_id, balance.quota, plan_id, plan.price
        )));
    }
    if balance
        .subscription_quota
        .checked_add(plan.total_quota)
        .is_none()
    {
        return Err(LedgerError::State(format!(
            "subscription quota of user {} cannot grow by {}",
            user_id, plan.total_quota
        )));
    }

    let mut deltas = Vec::with_capacity(2);
    if plan.price > 0 {
        deltas.extend(
            tx.adjust_balance(user_id, BalanceField::Quota, -plan.price)
                .await?,
        );
    }
    deltas.extend(
        tx.adjust_balance(user_id, BalanceField::SubscriptionQuota, plan.total_quota)
            .await?,
    );

    let order = tx
        .insert_order(NewOrder::snapshot(&plan, user_id, unix_now())?)
        .await?;
    Ok((order, deltas))
}

async fn delete_plan_rows(
    tx: &mut dyn LedgerTransaction,
    plan_id: PlanId,
) -> Result<(SubscriptionPlan, Vec<PlanRefund>, Vec<BalanceDelta>)> {
    let plan = tx
        .lock_plan(plan_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("plan {} not found", plan_id)))?;

    let mut applied = Vec::new();
    let mut deltas = Vec::new();
    for refund in tx.plan_refunds(plan_id).await? {
        let Some(balance) = tx.lock_user(refund.user_id).await? else {
            debug!(user_id = refund.user_id, plan_id, "buyer no longer exists, skipped");
            continue;
        };

        let clear_quota = refund.clear_quota.min(balance.subscription_quota).max(0);
        let adjustment = PlanRefund {
            user_id: refund.user_id,
            refund_quota: refund.refund_quota,
            clear_quota,
        };
        if adjustment.is_noop() {
            continue;
        }

        deltas.extend(
            tx.adjust_balance(refund.user_id, BalanceField::Quota, adjustment.refund_quota)
                .await?,
        );
        deltas.extend(
            tx.adjust_balance(
                refund.user_id,
                BalanceField::SubscriptionQuota,
                -adjustment.clear_quota,
            )
            .await?,
        );
        applied.push(adjustment);
    }

    let orders = tx.delete_plan_orders(plan_id).await?;
    tx.delete_plan(plan_id).await?;
    debug!(plan_id, orders, "plan orders deleted");
    Ok((plan, applied, deltas))
}

async fn credit_rows(
    tx: &mut dyn LedgerTransaction,
    user_id: UserId,
    quota: i64,
) -> Result<Option<BalanceDelta>> {
    tx.lock_user(user_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("user {} not found", user_id)))?;
    tx.adjust_balance(user_id, BalanceField::Quota, quota).await
}
