use crate::core::{LedgerError, OrderId, PlanId, Result, SECONDS_PER_DAY, UserId};
use serde::{Deserialize, Serialize};

/// Maximum plan name length, in characters, after trimming.
pub const MAX_PLAN_NAME_CHARS: usize = 64;

/// Longest plan duration accepted, about a century.
pub const MAX_PLAN_DURATION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Disabled,
    #[default]
    Enabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: PlanId,
    pub name: String,
    pub description: String,
    /// Deducted from the pay-as-you-go balance.
    pub price: i64,
    /// Added to the subscription balance.
    pub total_quota: i64,
    /// Informational; not enforced by the ledger.
    pub daily_quota: i64,
    /// 0 means the plan never expires.
    pub duration_days: i64,
    pub status: PlanStatus,
    pub sort_order: i64,
    pub created_time: i64,
    pub updated_time: i64,
    pub deleted_at: Option<i64>,
}

impl SubscriptionPlan {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Checks that the plan can be sold in its current state.
    pub fn ensure_purchasable(&self) -> Result<()> {
        if self.status != PlanStatus::Enabled {
            return Err(LedgerError::State(format!(
                "plan {} is not available for purchase",
                self.id
            )));
        }
        if self.price < 0 {
            return Err(LedgerError::State(format!(
                "plan {} has an invalid price",
                self.id
            )));
        }
        if self.total_quota <= 0 {
            return Err(LedgerError::State(format!(
                "plan {} has an invalid quota",
                self.id
            )));
        }
        if !(0..=MAX_PLAN_DURATION_DAYS).contains(&self.duration_days) {
            return Err(LedgerError::State(format!(
                "plan {} has an invalid duration",
                self.id
            )));
        }
        Ok(())
    }

    /// Expire time of an order bought at `now`; 0 for perpetual plans.
    pub fn expire_time_from(&self, now: i64) -> Result<i64> {
        if self.duration_days <= 0 {
            return Ok(0);
        }
        self.duration_days
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|seconds| now.checked_add(seconds))
            .ok_or_else(|| {
                LedgerError::State(format!(
                    "plan {} duration of {} days is out of range",
                    self.id, self.duration_days
                ))
            })
    }
}

/// Admin payload for creating or editing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub total_quota: i64,
    #[serde(default)]
    pub daily_quota: i64,
    #[serde(default)]
    pub duration_days: i64,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub sort_order: i64,
}

impl PlanRequest {
    pub fn new(name: impl Into<String>, price: i64, total_quota: i64) -> Self {
        Self {
            name: name.into(),
            price,
            total_quota,
            ..Self::default()
        }
    }

    pub fn duration_days(mut self, days: i64) -> Self {
        self.duration_days = days;
        self
    }

    pub fn daily_quota(mut self, daily_quota: i64) -> Self {
        self.daily_quota = daily_quota;
        self
    }

    pub fn status(mut self, status: PlanStatus) -> Self {
        self.status = status;
        self
    }

    pub fn sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Returns the request with its name trimmed, or the first rule it breaks.
    pub fn validated(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(LedgerError::Validation("plan name must not be empty".into()));
        }
        if self.name.chars().count() > MAX_PLAN_NAME_CHARS {
            return Err(LedgerError::Validation(format!(
                "plan name must not exceed {} characters",
                MAX_PLAN_NAME_CHARS
            )));
        }
        if self.price < 0 {
            return Err(LedgerError::Validation("plan price must be >= 0".into()));
        }
        if self.total_quota <= 0 {
            return Err(LedgerError::Validation("plan total quota must be > 0".into()));
        }
        if self.daily_quota < 0 {
            return Err(LedgerError::Validation("plan daily quota must be >= 0".into()));
        }
        if self.duration_days < 0 {
            return Err(LedgerError::Validation("plan duration must be >= 0 days".into()));
        }
        if self.duration_days > MAX_PLAN_DURATION_DAYS {
            return Err(LedgerError::Validation(format!(
                "plan duration must not exceed {} days",
                MAX_PLAN_DURATION_DAYS
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Active,
    Expired,
}

/// A purchase, with the plan terms frozen at purchase time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPlanOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub price: i64,
    pub granted_quota: i64,
    pub daily_quota: i64,
    pub duration_days: i64,
    pub start_time: i64,
    /// 0 means the order never expires.
    pub expire_time: i64,
    pub status: OrderStatus,
    pub created_time: i64,
    pub deleted_at: Option<i64>,
}

impl UserPlanOrder {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_expired_at(&self, now: i64) -> bool {
        self.status == OrderStatus::Active && self.expire_time > 0 && self.expire_time <= now
    }
}

/// Order contents before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub price: i64,
    pub granted_quota: i64,
    pub daily_quota: i64,
    pub duration_days: i64,
    pub start_time: i64,
    pub expire_time: i64,
}

impl NewOrder {
    /// Freezes the current terms of `plan` for a purchase made at `now`.
    pub fn snapshot(plan: &SubscriptionPlan, user_id: UserId, now: i64) -> Result<Self> {
        Ok(Self {
            user_id,
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            price: plan.price,
            granted_quota: plan.total_quota,
            daily_quota: plan.daily_quota,
            duration_days: plan.duration_days,
            start_time: now,
            expire_time: plan.expire_time_from(now)?,
        })
    }

    pub fn into_order(self, id: OrderId, now: i64) -> UserPlanOrder {
        UserPlanOrder {
            id,
            user_id: self.user_id,
            plan_id: self.plan_id,
            plan_name: self.plan_name,
            price: self.price,
            granted_quota: self.granted_quota,
            daily_quota: self.daily_quota,
            duration_days: self.duration_days,
            start_time: self.start_time,
            expire_time: self.expire_time,
            status: OrderStatus::Active,
            created_time: now,
            deleted_at: None,
        }
    }
}

/// Per-user totals of a plan's orders, and later the adjustment actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanRefund {
    pub user_id: UserId,
    /// Credited back to the pay-as-you-go balance.
    pub refund_quota: i64,
    /// Removed from the subscription balance.
    pub clear_quota: i64,
}

impl PlanRefund {
    pub fn is_noop(&self) -> bool {
        self.refund_quota == 0 && self.clear_quota == 0
    }
}
