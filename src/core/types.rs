use super::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type PlanId = i64;
pub type OrderId = i64;
pub type TaskRowId = i64;
pub type ChannelId = i64;

/// Seconds in one day, used to turn plan durations into expire times.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Largest page size a listing accepts.
pub const MAX_PAGE_SIZE: usize = 100;

/// Row offset of the zero-based `page`.
pub fn page_offset(page: usize, page_size: usize) -> Result<usize> {
    page.checked_mul(page_size)
        .ok_or_else(|| LedgerError::Validation(format!("page {} is out of range", page)))
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The two balance columns of a user row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceField {
    /// Pay-as-you-go balance.
    Quota,
    /// Prepaid balance granted by plan purchases.
    SubscriptionQuota,
}

impl BalanceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceField::Quota => "quota",
            BalanceField::SubscriptionQuota => "subscription_quota",
        }
    }
}

impl std::fmt::Display for BalanceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative balance row of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: UserId,
    pub quota: i64,
    pub subscription_quota: i64,
    /// Bumped by every committed balance change of the row.
    #[serde(default)]
    pub version: u64,
}

impl UserBalance {
    pub fn new(user_id: UserId, quota: i64, subscription_quota: i64) -> Self {
        Self {
            user_id,
            quota,
            subscription_quota,
            version: 0,
        }
    }

    pub fn get(&self, field: BalanceField) -> i64 {
        match field {
            BalanceField::Quota => self.quota,
            BalanceField::SubscriptionQuota => self.subscription_quota,
        }
    }

    pub fn apply(&mut self, field: BalanceField, delta: i64) {
        match field {
            BalanceField::Quota => self.quota += delta,
            BalanceField::SubscriptionQuota => self.subscription_quota += delta,
        }
    }
}

/// A committed change to one balance column, stamped with the row version
/// it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub user_id: UserId,
    pub field: BalanceField,
    pub delta: i64,
    pub version: u64,
}

/// One page of a listing plus the total number of matching rows.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
