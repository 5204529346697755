// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Every ledger mutation is recorded as a Change and only applied to the
// tables when the owning transaction commits. Rollback discards the list.
//
// ============================================================================

use crate::core::{BalanceField, PlanId, UserId};
use crate::ledger::UserPlanOrder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Add `delta` to one balance column of a user row.
    AdjustBalance {
        user_id: UserId,
        field: BalanceField,
        delta: i64,
    },

    /// Insert a purchase order.
    InsertOrder { order: UserPlanOrder },

    /// Soft-delete every order of a plan.
    DeletePlanOrders { plan_id: PlanId, deleted_at: i64 },

    /// Soft-delete a plan.
    DeletePlan { plan_id: PlanId, deleted_at: i64 },
}

impl Change {
    /// Table affected by this change
    pub fn table_name(&self) -> &'static str {
        match self {
            Change::AdjustBalance { .. } => "users",
            Change::InsertOrder { .. } | Change::DeletePlanOrders { .. } => "user_plan_orders",
            Change::DeletePlan { .. } => "subscription_plans",
        }
    }

    /// Pending delta this change adds to `field` of `user_id`.
    pub fn balance_delta(&self, user_id: UserId, field: BalanceField) -> i64 {
        match self {
            Change::AdjustBalance {
                user_id: target,
                field: target_field,
                delta,
            } if *target == user_id && *target_field == field => *delta,
            _ => 0,
        }
    }

    /// Whether this change writes a balance column of `user_id`.
    pub fn adjusts_user(&self, user_id: UserId) -> bool {
        matches!(self, Change::AdjustBalance { user_id: target, .. } if *target == user_id)
    }

    /// Check if this change deletes the given plan
    pub fn deletes_plan(&self, plan_id: PlanId) -> bool {
        matches!(self, Change::DeletePlan { plan_id: target, .. } if *target == plan_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_delta_only_counts_matching_user_and_field() {
        let change = Change::AdjustBalance {
            user_id: 1,
            field: BalanceField::Quota,
            delta: -200,
        };
        assert_eq!(change.balance_delta(1, BalanceField::Quota), -200);
        assert_eq!(change.balance_delta(1, BalanceField::SubscriptionQuota), 0);
        assert_eq!(change.balance_delta(2, BalanceField::Quota), 0);
        assert!(change.adjusts_user(1));
        assert!(!change.adjusts_user(2));
        assert_eq!(change.table_name(), "users");
    }

    #[test]
    fn delete_plan_is_detected() {
        let change = Change::DeletePlan {
            plan_id: 5,
            deleted_at: 10,
        };
        assert!(change.deletes_plan(5));
        assert!(!change.deletes_plan(6));
    }
}
