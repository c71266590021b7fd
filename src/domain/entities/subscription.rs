use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Returns true if the subscriber should have access to plan features.
    pub fn is_entitled(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A plan change requested for the next renewal rather than immediately.
/// Applied (and cleared) when the period rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledChange {
    pub new_plan_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    /// Optimistic-lock token. Every guarded write checks and increments it;
    /// a stale writer loses instead of blocking.
    pub version: i64,
    pub scheduled_change: Option<ScheduledChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "history_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    PlanChanged,
    CanceledImmediate,
    CanceledAtPeriodEnd,
    Reactivated,
    Renewed,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::PlanChanged => "plan_changed",
            HistoryAction::CanceledImmediate => "canceled_immediate",
            HistoryAction::CanceledAtPeriodEnd => "canceled_at_period_end",
            HistoryAction::Reactivated => "reactivated",
            HistoryAction::Renewed => "renewed",
        }
    }
}

/// Append-only audit row. One per successful mutation, written in the same
/// transaction as the mutation itself.
#[derive(Debug, Clone)]
pub struct SubscriptionHistory {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub action: HistoryAction,
    pub old_plan_id: Option<Uuid>,
    pub new_plan_id: Option<Uuid>,
    pub old_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    pub proration_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entitlement_by_status() {
        assert!(SubscriptionStatus::Active.is_entitled());
        assert!(SubscriptionStatus::Trialing.is_entitled());
        assert!(!SubscriptionStatus::PastDue.is_entitled());
        assert!(!SubscriptionStatus::Canceled.is_entitled());
    }

    #[test]
    fn history_action_strings() {
        assert_eq!(HistoryAction::Created.as_str(), "created");
        assert_eq!(
            HistoryAction::CanceledAtPeriodEnd.as_str(),
            "canceled_at_period_end"
        );
    }

    #[test]
    fn scheduled_change_round_trips_as_json() {
        let change = ScheduledChange {
            new_plan_id: Uuid::new_v4(),
            scheduled_at: Utc::now(),
        };
        let value = serde_json::to_value(change).unwrap();
        let back: ScheduledChange = serde_json::from_value(value).unwrap();
        assert_eq!(back, change);
    }
}
