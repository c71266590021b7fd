use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "billing_period", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Some(BillingPeriod::Monthly),
            "yearly" | "year" | "annual" => Some(BillingPeriod::Yearly),
            _ => None,
        }
    }

    /// Calendar end of a billing period that starts at `start`.
    /// Month arithmetic clamps to the last day of shorter months
    /// (Jan 31 + 1 month = Feb 28/29).
    pub fn period_end_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            BillingPeriod::Monthly => start + Months::new(1),
            BillingPeriod::Yearly => start + Months::new(12),
        }
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A billable plan. Immutable once referenced by a subscription;
/// retirement is a soft `is_active` flip, never a delete.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub billing_period: BillingPeriod,
    pub price: Decimal,
    pub trial_days: i32,
    /// Opaque feature map, passed through to clients untouched.
    pub features: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn has_trial(&self) -> bool {
        self.trial_days > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_end_monthly_is_calendar_month() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = BillingPeriod::Monthly.period_end_from(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn period_end_monthly_clamps_short_months() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();
        let end = BillingPeriod::Monthly.period_end_from(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap());
    }

    #[test]
    fn period_end_yearly() {
        let start = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        let end = BillingPeriod::Yearly.period_end_from(start);
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn from_str_accepts_aliases() {
        assert_eq!(BillingPeriod::from_str("Monthly"), Some(BillingPeriod::Monthly));
        assert_eq!(BillingPeriod::from_str("year"), Some(BillingPeriod::Yearly));
        assert_eq!(BillingPeriod::from_str("weekly"), None);
    }
}
