//! Entity builders for tests.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::entities::payment::{FailureCode, Payment, PaymentStatus};
use crate::domain::entities::plan::{BillingPeriod, Plan};

pub fn plan(billing_period: BillingPeriod, price: Decimal, trial_days: i32) -> Plan {
    let now = Utc::now();
    Plan {
        id: Uuid::new_v4(),
        name: format!("{} plan @ {}", billing_period, price),
        billing_period,
        price,
        trial_days,
        features: serde_json::json!({}),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// A payment that already failed `retry_count` times, optionally scheduled
/// for another retry at `next_retry_at`.
pub fn failed_payment(
    amount: Decimal,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
) -> Payment {
    let now = Utc::now();
    Payment {
        id: Uuid::new_v4(),
        invoice_id: Uuid::new_v4(),
        subscription_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        amount,
        status: PaymentStatus::Failed,
        payment_method: "card".into(),
        payment_gateway: "fixed".into(),
        gateway_transaction_id: None,
        failure_code: Some(FailureCode::CardDeclined),
        failure_message: Some(FailureCode::CardDeclined.message().into()),
        retry_count,
        next_retry_at,
        created_at: now,
        updated_at: now,
    }
}
