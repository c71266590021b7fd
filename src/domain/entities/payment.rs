use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, PaymentStatus::Succeeded)
    }

    /// Whether a new gateway attempt may be started from this status.
    /// `Failed` is only attemptable while retries remain; that check needs
    /// `retry_count` and lives on [`Payment::is_attemptable`].
    pub fn allows_attempt(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gateway decline classification. Matches the failure vocabulary of the
/// simulated gateway; `ProcessingError` also covers transport faults.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
    sqlx::Type,
)]
#[sqlx(type_name = "payment_failure_code", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FailureCode {
    InsufficientFunds,
    CardDeclined,
    ExpiredCard,
    ProcessingError,
}

impl FailureCode {
    /// Canned cardholder-facing message for the decline.
    pub fn message(&self) -> &'static str {
        match self {
            FailureCode::InsufficientFunds => "Your card has insufficient funds.",
            FailureCode::CardDeclined => "Your card was declined.",
            FailureCode::ExpiredCard => "Your card has expired.",
            FailureCode::ProcessingError => "An error occurred while processing your card.",
        }
    }

    /// Decline codes a gateway can return on its own; `ProcessingError` is
    /// reserved for faults on our side of the wire.
    pub fn gateway_declines() -> &'static [FailureCode] {
        &[
            FailureCode::InsufficientFunds,
            FailureCode::CardDeclined,
            FailureCode::ExpiredCard,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub payment_gateway: String,
    pub gateway_transaction_id: Option<String>,
    pub failure_code: Option<FailureCode>,
    pub failure_message: Option<String>,
    pub retry_count: i32,
    /// Persisted due time for the next retry. Non-null only while
    /// status = Failed and retries remain, which makes the retry schedule
    /// survive process restarts.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_attemptable(&self, max_retries: i32) -> bool {
        self.status.allows_attempt() && self.retry_count < max_retries
    }
}

/// Append-only record of a single gateway attempt, success or failure.
#[derive(Debug, Clone)]
pub struct PaymentRetryLog {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub retry_attempt: i32,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment(status: PaymentStatus, retry_count: i32) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: dec!(10.00),
            status,
            payment_method: "card".into(),
            payment_gateway: "simulated".into(),
            gateway_transaction_id: None,
            failure_code: None,
            failure_message: None,
            retry_count,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn attemptable_states() {
        assert!(payment(PaymentStatus::Pending, 0).is_attemptable(3));
        assert!(payment(PaymentStatus::Failed, 2).is_attemptable(3));
        assert!(!payment(PaymentStatus::Failed, 3).is_attemptable(3));
        assert!(!payment(PaymentStatus::Processing, 0).is_attemptable(3));
        assert!(!payment(PaymentStatus::Succeeded, 0).is_attemptable(3));
        assert!(!payment(PaymentStatus::Refunded, 0).is_attemptable(3));
    }

    #[test]
    fn failure_code_strings() {
        assert_eq!(FailureCode::InsufficientFunds.as_ref(), "insufficient_funds");
        assert_eq!(
            "processing_error".parse::<FailureCode>().unwrap(),
            FailureCode::ProcessingError
        );
        assert!("gremlins".parse::<FailureCode>().is_err());
    }

    #[test]
    fn gateway_declines_exclude_processing_error() {
        assert!(!FailureCode::gateway_declines().contains(&FailureCode::ProcessingError));
    }
}
