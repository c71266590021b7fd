use thiserror::Error;

use crate::domain::entities::payment::FailureCode;
use crate::domain::entities::plan::BillingPeriod;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Plan not found")]
    PlanNotFound,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    /// Cross-period plan changes are unsupported; cancel and recreate instead.
    #[error("Incompatible billing period: subscription is {current}, requested plan is {requested}")]
    IncompatibleBillingPeriod {
        current: BillingPeriod,
        requested: BillingPeriod,
    },

    /// Another writer won the version race. Callers retry with a fresh read;
    /// the engine never retries subscription writes on its own.
    #[error("Subscription was modified concurrently; reload and retry")]
    OptimisticLock,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Gateway failure ({code}): {message}")]
    Gateway { code: FailureCode, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;
