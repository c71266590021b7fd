use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{app_error::AppResult, domain::entities::payment::FailureCode};

/// A single charge submitted to the payment rail.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
}

/// What the gateway said about a charge. A decline is a normal answer,
/// not an error; `Err` from [`PaymentGateway::submit`] means the gateway
/// itself could not be reached or misbehaved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse {
    Approved { transaction_id: String },
    Declined { code: FailureCode, message: String },
}

/// Payment gateway port. Abstracts the real payment rail; this crate ships
/// only a simulated implementation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short identifier stamped onto payments (e.g. "simulated").
    fn name(&self) -> &'static str;

    async fn submit(&self, charge: &ChargeRequest) -> AppResult<GatewayResponse>;
}
