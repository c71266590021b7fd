use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::{
    app_error::AppResult,
    application::ports::gateway::{ChargeRequest, GatewayResponse, PaymentGateway},
    domain::entities::payment::FailureCode,
};

/// Simulated payment rail. Approves roughly nine charges in ten and declines
/// the rest with one of the canned card failures, without any external call.
#[derive(Clone)]
pub struct SimulatedGateway {
    approval_rate: f64,
}

impl SimulatedGateway {
    pub fn new(approval_rate: f64) -> Self {
        Self {
            approval_rate: approval_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(0.9)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn submit(&self, charge: &ChargeRequest) -> AppResult<GatewayResponse> {
        let mut rng = rand::thread_rng();

        if rng.gen_bool(self.approval_rate) {
            let transaction_id = format!("sim_txn_{}", Uuid::new_v4());
            tracing::debug!(
                payment_id = %charge.payment_id,
                transaction_id = %transaction_id,
                amount = %charge.amount,
                "Simulated gateway approved charge"
            );
            return Ok(GatewayResponse::Approved { transaction_id });
        }

        let code = *FailureCode::gateway_declines()
            .choose(&mut rng)
            .unwrap_or(&FailureCode::CardDeclined);
        tracing::debug!(
            payment_id = %charge.payment_id,
            code = %code,
            "Simulated gateway declined charge"
        );
        Ok(GatewayResponse::Declined {
            code,
            message: code.message().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn charge() -> ChargeRequest {
        ChargeRequest {
            payment_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: dec!(9.99),
            payment_method: "card".into(),
        }
    }

    #[tokio::test]
    async fn always_approves_at_rate_one() {
        let gateway = SimulatedGateway::new(1.0);
        for _ in 0..50 {
            let response = gateway.submit(&charge()).await.unwrap();
            match response {
                GatewayResponse::Approved { transaction_id } => {
                    assert!(transaction_id.starts_with("sim_txn_"));
                }
                GatewayResponse::Declined { .. } => panic!("unexpected decline"),
            }
        }
    }

    #[tokio::test]
    async fn declines_use_canned_card_failures_only() {
        let gateway = SimulatedGateway::new(0.0);
        for _ in 0..50 {
            let response = gateway.submit(&charge()).await.unwrap();
            match response {
                GatewayResponse::Declined { code, message } => {
                    assert!(FailureCode::gateway_declines().contains(&code));
                    assert_eq!(message, code.message());
                }
                GatewayResponse::Approved { .. } => panic!("unexpected approval"),
            }
        }
    }

    #[test]
    fn approval_rate_is_clamped() {
        assert_eq!(SimulatedGateway::new(7.0).approval_rate, 1.0);
        assert_eq!(SimulatedGateway::new(-1.0).approval_rate, 0.0);
    }
}
