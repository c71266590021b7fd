use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::gateway::{ChargeRequest, GatewayResponse, PaymentGateway},
    application::ports::invoice::InvoiceService,
    domain::entities::payment::{FailureCode, Payment, PaymentRetryLog},
};

/// How many due retries one sweep pass will claim.
const SWEEP_BATCH_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct CreatePaymentInput {
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_gateway: String,
}

/// Outcome of one `retry_failed_payments` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweepSummary {
    pub swept: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Payment storage. Attempts are serialized per row: `claim_for_processing`
/// flips the row to `Processing` under a row lock, and the `record_*` methods
/// write the outcome together with its retry-log row in one transaction.
#[async_trait]
pub trait PaymentRepo: Send + Sync {
    async fn insert(&self, payment: &NewPayment) -> AppResult<Payment>;
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Payment>>;
    async fn list_by_invoice(&self, invoice_id: Uuid) -> AppResult<Vec<Payment>>;

    /// Locks the row and moves it to `Processing` if an attempt is allowed
    /// (`Pending`, or `Failed` with retries remaining). Returns the claimed
    /// snapshot; [`AppError::InvalidState`] otherwise.
    async fn claim_for_processing(&self, id: Uuid, max_retries: i32) -> AppResult<Payment>;

    /// Claims every row due for retry (`Failed`, `next_retry_at <= now`,
    /// retries remaining), up to `limit`, skipping rows other workers hold.
    async fn claim_due_retries(&self, max_retries: i32, limit: i64) -> AppResult<Vec<Payment>>;

    async fn record_attempt_success(
        &self,
        id: Uuid,
        attempt: i32,
        transaction_id: &str,
    ) -> AppResult<Payment>;

    /// Records a failed attempt: bumps `retry_count` to `attempt`, stores the
    /// decline, and schedules (or clears) `next_retry_at`.
    async fn record_attempt_failure(
        &self,
        id: Uuid,
        attempt: i32,
        code: FailureCode,
        message: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> AppResult<Payment>;

    /// Conditional `Succeeded -> Refunded` flip; [`AppError::InvalidState`]
    /// if the row is in any other status.
    async fn mark_refunded(&self, id: Uuid) -> AppResult<Payment>;

    async fn list_retry_logs(&self, payment_id: Uuid) -> AppResult<Vec<PaymentRetryLog>>;
}

/// Owns the payment aggregate: attempt execution, failure classification,
/// durable retry scheduling, refunds. Declines are recovered into persisted
/// state, not raised; only exhausted retries leave a payment terminally
/// failed, and that too is a queryable state rather than an error.
#[derive(Clone)]
pub struct PaymentProcessor {
    payment_repo: Arc<dyn PaymentRepo>,
    gateway: Arc<dyn PaymentGateway>,
    invoice_service: Arc<dyn InvoiceService>,
    max_retries: i32,
    retry_delay_hours: i64,
}

impl PaymentProcessor {
    pub fn new(
        payment_repo: Arc<dyn PaymentRepo>,
        gateway: Arc<dyn PaymentGateway>,
        invoice_service: Arc<dyn InvoiceService>,
        max_retries: i32,
        retry_delay_hours: i64,
    ) -> Self {
        Self {
            payment_repo,
            gateway,
            invoice_service,
            max_retries,
            retry_delay_hours,
        }
    }

    pub async fn create_payment(&self, input: CreatePaymentInput) -> AppResult<Payment> {
        if input.amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(
                "Payment amount must be positive".into(),
            ));
        }

        let payment = self
            .payment_repo
            .insert(&NewPayment {
                invoice_id: input.invoice_id,
                subscription_id: input.subscription_id,
                user_id: input.user_id,
                amount: input.amount,
                payment_method: input.payment_method,
                payment_gateway: self.gateway.name().to_string(),
            })
            .await?;

        tracing::info!(
            payment_id = %payment.id,
            invoice_id = %payment.invoice_id,
            amount = %payment.amount,
            "Created payment"
        );
        Ok(payment)
    }

    /// Runs one gateway attempt. The returned payment reflects the outcome;
    /// a decline comes back as `Ok` with status `Failed` and, while retries
    /// remain, a scheduled `next_retry_at`.
    pub async fn process_payment(&self, id: Uuid) -> AppResult<Payment> {
        let claimed = self
            .payment_repo
            .claim_for_processing(id, self.max_retries)
            .await?;
        self.attempt_claimed(claimed).await
    }

    /// Scheduled sweep over payments whose persisted retry time has come due.
    /// One row's failure never aborts the rest of the batch.
    pub async fn retry_failed_payments(&self) -> AppResult<RetrySweepSummary> {
        let due = self
            .payment_repo
            .claim_due_retries(self.max_retries, SWEEP_BATCH_SIZE)
            .await?;

        let mut summary = RetrySweepSummary {
            swept: due.len(),
            ..Default::default()
        };

        for payment in due {
            let payment_id = payment.id;
            match self.attempt_claimed(payment).await {
                Ok(updated) if updated.status.is_successful() => summary.succeeded += 1,
                Ok(_) => summary.failed += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(
                        payment_id = %payment_id,
                        error = %err,
                        "Retry attempt could not be recorded"
                    );
                }
            }
        }

        Ok(summary)
    }

    pub async fn refund_payment(&self, id: Uuid) -> AppResult<Payment> {
        let payment = self
            .payment_repo
            .get_by_id(id)
            .await?
            .ok_or(AppError::PaymentNotFound)?;
        if !payment.status.is_successful() {
            return Err(AppError::InvalidState(
                "Only succeeded payments can be refunded".into(),
            ));
        }

        let refunded = self.payment_repo.mark_refunded(id).await?;
        self.invoice_service
            .void_invoice(refunded.invoice_id)
            .await?;

        tracing::info!(
            payment_id = %id,
            invoice_id = %refunded.invoice_id,
            "Refunded payment"
        );
        Ok(refunded)
    }

    pub async fn get_payment(&self, id: Uuid) -> AppResult<Payment> {
        self.payment_repo
            .get_by_id(id)
            .await?
            .ok_or(AppError::PaymentNotFound)
    }

    pub async fn get_invoice_payments(&self, invoice_id: Uuid) -> AppResult<Vec<Payment>> {
        self.payment_repo.list_by_invoice(invoice_id).await
    }

    pub async fn get_payment_retry_logs(
        &self,
        payment_id: Uuid,
    ) -> AppResult<Vec<PaymentRetryLog>> {
        self.payment_repo
            .get_by_id(payment_id)
            .await?
            .ok_or(AppError::PaymentNotFound)?;
        self.payment_repo.list_retry_logs(payment_id).await
    }

    /// Submits an already-claimed payment and records the outcome. Any error
    /// out of the gateway itself is folded into a `processing_error` decline
    /// rather than propagated.
    async fn attempt_claimed(&self, claimed: Payment) -> AppResult<Payment> {
        let charge = ChargeRequest {
            payment_id: claimed.id,
            invoice_id: claimed.invoice_id,
            user_id: claimed.user_id,
            amount: claimed.amount,
            payment_method: claimed.payment_method.clone(),
        };

        let response = match self.gateway.submit(&charge).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    payment_id = %claimed.id,
                    error = %err,
                    "Gateway errored; treating as processing failure"
                );
                GatewayResponse::Declined {
                    code: FailureCode::ProcessingError,
                    message: err.to_string(),
                }
            }
        };

        let attempt = claimed.retry_count + 1;
        match response {
            GatewayResponse::Approved { transaction_id } => {
                let updated = self
                    .payment_repo
                    .record_attempt_success(claimed.id, attempt, &transaction_id)
                    .await?;
                self.invoice_service
                    .mark_invoice_paid(updated.invoice_id)
                    .await?;
                tracing::info!(
                    payment_id = %claimed.id,
                    transaction_id = %transaction_id,
                    attempt,
                    "Payment succeeded"
                );
                Ok(updated)
            }
            GatewayResponse::Declined { code, message } => {
                let next_retry_at = (attempt < self.max_retries)
                    .then(|| Utc::now() + Duration::hours(self.retry_delay_hours));
                let updated = self
                    .payment_repo
                    .record_attempt_failure(claimed.id, attempt, code, &message, next_retry_at)
                    .await?;

                if next_retry_at.is_some() {
                    tracing::warn!(
                        payment_id = %claimed.id,
                        code = %code,
                        attempt,
                        "Payment failed; retry scheduled"
                    );
                } else {
                    tracing::warn!(
                        payment_id = %claimed.id,
                        code = %code,
                        attempt,
                        "Payment failed; retries exhausted"
                    );
                }
                Ok(updated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::payment::PaymentStatus;
    use crate::test_utils::billing_mocks::{
        FixedOutcomeGateway, InMemoryPaymentRepo, MockInvoiceService, ScriptedOutcome,
    };
    use crate::test_utils::factories;
    use rust_decimal_macros::dec;

    struct Fixture {
        payments: Arc<InMemoryPaymentRepo>,
        gateway: Arc<FixedOutcomeGateway>,
        invoices: Arc<MockInvoiceService>,
        processor: PaymentProcessor,
    }

    fn fixture(gateway: FixedOutcomeGateway) -> Fixture {
        let payments = Arc::new(InMemoryPaymentRepo::new());
        let gateway = Arc::new(gateway);
        let invoices = Arc::new(MockInvoiceService::new());
        let processor = PaymentProcessor::new(
            payments.clone(),
            gateway.clone(),
            invoices.clone(),
            3,
            24,
        );
        Fixture {
            payments,
            gateway,
            invoices,
            processor,
        }
    }

    fn input() -> CreatePaymentInput {
        CreatePaymentInput {
            invoice_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: dec!(29.99),
            payment_method: "card".into(),
        }
    }

    #[tokio::test]
    async fn create_starts_pending_with_no_retries() {
        let fx = fixture(FixedOutcomeGateway::approving());
        let payment = fx.processor.create_payment(input()).await.unwrap();

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.retry_count, 0);
        assert!(payment.next_retry_at.is_none());
        assert_eq!(payment.payment_gateway, "fixed");
    }

    #[tokio::test]
    async fn rejects_non_positive_amount() {
        let fx = fixture(FixedOutcomeGateway::approving());
        let result = fx
            .processor
            .create_payment(CreatePaymentInput {
                amount: dec!(0.00),
                ..input()
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn successful_attempt_settles_and_notifies_invoicing() {
        let fx = fixture(FixedOutcomeGateway::approving());
        let payment = fx.processor.create_payment(input()).await.unwrap();

        let settled = fx.processor.process_payment(payment.id).await.unwrap();
        assert_eq!(settled.status, PaymentStatus::Succeeded);
        assert!(settled.gateway_transaction_id.is_some());
        assert_eq!(settled.retry_count, 0);
        assert!(settled.next_retry_at.is_none());

        assert_eq!(fx.invoices.paid_invoices(), vec![payment.invoice_id]);

        let logs = fx.processor.get_payment_retry_logs(payment.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, PaymentStatus::Succeeded);
        assert_eq!(logs[0].retry_attempt, 1);
    }

    #[tokio::test]
    async fn decline_schedules_a_persisted_retry() {
        let fx = fixture(FixedOutcomeGateway::declining(FailureCode::CardDeclined));
        let payment = fx.processor.create_payment(input()).await.unwrap();

        let before = Utc::now();
        let failed = fx.processor.process_payment(payment.id).await.unwrap();

        assert_eq!(failed.status, PaymentStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.failure_code, Some(FailureCode::CardDeclined));
        let next = failed.next_retry_at.unwrap();
        assert!(next >= before + Duration::hours(24));
        assert!(fx.invoices.paid_invoices().is_empty());
    }

    #[tokio::test]
    async fn gateway_error_is_folded_into_processing_error() {
        let fx = fixture(FixedOutcomeGateway::erroring());
        let payment = fx.processor.create_payment(input()).await.unwrap();

        let failed = fx.processor.process_payment(payment.id).await.unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);
        assert_eq!(failed.failure_code, Some(FailureCode::ProcessingError));
        assert_eq!(failed.retry_count, 1);
    }

    #[tokio::test]
    async fn third_failure_exhausts_retries() {
        let fx = fixture(FixedOutcomeGateway::declining(
            FailureCode::InsufficientFunds,
        ));
        let payment = fx.processor.create_payment(input()).await.unwrap();

        for expected_attempt in 1..=3 {
            let failed = fx.processor.process_payment(payment.id).await.unwrap();
            assert_eq!(failed.retry_count, expected_attempt);
        }

        let terminal = fx.processor.get_payment(payment.id).await.unwrap();
        assert_eq!(terminal.status, PaymentStatus::Failed);
        assert_eq!(terminal.retry_count, 3);
        assert!(terminal.next_retry_at.is_none());

        let logs = fx.processor.get_payment_retry_logs(payment.id).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs.iter().all(|l| l.status == PaymentStatus::Failed));

        // A fourth manual attempt is refused and changes nothing.
        let result = fx.processor.process_payment(payment.id).await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));
        let untouched = fx.processor.get_payment(payment.id).await.unwrap();
        assert_eq!(untouched.retry_count, 3);
        assert_eq!(untouched.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn sweep_picks_up_due_payments_and_isolates_failures() {
        let fx = fixture(FixedOutcomeGateway::scripted(vec![
            ScriptedOutcome::Error,
            ScriptedOutcome::Approve,
        ]));

        // Distinct due times pin the claim order: oldest first.
        let first = fx.payments.seed(factories::failed_payment(
            dec!(10.00),
            1,
            Some(Utc::now() - Duration::hours(2)),
        ));
        let second = fx.payments.seed(factories::failed_payment(
            dec!(20.00),
            2,
            Some(Utc::now() - Duration::hours(1)),
        ));

        let summary = fx.processor.retry_failed_payments().await.unwrap();
        assert_eq!(summary.swept, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        // The transport error did not stop the second payment from settling.
        let settled = fx.processor.get_payment(second.id).await.unwrap();
        assert_eq!(settled.status, PaymentStatus::Succeeded);

        let still_failed = fx.processor.get_payment(first.id).await.unwrap();
        assert_eq!(still_failed.status, PaymentStatus::Failed);
        assert_eq!(still_failed.retry_count, 2);
        assert_eq!(fx.gateway.calls(), 2);
    }

    #[tokio::test]
    async fn sweep_never_selects_exhausted_or_undue_payments() {
        let fx = fixture(FixedOutcomeGateway::approving());

        let overdue = Utc::now() - Duration::hours(1);
        let exhausted = fx
            .payments
            .seed(factories::failed_payment(dec!(10.00), 3, None));
        let not_due = fx.payments.seed(factories::failed_payment(
            dec!(10.00),
            1,
            Some(Utc::now() + Duration::hours(12)),
        ));
        // Terminal row with a stale due time must still be skipped.
        let exhausted_stale = fx
            .payments
            .seed(factories::failed_payment(dec!(10.00), 3, Some(overdue)));

        let summary = fx.processor.retry_failed_payments().await.unwrap();
        assert_eq!(summary, RetrySweepSummary::default());
        assert_eq!(fx.gateway.calls(), 0);

        for id in [exhausted.id, not_due.id, exhausted_stale.id] {
            let payment = fx.processor.get_payment(id).await.unwrap();
            assert_eq!(payment.status, PaymentStatus::Failed);
        }
    }

    #[tokio::test]
    async fn refund_requires_a_succeeded_payment() {
        let fx = fixture(FixedOutcomeGateway::approving());
        let payment = fx.processor.create_payment(input()).await.unwrap();

        let early = fx.processor.refund_payment(payment.id).await;
        assert!(matches!(early, Err(AppError::InvalidState(_))));

        fx.processor.process_payment(payment.id).await.unwrap();
        let refunded = fx.processor.refund_payment(payment.id).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert_eq!(fx.invoices.voided_invoices(), vec![payment.invoice_id]);

        // Refund is not repeatable.
        let again = fx.processor.refund_payment(payment.id).await;
        assert!(matches!(again, Err(AppError::InvalidState(_))));
    }

    #[tokio::test]
    async fn concurrent_attempt_on_a_processing_payment_is_refused() {
        let fx = fixture(FixedOutcomeGateway::approving());
        let payment = fx.processor.create_payment(input()).await.unwrap();

        fx.payments
            .claim_for_processing(payment.id, 3)
            .await
            .unwrap();
        let second = fx.payments.claim_for_processing(payment.id, 3).await;
        assert!(matches!(second, Err(AppError::InvalidState(_))));
    }
}
