use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::payments::{NewPayment, PaymentRepo},
    domain::entities::payment::{FailureCode, Payment, PaymentRetryLog, PaymentStatus},
};

fn row_to_payment(row: &sqlx::postgres::PgRow) -> Payment {
    Payment {
        id: row.get("id"),
        invoice_id: row.get("invoice_id"),
        subscription_id: row.get("subscription_id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        status: row.get("status"),
        payment_method: row.get("payment_method"),
        payment_gateway: row.get("payment_gateway"),
        gateway_transaction_id: row.get("gateway_transaction_id"),
        failure_code: row.get::<Option<FailureCode>, _>("failure_code"),
        failure_message: row.get("failure_message"),
        retry_count: row.get("retry_count"),
        next_retry_at: row.get("next_retry_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_retry_log(row: &sqlx::postgres::PgRow) -> PaymentRetryLog {
    PaymentRetryLog {
        id: row.get("id"),
        payment_id: row.get("payment_id"),
        retry_attempt: row.get("retry_attempt"),
        status: row.get("status"),
        failure_reason: row.get("failure_reason"),
        attempted_at: row.get("attempted_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, invoice_id, subscription_id, user_id, amount, status,
    payment_method, payment_gateway, gateway_transaction_id,
    failure_code, failure_message, retry_count, next_retry_at,
    created_at, updated_at
"#;

const RETRY_LOG_COLS: &str = r#"
    id, payment_id, retry_attempt, status, failure_reason, attempted_at
"#;

async fn append_retry_log(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
    retry_attempt: i32,
    status: PaymentStatus,
    failure_reason: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO payment_retry_logs (id, payment_id, retry_attempt, status, failure_reason)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payment_id)
    .bind(retry_attempt)
    .bind(status)
    .bind(failure_reason)
    .execute(&mut **tx)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

#[async_trait]
impl PaymentRepo for PostgresPersistence {
    async fn insert(&self, payment: &NewPayment) -> AppResult<Payment> {
        let id = Uuid::new_v4();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payments
                (id, invoice_id, subscription_id, user_id, amount,
                 payment_method, payment_gateway)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(payment.invoice_id)
        .bind(payment.subscription_id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(&payment.payment_method)
        .bind(&payment.payment_gateway)
        .fetch_one(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row_to_payment(&row))
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_payment))
    }

    async fn list_by_invoice(&self, invoice_id: Uuid) -> AppResult<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE invoice_id = $1 ORDER BY created_at",
            SELECT_COLS
        ))
        .bind(invoice_id)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_payment).collect())
    }

    async fn claim_for_processing(&self, id: Uuid, max_retries: i32) -> AppResult<Payment> {
        let mut tx = self.pool().begin().await.map_err(AppError::from)?;

        // Row lock serializes concurrent attempts on the same payment for
        // the duration of the claim.
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE id = $1 FOR UPDATE",
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let Some(row) = row else {
            return Err(AppError::PaymentNotFound);
        };
        let payment = row_to_payment(&row);
        if !payment.is_attemptable(max_retries) {
            return Err(AppError::InvalidState(format!(
                "Payment is not attemptable (status {}, {} of {} retries used)",
                payment.status, payment.retry_count, max_retries
            )));
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET status = 'processing', updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::from)?;

        tx.commit().await.map_err(AppError::from)?;
        Ok(row_to_payment(&row))
    }

    async fn claim_due_retries(&self, max_retries: i32, limit: i64) -> AppResult<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"
            WITH claimed AS (
                UPDATE payments
                SET status = 'processing', updated_at = now()
                WHERE id IN (
                    SELECT id FROM payments
                    WHERE status = 'failed'
                      AND next_retry_at <= now()
                      AND retry_count < $1
                    ORDER BY next_retry_at
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING {}
            )
            SELECT {} FROM claimed
            "#,
            SELECT_COLS, SELECT_COLS
        ))
        .bind(max_retries)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_payment).collect())
    }

    async fn record_attempt_success(
        &self,
        id: Uuid,
        attempt: i32,
        transaction_id: &str,
    ) -> AppResult<Payment> {
        let mut tx = self.pool().begin().await.map_err(AppError::from)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET
                status = 'succeeded',
                gateway_transaction_id = $2,
                failure_code = NULL,
                failure_message = NULL,
                next_retry_at = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let Some(row) = row else {
            return Err(AppError::PaymentNotFound);
        };
        let updated = row_to_payment(&row);
        append_retry_log(&mut tx, id, attempt, PaymentStatus::Succeeded, None).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(updated)
    }

    async fn record_attempt_failure(
        &self,
        id: Uuid,
        attempt: i32,
        code: FailureCode,
        message: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> AppResult<Payment> {
        let mut tx = self.pool().begin().await.map_err(AppError::from)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET
                status = 'failed',
                retry_count = $2,
                failure_code = $3,
                failure_message = $4,
                next_retry_at = $5,
                updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(attempt)
        .bind(code)
        .bind(message)
        .bind(next_retry_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let Some(row) = row else {
            return Err(AppError::PaymentNotFound);
        };
        let updated = row_to_payment(&row);
        append_retry_log(&mut tx, id, attempt, PaymentStatus::Failed, Some(message)).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(updated)
    }

    async fn mark_refunded(&self, id: Uuid) -> AppResult<Payment> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments SET status = 'refunded', updated_at = now()
            WHERE id = $1 AND status = 'succeeded'
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        row.as_ref().map(row_to_payment).ok_or_else(|| {
            AppError::InvalidState("Only succeeded payments can be refunded".into())
        })
    }

    async fn list_retry_logs(&self, payment_id: Uuid) -> AppResult<Vec<PaymentRetryLog>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM payment_retry_logs
            WHERE payment_id = $1
            ORDER BY retry_attempt
            "#,
            RETRY_LOG_COLS
        ))
        .bind(payment_id)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_retry_log).collect())
    }
}
