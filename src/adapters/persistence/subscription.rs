use async_trait::async_trait;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::{
    adapters::persistence::{PostgresPersistence, parse_json_with_fallback},
    app_error::{AppError, AppResult},
    application::use_cases::subscriptions::{NewHistoryEntry, NewSubscription, SubscriptionRepo},
    domain::entities::subscription::{ScheduledChange, Subscription, SubscriptionHistory},
};

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Subscription {
    let id: Uuid = row.get("id");
    let scheduled_change_json: serde_json::Value = row
        .get::<Option<serde_json::Value>, _>("scheduled_change")
        .unwrap_or(serde_json::Value::Null);
    let scheduled_change: Option<ScheduledChange> = parse_json_with_fallback(
        &scheduled_change_json,
        "scheduled_change",
        "subscription",
        &id.to_string(),
    );

    Subscription {
        id,
        user_id: row.get("user_id"),
        plan_id: row.get("plan_id"),
        status: row.get("status"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        trial_end: row.get("trial_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        canceled_at: row.get("canceled_at"),
        version: row.get("version"),
        scheduled_change,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_history(row: &sqlx::postgres::PgRow) -> SubscriptionHistory {
    SubscriptionHistory {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        action: row.get("action"),
        old_plan_id: row.get("old_plan_id"),
        new_plan_id: row.get("new_plan_id"),
        old_status: row.get("old_status"),
        new_status: row.get("new_status"),
        proration_amount: row.get("proration_amount"),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, user_id, plan_id, status, current_period_start, current_period_end,
    trial_end, cancel_at_period_end, canceled_at, version, scheduled_change,
    created_at, updated_at
"#;

const HISTORY_COLS: &str = r#"
    id, subscription_id, action, old_plan_id, new_plan_id,
    old_status, new_status, proration_amount, created_at
"#;

async fn append_history(
    tx: &mut Transaction<'_, Postgres>,
    subscription_id: Uuid,
    entry: &NewHistoryEntry,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO subscription_history
            (id, subscription_id, action, old_plan_id, new_plan_id,
             old_status, new_status, proration_amount)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(subscription_id)
    .bind(entry.action)
    .bind(entry.old_plan_id)
    .bind(entry.new_plan_id)
    .bind(entry.old_status)
    .bind(entry.new_status)
    .bind(entry.proration_amount)
    .execute(&mut **tx)
    .await
    .map_err(AppError::from)?;
    Ok(())
}

fn scheduled_change_json(change: Option<ScheduledChange>) -> AppResult<Option<serde_json::Value>> {
    change
        .map(|c| serde_json::to_value(c).map_err(|e| AppError::Internal(e.to_string())))
        .transpose()
}

#[async_trait]
impl SubscriptionRepo for PostgresPersistence {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE id = $1",
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn get_active_by_user(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE user_id = $1 AND status IN ('active', 'trialing')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn list_by_user(&self, user_id: Uuid) -> AppResult<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    async fn insert_with_history(
        &self,
        subscription: &NewSubscription,
        history: &NewHistoryEntry,
    ) -> AppResult<Subscription> {
        let mut tx = self.pool().begin().await.map_err(AppError::from)?;

        let id = Uuid::new_v4();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscriptions
                (id, user_id, plan_id, status, current_period_start,
                 current_period_end, trial_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(subscription.user_id)
        .bind(subscription.plan_id)
        .bind(subscription.status)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.trial_end)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let inserted = row_to_subscription(&row);
        append_history(&mut tx, inserted.id, history).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(inserted)
    }

    async fn update_guarded(
        &self,
        subscription: &Subscription,
        history: &NewHistoryEntry,
    ) -> AppResult<Subscription> {
        let mut tx = self.pool().begin().await.map_err(AppError::from)?;
        let scheduled_change = scheduled_change_json(subscription.scheduled_change)?;

        // Version check and bump in one statement; zero rows means a
        // concurrent writer already advanced the version.
        let row = sqlx::query(&format!(
            r#"
            UPDATE subscriptions SET
                plan_id = $3,
                status = $4,
                current_period_start = $5,
                current_period_end = $6,
                trial_end = $7,
                cancel_at_period_end = $8,
                canceled_at = $9,
                scheduled_change = $10,
                version = version + 1,
                updated_at = now()
            WHERE id = $1 AND version = $2
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(subscription.id)
        .bind(subscription.version)
        .bind(subscription.plan_id)
        .bind(subscription.status)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.trial_end)
        .bind(subscription.cancel_at_period_end)
        .bind(subscription.canceled_at)
        .bind(scheduled_change)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let Some(row) = row else {
            return Err(AppError::OptimisticLock);
        };

        let updated = row_to_subscription(&row);
        append_history(&mut tx, updated.id, history).await?;
        tx.commit().await.map_err(AppError::from)?;
        Ok(updated)
    }

    async fn list_history(&self, subscription_id: Uuid) -> AppResult<Vec<SubscriptionHistory>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_history WHERE subscription_id = $1 ORDER BY created_at",
            HISTORY_COLS
        ))
        .bind(subscription_id)
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_history).collect())
    }
}
