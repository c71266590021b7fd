use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::plan_catalog::{CreatePlanInput, PlanRepo},
    domain::entities::plan::Plan,
};

fn row_to_plan(row: &sqlx::postgres::PgRow) -> Plan {
    Plan {
        id: row.get("id"),
        name: row.get("name"),
        billing_period: row.get("billing_period"),
        price: row.get("price"),
        trial_days: row.get("trial_days"),
        features: row.get("features"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, name, billing_period, price, trial_days, features, is_active,
    created_at, updated_at
"#;

#[async_trait]
impl PlanRepo for PostgresPersistence {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Plan>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM plans WHERE id = $1",
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_plan))
    }

    async fn list_active(&self) -> AppResult<Vec<Plan>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plans WHERE is_active = TRUE ORDER BY created_at",
            SELECT_COLS
        ))
        .fetch_all(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_plan).collect())
    }

    async fn create(&self, input: &CreatePlanInput) -> AppResult<Plan> {
        let id = Uuid::new_v4();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO plans (id, name, billing_period, price, trial_days, features)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(&input.name)
        .bind(input.billing_period)
        .bind(input.price)
        .bind(input.trial_days)
        .bind(&input.features)
        .fetch_one(self.pool())
        .await
        .map_err(AppError::from)?;
        Ok(row_to_plan(&row))
    }

    async fn deactivate(&self, id: Uuid) -> AppResult<Plan> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE plans SET is_active = FALSE, updated_at = now()
            WHERE id = $1
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(AppError::from)?;
        row.as_ref().map(row_to_plan).ok_or(AppError::PlanNotFound)
    }
}
