use sqlx::PgPool;

use crate::app_error::AppError;

const MAX_JSON_LOG_LEN: usize = 200;

/// Parse a JSONB value into a target type, logging a warning on failure.
///
/// SQL NULL arrives as `Value::Null` and is a valid empty state (returns the
/// default, no warning); only genuine corruption or type mismatches warn.
pub fn parse_json_with_fallback<T: serde::de::DeserializeOwned + Default>(
    json: &serde_json::Value,
    field_name: &str,
    entity_type: &str,
    entity_id: &str,
) -> T {
    if json.is_null() {
        return T::default();
    }

    serde_json::from_value(json.clone()).unwrap_or_else(|err| {
        let raw_str = json.to_string();
        let truncated = if raw_str.len() > MAX_JSON_LOG_LEN {
            format!("{}...", &raw_str[..MAX_JSON_LOG_LEN])
        } else {
            raw_str
        };

        tracing::warn!(
            field = field_name,
            entity_type = entity_type,
            entity_id = entity_id,
            raw_json = %truncated,
            error = %err,
            "Failed to parse JSON field, using default value"
        );
        T::default()
    })
}

pub mod payment;
pub mod plan;
pub mod subscription;

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::Database("Row not found".into()),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("duplicate key") || msg.contains("unique constraint") {
                    AppError::InvalidInput("A record with this value already exists".into())
                } else if msg.contains("foreign key") || msg.contains("violates foreign key") {
                    AppError::InvalidInput("Referenced record not found".into())
                } else if msg.contains("null value") && msg.contains("violates not-null") {
                    AppError::InvalidInput("Required field is missing".into())
                } else {
                    tracing::error!(error = ?err, "Database error");
                    AppError::Database("Database operation failed".into())
                }
            }
            _ => {
                tracing::error!(error = ?err, "Database error");
                AppError::Database("Database operation failed".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::subscription::ScheduledChange;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn parse_json_sql_null_returns_default() {
        let json = serde_json::Value::Null;
        let result: Option<ScheduledChange> =
            parse_json_with_fallback(&json, "scheduled_change", "subscription", "123");
        assert!(result.is_none());
    }

    #[test]
    fn parse_json_valid_scheduled_change() {
        let change = ScheduledChange {
            new_plan_id: Uuid::new_v4(),
            scheduled_at: Utc::now(),
        };
        let json = serde_json::to_value(change).unwrap();
        let result: Option<ScheduledChange> =
            parse_json_with_fallback(&json, "scheduled_change", "subscription", "123");
        assert_eq!(result, Some(change));
    }

    #[test]
    fn parse_json_corrupt_value_falls_back() {
        let json = serde_json::json!({"unexpected": "shape"});
        let result: Option<ScheduledChange> =
            parse_json_with_fallback(&json, "scheduled_change", "subscription", "123");
        assert!(result.is_none());
    }
}
