use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::plan::{BillingPeriod, Plan},
};

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlanInput {
    pub name: String,
    pub billing_period: BillingPeriod,
    pub price: Decimal,
    pub trial_days: i32,
    pub features: serde_json::Value,
}

#[async_trait]
pub trait PlanRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Plan>>;
    async fn list_active(&self) -> AppResult<Vec<Plan>>;
    async fn create(&self, input: &CreatePlanInput) -> AppResult<Plan>;
    /// Soft-deactivates; the row is kept for existing subscriptions.
    async fn deactivate(&self, id: Uuid) -> AppResult<Plan>;
}

/// Read-mostly catalog of plan definitions. Leaf dependency of the
/// subscription and payment components.
#[derive(Clone)]
pub struct PlanCatalog {
    plan_repo: Arc<dyn PlanRepo>,
}

impl PlanCatalog {
    pub fn new(plan_repo: Arc<dyn PlanRepo>) -> Self {
        Self { plan_repo }
    }

    pub async fn create_plan(&self, input: CreatePlanInput) -> AppResult<Plan> {
        if input.name.is_empty() || input.name.len() > 100 {
            return Err(AppError::InvalidInput(
                "Plan name must be 1-100 characters".into(),
            ));
        }
        if input.price < Decimal::ZERO {
            return Err(AppError::InvalidInput("Price cannot be negative".into()));
        }
        if input.trial_days < 0 {
            return Err(AppError::InvalidInput(
                "Trial days cannot be negative".into(),
            ));
        }

        let plan = self.plan_repo.create(&input).await?;
        tracing::info!(plan_id = %plan.id, name = %plan.name, "Created plan");
        Ok(plan)
    }

    pub async fn get_plan(&self, id: Uuid) -> AppResult<Plan> {
        self.plan_repo
            .get_by_id(id)
            .await?
            .ok_or(AppError::PlanNotFound)
    }

    pub async fn list_active_plans(&self) -> AppResult<Vec<Plan>> {
        self.plan_repo.list_active().await
    }

    pub async fn deactivate_plan(&self, id: Uuid) -> AppResult<Plan> {
        let plan = self.plan_repo.deactivate(id).await?;
        tracing::info!(plan_id = %plan.id, "Deactivated plan");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::billing_mocks::InMemoryPlanRepo;
    use rust_decimal_macros::dec;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(Arc::new(InMemoryPlanRepo::new()))
    }

    fn input() -> CreatePlanInput {
        CreatePlanInput {
            name: "Starter".into(),
            billing_period: BillingPeriod::Monthly,
            price: dec!(10.00),
            trial_days: 7,
            features: serde_json::json!({"seats": 3}),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_plan() {
        let catalog = catalog();
        let plan = catalog.create_plan(input()).await.unwrap();
        assert!(plan.is_active);

        let fetched = catalog.get_plan(plan.id).await.unwrap();
        assert_eq!(fetched.name, "Starter");
        assert_eq!(fetched.price, dec!(10.00));
    }

    #[tokio::test]
    async fn rejects_negative_price() {
        let result = catalog()
            .create_plan(CreatePlanInput {
                price: dec!(-1.00),
                ..input()
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn rejects_empty_name() {
        let result = catalog()
            .create_plan(CreatePlanInput {
                name: String::new(),
                ..input()
            })
            .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn missing_plan_is_not_found() {
        let result = catalog().get_plan(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::PlanNotFound)));
    }

    #[tokio::test]
    async fn deactivation_hides_plan_from_active_listing() {
        let catalog = catalog();
        let plan = catalog.create_plan(input()).await.unwrap();
        assert_eq!(catalog.list_active_plans().await.unwrap().len(), 1);

        let deactivated = catalog.deactivate_plan(plan.id).await.unwrap();
        assert!(!deactivated.is_active);
        assert!(catalog.list_active_plans().await.unwrap().is_empty());

        // Still readable by id for existing subscriptions.
        assert!(catalog.get_plan(plan.id).await.is_ok());
    }
}
