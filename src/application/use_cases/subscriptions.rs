use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::use_cases::plan_catalog::PlanRepo,
    domain::entities::plan::Plan,
    domain::entities::subscription::{
        HistoryAction, ScheduledChange, Subscription, SubscriptionHistory, SubscriptionStatus,
    },
    domain::proration::{self, ProrationCalculation},
};

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub action: HistoryAction,
    pub old_plan_id: Option<Uuid>,
    pub new_plan_id: Option<Uuid>,
    pub old_status: Option<SubscriptionStatus>,
    pub new_status: Option<SubscriptionStatus>,
    pub proration_amount: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct PlanChangeOutcome {
    pub subscription: Subscription,
    /// Present for immediate changes; a deferred change prorates nothing.
    pub proration: Option<ProrationCalculation>,
}

/// Subscription storage. Both mutating methods write the history row in the
/// same transaction as the subscription row; a failed append aborts the
/// mutation, so version and history can never diverge.
#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>>;
    async fn get_active_by_user(&self, user_id: Uuid) -> AppResult<Option<Subscription>>;
    async fn list_by_user(&self, user_id: Uuid) -> AppResult<Vec<Subscription>>;

    /// Inserts at version 0 together with its `created` history row.
    async fn insert_with_history(
        &self,
        subscription: &NewSubscription,
        history: &NewHistoryEntry,
    ) -> AppResult<Subscription>;

    /// Conditional write: persists `subscription`'s mutable fields only if
    /// the stored version still equals `subscription.version`, incrementing
    /// it by one. Zero rows matched means another writer won —
    /// [`AppError::OptimisticLock`].
    async fn update_guarded(
        &self,
        subscription: &Subscription,
        history: &NewHistoryEntry,
    ) -> AppResult<Subscription>;

    async fn list_history(&self, subscription_id: Uuid) -> AppResult<Vec<SubscriptionHistory>>;
}

/// Owns the subscription aggregate: lifecycle transitions, optimistic-lock
/// enforcement, history logging. Lock conflicts are surfaced, never retried
/// here — retry policy belongs to the caller.
#[derive(Clone)]
pub struct SubscriptionManager {
    plan_repo: Arc<dyn PlanRepo>,
    subscription_repo: Arc<dyn SubscriptionRepo>,
}

impl SubscriptionManager {
    pub fn new(plan_repo: Arc<dyn PlanRepo>, subscription_repo: Arc<dyn SubscriptionRepo>) -> Self {
        Self {
            plan_repo,
            subscription_repo,
        }
    }

    async fn require_subscription(&self, id: Uuid) -> AppResult<Subscription> {
        self.subscription_repo
            .get_by_id(id)
            .await?
            .ok_or(AppError::SubscriptionNotFound)
    }

    async fn require_plan(&self, id: Uuid) -> AppResult<Plan> {
        self.plan_repo
            .get_by_id(id)
            .await?
            .ok_or(AppError::PlanNotFound)
    }

    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        start_date: DateTime<Utc>,
    ) -> AppResult<Subscription> {
        let plan = self.require_plan(plan_id).await?;
        if !plan.is_active {
            return Err(AppError::InvalidInput(
                "Cannot subscribe to an inactive plan".into(),
            ));
        }

        let current_period_end = plan.billing_period.period_end_from(start_date);
        let trial_end = plan
            .has_trial()
            .then(|| start_date + Duration::days(plan.trial_days as i64));
        let status = if trial_end.is_some() {
            SubscriptionStatus::Trialing
        } else {
            SubscriptionStatus::Active
        };

        let subscription = self
            .subscription_repo
            .insert_with_history(
                &NewSubscription {
                    user_id,
                    plan_id,
                    status,
                    current_period_start: start_date,
                    current_period_end,
                    trial_end,
                },
                &NewHistoryEntry {
                    action: HistoryAction::Created,
                    old_plan_id: None,
                    new_plan_id: Some(plan_id),
                    old_status: None,
                    new_status: Some(status),
                    proration_amount: None,
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %user_id,
            plan_id = %plan_id,
            status = %status,
            "Created subscription"
        );
        Ok(subscription)
    }

    /// Upgrade or downgrade. Immediate changes prorate the remainder of the
    /// current period; deferred changes park a [`ScheduledChange`] that
    /// [`Self::renew_subscription`] applies at rollover.
    pub async fn change_plan(
        &self,
        id: Uuid,
        new_plan_id: Uuid,
        immediate: bool,
    ) -> AppResult<PlanChangeOutcome> {
        let subscription = self.require_subscription(id).await?;
        if subscription.status.is_canceled() {
            return Err(AppError::InvalidState(
                "Cannot change plan on a canceled subscription".into(),
            ));
        }

        let old_plan = self.require_plan(subscription.plan_id).await?;
        let new_plan = self.require_plan(new_plan_id).await?;
        if !new_plan.is_active {
            return Err(AppError::InvalidInput(
                "Cannot change to an inactive plan".into(),
            ));
        }
        if old_plan.billing_period != new_plan.billing_period {
            return Err(AppError::IncompatibleBillingPeriod {
                current: old_plan.billing_period,
                requested: new_plan.billing_period,
            });
        }

        let now = Utc::now();
        let mut updated = subscription.clone();
        let (proration, recorded_amount) = if immediate {
            let calc = proration::calculate_proration(
                old_plan.price,
                new_plan.price,
                subscription.current_period_start,
                subscription.current_period_end,
                now,
            );
            updated.plan_id = new_plan_id;
            (Some(calc), calc.net_amount)
        } else {
            updated.scheduled_change = Some(ScheduledChange {
                new_plan_id,
                scheduled_at: now,
            });
            (None, Decimal::ZERO)
        };

        let subscription = self
            .subscription_repo
            .update_guarded(
                &updated,
                &NewHistoryEntry {
                    action: HistoryAction::PlanChanged,
                    old_plan_id: Some(old_plan.id),
                    new_plan_id: Some(new_plan_id),
                    old_status: Some(subscription.status),
                    new_status: Some(updated.status),
                    proration_amount: Some(recorded_amount),
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %id,
            old_plan_id = %old_plan.id,
            new_plan_id = %new_plan_id,
            immediate,
            net_amount = %recorded_amount,
            "Changed subscription plan"
        );
        Ok(PlanChangeOutcome {
            subscription,
            proration,
        })
    }

    pub async fn cancel_subscription(&self, id: Uuid, immediate: bool) -> AppResult<Subscription> {
        let subscription = self.require_subscription(id).await?;
        if subscription.status.is_canceled() {
            return Err(AppError::InvalidState(
                "Subscription is already canceled".into(),
            ));
        }

        let mut updated = subscription.clone();
        updated.canceled_at = Some(Utc::now());
        let action = if immediate {
            updated.status = SubscriptionStatus::Canceled;
            HistoryAction::CanceledImmediate
        } else {
            // Status stays as-is until the period rolls over; the flag is
            // what renewal checks.
            updated.cancel_at_period_end = true;
            HistoryAction::CanceledAtPeriodEnd
        };

        let subscription = self
            .subscription_repo
            .update_guarded(
                &updated,
                &NewHistoryEntry {
                    action,
                    old_plan_id: Some(subscription.plan_id),
                    new_plan_id: Some(subscription.plan_id),
                    old_status: Some(subscription.status),
                    new_status: Some(updated.status),
                    proration_amount: None,
                },
            )
            .await?;

        tracing::info!(subscription_id = %id, immediate, "Canceled subscription");
        Ok(subscription)
    }

    /// Undoes a cancellation (immediate or pending). Forces `Active`, which
    /// deliberately ends any remaining trial.
    pub async fn reactivate_subscription(&self, id: Uuid) -> AppResult<Subscription> {
        let subscription = self.require_subscription(id).await?;
        if !subscription.status.is_canceled() && !subscription.cancel_at_period_end {
            return Err(AppError::InvalidState(
                "Subscription is not canceled".into(),
            ));
        }

        let mut updated = subscription.clone();
        updated.status = SubscriptionStatus::Active;
        updated.cancel_at_period_end = false;
        updated.canceled_at = None;

        let subscription = self
            .subscription_repo
            .update_guarded(
                &updated,
                &NewHistoryEntry {
                    action: HistoryAction::Reactivated,
                    old_plan_id: Some(subscription.plan_id),
                    new_plan_id: Some(subscription.plan_id),
                    old_status: Some(subscription.status),
                    new_status: Some(SubscriptionStatus::Active),
                    proration_amount: None,
                },
            )
            .await?;

        tracing::info!(subscription_id = %id, "Reactivated subscription");
        Ok(subscription)
    }

    /// Rolls the billing period forward. A pending cancellation is finalized
    /// here instead of renewing; a pending plan change takes effect here.
    pub async fn renew_subscription(&self, id: Uuid) -> AppResult<Subscription> {
        let subscription = self.require_subscription(id).await?;
        if subscription.status.is_canceled() {
            return Err(AppError::InvalidState(
                "Cannot renew a canceled subscription".into(),
            ));
        }

        if subscription.cancel_at_period_end {
            let mut updated = subscription.clone();
            updated.status = SubscriptionStatus::Canceled;
            updated.cancel_at_period_end = false;

            let subscription = self
                .subscription_repo
                .update_guarded(
                    &updated,
                    &NewHistoryEntry {
                        action: HistoryAction::CanceledAtPeriodEnd,
                        old_plan_id: Some(subscription.plan_id),
                        new_plan_id: Some(subscription.plan_id),
                        old_status: Some(subscription.status),
                        new_status: Some(SubscriptionStatus::Canceled),
                        proration_amount: None,
                    },
                )
                .await?;

            tracing::info!(subscription_id = %id, "Finalized pending cancellation at period end");
            return Ok(subscription);
        }

        let renewal_plan_id = subscription
            .scheduled_change
            .map(|change| change.new_plan_id)
            .unwrap_or(subscription.plan_id);
        let plan = self.require_plan(renewal_plan_id).await?;

        let period_start = subscription.current_period_end;
        let mut updated = subscription.clone();
        updated.plan_id = renewal_plan_id;
        updated.status = SubscriptionStatus::Active;
        updated.current_period_start = period_start;
        updated.current_period_end = plan.billing_period.period_end_from(period_start);
        updated.scheduled_change = None;

        let renewed = self
            .subscription_repo
            .update_guarded(
                &updated,
                &NewHistoryEntry {
                    action: HistoryAction::Renewed,
                    old_plan_id: Some(subscription.plan_id),
                    new_plan_id: Some(renewal_plan_id),
                    old_status: Some(subscription.status),
                    new_status: Some(SubscriptionStatus::Active),
                    proration_amount: None,
                },
            )
            .await?;

        tracing::info!(
            subscription_id = %id,
            plan_id = %renewal_plan_id,
            period_end = %renewed.current_period_end,
            "Renewed subscription"
        );
        Ok(renewed)
    }

    pub async fn get_subscription(&self, id: Uuid) -> AppResult<Subscription> {
        self.require_subscription(id).await
    }

    pub async fn get_active_subscription(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        self.subscription_repo.get_active_by_user(user_id).await
    }

    pub async fn get_user_subscriptions(&self, user_id: Uuid) -> AppResult<Vec<Subscription>> {
        self.subscription_repo.list_by_user(user_id).await
    }

    pub async fn get_subscription_history(
        &self,
        id: Uuid,
    ) -> AppResult<Vec<SubscriptionHistory>> {
        self.require_subscription(id).await?;
        self.subscription_repo.list_history(id).await
    }
}
