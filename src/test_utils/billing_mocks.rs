//! In-memory mock implementations for the billing repository and port traits.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::gateway::{ChargeRequest, GatewayResponse, PaymentGateway},
    application::ports::invoice::InvoiceService,
    application::use_cases::payments::{NewPayment, PaymentRepo},
    application::use_cases::plan_catalog::{CreatePlanInput, PlanRepo},
    application::use_cases::subscriptions::{NewHistoryEntry, NewSubscription, SubscriptionRepo},
    domain::entities::payment::{FailureCode, Payment, PaymentRetryLog, PaymentStatus},
    domain::entities::plan::Plan,
    domain::entities::subscription::{Subscription, SubscriptionHistory},
};

// ============================================================================
// InMemoryPlanRepo
// ============================================================================

#[derive(Default)]
pub struct InMemoryPlanRepo {
    pub plans: Mutex<HashMap<Uuid, Plan>>,
}

impl InMemoryPlanRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built plan, bypassing validation.
    pub fn seed(&self, plan: Plan) -> Plan {
        self.plans.lock().unwrap().insert(plan.id, plan.clone());
        plan
    }
}

#[async_trait]
impl PlanRepo for InMemoryPlanRepo {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Plan>> {
        Ok(self.plans.lock().unwrap().get(&id).cloned())
    }

    async fn list_active(&self) -> AppResult<Vec<Plan>> {
        let mut plans: Vec<Plan> = self
            .plans
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| p.created_at);
        Ok(plans)
    }

    async fn create(&self, input: &CreatePlanInput) -> AppResult<Plan> {
        let now = Utc::now();
        let plan = Plan {
            id: Uuid::new_v4(),
            name: input.name.clone(),
            billing_period: input.billing_period,
            price: input.price,
            trial_days: input.trial_days,
            features: input.features.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.plans.lock().unwrap().insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn deactivate(&self, id: Uuid) -> AppResult<Plan> {
        let mut plans = self.plans.lock().unwrap();
        let plan = plans.get_mut(&id).ok_or(AppError::PlanNotFound)?;
        plan.is_active = false;
        plan.updated_at = Utc::now();
        Ok(plan.clone())
    }
}

// ============================================================================
// InMemorySubscriptionRepo
// ============================================================================

#[derive(Default)]
struct SubscriptionStore {
    subscriptions: HashMap<Uuid, Subscription>,
    history: Vec<SubscriptionHistory>,
}

/// Subscriptions and their history live behind one lock so a guarded update
/// and its history append are atomic, like the real transaction.
#[derive(Default)]
pub struct InMemorySubscriptionRepo {
    store: Mutex<SubscriptionStore>,
}

impl InMemorySubscriptionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

fn history_row(subscription_id: Uuid, entry: &NewHistoryEntry) -> SubscriptionHistory {
    SubscriptionHistory {
        id: Uuid::new_v4(),
        subscription_id,
        action: entry.action,
        old_plan_id: entry.old_plan_id,
        new_plan_id: entry.new_plan_id,
        old_status: entry.old_status,
        new_status: entry.new_status,
        proration_amount: entry.proration_amount,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl SubscriptionRepo for InMemorySubscriptionRepo {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self.store.lock().unwrap().subscriptions.get(&id).cloned())
    }

    async fn get_active_by_user(&self, user_id: Uuid) -> AppResult<Option<Subscription>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.status.is_entitled())
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> AppResult<Vec<Subscription>> {
        let mut subs: Vec<Subscription> = self
            .store
            .lock()
            .unwrap()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.created_at);
        Ok(subs)
    }

    async fn insert_with_history(
        &self,
        subscription: &NewSubscription,
        history: &NewHistoryEntry,
    ) -> AppResult<Subscription> {
        let now = Utc::now();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: subscription.user_id,
            plan_id: subscription.plan_id,
            status: subscription.status,
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            trial_end: subscription.trial_end,
            cancel_at_period_end: false,
            canceled_at: None,
            version: 0,
            scheduled_change: None,
            created_at: now,
            updated_at: now,
        };

        let mut store = self.store.lock().unwrap();
        store.subscriptions.insert(sub.id, sub.clone());
        store.history.push(history_row(sub.id, history));
        Ok(sub)
    }

    async fn update_guarded(
        &self,
        subscription: &Subscription,
        history: &NewHistoryEntry,
    ) -> AppResult<Subscription> {
        let mut store = self.store.lock().unwrap();
        let current = store
            .subscriptions
            .get(&subscription.id)
            .ok_or(AppError::SubscriptionNotFound)?;
        if current.version != subscription.version {
            return Err(AppError::OptimisticLock);
        }

        let mut updated = subscription.clone();
        updated.version = subscription.version + 1;
        updated.updated_at = Utc::now();
        store.subscriptions.insert(updated.id, updated.clone());
        store.history.push(history_row(updated.id, history));
        Ok(updated)
    }

    async fn list_history(&self, subscription_id: Uuid) -> AppResult<Vec<SubscriptionHistory>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .history
            .iter()
            .filter(|h| h.subscription_id == subscription_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// InMemoryPaymentRepo
// ============================================================================

#[derive(Default)]
struct PaymentStore {
    payments: HashMap<Uuid, Payment>,
    retry_logs: Vec<PaymentRetryLog>,
}

#[derive(Default)]
pub struct InMemoryPaymentRepo {
    store: Mutex<PaymentStore>,
}

impl InMemoryPaymentRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built payment in any state.
    pub fn seed(&self, payment: Payment) -> Payment {
        self.store
            .lock()
            .unwrap()
            .payments
            .insert(payment.id, payment.clone());
        payment
    }
}

fn retry_log_row(
    payment_id: Uuid,
    retry_attempt: i32,
    status: PaymentStatus,
    failure_reason: Option<&str>,
) -> PaymentRetryLog {
    PaymentRetryLog {
        id: Uuid::new_v4(),
        payment_id,
        retry_attempt,
        status,
        failure_reason: failure_reason.map(str::to_string),
        attempted_at: Utc::now(),
    }
}

#[async_trait]
impl PaymentRepo for InMemoryPaymentRepo {
    async fn insert(&self, payment: &NewPayment) -> AppResult<Payment> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            invoice_id: payment.invoice_id,
            subscription_id: payment.subscription_id,
            user_id: payment.user_id,
            amount: payment.amount,
            status: PaymentStatus::Pending,
            payment_method: payment.payment_method.clone(),
            payment_gateway: payment.payment_gateway.clone(),
            gateway_transaction_id: None,
            failure_code: None,
            failure_message: None,
            retry_count: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .lock()
            .unwrap()
            .payments
            .insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Payment>> {
        Ok(self.store.lock().unwrap().payments.get(&id).cloned())
    }

    async fn list_by_invoice(&self, invoice_id: Uuid) -> AppResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .store
            .lock()
            .unwrap()
            .payments
            .values()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn claim_for_processing(&self, id: Uuid, max_retries: i32) -> AppResult<Payment> {
        let mut store = self.store.lock().unwrap();
        let payment = store
            .payments
            .get_mut(&id)
            .ok_or(AppError::PaymentNotFound)?;
        if !payment.is_attemptable(max_retries) {
            return Err(AppError::InvalidState(format!(
                "Payment is not attemptable (status {}, {} of {} retries used)",
                payment.status, payment.retry_count, max_retries
            )));
        }
        payment.status = PaymentStatus::Processing;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn claim_due_retries(&self, max_retries: i32, limit: i64) -> AppResult<Vec<Payment>> {
        let now = Utc::now();
        let mut store = self.store.lock().unwrap();

        let mut due: Vec<(Option<chrono::DateTime<Utc>>, Uuid)> = store
            .payments
            .values()
            .filter(|p| {
                p.status == PaymentStatus::Failed
                    && p.retry_count < max_retries
                    && p.next_retry_at.is_some_and(|at| at <= now)
            })
            .map(|p| (p.next_retry_at, p.id))
            .collect();
        due.sort();
        let due: Vec<Uuid> = due
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id)
            .collect();

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(payment) = store.payments.get_mut(&id) {
                payment.status = PaymentStatus::Processing;
                payment.updated_at = now;
                claimed.push(payment.clone());
            }
        }
        Ok(claimed)
    }

    async fn record_attempt_success(
        &self,
        id: Uuid,
        attempt: i32,
        transaction_id: &str,
    ) -> AppResult<Payment> {
        let mut store = self.store.lock().unwrap();
        let payment = store
            .payments
            .get_mut(&id)
            .ok_or(AppError::PaymentNotFound)?;
        payment.status = PaymentStatus::Succeeded;
        payment.gateway_transaction_id = Some(transaction_id.to_string());
        payment.failure_code = None;
        payment.failure_message = None;
        payment.next_retry_at = None;
        payment.updated_at = Utc::now();
        let updated = payment.clone();
        store
            .retry_logs
            .push(retry_log_row(id, attempt, PaymentStatus::Succeeded, None));
        Ok(updated)
    }

    async fn record_attempt_failure(
        &self,
        id: Uuid,
        attempt: i32,
        code: FailureCode,
        message: &str,
        next_retry_at: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<Payment> {
        let mut store = self.store.lock().unwrap();
        let payment = store
            .payments
            .get_mut(&id)
            .ok_or(AppError::PaymentNotFound)?;
        payment.status = PaymentStatus::Failed;
        payment.retry_count = attempt;
        payment.failure_code = Some(code);
        payment.failure_message = Some(message.to_string());
        payment.next_retry_at = next_retry_at;
        payment.updated_at = Utc::now();
        let updated = payment.clone();
        store.retry_logs.push(retry_log_row(
            id,
            attempt,
            PaymentStatus::Failed,
            Some(message),
        ));
        Ok(updated)
    }

    async fn mark_refunded(&self, id: Uuid) -> AppResult<Payment> {
        let mut store = self.store.lock().unwrap();
        let payment = store
            .payments
            .get_mut(&id)
            .ok_or(AppError::PaymentNotFound)?;
        if payment.status != PaymentStatus::Succeeded {
            return Err(AppError::InvalidState(
                "Only succeeded payments can be refunded".into(),
            ));
        }
        payment.status = PaymentStatus::Refunded;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn list_retry_logs(&self, payment_id: Uuid) -> AppResult<Vec<PaymentRetryLog>> {
        let mut logs: Vec<PaymentRetryLog> = self
            .store
            .lock()
            .unwrap()
            .retry_logs
            .iter()
            .filter(|l| l.payment_id == payment_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.retry_attempt);
        Ok(logs)
    }
}

// ============================================================================
// FixedOutcomeGateway
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum ScriptedOutcome {
    Approve,
    Decline(FailureCode),
    /// The gateway itself blows up (transport-level error).
    Error,
}

/// Deterministic gateway: plays back a script of outcomes, then repeats the
/// default outcome forever.
pub struct FixedOutcomeGateway {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    default: ScriptedOutcome,
    calls: AtomicUsize,
}

impl FixedOutcomeGateway {
    pub fn approving() -> Self {
        Self::with_default(ScriptedOutcome::Approve)
    }

    pub fn declining(code: FailureCode) -> Self {
        Self::with_default(ScriptedOutcome::Decline(code))
    }

    pub fn erroring() -> Self {
        Self::with_default(ScriptedOutcome::Error)
    }

    pub fn scripted(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            default: ScriptedOutcome::Approve,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_default(default: ScriptedOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FixedOutcomeGateway {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn submit(&self, _charge: &ChargeRequest) -> AppResult<GatewayResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default);

        match outcome {
            ScriptedOutcome::Approve => Ok(GatewayResponse::Approved {
                transaction_id: format!("fixed_txn_{}", Uuid::new_v4()),
            }),
            ScriptedOutcome::Decline(code) => Ok(GatewayResponse::Declined {
                code,
                message: code.message().to_string(),
            }),
            ScriptedOutcome::Error => {
                Err(AppError::Internal("simulated gateway outage".into()))
            }
        }
    }
}

// ============================================================================
// MockInvoiceService
// ============================================================================

#[derive(Default)]
pub struct MockInvoiceService {
    paid: Mutex<Vec<Uuid>>,
    voided: Mutex<Vec<Uuid>>,
}

impl MockInvoiceService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paid_invoices(&self) -> Vec<Uuid> {
        self.paid.lock().unwrap().clone()
    }

    pub fn voided_invoices(&self) -> Vec<Uuid> {
        self.voided.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvoiceService for MockInvoiceService {
    async fn mark_invoice_paid(&self, invoice_id: Uuid) -> AppResult<()> {
        self.paid.lock().unwrap().push(invoice_id);
        Ok(())
    }

    async fn void_invoice(&self, invoice_id: Uuid) -> AppResult<()> {
        self.voided.lock().unwrap().push(invoice_id);
        Ok(())
    }
}
