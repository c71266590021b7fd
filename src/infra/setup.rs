use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::persistence::PostgresPersistence,
    application::use_cases::{
        payments::PaymentProcessor, plan_catalog::PlanCatalog, subscriptions::SubscriptionManager,
    },
    infra::{
        config::AppConfig, db::init_db, invoicing::LoggingInvoiceService,
        simulated_gateway::SimulatedGateway,
    },
};

/// Fully wired engine: the three components sharing one Postgres pool,
/// the simulated gateway, and the logging invoice collaborator.
pub struct Engine {
    pub config: Arc<AppConfig>,
    pub plan_catalog: PlanCatalog,
    pub subscription_manager: SubscriptionManager,
    pub payment_processor: Arc<PaymentProcessor>,
}

pub async fn init_engine() -> anyhow::Result<Engine> {
    let config = AppConfig::from_env();

    let pool = init_db(&config.database_url).await?;
    let persistence = Arc::new(PostgresPersistence::new(pool));

    let plan_catalog = PlanCatalog::new(persistence.clone());
    let subscription_manager =
        SubscriptionManager::new(persistence.clone(), persistence.clone());
    let payment_processor = Arc::new(PaymentProcessor::new(
        persistence,
        Arc::new(SimulatedGateway::default()),
        Arc::new(LoggingInvoiceService),
        config.max_payment_retries,
        config.retry_delay_hours,
    ));

    Ok(Engine {
        config: Arc::new(config),
        plan_catalog,
        subscription_manager,
        payment_processor,
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "rebill=debug".into());

    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .pretty();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()
        .ok();
}
