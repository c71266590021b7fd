use std::time::Duration;

use dotenvy::dotenv;
use tracing::info;

use rebill::infra::payment_retry_worker::run_payment_retry_loop;
use rebill::infra::setup::{init_engine, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let engine = init_engine().await?;

    info!(
        max_retries = engine.config.max_payment_retries,
        retry_delay_hours = engine.config.retry_delay_hours,
        "Billing engine started"
    );

    // The retry sweep is the engine's only standing task; API traffic comes
    // in through the library surface, driven by the upstream service.
    run_payment_retry_loop(
        engine.payment_processor.clone(),
        Duration::from_secs(engine.config.retry_poll_interval_secs),
    )
    .await;

    Ok(())
}
