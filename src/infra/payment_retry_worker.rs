use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::application::use_cases::payments::PaymentProcessor;

/// Polls for payments whose persisted `next_retry_at` has come due and
/// re-attempts them. Due-ness lives in the database, not in this process,
/// so a restart picks up exactly where the previous run left off.
pub async fn run_payment_retry_loop(processor: Arc<PaymentProcessor>, poll_interval: Duration) {
    let mut ticker = interval(poll_interval);

    info!(
        "Payment retry worker started (polling every {}s)",
        poll_interval.as_secs()
    );

    loop {
        ticker.tick().await;

        match processor.retry_failed_payments().await {
            Ok(summary) if summary.swept > 0 => {
                info!(
                    swept = summary.swept,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "Retry sweep completed"
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Retry sweep failed");
            }
        }
    }
}
