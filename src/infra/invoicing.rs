use async_trait::async_trait;
use uuid::Uuid;

use crate::{app_error::AppResult, application::ports::invoice::InvoiceService};

/// Stand-in for the real invoicing subsystem: acknowledges settlement
/// callbacks with a log line and nothing else.
pub struct LoggingInvoiceService;

#[async_trait]
impl InvoiceService for LoggingInvoiceService {
    async fn mark_invoice_paid(&self, invoice_id: Uuid) -> AppResult<()> {
        tracing::info!(invoice_id = %invoice_id, "Invoice marked paid");
        Ok(())
    }

    async fn void_invoice(&self, invoice_id: Uuid) -> AppResult<()> {
        tracing::info!(invoice_id = %invoice_id, "Invoice voided");
        Ok(())
    }
}
