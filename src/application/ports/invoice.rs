use async_trait::async_trait;
use uuid::Uuid;

use crate::app_error::AppResult;

/// Invoice collaborator port. Invoicing itself lives upstream; the engine
/// only reports settlement outcomes back to it.
#[async_trait]
pub trait InvoiceService: Send + Sync {
    /// Called once a payment for the invoice has succeeded.
    async fn mark_invoice_paid(&self, invoice_id: Uuid) -> AppResult<()>;

    /// Called when a succeeded payment is refunded.
    async fn void_invoice(&self, invoice_id: Uuid) -> AppResult<()>;
}
