use std::sync::Arc;

use tracing::{info, instrument};

use movebill_core::{Clock, UploadId};
use movebill_invoicing::{Invoice, Shipment, ShipmentLineItem};

use crate::repository::{InvoiceRepository, InvoiceTransaction, finish};

use super::SubmissionError;

/// Creates invoices for shipments, in `IN_PROCESS` with the placeholder number.
pub struct InvoiceCreator {
    repo: Arc<dyn InvoiceRepository>,
    clock: Arc<dyn Clock>,
}

impl InvoiceCreator {
    pub fn new(repo: Arc<dyn InvoiceRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Create and store one invoice for `shipment`. Line items are left alone.
    #[instrument(skip(self, shipment), fields(shipment_id = %shipment.id), err)]
    pub async fn create_invoice(&self, shipment: &Shipment) -> Result<Invoice, SubmissionError> {
        let invoice = Invoice::new(shipment.id, self.clock.now());
        self.repo.create_invoice(&invoice).await?;
        info!(invoice_id = %invoice.id_typed(), "invoice created");
        Ok(invoice)
    }

    /// Reference a supporting uploaded document from an invoice that has not
    /// reached an outcome yet. `invoice` changes only once the write succeeds.
    #[instrument(
        skip(self, invoice, upload_id),
        fields(invoice_id = %invoice.id_typed(), upload_id = %upload_id),
        err
    )]
    pub async fn attach_document(
        &self,
        invoice: &mut Invoice,
        upload_id: UploadId,
    ) -> Result<(), SubmissionError> {
        let mut updated = invoice.clone();
        updated.attach_upload(upload_id)?;
        self.repo.save_invoice(&updated).await?;
        *invoice = updated;
        Ok(())
    }

    /// Create one invoice per shipment and bind each shipment's line items to
    /// its new invoice, all in one transaction.
    ///
    /// Any failure rolls back every invoice and binding in the batch. The
    /// shipments' in-memory line items are only updated after commit.
    #[instrument(skip(self, shipments), fields(shipment_count = shipments.len()), err)]
    pub async fn create_invoices(
        &self,
        shipments: &mut [Shipment],
    ) -> Result<Vec<Invoice>, SubmissionError> {
        let mut tx = self.repo.begin().await?;
        let result = self.create_in(tx.as_mut(), shipments).await;
        let created = finish(tx, result).await?;

        let mut invoices = Vec::with_capacity(created.len());
        for (shipment, (invoice, line_items)) in shipments.iter_mut().zip(created) {
            shipment.line_items = line_items;
            invoices.push(invoice);
        }
        info!(invoice_count = invoices.len(), "invoices created");
        Ok(invoices)
    }

    async fn create_in(
        &self,
        tx: &mut dyn InvoiceTransaction,
        shipments: &[Shipment],
    ) -> Result<Vec<(Invoice, Vec<ShipmentLineItem>)>, SubmissionError> {
        let now = self.clock.now();
        let mut created = Vec::with_capacity(shipments.len());

        for shipment in shipments {
            let invoice = Invoice::new(shipment.id, now);
            tx.create_invoice(&invoice).await?;

            let mut line_items = shipment.line_items.clone();
            for item in &mut line_items {
                item.bind_to_invoice(invoice.id_typed())?;
            }
            tx.save_line_items(&line_items).await?;

            created.push((invoice, line_items));
        }
        Ok(created)
    }
}
