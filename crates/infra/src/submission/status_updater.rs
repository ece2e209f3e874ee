use std::sync::Arc;

use tracing::{debug, instrument};

use movebill_core::{Validate, ValidationErrors};
use movebill_invoicing::{Invoice, ShipmentLineItem, partition_by_shipment};

use crate::repository::{InvoiceRepository, InvoiceTransaction, finish};

use super::SubmissionError;

/// Records a successful submission: the invoice becomes `SUBMITTED` and its
/// shipment's line items are bound to it, in one transaction.
///
/// Either both writes commit or neither does. The caller's values are only
/// changed once the transaction has committed.
pub struct InvoiceStatusUpdater {
    repo: Arc<dyn InvoiceRepository>,
}

impl InvoiceStatusUpdater {
    pub fn new(repo: Arc<dyn InvoiceRepository>) -> Self {
        Self { repo }
    }

    #[instrument(
        skip(self, invoice, line_items),
        fields(
            invoice_id = %invoice.id_typed(),
            shipment_id = %invoice.shipment_id(),
            line_item_count = line_items.len()
        ),
        err
    )]
    pub async fn mark_submitted(
        &self,
        invoice: &mut Invoice,
        line_items: &mut [ShipmentLineItem],
    ) -> Result<(), SubmissionError> {
        let mut submitted = invoice.clone();
        submitted.mark_submitted()?;
        let bound = stage_bindings(&submitted, line_items)?;

        let mut tx = self.repo.begin().await?;
        let result = write_submitted(tx.as_mut(), &submitted, &bound).await;
        finish(tx, result).await?;

        *invoice = submitted;
        line_items.clone_from_slice(&bound);
        debug!("invoice marked submitted");
        Ok(())
    }

    /// Check that `line_items` could be bound to `invoice` without writing
    /// anything: same shipment, not billed elsewhere, approved where required.
    ///
    /// The same checks run again inside [`mark_submitted`](Self::mark_submitted);
    /// this lets a caller refuse a doomed submission before transmitting it.
    pub fn check_bindable(
        &self,
        invoice: &Invoice,
        line_items: &[ShipmentLineItem],
    ) -> Result<(), SubmissionError> {
        stage_bindings(invoice, line_items).map(|_| ())
    }

    /// Mark several invoices submitted in one shared transaction.
    ///
    /// Line items are grouped by shipment first, so each invoice binds only its
    /// own shipment's items. A line item whose shipment has no invoice in the
    /// batch is a validation error.
    #[instrument(
        skip(self, invoices, line_items),
        fields(invoice_count = invoices.len(), line_item_count = line_items.len()),
        err
    )]
    pub async fn mark_all_submitted(
        &self,
        invoices: &mut [Invoice],
        line_items: &mut [ShipmentLineItem],
    ) -> Result<(), SubmissionError> {
        let mut groups = partition_by_shipment(line_items);

        let mut staged = Vec::with_capacity(invoices.len());
        for invoice in invoices.iter() {
            let mut submitted = invoice.clone();
            submitted.mark_submitted()?;
            let positions = groups.remove(&invoice.shipment_id()).unwrap_or_default();
            let bound = bind_all(&submitted, positions.iter().map(|&idx| &line_items[idx]))?;
            staged.push((submitted, positions, bound));
        }

        if !groups.is_empty() {
            let mut errs = ValidationErrors::new();
            for (shipment_id, positions) in &groups {
                for idx in positions {
                    errs.add(
                        format!("line_items[{idx}].shipment_id"),
                        format!("no invoice in this batch for shipment {shipment_id}"),
                    );
                }
            }
            return Err(SubmissionError::Validation(errs));
        }

        let mut tx = self.repo.begin().await?;
        let result = async {
            for (submitted, _, bound) in &staged {
                write_submitted(tx.as_mut(), submitted, bound).await?;
            }
            Ok::<(), SubmissionError>(())
        }
        .await;
        finish(tx, result).await?;

        for (invoice, (submitted, positions, bound)) in invoices.iter_mut().zip(staged) {
            *invoice = submitted;
            for (idx, item) in positions.into_iter().zip(bound) {
                line_items[idx] = item;
            }
        }
        debug!("invoices marked submitted");
        Ok(())
    }
}

/// Every line item must belong to the invoice's shipment.
fn check_same_shipment(
    invoice: &Invoice,
    line_items: &[ShipmentLineItem],
) -> Result<(), SubmissionError> {
    let mut errs = ValidationErrors::new();
    for (idx, item) in line_items.iter().enumerate() {
        if item.shipment_id() != invoice.shipment_id() {
            errs.add(
                format!("line_items[{idx}].shipment_id"),
                format!(
                    "belongs to shipment {}, not the invoice's shipment {}",
                    item.shipment_id(),
                    invoice.shipment_id()
                ),
            );
        }
    }
    errs.into_result().map_err(SubmissionError::Validation)
}

/// Bound copies of `line_items`, validated as the batch write will see them.
fn stage_bindings(
    invoice: &Invoice,
    line_items: &[ShipmentLineItem],
) -> Result<Vec<ShipmentLineItem>, SubmissionError> {
    check_same_shipment(invoice, line_items)?;
    let bound = bind_all(invoice, line_items.iter())?;

    let mut errs = ValidationErrors::new();
    for (idx, item) in bound.iter().enumerate() {
        errs.append_prefixed(&format!("line_items[{idx}]"), item.validate());
    }
    errs.into_result().map_err(SubmissionError::Validation)?;
    Ok(bound)
}

fn bind_all<'a>(
    invoice: &Invoice,
    line_items: impl Iterator<Item = &'a ShipmentLineItem>,
) -> Result<Vec<ShipmentLineItem>, SubmissionError> {
    line_items
        .map(|item| -> Result<ShipmentLineItem, SubmissionError> {
            let mut bound = item.clone();
            bound.bind_to_invoice(invoice.id_typed())?;
            Ok(bound)
        })
        .collect()
}

async fn write_submitted(
    tx: &mut dyn InvoiceTransaction,
    invoice: &Invoice,
    line_items: &[ShipmentLineItem],
) -> Result<(), SubmissionError> {
    tx.save_invoice(invoice).await?;
    tx.save_line_items(line_items).await?;
    Ok(())
}
