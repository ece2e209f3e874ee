//! Invoice persistence boundary.
//!
//! Writes are validated before they reach storage: a model that fails
//! [`Validate`] is rejected with [`RepositoryError::Validation`] and nothing is
//! written. Writes are also checked against what is already stored: an
//! invoice status only moves along its lifecycle, and a line item billed on
//! one invoice stays there. Either violation is [`RepositoryError::Conflict`].
//! Multi-record writes that must become visible together go through an
//! [`InvoiceTransaction`] obtained from [`InvoiceRepository::begin`].
//!
//! ## Implementations
//!
//! - [`in_memory::InMemoryInvoiceRepository`]: staged writes applied on commit (tests/dev)
//! - [`postgres::PostgresInvoiceRepository`]: sqlx over the `invoices` and
//!   `shipment_line_items` tables

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use movebill_core::{InvoiceId, ShipmentId, Validate, ValidationErrors};
use movebill_invoicing::{Invoice, InvoiceStatus, ShipmentLineItem};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryInvoiceRepository;
pub use postgres::PostgresInvoiceRepository;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("record not found")]
    NotFound,

    #[error("conflicts with stored state: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// A unit of work over invoices and line items.
///
/// Nothing written through a transaction is visible to other readers until
/// [`commit`](InvoiceTransaction::commit) succeeds. Dropping a transaction
/// without committing discards its writes.
#[async_trait]
pub trait InvoiceTransaction: Send {
    async fn create_invoice(&mut self, invoice: &Invoice) -> RepositoryResult<()>;

    async fn save_invoice(&mut self, invoice: &Invoice) -> RepositoryResult<()>;

    /// Validate and upsert a batch of line items. Either every item is written
    /// or none is.
    async fn save_line_items(&mut self, items: &[ShipmentLineItem]) -> RepositoryResult<()>;

    async fn commit(self: Box<Self>) -> RepositoryResult<()>;

    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn begin(&self) -> RepositoryResult<Box<dyn InvoiceTransaction>>;

    /// Validate and insert a new invoice outside of any shared transaction.
    async fn create_invoice(&self, invoice: &Invoice) -> RepositoryResult<()>;

    /// Validate and update an existing invoice outside of any shared transaction.
    async fn save_invoice(&self, invoice: &Invoice) -> RepositoryResult<()>;

    async fn fetch_invoice(&self, id: InvoiceId) -> RepositoryResult<Invoice>;

    /// Invoices for a shipment, oldest first.
    async fn fetch_invoices_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<Invoice>>;

    async fn fetch_line_items_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<ShipmentLineItem>>;
}

/// Commit `tx` if `result` is `Ok`, roll it back otherwise.
///
/// The body's error wins over a rollback failure; the rollback failure is
/// logged. A failed commit is returned as the error.
pub async fn finish<T, E>(tx: Box<dyn InvoiceTransaction>, result: Result<T, E>) -> Result<T, E>
where
    E: From<RepositoryError>,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Validation shared by every implementation.
pub(crate) fn validate_invoice(invoice: &Invoice) -> RepositoryResult<()> {
    invoice.validate().into_result().map_err(RepositoryError::Validation)
}

/// Validate a batch, reporting problems as `line_items[<idx>].<field>`.
pub(crate) fn validate_line_items(items: &[ShipmentLineItem]) -> RepositoryResult<()> {
    let mut errs = ValidationErrors::new();
    for (idx, item) in items.iter().enumerate() {
        errs.append_prefixed(&format!("line_items[{idx}]"), item.validate());
    }
    errs.into_result().map_err(RepositoryError::Validation)
}

/// A batch may name each line item at most once.
pub(crate) fn ensure_unique_line_items(items: &[ShipmentLineItem]) -> RepositoryResult<()> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item.id_typed()) {
            return Err(RepositoryError::UniqueViolation(format!(
                "line item {} appears more than once in the batch",
                item.id_typed()
            )));
        }
    }
    Ok(())
}

/// Stored statuses from which an invoice may be written with `requested`:
/// the status itself (a rewrite) and every status that can transition to it.
pub(crate) fn statuses_writable_to(requested: InvoiceStatus) -> Vec<InvoiceStatus> {
    InvoiceStatus::ALL
        .into_iter()
        .filter(|stored| *stored == requested || stored.can_transition_to(requested))
        .collect()
}

pub(crate) fn status_conflict(
    invoice_id: InvoiceId,
    stored: InvoiceStatus,
    requested: InvoiceStatus,
) -> RepositoryError {
    RepositoryError::Conflict(format!(
        "invoice {invoice_id} is {stored} and cannot be written as {requested}"
    ))
}

/// `requested` may replace `stored` only along the invoice lifecycle.
pub(crate) fn check_status_write(stored: &Invoice, requested: &Invoice) -> RepositoryResult<()> {
    if statuses_writable_to(requested.status()).contains(&stored.status()) {
        Ok(())
    } else {
        Err(status_conflict(
            stored.id_typed(),
            stored.status(),
            requested.status(),
        ))
    }
}

pub(crate) fn binding_conflict(item: &ShipmentLineItem, bound: InvoiceId) -> RepositoryError {
    RepositoryError::Conflict(format!(
        "line item {} is already billed on invoice {bound}",
        item.id_typed()
    ))
}

/// A stored binding can be rewritten as-is but never moved or cleared.
pub(crate) fn check_binding_write(
    stored: &ShipmentLineItem,
    requested: &ShipmentLineItem,
) -> RepositoryResult<()> {
    match stored.invoice_id() {
        Some(bound) if requested.invoice_id() != Some(bound) => {
            Err(binding_conflict(requested, bound))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_validation_names_the_offending_item() {
        let shipment = ShipmentId::new();
        let ok = ShipmentLineItem::new(shipment, "LHS");
        let mut unapproved = ShipmentLineItem::new(shipment, "105B").requiring_pre_approval();
        unapproved.bind_to_invoice(InvoiceId::new()).unwrap();

        let err = validate_line_items(&[ok, unapproved]).unwrap_err();
        match err {
            RepositoryError::Validation(errs) => {
                assert_eq!(errs.fields().collect::<Vec<_>>(), vec!["line_items[1].status"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn submitted_invoice_cannot_be_written_as_failed() {
        assert_eq!(
            statuses_writable_to(InvoiceStatus::SubmissionFailure),
            vec![InvoiceStatus::InProcess, InvoiceStatus::SubmissionFailure]
        );
        assert_eq!(
            statuses_writable_to(InvoiceStatus::InProcess),
            vec![InvoiceStatus::InProcess]
        );

        let stored = {
            let mut invoice = Invoice::new(ShipmentId::new(), chrono::Utc::now());
            invoice.mark_submitted().unwrap();
            invoice
        };
        let mut stale = Invoice::restore(
            stored.id_typed(),
            InvoiceStatus::InProcess,
            stored.invoice_number().to_string(),
            stored.invoiced_date(),
            stored.shipment_id(),
            None,
        );
        stale.mark_submission_failed().unwrap();

        match check_status_write(&stored, &stale).unwrap_err() {
            RepositoryError::Conflict(msg) if msg.contains("SUBMITTED") => {}
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(check_status_write(&stored, &stored).is_ok());
    }

    #[test]
    fn billed_line_item_cannot_move_or_be_cleared() {
        let billed_on = InvoiceId::new();
        let unbound = ShipmentLineItem::new(ShipmentId::new(), "LHS");
        let mut stored = unbound.clone();
        stored.bind_to_invoice(billed_on).unwrap();
        let mut moved = unbound.clone();
        moved.bind_to_invoice(InvoiceId::new()).unwrap();

        assert!(check_binding_write(&stored, &stored).is_ok());
        assert!(check_binding_write(&unbound, &moved).is_ok());
        assert!(matches!(
            check_binding_write(&stored, &moved),
            Err(RepositoryError::Conflict(_))
        ));
        assert!(matches!(
            check_binding_write(&stored, &unbound),
            Err(RepositoryError::Conflict(_))
        ));
    }
}
