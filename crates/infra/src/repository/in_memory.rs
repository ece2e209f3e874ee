use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use movebill_core::{InvoiceId, LineItemId, ShipmentId};
use movebill_invoicing::{Invoice, ShipmentLineItem};

use super::{
    InvoiceRepository, InvoiceTransaction, RepositoryError, RepositoryResult,
    check_binding_write, check_status_write, ensure_unique_line_items, validate_invoice,
    validate_line_items,
};

#[derive(Debug, Default)]
struct State {
    invoices: HashMap<InvoiceId, Invoice>,
    line_items: HashMap<LineItemId, ShipmentLineItem>,
}

/// In-memory invoice repository.
///
/// Intended for tests/dev. Transactions stage their writes privately and apply
/// them in one step on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInvoiceRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryInvoiceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Database("lock poisoned".to_string())
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn begin(&self) -> RepositoryResult<Box<dyn InvoiceTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            created: HashSet::new(),
            invoices: HashMap::new(),
            line_items: HashMap::new(),
        }))
    }

    async fn create_invoice(&self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        let mut state = self.state.write().map_err(poisoned)?;
        if state.invoices.contains_key(&invoice.id_typed()) {
            return Err(RepositoryError::UniqueViolation(format!(
                "invoice {} already exists",
                invoice.id_typed()
            )));
        }
        state.invoices.insert(invoice.id_typed(), invoice.clone());
        Ok(())
    }

    async fn save_invoice(&self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        let mut state = self.state.write().map_err(poisoned)?;
        match state.invoices.get_mut(&invoice.id_typed()) {
            Some(stored) => {
                check_status_write(stored, invoice)?;
                *stored = invoice.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn fetch_invoice(&self, id: InvoiceId) -> RepositoryResult<Invoice> {
        let state = self.state.read().map_err(poisoned)?;
        state.invoices.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn fetch_invoices_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<Invoice>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.shipment_id() == shipment_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| (i.invoiced_date(), i.id_typed()));
        Ok(invoices)
    }

    async fn fetch_line_items_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<ShipmentLineItem>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut items: Vec<ShipmentLineItem> = state
            .line_items
            .values()
            .filter(|li| li.shipment_id() == shipment_id)
            .cloned()
            .collect();
        items.sort_by_key(|li| li.id_typed());
        Ok(items)
    }
}

struct InMemoryTransaction {
    state: Arc<RwLock<State>>,
    created: HashSet<InvoiceId>,
    invoices: HashMap<InvoiceId, Invoice>,
    line_items: HashMap<LineItemId, ShipmentLineItem>,
}

impl InMemoryTransaction {
    fn invoice_exists(&self, id: InvoiceId) -> RepositoryResult<bool> {
        if self.invoices.contains_key(&id) {
            return Ok(true);
        }
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.invoices.contains_key(&id))
    }

    /// The invoice as this transaction currently sees it.
    fn visible_invoice(&self, id: InvoiceId) -> RepositoryResult<Option<Invoice>> {
        if let Some(staged) = self.invoices.get(&id) {
            return Ok(Some(staged.clone()));
        }
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.invoices.get(&id).cloned())
    }

    fn visible_line_item(&self, id: LineItemId) -> RepositoryResult<Option<ShipmentLineItem>> {
        if let Some(staged) = self.line_items.get(&id) {
            return Ok(Some(staged.clone()));
        }
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.line_items.get(&id).cloned())
    }
}

#[async_trait]
impl InvoiceTransaction for InMemoryTransaction {
    async fn create_invoice(&mut self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        let id = invoice.id_typed();
        if self.invoice_exists(id)? {
            return Err(RepositoryError::UniqueViolation(format!(
                "invoice {id} already exists"
            )));
        }
        self.created.insert(id);
        self.invoices.insert(id, invoice.clone());
        Ok(())
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> RepositoryResult<()> {
        validate_invoice(invoice)?;
        let id = invoice.id_typed();
        let stored = self.visible_invoice(id)?.ok_or(RepositoryError::NotFound)?;
        check_status_write(&stored, invoice)?;
        self.invoices.insert(id, invoice.clone());
        Ok(())
    }

    async fn save_line_items(&mut self, items: &[ShipmentLineItem]) -> RepositoryResult<()> {
        validate_line_items(items)?;
        ensure_unique_line_items(items)?;
        for item in items {
            if let Some(stored) = self.visible_line_item(item.id_typed())? {
                check_binding_write(&stored, item)?;
            }
        }

        for item in items {
            self.line_items.insert(item.id_typed(), item.clone());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let this = *self;
        let mut state = this.state.write().map_err(poisoned)?;

        // Another writer may have inserted the same invoice since we staged it.
        if let Some(id) = this.created.iter().find(|id| state.invoices.contains_key(*id)) {
            return Err(RepositoryError::UniqueViolation(format!(
                "invoice {id} already exists"
            )));
        }

        // Re-check staged updates against whatever committed in the meantime.
        for (id, invoice) in this.invoices.iter().filter(|(id, _)| !this.created.contains(*id)) {
            let stored = state.invoices.get(id).ok_or(RepositoryError::NotFound)?;
            check_status_write(stored, invoice)?;
        }
        for item in this.line_items.values() {
            if let Some(stored) = state.line_items.get(&item.id_typed()) {
                check_binding_write(stored, item)?;
            }
        }

        state.invoices.extend(this.invoices);
        state.line_items.extend(this.line_items);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use movebill_invoicing::InvoiceStatus;

    fn invoice_for(shipment_id: ShipmentId) -> Invoice {
        Invoice::new(shipment_id, Utc.with_ymd_and_hms(2018, 9, 20, 12, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn committed_writes_become_visible_together() {
        let repo = InMemoryInvoiceRepository::new();
        let shipment_id = ShipmentId::new();
        let invoice = invoice_for(shipment_id);
        let mut item = ShipmentLineItem::new(shipment_id, "LHS");
        item.bind_to_invoice(invoice.id_typed()).unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.create_invoice(&invoice).await.unwrap();
        tx.save_line_items(std::slice::from_ref(&item)).await.unwrap();

        assert_eq!(
            repo.fetch_invoice(invoice.id_typed()).await,
            Err(RepositoryError::NotFound)
        );

        tx.commit().await.unwrap();

        assert_eq!(repo.fetch_invoice(invoice.id_typed()).await.unwrap(), invoice);
        assert_eq!(
            repo.fetch_line_items_for_shipment(shipment_id).await.unwrap(),
            vec![item]
        );
    }

    #[tokio::test]
    async fn rolled_back_writes_are_discarded() {
        let repo = InMemoryInvoiceRepository::new();
        let invoice = invoice_for(ShipmentId::new());

        let mut tx = repo.begin().await.unwrap();
        tx.create_invoice(&invoice).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(
            repo.fetch_invoice(invoice.id_typed()).await,
            Err(RepositoryError::NotFound)
        );
    }

    #[tokio::test]
    async fn duplicate_line_items_in_one_batch_are_rejected() {
        let repo = InMemoryInvoiceRepository::new();
        let item = ShipmentLineItem::new(ShipmentId::new(), "LHS");

        let mut tx = repo.begin().await.unwrap();
        let err = tx
            .save_line_items(&[item.clone(), item])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn saving_an_unknown_invoice_is_not_found() {
        let repo = InMemoryInvoiceRepository::new();
        let invoice = invoice_for(ShipmentId::new());

        assert_eq!(repo.save_invoice(&invoice).await, Err(RepositoryError::NotFound));

        repo.create_invoice(&invoice).await.unwrap();
        let mut submitted = invoice.clone();
        submitted.mark_submitted().unwrap();
        repo.save_invoice(&submitted).await.unwrap();

        let stored = repo.fetch_invoice(invoice.id_typed()).await.unwrap();
        assert_eq!(stored.status(), InvoiceStatus::Submitted);
    }

    #[tokio::test]
    async fn creating_the_same_invoice_twice_is_a_unique_violation() {
        let repo = InMemoryInvoiceRepository::new();
        let invoice = invoice_for(ShipmentId::new());

        let mut tx = repo.begin().await.unwrap();
        tx.create_invoice(&invoice).await.unwrap();

        repo.create_invoice(&invoice).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn invoices_for_shipment_are_scoped_to_that_shipment() {
        let repo = InMemoryInvoiceRepository::new();
        let shipment_id = ShipmentId::new();
        let first = invoice_for(shipment_id);
        let second = invoice_for(shipment_id);
        repo.create_invoice(&first).await.unwrap();
        repo.create_invoice(&second).await.unwrap();
        repo.create_invoice(&invoice_for(ShipmentId::new())).await.unwrap();

        let found = repo.fetch_invoices_for_shipment(shipment_id).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&first));
        assert!(found.contains(&second));
    }

    #[tokio::test]
    async fn billed_line_item_is_not_moved_to_another_invoice() {
        let repo = InMemoryInvoiceRepository::new();
        let shipment_id = ShipmentId::new();
        let unbound = ShipmentLineItem::new(shipment_id, "LHS");
        let (first, second) = (InvoiceId::new(), InvoiceId::new());

        let mut billed = unbound.clone();
        billed.bind_to_invoice(first).unwrap();
        let mut tx = repo.begin().await.unwrap();
        tx.save_line_items(std::slice::from_ref(&billed)).await.unwrap();
        tx.commit().await.unwrap();

        let mut moved = unbound;
        moved.bind_to_invoice(second).unwrap();
        let mut tx = repo.begin().await.unwrap();
        let err = tx.save_line_items(&[moved]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        tx.rollback().await.unwrap();

        let stored = repo.fetch_line_items_for_shipment(shipment_id).await.unwrap();
        assert_eq!(stored, vec![billed]);
    }

    #[tokio::test]
    async fn binding_committed_by_another_writer_wins_at_commit() {
        let repo = InMemoryInvoiceRepository::new();
        let shipment_id = ShipmentId::new();
        let unbound = ShipmentLineItem::new(shipment_id, "LHS");
        let mut on_first = unbound.clone();
        on_first.bind_to_invoice(InvoiceId::new()).unwrap();
        let mut on_second = unbound;
        on_second.bind_to_invoice(InvoiceId::new()).unwrap();

        let mut slow = repo.begin().await.unwrap();
        slow.save_line_items(std::slice::from_ref(&on_second)).await.unwrap();

        let mut fast = repo.begin().await.unwrap();
        fast.save_line_items(std::slice::from_ref(&on_first)).await.unwrap();
        fast.commit().await.unwrap();

        let err = slow.commit().await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        let stored = repo.fetch_line_items_for_shipment(shipment_id).await.unwrap();
        assert_eq!(stored, vec![on_first]);
    }

    #[tokio::test]
    async fn submitted_invoice_is_never_written_back_as_failed() {
        let repo = InMemoryInvoiceRepository::new();
        let invoice = invoice_for(ShipmentId::new());
        repo.create_invoice(&invoice).await.unwrap();

        let mut submitted = invoice.clone();
        submitted.mark_submitted().unwrap();
        repo.save_invoice(&submitted).await.unwrap();
        repo.save_invoice(&submitted).await.unwrap();

        let mut failed = invoice;
        failed.mark_submission_failed().unwrap();
        let err = repo.save_invoice(&failed).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let mut tx = repo.begin().await.unwrap();
        assert!(matches!(
            tx.save_invoice(&failed).await,
            Err(RepositoryError::Conflict(_))
        ));

        let stored = repo.fetch_invoice(submitted.id_typed()).await.unwrap();
        assert_eq!(stored.status(), InvoiceStatus::Submitted);
    }
}
