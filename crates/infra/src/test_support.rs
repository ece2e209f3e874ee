//! Fakes shared by the pipeline tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use movebill_core::{Clock, FixedClock, InvoiceId, ShipmentId};
use movebill_invoicing::{Invoice, Shipment, ShipmentLineItem};

use crate::encoder::{BillingDocument, DocumentEncoder, EncodeError, Segment};
use crate::repository::{
    InMemoryInvoiceRepository, InvoiceRepository, InvoiceTransaction, RepositoryError,
    RepositoryResult,
};
use crate::transport::{SubmissionTransport, TransportError, TransportResponse};

pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 9, 20, 12, 0, 0).unwrap()
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(test_time()))
}

/// A shipment with `count` plain (no pre-approval) line items.
pub fn shipment_with_items(count: usize) -> Shipment {
    let mut shipment = Shipment::new(ShipmentId::new());
    shipment.origin = Some("Fort Gordon, GA".to_string());
    shipment.destination = Some("Fort Lewis, WA".to_string());
    shipment.carrier = Some("Acme Van Lines".to_string());
    shipment.customer = Some("Sgt. Pepper".to_string());
    for idx in 0..count {
        shipment.add_line_item(format!("LHS-{idx}"));
    }
    shipment
}

/// Store `shipment`'s line items so later reads can see them.
pub async fn seed_line_items(repo: &dyn InvoiceRepository, shipment: &Shipment) {
    let mut tx = repo.begin().await.unwrap();
    tx.save_line_items(&shipment.line_items).await.unwrap();
    tx.commit().await.unwrap();
}

/// Create and store an `IN_PROCESS` invoice for `shipment`.
pub async fn seed_invoice(repo: &dyn InvoiceRepository, shipment: &Shipment) -> Invoice {
    let invoice = Invoice::new(shipment.id, test_time());
    repo.create_invoice(&invoice).await.unwrap();
    invoice
}

struct StubDocument {
    segments: Vec<Segment>,
    payload: Result<String, EncodeError>,
}

impl BillingDocument for StubDocument {
    fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn serialize(&self) -> Result<String, EncodeError> {
        self.payload.clone()
    }
}

/// Encoder that either fails generation, fails serialization, or produces a
/// small document naming the invoice.
#[derive(Default)]
pub struct ScriptedEncoder {
    generate_error: Option<EncodeError>,
    serialize_error: Option<EncodeError>,
    calls: AtomicUsize,
    last_production_flag: Mutex<Option<bool>>,
}

impl ScriptedEncoder {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing(err: EncodeError) -> Self {
        Self {
            generate_error: Some(err),
            ..Self::default()
        }
    }

    pub fn failing_serialize(err: EncodeError) -> Self {
        Self {
            serialize_error: Some(err),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_production_flag(&self) -> Option<bool> {
        *self.last_production_flag.lock().unwrap()
    }
}

impl DocumentEncoder for ScriptedEncoder {
    fn generate(
        &self,
        shipment: &Shipment,
        invoice: &Invoice,
        production: bool,
        clock: &dyn Clock,
    ) -> Result<Box<dyn BillingDocument>, EncodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_production_flag.lock().unwrap() = Some(production);
        if let Some(err) = &self.generate_error {
            return Err(err.clone());
        }

        let usage = if production { "P" } else { "T" };
        let segments = vec![
            Segment::new(
                "ISA",
                vec![usage.to_string(), clock.now().format("%y%m%d").to_string()],
            ),
            Segment::new("BX", vec![invoice.id_typed().to_string()]),
            Segment::new("N1", vec![shipment.carrier.clone().unwrap_or_default()]),
        ];
        let payload = match &self.serialize_error {
            Some(err) => Err(err.clone()),
            None => Ok(segments
                .iter()
                .map(|s| format!("{}*{}~", s.id, s.elements.join("*")))
                .collect()),
        };
        Ok(Box::new(StubDocument { segments, payload }))
    }
}

enum TransportScript {
    Status(u16),
    Fail(TransportError),
    Delayed(Duration, u16),
}

/// Transport that answers every send the same way and records what it sent.
pub struct ScriptedTransport {
    script: TransportScript,
    sent: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    fn with(script: TransportScript) -> Self {
        Self {
            script,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn status(status_code: u16) -> Self {
        Self::with(TransportScript::Status(status_code))
    }

    pub fn failing(err: TransportError) -> Self {
        Self::with(TransportScript::Fail(err))
    }

    /// Answers `status_code` after `delay`.
    pub fn delayed(delay: Duration, status_code: u16) -> Self {
        Self::with(TransportScript::Delayed(delay, status_code))
    }

    /// Never answers within any reasonable deadline.
    pub fn hanging() -> Self {
        Self::delayed(Duration::from_secs(3600), 200)
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// `(payload, correlation_id)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionTransport for ScriptedTransport {
    async fn send(
        &self,
        payload: &str,
        correlation_id: &str,
    ) -> Result<TransportResponse, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((payload.to_string(), correlation_id.to_string()));
        match &self.script {
            TransportScript::Status(status_code) => Ok(TransportResponse {
                status_code: *status_code,
            }),
            TransportScript::Fail(err) => Err(err.clone()),
            TransportScript::Delayed(delay, status_code) => {
                tokio::time::sleep(*delay).await;
                Ok(TransportResponse {
                    status_code: *status_code,
                })
            }
        }
    }
}

/// In-memory repository whose standalone `save_invoice` can be switched to
/// fail, so the failure-recording write can be made to fail on its own.
#[derive(Default)]
pub struct FlakyRepository {
    inner: InMemoryInvoiceRepository,
    fail_saves: AtomicBool,
}

impl FlakyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InvoiceRepository for FlakyRepository {
    async fn begin(&self) -> RepositoryResult<Box<dyn InvoiceTransaction>> {
        self.inner.begin().await
    }

    async fn create_invoice(&self, invoice: &Invoice) -> RepositoryResult<()> {
        self.inner.create_invoice(invoice).await
    }

    async fn save_invoice(&self, invoice: &Invoice) -> RepositoryResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("connection reset by peer".to_string()));
        }
        self.inner.save_invoice(invoice).await
    }

    async fn fetch_invoice(&self, id: InvoiceId) -> RepositoryResult<Invoice> {
        self.inner.fetch_invoice(id).await
    }

    async fn fetch_invoices_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<Invoice>> {
        self.inner.fetch_invoices_for_shipment(shipment_id).await
    }

    async fn fetch_line_items_for_shipment(
        &self,
        shipment_id: ShipmentId,
    ) -> RepositoryResult<Vec<ShipmentLineItem>> {
        self.inner.fetch_line_items_for_shipment(shipment_id).await
    }
}
