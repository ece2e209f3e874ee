use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use movebill_core::{Clock, DomainError, InvoiceId, SystemClock};
use movebill_invoicing::{Invoice, InvoiceStatus, Shipment};

use crate::config::SubmissionConfig;
use crate::encoder::DocumentEncoder;
use crate::repository::{InvoiceRepository, PostgresInvoiceRepository, RepositoryError};
use crate::transport::{HttpSubmissionTransport, SubmissionTransport};

use super::{FailureRecorder, InvoiceStatusUpdater, SubmissionError};

/// Submits one invoice to the settlement gateway and records the outcome.
///
/// Steps: check the line items can be billed on the invoice, generate the
/// billing document, serialize and transmit it, then mark the invoice
/// submitted and bind its line items. A failure at any step is handed to the
/// [`FailureRecorder`].
///
/// Without `exclusive_submission`, nothing stops the same invoice from being
/// transmitted twice by two calls.
pub struct SubmitInvoice {
    repo: Arc<dyn InvoiceRepository>,
    encoder: Arc<dyn DocumentEncoder>,
    transport: Arc<dyn SubmissionTransport>,
    clock: Arc<dyn Clock>,
    config: SubmissionConfig,
    status_updater: InvoiceStatusUpdater,
    failure_recorder: FailureRecorder,
    in_flight: Arc<Mutex<HashSet<InvoiceId>>>,
}

impl SubmitInvoice {
    pub fn new(
        repo: Arc<dyn InvoiceRepository>,
        encoder: Arc<dyn DocumentEncoder>,
        transport: Arc<dyn SubmissionTransport>,
        clock: Arc<dyn Clock>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            status_updater: InvoiceStatusUpdater::new(Arc::clone(&repo)),
            failure_recorder: FailureRecorder::new(Arc::clone(&repo)),
            repo,
            encoder,
            transport,
            clock,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Wire the Postgres repository and HTTP gateway transport named by
    /// `config`, with wall-clock time.
    pub async fn connect(
        config: SubmissionConfig,
        encoder: Arc<dyn DocumentEncoder>,
    ) -> anyhow::Result<Self> {
        let repo = PostgresInvoiceRepository::from_config(&config)
            .await
            .context("failed to open invoice repository")?;
        let transport = HttpSubmissionTransport::from_config(&config)
            .context("failed to build gateway transport")?;
        Ok(Self::new(
            Arc::new(repo),
            encoder,
            Arc::new(transport),
            Arc::new(SystemClock),
            config,
        ))
    }

    /// Submit `invoice` for `shipment`.
    ///
    /// On success `invoice` is `SUBMITTED` and `shipment`'s line items are bound
    /// to it. On failure the returned error is the original cause when the
    /// failure was recorded, or [`SubmissionError::CompensationFailed`] when it
    /// could not be. Refusals (terminal invoice, submission already in flight)
    /// return before anything is sent or written.
    #[instrument(
        skip_all,
        fields(invoice_id = %invoice.id_typed(), shipment_id = %shipment.id),
        err
    )]
    pub async fn call(
        &self,
        invoice: &mut Invoice,
        shipment: &mut Shipment,
    ) -> Result<(), SubmissionError> {
        if invoice.status().is_terminal() {
            return Err(
                DomainError::invalid_transition(invoice.status(), InvoiceStatus::Submitted).into(),
            );
        }

        let _claim = if self.config.exclusive_submission {
            Some(self.claim(invoice.id_typed()).await?)
        } else {
            None
        };

        match self.attempt(invoice, shipment).await {
            Ok(()) => {
                info!("invoice submitted");
                Ok(())
            }
            Err(cause) => {
                warn!(error = %cause, "invoice submission failed");
                Err(self.failure_recorder.record_failure(invoice, cause).await)
            }
        }
    }

    async fn attempt(
        &self,
        invoice: &mut Invoice,
        shipment: &mut Shipment,
    ) -> Result<(), SubmissionError> {
        self.status_updater
            .check_bindable(invoice, &shipment.line_items)?;

        let document = self.encoder.generate(
            shipment,
            invoice,
            self.config.send_production_invoice,
            self.clock.as_ref(),
        )?;
        debug!(segment_count = document.segments().len(), "billing document generated");
        let payload = document.serialize()?;

        let correlation_id = Uuid::now_v7().to_string();
        let deadline = self.config.transmit_deadline;
        let response = tokio::time::timeout(deadline, self.transport.send(&payload, &correlation_id))
            .await
            .map_err(|_| SubmissionError::Timeout(deadline))??;

        if !self.config.accepted_statuses.accepts(response.status_code) {
            return Err(SubmissionError::GatewayRejected {
                status_code: response.status_code,
            });
        }
        info!(%correlation_id, status_code = response.status_code, "gateway accepted invoice");

        self.status_updater
            .mark_submitted(invoice, &mut shipment.line_items)
            .await
    }

    /// Reserve `invoice_id` for this call and confirm storage still has it
    /// `IN_PROCESS`.
    async fn claim(&self, invoice_id: InvoiceId) -> Result<InFlightClaim, SubmissionError> {
        let claim = InFlightClaim::acquire(Arc::clone(&self.in_flight), invoice_id)?;

        let stored = match self.repo.fetch_invoice(invoice_id).await {
            Ok(stored) => stored,
            Err(RepositoryError::NotFound) => {
                return Err(DomainError::not_found().into());
            }
            Err(e) => return Err(e.into()),
        };
        if stored.status() != InvoiceStatus::InProcess {
            return Err(
                DomainError::invalid_transition(stored.status(), InvoiceStatus::Submitted).into(),
            );
        }
        Ok(claim)
    }
}

/// Membership in the in-flight set, released on drop.
struct InFlightClaim {
    in_flight: Arc<Mutex<HashSet<InvoiceId>>>,
    invoice_id: InvoiceId,
}

impl InFlightClaim {
    fn acquire(
        in_flight: Arc<Mutex<HashSet<InvoiceId>>>,
        invoice_id: InvoiceId,
    ) -> Result<Self, SubmissionError> {
        let inserted = in_flight
            .lock()
            .map_err(|_| RepositoryError::Database("in-flight set lock poisoned".to_string()))?
            .insert(invoice_id);
        if !inserted {
            return Err(SubmissionError::InFlight(invoice_id));
        }
        Ok(Self {
            in_flight,
            invoice_id,
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.invoice_id);
        }
    }
}
