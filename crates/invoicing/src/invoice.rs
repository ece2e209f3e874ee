use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use movebill_core::{
    DomainError, DomainResult, Entity, InvoiceId, ShipmentId, UploadId, Validate,
    ValidationErrors,
};

/// Invoice number assigned at creation until a real numbering sequence exists.
pub const INVOICE_NUMBER_PLACEHOLDER: &str = "INVOICE_NUMBER_PLACEHOLDER";

/// Invoice status lifecycle.
///
/// ```text
/// IN_PROCESS ──► SUBMITTED
///      │
///      └──────► SUBMISSION_FAILURE
/// ```
///
/// Both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    InProcess,
    Submitted,
    SubmissionFailure,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 3] = [
        InvoiceStatus::InProcess,
        InvoiceStatus::Submitted,
        InvoiceStatus::SubmissionFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::InProcess => "IN_PROCESS",
            InvoiceStatus::Submitted => "SUBMITTED",
            InvoiceStatus::SubmissionFailure => "SUBMISSION_FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceStatus::InProcess)
    }

    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::InProcess, InvoiceStatus::Submitted)
                | (InvoiceStatus::InProcess, InvoiceStatus::SubmissionFailure)
        )
    }

    /// Return `next` if the lifecycle allows moving there from `self`.
    pub fn transition(self, next: InvoiceStatus) -> DomainResult<InvoiceStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::invalid_transition(self, next))
        }
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROCESS" => Ok(InvoiceStatus::InProcess),
            "SUBMITTED" => Ok(InvoiceStatus::Submitted),
            "SUBMISSION_FAILURE" => Ok(InvoiceStatus::SubmissionFailure),
            other => Err(DomainError::validation(format!(
                "unknown invoice status '{other}'"
            ))),
        }
    }
}

/// Billing record for a shipment's charges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    id: InvoiceId,
    status: InvoiceStatus,
    invoice_number: String,
    invoiced_date: DateTime<Utc>,
    shipment_id: ShipmentId,
    upload_id: Option<UploadId>,
}

impl Invoice {
    /// A fresh invoice for `shipment_id`, in `IN_PROCESS` with the placeholder number.
    pub fn new(shipment_id: ShipmentId, invoiced_date: DateTime<Utc>) -> Self {
        Self {
            id: InvoiceId::new(),
            status: InvoiceStatus::InProcess,
            invoice_number: INVOICE_NUMBER_PLACEHOLDER.to_string(),
            invoiced_date,
            shipment_id,
            upload_id: None,
        }
    }

    /// Rebuild an invoice from persisted columns.
    pub fn restore(
        id: InvoiceId,
        status: InvoiceStatus,
        invoice_number: String,
        invoiced_date: DateTime<Utc>,
        shipment_id: ShipmentId,
        upload_id: Option<UploadId>,
    ) -> Self {
        Self {
            id,
            status,
            invoice_number,
            invoiced_date,
            shipment_id,
            upload_id,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn invoiced_date(&self) -> DateTime<Utc> {
        self.invoiced_date
    }

    pub fn shipment_id(&self) -> ShipmentId {
        self.shipment_id
    }

    pub fn upload_id(&self) -> Option<UploadId> {
        self.upload_id
    }

    pub fn mark_submitted(&mut self) -> DomainResult<()> {
        self.status = self.status.transition(InvoiceStatus::Submitted)?;
        Ok(())
    }

    pub fn mark_submission_failed(&mut self) -> DomainResult<()> {
        self.status = self.status.transition(InvoiceStatus::SubmissionFailure)?;
        Ok(())
    }

    /// Reference a supporting uploaded document.
    ///
    /// Only an invoice that has not reached an outcome can change its document.
    pub fn attach_upload(&mut self, upload_id: UploadId) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invariant(format!(
                "cannot attach a document to a {} invoice",
                self.status
            )));
        }
        self.upload_id = Some(upload_id);
        Ok(())
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Validate for Invoice {
    fn validate(&self) -> ValidationErrors {
        let mut errs = ValidationErrors::new();
        if self.id.is_nil() {
            errs.add("id", "cannot be nil");
        }
        if self.invoice_number.trim().is_empty() {
            errs.add("invoice_number", "cannot be blank");
        }
        if self.shipment_id.is_nil() {
            errs.add("shipment_id", "cannot be nil");
        }
        errs
    }
}
