use std::time::Duration;

use thiserror::Error;

use movebill_core::{DomainError, InvoiceId, ValidationErrors};

use crate::encoder::EncodeError;
use crate::repository::RepositoryError;
use crate::transport::TransportError;

/// Why an invoice submission did not complete.
///
/// Every variant except [`CompensationFailed`](SubmissionError::CompensationFailed)
/// is a cause: the invoice was recorded as `SUBMISSION_FAILURE` (when returned
/// from the orchestrator) or never left `IN_PROCESS` (guard refusals).
/// `CompensationFailed` means the failure itself could not be recorded: the
/// stored invoice keeps whatever status it had, `IN_PROCESS` or an outcome
/// another call already committed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SubmissionError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("settlement gateway responded with status {status_code}")]
    GatewayRejected { status_code: u16 },

    #[error("settlement gateway did not respond within {0:?}")]
    Timeout(Duration),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("persistence failed: {0}")]
    Persistence(RepositoryError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("invoice {0} is already being submitted")]
    InFlight(InvoiceId),

    #[error("{original}; additionally failed to record the failure: {compensation}")]
    CompensationFailed {
        original: Box<SubmissionError>,
        compensation: Box<SubmissionError>,
    },
}

impl From<RepositoryError> for SubmissionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Validation(errs) => SubmissionError::Validation(errs),
            other => SubmissionError::Persistence(other),
        }
    }
}

impl SubmissionError {
    /// Field-level problems carried by this error, merged across both causes
    /// of a `CompensationFailed`.
    pub fn validation_errors(&self) -> ValidationErrors {
        match self {
            SubmissionError::Validation(errs) => errs.clone(),
            SubmissionError::Persistence(RepositoryError::Validation(errs)) => errs.clone(),
            SubmissionError::CompensationFailed {
                original,
                compensation,
            } => {
                let mut merged = original.validation_errors();
                merged.append(compensation.validation_errors());
                merged
            }
            _ => ValidationErrors::new(),
        }
    }

    pub fn is_compensation_failure(&self) -> bool {
        matches!(self, SubmissionError::CompensationFailed { .. })
    }

    /// The cause of the failed submission, looking through a failed compensation.
    pub fn cause(&self) -> &SubmissionError {
        match self {
            SubmissionError::CompensationFailed { original, .. } => original.as_ref(),
            other => other,
        }
    }
}
