use std::sync::Arc;

use tracing::{error, info, instrument};

use movebill_invoicing::Invoice;

use crate::repository::InvoiceRepository;

use super::SubmissionError;

/// Best-effort recording of a failed submission.
///
/// The `SUBMISSION_FAILURE` write is independent of whatever step failed: it
/// runs outside any transaction that step used.
pub struct FailureRecorder {
    repo: Arc<dyn InvoiceRepository>,
}

impl FailureRecorder {
    pub fn new(repo: Arc<dyn InvoiceRepository>) -> Self {
        Self { repo }
    }

    /// Mark `invoice` failed and hand back the error the caller should see.
    ///
    /// If the write succeeds, `invoice` becomes `SUBMISSION_FAILURE` and `cause`
    /// is returned untouched. If it fails, `invoice` stays as it was and the
    /// result is [`SubmissionError::CompensationFailed`] carrying both errors.
    /// That includes storage refusing the write because the stored invoice
    /// already reached an outcome.
    #[instrument(
        skip(self, invoice, cause),
        fields(invoice_id = %invoice.id_typed(), cause = %cause)
    )]
    pub async fn record_failure(
        &self,
        invoice: &mut Invoice,
        cause: SubmissionError,
    ) -> SubmissionError {
        match self.write_failure(invoice).await {
            Ok(failed) => {
                *invoice = failed;
                info!("submission failure recorded");
                cause
            }
            Err(compensation) => {
                error!(error = %compensation, "could not record submission failure");
                SubmissionError::CompensationFailed {
                    original: Box::new(cause),
                    compensation: Box::new(compensation),
                }
            }
        }
    }

    async fn write_failure(&self, invoice: &Invoice) -> Result<Invoice, SubmissionError> {
        let mut failed = invoice.clone();
        failed.mark_submission_failed()?;
        self.repo.save_invoice(&failed).await?;
        Ok(failed)
    }
}
