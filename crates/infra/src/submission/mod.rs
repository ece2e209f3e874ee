//! Invoice submission pipeline.
//!
//! ```text
//! InvoiceCreator ──► SubmitInvoice ──► DocumentEncoder ──► SubmissionTransport
//!                          │
//!                          ├── accepted ──► InvoiceStatusUpdater
//!                          └── any failure ──► FailureRecorder
//! ```
//!
//! Each call handles one invoice and runs to completion; there is no queue or
//! background work.

mod creator;
mod error;
mod failure;
mod recalculate;
mod status_updater;
mod submitter;

pub use creator::InvoiceCreator;
pub use error::SubmissionError;
pub use failure::FailureRecorder;
pub use recalculate::RecalculateInvoice;
pub use status_updater::InvoiceStatusUpdater;
pub use submitter::SubmitInvoice;
