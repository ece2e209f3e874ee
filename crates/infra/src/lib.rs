//! Infrastructure layer: persistence, gateway seams, config, and the invoice
//! submission pipeline built on them.

pub mod config;
pub mod encoder;
pub mod repository;
pub mod submission;
pub mod transport;

pub use config::SubmissionConfig;
pub use encoder::{BillingDocument, DocumentEncoder, EncodeError, Segment};
pub use repository::{
    InMemoryInvoiceRepository, InvoiceRepository, InvoiceTransaction, PostgresInvoiceRepository,
    RepositoryError, RepositoryResult,
};
pub use submission::{
    FailureRecorder, InvoiceCreator, InvoiceStatusUpdater, RecalculateInvoice, SubmissionError,
    SubmitInvoice,
};
pub use transport::{
    AcceptedStatuses, HttpSubmissionTransport, SubmissionTransport, TransportError,
    TransportResponse,
};

#[cfg(test)]
mod test_support;
