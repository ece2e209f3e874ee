//! Billing document encoder seam.
//!
//! The encoder turns a shipment and its invoice into a structured billing
//! transaction document and serializes it to the wire payload sent to the
//! settlement gateway. Segment syntax belongs to the encoder implementation.

use thiserror::Error;

use movebill_core::Clock;
use movebill_invoicing::{Invoice, Shipment};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("failed to generate billing document: {0}")]
    Generate(String),

    #[error("failed to serialize billing document: {0}")]
    Serialize(String),
}

/// One segment of a billing document (identifier plus ordered elements).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    pub elements: Vec<String>,
}

impl Segment {
    pub fn new(id: impl Into<String>, elements: Vec<String>) -> Self {
        Self {
            id: id.into(),
            elements,
        }
    }
}

pub trait BillingDocument: Send + Sync {
    /// Segments in transmission order (diagnostics only).
    fn segments(&self) -> &[Segment];

    /// Wire payload.
    fn serialize(&self) -> Result<String, EncodeError>;
}

pub trait DocumentEncoder: Send + Sync {
    /// Build the billing document for `invoice`.
    ///
    /// `production` selects the gateway's production usage indicator; `clock`
    /// supplies any timestamps the document carries.
    fn generate(
        &self,
        shipment: &Shipment,
        invoice: &Invoice,
        production: bool,
        clock: &dyn Clock,
    ) -> Result<Box<dyn BillingDocument>, EncodeError>;
}
