//! Invoicing domain module.
//!
//! This crate contains the business rules for shipment invoices: the invoice
//! status lifecycle, line-item binding, and partitioning helpers. It is pure
//! domain logic (no IO, no HTTP, no storage).

pub mod invoice;
pub mod shipment;

pub use invoice::{INVOICE_NUMBER_PLACEHOLDER, Invoice, InvoiceStatus};
pub use shipment::{LineItemStatus, Shipment, ShipmentLineItem, partition_by_shipment};
