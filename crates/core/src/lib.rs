//! `movebill-core`: shared building blocks for the billing pipeline.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{InvoiceId, LineItemId, ShipmentId, UploadId};
pub use validation::{Validate, ValidationErrors};
