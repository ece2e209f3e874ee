use tracing::{instrument, warn};

use movebill_core::{DomainError, DomainResult, ShipmentId};

/// Re-pricing of delivered shipments.
///
/// Intended to recompute line-item pricing for delivered or completed
/// shipments last modified before a cutoff, keeping already-approved
/// accessorials and logging the before/after amounts. The cutoff, trigger and
/// log layout are not decided yet, so every call is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecalculateInvoice;

impl RecalculateInvoice {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(shipment_id = %shipment_id))]
    pub fn recalculate(&self, shipment_id: ShipmentId) -> DomainResult<()> {
        warn!("invoice recalculation requested but not available");
        Err(DomainError::not_implemented("invoice recalculation"))
    }
}
