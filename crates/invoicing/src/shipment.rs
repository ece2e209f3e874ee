//! Shipments and their billable line items.
//!
//! Pricing and approval workflows own most of a line item's fields; the
//! invoicing rules here only care about which invoice (if any) a line item is
//! billed on, and whether it is allowed to be billed yet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use movebill_core::{
    DomainError, DomainResult, Entity, InvoiceId, LineItemId, ShipmentId, Validate,
    ValidationErrors,
};

/// Approval state of a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineItemStatus {
    Submitted,
    Approved,
    ConditionallyApproved,
}

impl LineItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineItemStatus::Submitted => "SUBMITTED",
            LineItemStatus::Approved => "APPROVED",
            LineItemStatus::ConditionallyApproved => "CONDITIONALLY_APPROVED",
        }
    }
}

impl core::fmt::Display for LineItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for LineItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(LineItemStatus::Submitted),
            "APPROVED" => Ok(LineItemStatus::Approved),
            "CONDITIONALLY_APPROVED" => Ok(LineItemStatus::ConditionallyApproved),
            other => Err(DomainError::validation(format!(
                "unknown line item status '{other}'"
            ))),
        }
    }
}

/// A billable component of a shipment's cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentLineItem {
    id: LineItemId,
    shipment_id: ShipmentId,
    invoice_id: Option<InvoiceId>,
    status: LineItemStatus,
    requires_pre_approval: bool,
    item_code: String,
    /// Amount in smallest currency unit (e.g., cents), once priced.
    amount_cents: Option<u64>,
}

impl ShipmentLineItem {
    pub fn new(shipment_id: ShipmentId, item_code: impl Into<String>) -> Self {
        Self {
            id: LineItemId::new(),
            shipment_id,
            invoice_id: None,
            status: LineItemStatus::Submitted,
            requires_pre_approval: false,
            item_code: item_code.into(),
            amount_cents: None,
        }
    }

    /// Rebuild a line item from persisted columns.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: LineItemId,
        shipment_id: ShipmentId,
        invoice_id: Option<InvoiceId>,
        status: LineItemStatus,
        requires_pre_approval: bool,
        item_code: String,
        amount_cents: Option<u64>,
    ) -> Self {
        Self {
            id,
            shipment_id,
            invoice_id,
            status,
            requires_pre_approval,
            item_code,
            amount_cents,
        }
    }

    pub fn requiring_pre_approval(mut self) -> Self {
        self.requires_pre_approval = true;
        self
    }

    pub fn with_status(mut self, status: LineItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn id_typed(&self) -> LineItemId {
        self.id
    }

    pub fn shipment_id(&self) -> ShipmentId {
        self.shipment_id
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn status(&self) -> LineItemStatus {
        self.status
    }

    pub fn requires_pre_approval(&self) -> bool {
        self.requires_pre_approval
    }

    pub fn item_code(&self) -> &str {
        &self.item_code
    }

    pub fn amount_cents(&self) -> Option<u64> {
        self.amount_cents
    }

    pub fn is_invoiced(&self) -> bool {
        self.invoice_id.is_some()
    }

    /// Invariant: items that need pre-approval are billed only once approved.
    pub fn is_invoiceable(&self) -> bool {
        !self.requires_pre_approval || self.status == LineItemStatus::Approved
    }

    /// Bill this item on `invoice_id`.
    ///
    /// Binding is set once: rebinding to the same invoice is a no-op, rebinding
    /// to a different one is rejected.
    pub fn bind_to_invoice(&mut self, invoice_id: InvoiceId) -> DomainResult<()> {
        match self.invoice_id {
            Some(existing) if existing != invoice_id => Err(DomainError::invariant(format!(
                "line item {} is already billed on invoice {existing}",
                self.id
            ))),
            _ => {
                self.invoice_id = Some(invoice_id);
                Ok(())
            }
        }
    }
}

impl Entity for ShipmentLineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Validate for ShipmentLineItem {
    fn validate(&self) -> ValidationErrors {
        let mut errs = ValidationErrors::new();
        if self.id.is_nil() {
            errs.add("id", "cannot be nil");
        }
        if self.shipment_id.is_nil() {
            errs.add("shipment_id", "cannot be nil");
        }
        if self.invoice_id.is_some_and(|id| id.is_nil()) {
            errs.add("invoice_id", "cannot be nil when present");
        }
        if self.invoice_id.is_some() && !self.is_invoiceable() {
            errs.add(
                "status",
                format!(
                    "must be {} before it can be invoiced (is {})",
                    LineItemStatus::Approved,
                    self.status
                ),
            );
        }
        errs
    }
}

/// A shipment, as far as invoicing needs to see it.
///
/// The location/party fields are consumed by the billing document encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub line_items: Vec<ShipmentLineItem>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub carrier: Option<String>,
    pub customer: Option<String>,
}

impl Shipment {
    pub fn new(id: ShipmentId) -> Self {
        Self {
            id,
            line_items: Vec::new(),
            origin: None,
            destination: None,
            carrier: None,
            customer: None,
        }
    }

    /// Append a line item for this shipment and return its id.
    pub fn add_line_item(&mut self, item_code: impl Into<String>) -> LineItemId {
        let item = ShipmentLineItem::new(self.id, item_code);
        let id = item.id_typed();
        self.line_items.push(item);
        id
    }
}

impl Entity for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Group line item positions by the shipment they belong to.
///
/// Used when several invoices are submitted together so that each invoice only
/// ever binds its own shipment's items.
pub fn partition_by_shipment(items: &[ShipmentLineItem]) -> BTreeMap<ShipmentId, Vec<usize>> {
    let mut groups: BTreeMap<ShipmentId, Vec<usize>> = BTreeMap::new();
    for (idx, item) in items.iter().enumerate() {
        groups.entry(item.shipment_id).or_default().push(idx);
    }
    groups
}
