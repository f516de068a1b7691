use serde::{Deserialize, Serialize};

use stockroom_core::{AggregateId, Entity};
use stockroom_inventory::{VariantId, WarehouseSplit};

/// Order item identifier (unique across orders).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderItemId(pub AggregateId);

impl OrderItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Fulfillment status of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Newly placed, not yet handled by staff.
    Reserved,
    /// Staff physically set the units aside.
    Picked,
    /// Staff could not fulfill it; awaiting a customer decision.
    Missing,
}

/// Status shown to customers. "Waiting" is a reserved item staff have queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerItemStatus {
    Reserved,
    Waiting,
    Picked,
    Missing,
}

/// Order item entity, mutated only through the `Order` root.
///
/// `reserved_held` is what this item currently contributes to the variant's
/// reserved counter; `taken` is the physical stock withdrawn for it, per
/// warehouse. Together they let cancellation undo exactly what was done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Price snapshot in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub status: ItemStatus,
    /// Staff-internal queue flag ("waiting"); never changes `status`.
    pub queued: bool,
    pub reserved_held: i64,
    pub taken: WarehouseSplit,
}

impl Entity for OrderItem {
    type Id = OrderItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl OrderItem {
    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity.max(0) as u64)
    }

    pub fn is_picked(&self) -> bool {
        self.status == ItemStatus::Picked
    }

    pub fn customer_status(&self) -> CustomerItemStatus {
        match (self.status, self.queued) {
            (ItemStatus::Reserved, false) => CustomerItemStatus::Reserved,
            (ItemStatus::Reserved, true) => CustomerItemStatus::Waiting,
            (ItemStatus::Picked, _) => CustomerItemStatus::Picked,
            (ItemStatus::Missing, _) => CustomerItemStatus::Missing,
        }
    }
}
