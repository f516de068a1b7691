//! Serializable shapes returned to the customer and staff UIs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use stockroom_core::{CustomerId, ProductId};
use stockroom_inventory::VariantId;
use stockroom_orders::{
    Adjustment, CustomerItemStatus, ItemStatus, Order, OrderId, OrderItem, OrderItemId, OrderStatus,
};

use crate::external::Alternative;
use crate::fulfillment::error::FulfillmentError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLineView {
    pub variant_id: VariantId,
    pub product_id: Option<ProductId>,
    pub color: String,
    pub size: String,
    pub quantity: i64,
    pub unit_price: u64,
    pub line_total: u64,
    pub thumbnail: Option<String>,
    /// Most this line may be raised to: remaining stock plus its own quantity.
    pub max_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub customer_id: CustomerId,
    pub lines: Vec<CartLineView>,
    pub subtotal: u64,
}

impl CartView {
    pub(crate) fn empty(customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            lines: Vec::new(),
            subtotal: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemView {
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
    pub line_total: u64,
    pub status: ItemStatus,
    pub customer_status: CustomerItemStatus,
    pub queued: bool,
    pub can_cancel: bool,
}

impl OrderItemView {
    fn from_item(item: &OrderItem, order: &Order) -> Self {
        Self {
            item_id: item.id,
            variant_id: item.variant_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total(),
            status: item.status,
            customer_status: item.customer_status(),
            queued: item.queued,
            can_cancel: order.can_cancel_item(item.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub customer_id: Option<CustomerId>,
    pub status: OrderStatus,
    pub items: Vec<OrderItemView>,
    pub cancelled_items: Vec<OrderItemView>,
    pub adjustments: Vec<Adjustment>,
    pub notes: String,
    pub total: u64,
    pub missing_count: usize,
    pub customer_cancelled: bool,
    pub placed_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id_typed(),
            customer_id: order.customer_id(),
            status: order.status(),
            items: order
                .items()
                .iter()
                .map(|i| OrderItemView::from_item(i, order))
                .collect(),
            cancelled_items: order
                .cancelled_items()
                .iter()
                .map(|i| OrderItemView::from_item(i, order))
                .collect(),
            adjustments: order.adjustments().to_vec(),
            notes: order.notes().to_string(),
            total: order.total(),
            missing_count: order.missing_count(),
            customer_cancelled: order.customer_cancelled(),
            placed_at: order.placed_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerOrders {
    pub active: Vec<OrderView>,
    pub previous: Vec<OrderView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedLine {
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
}

/// A cart line that stayed in the cart because it could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedLine {
    pub variant_id: VariantId,
    pub quantity: i64,
    pub error: FulfillmentError,
}

impl FailedLine {
    pub fn alternatives(&self) -> &[Alternative] {
        match &self.error {
            FulfillmentError::InsufficientStock { alternatives, .. } => alternatives.as_slice(),
            _ => &[],
        }
    }
}

/// Per-line outcome of a checkout; partial success is normal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutReport {
    pub order: Option<OrderView>,
    pub converted: Vec<ConvertedLine>,
    pub failed: Vec<FailedLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    /// The order after cancellation; `None` once it has been deleted.
    pub order: Option<OrderView>,
    pub order_deleted: bool,
    pub cancelled_items: Vec<OrderItemId>,
    /// Reserved units given back to the ledger.
    pub released: i64,
    pub staff_notified: bool,
}

impl CancelOutcome {
    pub(crate) fn nothing(order: Option<OrderView>) -> Self {
        Self {
            order,
            order_deleted: false,
            cancelled_items: Vec::new(),
            released: 0,
            staff_notified: false,
        }
    }
}
