//! Read side for the customer and staff UIs.

use serde_json::Value as JsonValue;

use stockroom_core::CustomerId;
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_orders::OrderId;

use super::{CustomerOrders, Fulfillment, FulfillmentError, FulfillmentResult, OrderView};
use crate::event_store::EventStore;
use crate::projections::{LowStockGroup, MissingSummary, PendingItem};

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Fresh read of one order; deleted orders are not found.
    pub fn order(&self, order_id: OrderId) -> FulfillmentResult<OrderView> {
        let order = self.load_order(order_id)?;
        Ok(OrderView::from(&order))
    }

    /// Same as [`Fulfillment::order`], restricted to the owning customer.
    pub fn customer_order(&self, customer_id: CustomerId, order_id: OrderId) -> FulfillmentResult<OrderView> {
        let order = self.load_order(order_id)?;
        if order.customer_id() != Some(customer_id) {
            return Err(FulfillmentError::not_found(format!("order {order_id}")));
        }
        Ok(OrderView::from(&order))
    }

    /// Active orders (still cancellable) and previous (sent) orders.
    pub fn customer_orders(&self, customer_id: CustomerId) -> CustomerOrders {
        let orders = &self.read_models.orders;
        CustomerOrders {
            active: orders.active_for(customer_id).iter().map(OrderView::from).collect(),
            previous: orders.previous_for(customer_id).iter().map(OrderView::from).collect(),
        }
    }

    /// Reserved items staff still have to pick, oldest order first.
    pub fn pending_items(&self) -> Vec<PendingItem> {
        self.read_models.orders.pending_items()
    }

    pub fn missing_summary(&self) -> Vec<MissingSummary> {
        self.read_models.orders.missing_summary()
    }

    /// Product/size groups under the configured low-stock threshold.
    pub fn low_stock_groups(&self) -> Vec<LowStockGroup> {
        self.read_models
            .variants
            .low_stock_groups(self.config.low_stock_threshold)
    }
}
