use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use stockroom_core::{Aggregate, CustomerId};
use stockroom_events::EventEnvelope;
use stockroom_orders::{ItemStatus, Order, OrderEvent, OrderId, OrderItem, OrderStatus};

use super::cursor::{CursorCheck, ProjectionError, StreamCursors};
use crate::read_model::ReadStore;

/// A reserved item staff still have to handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingItem {
    pub order_id: OrderId,
    pub customer_id: Option<CustomerId>,
    pub order_status: OrderStatus,
    pub placed_at: Option<DateTime<Utc>>,
    pub item: OrderItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingSummary {
    pub order_id: OrderId,
    pub customer_id: Option<CustomerId>,
    pub missing_count: usize,
}

/// Orders read model. Deleted orders are kept internally (so late events
/// still apply) but never surface in any listing.
#[derive(Debug)]
pub struct OrdersProjection<S>
where
    S: ReadStore<OrderId, Order>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OrdersProjection<S>
where
    S: ReadStore<OrderId, Order>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn cursors(&self) -> &StreamCursors {
        &self.cursors
    }

    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.store.get(&order_id).filter(Order::exists)
    }

    /// Every visible order, oldest first.
    pub fn list(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.store.list().into_iter().filter(Order::exists).collect();
        orders.sort_by_key(|o| (o.placed_at(), *o.id_typed().0.as_uuid()));
        orders
    }

    /// Orders the customer can still cancel from (`active` or `closed`).
    pub fn active_for(&self, customer_id: CustomerId) -> Vec<Order> {
        self.list()
            .into_iter()
            .filter(|o| o.customer_id() == Some(customer_id) && o.is_modifiable())
            .collect()
    }

    /// Sent orders ("previous orders").
    pub fn previous_for(&self, customer_id: CustomerId) -> Vec<Order> {
        self.list()
            .into_iter()
            .filter(|o| o.customer_id() == Some(customer_id) && o.status() == OrderStatus::Sent)
            .collect()
    }

    pub fn pending_items(&self) -> Vec<PendingItem> {
        self.list()
            .into_iter()
            .filter(Order::is_modifiable)
            .flat_map(|o| {
                o.items()
                    .iter()
                    .filter(|i| i.status == ItemStatus::Reserved)
                    .map(|item| PendingItem {
                        order_id: o.id_typed(),
                        customer_id: o.customer_id(),
                        order_status: o.status(),
                        placed_at: o.placed_at(),
                        item: item.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn missing_summary(&self) -> Vec<MissingSummary> {
        self.list()
            .into_iter()
            .filter(|o| o.is_modifiable() && o.missing_count() > 0)
            .map(|o| MissingSummary {
                order_id: o.id_typed(),
                customer_id: o.customer_id(),
                missing_count: o.missing_count(),
            })
            .collect()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursor = self.cursors.lock();
        if cursor.check(aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let event: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let order_id = event.order_id();
        if order_id.0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(aggregate_id));
        }

        let mut order = self.store.get(&order_id).unwrap_or_else(|| Order::empty(order_id));
        order.apply(&event);
        self.store.upsert(order_id, order);

        cursor.advance(aggregate_id, seq);
        Ok(())
    }

    pub fn clear(&self) {
        self.cursors.clear();
        self.store.clear();
    }
}
