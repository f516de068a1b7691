//! Projection implementations (read model builders).
//!
//! Projections are rebuildable from the event store and idempotent per
//! (aggregate, sequence number), so redelivery is harmless.

pub mod carts;
pub mod cursor;
pub mod orders;
pub mod variant_stock;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use stockroom_cart::{Cart, CartId};
use stockroom_events::EventEnvelope;
use stockroom_inventory::{Variant, VariantId};
use stockroom_orders::{Order, OrderId};

use crate::event_store::{EventStore, StoredEvent};
use crate::read_model::InMemoryReadStore;

pub use carts::CartsProjection;
pub use cursor::{CursorCheck, ProjectionError, StreamCursors};
pub use orders::{MissingSummary, OrdersProjection, PendingItem};
pub use variant_stock::{LowStockGroup, VariantStock, VariantStockProjection};

/// Aggregate type of stock ledger streams.
pub const VARIANT_STREAM: &str = "inventory.variant";
/// Aggregate type of cart streams.
pub const CART_STREAM: &str = "cart.cart";
/// Aggregate type of order streams.
pub const ORDER_STREAM: &str = "orders.order";

pub type VariantStore = Arc<InMemoryReadStore<VariantId, Variant>>;
pub type CartStore = Arc<InMemoryReadStore<CartId, Cart>>;
pub type OrderStore = Arc<InMemoryReadStore<OrderId, Order>>;

/// Every read model of the service, routed by aggregate type.
#[derive(Debug)]
pub struct ReadModels {
    pub variants: VariantStockProjection<VariantStore>,
    pub carts: CartsProjection<CartStore>,
    pub orders: OrdersProjection<OrderStore>,
}

impl Default for ReadModels {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadModels {
    pub fn new() -> Self {
        Self {
            variants: VariantStockProjection::new(Arc::new(InMemoryReadStore::new())),
            carts: CartsProjection::new(Arc::new(InMemoryReadStore::new())),
            orders: OrdersProjection::new(Arc::new(InMemoryReadStore::new())),
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        match envelope.aggregate_type() {
            VARIANT_STREAM => self.variants.apply_envelope(envelope),
            CART_STREAM => self.carts.apply_envelope(envelope),
            ORDER_STREAM => self.orders.apply_envelope(envelope),
            other => Err(ProjectionError::UnknownAggregateType(other.to_string())),
        }
    }

    /// Apply freshly committed events. If another writer's events for the same
    /// stream have not been applied yet, the stream is re-read from the store.
    pub fn apply_committed<S: EventStore>(
        &self,
        store: &S,
        committed: &[StoredEvent],
    ) -> Result<(), ProjectionError> {
        for stored in committed {
            match self.apply_envelope(&stored.to_envelope()) {
                Err(ProjectionError::Gap { .. }) => self.catch_up(store, stored)?,
                other => other?,
            }
        }
        Ok(())
    }

    fn catch_up<S: EventStore>(&self, store: &S, stored: &StoredEvent) -> Result<(), ProjectionError> {
        tracing::debug!(
            aggregate_id = %stored.aggregate_id,
            aggregate_type = %stored.aggregate_type,
            "projection behind; replaying stream"
        );
        let stream = store
            .load_stream(stored.aggregate_id)
            .map_err(|e| ProjectionError::Deserialize(format!("catch-up load failed: {e}")))?;
        for e in stream.iter().filter(|e| e.sequence_number <= stored.sequence_number) {
            self.apply_envelope(&e.to_envelope())?;
        }
        Ok(())
    }

    /// Drop every read model and replay the full event log.
    pub fn rebuild(&self, events: &[StoredEvent]) -> Result<usize, ProjectionError> {
        self.variants.clear();
        self.carts.clear();
        self.orders.clear();

        let mut sorted: Vec<&StoredEvent> = events.iter().collect();
        sorted.sort_by_key(|e| (*e.aggregate_id.as_uuid(), e.sequence_number));

        for stored in &sorted {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(sorted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_dispatcher::CommandDispatcher;
    use crate::event_store::InMemoryEventStore;
    use chrono::Utc;
    use stockroom_core::{AggregateId, ProductId};
    use stockroom_events::InMemoryEventBus;
    use stockroom_inventory::{AdjustPhysical, RegisterVariant, StockCommand, Warehouse};

    fn register(variant_id: VariantId, product_id: ProductId, color: &str, size: &str) -> StockCommand {
        StockCommand::RegisterVariant(RegisterVariant {
            variant_id,
            product_id,
            color: color.to_string(),
            size: size.to_string(),
            unit_price: 100,
            occurred_at: Utc::now(),
        })
    }

    fn stock(variant_id: VariantId, warehouse: Warehouse, delta: i64) -> StockCommand {
        StockCommand::AdjustPhysical(AdjustPhysical {
            variant_id,
            warehouse,
            delta,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn duplicate_delivery_is_idempotent_and_rebuild_matches_live() {
        let store = Arc::new(InMemoryEventStore::new());
        let d = CommandDispatcher::new(store.clone(), Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()));
        let live = ReadModels::new();
        let id = VariantId::new(AggregateId::new());
        let make = |a| Variant::empty(VariantId::new(a));

        for cmd in [
            register(id, ProductId::new(), "red", "M"),
            stock(id, Warehouse::General, 4),
            stock(id, Warehouse::PublicSale, 2),
        ] {
            let out = d.dispatch(id.0, VARIANT_STREAM, cmd, make).unwrap();
            live.apply_committed(&store, &out.stored).unwrap();
            // Redelivery.
            live.apply_committed(&store, &out.stored).unwrap();
        }

        let row = live.variants.get(id).unwrap();
        assert_eq!((row.general, row.public_sale, row.available), (4, 2, 6));

        let rebuilt = ReadModels::new();
        let n = rebuilt.rebuild(&store.load_all().unwrap()).unwrap();
        assert_eq!(n, 3);
        assert_eq!(rebuilt.variants.get(id), live.variants.get(id));
    }

    #[test]
    fn gap_is_filled_from_the_store() {
        let store = Arc::new(InMemoryEventStore::new());
        let d = CommandDispatcher::new(store.clone(), Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()));
        let models = ReadModels::new();
        let id = VariantId::new(AggregateId::new());
        let make = |a| Variant::empty(VariantId::new(a));

        d.dispatch(id.0, VARIANT_STREAM, register(id, ProductId::new(), "red", "M"), make)
            .unwrap();
        let out = d
            .dispatch(id.0, VARIANT_STREAM, stock(id, Warehouse::General, 3), make)
            .unwrap();

        // The first event was never applied; applying the second catches up.
        models.apply_committed(&store, &out.stored).unwrap();
        assert_eq!(models.variants.get(id).unwrap().stock_qty, 3);
    }

    #[test]
    fn low_stock_groups_sum_colors_per_size() {
        let store = Arc::new(InMemoryEventStore::new());
        let d = CommandDispatcher::new(store.clone(), Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()));
        let make = |a| Variant::empty(VariantId::new(a));
        let product = ProductId::new();

        for (color, size, qty) in [("red", "M", 1), ("blue", "M", 1), ("red", "L", 5)] {
            let id = VariantId::new(AggregateId::new());
            d.dispatch(id.0, VARIANT_STREAM, register(id, product, color, size), make)
                .unwrap();
            d.dispatch(id.0, VARIANT_STREAM, stock(id, Warehouse::General, qty), make)
                .unwrap();
        }

        let models = ReadModels::new();
        models.rebuild(&store.load_all().unwrap()).unwrap();

        let groups = models.variants.low_stock_groups(3);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].size, "M");
        assert_eq!(groups[0].stock_qty, 2);
        assert_eq!(groups[0].variants.len(), 2);

        let found = models.variants.find(product, "RED", "l").unwrap();
        assert_eq!(found.stock_qty, 5);
    }
}
