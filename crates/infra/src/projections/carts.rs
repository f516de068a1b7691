use serde_json::Value as JsonValue;

use stockroom_cart::{Cart, CartEvent, CartId};
use stockroom_core::Aggregate;
use stockroom_events::EventEnvelope;
use stockroom_inventory::VariantId;

use super::cursor::{CursorCheck, ProjectionError, StreamCursors};
use crate::read_model::ReadStore;

/// Open carts, used to bound add-to-cart by what other customers already hold.
#[derive(Debug)]
pub struct CartsProjection<S>
where
    S: ReadStore<CartId, Cart>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> CartsProjection<S>
where
    S: ReadStore<CartId, Cart>,
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

    pub fn get(&self, cart_id: CartId) -> Option<Cart> {
        self.store.get(&cart_id).filter(Cart::exists)
    }

    /// Units of `variant_id` sitting in every open cart.
    pub fn total_held(&self, variant_id: VariantId) -> i64 {
        self.store
            .list()
            .iter()
            .map(|c| c.quantity_of(variant_id))
            .sum()
    }

    /// Units of `variant_id` held by carts other than `cart_id`.
    pub fn held_elsewhere(&self, variant_id: VariantId, cart_id: CartId) -> i64 {
        self.store
            .list()
            .iter()
            .filter(|c| c.id_typed() != cart_id)
            .map(|c| c.quantity_of(variant_id))
            .sum()
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursor = self.cursors.lock();
        if cursor.check(aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let event: CartEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let cart_id = event.cart_id();
        if cart_id.0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(aggregate_id));
        }

        let mut cart = self.store.get(&cart_id).unwrap_or_else(|| Cart::empty(cart_id));
        cart.apply(&event);
        self.store.upsert(cart_id, cart);

        cursor.advance(aggregate_id, seq);
        Ok(())
    }

    pub fn clear(&self) {
        self.cursors.clear();
        self.store.clear();
    }
}
