//! Cart operations. Cart membership never reserves stock; each add or
//! quantity change is bounded by availability net of other open carts.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::instrument;

use stockroom_cart::{AddItem, Cart, CartCommand, CartId, ClearCart, RemoveItem, UpdateQuantity};
use stockroom_core::{CustomerId, ProductId};
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_inventory::{Variant, VariantId};

use super::{CartLineView, CartView, Fulfillment, FulfillmentError, FulfillmentResult};
use crate::event_store::EventStore;

/// What the customer picked: a known variant, or the attributes it is resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantRef {
    Id(VariantId),
    Attributes {
        product_id: ProductId,
        color: String,
        size: String,
    },
}

impl From<VariantId> for VariantRef {
    fn from(value: VariantId) -> Self {
        Self::Id(value)
    }
}

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Add to the customer's open cart, opening it on first use. Adding a
    /// variant already in the cart raises that line's quantity.
    #[instrument(skip(self), err)]
    pub fn add_item(
        &self,
        customer_id: CustomerId,
        target: VariantRef,
        quantity: i64,
        thumbnail: Option<String>,
    ) -> FulfillmentResult<CartView> {
        let variant_id = self.resolve(&target)?;
        let variant = self.load_variant(variant_id)?;
        let cart_id = CartId::for_customer(customer_id);

        if !variant.is_active() {
            let err = FulfillmentError::insufficient(variant_id, quantity, 0);
            return Err(self.with_alternatives(err));
        }

        self.commit_cart(
            cart_id,
            CartCommand::AddItem(AddItem {
                cart_id,
                customer_id,
                variant_id,
                quantity,
                unit_price: variant.unit_price(),
                thumbnail,
                limit: self.cart_limit(&variant, cart_id),
                occurred_at: Utc::now(),
            }),
        )
        .map_err(|e| self.with_alternatives(e.for_variant(variant_id)))?;

        self.cart(customer_id)
    }

    /// Set a line's quantity. Zero removes the line.
    #[instrument(skip(self), err)]
    pub fn update_quantity(
        &self,
        customer_id: CustomerId,
        variant_id: VariantId,
        quantity: i64,
    ) -> FulfillmentResult<CartView> {
        if quantity == 0 {
            return self.remove_item(customer_id, variant_id);
        }

        let cart_id = CartId::for_customer(customer_id);
        let variant = self.load_variant(variant_id)?;
        let limit = if variant.is_active() {
            self.cart_limit(&variant, cart_id)
        } else {
            0
        };

        self.commit_cart(
            cart_id,
            CartCommand::UpdateQuantity(UpdateQuantity {
                cart_id,
                variant_id,
                quantity,
                limit,
                occurred_at: Utc::now(),
            }),
        )
        .map_err(|e| match e {
            FulfillmentError::NotFound { .. } => {
                FulfillmentError::not_found(format!("variant {variant_id} is not in the cart"))
            }
            other => self.with_alternatives(other.for_variant(variant_id)),
        })?;

        self.cart(customer_id)
    }

    /// Removing a line that is not there succeeds.
    #[instrument(skip(self), err)]
    pub fn remove_item(&self, customer_id: CustomerId, variant_id: VariantId) -> FulfillmentResult<CartView> {
        let cart_id = CartId::for_customer(customer_id);
        self.commit_cart(
            cart_id,
            CartCommand::RemoveItem(RemoveItem {
                cart_id,
                variant_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.cart(customer_id)
    }

    #[instrument(skip(self), err)]
    pub fn clear_cart(&self, customer_id: CustomerId) -> FulfillmentResult<CartView> {
        let cart_id = CartId::for_customer(customer_id);
        self.commit_cart(
            cart_id,
            CartCommand::ClearCart(ClearCart {
                cart_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(CartView::empty(customer_id))
    }

    /// The customer's cart with per-line maximum quantities.
    ///
    /// Lines whose variant was deactivated (or vanished) are dropped here, on
    /// read. A failed cleanup only hides the line from this view.
    pub fn cart(&self, customer_id: CustomerId) -> FulfillmentResult<CartView> {
        let cart_id = CartId::for_customer(customer_id);
        let cart = self.load_cart(cart_id)?;
        if !cart.exists() {
            return Ok(CartView::empty(customer_id));
        }

        let mut lines = Vec::with_capacity(cart.lines().len());
        for line in cart.lines() {
            let variant = match self.load_variant(line.variant_id) {
                Ok(v) if v.is_active() => v,
                Ok(_) | Err(FulfillmentError::NotFound { .. }) => {
                    self.drop_orphaned_line(cart_id, line.variant_id);
                    continue;
                }
                Err(other) => return Err(other),
            };

            lines.push(CartLineView {
                variant_id: line.variant_id,
                product_id: variant.product_id(),
                color: variant.color().to_string(),
                size: variant.size().to_string(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                line_total: line.line_total(),
                thumbnail: line.thumbnail.clone(),
                max_quantity: self.cart_limit(&variant, cart_id),
            });
        }

        let subtotal = lines.iter().map(|l| l.line_total).sum();
        Ok(CartView {
            customer_id,
            lines,
            subtotal,
        })
    }

    pub(crate) fn open_cart(&self, customer_id: CustomerId) -> FulfillmentResult<Cart> {
        self.load_cart(CartId::for_customer(customer_id))
    }

    fn resolve(&self, target: &VariantRef) -> FulfillmentResult<VariantId> {
        match target {
            VariantRef::Id(id) => Ok(*id),
            VariantRef::Attributes {
                product_id,
                color,
                size,
            } => Ok(self.find_variant(*product_id, color, size)?.variant_id),
        }
    }

    /// Most `cart_id` may hold of `variant`: fresh availability minus what
    /// other open carts hold.
    fn cart_limit(&self, variant: &Variant, cart_id: CartId) -> i64 {
        let held = self
            .read_models
            .carts
            .held_elsewhere(variant.id_typed(), cart_id);
        (variant.available() - held).max(0)
    }

    fn drop_orphaned_line(&self, cart_id: CartId, variant_id: VariantId) {
        let removed = self.commit_cart(
            cart_id,
            CartCommand::RemoveItem(RemoveItem {
                cart_id,
                variant_id,
                occurred_at: Utc::now(),
            }),
        );
        match removed {
            Ok(_) => tracing::info!(%cart_id, %variant_id, "dropped cart line for inactive variant"),
            Err(err) => tracing::warn!(%cart_id, %variant_id, error = %err, "failed to drop orphaned cart line"),
        }
    }
}
