//! Fulfillment service: the only path by which stock, carts and orders change.
//!
//! Every operation re-reads the aggregates it decides on, dispatches one
//! command per aggregate, and derives ledger side effects from the committed
//! events. Read models are updated synchronously after each commit.
//!
//! Ledger commands are retried on version conflicts (they are increments
//! re-decided against fresh state). Cart and order commands are not: a
//! conflict there means someone else changed the row, and the caller gets
//! [`FulfillmentError::StaleRead`].

pub mod cancellation;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod queries;
pub mod views;
pub mod workflow;

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use stockroom_cart::{Cart, CartId};
use stockroom_core::{Aggregate, AggregateId, DomainError};
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_inventory::{AdjustReserved, ReturnStock, StockCommand, StockEvent, Variant, VariantId, WarehouseSplit};
use stockroom_orders::{Order, OrderId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::config::FulfillmentConfig;
use crate::event_store::{EventStore, StoredEvent};
use crate::external::{AlternativeResolver, StaffNotifier};
use crate::projections::{ReadModels, CART_STREAM, ORDER_STREAM, VARIANT_STREAM};

pub use cancellation::SubstitutionOutcome;
pub use cart::VariantRef;
pub use catalog::NewVariant;
pub use error::FulfillmentError;
pub use views::{
    CancelOutcome, CartLineView, CartView, CheckoutReport, ConvertedLine, CustomerOrders, FailedLine,
    OrderItemView, OrderView,
};
pub use workflow::StaffAddItem;

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

pub struct Fulfillment<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    read_models: Arc<ReadModels>,
    notifier: Arc<dyn StaffNotifier>,
    resolver: Arc<dyn AlternativeResolver>,
    config: FulfillmentConfig,
}

impl<S, B> std::fmt::Debug for Fulfillment<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fulfillment")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        read_models: Arc<ReadModels>,
        notifier: Arc<dyn StaffNotifier>,
        resolver: Arc<dyn AlternativeResolver>,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            read_models,
            notifier,
            resolver,
            config,
        }
    }

    pub fn read_models(&self) -> &Arc<ReadModels> {
        &self.read_models
    }

    pub fn config(&self) -> &FulfillmentConfig {
        &self.config
    }

    /// Rebuild every read model from the full event log.
    pub fn rebuild_read_models(&self) -> FulfillmentResult<usize> {
        let events = self
            .dispatcher
            .store()
            .load_all()
            .map_err(DispatchError::from)?;
        let n = self
            .read_models
            .rebuild(&events)
            .map_err(|e| FulfillmentError::Store {
                message: e.to_string(),
            })?;
        tracing::info!(event_count = n, "read models rebuilt");
        Ok(n)
    }

    fn project(&self, stored: &[StoredEvent]) {
        if let Err(err) = self.read_models.apply_committed(self.dispatcher.store(), stored) {
            // The events are durable; the view heals on the next rebuild.
            tracing::warn!(error = %err, "failed to project committed events");
        }
    }

    fn commit<A>(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        command: A::Command,
        make: impl FnOnce(AggregateId) -> A,
    ) -> FulfillmentResult<Dispatched<A::Event>>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: stockroom_events::Event + Serialize + DeserializeOwned,
    {
        let out = self
            .dispatcher
            .dispatch(aggregate_id, aggregate_type, command, make)?;
        self.project(&out.stored);
        Ok(out)
    }

    /// Atomic ledger change: re-decided against a fresh `Variant` and retried
    /// on version conflicts.
    fn commit_ledger(
        &self,
        variant_id: VariantId,
        decide: impl FnMut(&Variant) -> Result<StockCommand, DispatchError>,
    ) -> FulfillmentResult<Dispatched<StockEvent>> {
        let out = self
            .dispatcher
            .dispatch_with_retry(
                variant_id.0,
                VARIANT_STREAM,
                self.config.ledger_retries,
                make_variant,
                decide,
            )
            .map_err(|e| FulfillmentError::from(e).for_variant(variant_id))?;
        self.project(&out.stored);
        Ok(out)
    }

    fn commit_cart(&self, cart_id: CartId, command: stockroom_cart::CartCommand) -> FulfillmentResult<Dispatched<stockroom_cart::CartEvent>> {
        self.commit(CART_STREAM, cart_id.0, command, make_cart)
    }

    /// Cart write that only lands if the cart is still at `version`.
    fn commit_cart_at(
        &self,
        cart_id: CartId,
        version: u64,
        command: stockroom_cart::CartCommand,
    ) -> FulfillmentResult<Dispatched<stockroom_cart::CartEvent>> {
        let out = self
            .dispatcher
            .dispatch_at(cart_id.0, CART_STREAM, version, command, make_cart)?;
        self.project(&out.stored);
        Ok(out)
    }

    fn commit_order(&self, order_id: OrderId, command: stockroom_orders::OrderCommand) -> FulfillmentResult<Dispatched<stockroom_orders::OrderEvent>> {
        self.commit(ORDER_STREAM, order_id.0, command, make_order)
    }

    fn load_variant(&self, variant_id: VariantId) -> FulfillmentResult<Variant> {
        let variant: Variant = self.dispatcher.load(variant_id.0, make_variant)?;
        if !variant.exists() {
            return Err(FulfillmentError::not_found(format!("variant {variant_id}")));
        }
        Ok(variant)
    }

    fn load_cart(&self, cart_id: CartId) -> FulfillmentResult<Cart> {
        Ok(self.dispatcher.load(cart_id.0, make_cart)?)
    }

    /// Fresh read of an order; deleted or never-placed orders are not found.
    fn load_order(&self, order_id: OrderId) -> FulfillmentResult<Order> {
        let order: Order = self.dispatcher.load(order_id.0, make_order)?;
        if !order.exists() {
            return Err(FulfillmentError::not_found(format!("order {order_id}")));
        }
        Ok(order)
    }

    /// Give back reserved units. Releases clamp at zero in the ledger.
    fn release_reserved(&self, variant_id: VariantId, quantity: i64) -> FulfillmentResult<i64> {
        if quantity <= 0 {
            return Ok(0);
        }
        let out = self.commit_ledger(variant_id, |_| {
            Ok(StockCommand::AdjustReserved(AdjustReserved {
                variant_id,
                delta: -quantity,
                occurred_at: Utc::now(),
            }))
        })?;
        Ok(out
            .events
            .iter()
            .map(|e| match e {
                StockEvent::ReservedAdjusted(r) => -r.delta,
                _ => 0,
            })
            .sum())
    }

    fn return_stock(&self, variant_id: VariantId, split: WarehouseSplit) -> FulfillmentResult<()> {
        if split.is_empty() {
            return Ok(());
        }
        self.commit_ledger(variant_id, |_| {
            Ok(StockCommand::ReturnStock(ReturnStock {
                variant_id,
                split,
                occurred_at: Utc::now(),
            }))
        })?;
        Ok(())
    }

    /// Compensation after a later step failed. Best-effort: logged, never raised.
    fn undo_reservation(&self, variant_id: VariantId, quantity: i64) {
        if let Err(err) = self.release_reserved(variant_id, quantity) {
            tracing::warn!(%variant_id, quantity, error = %err, "failed to release reservation during rollback");
        }
    }

    fn undo_withdrawal(&self, variant_id: VariantId, split: WarehouseSplit) {
        if let Err(err) = self.return_stock(variant_id, split) {
            tracing::warn!(%variant_id, ?split, error = %err, "failed to return stock during rollback");
        }
    }
}

pub(crate) fn make_variant(id: AggregateId) -> Variant {
    Variant::empty(VariantId::new(id))
}

pub(crate) fn make_cart(id: AggregateId) -> Cart {
    Cart::empty(CartId::new(id))
}

pub(crate) fn make_order(id: AggregateId) -> Order {
    Order::empty(OrderId::new(id))
}
