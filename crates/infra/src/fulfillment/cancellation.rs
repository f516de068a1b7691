//! Cancellation and rollback.
//!
//! The order aggregate decides what a cancellation removes; the ledger effects
//! are derived from the `ItemCancelled` events, which carry each item as it
//! was (status, reservation held, stock withdrawn):
//!
//! | item status | ledger effect                                   | staff notified |
//! |-------------|-------------------------------------------------|----------------|
//! | reserved    | release its reservation                         | no             |
//! | picked      | release its reservation, return withdrawn stock | yes            |
//! | missing     | none (already written off and released)         | no             |
//!
//! Cancelling something that is already gone succeeds without effects.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::instrument;

use stockroom_core::CustomerId;
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_orders::{CancelItem, CancelOrder, ItemStatus, Order, OrderCommand, OrderEvent, OrderId, OrderItemId};

use super::cart::VariantRef;
use super::{make_order, CancelOutcome, CartView, Fulfillment, FulfillmentError, FulfillmentResult, OrderView};
use crate::event_store::EventStore;
use crate::external::{PickedItemCancelled, StaffNotification};

/// Result of swapping a missing item for a substitute in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubstitutionOutcome {
    pub cancellation: CancelOutcome,
    pub cart: CartView,
}

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Cancel one item. When `customer_id` is given the order must be theirs.
    ///
    /// An order left without items is deleted, even when the cancelled item
    /// had been picked.
    #[instrument(skip(self), err)]
    pub fn cancel_item(
        &self,
        customer_id: Option<CustomerId>,
        order_id: OrderId,
        item_id: OrderItemId,
    ) -> FulfillmentResult<CancelOutcome> {
        let Some(order) = self.current_order(customer_id, order_id)? else {
            return Ok(CancelOutcome::nothing(None));
        };
        if order.item(item_id).is_none() {
            return Ok(CancelOutcome::nothing(Some(OrderView::from(&order))));
        }

        let out = self.commit_order(
            order_id,
            OrderCommand::CancelItem(CancelItem {
                order_id,
                item_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.after_cancellation(order_id, order.customer_id(), &out.events, false)
    }

    /// Cancel every remaining item. The order is deleted, unless staff had
    /// picked something: then it stays `closed` as a trail and staff are
    /// notified once.
    #[instrument(skip(self), err)]
    pub fn cancel_order(&self, customer_id: Option<CustomerId>, order_id: OrderId) -> FulfillmentResult<CancelOutcome> {
        let Some(order) = self.current_order(customer_id, order_id)? else {
            return Ok(CancelOutcome::nothing(None));
        };

        let out = self.commit_order(
            order_id,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        if out.is_noop() {
            return Ok(CancelOutcome::nothing(Some(OrderView::from(&order))));
        }
        self.after_cancellation(order_id, order.customer_id(), &out.events, true)
    }

    /// Replace a missing item: the substitute goes through the normal
    /// add-to-cart path first, then the missing item is cancelled. If the
    /// substitute cannot be added, the missing item is left untouched.
    #[instrument(skip(self), err)]
    pub fn substitute_missing(
        &self,
        customer_id: CustomerId,
        order_id: OrderId,
        item_id: OrderItemId,
        substitute: VariantRef,
        quantity: Option<i64>,
    ) -> FulfillmentResult<SubstitutionOutcome> {
        let Some(order) = self.current_order(Some(customer_id), order_id)? else {
            return Err(FulfillmentError::not_found(format!("order {order_id}")));
        };
        let item = order
            .item(item_id)
            .ok_or_else(|| FulfillmentError::not_found(format!("item {item_id} in order {order_id}")))?;
        if item.status != ItemStatus::Missing {
            return Err(FulfillmentError::invalid_transition("only missing items can be substituted"));
        }

        let quantity = quantity.unwrap_or(item.quantity);
        let cart = self.add_item(customer_id, substitute, quantity, None)?;
        let cancellation = self.cancel_item(Some(customer_id), order_id, item_id)?;
        Ok(SubstitutionOutcome { cancellation, cart })
    }

    /// Fresh read; `None` when the order no longer exists.
    fn current_order(&self, customer_id: Option<CustomerId>, order_id: OrderId) -> FulfillmentResult<Option<Order>> {
        let order: Order = self.dispatcher.load(order_id.0, make_order)?;
        if !order.exists() {
            return Ok(None);
        }
        if let Some(customer_id) = customer_id {
            if order.customer_id() != Some(customer_id) {
                return Err(FulfillmentError::not_found(format!("order {order_id}")));
            }
        }
        Ok(Some(order))
    }

    fn after_cancellation(
        &self,
        order_id: OrderId,
        customer_id: Option<CustomerId>,
        events: &[OrderEvent],
        whole_order: bool,
    ) -> FulfillmentResult<CancelOutcome> {
        let mut cancelled_items = Vec::new();
        let mut picked = Vec::new();
        let mut released = 0;
        let mut order_deleted = false;

        for event in events {
            match event {
                OrderEvent::ItemCancelled(e) => {
                    let item = &e.item;
                    cancelled_items.push(item.id);
                    if item.status == ItemStatus::Missing {
                        continue;
                    }

                    match self.release_reserved(item.variant_id, item.reserved_held) {
                        Ok(n) => released += n,
                        Err(err) => tracing::warn!(%order_id, item_id = %item.id, error = %err, "failed to release reservation of cancelled item"),
                    }

                    if item.status == ItemStatus::Picked {
                        if let Err(err) = self.return_stock(item.variant_id, item.taken) {
                            tracing::warn!(%order_id, item_id = %item.id, error = %err, "failed to return stock of cancelled item");
                        }
                        picked.push(PickedItemCancelled {
                            item_id: item.id,
                            variant_id: item.variant_id,
                            quantity: item.quantity,
                        });
                    }
                }
                OrderEvent::OrderDeleted(_) => order_deleted = true,
                _ => {}
            }
        }

        let staff_notified = !picked.is_empty() && self.notify_staff(order_id, customer_id, picked, whole_order);

        tracing::info!(
            %order_id,
            cancelled = cancelled_items.len(),
            released,
            order_deleted,
            staff_notified,
            "cancellation applied"
        );

        let order = if order_deleted {
            None
        } else {
            Some(self.order(order_id)?)
        };
        Ok(CancelOutcome {
            order,
            order_deleted,
            cancelled_items,
            released,
            staff_notified,
        })
    }

    fn notify_staff(
        &self,
        order_id: OrderId,
        customer_id: Option<CustomerId>,
        items: Vec<PickedItemCancelled>,
        whole_order: bool,
    ) -> bool {
        let notification = StaffNotification {
            order_id,
            customer_id,
            items,
            whole_order,
            occurred_at: Utc::now(),
        };
        match self.notifier.notify(notification) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%order_id, error = %err, "staff notification failed; cancellation kept");
                false
            }
        }
    }
}
