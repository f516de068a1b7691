//! Checkout: the only path from a cart to an order.
//!
//! Each cart line is reserved on its own. Lines whose stock is gone stay in
//! the cart and are reported back; the rest are claimed from the cart at the
//! version that was read and become one order. Of two concurrent checkouts of
//! the same cart, one gets the order and the other a stale read.

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::instrument;

use stockroom_cart::{Cart, CartCommand, CartLine, CheckOutLines, ReturnLines};
use stockroom_core::{AggregateId, AggregateRoot, CustomerId};
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_inventory::{ReserveStock, StockCommand};
use stockroom_orders::{Adjustment, NewOrderItem, OrderCommand, OrderId, OrderItemId, PlaceOrder};

use super::{make_cart, CheckoutReport, ConvertedLine, FailedLine, Fulfillment, FulfillmentResult, OrderView};
use crate::event_store::EventStore;
use crate::projections::CART_STREAM;

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Convert the customer's cart into an order.
    ///
    /// Partial success is a normal outcome: see [`CheckoutReport::failed`].
    /// An empty cart yields a report without an order. If the cart moved
    /// since it was read, or the order itself cannot be written, every
    /// reservation taken by this call is released, claimed lines go back to
    /// the cart, and the error is returned.
    #[instrument(skip(self, adjustments), err)]
    pub fn checkout(
        &self,
        customer_id: CustomerId,
        adjustments: Vec<Adjustment>,
        notes: String,
    ) -> FulfillmentResult<CheckoutReport> {
        let cart = self.open_cart(customer_id)?;
        let mut report = CheckoutReport {
            order: None,
            converted: Vec::new(),
            failed: Vec::new(),
        };
        if !cart.exists() || cart.is_empty() {
            return Ok(report);
        }

        for line in cart.lines() {
            let variant_id = line.variant_id;
            let quantity = line.quantity;
            let reserved = self.commit_ledger(variant_id, |_| {
                Ok(StockCommand::ReserveStock(ReserveStock {
                    variant_id,
                    quantity,
                    occurred_at: Utc::now(),
                }))
            });

            match reserved {
                Ok(_) => report.converted.push(ConvertedLine {
                    item_id: OrderItemId::new(AggregateId::new()),
                    variant_id,
                    quantity,
                    unit_price: line.unit_price,
                }),
                Err(err) => {
                    tracing::info!(%variant_id, quantity, error = %err, "cart line could not be reserved");
                    report.failed.push(FailedLine {
                        variant_id,
                        quantity,
                        error: self.with_alternatives(err),
                    });
                }
            }
        }

        if report.converted.is_empty() {
            return Ok(report);
        }

        // Claim the lines against the cart as it was read. A duplicate checkout
        // or a concurrent edit moves the stream and loses here.
        let cart_id = cart.id_typed();
        let order_id = OrderId::new(AggregateId::new());
        let claimed = self.commit_cart_at(
            cart_id,
            cart.version(),
            CartCommand::CheckOutLines(CheckOutLines {
                cart_id,
                order_id: order_id.0,
                variant_ids: report.converted.iter().map(|c| c.variant_id).collect(),
                occurred_at: Utc::now(),
            }),
        );
        if let Err(err) = claimed {
            tracing::info!(%cart_id, error = %err, "cart changed during checkout; releasing reservations");
            self.undo_reservations(&report.converted);
            return Err(err);
        }

        let placed = self.commit_order(
            order_id,
            OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                customer_id,
                items: report
                    .converted
                    .iter()
                    .map(|c| NewOrderItem {
                        item_id: c.item_id,
                        variant_id: c.variant_id,
                        quantity: c.quantity,
                        unit_price: c.unit_price,
                    })
                    .collect(),
                adjustments,
                notes,
                occurred_at: Utc::now(),
            }),
        );

        if let Err(err) = placed {
            self.undo_reservations(&report.converted);
            self.return_lines(&cart, order_id, &report.converted);
            return Err(err);
        }

        let order = self.load_order(order_id)?;
        tracing::info!(
            %order_id,
            converted = report.converted.len(),
            failed = report.failed.len(),
            total = order.total(),
            "checkout completed"
        );
        report.order = Some(OrderView::from(&order));
        Ok(report)
    }

    fn undo_reservations(&self, converted: &[ConvertedLine]) {
        for c in converted {
            self.undo_reservation(c.variant_id, c.quantity);
        }
    }

    /// Put claimed lines back after the order write failed. Best-effort.
    fn return_lines(&self, cart: &Cart, order_id: OrderId, converted: &[ConvertedLine]) {
        let lines: Vec<CartLine> = cart
            .lines()
            .iter()
            .filter(|l| converted.iter().any(|c| c.variant_id == l.variant_id))
            .cloned()
            .collect();
        let cart_id = cart.id_typed();
        let returned = self.dispatcher.dispatch_with_retry(
            cart_id.0,
            CART_STREAM,
            self.config.ledger_retries,
            make_cart,
            |_: &Cart| {
                Ok(CartCommand::ReturnLines(ReturnLines {
                    cart_id,
                    order_id: order_id.0,
                    lines: lines.clone(),
                    occurred_at: Utc::now(),
                }))
            },
        );
        match returned {
            Ok(out) => self.project(&out.stored),
            Err(err) => {
                tracing::warn!(%cart_id, %order_id, error = %err, "failed to return checked-out lines to the cart")
            }
        }
    }
}
