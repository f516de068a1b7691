//! Staff side of the order state machine: closing, shipping, manual
//! additions, picking and missing items.
//!
//! The order is re-read before every decision. Ledger effects that must
//! happen before the order changes (withdrawals, reservations) are undone
//! when the order command is then rejected.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use stockroom_core::AggregateId;
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_inventory::{ReserveStock, StockCommand, StockEvent, VariantId, WarehouseSplit, WithdrawStock};
use stockroom_orders::{
    AddItems, Adjustment, CloseOrder, ItemStatus, MarkMissing, MarkPicked, MarkSent, Order, OrderCommand,
    OrderEvent, OrderId, OrderItemId, SetAdjustments, SetQueued, StaffOrderItem, UpdateNotes,
};

use super::{Fulfillment, FulfillmentError, FulfillmentResult, OrderView};
use crate::command_dispatcher::{DispatchError, Dispatched};
use crate::event_store::EventStore;

/// A line staff add to an existing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffAddItem {
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Defaults to the variant's current price.
    #[serde(default)]
    pub unit_price: Option<u64>,
    /// Already set aside: stock is withdrawn now (general warehouse first)
    /// instead of reserved.
    #[serde(default)]
    pub picked: bool,
}

/// Ledger change made ahead of an order command, kept for rollback.
#[derive(Debug, Clone, Copy)]
enum Hold {
    Reserved(VariantId, i64),
    Withdrawn(VariantId, WarehouseSplit),
}

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(skip(self), err)]
    pub fn close_order(&self, order_id: OrderId) -> FulfillmentResult<OrderView> {
        self.commit_order(
            order_id,
            OrderCommand::CloseOrder(CloseOrder {
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.order(order_id)
    }

    /// Ship a closed order. Reservations its items still hold are settled.
    #[instrument(skip(self), err)]
    pub fn mark_sent(&self, order_id: OrderId) -> FulfillmentResult<OrderView> {
        let out = self.commit_order(
            order_id,
            OrderCommand::MarkSent(MarkSent {
                order_id,
                occurred_at: Utc::now(),
            }),
        )?;

        for event in &out.events {
            if let OrderEvent::OrderSent(sent) = event {
                for r in &sent.settled {
                    if let Err(err) = self.release_reserved(r.variant_id, r.quantity) {
                        tracing::warn!(%order_id, variant_id = %r.variant_id, quantity = r.quantity, error = %err, "failed to settle reservation on send");
                    }
                }
            }
        }

        tracing::info!(%order_id, "order sent");
        self.order(order_id)
    }

    /// Append items to an active or closed order; the order becomes active again.
    #[instrument(skip(self), err)]
    pub fn add_items(&self, order_id: OrderId, items: Vec<StaffAddItem>) -> FulfillmentResult<OrderView> {
        let order = self.load_order(order_id)?;
        ensure_modifiable(&order)?;
        if items.is_empty() {
            return Err(FulfillmentError::validation("no items to add"));
        }
        if items.iter().any(|i| i.quantity <= 0) {
            return Err(FulfillmentError::validation("quantity must be positive"));
        }

        let mut holds = Vec::with_capacity(items.len());
        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            match self.hold_for_staff_item(item) {
                Ok((hold, line)) => {
                    holds.push(hold);
                    lines.push(line);
                }
                Err(err) => {
                    self.undo_holds(&holds);
                    return Err(err);
                }
            }
        }

        let added = self.commit_order(
            order_id,
            OrderCommand::AddItems(AddItems {
                order_id,
                items: lines,
                occurred_at: Utc::now(),
            }),
        );
        if let Err(err) = added {
            self.undo_holds(&holds);
            return Err(err);
        }

        self.order(order_id)
    }

    /// Staff physically set a reserved item aside: its stock is withdrawn,
    /// general warehouse first. The reserved counter is not touched.
    #[instrument(skip(self), err)]
    pub fn mark_picked(&self, order_id: OrderId, item_id: OrderItemId) -> FulfillmentResult<OrderView> {
        let order = self.load_order(order_id)?;
        ensure_modifiable(&order)?;
        let item = order
            .item(item_id)
            .ok_or_else(|| FulfillmentError::not_found(format!("item {item_id} in order {order_id}")))?;
        if item.status != ItemStatus::Reserved {
            return Err(FulfillmentError::invalid_transition(format!(
                "item is {:?}; only reserved items can be picked",
                item.status
            )));
        }

        let variant_id = item.variant_id;
        let quantity = item.quantity;
        let out = self.commit_ledger(variant_id, |v| {
            Ok(StockCommand::WithdrawStock(WithdrawStock {
                variant_id,
                split: WarehouseSplit::general_first(quantity, v.levels().general),
                occurred_at: Utc::now(),
            }))
        })?;
        let taken = withdrawn(&out);

        let picked = self.commit_order(
            order_id,
            OrderCommand::MarkPicked(MarkPicked {
                order_id,
                item_id,
                taken,
                occurred_at: Utc::now(),
            }),
        );
        if let Err(err) = picked {
            self.undo_withdrawal(variant_id, taken);
            return Err(err);
        }

        self.order(order_id)
    }

    /// Staff could not find the item. Stock not yet withdrawn for it is
    /// written off (as far as the ledger still has it) and its reservation
    /// is released. The item stays visible to the customer until cancelled
    /// or substituted.
    #[instrument(skip(self), err)]
    pub fn mark_missing(&self, order_id: OrderId, item_id: OrderItemId) -> FulfillmentResult<OrderView> {
        let order = self.load_order(order_id)?;
        ensure_modifiable(&order)?;
        let item = order
            .item(item_id)
            .ok_or_else(|| FulfillmentError::not_found(format!("item {item_id} in order {order_id}")))?;
        if item.status == ItemStatus::Missing {
            return Err(FulfillmentError::invalid_transition("item is already missing"));
        }

        let variant_id = item.variant_id;
        let outstanding = item.quantity - item.taken.total();
        let written_off = if outstanding > 0 {
            self.write_off(variant_id, outstanding)?
        } else {
            WarehouseSplit::EMPTY
        };

        let marked = self.commit_order(
            order_id,
            OrderCommand::MarkMissing(MarkMissing {
                order_id,
                item_id,
                withdrawn: written_off,
                occurred_at: Utc::now(),
            }),
        );
        let out = match marked {
            Ok(out) => out,
            Err(err) => {
                self.undo_withdrawal(variant_id, written_off);
                return Err(err);
            }
        };

        for event in &out.events {
            if let OrderEvent::ItemMarkedMissing(m) = event {
                if let Err(err) = self.release_reserved(m.variant_id, m.released) {
                    tracing::warn!(%order_id, %item_id, released = m.released, error = %err, "failed to release reservation of missing item");
                }
            }
        }

        self.order(order_id)
    }

    /// Toggle the staff-internal "waiting" flag of a reserved item.
    #[instrument(skip(self), err)]
    pub fn set_queued(&self, order_id: OrderId, item_id: OrderItemId, queued: bool) -> FulfillmentResult<OrderView> {
        self.commit_order(
            order_id,
            OrderCommand::SetQueued(SetQueued {
                order_id,
                item_id,
                queued,
                occurred_at: Utc::now(),
            }),
        )?;
        self.order(order_id)
    }

    /// Replace the order's shipping, discount and extra charges; the total is recomputed.
    #[instrument(skip(self), err)]
    pub fn set_adjustments(&self, order_id: OrderId, adjustments: Vec<Adjustment>) -> FulfillmentResult<OrderView> {
        self.commit_order(
            order_id,
            OrderCommand::SetAdjustments(SetAdjustments {
                order_id,
                adjustments,
                occurred_at: Utc::now(),
            }),
        )?;
        self.order(order_id)
    }

    #[instrument(skip(self, notes), err)]
    pub fn update_notes(&self, order_id: OrderId, notes: String) -> FulfillmentResult<OrderView> {
        self.commit_order(
            order_id,
            OrderCommand::UpdateNotes(UpdateNotes {
                order_id,
                notes,
                occurred_at: Utc::now(),
            }),
        )?;
        self.order(order_id)
    }

    fn hold_for_staff_item(&self, item: &StaffAddItem) -> FulfillmentResult<(Hold, StaffOrderItem)> {
        let variant_id = item.variant_id;
        let quantity = item.quantity;
        let variant = self.load_variant(variant_id)?;
        let unit_price = item.unit_price.unwrap_or_else(|| variant.unit_price());

        let (hold, picked) = if item.picked {
            let out = self
                .commit_ledger(variant_id, |v| {
                    let available = v.available();
                    if !v.is_active() || quantity > available {
                        return Err(DispatchError::InsufficientStock {
                            requested: quantity,
                            available: if v.is_active() { available } else { 0 },
                        });
                    }
                    Ok(StockCommand::WithdrawStock(WithdrawStock {
                        variant_id,
                        split: WarehouseSplit::general_first(quantity, v.levels().general),
                        occurred_at: Utc::now(),
                    }))
                })
                .map_err(|e| self.with_alternatives(e))?;
            let split = withdrawn(&out);
            (Hold::Withdrawn(variant_id, split), Some(split))
        } else {
            self.commit_ledger(variant_id, |_| {
                Ok(StockCommand::ReserveStock(ReserveStock {
                    variant_id,
                    quantity,
                    occurred_at: Utc::now(),
                }))
            })
            .map_err(|e| self.with_alternatives(e))?;
            (Hold::Reserved(variant_id, quantity), None)
        };

        Ok((
            hold,
            StaffOrderItem {
                item_id: OrderItemId::new(AggregateId::new()),
                variant_id,
                quantity,
                unit_price,
                picked,
            },
        ))
    }

    /// Withdraw up to `outstanding` units, general warehouse first, bounded by
    /// what the ledger still holds. Nothing left is not an error.
    fn write_off(&self, variant_id: VariantId, outstanding: i64) -> FulfillmentResult<WarehouseSplit> {
        let out = self.commit_ledger(variant_id, |v| {
            let levels = v.levels();
            let quantity = outstanding.min(levels.stock_qty());
            if quantity <= 0 {
                return Err(DispatchError::InsufficientStock {
                    requested: outstanding,
                    available: 0,
                });
            }
            Ok(StockCommand::WithdrawStock(WithdrawStock {
                variant_id,
                split: WarehouseSplit::general_first(quantity, levels.general),
                occurred_at: Utc::now(),
            }))
        });

        match out {
            Ok(out) => Ok(withdrawn(&out)),
            Err(FulfillmentError::InsufficientStock { available: 0, .. }) => Ok(WarehouseSplit::EMPTY),
            Err(err) => Err(err),
        }
    }

    fn undo_holds(&self, holds: &[Hold]) {
        for hold in holds {
            match *hold {
                Hold::Reserved(variant_id, quantity) => self.undo_reservation(variant_id, quantity),
                Hold::Withdrawn(variant_id, split) => self.undo_withdrawal(variant_id, split),
            }
        }
    }
}

fn ensure_modifiable(order: &Order) -> FulfillmentResult<()> {
    if order.is_modifiable() {
        Ok(())
    } else {
        Err(FulfillmentError::invalid_transition(format!(
            "order is {:?}; only active or closed orders can change",
            order.status()
        )))
    }
}

fn withdrawn(out: &Dispatched<StockEvent>) -> WarehouseSplit {
    out.events
        .iter()
        .filter_map(|e| match e {
            StockEvent::StockWithdrawn(w) => Some(w.split),
            _ => None,
        })
        .fold(WarehouseSplit::EMPTY, |acc, s| acc + s)
}
