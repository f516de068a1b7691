//! Orders domain module (event-sourced).
//!
//! The order state machine: order status (`active → closed → sent`, or deleted),
//! per-item status (`reserved → picked`, `missing`), typed adjustments and the
//! stored total. Pure domain logic: stock side effects are carried on the
//! events and applied to the ledger by the infrastructure layer.

pub mod adjustment;
pub mod item;
pub mod order;

pub use adjustment::{order_total, Adjustment, Percent};
pub use item::{CustomerItemStatus, ItemStatus, OrderItem, OrderItemId};
pub use order::{
    AddItems, AdjustmentsSet, CancelItem, CancelOrder, CloseOrder, ItemCancelled,
    ItemMarkedMissing, ItemPicked, ItemQueueChanged, ItemsAdded, MarkMissing, MarkPicked,
    MarkSent, NewOrderItem, NotesUpdated, Order, OrderCancelled, OrderClosed, OrderCommand,
    OrderDeleted, OrderEvent, OrderId, OrderPlaced, OrderSent, OrderStatus, PlaceOrder,
    ReservationRelease, SetAdjustments, SetQueued, StaffOrderItem, UpdateNotes,
};
