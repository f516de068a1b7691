use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{Aggregate, AggregateId, AggregateRoot, CustomerId, DomainError};
use stockroom_events::Event;
use stockroom_inventory::{VariantId, WarehouseSplit};

use crate::adjustment::{order_total, Adjustment};
use crate::item::{ItemStatus, OrderItem, OrderItemId};

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order status lifecycle.
///
/// `Active → Closed → Sent`, or `Deleted` once no items remain. A customer
/// cancelling a whole order that had picked items leaves it `Closed` with
/// `customer_cancelled` set, so staff keep a trail of what to put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Active,
    Closed,
    Sent,
    Deleted,
}

/// Reserved quantity an item stops holding once its order ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRelease {
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    customer_id: Option<CustomerId>,
    status: OrderStatus,
    items: Vec<OrderItem>,
    cancelled_items: Vec<OrderItem>,
    adjustments: Vec<Adjustment>,
    notes: String,
    total: u64,
    customer_cancelled: bool,
    placed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            customer_id: None,
            status: OrderStatus::Active,
            items: Vec::new(),
            cancelled_items: Vec::new(),
            adjustments: Vec::new(),
            notes: String::new(),
            total: 0,
            customer_cancelled: false,
            placed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn item(&self, item_id: OrderItemId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Items removed by cancellation, kept for the staff trail.
    pub fn cancelled_items(&self) -> &[OrderItem] {
        &self.cancelled_items
    }

    pub fn adjustments(&self) -> &[Adjustment] {
        &self.adjustments
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Stored order total in smallest currency unit.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn customer_cancelled(&self) -> bool {
        self.customer_cancelled
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn exists(&self) -> bool {
        self.created && self.status != OrderStatus::Deleted
    }

    /// Customers (and staff) may amend only active or closed orders.
    pub fn is_modifiable(&self) -> bool {
        self.created && matches!(self.status, OrderStatus::Active | OrderStatus::Closed)
    }

    pub fn can_cancel_item(&self, item_id: OrderItemId) -> bool {
        self.is_modifiable() && self.item(item_id).is_some()
    }

    pub fn missing_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Missing)
            .count()
    }

    /// Σ(price × qty) over remaining items. A missing item stays billed until
    /// it is cancelled; cancelling it is what lowers the total.
    pub fn item_subtotal(&self) -> u64 {
        subtotal(self.items.iter())
    }

    fn total_with<'a>(
        items: impl Iterator<Item = &'a OrderItem>,
        adjustments: &[Adjustment],
    ) -> u64 {
        order_total(subtotal(items), adjustments)
    }
}

fn subtotal<'a>(items: impl Iterator<Item = &'a OrderItem>) -> u64 {
    items.map(OrderItem::line_total).sum()
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Line converted from a cart at checkout; its stock is already reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
}

/// Line added by staff. `picked` carries the stock withdrawn when staff add it
/// already set aside; otherwise the item is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffOrderItem {
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
    pub picked: Option<WarehouseSplit>,
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<NewOrderItem>,
    pub adjustments: Vec<Adjustment>,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkSent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSent {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelItem {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItems (staff).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItems {
    pub order_id: OrderId,
    pub items: Vec<StaffOrderItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPicked {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub taken: WarehouseSplit,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkMissing. `withdrawn` is physical stock removed now; empty when
/// the item was already picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkMissing {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub withdrawn: WarehouseSplit,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetQueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetQueued {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub queued: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetAdjustments. Replaces the whole adjustment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAdjustments {
    pub order_id: OrderId,
    pub adjustments: Vec<Adjustment>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateNotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotes {
    pub order_id: OrderId,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    CloseOrder(CloseOrder),
    MarkSent(MarkSent),
    CancelItem(CancelItem),
    CancelOrder(CancelOrder),
    AddItems(AddItems),
    MarkPicked(MarkPicked),
    MarkMissing(MarkMissing),
    SetQueued(SetQueued),
    SetAdjustments(SetAdjustments),
    UpdateNotes(UpdateNotes),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub adjustments: Vec<Adjustment>,
    pub notes: String,
    pub total: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClosed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderSent. `settled` lists the reservations the shipment releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSent {
    pub order_id: OrderId,
    pub settled: Vec<ReservationRelease>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemCancelled. Carries the item as it was, so stock can be restored
/// from the event alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCancelled {
    pub order_id: OrderId,
    pub item: OrderItem,
    pub total: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled. The whole order was cancelled but kept as a closed
/// trail because staff had picked some of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeleted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsAdded {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
    pub total: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemPicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPicked {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub taken: WarehouseSplit,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemMarkedMissing. `released` is the reservation the item gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMarkedMissing {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub withdrawn: WarehouseSplit,
    pub released: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemQueueChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQueueChanged {
    pub order_id: OrderId,
    pub item_id: OrderItemId,
    pub queued: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentsSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentsSet {
    pub order_id: OrderId,
    pub adjustments: Vec<Adjustment>,
    pub total: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NotesUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesUpdated {
    pub order_id: OrderId,
    pub notes: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderClosed(OrderClosed),
    OrderSent(OrderSent),
    ItemCancelled(ItemCancelled),
    OrderCancelled(OrderCancelled),
    OrderDeleted(OrderDeleted),
    ItemsAdded(ItemsAdded),
    ItemPicked(ItemPicked),
    ItemMarkedMissing(ItemMarkedMissing),
    ItemQueueChanged(ItemQueueChanged),
    AdjustmentsSet(AdjustmentsSet),
    NotesUpdated(NotesUpdated),
}

impl OrderEvent {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderPlaced(e) => e.order_id,
            OrderEvent::OrderClosed(e) => e.order_id,
            OrderEvent::OrderSent(e) => e.order_id,
            OrderEvent::ItemCancelled(e) => e.order_id,
            OrderEvent::OrderCancelled(e) => e.order_id,
            OrderEvent::OrderDeleted(e) => e.order_id,
            OrderEvent::ItemsAdded(e) => e.order_id,
            OrderEvent::ItemPicked(e) => e.order_id,
            OrderEvent::ItemMarkedMissing(e) => e.order_id,
            OrderEvent::ItemQueueChanged(e) => e.order_id,
            OrderEvent::AdjustmentsSet(e) => e.order_id,
            OrderEvent::NotesUpdated(e) => e.order_id,
        }
    }
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderClosed(_) => "orders.order.closed",
            OrderEvent::OrderSent(_) => "orders.order.sent",
            OrderEvent::ItemCancelled(_) => "orders.order.item_cancelled",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
            OrderEvent::OrderDeleted(_) => "orders.order.deleted",
            OrderEvent::ItemsAdded(_) => "orders.order.items_added",
            OrderEvent::ItemPicked(_) => "orders.order.item_picked",
            OrderEvent::ItemMarkedMissing(_) => "orders.order.item_missing",
            OrderEvent::ItemQueueChanged(_) => "orders.order.item_queue_changed",
            OrderEvent::AdjustmentsSet(_) => "orders.order.adjustments_set",
            OrderEvent::NotesUpdated(_) => "orders.order.notes_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderClosed(e) => e.occurred_at,
            OrderEvent::OrderSent(e) => e.occurred_at,
            OrderEvent::ItemCancelled(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::OrderDeleted(e) => e.occurred_at,
            OrderEvent::ItemsAdded(e) => e.occurred_at,
            OrderEvent::ItemPicked(e) => e.occurred_at,
            OrderEvent::ItemMarkedMissing(e) => e.occurred_at,
            OrderEvent::ItemQueueChanged(e) => e.occurred_at,
            OrderEvent::AdjustmentsSet(e) => e.occurred_at,
            OrderEvent::NotesUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.customer_id = Some(e.customer_id);
                self.status = OrderStatus::Active;
                self.items = e.items.clone();
                self.cancelled_items.clear();
                self.adjustments = e.adjustments.clone();
                self.notes = e.notes.clone();
                self.total = e.total;
                self.customer_cancelled = false;
                self.placed_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderClosed(_) => {
                self.status = OrderStatus::Closed;
            }
            OrderEvent::OrderSent(_) => {
                self.status = OrderStatus::Sent;
                for item in &mut self.items {
                    item.reserved_held = 0;
                    item.queued = false;
                }
            }
            OrderEvent::ItemCancelled(e) => {
                self.items.retain(|i| i.id != e.item.id);
                self.cancelled_items.push(e.item.clone());
                self.total = e.total;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Closed;
                self.customer_cancelled = true;
            }
            OrderEvent::OrderDeleted(_) => {
                self.status = OrderStatus::Deleted;
            }
            OrderEvent::ItemsAdded(e) => {
                self.items.extend(e.items.iter().cloned());
                self.total = e.total;
                self.status = OrderStatus::Active;
                self.customer_cancelled = false;
            }
            OrderEvent::ItemPicked(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.status = ItemStatus::Picked;
                    item.taken = e.taken;
                    item.queued = false;
                }
            }
            OrderEvent::ItemMarkedMissing(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.status = ItemStatus::Missing;
                    item.taken = item.taken + e.withdrawn;
                    item.reserved_held -= e.released;
                    item.queued = false;
                }
            }
            OrderEvent::ItemQueueChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item_id) {
                    item.queued = e.queued;
                }
            }
            OrderEvent::AdjustmentsSet(e) => {
                self.adjustments = e.adjustments.clone();
                self.total = e.total;
            }
            OrderEvent::NotesUpdated(e) => {
                self.notes = e.notes.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::CloseOrder(cmd) => self.handle_close(cmd),
            OrderCommand::MarkSent(cmd) => self.handle_mark_sent(cmd),
            OrderCommand::CancelItem(cmd) => self.handle_cancel_item(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel_order(cmd),
            OrderCommand::AddItems(cmd) => self.handle_add_items(cmd),
            OrderCommand::MarkPicked(cmd) => self.handle_mark_picked(cmd),
            OrderCommand::MarkMissing(cmd) => self.handle_mark_missing(cmd),
            OrderCommand::SetQueued(cmd) => self.handle_set_queued(cmd),
            OrderCommand::SetAdjustments(cmd) => self.handle_set_adjustments(cmd),
            OrderCommand::UpdateNotes(cmd) => self.handle_update_notes(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, order_id: OrderId) -> Result<(), DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(order_id)
    }

    fn ensure_modifiable(&self) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invalid_transition(format!(
                "order is {:?}; only active or closed orders can change",
                self.status
            )));
        }
        Ok(())
    }

    fn existing_item(&self, item_id: OrderItemId) -> Result<&OrderItem, DomainError> {
        self.item(item_id).ok_or_else(DomainError::not_found)
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }

        if cmd.items.is_empty() {
            return Err(DomainError::validation("an order needs at least one item"));
        }
        if cmd.items.iter().any(|i| i.quantity <= 0) {
            return Err(DomainError::validation("quantity must be positive"));
        }
        for adjustment in &cmd.adjustments {
            adjustment.validate()?;
        }

        let items: Vec<OrderItem> = cmd
            .items
            .iter()
            .map(|i| OrderItem {
                id: i.item_id,
                variant_id: i.variant_id,
                quantity: i.quantity,
                unit_price: i.unit_price,
                status: ItemStatus::Reserved,
                queued: false,
                reserved_held: i.quantity,
                taken: WarehouseSplit::EMPTY,
            })
            .collect();

        let total = Self::total_with(items.iter(), &cmd.adjustments);

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            items,
            adjustments: cmd.adjustments.clone(),
            notes: cmd.notes.clone(),
            total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != OrderStatus::Active {
            return Err(DomainError::invalid_transition("only active orders can be closed"));
        }

        Ok(vec![OrderEvent::OrderClosed(OrderClosed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_sent(&self, cmd: &MarkSent) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        if self.status != OrderStatus::Closed {
            return Err(DomainError::invalid_transition("only closed orders can be sent"));
        }
        if self.items.is_empty() {
            return Err(DomainError::invalid_transition("cannot send an order without items"));
        }
        // Unpicked units were never withdrawn from physical stock.
        if self.items.iter().any(|i| i.status == ItemStatus::Reserved) {
            return Err(DomainError::invalid_transition(
                "every reserved item must be picked or marked missing before sending",
            ));
        }

        let settled = self
            .items
            .iter()
            .filter(|i| i.reserved_held > 0)
            .map(|i| ReservationRelease {
                item_id: i.id,
                variant_id: i.variant_id,
                quantity: i.reserved_held,
            })
            .collect();

        Ok(vec![OrderEvent::OrderSent(OrderSent {
            order_id: cmd.order_id,
            settled,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel_item(&self, cmd: &CancelItem) -> Result<Vec<OrderEvent>, DomainError> {
        // Cancelling something already gone is a successful no-op.
        if !self.exists() {
            return Ok(vec![]);
        }
        self.ensure_order_id(cmd.order_id)?;

        let Some(item) = self.item(cmd.item_id) else {
            return Ok(vec![]);
        };
        self.ensure_modifiable()?;

        let remaining: Vec<&OrderItem> = self.items.iter().filter(|i| i.id != item.id).collect();
        let total = Self::total_with(remaining.iter().copied(), &self.adjustments);

        let mut events = vec![OrderEvent::ItemCancelled(ItemCancelled {
            order_id: cmd.order_id,
            item: item.clone(),
            total,
            occurred_at: cmd.occurred_at,
        })];

        if remaining.is_empty() {
            events.push(OrderEvent::OrderDeleted(OrderDeleted {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_cancel_order(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.exists() {
            return Ok(vec![]);
        }
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_modifiable()?;

        if self.customer_cancelled && self.items.is_empty() {
            return Ok(vec![]);
        }

        let any_picked = self.items.iter().any(OrderItem::is_picked);
        let mut events = Vec::with_capacity(self.items.len() + 1);

        for (idx, item) in self.items.iter().enumerate() {
            let total = Self::total_with(self.items[idx + 1..].iter(), &self.adjustments);
            events.push(OrderEvent::ItemCancelled(ItemCancelled {
                order_id: cmd.order_id,
                item: item.clone(),
                total,
                occurred_at: cmd.occurred_at,
            }));
        }

        if any_picked {
            events.push(OrderEvent::OrderCancelled(OrderCancelled {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            }));
        } else {
            events.push(OrderEvent::OrderDeleted(OrderDeleted {
                order_id: cmd.order_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_add_items(&self, cmd: &AddItems) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_modifiable()?;

        if cmd.items.is_empty() {
            return Err(DomainError::validation("no items to add"));
        }

        let mut added = Vec::with_capacity(cmd.items.len());
        for i in &cmd.items {
            if i.quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if self.item(i.item_id).is_some() {
                return Err(DomainError::conflict("order item already exists"));
            }

            let item = match i.picked {
                Some(split) => {
                    if !split.is_non_negative() || split.total() != i.quantity {
                        return Err(DomainError::validation(
                            "picked split must cover the item quantity",
                        ));
                    }
                    OrderItem {
                        id: i.item_id,
                        variant_id: i.variant_id,
                        quantity: i.quantity,
                        unit_price: i.unit_price,
                        status: ItemStatus::Picked,
                        queued: false,
                        reserved_held: 0,
                        taken: split,
                    }
                }
                None => OrderItem {
                    id: i.item_id,
                    variant_id: i.variant_id,
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    status: ItemStatus::Reserved,
                    queued: false,
                    reserved_held: i.quantity,
                    taken: WarehouseSplit::EMPTY,
                },
            };
            added.push(item);
        }

        let total = Self::total_with(self.items.iter().chain(added.iter()), &self.adjustments);

        Ok(vec![OrderEvent::ItemsAdded(ItemsAdded {
            order_id: cmd.order_id,
            items: added,
            total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_picked(&self, cmd: &MarkPicked) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_modifiable()?;
        let item = self.existing_item(cmd.item_id)?;

        if item.status != ItemStatus::Reserved {
            return Err(DomainError::invalid_transition(format!(
                "item is {:?}; only reserved items can be picked",
                item.status
            )));
        }
        if !cmd.taken.is_non_negative() || cmd.taken.total() != item.quantity {
            return Err(DomainError::validation(
                "picked split must cover the item quantity",
            ));
        }

        Ok(vec![OrderEvent::ItemPicked(ItemPicked {
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            variant_id: item.variant_id,
            taken: cmd.taken,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_missing(&self, cmd: &MarkMissing) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_modifiable()?;
        let item = self.existing_item(cmd.item_id)?;

        if item.status == ItemStatus::Missing {
            return Err(DomainError::invalid_transition("item is already missing"));
        }

        let outstanding = item.quantity - item.taken.total();
        if !cmd.withdrawn.is_non_negative() || cmd.withdrawn.total() > outstanding {
            return Err(DomainError::validation(format!(
                "can withdraw at most {outstanding} more units for this item"
            )));
        }

        Ok(vec![OrderEvent::ItemMarkedMissing(ItemMarkedMissing {
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            variant_id: item.variant_id,
            withdrawn: cmd.withdrawn,
            released: item.reserved_held,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_queued(&self, cmd: &SetQueued) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_modifiable()?;
        let item = self.existing_item(cmd.item_id)?;

        if item.status != ItemStatus::Reserved {
            return Err(DomainError::invalid_transition("only reserved items can be queued"));
        }
        if item.queued == cmd.queued {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::ItemQueueChanged(ItemQueueChanged {
            order_id: cmd.order_id,
            item_id: cmd.item_id,
            queued: cmd.queued,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_adjustments(&self, cmd: &SetAdjustments) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        self.ensure_modifiable()?;

        for adjustment in &cmd.adjustments {
            adjustment.validate()?;
        }

        let total = Self::total_with(self.items.iter(), &cmd.adjustments);

        Ok(vec![OrderEvent::AdjustmentsSet(AdjustmentsSet {
            order_id: cmd.order_id,
            adjustments: cmd.adjustments.clone(),
            total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_notes(&self, cmd: &UpdateNotes) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;

        if cmd.notes == self.notes {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::NotesUpdated(NotesUpdated {
            order_id: cmd.order_id,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
