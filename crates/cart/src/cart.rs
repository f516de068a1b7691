use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{Aggregate, AggregateId, AggregateRoot, CustomerId, DomainError};
use stockroom_events::Event;
use stockroom_inventory::VariantId;

/// Cart identifier. A customer owns exactly one cart stream, so the id is
/// derived from the customer id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartId(pub AggregateId);

impl CartId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_customer(customer_id: CustomerId) -> Self {
        Self(AggregateId::from_uuid(*customer_id.as_uuid()))
    }
}

impl core::fmt::Display for CartId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Cart line: one per variant, price snapshot taken when first added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub thumbnail: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(self.quantity.max(0) as u64)
    }
}

/// Aggregate root: Cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    id: CartId,
    customer_id: Option<CustomerId>,
    lines: Vec<CartLine>,
    version: u64,
    created: bool,
}

impl Cart {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CartId) -> Self {
        Self {
            id,
            customer_id: None,
            lines: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CartId {
        self.id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, variant_id: VariantId) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.variant_id == variant_id)
    }

    /// Quantity of `variant_id` already sitting in this cart (0 if none).
    pub fn quantity_of(&self, variant_id: VariantId) -> i64 {
        self.line(variant_id).map(|l| l.quantity).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn subtotal(&self) -> u64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddItem. Opens the cart on first use.
///
/// `limit` is the most this cart may hold of the variant after the add:
/// current availability (net of other carts) plus what this cart already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub cart_id: CartId,
    pub customer_id: CustomerId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
    pub thumbnail: Option<String>,
    pub limit: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateQuantity. `limit` has the same meaning as on `AddItem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateQuantity {
    pub cart_id: CartId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub limit: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub cart_id: CartId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClearCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCart {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CheckOutLines. Removes the lines that converted into order items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutLines {
    pub cart_id: CartId,
    pub order_id: AggregateId,
    pub variant_ids: Vec<VariantId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnLines. Puts lines claimed by a checkout back into the cart
/// when the order could not be written. Coalesces with anything added since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLines {
    pub cart_id: CartId,
    pub order_id: AggregateId,
    pub lines: Vec<CartLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    AddItem(AddItem),
    UpdateQuantity(UpdateQuantity),
    RemoveItem(RemoveItem),
    ClearCart(ClearCart),
    CheckOutLines(CheckOutLines),
    ReturnLines(ReturnLines),
}

/// Event: CartOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    pub cart_id: CartId,
    pub customer_id: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded. `quantity` is the amount added, coalesced into any
/// existing line for the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub cart_id: CartId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: u64,
    pub thumbnail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuantityChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityChanged {
    pub cart_id: CartId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub cart_id: CartId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CartCleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCleared {
    pub cart_id: CartId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesCheckedOut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesCheckedOut {
    pub cart_id: CartId,
    pub order_id: AggregateId,
    pub variant_ids: Vec<VariantId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LinesReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinesReturned {
    pub cart_id: CartId,
    pub order_id: AggregateId,
    pub lines: Vec<CartLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartOpened(CartOpened),
    ItemAdded(ItemAdded),
    QuantityChanged(QuantityChanged),
    ItemRemoved(ItemRemoved),
    CartCleared(CartCleared),
    LinesCheckedOut(LinesCheckedOut),
    LinesReturned(LinesReturned),
}

impl CartEvent {
    pub fn cart_id(&self) -> CartId {
        match self {
            CartEvent::CartOpened(e) => e.cart_id,
            CartEvent::ItemAdded(e) => e.cart_id,
            CartEvent::QuantityChanged(e) => e.cart_id,
            CartEvent::ItemRemoved(e) => e.cart_id,
            CartEvent::CartCleared(e) => e.cart_id,
            CartEvent::LinesCheckedOut(e) => e.cart_id,
            CartEvent::LinesReturned(e) => e.cart_id,
        }
    }
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened(_) => "cart.opened",
            CartEvent::ItemAdded(_) => "cart.item_added",
            CartEvent::QuantityChanged(_) => "cart.quantity_changed",
            CartEvent::ItemRemoved(_) => "cart.item_removed",
            CartEvent::CartCleared(_) => "cart.cleared",
            CartEvent::LinesCheckedOut(_) => "cart.lines_checked_out",
            CartEvent::LinesReturned(_) => "cart.lines_returned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartOpened(e) => e.occurred_at,
            CartEvent::ItemAdded(e) => e.occurred_at,
            CartEvent::QuantityChanged(e) => e.occurred_at,
            CartEvent::ItemRemoved(e) => e.occurred_at,
            CartEvent::CartCleared(e) => e.occurred_at,
            CartEvent::LinesCheckedOut(e) => e.occurred_at,
            CartEvent::LinesReturned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartOpened(e) => {
                self.id = e.cart_id;
                self.customer_id = Some(e.customer_id);
                self.lines.clear();
                self.created = true;
            }
            CartEvent::ItemAdded(e) => {
                match self.lines.iter_mut().find(|l| l.variant_id == e.variant_id) {
                    // Coalesce; the original price snapshot is kept.
                    Some(line) => line.quantity = line.quantity.saturating_add(e.quantity),
                    None => self.lines.push(CartLine {
                        variant_id: e.variant_id,
                        quantity: e.quantity,
                        unit_price: e.unit_price,
                        thumbnail: e.thumbnail.clone(),
                        added_at: e.occurred_at,
                    }),
                }
            }
            CartEvent::QuantityChanged(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.variant_id == e.variant_id) {
                    line.quantity = e.quantity;
                }
            }
            CartEvent::ItemRemoved(e) => {
                self.lines.retain(|l| l.variant_id != e.variant_id);
            }
            CartEvent::CartCleared(_) => {
                self.lines.clear();
            }
            CartEvent::LinesCheckedOut(e) => {
                self.lines.retain(|l| !e.variant_ids.contains(&l.variant_id));
            }
            CartEvent::LinesReturned(e) => {
                for returned in &e.lines {
                    match self.lines.iter_mut().find(|l| l.variant_id == returned.variant_id) {
                        Some(line) => line.quantity = line.quantity.saturating_add(returned.quantity),
                        None => self.lines.push(returned.clone()),
                    }
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::AddItem(cmd) => self.handle_add_item(cmd),
            CartCommand::UpdateQuantity(cmd) => self.handle_update_quantity(cmd),
            CartCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            CartCommand::ClearCart(cmd) => self.handle_clear(cmd),
            CartCommand::CheckOutLines(cmd) => self.handle_check_out(cmd),
            CartCommand::ReturnLines(cmd) => self.handle_return(cmd),
        }
    }
}

impl Cart {
    fn ensure_cart_id(&self, cart_id: CartId) -> Result<(), DomainError> {
        if self.id != cart_id {
            return Err(DomainError::invariant("cart_id mismatch"));
        }
        Ok(())
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_cart_id(cmd.cart_id)?;

        if self.created && self.customer_id != Some(cmd.customer_id) {
            return Err(DomainError::invariant("cart belongs to another customer"));
        }

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let existing = self.quantity_of(cmd.variant_id);
        let Some(wanted) = existing.checked_add(cmd.quantity) else {
            return Err(DomainError::validation("quantity out of range"));
        };
        if wanted > cmd.limit {
            return Err(DomainError::insufficient_stock(
                cmd.quantity,
                cmd.limit - existing,
            ));
        }

        let mut events = Vec::with_capacity(2);
        if !self.created {
            events.push(CartEvent::CartOpened(CartOpened {
                cart_id: cmd.cart_id,
                customer_id: cmd.customer_id,
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(CartEvent::ItemAdded(ItemAdded {
            cart_id: cmd.cart_id,
            variant_id: cmd.variant_id,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            thumbnail: cmd.thumbnail.clone(),
            occurred_at: cmd.occurred_at,
        }));
        Ok(events)
    }

    fn handle_update_quantity(&self, cmd: &UpdateQuantity) -> Result<Vec<CartEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_cart_id(cmd.cart_id)?;

        let Some(line) = self.line(cmd.variant_id) else {
            return Err(DomainError::not_found());
        };

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        if cmd.quantity > cmd.limit {
            return Err(DomainError::insufficient_stock(cmd.quantity, cmd.limit));
        }

        if cmd.quantity == line.quantity {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::QuantityChanged(QuantityChanged {
            cart_id: cmd.cart_id,
            variant_id: cmd.variant_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<CartEvent>, DomainError> {
        // Removing something that is not there is a successful no-op.
        if !self.created || self.line(cmd.variant_id).is_none() {
            return Ok(vec![]);
        }
        self.ensure_cart_id(cmd.cart_id)?;

        Ok(vec![CartEvent::ItemRemoved(ItemRemoved {
            cart_id: cmd.cart_id,
            variant_id: cmd.variant_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_clear(&self, cmd: &ClearCart) -> Result<Vec<CartEvent>, DomainError> {
        if !self.created || self.lines.is_empty() {
            return Ok(vec![]);
        }
        self.ensure_cart_id(cmd.cart_id)?;

        Ok(vec![CartEvent::CartCleared(CartCleared {
            cart_id: cmd.cart_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_check_out(&self, cmd: &CheckOutLines) -> Result<Vec<CartEvent>, DomainError> {
        if !self.created {
            return Ok(vec![]);
        }
        self.ensure_cart_id(cmd.cart_id)?;

        let present: Vec<VariantId> = cmd
            .variant_ids
            .iter()
            .copied()
            .filter(|v| self.line(*v).is_some())
            .collect();

        if present.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::LinesCheckedOut(LinesCheckedOut {
            cart_id: cmd.cart_id,
            order_id: cmd.order_id,
            variant_ids: present,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnLines) -> Result<Vec<CartEvent>, DomainError> {
        if !self.created || cmd.lines.is_empty() {
            return Ok(vec![]);
        }
        self.ensure_cart_id(cmd.cart_id)?;

        Ok(vec![CartEvent::LinesReturned(LinesReturned {
            cart_id: cmd.cart_id,
            order_id: cmd.order_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
