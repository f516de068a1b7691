use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ProductId};
use stockroom_events::Event;

use crate::warehouse::{Warehouse, WarehouseSplit};

/// Variant identifier: one sellable SKU (product + color + size).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub AggregateId);

impl VariantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for VariantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Physical stock per warehouse plus the single cross-warehouse reserved counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub general: i64,
    pub public_sale: i64,
    pub reserved: i64,
}

impl StockLevels {
    /// Physical quantity across both warehouses.
    pub fn stock_qty(&self) -> i64 {
        self.general.saturating_add(self.public_sale)
    }

    /// `stock_qty − reserved_qty`, never surfaced below zero.
    ///
    /// Historical data may already hold `reserved > stock`; readers still see 0.
    pub fn available(&self) -> i64 {
        self.stock_qty().saturating_sub(self.reserved).max(0)
    }

    pub fn in_warehouse(&self, warehouse: Warehouse) -> i64 {
        match warehouse {
            Warehouse::General => self.general,
            Warehouse::PublicSale => self.public_sale,
        }
    }
}

/// Aggregate root: Variant (the stock ledger entry for one SKU).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    id: VariantId,
    product_id: Option<ProductId>,
    color: String,
    size: String,
    unit_price: u64,
    levels: StockLevels,
    active: bool,
    version: u64,
    created: bool,
}

impl Variant {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: VariantId) -> Self {
        Self {
            id,
            product_id: None,
            color: String::new(),
            size: String::new(),
            unit_price: 0,
            levels: StockLevels::default(),
            active: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> VariantId {
        self.id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn size(&self) -> &str {
        &self.size
    }

    /// Unit price in the smallest currency unit (e.g. cents).
    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn levels(&self) -> StockLevels {
        self.levels
    }

    pub fn available(&self) -> i64 {
        self.levels.available()
    }

    pub fn is_active(&self) -> bool {
        self.created && self.active
    }

    pub fn exists(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Variant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterVariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVariant {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub color: String,
    pub size: String,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustPhysical (manual stock edit in one warehouse).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustPhysical {
    pub variant_id: VariantId,
    pub warehouse: Warehouse,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: WithdrawStock (units physically set aside or found missing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStock {
    pub variant_id: VariantId,
    pub split: WarehouseSplit,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnStock (credit previously withdrawn units back).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnStock {
    pub variant_id: VariantId,
    pub split: WarehouseSplit,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock (guarded reservation used at checkout).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub variant_id: VariantId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustReserved (raw reserved counter delta; releases clamp at zero).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustReserved {
    pub variant_id: VariantId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangePrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePrice {
    pub variant_id: VariantId,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateVariant. Variants are never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateVariant {
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockCommand {
    RegisterVariant(RegisterVariant),
    AdjustPhysical(AdjustPhysical),
    WithdrawStock(WithdrawStock),
    ReturnStock(ReturnStock),
    ReserveStock(ReserveStock),
    AdjustReserved(AdjustReserved),
    ChangePrice(ChangePrice),
    DeactivateVariant(DeactivateVariant),
}

/// Event: VariantRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantRegistered {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub color: String,
    pub size: String,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PhysicalAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalAdjusted {
    pub variant_id: VariantId,
    pub warehouse: Warehouse,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockWithdrawn {
    pub variant_id: VariantId,
    pub split: WarehouseSplit,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReturned {
    pub variant_id: VariantId,
    pub split: WarehouseSplit,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservedAdjusted. `delta` is the applied (post-clamp) change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedAdjusted {
    pub variant_id: VariantId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PriceChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub variant_id: VariantId,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VariantDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDeactivated {
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    VariantRegistered(VariantRegistered),
    PhysicalAdjusted(PhysicalAdjusted),
    StockWithdrawn(StockWithdrawn),
    StockReturned(StockReturned),
    ReservedAdjusted(ReservedAdjusted),
    PriceChanged(PriceChanged),
    VariantDeactivated(VariantDeactivated),
}

impl StockEvent {
    pub fn variant_id(&self) -> VariantId {
        match self {
            StockEvent::VariantRegistered(e) => e.variant_id,
            StockEvent::PhysicalAdjusted(e) => e.variant_id,
            StockEvent::StockWithdrawn(e) => e.variant_id,
            StockEvent::StockReturned(e) => e.variant_id,
            StockEvent::ReservedAdjusted(e) => e.variant_id,
            StockEvent::PriceChanged(e) => e.variant_id,
            StockEvent::VariantDeactivated(e) => e.variant_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::VariantRegistered(_) => "inventory.variant.registered",
            StockEvent::PhysicalAdjusted(_) => "inventory.variant.physical_adjusted",
            StockEvent::StockWithdrawn(_) => "inventory.variant.stock_withdrawn",
            StockEvent::StockReturned(_) => "inventory.variant.stock_returned",
            StockEvent::ReservedAdjusted(_) => "inventory.variant.reserved_adjusted",
            StockEvent::PriceChanged(_) => "inventory.variant.price_changed",
            StockEvent::VariantDeactivated(_) => "inventory.variant.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::VariantRegistered(e) => e.occurred_at,
            StockEvent::PhysicalAdjusted(e) => e.occurred_at,
            StockEvent::StockWithdrawn(e) => e.occurred_at,
            StockEvent::StockReturned(e) => e.occurred_at,
            StockEvent::ReservedAdjusted(e) => e.occurred_at,
            StockEvent::PriceChanged(e) => e.occurred_at,
            StockEvent::VariantDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Variant {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::VariantRegistered(e) => {
                self.id = e.variant_id;
                self.product_id = Some(e.product_id);
                self.color = e.color.clone();
                self.size = e.size.clone();
                self.unit_price = e.unit_price;
                self.levels = StockLevels::default();
                self.active = true;
                self.created = true;
            }
            StockEvent::PhysicalAdjusted(e) => match e.warehouse {
                Warehouse::General => self.levels.general = self.levels.general.saturating_add(e.delta),
                Warehouse::PublicSale => {
                    self.levels.public_sale = self.levels.public_sale.saturating_add(e.delta)
                }
            },
            StockEvent::StockWithdrawn(e) => {
                self.levels.general -= e.split.general;
                self.levels.public_sale -= e.split.public_sale;
            }
            StockEvent::StockReturned(e) => {
                self.levels.general = self.levels.general.saturating_add(e.split.general);
                self.levels.public_sale = self.levels.public_sale.saturating_add(e.split.public_sale);
            }
            StockEvent::ReservedAdjusted(e) => {
                self.levels.reserved = self.levels.reserved.saturating_add(e.delta).max(0);
            }
            StockEvent::PriceChanged(e) => {
                self.unit_price = e.unit_price;
            }
            StockEvent::VariantDeactivated(_) => {
                self.active = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::RegisterVariant(cmd) => self.handle_register(cmd),
            StockCommand::AdjustPhysical(cmd) => self.handle_adjust_physical(cmd),
            StockCommand::WithdrawStock(cmd) => self.handle_withdraw(cmd),
            StockCommand::ReturnStock(cmd) => self.handle_return(cmd),
            StockCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            StockCommand::AdjustReserved(cmd) => self.handle_adjust_reserved(cmd),
            StockCommand::ChangePrice(cmd) => self.handle_change_price(cmd),
            StockCommand::DeactivateVariant(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Variant {
    fn ensure_created(&self, variant_id: VariantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != variant_id {
            return Err(DomainError::invariant("variant_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterVariant) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("variant already exists"));
        }
        if cmd.color.trim().is_empty() || cmd.size.trim().is_empty() {
            return Err(DomainError::validation("color and size cannot be empty"));
        }
        Ok(vec![StockEvent::VariantRegistered(VariantRegistered {
            variant_id: cmd.variant_id,
            product_id: cmd.product_id,
            color: cmd.color.trim().to_string(),
            size: cmd.size.trim().to_string(),
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust_physical(&self, cmd: &AdjustPhysical) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created(cmd.variant_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let Some(new_level) = self.levels.in_warehouse(cmd.warehouse).checked_add(cmd.delta) else {
            return Err(DomainError::validation("stock adjustment out of range"));
        };
        if new_level < 0 {
            return Err(DomainError::invariant(format!(
                "{} stock cannot go negative",
                cmd.warehouse
            )));
        }

        Ok(vec![StockEvent::PhysicalAdjusted(PhysicalAdjusted {
            variant_id: cmd.variant_id,
            warehouse: cmd.warehouse,
            delta: cmd.delta,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_withdraw(&self, cmd: &WithdrawStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created(cmd.variant_id)?;

        if !cmd.split.is_non_negative() || cmd.split.is_empty() {
            return Err(DomainError::validation("withdrawal must be a positive quantity"));
        }

        if cmd.split.general > self.levels.general || cmd.split.public_sale > self.levels.public_sale {
            return Err(DomainError::insufficient_stock(
                cmd.split.total(),
                self.levels.stock_qty(),
            ));
        }

        Ok(vec![StockEvent::StockWithdrawn(StockWithdrawn {
            variant_id: cmd.variant_id,
            split: cmd.split,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created(cmd.variant_id)?;

        if !cmd.split.is_non_negative() {
            return Err(DomainError::validation("returned quantities cannot be negative"));
        }
        if cmd.split.is_empty() {
            return Ok(vec![]);
        }
        if self.levels.general.checked_add(cmd.split.general).is_none()
            || self.levels.public_sale.checked_add(cmd.split.public_sale).is_none()
        {
            return Err(DomainError::validation("returned quantity out of range"));
        }

        Ok(vec![StockEvent::StockReturned(StockReturned {
            variant_id: cmd.variant_id,
            split: cmd.split,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created(cmd.variant_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if !self.active {
            return Err(DomainError::insufficient_stock(cmd.quantity, 0));
        }

        let available = self.levels.available();
        if cmd.quantity > available {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }

        Ok(vec![StockEvent::ReservedAdjusted(ReservedAdjusted {
            variant_id: cmd.variant_id,
            delta: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust_reserved(&self, cmd: &AdjustReserved) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created(cmd.variant_id)?;

        // Releases are clamped at zero rather than rejected: historical data may
        // already be inconsistent, and a release must always succeed.
        let applied = if cmd.delta < 0 {
            cmd.delta.max(-self.levels.reserved)
        } else {
            cmd.delta
        };
        if self.levels.reserved.checked_add(applied).is_none() {
            return Err(DomainError::validation("reserved adjustment out of range"));
        }

        if applied == 0 {
            return Ok(vec![]);
        }

        Ok(vec![StockEvent::ReservedAdjusted(ReservedAdjusted {
            variant_id: cmd.variant_id,
            delta: applied,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_price(&self, cmd: &ChangePrice) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created(cmd.variant_id)?;

        if cmd.unit_price == self.unit_price {
            return Ok(vec![]);
        }

        Ok(vec![StockEvent::PriceChanged(PriceChanged {
            variant_id: cmd.variant_id,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateVariant) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_created(cmd.variant_id)?;

        if !self.active {
            return Ok(vec![]);
        }

        Ok(vec![StockEvent::VariantDeactivated(VariantDeactivated {
            variant_id: cmd.variant_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
