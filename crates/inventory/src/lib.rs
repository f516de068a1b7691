//! Stock ledger domain module (event-sourced).
//!
//! One `Variant` aggregate per SKU holds physical stock for the general and
//! public-sale warehouses plus a single reserved counter. Pure domain logic:
//! no IO, no HTTP, no storage.

pub mod variant;
pub mod warehouse;

pub use variant::{
    AdjustPhysical, AdjustReserved, ChangePrice, DeactivateVariant, PhysicalAdjusted,
    PriceChanged, RegisterVariant, ReserveStock, ReservedAdjusted, ReturnStock, StockCommand,
    StockEvent, StockLevels, StockReturned, StockWithdrawn, Variant, VariantDeactivated, VariantId,
    VariantRegistered, WithdrawStock,
};
pub use warehouse::{Warehouse, WarehouseSplit};
