use serde::{Deserialize, Serialize};

use stockroom_core::ValueObject;

/// Physical stock location.
///
/// Availability sums both warehouses; manual edits and reporting address one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warehouse {
    General,
    PublicSale,
}

impl core::fmt::Display for Warehouse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Warehouse::General => f.write_str("general"),
            Warehouse::PublicSale => f.write_str("public_sale"),
        }
    }
}

impl core::str::FromStr for Warehouse {
    type Err = stockroom_core::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "general" => Ok(Warehouse::General),
            "public_sale" => Ok(Warehouse::PublicSale),
            other => Err(stockroom_core::DomainError::validation(format!(
                "unknown warehouse '{other}' (expected general or public_sale)"
            ))),
        }
    }
}

/// Quantity drawn from (or credited back to) each warehouse.
///
/// Recorded on order items when physical stock is withdrawn so a later
/// cancellation credits the same warehouses back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSplit {
    pub general: i64,
    pub public_sale: i64,
}

impl ValueObject for WarehouseSplit {}

impl WarehouseSplit {
    pub const EMPTY: WarehouseSplit = WarehouseSplit {
        general: 0,
        public_sale: 0,
    };

    /// Allocate `requested` units drawing from `general` first.
    ///
    /// `qty_from_general = min(requested, stock_general)`, the remainder comes from
    /// public-sale stock. Whether the public-sale warehouse can cover the remainder
    /// is checked by the ledger when the split is withdrawn.
    pub fn general_first(requested: i64, stock_general: i64) -> Self {
        let requested = requested.max(0);
        let general = requested.min(stock_general.max(0));
        Self {
            general,
            public_sale: requested - general,
        }
    }

    pub fn only(warehouse: Warehouse, quantity: i64) -> Self {
        match warehouse {
            Warehouse::General => Self {
                general: quantity,
                public_sale: 0,
            },
            Warehouse::PublicSale => Self {
                general: 0,
                public_sale: quantity,
            },
        }
    }

    pub fn total(&self) -> i64 {
        self.general.saturating_add(self.public_sale)
    }

    pub fn is_empty(&self) -> bool {
        self.general == 0 && self.public_sale == 0
    }

    pub fn is_non_negative(&self) -> bool {
        self.general >= 0 && self.public_sale >= 0
    }

    pub fn get(&self, warehouse: Warehouse) -> i64 {
        match warehouse {
            Warehouse::General => self.general,
            Warehouse::PublicSale => self.public_sale,
        }
    }
}

impl core::ops::Add for WarehouseSplit {
    type Output = WarehouseSplit;

    fn add(self, rhs: Self) -> Self::Output {
        WarehouseSplit {
            general: self.general + rhs.general,
            public_sale: self.public_sale + rhs.public_sale,
        }
    }
}
