//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes.
///
/// Warehouse splits, percentages and order adjustments are value objects: two
/// `WarehouseSplit { general: 4, public_sale: 6 }` are the same split no matter
/// which order item recorded them. To "change" one, build a new value.
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// struct Percent { basis_points: u32 }
///
/// impl ValueObject for Percent {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
