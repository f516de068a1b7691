use serde::Deserialize;

use stockroom_core::ProductId;
use stockroom_infra::fulfillment::{FulfillmentError, StaffAddItem, VariantRef};
use stockroom_inventory::{VariantId, Warehouse};
use stockroom_orders::Adjustment;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AdjustPhysicalRequest {
    pub warehouse: Warehouse,
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustReservedRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct ChangePriceRequest {
    pub unit_price: u64,
}

/// Either `variant_id`, or `product_id` + `color` + `size`.
#[derive(Debug, Deserialize)]
pub struct VariantSelector {
    pub variant_id: Option<VariantId>,
    pub product_id: Option<ProductId>,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl VariantSelector {
    pub fn into_ref(self) -> Result<VariantRef, FulfillmentError> {
        match self {
            VariantSelector {
                variant_id: Some(id), ..
            } => Ok(VariantRef::Id(id)),
            VariantSelector {
                product_id: Some(product_id),
                color: Some(color),
                size: Some(size),
                ..
            } => Ok(VariantRef::Attributes {
                product_id,
                color,
                size,
            }),
            _ => Err(FulfillmentError::validation(
                "give either variant_id or product_id, color and size",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    #[serde(flatten)]
    pub variant: VariantSelector,
    pub quantity: i64,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub adjustments: Vec<Adjustment>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct SubstituteRequest {
    #[serde(flatten)]
    pub variant: VariantSelector,
    /// Defaults to the missing item's quantity.
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemsRequest {
    pub items: Vec<StaffAddItem>,
}

#[derive(Debug, Deserialize)]
pub struct SetQueuedRequest {
    pub queued: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetAdjustmentsRequest {
    pub adjustments: Vec<Adjustment>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotesRequest {
    pub notes: String,
}

/// With both `color` and `size` the single matching variant is returned.
#[derive(Debug, Default, Deserialize)]
pub struct ProductVariantsQuery {
    pub color: Option<String>,
    pub size: Option<String>,
}
