//! Stock ledger operations exposed to catalog management and staff.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use stockroom_core::{AggregateId, ProductId};
use stockroom_events::{EventBus, EventEnvelope};
use stockroom_inventory::{
    AdjustPhysical, AdjustReserved, ChangePrice, DeactivateVariant, RegisterVariant, StockCommand, Variant, VariantId,
    Warehouse,
};

use super::{make_variant, Fulfillment, FulfillmentError, FulfillmentResult};
use crate::event_store::EventStore;
use crate::external::Alternative;
use crate::projections::{VariantStock, VARIANT_STREAM};

/// A new SKU with its opening stock per warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariant {
    pub product_id: ProductId,
    pub color: String,
    pub size: String,
    pub unit_price: u64,
    #[serde(default)]
    pub general: i64,
    #[serde(default)]
    pub public_sale: i64,
}

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(skip(self), err)]
    pub fn register_variant(&self, new: NewVariant) -> FulfillmentResult<VariantStock> {
        if new.general < 0 || new.public_sale < 0 {
            return Err(FulfillmentError::validation("opening stock cannot be negative"));
        }

        let variant_id = VariantId::new(AggregateId::new());
        self.commit(
            VARIANT_STREAM,
            variant_id.0,
            StockCommand::RegisterVariant(RegisterVariant {
                variant_id,
                product_id: new.product_id,
                color: new.color,
                size: new.size,
                unit_price: new.unit_price,
                occurred_at: Utc::now(),
            }),
            make_variant,
        )?;

        for (warehouse, quantity) in [
            (Warehouse::General, new.general),
            (Warehouse::PublicSale, new.public_sale),
        ] {
            if quantity > 0 {
                self.adjust_physical(variant_id, warehouse, quantity)?;
            }
        }

        tracing::info!(%variant_id, "variant registered");
        self.variant(variant_id)
    }

    /// Manual stock edit. Rejected when the warehouse would go negative.
    #[instrument(skip(self), err)]
    pub fn adjust_physical(
        &self,
        variant_id: VariantId,
        warehouse: Warehouse,
        delta: i64,
    ) -> FulfillmentResult<VariantStock> {
        self.commit_ledger(variant_id, |_| {
            Ok(StockCommand::AdjustPhysical(AdjustPhysical {
                variant_id,
                warehouse,
                delta,
                occurred_at: Utc::now(),
            }))
        })?;
        self.variant(variant_id)
    }

    /// Manual correction of the reserved counter. Decrements clamp at zero.
    #[instrument(skip(self), err)]
    pub fn adjust_reserved(&self, variant_id: VariantId, delta: i64) -> FulfillmentResult<VariantStock> {
        if delta < 0 {
            self.release_reserved(variant_id, -delta)?;
        } else if delta > 0 {
            self.commit_ledger(variant_id, |_| {
                Ok(StockCommand::AdjustReserved(AdjustReserved {
                    variant_id,
                    delta,
                    occurred_at: Utc::now(),
                }))
            })?;
        }
        self.variant(variant_id)
    }

    #[instrument(skip(self), err)]
    pub fn change_price(&self, variant_id: VariantId, unit_price: u64) -> FulfillmentResult<VariantStock> {
        self.commit_ledger(variant_id, |_| {
            Ok(StockCommand::ChangePrice(ChangePrice {
                variant_id,
                unit_price,
                occurred_at: Utc::now(),
            }))
        })?;
        self.variant(variant_id)
    }

    /// Variants are never deleted, only taken off sale.
    #[instrument(skip(self), err)]
    pub fn deactivate_variant(&self, variant_id: VariantId) -> FulfillmentResult<VariantStock> {
        self.commit_ledger(variant_id, |_| {
            Ok(StockCommand::DeactivateVariant(DeactivateVariant {
                variant_id,
                occurred_at: Utc::now(),
            }))
        })?;
        self.variant(variant_id)
    }

    /// `stock_qty − reserved_qty`, computed from a fresh read and never below zero.
    pub fn availability(&self, variant_id: VariantId) -> FulfillmentResult<i64> {
        Ok(self.load_variant(variant_id)?.available())
    }

    /// Current ledger row, read from the store rather than the projection.
    pub fn variant(&self, variant_id: VariantId) -> FulfillmentResult<VariantStock> {
        let variant = self.load_variant(variant_id)?;
        VariantStock::from_variant(&variant)
            .ok_or_else(|| FulfillmentError::not_found(format!("variant {variant_id}")))
    }

    /// Resolve a (product, color, size) tuple to its active variant.
    pub fn find_variant(&self, product_id: ProductId, color: &str, size: &str) -> FulfillmentResult<VariantStock> {
        self.read_models
            .variants
            .find(product_id, color, size)
            .ok_or_else(|| FulfillmentError::not_found(format!("no active variant {product_id} {color}/{size}")))
    }

    pub fn list_variants(&self) -> Vec<VariantStock> {
        self.read_models.variants.list()
    }

    /// Substitutes for a variant, ranked by the configured resolver.
    pub fn alternatives_for(&self, variant_id: VariantId) -> FulfillmentResult<Vec<Alternative>> {
        let variant = self.load_variant(variant_id)?;
        Ok(self.alternatives_of(&variant))
    }

    pub(crate) fn alternatives_of(&self, variant: &Variant) -> Vec<Alternative> {
        match variant.product_id() {
            Some(product_id) => self
                .resolver
                .alternatives(product_id, variant.size(), variant.id_typed()),
            None => Vec::new(),
        }
    }

    /// Fill in substitutes when an insufficient-stock error reports nothing left.
    pub(crate) fn with_alternatives(&self, err: FulfillmentError) -> FulfillmentError {
        match err {
            FulfillmentError::InsufficientStock {
                variant_id: Some(variant_id),
                requested,
                available: 0,
                alternatives,
            } if alternatives.is_empty() => {
                let alternatives = match self.load_variant(variant_id) {
                    Ok(variant) => self.alternatives_of(&variant),
                    Err(e) => {
                        tracing::warn!(%variant_id, error = %e, "could not look up alternatives");
                        Vec::new()
                    }
                };
                FulfillmentError::InsufficientStock {
                    variant_id: Some(variant_id),
                    requested,
                    available: 0,
                    alternatives,
                }
            }
            other => other,
        }
    }
}
