use serde::Serialize;
use serde_json::Value as JsonValue;

use stockroom_core::{Aggregate, ProductId};
use stockroom_events::EventEnvelope;
use stockroom_inventory::{StockEvent, Variant, VariantId};

use super::cursor::{CursorCheck, ProjectionError, StreamCursors};
use crate::read_model::ReadStore;

/// Stock ledger row as shown to staff and customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantStock {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub color: String,
    pub size: String,
    pub unit_price: u64,
    pub general: i64,
    pub public_sale: i64,
    pub stock_qty: i64,
    pub reserved: i64,
    /// Never negative, even when historical data has `reserved > stock`.
    pub available: i64,
    pub active: bool,
}

impl VariantStock {
    pub(crate) fn from_variant(v: &Variant) -> Option<Self> {
        let levels = v.levels();
        Some(Self {
            variant_id: v.id_typed(),
            product_id: v.product_id()?,
            color: v.color().to_string(),
            size: v.size().to_string(),
            unit_price: v.unit_price(),
            general: levels.general,
            public_sale: levels.public_sale,
            stock_qty: levels.stock_qty(),
            reserved: levels.reserved,
            available: levels.available(),
            active: v.is_active(),
        })
    }
}

/// Active variants of one product and size whose combined-color stock is
/// under the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockGroup {
    pub product_id: ProductId,
    pub size: String,
    pub stock_qty: i64,
    pub variants: Vec<VariantStock>,
}

/// Stock ledger projection: one rehydrated `Variant` per stream.
#[derive(Debug)]
pub struct VariantStockProjection<S>
where
    S: ReadStore<VariantId, Variant>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> VariantStockProjection<S>
where
    S: ReadStore<VariantId, Variant>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn cursors(&self) -> &StreamCursors {
        &self.cursors
    }

    pub fn variant(&self, variant_id: VariantId) -> Option<Variant> {
        self.store.get(&variant_id).filter(Variant::exists)
    }

    pub fn get(&self, variant_id: VariantId) -> Option<VariantStock> {
        self.variant(variant_id)
            .as_ref()
            .and_then(VariantStock::from_variant)
    }

    pub fn list(&self) -> Vec<VariantStock> {
        let mut rows: Vec<VariantStock> = self
            .store
            .list()
            .iter()
            .filter(|v| v.exists())
            .filter_map(VariantStock::from_variant)
            .collect();
        rows.sort_by(|a, b| {
            (a.product_id.as_uuid(), &a.size, &a.color).cmp(&(b.product_id.as_uuid(), &b.size, &b.color))
        });
        rows
    }

    pub fn by_product(&self, product_id: ProductId) -> Vec<VariantStock> {
        self.list()
            .into_iter()
            .filter(|v| v.product_id == product_id)
            .collect()
    }

    /// Resolve a (product, color, size) tuple to its active variant.
    pub fn find(&self, product_id: ProductId, color: &str, size: &str) -> Option<VariantStock> {
        self.list().into_iter().find(|v| {
            v.active
                && v.product_id == product_id
                && v.color.eq_ignore_ascii_case(color)
                && v.size.eq_ignore_ascii_case(size)
        })
    }

    /// Product/size groups whose summed stock across colors is below `threshold`.
    pub fn low_stock_groups(&self, threshold: i64) -> Vec<LowStockGroup> {
        let mut groups: Vec<LowStockGroup> = Vec::new();
        for v in self.list().into_iter().filter(|v| v.active) {
            match groups
                .iter_mut()
                .find(|g| g.product_id == v.product_id && g.size == v.size)
            {
                Some(group) => {
                    group.stock_qty += v.stock_qty;
                    group.variants.push(v);
                }
                None => groups.push(LowStockGroup {
                    product_id: v.product_id,
                    size: v.size.clone(),
                    stock_qty: v.stock_qty,
                    variants: vec![v],
                }),
            }
        }

        groups.retain(|g| g.stock_qty < threshold);
        groups.sort_by_key(|g| g.stock_qty);
        groups
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursor = self.cursors.lock();
        if cursor.check(aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let event: StockEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
        let variant_id = event.variant_id();
        if variant_id.0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(aggregate_id));
        }

        let mut variant = self
            .store
            .get(&variant_id)
            .unwrap_or_else(|| Variant::empty(variant_id));
        variant.apply(&event);
        self.store.upsert(variant_id, variant);

        cursor.advance(aggregate_id, seq);
        Ok(())
    }

    pub fn clear(&self) {
        self.cursors.clear();
        self.store.clear();
    }
}
