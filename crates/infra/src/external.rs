//! External collaborators: staff notifications and the alternative-product
//! resolver. The fulfillment service calls these through traits.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use stockroom_core::{CustomerId, ProductId};
use stockroom_inventory::VariantId;
use stockroom_orders::{OrderId, OrderItemId};

use crate::projections::ReadModels;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// A customer cancelled something staff had already set aside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffNotification {
    pub order_id: OrderId,
    pub customer_id: Option<CustomerId>,
    /// Picked items that were cancelled; their stock must go back on the shelf.
    pub items: Vec<PickedItemCancelled>,
    /// True when the whole order was cancelled rather than a single item.
    pub whole_order: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickedItemCancelled {
    pub item_id: OrderItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
}

/// Best-effort delivery to staff. A failure never blocks the cancellation.
pub trait StaffNotifier: Send + Sync {
    fn notify(&self, notification: StaffNotification) -> Result<(), NotifyError>;
}

impl<N> StaffNotifier for Arc<N>
where
    N: StaffNotifier + ?Sized,
{
    fn notify(&self, notification: StaffNotification) -> Result<(), NotifyError> {
        (**self).notify(notification)
    }
}

/// Keeps notifications in memory for the staff dashboard and tests.
#[derive(Debug, Default)]
pub struct InMemoryStaffNotifier {
    sent: Mutex<Vec<StaffNotification>>,
}

impl InMemoryStaffNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<StaffNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn drain(&self) -> Vec<StaffNotification> {
        self.sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }
}

impl StaffNotifier for InMemoryStaffNotifier {
    fn notify(&self, notification: StaffNotification) -> Result<(), NotifyError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError("notification sink poisoned".to_string()))?;
        sent.push(notification);
        Ok(())
    }
}

/// A substitute offered when the requested variant has nothing left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alternative {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub color: String,
    pub size: String,
    pub unit_price: u64,
    pub available: i64,
}

/// "Find similar": ranked substitutes for a product in a target size.
pub trait AlternativeResolver: Send + Sync {
    fn alternatives(&self, product_id: ProductId, size: &str, exclude: VariantId) -> Vec<Alternative>;
}

/// Resolver backed by the stock projection: same product and size in other
/// colors with stock left, most available first.
#[derive(Debug, Clone)]
pub struct CatalogAlternativeResolver {
    read_models: Arc<ReadModels>,
    limit: usize,
}

impl CatalogAlternativeResolver {
    pub fn new(read_models: Arc<ReadModels>) -> Self {
        Self {
            read_models,
            limit: 5,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl AlternativeResolver for CatalogAlternativeResolver {
    fn alternatives(&self, product_id: ProductId, size: &str, exclude: VariantId) -> Vec<Alternative> {
        let mut found: Vec<Alternative> = self
            .read_models
            .variants
            .by_product(product_id)
            .into_iter()
            .filter(|v| {
                v.active && v.variant_id != exclude && v.available > 0 && v.size.eq_ignore_ascii_case(size)
            })
            .map(|v| Alternative {
                variant_id: v.variant_id,
                product_id: v.product_id,
                color: v.color,
                size: v.size,
                unit_price: v.unit_price,
                available: v.available,
            })
            .collect();

        found.sort_by(|a, b| b.available.cmp(&a.available).then_with(|| a.color.cmp(&b.color)));
        found.truncate(self.limit);
        found
    }
}
