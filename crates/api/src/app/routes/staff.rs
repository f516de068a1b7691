//! Staff endpoints: order workflow and the fulfillment read models.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};

use stockroom_infra::fulfillment::OrderView;
use stockroom_orders::{OrderId, OrderItemId};

use super::ok;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/close", post(close_order))
        .route("/orders/:order_id/sent", post(mark_sent))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/orders/:order_id/items", post(add_items))
        .route("/orders/:order_id/items/:item_id/picked", post(mark_picked))
        .route("/orders/:order_id/items/:item_id/missing", post(mark_missing))
        .route("/orders/:order_id/items/:item_id/queued", put(set_queued))
        .route("/orders/:order_id/items/:item_id/cancel", post(cancel_item))
        .route("/orders/:order_id/adjustments", put(set_adjustments))
        .route("/orders/:order_id/notes", put(update_notes))
        .route("/pending-items", get(pending_items))
        .route("/missing", get(missing_summary))
        .route("/low-stock", get(low_stock))
        .route("/notifications", get(notifications))
        .route("/read-models/rebuild", post(rebuild_read_models))
}

fn order_id(raw: &str) -> Result<OrderId, axum::response::Response> {
    errors::parse_id(raw, "order", OrderId::new)
}

fn item_ids(order: &str, item: &str) -> Result<(OrderId, OrderItemId), axum::response::Response> {
    Ok((order_id(order)?, errors::parse_id(item, "item", OrderItemId::new)?))
}

pub async fn list_orders(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let orders: Vec<OrderView> = services
        .fulfillment
        .read_models()
        .orders
        .list()
        .iter()
        .map(OrderView::from)
        .collect();
    Json(orders).into_response()
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order): Path<String>,
) -> axum::response::Response {
    match order_id(&order) {
        Ok(o) => ok(services.fulfillment.order(o)),
        Err(resp) => resp,
    }
}

pub async fn close_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order): Path<String>,
) -> axum::response::Response {
    match order_id(&order) {
        Ok(o) => ok(services.fulfillment.close_order(o)),
        Err(resp) => resp,
    }
}

pub async fn mark_sent(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order): Path<String>,
) -> axum::response::Response {
    match order_id(&order) {
        Ok(o) => ok(services.fulfillment.mark_sent(o)),
        Err(resp) => resp,
    }
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order): Path<String>,
) -> axum::response::Response {
    match order_id(&order) {
        Ok(o) => ok(services.fulfillment.cancel_order(None, o)),
        Err(resp) => resp,
    }
}

pub async fn add_items(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order): Path<String>,
    Json(body): Json<dto::AddItemsRequest>,
) -> axum::response::Response {
    match order_id(&order) {
        Ok(o) => ok(services.fulfillment.add_items(o, body.items)),
        Err(resp) => resp,
    }
}

pub async fn mark_picked(
    Extension(services): Extension<Arc<AppServices>>,
    Path((order, item)): Path<(String, String)>,
) -> axum::response::Response {
    match item_ids(&order, &item) {
        Ok((o, i)) => ok(services.fulfillment.mark_picked(o, i)),
        Err(resp) => resp,
    }
}

pub async fn mark_missing(
    Extension(services): Extension<Arc<AppServices>>,
    Path((order, item)): Path<(String, String)>,
) -> axum::response::Response {
    match item_ids(&order, &item) {
        Ok((o, i)) => ok(services.fulfillment.mark_missing(o, i)),
        Err(resp) => resp,
    }
}

pub async fn set_queued(
    Extension(services): Extension<Arc<AppServices>>,
    Path((order, item)): Path<(String, String)>,
    Json(body): Json<dto::SetQueuedRequest>,
) -> axum::response::Response {
    match item_ids(&order, &item) {
        Ok((o, i)) => ok(services.fulfillment.set_queued(o, i, body.queued)),
        Err(resp) => resp,
    }
}

pub async fn cancel_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path((order, item)): Path<(String, String)>,
) -> axum::response::Response {
    match item_ids(&order, &item) {
        Ok((o, i)) => ok(services.fulfillment.cancel_item(None, o, i)),
        Err(resp) => resp,
    }
}

pub async fn set_adjustments(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order): Path<String>,
    Json(body): Json<dto::SetAdjustmentsRequest>,
) -> axum::response::Response {
    match order_id(&order) {
        Ok(o) => ok(services.fulfillment.set_adjustments(o, body.adjustments)),
        Err(resp) => resp,
    }
}

pub async fn update_notes(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order): Path<String>,
    Json(body): Json<dto::UpdateNotesRequest>,
) -> axum::response::Response {
    match order_id(&order) {
        Ok(o) => ok(services.fulfillment.update_notes(o, body.notes)),
        Err(resp) => resp,
    }
}

pub async fn pending_items(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    Json(services.fulfillment.pending_items()).into_response()
}

pub async fn missing_summary(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    Json(services.fulfillment.missing_summary()).into_response()
}

pub async fn low_stock(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    Json(services.fulfillment.low_stock_groups()).into_response()
}

pub async fn notifications(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    Json(services.notifications.list()).into_response()
}

pub async fn rebuild_read_models(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    ok(services
        .fulfillment
        .rebuild_read_models()
        .map(|replayed| serde_json::json!({ "replayed": replayed })))
}
