//! Customer-facing endpoints: cart, checkout, own orders and cancellation.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};

use stockroom_core::CustomerId;
use stockroom_infra::fulfillment::FulfillmentError;
use stockroom_inventory::VariantId;
use stockroom_orders::{OrderId, OrderItemId};

use super::{ok, respond};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/customers/:customer_id/cart", get(get_cart).delete(clear_cart))
        .route("/customers/:customer_id/cart/items", post(add_item))
        .route(
            "/customers/:customer_id/cart/items/:variant_id",
            delete(remove_item).put(update_quantity),
        )
        .route("/customers/:customer_id/checkout", post(checkout))
        .route("/customers/:customer_id/orders", get(list_orders))
        .route("/customers/:customer_id/orders/:order_id", get(get_order))
        .route("/customers/:customer_id/orders/:order_id/cancel", post(cancel_order))
        .route(
            "/customers/:customer_id/orders/:order_id/items/:item_id/cancel",
            post(cancel_item),
        )
        .route(
            "/customers/:customer_id/orders/:order_id/items/:item_id/substitute",
            post(substitute_missing),
        )
}

fn customer_id(raw: &str) -> Result<CustomerId, axum::response::Response> {
    errors::parse_id(raw, "customer", |a| CustomerId::from_uuid(*a.as_uuid()))
}

fn order_ids(customer: &str, order: &str) -> Result<(CustomerId, OrderId), axum::response::Response> {
    Ok((customer_id(customer)?, errors::parse_id(order, "order", OrderId::new)?))
}

fn item_ids(
    customer: &str,
    order: &str,
    item: &str,
) -> Result<(CustomerId, OrderId, OrderItemId), axum::response::Response> {
    let (customer_id, order_id) = order_ids(customer, order)?;
    Ok((customer_id, order_id, errors::parse_id(item, "item", OrderItemId::new)?))
}

pub async fn get_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Path(customer): Path<String>,
) -> axum::response::Response {
    match customer_id(&customer) {
        Ok(c) => ok(services.fulfillment.cart(c)),
        Err(resp) => resp,
    }
}

pub async fn add_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(customer): Path<String>,
    Json(body): Json<dto::AddToCartRequest>,
) -> axum::response::Response {
    let c = match customer_id(&customer) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = body
        .variant
        .into_ref()
        .and_then(|target| services.fulfillment.add_item(c, target, body.quantity, body.thumbnail));
    ok(result)
}

pub async fn update_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Path((customer, variant)): Path<(String, String)>,
    Json(body): Json<dto::UpdateQuantityRequest>,
) -> axum::response::Response {
    let c = match customer_id(&customer) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match errors::parse_id(&variant, "variant", VariantId::new) {
        Ok(v) => ok(services.fulfillment.update_quantity(c, v, body.quantity)),
        Err(resp) => resp,
    }
}

pub async fn remove_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path((customer, variant)): Path<(String, String)>,
) -> axum::response::Response {
    let c = match customer_id(&customer) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match errors::parse_id(&variant, "variant", VariantId::new) {
        Ok(v) => ok(services.fulfillment.remove_item(c, v)),
        Err(resp) => resp,
    }
}

pub async fn clear_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Path(customer): Path<String>,
) -> axum::response::Response {
    match customer_id(&customer) {
        Ok(c) => ok(services.fulfillment.clear_cart(c)),
        Err(resp) => resp,
    }
}

/// 201 when an order was placed, 200 when nothing could be converted.
pub async fn checkout(
    Extension(services): Extension<Arc<AppServices>>,
    Path(customer): Path<String>,
    Json(body): Json<dto::CheckoutRequest>,
) -> axum::response::Response {
    let c = match customer_id(&customer) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match services.fulfillment.checkout(c, body.adjustments, body.notes) {
        Ok(report) => {
            let status = if report.order.is_some() {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            respond(status, Ok(report))
        }
        Err(e) => errors::fulfillment_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Path(customer): Path<String>,
) -> axum::response::Response {
    match customer_id(&customer) {
        Ok(c) => ok(Ok::<_, FulfillmentError>(services.fulfillment.customer_orders(c))),
        Err(resp) => resp,
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path((customer, order)): Path<(String, String)>,
) -> axum::response::Response {
    match order_ids(&customer, &order) {
        Ok((c, o)) => ok(services.fulfillment.customer_order(c, o)),
        Err(resp) => resp,
    }
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path((customer, order)): Path<(String, String)>,
) -> axum::response::Response {
    match order_ids(&customer, &order) {
        Ok((c, o)) => ok(services.fulfillment.cancel_order(Some(c), o)),
        Err(resp) => resp,
    }
}

pub async fn cancel_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path((customer, order, item)): Path<(String, String, String)>,
) -> axum::response::Response {
    match item_ids(&customer, &order, &item) {
        Ok((c, o, i)) => ok(services.fulfillment.cancel_item(Some(c), o, i)),
        Err(resp) => resp,
    }
}

pub async fn substitute_missing(
    Extension(services): Extension<Arc<AppServices>>,
    Path((customer, order, item)): Path<(String, String, String)>,
    Json(body): Json<dto::SubstituteRequest>,
) -> axum::response::Response {
    let (c, o, i) = match item_ids(&customer, &order, &item) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };
    let result = body
        .variant
        .into_ref()
        .and_then(|target| services.fulfillment.substitute_missing(c, o, i, target, body.quantity));
    ok(result)
}
