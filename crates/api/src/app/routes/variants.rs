//! Catalog and stock ledger endpoints used by staff.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use stockroom_core::ProductId;
use stockroom_infra::fulfillment::NewVariant;
use stockroom_inventory::VariantId;

use super::{ok, respond};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/variants", post(register_variant).get(list_variants))
        .route("/variants/:id", get(get_variant))
        .route("/variants/:id/physical", post(adjust_physical))
        .route("/variants/:id/reserved", post(adjust_reserved))
        .route("/variants/:id/price", post(change_price))
        .route("/variants/:id/deactivate", post(deactivate_variant))
        .route("/variants/:id/alternatives", get(alternatives))
        .route("/products/:id/variants", get(product_variants))
}

fn variant_id(raw: &str) -> Result<VariantId, axum::response::Response> {
    errors::parse_id(raw, "variant", VariantId::new)
}

pub async fn register_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewVariant>,
) -> axum::response::Response {
    respond(StatusCode::CREATED, services.fulfillment.register_variant(body))
}

pub async fn list_variants(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    Json(services.fulfillment.list_variants()).into_response()
}

pub async fn get_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match variant_id(&id) {
        Ok(id) => ok(services.fulfillment.variant(id)),
        Err(resp) => resp,
    }
}

pub async fn adjust_physical(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustPhysicalRequest>,
) -> axum::response::Response {
    match variant_id(&id) {
        Ok(id) => ok(services.fulfillment.adjust_physical(id, body.warehouse, body.delta)),
        Err(resp) => resp,
    }
}

pub async fn adjust_reserved(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustReservedRequest>,
) -> axum::response::Response {
    match variant_id(&id) {
        Ok(id) => ok(services.fulfillment.adjust_reserved(id, body.delta)),
        Err(resp) => resp,
    }
}

pub async fn change_price(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangePriceRequest>,
) -> axum::response::Response {
    match variant_id(&id) {
        Ok(id) => ok(services.fulfillment.change_price(id, body.unit_price)),
        Err(resp) => resp,
    }
}

pub async fn deactivate_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match variant_id(&id) {
        Ok(id) => ok(services.fulfillment.deactivate_variant(id)),
        Err(resp) => resp,
    }
}

pub async fn alternatives(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match variant_id(&id) {
        Ok(id) => ok(services.fulfillment.alternatives_for(id)),
        Err(resp) => resp,
    }
}

pub async fn product_variants(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::ProductVariantsQuery>,
) -> axum::response::Response {
    let product_id = match errors::parse_id(&id, "product", |a| ProductId::from_uuid(*a.as_uuid())) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match (query.color, query.size) {
        (Some(color), Some(size)) => ok(services.fulfillment.find_variant(product_id, &color, &size)),
        _ => Json(services.fulfillment.read_models().variants.by_product(product_id)).into_response(),
    }
}
