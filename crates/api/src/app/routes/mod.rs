use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use serde::Serialize;

use stockroom_infra::fulfillment::FulfillmentResult;

use crate::app::errors;

pub mod customers;
pub mod staff;
pub mod system;
pub mod variants;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .merge(variants::router())
        .merge(customers::router())
        .nest("/staff", staff::router())
}

/// Serialize a successful result with `status`, or map the error.
pub fn respond<T: Serialize>(status: StatusCode, result: FulfillmentResult<T>) -> axum::response::Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(e) => errors::fulfillment_error_to_response(e),
    }
}

pub fn ok<T: Serialize>(result: FulfillmentResult<T>) -> axum::response::Response {
    respond(StatusCode::OK, result)
}
