use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use stockroom_core::AggregateId;
use stockroom_infra::fulfillment::FulfillmentError;

/// Map a fulfillment failure to its HTTP status and a JSON body carrying the
/// error code, a message, and any structured detail (remaining quantity,
/// alternatives).
pub fn fulfillment_error_to_response(err: FulfillmentError) -> axum::response::Response {
    let status = match &err {
        FulfillmentError::StaleRead { .. } => StatusCode::CONFLICT,
        FulfillmentError::InsufficientStock { .. } | FulfillmentError::InvalidTransition { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        FulfillmentError::NotFound { .. } => StatusCode::NOT_FOUND,
        FulfillmentError::Validation { .. } => StatusCode::BAD_REQUEST,
        FulfillmentError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }

    let message = err.to_string();
    let mut body = serde_json::to_value(&err).unwrap_or_else(|_| json!({ "error": err.code() }));
    if let Some(obj) = body.as_object_mut() {
        obj.insert("message".to_string(), json!(message));
    }
    (status, axum::Json(body)).into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path segment into one of the typed ids.
pub fn parse_id<T>(raw: &str, what: &str, wrap: impl FnOnce(AggregateId) -> T) -> Result<T, axum::response::Response> {
    raw.parse::<AggregateId>()
        .map(wrap)
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
