use serde::Serialize;
use thiserror::Error;

use stockroom_inventory::VariantId;

use crate::command_dispatcher::DispatchError;
use crate::external::Alternative;

/// Failures surfaced to customers and staff.
///
/// Every variant is recoverable by the caller: re-fetch and retry, pick a
/// smaller quantity or an alternative, or fix the input.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum FulfillmentError {
    /// Caller-correctable: `available` is the real remaining quantity.
    /// `alternatives` is filled when nothing is left.
    #[error("insufficient stock: requested {requested}, {available} available")]
    InsufficientStock {
        variant_id: Option<VariantId>,
        requested: i64,
        available: i64,
        alternatives: Vec<Alternative>,
    },

    /// The row changed since it was read; re-fetch and try again.
    #[error("stale read: {message}")]
    StaleRead { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("invalid transition: {message}")]
    InvalidTransition { message: String },

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("storage failure: {message}")]
    Store { message: String },
}

impl FulfillmentError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_transition(message: impl Into<String>) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn insufficient(variant_id: VariantId, requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            variant_id: Some(variant_id),
            requested,
            available: available.max(0),
            alternatives: Vec::new(),
        }
    }

    /// Stable machine-readable code, also used as the HTTP error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::StaleRead { .. } => "stale_read",
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Validation { .. } => "validation",
            Self::Store { .. } => "store",
        }
    }

    pub(crate) fn for_variant(self, id: VariantId) -> Self {
        match self {
            Self::InsufficientStock {
                variant_id: None,
                requested,
                available,
                alternatives,
            } => Self::InsufficientStock {
                variant_id: Some(id),
                requested,
                available: available.max(0),
                alternatives,
            },
            other => other,
        }
    }
}

impl From<DispatchError> for FulfillmentError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(message) | DispatchError::Conflict(message) => {
                Self::StaleRead { message }
            }
            DispatchError::Validation(message) | DispatchError::InvariantViolation(message) => {
                Self::Validation { message }
            }
            DispatchError::NotFound => Self::not_found("no such record"),
            DispatchError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                variant_id: None,
                requested,
                available,
                alternatives: Vec::new(),
            },
            DispatchError::InvalidTransition(message) => Self::InvalidTransition { message },
            DispatchError::Deserialize(message) => Self::Store { message },
            DispatchError::Store(err) => Self::Store {
                message: err.to_string(),
            },
        }
    }
}
