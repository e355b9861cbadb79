use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::matching::MatchStatus;
use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("order {order_id} is {current}, cannot {action}")]
    InvalidState {
        order_id: Uuid,
        current: OrderStatus,
        action: &'static str,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("dependency failure: {0}")]
    DependencyFailure(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidState { .. } => "invalid_state",
            AppError::PolicyViolation(_) => "policy_violation",
            AppError::DependencyFailure(_) => "dependency_failure",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }
}

/// Failures raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("order {order_id} moved from {expected} to {actual}")]
    Conflict {
        order_id: Uuid,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("matching record {id} cannot move from {current:?} to {requested:?}")]
    MatchMove {
        id: Uuid,
        current: MatchStatus,
        requested: MatchStatus,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Conflict {
                order_id, actual, ..
            } => AppError::InvalidState {
                order_id,
                current: actual,
                action: "apply a transition that raced with another update",
            },
            err @ StoreError::MatchMove { .. } => AppError::BadRequest(err.to_string()),
            StoreError::Unavailable(msg) => AppError::DependencyFailure(msg),
        }
    }
}

/// Failures raised by a payment provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider rejected request: {0}")]
    Rejected(String),

    #[error("payment provider unreachable: {0}")]
    Unreachable(String),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::DependencyFailure(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidState { .. } => StatusCode::CONFLICT,
            AppError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DependencyFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}
