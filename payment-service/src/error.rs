use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{BrokerError, StoreError, TransitionError};
use std::collections::BTreeMap;
use thiserror::Error;

/// Field name to reason, for every field that failed validation.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid fields: {}", .0.keys().map(String::as_str).collect::<Vec<_>>().join(", "))]
    Validation(FieldErrors),
    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),
    #[error("payment {0} was modified concurrently")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl From<StoreError> for PaymentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => PaymentError::NotFound(key),
            StoreError::Conflict(key) | StoreError::DuplicateTransaction(key) => PaymentError::Conflict(key),
            StoreError::Backend(reason) => PaymentError::Store(reason),
        }
    }
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::InvalidRequest(_) | PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::IllegalTransition(_) | PaymentError::Conflict(_) => StatusCode::CONFLICT,
            PaymentError::Store(_) | PaymentError::Broker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let message = self.to_string();
        let errors = match self {
            PaymentError::Validation(errors) => Some(errors),
            _ => None,
        };
        let body = ErrorResponse {
            status: status.as_u16(),
            message,
            timestamp: Utc::now(),
            errors,
        };
        (status, Json(body)).into_response()
    }
}
