use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch},
    Router,
};
use serde::Deserialize;
use shared::{PaymentFilter, PaymentRecord, PaymentStatus};

use crate::error::PaymentError;
use crate::service::PaymentService;
use crate::submitter::PaymentRequest;

#[derive(Clone)]
pub struct AppState {
    pub service: PaymentService,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: String,
}

type ApiResult<T> = Result<T, PaymentError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/payments", get(list_payments).post(create_payment))
        .route("/api/payments/:id", get(get_payment).delete(delete_payment))
        .route("/api/payments/:id/status", patch(update_status))
        .route("/api/payments/transaction/:transaction_id", get(get_by_transaction))
        .route("/api/payments/sender/:account", get(list_by_sender))
        .route("/api/payments/receiver/:account", get(list_by_receiver))
        .route("/api/payments/status/:status", get(list_by_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn parse_status(raw: &str) -> ApiResult<PaymentStatus> {
    raw.parse().map_err(PaymentError::InvalidRequest)
}

pub async fn create_payment(
    State(state): State<AppState>,
    body: Result<Json<PaymentRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PaymentRecord>)> {
    let Json(request) = body.map_err(|e| PaymentError::InvalidRequest(e.body_text()))?;
    let record = state.service.create(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_payments(State(state): State<AppState>) -> ApiResult<Json<Vec<PaymentRecord>>> {
    Ok(Json(state.service.list(&PaymentFilter::All).await?))
}

pub async fn get_payment(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<PaymentRecord>> {
    Ok(Json(state.service.get_by_id(id).await?))
}

pub async fn get_by_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> ApiResult<Json<PaymentRecord>> {
    Ok(Json(state.service.get_by_transaction_id(&transaction_id).await?))
}

pub async fn list_by_sender(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> ApiResult<Json<Vec<PaymentRecord>>> {
    Ok(Json(state.service.list(&PaymentFilter::Sender(account)).await?))
}

pub async fn list_by_receiver(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> ApiResult<Json<Vec<PaymentRecord>>> {
    Ok(Json(state.service.list(&PaymentFilter::Receiver(account)).await?))
}

pub async fn list_by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> ApiResult<Json<Vec<PaymentRecord>>> {
    let status = parse_status(&status)?;
    Ok(Json(state.service.list(&PaymentFilter::Status(status)).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<PaymentRecord>> {
    let status = parse_status(&query.status)?;
    Ok(Json(state.service.update_status(id, status).await?))
}

pub async fn delete_payment(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health_check() -> &'static str {
    "OK"
}
