use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::settlement::CreatedPayment;
use crate::error::AppError;
use crate::models::payment::Payment;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/orders/:id/payments",
            post(create_payment).get(list_payments),
        )
        .route("/payments/:payment_no/confirm", post(confirm_payment))
}

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub payer_id: Uuid,
}

#[derive(Deserialize)]
pub struct ConfirmPaymentRequest {
    pub third_party_no: String,
}

async fn create_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Json<CreatedPayment>, AppError> {
    Ok(Json(
        state.payments.create_payment(id, payload.payer_id).await?,
    ))
}

async fn list_payments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.payments.list_for_order(id).await?))
}

/// Provider callback. Safe to deliver more than once.
async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_no): Path<String>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .payments
        .confirm_payment(&payment_no, &payload.third_party_no)
        .await?;
    Ok(Json(payment))
}
