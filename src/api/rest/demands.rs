use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::matching::{NewCargoDemand, NewOffer, NewRentalDemand};
use crate::error::AppError;
use crate::models::demand::{CargoDemand, RentalDemand, RentalOffer};
use crate::models::matching::{DemandKind, MatchStatus, MatchingRecord};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/demands/rental", post(create_rental_demand))
        .route("/demands/cargo", post(create_cargo_demand))
        .route("/offers", post(create_offer))
        .route("/demands/rental/:id/match", post(match_rental))
        .route("/demands/cargo/:id/match", post(match_cargo))
        .route("/demands/rental/:id/matches", get(rental_matches))
        .route("/demands/cargo/:id/matches", get(cargo_matches))
        .route("/matches/:id/status", patch(update_match_status))
}

#[derive(Deserialize)]
pub struct MatchQuery {
    /// Search radius in km; missing or non-positive means the default.
    #[serde(default)]
    pub radius_km: f64,
}

#[derive(Deserialize)]
pub struct UpdateMatchStatusRequest {
    pub status: MatchStatus,
}

async fn create_rental_demand(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewRentalDemand>,
) -> Result<Json<RentalDemand>, AppError> {
    Ok(Json(state.matching.register_rental_demand(payload).await?))
}

async fn create_cargo_demand(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewCargoDemand>,
) -> Result<Json<CargoDemand>, AppError> {
    Ok(Json(state.matching.register_cargo_demand(payload).await?))
}

async fn create_offer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewOffer>,
) -> Result<Json<RentalOffer>, AppError> {
    Ok(Json(state.matching.register_offer(payload).await?))
}

async fn match_rental(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<MatchQuery>,
) -> Result<Json<Vec<MatchingRecord>>, AppError> {
    Ok(Json(
        state.matching.match_rental_demand(id, query.radius_km).await?,
    ))
}

async fn match_cargo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<MatchQuery>,
) -> Result<Json<Vec<MatchingRecord>>, AppError> {
    Ok(Json(
        state.matching.match_cargo_demand(id, query.radius_km).await?,
    ))
}

async fn rental_matches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MatchingRecord>>, AppError> {
    Ok(Json(
        state
            .matching
            .get_matches(id, DemandKind::RentalDemand)
            .await?,
    ))
}

async fn cargo_matches(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MatchingRecord>>, AppError> {
    Ok(Json(
        state
            .matching
            .get_matches(id, DemandKind::CargoDemand)
            .await?,
    ))
}

async fn update_match_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateMatchStatusRequest>,
) -> Result<Json<MatchingRecord>, AppError> {
    Ok(Json(
        state.matching.update_match_status(id, payload.status).await?,
    ))
}
