use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::drone::{AvailabilityStatus, CertificationStatus, Drone, GeoPoint};
use crate::repository::DroneRepository;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drones", post(create_drone).get(list_drones))
        .route("/drones/:id", get(get_drone))
        .route("/drones/:id/availability", patch(update_availability))
        .route("/admin/drones/reconcile", post(reconcile))
}

#[derive(Deserialize)]
pub struct CreateDroneRequest {
    pub owner_id: Uuid,
    pub brand: String,
    pub model: String,
    pub location: GeoPoint,
    pub max_load: f64,
    pub max_distance: f64,
    pub daily_price: i64,
    pub hourly_price: i64,
    #[serde(default)]
    pub deposit: i64,
    #[serde(default)]
    pub certification_status: CertificationStatus,
    #[serde(default)]
    pub rating: f64,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub owner_id: Uuid,
    pub status: AvailabilityStatus,
}

#[derive(Serialize)]
struct ReconcileResponse {
    fixed: usize,
}

async fn create_drone(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDroneRequest>,
) -> Result<Json<Drone>, AppError> {
    if payload.brand.trim().is_empty() || payload.model.trim().is_empty() {
        return Err(AppError::BadRequest(
            "brand and model cannot be empty".to_string(),
        ));
    }
    if !payload.location.is_valid() {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }
    if payload.daily_price < 0 || payload.hourly_price < 0 || payload.deposit < 0 {
        return Err(AppError::BadRequest("prices cannot be negative".to_string()));
    }

    let now = Utc::now();
    let drone = Drone {
        id: Uuid::new_v4(),
        owner_id: payload.owner_id,
        brand: payload.brand,
        model: payload.model,
        location: payload.location,
        max_load: payload.max_load,
        max_distance: payload.max_distance,
        daily_price: payload.daily_price,
        hourly_price: payload.hourly_price,
        deposit: payload.deposit,
        certification_status: payload.certification_status,
        availability_status: AvailabilityStatus::Available,
        rating: payload.rating.clamp(0.0, 5.0),
        created_at: now,
        updated_at: now,
    };

    let drone = DroneRepository::insert(state.store.as_ref(), drone).await?;
    Ok(Json(drone))
}

async fn list_drones(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Drone>>, AppError> {
    Ok(Json(DroneRepository::list(state.store.as_ref()).await?))
}

async fn get_drone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Drone>, AppError> {
    let drone = DroneRepository::get(state.store.as_ref(), id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("drone {} not found", id)))?;

    Ok(Json(drone))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Drone>, AppError> {
    let drone = state
        .tracker
        .set_manual(id, payload.owner_id, payload.status)
        .await?;
    Ok(Json(drone))
}

async fn reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let fixed = state.tracker.reconcile_all().await?;
    Ok(Json(ReconcileResponse { fixed }))
}
