use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::notify::Notifier;
use crate::engine::scoring::{score_drone_for_cargo, score_drone_for_rental, score_offer};
use crate::error::AppError;
use crate::models::demand::{
    CargoDemand, DemandStatus, OfferStatus, PriceType, RentalDemand, RentalOffer,
};
use crate::models::drone::GeoPoint;
use crate::models::matching::{
    DemandKind, MatchReason, MatchStatus, MatchingRecord, SupplyKind,
};
use crate::models::notification::NotificationEvent;
use crate::observability::metrics::Metrics;
use crate::repository::{DemandRepository, DroneRepository, MatchingRepository};

pub const DEFAULT_RADIUS_KM: f64 = 50.0;
pub const MIN_MATCH_SCORE: u8 = 10;
pub const MAX_MATCHES: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRentalDemand {
    pub renter_id: Uuid,
    pub demand_type: String,
    pub title: String,
    pub location: GeoPoint,
    pub required_load: Option<f64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub budget_min: Option<i64>,
    pub budget_max: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCargoDemand {
    pub publisher_id: Uuid,
    pub cargo_type: String,
    pub cargo_weight: f64,
    pub pickup: GeoPoint,
    pub delivery: GeoPoint,
    pub pickup_time: DateTime<Utc>,
    pub offered_price: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOffer {
    pub owner_id: Uuid,
    pub drone_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub service_type: String,
    /// Defaults to the drone's current position.
    pub location: Option<GeoPoint>,
    pub service_radius_km: f64,
    pub price_type: PriceType,
    pub price: i64,
}

pub struct MatchingService {
    drones: Arc<dyn DroneRepository>,
    demands: Arc<dyn DemandRepository>,
    matches: Arc<dyn MatchingRepository>,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
}

impl MatchingService {
    pub fn new(
        drones: Arc<dyn DroneRepository>,
        demands: Arc<dyn DemandRepository>,
        matches: Arc<dyn MatchingRepository>,
        notifier: Arc<dyn Notifier>,
        metrics: Metrics,
    ) -> Self {
        Self {
            drones,
            demands,
            matches,
            notifier,
            metrics,
        }
    }

    pub async fn register_rental_demand(
        &self,
        req: NewRentalDemand,
    ) -> Result<RentalDemand, AppError> {
        if !req.location.is_valid() {
            return Err(AppError::BadRequest("location is out of range".to_string()));
        }
        if req.end_time <= req.start_time {
            return Err(AppError::BadRequest(
                "end_time must be after start_time".to_string(),
            ));
        }
        if req.budget_min.is_some_and(|min| min < 0) || req.budget_max.is_some_and(|max| max < 0) {
            return Err(AppError::BadRequest(
                "budget cannot be negative".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (req.budget_min, req.budget_max) {
            if min > max {
                return Err(AppError::BadRequest(
                    "budget_min must not exceed budget_max".to_string(),
                ));
            }
        }

        let demand = RentalDemand {
            id: Uuid::new_v4(),
            renter_id: req.renter_id,
            demand_type: req.demand_type,
            title: req.title,
            location: req.location,
            required_load: req.required_load,
            start_time: req.start_time,
            end_time: req.end_time,
            budget_min: req.budget_min,
            budget_max: req.budget_max,
            status: DemandStatus::Active,
            created_at: Utc::now(),
        };
        let demand = self.demands.insert_rental_demand(demand).await?;
        info!(demand_id = %demand.id, renter_id = %demand.renter_id, "rental demand registered");
        Ok(demand)
    }

    pub async fn register_cargo_demand(
        &self,
        req: NewCargoDemand,
    ) -> Result<CargoDemand, AppError> {
        if !req.pickup.is_valid() || !req.delivery.is_valid() {
            return Err(AppError::BadRequest(
                "pickup or delivery is out of range".to_string(),
            ));
        }
        if !req.cargo_weight.is_finite() || req.cargo_weight <= 0.0 {
            return Err(AppError::BadRequest("cargo_weight must be > 0".to_string()));
        }

        let demand = CargoDemand {
            id: Uuid::new_v4(),
            publisher_id: req.publisher_id,
            cargo_type: req.cargo_type,
            cargo_weight: req.cargo_weight,
            pickup: req.pickup,
            delivery: req.delivery,
            pickup_time: req.pickup_time,
            offered_price: req.offered_price,
            status: DemandStatus::Active,
            created_at: Utc::now(),
        };
        let demand = self.demands.insert_cargo_demand(demand).await?;
        info!(demand_id = %demand.id, publisher_id = %demand.publisher_id, "cargo demand registered");
        Ok(demand)
    }

    /// Publishes a rental offer for a drone the caller owns.
    pub async fn register_offer(&self, req: NewOffer) -> Result<RentalOffer, AppError> {
        let drone = self
            .drones
            .get(req.drone_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("drone {} not found", req.drone_id)))?;
        if drone.owner_id != req.owner_id {
            return Err(AppError::Forbidden(format!(
                "user {} does not own drone {}",
                req.owner_id, drone.id
            )));
        }
        if req.price <= 0 {
            return Err(AppError::BadRequest("price must be > 0".to_string()));
        }

        let location = req.location.unwrap_or(drone.location);
        if !location.is_valid() {
            return Err(AppError::BadRequest("location is out of range".to_string()));
        }

        let offer = RentalOffer {
            id: Uuid::new_v4(),
            drone_id: drone.id,
            owner_id: drone.owner_id,
            title: req.title,
            service_type: req.service_type,
            location,
            service_radius_km: req.service_radius_km,
            price_type: req.price_type,
            price: req.price,
            status: OfferStatus::Active,
            created_at: Utc::now(),
        };
        let offer = self.demands.insert_offer(offer).await?;
        info!(offer_id = %offer.id, drone_id = %offer.drone_id, "rental offer registered");
        Ok(offer)
    }

    /// Ranks nearby offers and raw drones against a rental demand and
    /// replaces the demand's previous recommendations with the top results.
    pub async fn match_rental_demand(
        &self,
        demand_id: Uuid,
        radius_km: f64,
    ) -> Result<Vec<MatchingRecord>, AppError> {
        let start = Instant::now();
        let result = self.match_rental_inner(demand_id, radius_km).await;
        self.finish_run(DemandKind::RentalDemand, demand_id, start, &result);
        result
    }

    /// Ranks nearby drones against a cargo demand's pickup point.
    pub async fn match_cargo_demand(
        &self,
        demand_id: Uuid,
        radius_km: f64,
    ) -> Result<Vec<MatchingRecord>, AppError> {
        let start = Instant::now();
        let result = self.match_cargo_inner(demand_id, radius_km).await;
        self.finish_run(DemandKind::CargoDemand, demand_id, start, &result);
        result
    }

    pub async fn get_matches(
        &self,
        demand_id: Uuid,
        demand_type: DemandKind,
    ) -> Result<Vec<MatchingRecord>, AppError> {
        Ok(self.matches.get_by_demand(demand_id, demand_type).await?)
    }

    pub async fn update_match_status(
        &self,
        match_id: Uuid,
        status: MatchStatus,
    ) -> Result<MatchingRecord, AppError> {
        let record = self.matches.update_status(match_id, status).await?;
        info!(match_id = %match_id, status = ?record.status, "matching record updated");
        Ok(record)
    }

    async fn match_rental_inner(
        &self,
        demand_id: Uuid,
        radius_km: f64,
    ) -> Result<Vec<MatchingRecord>, AppError> {
        let demand = self
            .demands
            .get_rental_demand(demand_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rental demand {demand_id} not found")))?;
        let radius_km = effective_radius(radius_km);

        let offers = self
            .demands
            .find_available_offers(demand.location, radius_km)
            .await?;
        let drones = self
            .demands
            .find_available_drones(demand.location, radius_km)
            .await?;

        let mut candidates = Vec::with_capacity(offers.len() + drones.len());
        for candidate in &offers {
            if !candidate.offer.location.is_valid() {
                warn!(offer_id = %candidate.offer.id, "skipping offer with invalid location");
                continue;
            }
            let (score, reason) = score_offer(&demand, candidate);
            candidates.push((candidate.offer.id, SupplyKind::RentalOffer, score, reason));
        }
        for drone in &drones {
            if !drone.location.is_valid() {
                warn!(drone_id = %drone.id, "skipping drone with invalid location");
                continue;
            }
            let (score, reason) = score_drone_for_rental(&demand, drone);
            candidates.push((drone.id, SupplyKind::Drone, score, reason));
        }

        let records = rank(demand_id, DemandKind::RentalDemand, candidates);
        let stored = self
            .matches
            .replace_for_demand(demand_id, DemandKind::RentalDemand, records)
            .await?;

        if !stored.is_empty() {
            self.notifier.notify(
                demand.renter_id,
                NotificationEvent::NewMatches {
                    demand_id,
                    demand_type: DemandKind::RentalDemand,
                    count: stored.len(),
                },
            );
        }
        Ok(stored)
    }

    async fn match_cargo_inner(
        &self,
        demand_id: Uuid,
        radius_km: f64,
    ) -> Result<Vec<MatchingRecord>, AppError> {
        let cargo = self
            .demands
            .get_cargo_demand(demand_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("cargo demand {demand_id} not found")))?;
        let radius_km = effective_radius(radius_km);

        let drones = self
            .demands
            .find_available_drones(cargo.pickup, radius_km)
            .await?;

        let candidates = drones
            .iter()
            .filter(|drone| {
                let valid = drone.location.is_valid();
                if !valid {
                    warn!(drone_id = %drone.id, "skipping drone with invalid location");
                }
                valid
            })
            .map(|drone| {
                let (score, reason) = score_drone_for_cargo(&cargo, drone);
                (drone.id, SupplyKind::Drone, score, reason)
            })
            .collect();

        let records = rank(demand_id, DemandKind::CargoDemand, candidates);
        let stored = self
            .matches
            .replace_for_demand(demand_id, DemandKind::CargoDemand, records)
            .await?;

        if !stored.is_empty() {
            self.notifier.notify(
                cargo.publisher_id,
                NotificationEvent::NewMatches {
                    demand_id,
                    demand_type: DemandKind::CargoDemand,
                    count: stored.len(),
                },
            );
        }
        Ok(stored)
    }

    fn finish_run(
        &self,
        demand_type: DemandKind,
        demand_id: Uuid,
        start: Instant,
        result: &Result<Vec<MatchingRecord>, AppError>,
    ) {
        self.metrics
            .matching_latency_seconds
            .with_label_values(&[demand_type.as_str()])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(records) => {
                self.metrics
                    .matching_runs_total
                    .with_label_values(&[demand_type.as_str(), "success"])
                    .inc();
                info!(
                    demand_id = %demand_id,
                    demand_type = demand_type.as_str(),
                    matches = records.len(),
                    top_score = records.first().map(|r| r.match_score).unwrap_or(0),
                    "matching run finished"
                );
            }
            Err(err) => {
                self.metrics
                    .matching_runs_total
                    .with_label_values(&[demand_type.as_str(), "error"])
                    .inc();
                warn!(
                    demand_id = %demand_id,
                    demand_type = demand_type.as_str(),
                    error = %err,
                    "matching run failed"
                );
            }
        }
    }
}

fn effective_radius(radius_km: f64) -> f64 {
    if radius_km.is_finite() && radius_km > 0.0 {
        radius_km
    } else {
        DEFAULT_RADIUS_KM
    }
}

/// Drops weak candidates, then keeps the best ten. The sort is stable, so equal
/// scores keep the order the candidates were gathered in.
fn rank(
    demand_id: Uuid,
    demand_type: DemandKind,
    candidates: Vec<(Uuid, SupplyKind, u8, MatchReason)>,
) -> Vec<MatchingRecord> {
    let now = Utc::now();

    let mut records: Vec<MatchingRecord> = candidates
        .into_iter()
        .filter(|(_, _, score, _)| *score >= MIN_MATCH_SCORE)
        .map(|(supply_id, supply_type, score, reason)| MatchingRecord {
            id: Uuid::new_v4(),
            demand_id,
            demand_type,
            supply_id,
            supply_type,
            match_score: score,
            match_reason: reason,
            status: MatchStatus::Recommended,
            created_at: now,
            updated_at: now,
        })
        .collect();

    records.sort_by(|a, b| b.match_score.cmp(&a.match_score));
    records.truncate(MAX_MATCHES);
    records
}
