use crate::geo::haversine_km;
use crate::models::demand::{CargoDemand, OfferCandidate, RentalDemand};
use crate::models::drone::Drone;
use crate::models::matching::MatchReason;

/// Distance at which every distance factor reaches zero, whatever the search radius.
const DISTANCE_NORMALIZATION_KM: f64 = 50.0;

const RENTAL_DISTANCE_MAX: f64 = 30.0;
const CARGO_DISTANCE_MAX: f64 = 40.0;
const PRICE_PROXIMITY_MAX: f64 = 20.0;
const PRICE_WITHIN_BUDGET: u8 = 20;
const RENTAL_LOAD: u8 = 10;
const CARGO_LOAD_FULL: u8 = 30;
const CARGO_LOAD_PARTIAL: u8 = 15;
const CARGO_LOAD_PARTIAL_RATIO: f64 = 0.8;
const CARGO_RANGE: u8 = 20;
const RATING_MAX: u8 = 5;

pub fn score_offer(demand: &RentalDemand, candidate: &OfferCandidate) -> (u8, MatchReason) {
    let distance_km = haversine_km(&demand.location, &candidate.offer.location);

    let breakdown = MatchReason {
        distance_km,
        dist_score: distance_score(distance_km, RENTAL_DISTANCE_MAX),
        price_score: price_proximity_score(
            candidate.offer.price,
            demand.budget_min,
            demand.budget_max,
        ),
        rating_score: candidate
            .drone
            .as_ref()
            .map(|drone| rating_score(drone.rating))
            .unwrap_or(0),
        ..MatchReason::default()
    };

    (breakdown.total(), breakdown)
}

pub fn score_drone_for_rental(demand: &RentalDemand, drone: &Drone) -> (u8, MatchReason) {
    let distance_km = haversine_km(&demand.location, &drone.location);

    let load_score = match demand.required_load {
        Some(required) if drone.max_load >= required => RENTAL_LOAD,
        _ => 0,
    };

    let price_score = match demand.budget_max {
        Some(budget_max) if drone.daily_price <= budget_max => PRICE_WITHIN_BUDGET,
        _ => 0,
    };

    let breakdown = MatchReason {
        distance_km,
        dist_score: distance_score(distance_km, RENTAL_DISTANCE_MAX),
        price_score,
        load_score,
        rating_score: rating_score(drone.rating),
        ..MatchReason::default()
    };

    (breakdown.total(), breakdown)
}

pub fn score_drone_for_cargo(cargo: &CargoDemand, drone: &Drone) -> (u8, MatchReason) {
    let distance_km = haversine_km(&cargo.pickup, &drone.location);

    let load_score = if drone.max_load >= cargo.cargo_weight {
        CARGO_LOAD_FULL
    } else if drone.max_load >= cargo.cargo_weight * CARGO_LOAD_PARTIAL_RATIO {
        CARGO_LOAD_PARTIAL
    } else {
        0
    };

    let trip_km = haversine_km(&cargo.pickup, &cargo.delivery);
    let range_score = if drone.max_distance >= trip_km {
        CARGO_RANGE
    } else {
        0
    };

    let breakdown = MatchReason {
        distance_km,
        dist_score: distance_score(distance_km, CARGO_DISTANCE_MAX),
        load_score,
        range_score,
        rating_score: rating_score(drone.rating),
        ..MatchReason::default()
    };

    (breakdown.total(), breakdown)
}

/// `factor_max * max(0, 1 - d/50)`, truncated.
fn distance_score(distance_km: f64, factor_max: f64) -> u8 {
    if !distance_km.is_finite() {
        return 0;
    }
    let decay = (1.0 - distance_km.max(0.0) / DISTANCE_NORMALIZATION_KM).max(0.0);
    (factor_max * decay).clamp(0.0, factor_max) as u8
}

/// Full credit at the budget midpoint, decaying linearly to zero at either edge.
fn price_proximity_score(price: i64, budget_min: Option<i64>, budget_max: Option<i64>) -> u8 {
    let Some(budget_max) = budget_max.filter(|max| *max > 0) else {
        return 0;
    };
    let budget_min = budget_min.unwrap_or(0);

    if price < budget_min || price > budget_max {
        return 0;
    }

    // Widened so budgets near the i64 bounds cannot overflow.
    let (price, budget_min, budget_max) = (
        i128::from(price),
        i128::from(budget_min),
        i128::from(budget_max),
    );
    let mid = (budget_min + budget_max) / 2;
    let half_width = (budget_max - budget_min) as f64 / 2.0;
    if half_width <= 0.0 {
        return PRICE_PROXIMITY_MAX as u8;
    }

    let diff = (price - mid).abs() as f64;
    (PRICE_PROXIMITY_MAX * (1.0 - diff / half_width)).clamp(0.0, PRICE_PROXIMITY_MAX) as u8
}

fn rating_score(rating: f64) -> u8 {
    if !rating.is_finite() {
        return 0;
    }
    (rating.trunc().clamp(0.0, f64::from(RATING_MAX))) as u8
}
