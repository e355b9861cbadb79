use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drone::{Drone, GeoPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DemandStatus {
    Active,
    Matched,
    Closed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalDemand {
    pub id: Uuid,
    pub renter_id: Uuid,
    pub demand_type: String,
    pub title: String,
    pub location: GeoPoint,
    pub required_load: Option<f64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub budget_min: Option<i64>,
    pub budget_max: Option<i64>,
    pub status: DemandStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoDemand {
    pub id: Uuid,
    pub publisher_id: Uuid,
    pub cargo_type: String,
    /// Kilograms.
    pub cargo_weight: f64,
    pub pickup: GeoPoint,
    pub delivery: GeoPoint,
    pub pickup_time: DateTime<Utc>,
    pub offered_price: i64,
    pub status: DemandStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Active,
    Paused,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    Hourly,
    Daily,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalOffer {
    pub id: Uuid,
    pub drone_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub service_type: String,
    pub location: GeoPoint,
    pub service_radius_km: f64,
    pub price_type: PriceType,
    pub price: i64,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
}

/// An active offer together with the drone it packages, if that drone still exists.
#[derive(Debug, Clone)]
pub struct OfferCandidate {
    pub offer: RentalOffer,
    pub drone: Option<Drone>,
}
