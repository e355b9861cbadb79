use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Rented,
    Maintenance,
    Offline,
}

impl AvailabilityStatus {
    /// Statuses set by the owner by hand. The availability tracker leaves these alone.
    pub fn is_manual(self) -> bool {
        matches!(self, AvailabilityStatus::Maintenance | AvailabilityStatus::Offline)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drone {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub brand: String,
    pub model: String,
    pub location: GeoPoint,
    /// Kilograms.
    pub max_load: f64,
    /// Kilometers.
    pub max_distance: f64,
    pub daily_price: i64,
    pub hourly_price: i64,
    pub deposit: i64,
    pub certification_status: CertificationStatus,
    pub availability_status: AvailabilityStatus,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
