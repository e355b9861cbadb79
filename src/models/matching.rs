use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DemandKind {
    RentalDemand,
    CargoDemand,
}

impl DemandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DemandKind::RentalDemand => "rental_demand",
            DemandKind::CargoDemand => "cargo_demand",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SupplyKind {
    RentalOffer,
    Drone,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Recommended,
    Viewed,
    Contacted,
    Ordered,
    Expired,
}

impl MatchStatus {
    fn rank(self) -> u8 {
        match self {
            MatchStatus::Recommended => 0,
            MatchStatus::Viewed => 1,
            MatchStatus::Contacted => 2,
            MatchStatus::Ordered => 3,
            MatchStatus::Expired => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Ordered | MatchStatus::Expired)
    }

    /// Records only move forward; re-applying the current status is a no-op.
    pub fn can_move_to(self, next: MatchStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next == MatchStatus::Expired || next.rank() > self.rank()
    }
}

/// Per-factor breakdown of a match score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReason {
    pub distance_km: f64,
    pub dist_score: u8,
    pub price_score: u8,
    pub load_score: u8,
    pub range_score: u8,
    pub rating_score: u8,
}

impl MatchReason {
    pub fn total(&self) -> u8 {
        let sum = u16::from(self.dist_score)
            + u16::from(self.price_score)
            + u16::from(self.load_score)
            + u16::from(self.range_score)
            + u16::from(self.rating_score);
        sum.min(100) as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingRecord {
    pub id: Uuid,
    pub demand_id: Uuid,
    pub demand_type: DemandKind,
    pub supply_id: Uuid,
    pub supply_type: SupplyKind,
    pub match_score: u8,
    pub match_reason: MatchReason,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::MatchStatus;

    #[test]
    fn status_moves_forward_only() {
        assert!(MatchStatus::Recommended.can_move_to(MatchStatus::Viewed));
        assert!(MatchStatus::Viewed.can_move_to(MatchStatus::Ordered));
        assert!(MatchStatus::Contacted.can_move_to(MatchStatus::Expired));
        assert!(!MatchStatus::Contacted.can_move_to(MatchStatus::Viewed));
        assert!(!MatchStatus::Ordered.can_move_to(MatchStatus::Expired));
        assert!(!MatchStatus::Expired.can_move_to(MatchStatus::Recommended));
    }
}
