use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drone::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Rental,
    Cargo,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Accepted,
    Paid,
    InProgress,
    Completed,
    Rejected,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ACTIVE: [OrderStatus; 3] = [
        OrderStatus::Accepted,
        OrderStatus::Paid,
        OrderStatus::InProgress,
    ];

    /// Orders in these statuses hold their drone.
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Rejected
                | OrderStatus::Cancelled
                | OrderStatus::Refunded
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        matches!(
            (self, next),
            (Created, Accepted)
                | (Created, Rejected)
                | (Created, Cancelled)
                | (Accepted, Paid)
                | (Accepted, Cancelled)
                | (Paid, InProgress)
                | (Paid, Cancelled)
                | (Paid, Refunded)
                | (InProgress, Completed)
                | (Completed, Refunded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Paid => "paid",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::Completed => "completed",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Renter,
    Owner,
    System,
    Admin,
}

impl OperatorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatorRole::Renter => "renter",
            OperatorRole::Owner => "owner",
            OperatorRole::System => "system",
            OperatorRole::Admin => "admin",
        }
    }
}

/// Which side of an order a user is listed on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Owner,
    Renter,
}

/// Platform commission as a whole percentage in `0..=100`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub struct CommissionRate(u8);

impl CommissionRate {
    pub const DEFAULT: CommissionRate = CommissionRate(10);

    pub fn new(percent: u8) -> Option<Self> {
        (percent <= 100).then_some(Self(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Splits `total` into `(platform_commission, owner_amount)`.
    /// The commission is taken first and floored; the owner amount is whatever remains.
    pub fn split(self, total: i64) -> (i64, i64) {
        let commission = (i128::from(total) * i128::from(self.0)).div_euclid(100) as i64;
        (commission, total - commission)
    }
}

impl TryFrom<u8> for CommissionRate {
    type Error = String;

    fn try_from(percent: u8) -> Result<Self, Self::Error> {
        Self::new(percent).ok_or_else(|| format!("commission rate {percent} is outside 0..=100"))
    }
}

impl From<CommissionRate> for u8 {
    fn from(rate: CommissionRate) -> Self {
        rate.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub order_type: OrderType,
    pub related_id: Option<Uuid>,
    pub drone_id: Uuid,
    pub owner_id: Uuid,
    pub renter_id: Uuid,
    pub title: String,
    pub service_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: GeoPoint,
    pub address: String,
    pub total_amount: i64,
    pub platform_commission_rate: CommissionRate,
    pub platform_commission: i64,
    pub owner_amount: i64,
    pub deposit_amount: i64,
    pub status: OrderStatus,
    pub cancel_reason: Option<String>,
    pub cancel_by: Option<OperatorRole>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// What the renter is billed: order amount plus the drone deposit.
    pub fn amount_due(&self) -> Option<i64> {
        self.total_amount.checked_add(self.deposit_amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTimeline {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub note: String,
    pub operator_id: Uuid,
    pub operator_role: OperatorRole,
    pub created_at: DateTime<Utc>,
}

impl OrderTimeline {
    pub fn new(
        order_id: Uuid,
        status: OrderStatus,
        note: impl Into<String>,
        operator_id: Uuid,
        operator_role: OperatorRole,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status,
            note: note.into(),
            operator_id,
            operator_role,
            created_at: Utc::now(),
        }
    }
}

/// Explicit admin listing filter; unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub order_type: Option<OrderType>,
    pub drone_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub renter_id: Option<Uuid>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self.order_type.is_none_or(|kind| order.order_type == kind)
            && self.drone_id.is_none_or(|id| order.drone_id == id)
            && self.owner_id.is_none_or(|id| order.owner_id == id)
            && self.renter_id.is_none_or(|id| order.renter_id == id)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "Page::default_page")]
    pub page: usize,
    #[serde(default = "Page::default_page_size")]
    pub page_size: usize,
}

impl Page {
    pub const MAX_PAGE_SIZE: usize = 100;

    fn default_page() -> usize {
        1
    }

    fn default_page_size() -> usize {
        20
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1) * self.limit()
    }

    pub fn limit(&self) -> usize {
        self.page_size.clamp(1, Self::MAX_PAGE_SIZE)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: Self::default_page(),
            page_size: Self::default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderList {
    pub orders: Vec<Order>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
