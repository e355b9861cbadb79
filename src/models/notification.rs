use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::matching::DemandKind;
use crate::models::order::OrderStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    OrderStatusChanged {
        order_id: Uuid,
        order_no: String,
        status: OrderStatus,
    },
    NewMatches {
        demand_id: Uuid,
        demand_type: DemandKind,
        count: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub event: NotificationEvent,
    pub created_at: DateTime<Utc>,
}
