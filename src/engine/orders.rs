//! Order lifecycle.
//!
//! ```text
//! created -> accepted -> paid -> in_progress -> completed
//!    |          |          |                        |
//!    |          +----------+--> cancelled           +--> refunded
//!    +--> rejected / cancelled      paid --> refunded
//! ```
//!
//! Every transition runs under the drone's lock: re-read the order, validate,
//! compare-and-swap the status with its timeline entry, then settle the drone.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::availability::AvailabilityTracker;
use crate::engine::notify::Notifier;
use crate::error::{AppError, StoreError};
use crate::models::drone::{AvailabilityStatus, GeoPoint};
use crate::models::matching::MatchStatus;
use crate::models::notification::NotificationEvent;
use crate::models::order::{
    CommissionRate, OperatorRole, Order, OrderFilter, OrderList, OrderStatus, OrderTimeline,
    OrderType, Page, Party,
};
use crate::observability::metrics::Metrics;
use crate::repository::{DemandRepository, DroneRepository, MatchingRepository, OrderRepository};

const FULL_REFUND_NOTICE_HOURS: i64 = 24;
const PARTIAL_REFUND_PERCENT: i64 = 70;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Operator {
    pub id: Uuid,
    pub role: OperatorRole,
}

impl Operator {
    pub fn new(id: Uuid, role: OperatorRole) -> Self {
        Self { id, role }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    /// The user placing the order.
    pub caller_id: Uuid,
    pub order_type: OrderType,
    pub related_id: Option<Uuid>,
    pub drone_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub service_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: GeoPoint,
    #[serde(default)]
    pub address: String,
    pub total_amount: i64,
    #[serde(default)]
    pub auto_accept: bool,
    pub match_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicy {
    Full,
    Partial,
}

impl RefundPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RefundPolicy::Full => "full",
            RefundPolicy::Partial => "partial",
        }
    }
}

/// Money the payment collaborator should return after a cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundInstruction {
    pub order_id: Uuid,
    pub order_no: String,
    pub amount: i64,
    pub policy: RefundPolicy,
    pub hours_until_start: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Cancellation {
    pub order: Order,
    pub refund: Option<RefundInstruction>,
}

/// Drone side effect applied after the status has been written.
#[derive(Debug, Clone, Copy)]
enum DroneEffect {
    None,
    MarkRented,
    Settle,
}

pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    drones: Arc<dyn DroneRepository>,
    demands: Arc<dyn DemandRepository>,
    matches: Arc<dyn MatchingRepository>,
    tracker: Arc<AvailabilityTracker>,
    notifier: Arc<dyn Notifier>,
    metrics: Metrics,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        drones: Arc<dyn DroneRepository>,
        demands: Arc<dyn DemandRepository>,
        matches: Arc<dyn MatchingRepository>,
        tracker: Arc<AvailabilityTracker>,
        notifier: Arc<dyn Notifier>,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            drones,
            demands,
            matches,
            tracker,
            notifier,
            metrics,
        }
    }

    /// Creates an order against an available drone. `rate` is frozen onto the order.
    pub async fn create_order(
        &self,
        req: CreateOrderRequest,
        rate: CommissionRate,
    ) -> Result<Order, AppError> {
        let match_id = req.match_id;
        let result = self.create_order_locked(req, rate).await;
        self.metrics.record_transition("create", result.is_ok());
        let order = result?;

        if let Some(match_id) = match_id {
            self.mark_match_ordered(match_id).await;
        }
        self.notify_parties(&order);

        Ok(order)
    }

    pub async fn accept_order(&self, order_id: Uuid, owner_id: Uuid) -> Result<Order, AppError> {
        let (order, ()) = self
            .run_transition(
                order_id,
                "accept",
                OrderStatus::Accepted,
                Operator::new(owner_id, OperatorRole::Owner),
                Access::OwnerOnly,
                DroneEffect::MarkRented,
                |_| Ok(("order accepted".to_string(), ())),
            )
            .await?;
        Ok(order)
    }

    pub async fn reject_order(
        &self,
        order_id: Uuid,
        owner_id: Uuid,
        reason: &str,
    ) -> Result<Order, AppError> {
        let (order, ()) = self
            .run_transition(
                order_id,
                "reject",
                OrderStatus::Rejected,
                Operator::new(owner_id, OperatorRole::Owner),
                Access::OwnerOnly,
                DroneEffect::None,
                |order| {
                    order.cancel_reason = Some(reason.to_string());
                    order.cancel_by = Some(OperatorRole::Owner);
                    Ok((format!("order rejected: {reason}"), ()))
                },
            )
            .await?;
        Ok(order)
    }

    /// Cancels from `created`, `accepted` or `paid`. A paid order yields a refund
    /// instruction for the payment collaborator; it is not executed here.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        operator: Operator,
        reason: &str,
    ) -> Result<Cancellation, AppError> {
        let (order, refund) = self
            .run_transition(
                order_id,
                "cancel",
                OrderStatus::Cancelled,
                operator,
                Access::Party,
                DroneEffect::Settle,
                |order| {
                    let refund = if order.status == OrderStatus::Paid {
                        Some(refund_for(order, Utc::now())?)
                    } else {
                        None
                    };
                    order.cancel_reason = Some(reason.to_string());
                    order.cancel_by = Some(operator.role);
                    Ok((format!("order cancelled: {reason}"), refund))
                },
            )
            .await?;

        if let Some(instruction) = &refund {
            self.metrics
                .refund_instructions_total
                .with_label_values(&[instruction.policy.as_str()])
                .inc();
            info!(
                order_id = %instruction.order_id,
                refund_amount = instruction.amount,
                policy = instruction.policy.as_str(),
                hours_until_start = instruction.hours_until_start,
                "refund instruction issued"
            );
        }

        Ok(Cancellation { order, refund })
    }

    pub async fn start_order(&self, order_id: Uuid, owner_id: Uuid) -> Result<Order, AppError> {
        let (order, ()) = self
            .run_transition(
                order_id,
                "start",
                OrderStatus::InProgress,
                Operator::new(owner_id, OperatorRole::Owner),
                Access::OwnerOnly,
                DroneEffect::MarkRented,
                |_| Ok(("service started".to_string(), ())),
            )
            .await?;
        Ok(order)
    }

    pub async fn complete_order(&self, order_id: Uuid, operator: Operator) -> Result<Order, AppError> {
        let (order, ()) = self
            .run_transition(
                order_id,
                "complete",
                OrderStatus::Completed,
                operator,
                Access::Party,
                DroneEffect::Settle,
                |_| Ok(("order completed".to_string(), ())),
            )
            .await?;
        Ok(order)
    }

    /// Payment confirmation callback: `accepted -> paid`.
    pub async fn mark_paid(&self, order_id: Uuid, payer_id: Uuid) -> Result<Order, AppError> {
        let (order, ()) = self
            .run_transition(
                order_id,
                "mark_paid",
                OrderStatus::Paid,
                Operator::new(payer_id, OperatorRole::System),
                Access::Party,
                DroneEffect::Settle,
                |_| Ok(("payment confirmed".to_string(), ())),
            )
            .await?;
        Ok(order)
    }

    /// `paid | completed -> refunded`. Money movement is left to the caller.
    pub async fn refund_order(&self, order_id: Uuid, operator: Operator) -> Result<Order, AppError> {
        let (order, ()) = self
            .run_transition(
                order_id,
                "refund",
                OrderStatus::Refunded,
                operator,
                Access::Party,
                DroneEffect::Settle,
                |_| Ok(("order refunded".to_string(), ())),
            )
            .await?;
        Ok(order)
    }

    /// Soft-deletes a finished order. It stays readable by id, with its timeline.
    pub async fn archive_order(&self, order_id: Uuid, admin: Operator) -> Result<Order, AppError> {
        if admin.role != OperatorRole::Admin {
            return Err(AppError::Forbidden(
                "only admins can archive orders".to_string(),
            ));
        }

        let mut order = self.load(order_id).await?;
        if !order.status.is_terminal() {
            return Err(AppError::InvalidState {
                order_id,
                current: order.status,
                action: "archive",
            });
        }
        if order.deleted_at.is_some() {
            return Ok(order);
        }

        order.deleted_at = Some(Utc::now());
        let order = self.orders.update(order).await?;
        info!(order_id = %order_id, admin_id = %admin.id, "order archived");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.load(order_id).await
    }

    pub async fn get_order_by_no(&self, order_no: &str) -> Result<Order, AppError> {
        self.orders
            .get_by_order_no(order_no)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_no} not found")))
    }

    pub async fn list_orders(
        &self,
        user_id: Uuid,
        party: Party,
        status: Option<OrderStatus>,
        page: Page,
    ) -> Result<OrderList, AppError> {
        let (orders, total) = self.orders.list_by_user(user_id, party, status, page).await?;
        Ok(OrderList {
            orders,
            total,
            page: page.page.max(1),
            page_size: page.limit(),
        })
    }

    pub async fn admin_list_orders(
        &self,
        filter: &OrderFilter,
        page: Page,
    ) -> Result<OrderList, AppError> {
        let (orders, total) = self.orders.list(filter, page).await?;
        Ok(OrderList {
            orders,
            total,
            page: page.page.max(1),
            page_size: page.limit(),
        })
    }

    pub async fn timeline(&self, order_id: Uuid) -> Result<Vec<OrderTimeline>, AppError> {
        self.load(order_id).await?;
        Ok(self.orders.timeline(order_id).await?)
    }

    pub async fn statistics(&self) -> Result<BTreeMap<OrderStatus, usize>, AppError> {
        Ok(self.orders.statistics().await?)
    }

    pub async fn count_by_status(&self, status: OrderStatus) -> Result<usize, AppError> {
        Ok(self.orders.count_by_status(status).await?)
    }

    async fn create_order_locked(
        &self,
        req: CreateOrderRequest,
        rate: CommissionRate,
    ) -> Result<Order, AppError> {
        validate_create(&req)?;

        let _guard = self.tracker.locks().lock(req.drone_id).await;

        let drone = self
            .drones
            .get(req.drone_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("drone {} not found", req.drone_id)))?;
        if drone.availability_status != AvailabilityStatus::Available {
            return Err(AppError::PolicyViolation(format!(
                "drone {} is not available",
                drone.id
            )));
        }
        if req.total_amount.checked_add(drone.deposit).is_none() {
            return Err(AppError::BadRequest(
                "total_amount plus the drone deposit is out of range".to_string(),
            ));
        }

        // The cargo publisher pays for cargo orders, whoever places them.
        let renter_id = match (req.order_type, req.related_id) {
            (OrderType::Cargo, Some(cargo_id)) => {
                self.demands
                    .get_cargo_demand(cargo_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("cargo demand {cargo_id} not found")))?
                    .publisher_id
            }
            _ => req.caller_id,
        };

        if req.auto_accept {
            if req.order_type != OrderType::Cargo {
                return Err(AppError::BadRequest(
                    "auto_accept is only available for cargo orders".to_string(),
                ));
            }
            if req.caller_id != drone.owner_id {
                return Err(AppError::Forbidden(
                    "only the drone owner can auto-accept an order".to_string(),
                ));
            }
        }

        let (platform_commission, owner_amount) = rate.split(req.total_amount);
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let mut order = Order {
            id: order_id,
            order_no: generate_order_no(now),
            order_type: req.order_type,
            related_id: req.related_id,
            drone_id: drone.id,
            owner_id: drone.owner_id,
            renter_id,
            title: req.title,
            service_type: req.service_type,
            start_time: req.start_time,
            end_time: req.end_time,
            location: req.location,
            address: req.address,
            total_amount: req.total_amount,
            platform_commission_rate: rate,
            platform_commission,
            owner_amount,
            deposit_amount: drone.deposit,
            status: OrderStatus::Created,
            cancel_reason: None,
            cancel_by: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut entries = vec![OrderTimeline::new(
            order_id,
            OrderStatus::Created,
            "order created",
            renter_id,
            OperatorRole::Renter,
        )];
        if req.auto_accept {
            order.status = OrderStatus::Accepted;
            entries.push(OrderTimeline::new(
                order_id,
                OrderStatus::Accepted,
                "order accepted by drone owner",
                drone.owner_id,
                OperatorRole::Owner,
            ));
        }

        let order = self.orders.create(order, entries).await?;
        if order.status == OrderStatus::Accepted {
            self.tracker.mark_rented(drone.id).await?;
        }

        info!(
            order_id = %order.id,
            order_no = %order.order_no,
            drone_id = %order.drone_id,
            total_amount = order.total_amount,
            commission_rate = order.platform_commission_rate.percent(),
            status = %order.status,
            "order created"
        );
        Ok(order)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_transition<T, F>(
        &self,
        order_id: Uuid,
        action: &'static str,
        target: OrderStatus,
        operator: Operator,
        access: Access,
        effect: DroneEffect,
        apply: F,
    ) -> Result<(Order, T), AppError>
    where
        F: FnOnce(&mut Order) -> Result<(String, T), AppError>,
    {
        let result = self
            .transition_locked(order_id, action, target, operator, access, effect, apply)
            .await;
        self.metrics.record_transition(action, result.is_ok());

        match &result {
            Ok((order, _)) => self.notify_parties(order),
            Err(err) => warn!(
                order_id = %order_id,
                action,
                operator_id = %operator.id,
                kind = err.kind(),
                error = %err,
                "order transition rejected"
            ),
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn transition_locked<T, F>(
        &self,
        order_id: Uuid,
        action: &'static str,
        target: OrderStatus,
        operator: Operator,
        access: Access,
        effect: DroneEffect,
        apply: F,
    ) -> Result<(Order, T), AppError>
    where
        F: FnOnce(&mut Order) -> Result<(String, T), AppError>,
    {
        let drone_id = self.load(order_id).await?.drone_id;
        let _guard = self.tracker.locks().lock(drone_id).await;

        let current = self.load(order_id).await?;
        access.check(&current, operator)?;

        let expected = current.status;
        if !expected.can_transition_to(target) {
            return Err(AppError::InvalidState {
                order_id,
                current: expected,
                action,
            });
        }

        let mut updated = current;
        let (note, extra) = apply(&mut updated)?;
        updated.status = target;
        updated.updated_at = Utc::now();

        let entry = OrderTimeline::new(order_id, target, note, operator.id, operator.role);
        let order = self.orders.transition(updated, expected, entry).await?;

        match effect {
            DroneEffect::None => {}
            DroneEffect::MarkRented => self.tracker.mark_rented(drone_id).await?,
            DroneEffect::Settle => {
                let exclude = (!target.is_active()).then_some(order_id);
                self.tracker.settle(drone_id, exclude).await?;
            }
        }

        info!(
            order_id = %order_id,
            from = %expected,
            to = %target,
            operator_id = %operator.id,
            role = operator.role.as_str(),
            "order transitioned"
        );
        Ok((order, extra))
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
    }

    async fn mark_match_ordered(&self, match_id: Uuid) {
        match self.matches.update_status(match_id, MatchStatus::Ordered).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                warn!(match_id = %match_id, "order referenced unknown matching record");
            }
            Err(err) => {
                warn!(match_id = %match_id, error = %err, "failed to mark matching record ordered");
            }
        }
    }

    fn notify_parties(&self, order: &Order) {
        let event = NotificationEvent::OrderStatusChanged {
            order_id: order.id,
            order_no: order.order_no.clone(),
            status: order.status,
        };

        self.notifier.notify(order.owner_id, event.clone());
        if order.renter_id != order.owner_id {
            self.notifier.notify(order.renter_id, event);
        }
    }
}

/// Who may drive a transition.
#[derive(Debug, Clone, Copy)]
enum Access {
    /// Only the drone owner named on the order.
    OwnerOnly,
    /// Owners and renters act on their own orders; admin and system act on any.
    Party,
}

impl Access {
    fn check(self, order: &Order, operator: Operator) -> Result<(), AppError> {
        let allowed = match (self, operator.role) {
            (Access::OwnerOnly, _) => order.owner_id == operator.id,
            (Access::Party, OperatorRole::Owner) => order.owner_id == operator.id,
            (Access::Party, OperatorRole::Renter) => order.renter_id == operator.id,
            (Access::Party, OperatorRole::Admin | OperatorRole::System) => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "user {} is not the {} of order {}",
                operator.id,
                operator.role.as_str(),
                order.id
            )))
        }
    }
}

/// Tiered refund for cancelling a paid order: everything back with more than a
/// day's notice, 70% of the order amount plus the deposit inside a day, and no
/// cancellation at all once the start time has passed.
fn refund_for(order: &Order, now: DateTime<Utc>) -> Result<RefundInstruction, AppError> {
    let until_start = order.start_time - now;
    let hours_until_start = until_start.num_seconds() as f64 / 3600.0;

    let (amount, policy) = if until_start > Duration::hours(FULL_REFUND_NOTICE_HOURS) {
        (order.amount_due(), RefundPolicy::Full)
    } else if until_start > Duration::zero() {
        let partial =
            (i128::from(order.total_amount) * i128::from(PARTIAL_REFUND_PERCENT)).div_euclid(100) as i64;
        (partial.checked_add(order.deposit_amount), RefundPolicy::Partial)
    } else {
        return Err(AppError::PolicyViolation(format!(
            "order {} started {:.1} hours ago and can no longer be cancelled",
            order.id, -hours_until_start
        )));
    };

    let amount = amount.ok_or_else(|| {
        AppError::BadRequest(format!("refund amount for order {} is out of range", order.id))
    })?;

    Ok(RefundInstruction {
        order_id: order.id,
        order_no: order.order_no.clone(),
        amount,
        policy,
        hours_until_start,
    })
}

fn validate_create(req: &CreateOrderRequest) -> Result<(), AppError> {
    if req.total_amount <= 0 {
        return Err(AppError::BadRequest("total_amount must be > 0".to_string()));
    }
    if req.end_time <= req.start_time {
        return Err(AppError::BadRequest(
            "end_time must be after start_time".to_string(),
        ));
    }
    if !req.location.is_valid() {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }
    Ok(())
}

fn generate_order_no(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("DM{}{}", now.format("%Y%m%d%H%M%S"), &suffix[..6])
}
