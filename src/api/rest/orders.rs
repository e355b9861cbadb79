use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::orders::{Cancellation, CreateOrderRequest, Operator};
use crate::engine::settlement::RefundReport;
use crate::error::AppError;
use crate::models::order::{
    OperatorRole, Order, OrderFilter, OrderList, OrderStatus, OrderTimeline, OrderType, Page,
    Party,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/timeline", get(get_timeline))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/start", post(start_order))
        .route("/orders/:id/complete", post(complete_order))
        .route("/orders/:id/refund", post(refund_order))
        .route("/order-numbers/:order_no", get(get_order_by_no))
        .route("/admin/orders", get(admin_list_orders))
        .route("/admin/orders/statistics", get(statistics))
        .route("/admin/orders/:id/archive", post(archive_order))
}

#[derive(Deserialize)]
pub struct OwnerRequest {
    pub owner_id: Uuid,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub owner_id: Uuid,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
pub struct OperatorRequest {
    pub operator_id: Uuid,
    pub role: OperatorRole,
    #[serde(default)]
    pub reason: String,
}

impl OperatorRequest {
    fn operator(&self) -> Operator {
        Operator::new(self.operator_id, self.role)
    }
}

#[derive(Deserialize)]
pub struct ArchiveRequest {
    pub admin_id: Uuid,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub user_id: Uuid,
    pub party: Party,
    pub status: Option<OrderStatus>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Deserialize)]
pub struct AdminListQuery {
    pub status: Option<OrderStatus>,
    pub order_type: Option<OrderType>,
    pub drone_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub renter_id: Option<Uuid>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

fn page(page: Option<usize>, page_size: Option<usize>) -> Page {
    let default = Page::default();
    Page {
        page: page.unwrap_or(default.page),
        page_size: page_size.unwrap_or(default.page_size),
    }
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .create_order(payload, state.config.commission_rate)
        .await?;
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order(id).await?))
}

async fn get_order_by_no(
    State(state): State<Arc<AppState>>,
    Path(order_no): Path<String>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order_by_no(&order_no).await?))
}

async fn get_timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderTimeline>>, AppError> {
    Ok(Json(state.orders.timeline(id).await?))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<OrderList>, AppError> {
    let list = state
        .orders
        .list_orders(
            query.user_id,
            query.party,
            query.status,
            page(query.page, query.page_size),
        )
        .await?;
    Ok(Json(list))
}

async fn admin_list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<OrderList>, AppError> {
    let filter = OrderFilter {
        status: query.status,
        order_type: query.order_type,
        drone_id: query.drone_id,
        owner_id: query.owner_id,
        renter_id: query.renter_id,
    };
    let list = state
        .orders
        .admin_list_orders(&filter, page(query.page, query.page_size))
        .await?;
    Ok(Json(list))
}

async fn statistics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<OrderStatus, usize>>, AppError> {
    Ok(Json(state.orders.statistics().await?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OwnerRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.accept_order(id, payload.owner_id).await?))
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .reject_order(id, payload.owner_id, &payload.reason)
        .await?;
    Ok(Json(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OperatorRequest>,
) -> Result<Json<Cancellation>, AppError> {
    let cancellation = state
        .orders
        .cancel_order(id, payload.operator(), &payload.reason)
        .await?;

    if let Some(instruction) = cancellation.refund.clone() {
        let state = state.clone();
        tokio::spawn(async move {
            match state.payments.issue_refund(&instruction).await {
                Ok(receipt) => info!(
                    order_id = %instruction.order_id,
                    refund_no = %receipt.refund_no,
                    "cancellation refund settled"
                ),
                Err(err) => error!(
                    order_id = %instruction.order_id,
                    amount = instruction.amount,
                    error = %err,
                    "cancellation refund failed"
                ),
            }
        });
    }

    Ok(Json(cancellation))
}

async fn start_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OwnerRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.start_order(id, payload.owner_id).await?))
}

async fn complete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OperatorRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state.orders.complete_order(id, payload.operator()).await?,
    ))
}

async fn refund_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OperatorRequest>,
) -> Result<Json<RefundReport>, AppError> {
    Ok(Json(
        state.payments.refund_order(id, payload.operator()).await?,
    ))
}

async fn archive_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ArchiveRequest>,
) -> Result<Json<Order>, AppError> {
    let admin = Operator::new(payload.admin_id, OperatorRole::Admin);
    Ok(Json(state.orders.archive_order(id, admin).await?))
}
