//! Storage contracts consumed by the order, matching and payment engines.
//!
//! Every trait is object safe so engines hold `Arc<dyn ...>` handles. The
//! shipped backend is [`memory::MemoryStore`].

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::demand::{CargoDemand, OfferCandidate, RentalDemand, RentalOffer};
use crate::models::drone::{AvailabilityStatus, Drone, GeoPoint};
use crate::models::matching::{DemandKind, MatchStatus, MatchingRecord};
use crate::models::order::{Order, OrderFilter, OrderStatus, OrderTimeline, Page, Party};
use crate::models::payment::Payment;

#[async_trait]
pub trait DroneRepository: Send + Sync {
    async fn insert(&self, drone: Drone) -> Result<Drone, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Drone>, StoreError>;

    async fn set_availability(
        &self,
        id: Uuid,
        status: AvailabilityStatus,
    ) -> Result<Drone, StoreError>;

    async fn list(&self) -> Result<Vec<Drone>, StoreError>;
}

#[async_trait]
pub trait DemandRepository: Send + Sync {
    async fn insert_rental_demand(&self, demand: RentalDemand) -> Result<RentalDemand, StoreError>;

    async fn insert_cargo_demand(&self, demand: CargoDemand) -> Result<CargoDemand, StoreError>;

    async fn insert_offer(&self, offer: RentalOffer) -> Result<RentalOffer, StoreError>;

    async fn get_rental_demand(&self, id: Uuid) -> Result<Option<RentalDemand>, StoreError>;

    async fn get_cargo_demand(&self, id: Uuid) -> Result<Option<CargoDemand>, StoreError>;

    /// Active offers strictly within `radius_km` of `center`, oldest first.
    async fn find_available_offers(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<OfferCandidate>, StoreError>;

    /// Available, certified drones strictly within `radius_km` of `center`, oldest first.
    async fn find_available_drones(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Drone>, StoreError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order together with its opening timeline entries.
    async fn create(&self, order: Order, entries: Vec<OrderTimeline>) -> Result<Order, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn get_by_order_no(&self, order_no: &str) -> Result<Option<Order>, StoreError>;

    /// Replaces the order and appends `entry` only if the stored status is still `expected`.
    async fn transition(
        &self,
        updated: Order,
        expected: OrderStatus,
        entry: OrderTimeline,
    ) -> Result<Order, StoreError>;

    /// Overwrites non-status fields of an order.
    async fn update(&self, order: Order) -> Result<Order, StoreError>;

    async fn list_by_user(
        &self,
        user_id: Uuid,
        party: Party,
        status: Option<OrderStatus>,
        page: Page,
    ) -> Result<(Vec<Order>, usize), StoreError>;

    async fn list(&self, filter: &OrderFilter, page: Page) -> Result<(Vec<Order>, usize), StoreError>;

    async fn timeline(&self, order_id: Uuid) -> Result<Vec<OrderTimeline>, StoreError>;

    async fn count_by_status(&self, status: OrderStatus) -> Result<usize, StoreError>;

    async fn statistics(&self) -> Result<BTreeMap<OrderStatus, usize>, StoreError>;

    /// Whether any order on `drone_id` other than `exclude` is accepted, paid or in progress.
    async fn has_active_orders(
        &self,
        drone_id: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait MatchingRepository: Send + Sync {
    /// Drops every record of the demand and stores `records` in their place, as one step.
    async fn replace_for_demand(
        &self,
        demand_id: Uuid,
        demand_type: DemandKind,
        records: Vec<MatchingRecord>,
    ) -> Result<Vec<MatchingRecord>, StoreError>;

    async fn get_by_demand(
        &self,
        demand_id: Uuid,
        demand_type: DemandKind,
    ) -> Result<Vec<MatchingRecord>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<MatchingRecord>, StoreError>;

    /// Moves the record forward to `status`, checked against the stored status
    /// in the same step. Re-applying the current status is a no-op.
    async fn update_status(&self, id: Uuid, status: MatchStatus) -> Result<MatchingRecord, StoreError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<Payment, StoreError>;

    async fn get_by_payment_no(&self, payment_no: &str) -> Result<Option<Payment>, StoreError>;

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError>;

    async fn update(&self, payment: Payment) -> Result<Payment, StoreError>;
}
