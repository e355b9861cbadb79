use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::geo::haversine_km;
use crate::models::demand::{CargoDemand, OfferCandidate, OfferStatus, RentalDemand, RentalOffer};
use crate::models::drone::{AvailabilityStatus, CertificationStatus, Drone, GeoPoint};
use crate::models::matching::{DemandKind, MatchStatus, MatchingRecord};
use crate::models::order::{Order, OrderFilter, OrderStatus, OrderTimeline, Page, Party};
use crate::models::payment::Payment;
use crate::repository::{
    DemandRepository, DroneRepository, MatchingRepository, OrderRepository, PaymentRepository,
};

/// In-process store backing every repository trait.
///
/// Maps that are touched together are always locked in the same order
/// (`orders` before `timelines`, `matches` before `match_index`).
#[derive(Default)]
pub struct MemoryStore {
    drones: DashMap<Uuid, Drone>,
    rental_demands: DashMap<Uuid, RentalDemand>,
    cargo_demands: DashMap<Uuid, CargoDemand>,
    offers: DashMap<Uuid, RentalOffer>,
    orders: DashMap<Uuid, Order>,
    timelines: DashMap<Uuid, Vec<OrderTimeline>>,
    matches: DashMap<(Uuid, DemandKind), Vec<MatchingRecord>>,
    match_index: DashMap<Uuid, (Uuid, DemandKind)>,
    payments: DashMap<String, Payment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drone_count(&self) -> usize {
        self.drones.len()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn match_count(&self) -> usize {
        self.match_index.len()
    }

    fn append_timeline(&self, mut entry: OrderTimeline) {
        let mut entries = self.timelines.entry(entry.order_id).or_default();
        if let Some(last) = entries.last() {
            // Wall clocks can step backwards; the log must not.
            if entry.created_at < last.created_at {
                entry.created_at = last.created_at;
            }
        }
        entries.push(entry);
    }

    fn paginate(mut orders: Vec<Order>, page: Page) -> (Vec<Order>, usize) {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = orders.len();
        let page_items = orders
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .collect();
        (page_items, total)
    }
}

fn within(center: &GeoPoint, point: &GeoPoint, radius_km: f64) -> bool {
    haversine_km(center, point) < radius_km
}

#[async_trait]
impl DroneRepository for MemoryStore {
    async fn insert(&self, drone: Drone) -> Result<Drone, StoreError> {
        self.drones.insert(drone.id, drone.clone());
        Ok(drone)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Drone>, StoreError> {
        Ok(self.drones.get(&id).map(|entry| entry.value().clone()))
    }

    async fn set_availability(
        &self,
        id: Uuid,
        status: AvailabilityStatus,
    ) -> Result<Drone, StoreError> {
        let mut drone = self
            .drones
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("drone {id}")))?;

        drone.availability_status = status;
        drone.updated_at = Utc::now();
        Ok(drone.clone())
    }

    async fn list(&self) -> Result<Vec<Drone>, StoreError> {
        let mut drones: Vec<Drone> = self
            .drones
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        drones.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(drones)
    }
}

#[async_trait]
impl DemandRepository for MemoryStore {
    async fn insert_rental_demand(&self, demand: RentalDemand) -> Result<RentalDemand, StoreError> {
        self.rental_demands.insert(demand.id, demand.clone());
        Ok(demand)
    }

    async fn insert_cargo_demand(&self, demand: CargoDemand) -> Result<CargoDemand, StoreError> {
        self.cargo_demands.insert(demand.id, demand.clone());
        Ok(demand)
    }

    async fn insert_offer(&self, offer: RentalOffer) -> Result<RentalOffer, StoreError> {
        self.offers.insert(offer.id, offer.clone());
        Ok(offer)
    }

    async fn get_rental_demand(&self, id: Uuid) -> Result<Option<RentalDemand>, StoreError> {
        Ok(self.rental_demands.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_cargo_demand(&self, id: Uuid) -> Result<Option<CargoDemand>, StoreError> {
        Ok(self.cargo_demands.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_available_offers(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<OfferCandidate>, StoreError> {
        let mut offers: Vec<RentalOffer> = self
            .offers
            .iter()
            .filter(|entry| {
                let offer = entry.value();
                offer.status == OfferStatus::Active && within(&center, &offer.location, radius_km)
            })
            .map(|entry| entry.value().clone())
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(offers
            .into_iter()
            .map(|offer| {
                let drone = self.drones.get(&offer.drone_id).map(|d| d.value().clone());
                OfferCandidate { offer, drone }
            })
            .collect())
    }

    async fn find_available_drones(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<Drone>, StoreError> {
        let mut drones: Vec<Drone> = self
            .drones
            .iter()
            .filter(|entry| {
                let drone = entry.value();
                drone.availability_status == AvailabilityStatus::Available
                    && drone.certification_status == CertificationStatus::Approved
                    && within(&center, &drone.location, radius_km)
            })
            .map(|entry| entry.value().clone())
            .collect();
        drones.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(drones)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create(&self, order: Order, entries: Vec<OrderTimeline>) -> Result<Order, StoreError> {
        let guard = self.orders.entry(order.id).or_insert(order);
        for entry in entries {
            self.append_timeline(entry);
        }
        Ok(guard.value().clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_by_order_no(&self, order_no: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .orders
            .iter()
            .find(|entry| entry.value().order_no == order_no)
            .map(|entry| entry.value().clone()))
    }

    async fn transition(
        &self,
        updated: Order,
        expected: OrderStatus,
        entry: OrderTimeline,
    ) -> Result<Order, StoreError> {
        let mut current = self
            .orders
            .get_mut(&updated.id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", updated.id)))?;

        if current.status != expected {
            return Err(StoreError::Conflict {
                order_id: updated.id,
                expected,
                actual: current.status,
            });
        }

        *current = updated;
        self.append_timeline(entry);
        Ok(current.clone())
    }

    async fn update(&self, order: Order) -> Result<Order, StoreError> {
        let mut current = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order.id)))?;

        let status = current.status;
        *current = order;
        current.status = status;
        Ok(current.clone())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        party: Party,
        status: Option<OrderStatus>,
        page: Page,
    ) -> Result<(Vec<Order>, usize), StoreError> {
        let orders = self
            .orders
            .iter()
            .filter(|entry| {
                let order = entry.value();
                let on_side = match party {
                    Party::Owner => order.owner_id == user_id,
                    Party::Renter => order.renter_id == user_id,
                };
                on_side
                    && order.deleted_at.is_none()
                    && status.is_none_or(|status| order.status == status)
            })
            .map(|entry| entry.value().clone())
            .collect();

        Ok(Self::paginate(orders, page))
    }

    async fn list(&self, filter: &OrderFilter, page: Page) -> Result<(Vec<Order>, usize), StoreError> {
        let orders = self
            .orders
            .iter()
            .filter(|entry| entry.value().deleted_at.is_none() && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        Ok(Self::paginate(orders, page))
    }

    async fn timeline(&self, order_id: Uuid) -> Result<Vec<OrderTimeline>, StoreError> {
        Ok(self
            .timelines
            .get(&order_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }

    async fn count_by_status(&self, status: OrderStatus) -> Result<usize, StoreError> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| entry.value().deleted_at.is_none() && entry.value().status == status)
            .count())
    }

    async fn statistics(&self) -> Result<BTreeMap<OrderStatus, usize>, StoreError> {
        let mut stats = BTreeMap::new();
        for entry in self.orders.iter() {
            if entry.value().deleted_at.is_none() {
                *stats.entry(entry.value().status).or_insert(0) += 1;
            }
        }
        Ok(stats)
    }

    async fn has_active_orders(
        &self,
        drone_id: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        Ok(self.orders.iter().any(|entry| {
            let order = entry.value();
            order.drone_id == drone_id
                && Some(order.id) != exclude
                && order.status.is_active()
        }))
    }
}

#[async_trait]
impl MatchingRepository for MemoryStore {
    async fn replace_for_demand(
        &self,
        demand_id: Uuid,
        demand_type: DemandKind,
        records: Vec<MatchingRecord>,
    ) -> Result<Vec<MatchingRecord>, StoreError> {
        let mut slot = self.matches.entry((demand_id, demand_type)).or_default();

        for stale in slot.iter() {
            self.match_index.remove(&stale.id);
        }
        for record in &records {
            self.match_index.insert(record.id, (demand_id, demand_type));
        }
        *slot = records.clone();

        Ok(records)
    }

    async fn get_by_demand(
        &self,
        demand_id: Uuid,
        demand_type: DemandKind,
    ) -> Result<Vec<MatchingRecord>, StoreError> {
        let mut records = self
            .matches
            .get(&(demand_id, demand_type))
            .map(|slot| slot.value().clone())
            .unwrap_or_default();
        records.sort_by(|a, b| b.match_score.cmp(&a.match_score));
        Ok(records)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MatchingRecord>, StoreError> {
        let Some(key) = self.match_index.get(&id).map(|entry| *entry.value()) else {
            return Ok(None);
        };

        Ok(self
            .matches
            .get(&key)
            .and_then(|slot| slot.iter().find(|record| record.id == id).cloned()))
    }

    async fn update_status(&self, id: Uuid, status: MatchStatus) -> Result<MatchingRecord, StoreError> {
        let not_found = || StoreError::NotFound(format!("matching record {id}"));
        let key = self
            .match_index
            .get(&id)
            .map(|entry| *entry.value())
            .ok_or_else(not_found)?;

        let mut slot = self.matches.get_mut(&key).ok_or_else(not_found)?;
        let record = slot
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(not_found)?;

        if !record.status.can_move_to(status) {
            return Err(StoreError::MatchMove {
                id,
                current: record.status,
                requested: status,
            });
        }
        if record.status != status {
            record.status = status;
            record.updated_at = Utc::now();
        }
        Ok(record.clone())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert(&self, payment: Payment) -> Result<Payment, StoreError> {
        self.payments.insert(payment.payment_no.clone(), payment.clone());
        Ok(payment)
    }

    async fn get_by_payment_no(&self, payment_no: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.get(payment_no).map(|entry| entry.value().clone()))
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|entry| entry.value().order_id == order_id)
            .map(|entry| entry.value().clone())
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(payments)
    }

    async fn update(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut current = self
            .payments
            .get_mut(&payment.payment_no)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment.payment_no)))?;

        *current = payment;
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::MemoryStore;
    use crate::error::StoreError;
    use crate::models::drone::{AvailabilityStatus, CertificationStatus, Drone, GeoPoint};
    use crate::models::matching::{DemandKind, MatchReason, MatchStatus, MatchingRecord, SupplyKind};
    use crate::models::order::{
        CommissionRate, OperatorRole, Order, OrderStatus, OrderTimeline, OrderType,
    };
    use crate::repository::{DemandRepository, DroneRepository, MatchingRepository, OrderRepository};

    fn order(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_no: "DM20260101120000a1b2c3".to_string(),
            order_type: OrderType::Rental,
            related_id: None,
            drone_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            renter_id: Uuid::new_v4(),
            title: "Mapping".to_string(),
            service_type: String::new(),
            start_time: now + Duration::days(1),
            end_time: now + Duration::days(2),
            location: GeoPoint { lat: 1.0, lng: 1.0 },
            address: String::new(),
            total_amount: 1_000,
            platform_commission_rate: CommissionRate::DEFAULT,
            platform_commission: 100,
            owner_amount: 900,
            deposit_amount: 0,
            status,
            cancel_reason: None,
            cancel_by: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn record(demand_id: Uuid) -> MatchingRecord {
        MatchingRecord {
            id: Uuid::new_v4(),
            demand_id,
            demand_type: DemandKind::CargoDemand,
            supply_id: Uuid::new_v4(),
            supply_type: SupplyKind::Drone,
            match_score: 42,
            match_reason: MatchReason::default(),
            status: MatchStatus::Recommended,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let store = MemoryStore::new();
        let created = order(OrderStatus::Created);
        let entry = |status| OrderTimeline::new(created.id, status, "", created.owner_id, OperatorRole::Owner);
        OrderRepository::create(&store, created.clone(), vec![entry(OrderStatus::Created)])
            .await
            .unwrap();

        let mut accepted = created.clone();
        accepted.status = OrderStatus::Accepted;
        store
            .transition(accepted.clone(), OrderStatus::Created, entry(OrderStatus::Accepted))
            .await
            .unwrap();

        let mut rejected = created.clone();
        rejected.status = OrderStatus::Rejected;
        let err = store
            .transition(rejected, OrderStatus::Created, entry(OrderStatus::Rejected))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                actual: OrderStatus::Accepted,
                ..
            }
        ));

        let timeline = store.timeline(created.id).await.unwrap();
        assert_eq!(timeline.len(), 2);
    }

    #[tokio::test]
    async fn update_never_touches_status() {
        let store = MemoryStore::new();
        let created = order(OrderStatus::Created);
        OrderRepository::create(&store, created.clone(), Vec::new()).await.unwrap();

        let mut archived = created.clone();
        archived.status = OrderStatus::Completed;
        archived.deleted_at = Some(Utc::now());
        let stored = store.update(archived).await.unwrap();

        assert_eq!(stored.status, OrderStatus::Created);
        assert!(stored.deleted_at.is_some());
        assert!(store.statistics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn radius_is_strict_and_requires_certification() {
        let store = MemoryStore::new();
        let center = GeoPoint { lat: 0.0, lng: 0.0 };
        let mut drone = Drone {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            brand: "Parrot".to_string(),
            model: "Anafi".to_string(),
            location: GeoPoint { lat: 0.0, lng: 0.1 },
            max_load: 0.5,
            max_distance: 4.0,
            daily_price: 4_000,
            hourly_price: 700,
            deposit: 0,
            certification_status: CertificationStatus::Pending,
            availability_status: AvailabilityStatus::Available,
            rating: 3.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        DroneRepository::insert(&store, drone.clone()).await.unwrap();
        assert!(store.find_available_drones(center, 50.0).await.unwrap().is_empty());

        drone.certification_status = CertificationStatus::Approved;
        DroneRepository::insert(&store, drone.clone()).await.unwrap();
        let exact = crate::geo::haversine_km(&center, &drone.location);
        assert!(store.find_available_drones(center, exact).await.unwrap().is_empty());
        assert_eq!(store.find_available_drones(center, exact + 0.01).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replacing_matches_drops_stale_records() {
        let store = MemoryStore::new();
        let demand_id = Uuid::new_v4();

        let first = vec![record(demand_id), record(demand_id)];
        let stale_id = first[0].id;
        store
            .replace_for_demand(demand_id, DemandKind::CargoDemand, first)
            .await
            .unwrap();

        let second = vec![record(demand_id)];
        let fresh_id = second[0].id;
        store
            .replace_for_demand(demand_id, DemandKind::CargoDemand, second)
            .await
            .unwrap();

        assert!(MatchingRepository::get(&store, stale_id).await.unwrap().is_none());
        assert!(MatchingRepository::get(&store, fresh_id).await.unwrap().is_some());
        assert_eq!(store.match_count(), 1);
        assert!(store
            .get_by_demand(demand_id, DemandKind::RentalDemand)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn match_status_never_moves_back_under_contention() {
        let store = Arc::new(MemoryStore::new());
        let demand_id = Uuid::new_v4();
        let rec = record(demand_id);
        let id = rec.id;
        store
            .replace_for_demand(demand_id, DemandKind::CargoDemand, vec![rec])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let status = if i % 2 == 0 {
                MatchStatus::Viewed
            } else {
                MatchStatus::Ordered
            };
            handles.push(tokio::spawn(async move {
                store.update_status(id, status).await
            }));
        }

        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => {}
                Err(StoreError::MatchMove { current, .. }) => {
                    assert_eq!(current, MatchStatus::Ordered)
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        let stored = MatchingRepository::get(store.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Ordered);

        let err = store.update_status(id, MatchStatus::Viewed).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::MatchMove {
                current: MatchStatus::Ordered,
                requested: MatchStatus::Viewed,
                ..
            }
        ));
    }
}
