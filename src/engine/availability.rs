use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::drone::{AvailabilityStatus, Drone};
use crate::repository::{DroneRepository, OrderRepository};

/// One async mutex per drone. Everything that reads or writes the pair
/// (order status, drone availability) for a drone runs while holding it.
/// Entries live as long as the process, one per drone ever locked.
#[derive(Default)]
pub struct DroneLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl DroneLocks {
    pub async fn lock(&self, drone_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(drone_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Keeps `availability_status` in line with the drone's active orders:
/// `rented` iff at least one order is accepted, paid or in progress.
pub struct AvailabilityTracker {
    drones: Arc<dyn DroneRepository>,
    orders: Arc<dyn OrderRepository>,
    locks: Arc<DroneLocks>,
}

impl AvailabilityTracker {
    pub fn new(
        drones: Arc<dyn DroneRepository>,
        orders: Arc<dyn OrderRepository>,
        locks: Arc<DroneLocks>,
    ) -> Self {
        Self {
            drones,
            orders,
            locks,
        }
    }

    pub fn locks(&self) -> &DroneLocks {
        &self.locks
    }

    /// Recomputes the flag from the active-order set, ignoring `exclude`.
    /// Manual `maintenance`/`offline` states are never overridden.
    /// The caller must hold the drone's lock.
    pub async fn settle(
        &self,
        drone_id: Uuid,
        exclude: Option<Uuid>,
    ) -> Result<AvailabilityStatus, AppError> {
        let drone = self.load(drone_id).await?;
        if drone.availability_status.is_manual() {
            return Ok(drone.availability_status);
        }

        let target = if self.orders.has_active_orders(drone_id, exclude).await? {
            AvailabilityStatus::Rented
        } else {
            AvailabilityStatus::Available
        };
        if target == drone.availability_status {
            return Ok(target);
        }

        self.drones.set_availability(drone_id, target).await?;
        info!(
            drone_id = %drone_id,
            from = ?drone.availability_status,
            to = ?target,
            "drone availability settled"
        );
        Ok(target)
    }

    /// The caller must hold the drone's lock. Manual states are kept.
    pub async fn mark_rented(&self, drone_id: Uuid) -> Result<(), AppError> {
        let drone = self.load(drone_id).await?;
        if drone.availability_status == AvailabilityStatus::Available {
            self.drones
                .set_availability(drone_id, AvailabilityStatus::Rented)
                .await?;
        }
        Ok(())
    }

    /// Owner-driven status change. `rented` can only be reached through orders.
    pub async fn set_manual(
        &self,
        drone_id: Uuid,
        owner_id: Uuid,
        status: AvailabilityStatus,
    ) -> Result<Drone, AppError> {
        if status == AvailabilityStatus::Rented {
            return Err(AppError::BadRequest(
                "rented is derived from orders and cannot be set directly".to_string(),
            ));
        }

        let _guard = self.locks.lock(drone_id).await;
        let drone = self.load(drone_id).await?;
        if drone.owner_id != owner_id {
            return Err(AppError::Forbidden(format!(
                "user {owner_id} does not own drone {drone_id}"
            )));
        }

        self.drones.set_availability(drone_id, status).await?;
        if status == AvailabilityStatus::Available {
            self.settle(drone_id, None).await?;
        }

        self.load(drone_id).await
    }

    /// Repairs every drone whose flag disagrees with its orders. Returns how many changed.
    pub async fn reconcile_all(&self) -> Result<usize, AppError> {
        let drones = self.drones.list().await?;
        let mut fixed = 0;

        for drone in drones {
            let _guard = self.locks.lock(drone.id).await;
            match self.settle(drone.id, None).await {
                Ok(status) if status != drone.availability_status => fixed += 1,
                Ok(_) => {}
                Err(err) => warn!(drone_id = %drone.id, error = %err, "reconcile skipped drone"),
            }
        }

        info!(fixed, "drone availability reconciled");
        Ok(fixed)
    }

    async fn load(&self, drone_id: Uuid) -> Result<Drone, AppError> {
        self.drones
            .get(drone_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("drone {drone_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{AvailabilityTracker, DroneLocks};
    use crate::models::drone::{AvailabilityStatus, CertificationStatus, Drone, GeoPoint};
    use crate::models::order::{
        CommissionRate, Order, OrderStatus, OrderTimeline, OperatorRole, OrderType,
    };
    use crate::repository::memory::MemoryStore;
    use crate::repository::{DroneRepository, OrderRepository};

    fn drone(status: AvailabilityStatus) -> Drone {
        Drone {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            brand: "DJI".to_string(),
            model: "FlyCart 30".to_string(),
            location: GeoPoint {
                lat: 22.54,
                lng: 114.06,
            },
            max_load: 30.0,
            max_distance: 16.0,
            daily_price: 80_000,
            hourly_price: 12_000,
            deposit: 200_000,
            certification_status: CertificationStatus::Approved,
            availability_status: status,
            rating: 4.5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order(drone: &Drone, status: OrderStatus) -> Order {
        Order {
            id: Uuid::new_v4(),
            order_no: "DM-test".to_string(),
            order_type: OrderType::Rental,
            related_id: None,
            drone_id: drone.id,
            owner_id: drone.owner_id,
            renter_id: Uuid::new_v4(),
            title: "Survey".to_string(),
            service_type: "survey".to_string(),
            start_time: Utc::now() + Duration::days(2),
            end_time: Utc::now() + Duration::days(3),
            location: drone.location,
            address: String::new(),
            total_amount: 10_000,
            platform_commission_rate: CommissionRate::DEFAULT,
            platform_commission: 1_000,
            owner_amount: 9_000,
            deposit_amount: 0,
            status,
            cancel_reason: None,
            cancel_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    async fn setup(drone: &Drone) -> (Arc<MemoryStore>, AvailabilityTracker) {
        let store = Arc::new(MemoryStore::new());
        DroneRepository::insert(store.as_ref(), drone.clone()).await.unwrap();
        let tracker = AvailabilityTracker::new(store.clone(), store.clone(), Arc::new(DroneLocks::default()));
        (store, tracker)
    }

    async fn add_order(store: &MemoryStore, order: Order) {
        let entry = OrderTimeline::new(
            order.id,
            order.status,
            "seed",
            order.renter_id,
            OperatorRole::Renter,
        );
        OrderRepository::create(store, order, vec![entry]).await.unwrap();
    }

    #[tokio::test]
    async fn rented_drone_without_active_orders_becomes_available() {
        let drone = drone(AvailabilityStatus::Rented);
        let (store, tracker) = setup(&drone).await;
        add_order(&store, order(&drone, OrderStatus::Completed)).await;

        let status = tracker.settle(drone.id, None).await.unwrap();
        assert_eq!(status, AvailabilityStatus::Available);
    }

    #[tokio::test]
    async fn excluded_order_does_not_keep_drone_rented() {
        let drone = drone(AvailabilityStatus::Rented);
        let (store, tracker) = setup(&drone).await;
        let finishing = order(&drone, OrderStatus::InProgress);
        let finishing_id = finishing.id;
        add_order(&store, finishing).await;

        assert_eq!(
            tracker.settle(drone.id, None).await.unwrap(),
            AvailabilityStatus::Rented
        );
        assert_eq!(
            tracker.settle(drone.id, Some(finishing_id)).await.unwrap(),
            AvailabilityStatus::Available
        );
    }

    #[tokio::test]
    async fn maintenance_is_left_alone() {
        let drone = drone(AvailabilityStatus::Maintenance);
        let (store, tracker) = setup(&drone).await;
        add_order(&store, order(&drone, OrderStatus::Paid)).await;

        let status = tracker.settle(drone.id, None).await.unwrap();
        assert_eq!(status, AvailabilityStatus::Maintenance);
    }

    #[tokio::test]
    async fn manual_available_snaps_back_to_rented_with_active_orders() {
        let drone = drone(AvailabilityStatus::Maintenance);
        let (store, tracker) = setup(&drone).await;
        add_order(&store, order(&drone, OrderStatus::Accepted)).await;

        let updated = tracker
            .set_manual(drone.id, drone.owner_id, AvailabilityStatus::Available)
            .await
            .unwrap();
        assert_eq!(updated.availability_status, AvailabilityStatus::Rented);

        let err = tracker
            .set_manual(drone.id, Uuid::new_v4(), AvailabilityStatus::Offline)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
    }

    #[tokio::test]
    async fn reconcile_counts_repaired_drones() {
        let stale = drone(AvailabilityStatus::Rented);
        let (store, tracker) = setup(&stale).await;

        let busy = drone(AvailabilityStatus::Available);
        DroneRepository::insert(store.as_ref(), busy.clone()).await.unwrap();
        add_order(&store, order(&busy, OrderStatus::Paid)).await;

        let idle = drone(AvailabilityStatus::Available);
        DroneRepository::insert(store.as_ref(), idle.clone()).await.unwrap();

        assert_eq!(tracker.reconcile_all().await.unwrap(), 2);

        let stale = DroneRepository::get(store.as_ref(), stale.id).await.unwrap().unwrap();
        let busy = DroneRepository::get(store.as_ref(), busy.id).await.unwrap().unwrap();
        assert_eq!(stale.availability_status, AvailabilityStatus::Available);
        assert_eq!(busy.availability_status, AvailabilityStatus::Rented);
    }
}
