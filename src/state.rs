use std::sync::Arc;

use crate::config::Config;
use crate::engine::availability::{AvailabilityTracker, DroneLocks};
use crate::engine::matching::MatchingService;
use crate::engine::notify::BroadcastNotifier;
use crate::engine::orders::OrderService;
use crate::engine::settlement::{MockPaymentProvider, PaymentProvider, PaymentService};
use crate::observability::metrics::Metrics;
use crate::repository::memory::MemoryStore;

pub struct AppState {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<BroadcastNotifier>,
    pub tracker: Arc<AvailabilityTracker>,
    pub orders: Arc<OrderService>,
    pub matching: MatchingService,
    pub payments: PaymentService,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_provider(config, Arc::new(MockPaymentProvider))
    }

    pub fn with_provider(config: Config, provider: Arc<dyn PaymentProvider>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(config.event_buffer_size));
        let metrics = Metrics::new();

        let tracker = Arc::new(AvailabilityTracker::new(
            store.clone(),
            store.clone(),
            Arc::new(DroneLocks::default()),
        ));
        let orders = Arc::new(OrderService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            tracker.clone(),
            notifier.clone(),
            metrics.clone(),
        ));
        let matching = MatchingService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            metrics.clone(),
        );
        let payments = PaymentService::new(store.clone(), orders.clone(), provider);

        Self {
            config,
            store,
            notifier,
            tracker,
            orders,
            matching,
            payments,
            metrics,
        }
    }
}
