use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::orders::{Operator, OrderService, RefundInstruction};
use crate::error::{AppError, PaymentError};
use crate::models::order::{Order, OrderStatus};
use crate::models::payment::{Payment, PaymentStatus};
use crate::repository::PaymentRepository;

#[derive(Debug, Clone, Serialize)]
pub struct PaymentHandle {
    pub payment_no: String,
    /// Handed to the client SDK as-is.
    pub pay_params: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundHandle {
    pub refund_no: String,
    pub status: String,
}

/// Third-party payment gateway. Signing and callback verification live behind it.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment(
        &self,
        order_no: &str,
        amount: i64,
        description: &str,
    ) -> Result<PaymentHandle, PaymentError>;

    async fn refund(&self, payment_no: &str, amount: i64) -> Result<RefundHandle, PaymentError>;
}

/// Development provider: every payment and refund succeeds immediately.
#[derive(Debug, Default)]
pub struct MockPaymentProvider;

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_payment(
        &self,
        order_no: &str,
        amount: i64,
        _description: &str,
    ) -> Result<PaymentHandle, PaymentError> {
        let payment_no = reference("PAY");
        info!(order_no, amount, payment_no = %payment_no, "mock payment created");
        Ok(PaymentHandle {
            payment_no,
            pay_params: r#"{"mock":true}"#.to_string(),
        })
    }

    async fn refund(&self, payment_no: &str, amount: i64) -> Result<RefundHandle, PaymentError> {
        info!(payment_no, amount, "mock refund processed");
        Ok(RefundHandle {
            refund_no: reference("REFUND"),
            status: "refunded".to_string(),
        })
    }
}

fn reference(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}{}", Utc::now().timestamp_millis(), &suffix[..6])
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedPayment {
    pub payment: Payment,
    pub pay_params: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub payment_no: String,
    pub refund_no: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundFailure {
    pub payment_no: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReport {
    pub order: Order,
    pub refunded: Vec<RefundReceipt>,
    pub failed: Vec<RefundFailure>,
}

pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    orders: Arc<OrderService>,
    provider: Arc<dyn PaymentProvider>,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: Arc<OrderService>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            payments,
            orders,
            provider,
        }
    }

    /// Opens a pending payment for an accepted order. The payer is billed the
    /// order amount plus the drone deposit.
    pub async fn create_payment(
        &self,
        order_id: Uuid,
        payer_id: Uuid,
    ) -> Result<CreatedPayment, AppError> {
        let order = self.orders.get_order(order_id).await?;
        if order.renter_id != payer_id {
            return Err(AppError::Forbidden(format!(
                "user {payer_id} is not the renter of order {order_id}"
            )));
        }
        if order.status != OrderStatus::Accepted {
            return Err(AppError::InvalidState {
                order_id,
                current: order.status,
                action: "pay",
            });
        }

        let amount = order.amount_due().ok_or_else(|| {
            AppError::BadRequest(format!("amount due for order {order_id} is out of range"))
        })?;
        let handle = self
            .provider
            .create_payment(&order.order_no, amount, &order.title)
            .await?;

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            payment_no: handle.payment_no,
            order_id,
            user_id: payer_id,
            amount,
            status: PaymentStatus::Pending,
            pay_params: handle.pay_params.clone(),
            third_party_no: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        let payment = self.payments.insert(payment).await?;

        info!(
            order_id = %order_id,
            payment_no = %payment.payment_no,
            amount,
            "payment created"
        );
        Ok(CreatedPayment {
            payment,
            pay_params: handle.pay_params,
        })
    }

    /// Provider callback. Confirming an already paid payment is a no-op.
    /// Money captured for an order that is no longer `accepted` is handed back
    /// through the provider and the confirmation fails with `InvalidState`.
    pub async fn confirm_payment(
        &self,
        payment_no: &str,
        third_party_no: &str,
    ) -> Result<Payment, AppError> {
        let mut payment = self
            .payments
            .get_by_payment_no(payment_no)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment {payment_no} not found")))?;

        match payment.status {
            PaymentStatus::Paid => return Ok(payment),
            PaymentStatus::Pending => {}
            other => {
                return Err(AppError::BadRequest(format!(
                    "payment {payment_no} is {other:?} and cannot be confirmed"
                )));
            }
        }
        payment.third_party_no = Some(third_party_no.to_string());

        let order = self.orders.get_order(payment.order_id).await?;
        if order.status != OrderStatus::Accepted {
            // A concurrent confirmation of this payment may already have paid the order.
            let current = self.payments.get_by_payment_no(payment_no).await?;
            if let Some(paid) = current.filter(|current| current.status == PaymentStatus::Paid) {
                return Ok(paid);
            }
            self.release(payment).await?;
            return Err(AppError::InvalidState {
                order_id: order.id,
                current: order.status,
                action: "confirm payment",
            });
        }

        let now = Utc::now();
        payment.status = PaymentStatus::Paid;
        payment.paid_at = Some(now);
        payment.updated_at = now;
        let payment = self.payments.update(payment).await?;

        match self.orders.mark_paid(payment.order_id, payment.user_id).await {
            Ok(_) => {}
            // A concurrent confirmation already moved the order.
            Err(AppError::InvalidState {
                current: OrderStatus::Paid,
                ..
            }) => {
                warn!(payment_no, order_id = %payment.order_id, "order already marked paid");
            }
            // The order left `accepted` between the check and the transition.
            Err(err @ AppError::InvalidState { .. }) => {
                self.release(payment).await?;
                return Err(err);
            }
            Err(err) => {
                error!(
                    payment_no,
                    order_id = %payment.order_id,
                    error = %err,
                    "payment confirmed but order could not be marked paid"
                );
                return Err(err);
            }
        }

        info!(payment_no, order_id = %payment.order_id, "payment confirmed");
        Ok(payment)
    }

    /// Returns a captured payment that no order will consume. The payment ends
    /// `refunded`, or `failed` when the provider refuses the refund.
    async fn release(&self, mut payment: Payment) -> Result<Payment, AppError> {
        match self.provider.refund(&payment.payment_no, payment.amount).await {
            Ok(handle) => {
                warn!(
                    payment_no = %payment.payment_no,
                    order_id = %payment.order_id,
                    refund_no = %handle.refund_no,
                    amount = payment.amount,
                    "payment for inactive order returned"
                );
                payment.status = PaymentStatus::Refunded;
            }
            Err(err) => {
                error!(
                    payment_no = %payment.payment_no,
                    order_id = %payment.order_id,
                    amount = payment.amount,
                    error = %err,
                    "payment for inactive order could not be returned"
                );
                payment.status = PaymentStatus::Failed;
            }
        }
        payment.updated_at = Utc::now();
        Ok(self.payments.update(payment).await?)
    }

    /// Executes a cancellation refund against the order's first paid payment.
    pub async fn issue_refund(
        &self,
        instruction: &RefundInstruction,
    ) -> Result<RefundReceipt, AppError> {
        let mut payment = self
            .payments
            .list_by_order(instruction.order_id)
            .await?
            .into_iter()
            .find(|payment| payment.status == PaymentStatus::Paid)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no paid payment for order {}",
                    instruction.order_id
                ))
            })?;

        let handle = self
            .provider
            .refund(&payment.payment_no, instruction.amount)
            .await?;

        payment.status = PaymentStatus::Refunded;
        payment.updated_at = Utc::now();
        let payment = self.payments.update(payment).await?;

        info!(
            order_id = %instruction.order_id,
            payment_no = %payment.payment_no,
            refund_no = %handle.refund_no,
            amount = instruction.amount,
            policy = instruction.policy.as_str(),
            "cancellation refund issued"
        );
        Ok(RefundReceipt {
            payment_no: payment.payment_no,
            refund_no: handle.refund_no,
            amount: instruction.amount,
        })
    }

    /// Moves the order to `refunded`, then returns every paid payment in full.
    /// Provider failures are reported per payment and not retried.
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        operator: Operator,
    ) -> Result<RefundReport, AppError> {
        let order = self.orders.refund_order(order_id, operator).await?;
        let payments = self.payments.list_by_order(order_id).await?;

        let mut refunded = Vec::new();
        let mut failed = Vec::new();

        for mut payment in payments
            .into_iter()
            .filter(|payment| payment.status == PaymentStatus::Paid)
        {
            match self.provider.refund(&payment.payment_no, payment.amount).await {
                Ok(handle) => {
                    payment.status = PaymentStatus::Refunded;
                    payment.updated_at = Utc::now();
                    let amount = payment.amount;
                    let payment = self.payments.update(payment).await?;
                    refunded.push(RefundReceipt {
                        payment_no: payment.payment_no,
                        refund_no: handle.refund_no,
                        amount,
                    });
                }
                Err(err) => {
                    error!(
                        order_id = %order_id,
                        payment_no = %payment.payment_no,
                        error = %err,
                        "refund failed"
                    );
                    failed.push(RefundFailure {
                        payment_no: payment.payment_no,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            order_id = %order_id,
            refunded = refunded.len(),
            failed = failed.len(),
            "order refund processed"
        );
        Ok(RefundReport {
            order,
            refunded,
            failed,
        })
    }

    pub async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, AppError> {
        Ok(self.payments.list_by_order(order_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{MockPaymentProvider, PaymentHandle, PaymentProvider, PaymentService, RefundHandle};
    use crate::engine::availability::{AvailabilityTracker, DroneLocks};
    use crate::engine::notify::BroadcastNotifier;
    use crate::engine::orders::{CreateOrderRequest, Operator, OrderService};
    use crate::error::PaymentError;
    use crate::models::drone::{AvailabilityStatus, CertificationStatus, Drone, GeoPoint};
    use crate::models::order::{CommissionRate, OperatorRole, Order, OrderStatus, OrderType};
    use crate::models::payment::PaymentStatus;
    use crate::observability::metrics::Metrics;
    use crate::repository::memory::MemoryStore;
    use crate::repository::DroneRepository;

    struct RefusingRefunds;

    #[async_trait]
    impl PaymentProvider for RefusingRefunds {
        async fn create_payment(
            &self,
            order_no: &str,
            amount: i64,
            description: &str,
        ) -> Result<PaymentHandle, PaymentError> {
            MockPaymentProvider
                .create_payment(order_no, amount, description)
                .await
        }

        async fn refund(&self, _payment_no: &str, _amount: i64) -> Result<RefundHandle, PaymentError> {
            Err(PaymentError::Unreachable("gateway timeout".to_string()))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        orders: Arc<OrderService>,
        payments: PaymentService,
    }

    fn fixture(provider: Arc<dyn PaymentProvider>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
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
            tracker,
            Arc::new(BroadcastNotifier::new(16)),
            Metrics::new(),
        ));
        let payments = PaymentService::new(store.clone(), orders.clone(), provider);
        Fixture {
            store,
            orders,
            payments,
        }
    }

    async fn accepted_order(f: &Fixture, starts_in: Duration) -> Order {
        let drone = Drone {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            brand: "DJI".to_string(),
            model: "Agras T40".to_string(),
            location: GeoPoint {
                lat: 23.13,
                lng: 113.26,
            },
            max_load: 40.0,
            max_distance: 10.0,
            daily_price: 60_000,
            hourly_price: 9_000,
            deposit: 10_000,
            certification_status: CertificationStatus::Approved,
            availability_status: AvailabilityStatus::Available,
            rating: 4.9,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        DroneRepository::insert(f.store.as_ref(), drone.clone()).await.unwrap();

        let start_time = Utc::now() + starts_in;
        let order = f
            .orders
            .create_order(
                CreateOrderRequest {
                    caller_id: Uuid::new_v4(),
                    order_type: OrderType::Rental,
                    related_id: None,
                    drone_id: drone.id,
                    title: "Crop dusting".to_string(),
                    service_type: "agriculture".to_string(),
                    start_time,
                    end_time: start_time + Duration::hours(4),
                    location: drone.location,
                    address: String::new(),
                    total_amount: 50_000,
                    auto_accept: false,
                    match_id: None,
                },
                CommissionRate::DEFAULT,
            )
            .await
            .unwrap();
        f.orders.accept_order(order.id, drone.owner_id).await.unwrap()
    }

    #[tokio::test]
    async fn payment_bills_total_plus_deposit_and_confirmation_is_idempotent() {
        let f = fixture(Arc::new(MockPaymentProvider));
        let order = accepted_order(&f, Duration::days(2)).await;

        let created = f
            .payments
            .create_payment(order.id, order.renter_id)
            .await
            .unwrap();
        assert_eq!(created.payment.amount, 60_000);
        assert_eq!(created.payment.status, PaymentStatus::Pending);

        let no = created.payment.payment_no.clone();
        let first = f.payments.confirm_payment(&no, "TP-1").await.unwrap();
        let second = f.payments.confirm_payment(&no, "TP-2").await.unwrap();
        assert_eq!(first.status, PaymentStatus::Paid);
        assert_eq!(second.third_party_no.as_deref(), Some("TP-1"));

        let order = f.orders.get_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(f.orders.timeline(order.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn only_renter_of_accepted_order_can_pay() {
        let f = fixture(Arc::new(MockPaymentProvider));
        let order = accepted_order(&f, Duration::days(2)).await;

        let err = f
            .payments
            .create_payment(order.id, order.owner_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        f.orders
            .cancel_order(order.id, Operator::new(order.renter_id, OperatorRole::Renter), "nope")
            .await
            .unwrap();
        let err = f
            .payments
            .create_payment(order.id, order.renter_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
    }

    #[tokio::test]
    async fn cancellation_refund_runs_against_paid_payment() {
        let f = fixture(Arc::new(MockPaymentProvider));
        let order = accepted_order(&f, Duration::hours(10)).await;
        let created = f
            .payments
            .create_payment(order.id, order.renter_id)
            .await
            .unwrap();
        f.payments
            .confirm_payment(&created.payment.payment_no, "TP-9")
            .await
            .unwrap();

        let cancellation = f
            .orders
            .cancel_order(order.id, Operator::new(order.renter_id, OperatorRole::Renter), "rain")
            .await
            .unwrap();
        let instruction = cancellation.refund.unwrap();
        assert_eq!(instruction.amount, 35_000 + 10_000);

        let receipt = f.payments.issue_refund(&instruction).await.unwrap();
        assert_eq!(receipt.amount, 45_000);

        let payments = f.payments.list_for_order(order.id).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn refund_order_reports_provider_failures() {
        let f = fixture(Arc::new(RefusingRefunds));
        let order = accepted_order(&f, Duration::days(3)).await;
        let created = f
            .payments
            .create_payment(order.id, order.renter_id)
            .await
            .unwrap();
        f.payments
            .confirm_payment(&created.payment.payment_no, "TP-3")
            .await
            .unwrap();

        let admin = Operator::new(Uuid::new_v4(), OperatorRole::Admin);
        let report = f.payments.refund_order(order.id, admin).await.unwrap();

        assert_eq!(report.order.status, OrderStatus::Refunded);
        assert!(report.refunded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].payment_no, created.payment.payment_no);

        let payments = f.payments.list_for_order(order.id).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let f = fixture(Arc::new(MockPaymentProvider));
        let err = f
            .payments
            .confirm_payment("PAY-missing", "TP")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn confirmation_after_cancel_returns_the_money() {
        let f = fixture(Arc::new(MockPaymentProvider));
        let order = accepted_order(&f, Duration::days(2)).await;
        let created = f
            .payments
            .create_payment(order.id, order.renter_id)
            .await
            .unwrap();
        f.orders
            .cancel_order(order.id, Operator::new(order.renter_id, OperatorRole::Renter), "plans changed")
            .await
            .unwrap();

        let no = created.payment.payment_no.clone();
        let err = f.payments.confirm_payment(&no, "TP-5").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_state");
        let err = f.payments.confirm_payment(&no, "TP-5").await.unwrap_err();
        assert_eq!(err.kind(), "bad_request");

        let payments = f.payments.list_for_order(order.id).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Refunded);
        assert_eq!(payments[0].third_party_no.as_deref(), Some("TP-5"));
        let order = f.orders.get_order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn unreturnable_payment_is_marked_failed() {
        let f = fixture(Arc::new(RefusingRefunds));
        let order = accepted_order(&f, Duration::days(2)).await;
        let created = f
            .payments
            .create_payment(order.id, order.renter_id)
            .await
            .unwrap();
        f.orders
            .cancel_order(order.id, Operator::new(order.owner_id, OperatorRole::Owner), "grounded")
            .await
            .unwrap();

        let err = f
            .payments
            .confirm_payment(&created.payment.payment_no, "TP-6")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_state");

        let payments = f.payments.list_for_order(order.id).await.unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Failed);
    }
}
