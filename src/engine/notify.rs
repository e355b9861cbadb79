use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::notification::{Notification, NotificationEvent};

/// Fire-and-forget delivery of user notifications. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, user_id: Uuid, event: NotificationEvent);
}

/// Fans notifications out over an in-process broadcast channel.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, user_id: Uuid, event: NotificationEvent) {
        let notification = Notification {
            user_id,
            event,
            created_at: Utc::now(),
        };

        // No subscribers is not an error.
        if self.tx.send(notification).is_err() {
            debug!(user_id = %user_id, "notification dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{BroadcastNotifier, Notifier};
    use crate::models::notification::NotificationEvent;
    use crate::models::order::OrderStatus;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let user = Uuid::new_v4();
        let order_id = Uuid::new_v4();

        notifier.notify(
            user,
            NotificationEvent::OrderStatusChanged {
                order_id,
                order_no: "DM1".to_string(),
                status: OrderStatus::Accepted,
            },
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.user_id, user);
        assert_eq!(
            received.event,
            NotificationEvent::OrderStatusChanged {
                order_id,
                order_no: "DM1".to_string(),
                status: OrderStatus::Accepted,
            }
        );
    }

    #[test]
    fn notify_without_subscribers_does_not_panic() {
        let notifier = BroadcastNotifier::new(1);
        notifier.notify(
            Uuid::new_v4(),
            NotificationEvent::NewMatches {
                demand_id: Uuid::new_v4(),
                demand_type: crate::models::matching::DemandKind::CargoDemand,
                count: 3,
            },
        );
    }
}
