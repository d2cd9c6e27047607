//! Capabilities injected into the command handler and the event reactor.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::DomainNotification;

use crate::error::PublishError;
use crate::integration::IntegrationEvent;
use crate::order::OrderCommand;

/// Publishes integration events to whoever subscribed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), PublishError>;
}

/// Sends a command to be handled later.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send(&self, command: OrderCommand) -> Result<(), PublishError>;
}

/// Receives user-facing notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: DomainNotification);
}

/// Publisher that keeps every event in memory.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<RwLock<Vec<IntegrationEvent>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IntegrationEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Names of the published events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(IntegrationEvent::name).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.write() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), PublishError> {
        self.events
            .write()
            .map_err(|_| PublishError::Rejected("recording publisher poisoned".into()))?
            .push(event);
        Ok(())
    }
}

/// Notifier that keeps every notification in memory and logs it.
#[derive(Clone, Default)]
pub struct NotificationLog {
    notifications: Arc<RwLock<Vec<DomainNotification>>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<DomainNotification> {
        self.notifications
            .read()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn has_notifications(&self) -> bool {
        !self.notifications().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.notifications().into_iter().map(|n| n.key).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut notifications) = self.notifications.write() {
            notifications.clear();
        }
    }
}

#[async_trait]
impl Notifier for NotificationLog {
    async fn notify(&self, notification: DomainNotification) {
        tracing::info!(key = %notification.key, message = %notification.message, "notification raised");
        if let Ok(mut notifications) = self.notifications.write() {
            notifications.push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{AggregateId, CustomerId};

    use super::*;

    #[tokio::test]
    async fn recording_publisher_keeps_order() {
        let publisher = RecordingPublisher::new();
        let order_id = AggregateId::new();
        let customer_id = CustomerId::new();

        publisher
            .publish(IntegrationEvent::payment_accepted(order_id, customer_id))
            .await
            .unwrap();
        publisher
            .publish(IntegrationEvent::payment_rejected(order_id, customer_id))
            .await
            .unwrap();

        assert_eq!(publisher.names(), vec!["PaymentAccepted", "PaymentRejected"]);
        publisher.clear();
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn notification_log_collects() {
        let log = NotificationLog::new();
        log.notify(DomainNotification::new("order", "Order not found"))
            .await;

        assert!(log.has_notifications());
        assert_eq!(log.keys(), vec!["order".to_string()]);
    }
}
