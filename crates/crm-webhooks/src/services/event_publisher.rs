//! Producer-facing entry point for domain events.
//!
//! Request handlers call [`EventPublisher::publish`]; it never blocks and
//! never fails the caller. The matching [`crate::WebhookWorker`] consumes the
//! channel and hands events to the dispatcher.

use chrono::{DateTime, Utc};
use crm_core::UserId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::models::{EventData, WebhookEventType};

/// Default capacity of the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A domain event whose owner's subscriptions should be notified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEvent {
    pub event_id: Uuid,
    pub event_type: WebhookEventType,
    /// Whose subscriptions are searched.
    pub owner_id: UserId,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl WebhookEvent {
    #[must_use]
    pub fn new(event_type: WebhookEventType, owner_id: UserId, data: EventData) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            owner_id,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Cheaply cloneable handle for emitting events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<WebhookEvent>,
}

impl EventPublisher {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<WebhookEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue `(event_type, data)` for delivery to `owner`'s subscriptions.
    ///
    /// Fire-and-forget: if the channel is full or the worker has stopped the
    /// event is dropped with a warning.
    pub fn publish(&self, event_type: WebhookEventType, data: EventData, owner: UserId) {
        self.publish_event(WebhookEvent::new(event_type, owner, data));
    }

    pub fn publish_event(&self, event: WebhookEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => tracing::warn!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Webhook event channel full; event dropped"
            ),
            Err(TrySendError::Closed(event)) => tracing::warn!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Webhook worker stopped; event dropped"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_the_receiver() {
        let (publisher, mut rx) = EventPublisher::new(4);
        let owner = UserId::new();
        publisher.publish(
            WebhookEventType::LeadDeleted,
            EventData::new().with("lead_id", "abc"),
            owner,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, WebhookEventType::LeadDeleted);
        assert_eq!(event.owner_id, owner);
        assert_eq!(event.data.get("lead_id").unwrap(), "abc");
    }

    #[tokio::test]
    async fn publish_never_blocks_when_full_or_closed() {
        let (publisher, rx) = EventPublisher::new(1);
        let owner = UserId::new();
        publisher.publish(WebhookEventType::LeadCreated, EventData::new(), owner);
        // Channel full: dropped, no panic, no wait.
        publisher.publish(WebhookEventType::LeadCreated, EventData::new(), owner);

        drop(rx);
        publisher.publish(WebhookEventType::LeadCreated, EventData::new(), owner);
    }
}
