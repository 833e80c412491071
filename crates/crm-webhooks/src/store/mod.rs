//! Persistence seams for subscriptions and delivery logs.
//!
//! The engine only talks to these traits. [`PgWebhookStore`] backs them with
//! PostgreSQL; [`InMemoryWebhookStore`] is used for tests and local runs.

mod memory;
mod postgres;

pub use memory::InMemoryWebhookStore;
pub use postgres::PgWebhookStore;

use chrono::{DateTime, Utc};
use crm_core::{DeliveryLogId, UserId, WebhookId};
use crm_db::models::{
    DeliveryLogUpdate, UpdateWebhookSubscription, WebhookDeliveryLog, WebhookSubscription,
};

use crate::error::WebhookError;
use crate::models::WebhookEventType;

/// Subscription persistence.
///
/// Every owner-facing method is scoped by `owner`; a subscription belonging to
/// someone else behaves exactly like a missing one.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert_subscription(&self, subscription: &WebhookSubscription)
        -> Result<(), WebhookError>;

    async fn find_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    /// All subscriptions of `owner`, newest first.
    async fn list_subscriptions(&self, owner: UserId)
        -> Result<Vec<WebhookSubscription>, WebhookError>;

    async fn update_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
        update: &UpdateWebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError>;

    async fn delete_subscription(&self, owner: UserId, id: WebhookId) -> Result<bool, WebhookError>;

    /// Active subscriptions of `owner` whose event set contains `event`.
    async fn find_active(
        &self,
        owner: UserId,
        event: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, WebhookError>;

    /// Atomically add one trigger, and one failure when `success` is false.
    async fn increment_counters(&self, id: WebhookId, success: bool) -> Result<(), WebhookError>;

    async fn set_last_triggered(
        &self,
        id: WebhookId,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError>;
}

/// Delivery log persistence.
#[async_trait::async_trait]
pub trait DeliveryLogStore: Send + Sync {
    async fn insert_log(&self, log: &WebhookDeliveryLog) -> Result<(), WebhookError>;

    /// Updates an unfinalized log. Returns false if the log is missing or
    /// already finalized.
    async fn update_log(
        &self,
        id: DeliveryLogId,
        update: &DeliveryLogUpdate,
    ) -> Result<bool, WebhookError>;

    /// Logs of one subscription, newest first, at most `limit` entries.
    async fn list_logs(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryLog>, WebhookError>;
}
