use chrono::{DateTime, Utc};
use crm_core::{DeliveryLogId, UserId, WebhookId};
use crm_db::models::{
    DeliveryLogUpdate, UpdateWebhookSubscription, WebhookDeliveryLog, WebhookSubscription,
};
use crm_db::DbPool;

use super::{DeliveryLogStore, SubscriptionStore};
use crate::error::WebhookError;
use crate::models::WebhookEventType;

/// PostgreSQL-backed store for both subscriptions and delivery logs.
#[derive(Debug, Clone)]
pub struct PgWebhookStore {
    pool: DbPool,
}

impl PgWebhookStore {
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for PgWebhookStore {
    async fn insert_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), WebhookError> {
        subscription.insert(self.pool.inner()).await?;
        Ok(())
    }

    async fn find_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        Ok(WebhookSubscription::find_by_id(self.pool.inner(), owner.into_uuid(), id.into_uuid()).await?)
    }

    async fn list_subscriptions(
        &self,
        owner: UserId,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        Ok(WebhookSubscription::list_by_user(self.pool.inner(), owner.into_uuid()).await?)
    }

    async fn update_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
        update: &UpdateWebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        Ok(
            WebhookSubscription::update(self.pool.inner(), owner.into_uuid(), id.into_uuid(), update)
                .await?,
        )
    }

    async fn delete_subscription(&self, owner: UserId, id: WebhookId) -> Result<bool, WebhookError> {
        Ok(WebhookSubscription::delete(self.pool.inner(), owner.into_uuid(), id.into_uuid()).await?)
    }

    async fn find_active(
        &self,
        owner: UserId,
        event: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        Ok(WebhookSubscription::find_active_for_event(
            self.pool.inner(),
            owner.into_uuid(),
            event.as_str(),
        )
        .await?)
    }

    async fn increment_counters(&self, id: WebhookId, success: bool) -> Result<(), WebhookError> {
        WebhookSubscription::increment_counters(self.pool.inner(), id.into_uuid(), success).await?;
        Ok(())
    }

    async fn set_last_triggered(
        &self,
        id: WebhookId,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        WebhookSubscription::set_last_triggered(self.pool.inner(), id.into_uuid(), at).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeliveryLogStore for PgWebhookStore {
    async fn insert_log(&self, log: &WebhookDeliveryLog) -> Result<(), WebhookError> {
        log.insert(self.pool.inner()).await?;
        Ok(())
    }

    async fn update_log(
        &self,
        id: DeliveryLogId,
        update: &DeliveryLogUpdate,
    ) -> Result<bool, WebhookError> {
        Ok(WebhookDeliveryLog::update(self.pool.inner(), id.into_uuid(), update).await?)
    }

    async fn list_logs(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryLog>, WebhookError> {
        Ok(WebhookDeliveryLog::list_by_webhook(self.pool.inner(), webhook_id.into_uuid(), limit).await?)
    }
}
