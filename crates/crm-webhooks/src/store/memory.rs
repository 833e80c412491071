use std::collections::HashMap;

use chrono::{DateTime, Utc};
use crm_core::{DeliveryLogId, UserId, WebhookId};
use crm_db::models::{
    DeliveryLogUpdate, UpdateWebhookSubscription, WebhookDeliveryLog, WebhookSubscription,
    MAX_MATCHING_SUBSCRIPTIONS,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DeliveryLogStore, SubscriptionStore};
use crate::error::WebhookError;
use crate::models::WebhookEventType;

/// In-memory store (for testing and local development).
///
/// Each mutation runs under a single write lock, so counter increments are
/// atomic with respect to one another.
#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    subscriptions: RwLock<HashMap<Uuid, WebhookSubscription>>,
    logs: RwLock<HashMap<Uuid, WebhookDeliveryLog>>,
}

impl InMemoryWebhookStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unscoped lookup, for assertions.
    pub async fn subscription(&self, id: WebhookId) -> Option<WebhookSubscription> {
        self.subscriptions.read().await.get(id.as_uuid()).cloned()
    }

    /// All logs of a subscription, oldest first, for assertions.
    pub async fn logs_for(&self, webhook_id: WebhookId) -> Vec<WebhookDeliveryLog> {
        let logs = self.logs.read().await;
        let mut result: Vec<_> = logs
            .values()
            .filter(|l| l.webhook_id == *webhook_id.as_uuid())
            .cloned()
            .collect();
        result.sort_by_key(|l| l.triggered_at);
        result
    }

    pub async fn log_count(&self) -> usize {
        self.logs.read().await.len()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemoryWebhookStore {
    async fn insert_subscription(
        &self,
        subscription: &WebhookSubscription,
    ) -> Result<(), WebhookError> {
        let mut subs = self.subscriptions.write().await;
        if subs.contains_key(&subscription.id) {
            return Err(WebhookError::Store(format!(
                "Subscription {} already exists",
                subscription.id
            )));
        }
        subs.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let subs = self.subscriptions.read().await;
        Ok(subs
            .get(id.as_uuid())
            .filter(|s| s.user_id == *owner.as_uuid())
            .cloned())
    }

    async fn list_subscriptions(
        &self,
        owner: UserId,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let subs = self.subscriptions.read().await;
        let mut result: Vec<_> = subs
            .values()
            .filter(|s| s.user_id == *owner.as_uuid())
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn update_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
        update: &UpdateWebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, WebhookError> {
        let mut subs = self.subscriptions.write().await;
        match subs
            .get_mut(id.as_uuid())
            .filter(|s| s.user_id == *owner.as_uuid())
        {
            Some(sub) => {
                sub.apply_update(update, Utc::now());
                Ok(Some(sub.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_subscription(&self, owner: UserId, id: WebhookId) -> Result<bool, WebhookError> {
        let mut subs = self.subscriptions.write().await;
        let owned = subs
            .get(id.as_uuid())
            .is_some_and(|s| s.user_id == *owner.as_uuid());
        if !owned {
            return Ok(false);
        }
        subs.remove(id.as_uuid());
        drop(subs);

        // Mirrors ON DELETE CASCADE.
        self.logs
            .write()
            .await
            .retain(|_, log| log.webhook_id != *id.as_uuid());
        Ok(true)
    }

    async fn find_active(
        &self,
        owner: UserId,
        event: WebhookEventType,
    ) -> Result<Vec<WebhookSubscription>, WebhookError> {
        let subs = self.subscriptions.read().await;
        let mut result: Vec<_> = subs
            .values()
            .filter(|s| {
                s.user_id == *owner.as_uuid() && s.is_active && s.subscribes_to(event.as_str())
            })
            .cloned()
            .collect();
        result.sort_by_key(|s| s.created_at);
        result.truncate(MAX_MATCHING_SUBSCRIPTIONS as usize);
        Ok(result)
    }

    async fn increment_counters(&self, id: WebhookId, success: bool) -> Result<(), WebhookError> {
        let mut subs = self.subscriptions.write().await;
        if let Some(sub) = subs.get_mut(id.as_uuid()) {
            sub.total_triggers += 1;
            if !success {
                sub.failed_triggers += 1;
            }
        }
        Ok(())
    }

    async fn set_last_triggered(
        &self,
        id: WebhookId,
        at: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let mut subs = self.subscriptions.write().await;
        if let Some(sub) = subs.get_mut(id.as_uuid()) {
            sub.last_triggered = Some(at);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeliveryLogStore for InMemoryWebhookStore {
    async fn insert_log(&self, log: &WebhookDeliveryLog) -> Result<(), WebhookError> {
        self.logs.write().await.insert(log.id, log.clone());
        Ok(())
    }

    async fn update_log(
        &self,
        id: DeliveryLogId,
        update: &DeliveryLogUpdate,
    ) -> Result<bool, WebhookError> {
        let mut logs = self.logs.write().await;
        Ok(logs
            .get_mut(id.as_uuid())
            .is_some_and(|log| log.apply_update(update)))
    }

    async fn list_logs(
        &self,
        webhook_id: WebhookId,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryLog>, WebhookError> {
        let logs = self.logs.read().await;
        let mut result: Vec<_> = logs
            .values()
            .filter(|l| l.webhook_id == *webhook_id.as_uuid())
            .cloned()
            .collect();
        result.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        result.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn subscription(owner: Uuid, events: &[&str]) -> WebhookSubscription {
        let now = Utc::now();
        WebhookSubscription {
            id: Uuid::new_v4(),
            user_id: owner,
            name: "test".into(),
            url: "https://example.com/hook".into(),
            event_types: events.iter().map(|e| (*e).to_string()).collect(),
            secret_encrypted: String::new(),
            is_active: true,
            retry_count: 3,
            timeout_seconds: 30,
            created_at: now,
            updated_at: now,
            last_triggered: None,
            total_triggers: 0,
            failed_triggers: 0,
        }
    }

    #[tokio::test]
    async fn find_active_respects_owner_event_and_active_flag() {
        let store = InMemoryWebhookStore::new();
        let owner = UserId::new();
        let other = UserId::new();

        let matching = subscription(owner.into_uuid(), &["lead.created"]);
        let mut inactive = subscription(owner.into_uuid(), &["lead.created"]);
        inactive.is_active = false;
        let wrong_event = subscription(owner.into_uuid(), &["lead.deleted"]);
        let foreign = subscription(other.into_uuid(), &["lead.created"]);

        for s in [&matching, &inactive, &wrong_event, &foreign] {
            store.insert_subscription(s).await.unwrap();
        }

        let found = store
            .find_active(owner, WebhookEventType::LeadCreated)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, matching.id);
    }

    #[tokio::test]
    async fn foreign_owner_cannot_read_update_or_delete() {
        let store = InMemoryWebhookStore::new();
        let owner = UserId::new();
        let intruder = UserId::new();
        let sub = subscription(owner.into_uuid(), &["lead.created"]);
        store.insert_subscription(&sub).await.unwrap();
        let id = WebhookId::from_uuid(sub.id);

        assert!(store.find_subscription(intruder, id).await.unwrap().is_none());
        let update = UpdateWebhookSubscription {
            name: Some("hijacked".into()),
            ..Default::default()
        };
        assert!(store
            .update_subscription(intruder, id, &update)
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete_subscription(intruder, id).await.unwrap());
        assert_eq!(store.subscription(id).await.unwrap().name, "test");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryWebhookStore::new());
        let sub = subscription(Uuid::new_v4(), &["lead.created"]);
        store.insert_subscription(&sub).await.unwrap();
        let id = WebhookId::from_uuid(sub.id);

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.increment_counters(id, i % 5 != 0).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let sub = store.subscription(id).await.unwrap();
        assert_eq!(sub.total_triggers, 50);
        assert_eq!(sub.failed_triggers, 10);
    }

    #[tokio::test]
    async fn list_logs_is_newest_first_and_limited() {
        let store = InMemoryWebhookStore::new();
        let webhook = Uuid::new_v4();
        let base = Utc::now();
        for i in 0..5 {
            let log = WebhookDeliveryLog::pending(
                webhook,
                "lead.created",
                json!({"n": i}),
                base + chrono::Duration::seconds(i),
            );
            store.insert_log(&log).await.unwrap();
        }

        let logs = store
            .list_logs(WebhookId::from_uuid(webhook), 3)
            .await
            .unwrap();
        let ns: Vec<_> = logs.iter().map(|l| l.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, [4, 3, 2]);
    }

    #[tokio::test]
    async fn deleting_a_subscription_drops_its_logs() {
        let store = InMemoryWebhookStore::new();
        let owner = UserId::new();
        let sub = subscription(owner.into_uuid(), &["lead.created"]);
        store.insert_subscription(&sub).await.unwrap();
        let log = WebhookDeliveryLog::pending(sub.id, "lead.created", json!({}), Utc::now());
        store.insert_log(&log).await.unwrap();

        assert!(store
            .delete_subscription(owner, WebhookId::from_uuid(sub.id))
            .await
            .unwrap());
        assert_eq!(store.log_count().await, 0);
    }
}
