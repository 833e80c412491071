//! Webhook subscription CRUD service.
//!
//! Validates configuration (URL, event set, retry and timeout bounds) before
//! anything is stored, generates and encrypts the signing secret, and scopes
//! every operation to the owning user.

use std::sync::Arc;

use chrono::Utc;
use crm_core::{UserId, WebhookId};
use crm_db::models::{UpdateWebhookSubscription, WebhookSubscription};
use uuid::Uuid;
use validator::Validate;

use crate::crypto::{self, SecretCipher};
use crate::error::WebhookError;
use crate::models::{
    CreateWebhookSubscriptionRequest, CreatedWebhookSubscriptionResponse,
    UpdateWebhookSubscriptionRequest, WebhookEventType, WebhookSubscriptionListResponse,
    WebhookSubscriptionResponse, DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_SECONDS,
};
use crate::store::SubscriptionStore;
use crate::validation;

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    cipher: SecretCipher,
    allow_private_hosts: bool,
}

impl SubscriptionService {
    #[must_use]
    pub fn new(store: Arc<dyn SubscriptionStore>, cipher: SecretCipher) -> Self {
        Self {
            store,
            cipher,
            allow_private_hosts: false,
        }
    }

    /// Allow loopback/private target hosts (development and tests).
    #[must_use]
    pub fn with_allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    /// Create a subscription. The response is the only one carrying the secret.
    pub async fn create_subscription(
        &self,
        owner: UserId,
        request: CreateWebhookSubscriptionRequest,
    ) -> Result<CreatedWebhookSubscriptionResponse, WebhookError> {
        request.validate()?;
        validation::validate_webhook_url(&request.url, self.allow_private_hosts)?;
        let events = validation::validate_event_types(&request.events)?;
        let retry_count = request.retry_count.unwrap_or(DEFAULT_RETRY_COUNT);
        let timeout_seconds = request.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        validation::validate_retry_count(retry_count)?;
        validation::validate_timeout_seconds(timeout_seconds)?;

        let secret = crypto::generate_secret();
        let now = Utc::now();
        let subscription = WebhookSubscription {
            id: Uuid::new_v4(),
            user_id: owner.into_uuid(),
            name: request.name,
            url: request.url,
            event_types: event_names(&events),
            secret_encrypted: self.cipher.seal(&secret)?,
            is_active: true,
            retry_count,
            timeout_seconds,
            created_at: now,
            updated_at: now,
            last_triggered: None,
            total_triggers: 0,
            failed_triggers: 0,
        };

        self.store.insert_subscription(&subscription).await?;

        tracing::info!(
            webhook_id = %subscription.id,
            owner_id = %owner,
            events = ?subscription.event_types,
            "Webhook subscription created"
        );

        Ok(CreatedWebhookSubscriptionResponse {
            subscription: WebhookSubscriptionResponse::from(&subscription),
            secret,
        })
    }

    pub async fn list_subscriptions(
        &self,
        owner: UserId,
    ) -> Result<WebhookSubscriptionListResponse, WebhookError> {
        let subs = self.store.list_subscriptions(owner).await?;
        let items: Vec<_> = subs.iter().map(WebhookSubscriptionResponse::from).collect();
        Ok(WebhookSubscriptionListResponse {
            total: items.len(),
            items,
        })
    }

    pub async fn get_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
    ) -> Result<WebhookSubscriptionResponse, WebhookError> {
        let sub = self.find_owned(owner, id).await?;
        Ok(WebhookSubscriptionResponse::from(&sub))
    }

    /// The full stored subscription, for running a delivery against it.
    pub async fn find_owned(
        &self,
        owner: UserId,
        id: WebhookId,
    ) -> Result<WebhookSubscription, WebhookError> {
        self.store
            .find_subscription(owner, id)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)
    }

    pub async fn update_subscription(
        &self,
        owner: UserId,
        id: WebhookId,
        request: UpdateWebhookSubscriptionRequest,
    ) -> Result<WebhookSubscriptionResponse, WebhookError> {
        request.validate()?;
        if let Some(url) = &request.url {
            validation::validate_webhook_url(url, self.allow_private_hosts)?;
        }
        let event_types = match &request.events {
            Some(events) => Some(event_names(&validation::validate_event_types(events)?)),
            None => None,
        };
        if let Some(retry_count) = request.retry_count {
            validation::validate_retry_count(retry_count)?;
        }
        if let Some(timeout_seconds) = request.timeout_seconds {
            validation::validate_timeout_seconds(timeout_seconds)?;
        }

        let update = UpdateWebhookSubscription {
            name: request.name,
            url: request.url,
            event_types,
            is_active: request.is_active,
            retry_count: request.retry_count,
            timeout_seconds: request.timeout_seconds,
        };

        let sub = self
            .store
            .update_subscription(owner, id, &update)
            .await?
            .ok_or(WebhookError::SubscriptionNotFound)?;

        tracing::info!(
            webhook_id = %sub.id,
            owner_id = %owner,
            is_active = sub.is_active,
            "Webhook subscription updated"
        );

        Ok(WebhookSubscriptionResponse::from(&sub))
    }

    pub async fn delete_subscription(&self, owner: UserId, id: WebhookId) -> Result<(), WebhookError> {
        if !self.store.delete_subscription(owner, id).await? {
            return Err(WebhookError::SubscriptionNotFound);
        }
        tracing::info!(webhook_id = %id, owner_id = %owner, "Webhook subscription deleted");
        Ok(())
    }
}

fn event_names(events: &[WebhookEventType]) -> Vec<String> {
    events.iter().map(|e| e.as_str().to_string()).collect()
}
