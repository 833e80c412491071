//! Axum router setup for webhook endpoints.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{deliveries, subscriptions};
use crate::services::dispatcher::WebhookDispatcher;
use crate::services::subscription_service::SubscriptionService;
use crate::store::DeliveryLogStore;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhooksState {
    pub subscription_service: Arc<SubscriptionService>,
    pub dispatcher: WebhookDispatcher,
    pub delivery_logs: Arc<dyn DeliveryLogStore>,
}

impl WebhooksState {
    pub fn new(
        subscription_service: SubscriptionService,
        dispatcher: WebhookDispatcher,
        delivery_logs: Arc<dyn DeliveryLogStore>,
    ) -> Self {
        Self {
            subscription_service: Arc::new(subscription_service),
            dispatcher,
            delivery_logs,
        }
    }
}

/// Webhook management routes. Expects an [`crm_core::AuthenticatedUser`]
/// request extension, inserted by the caller's auth layer.
pub fn webhooks_router(state: WebhooksState) -> Router {
    Router::new()
        .route(
            "/webhooks",
            post(subscriptions::create_subscription_handler)
                .get(subscriptions::list_subscriptions_handler),
        )
        .route(
            "/webhooks/event-types",
            get(subscriptions::list_event_types_handler),
        )
        .route(
            "/webhooks/:id",
            get(subscriptions::get_subscription_handler)
                .put(subscriptions::update_subscription_handler)
                .patch(subscriptions::update_subscription_handler)
                .delete(subscriptions::delete_subscription_handler),
        )
        .route(
            "/webhooks/:id/test",
            post(subscriptions::test_subscription_handler),
        )
        .route(
            "/webhooks/:id/logs",
            get(deliveries::list_delivery_logs_handler),
        )
        .with_state(state)
}
