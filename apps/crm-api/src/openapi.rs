//! OpenAPI document for the API.

use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crm_webhooks::error::ErrorResponse;
use crm_webhooks::handlers::{deliveries, subscriptions};
use crm_webhooks::models::{
    CreateWebhookSubscriptionRequest, CreatedWebhookSubscriptionResponse, DeliveryLogListResponse,
    DeliveryLogResponse, EventTypeInfo, EventTypeListResponse, TestDeliveryResponse,
    UpdateWebhookSubscriptionRequest, WebhookSubscriptionListResponse,
    WebhookSubscriptionResponse,
};
use crm_webhooks::WebhookEventType;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CRM API",
        version = "0.1.0",
        description = "Lead management CRM: outbound webhook subscriptions and delivery logs"
    ),
    servers((url = "/api", description = "API base path")),
    paths(
        subscriptions::create_subscription_handler,
        subscriptions::list_subscriptions_handler,
        subscriptions::get_subscription_handler,
        subscriptions::update_subscription_handler,
        subscriptions::delete_subscription_handler,
        subscriptions::test_subscription_handler,
        subscriptions::list_event_types_handler,
        deliveries::list_delivery_logs_handler,
    ),
    components(schemas(
        ErrorResponse,
        WebhookEventType,
        CreateWebhookSubscriptionRequest,
        UpdateWebhookSubscriptionRequest,
        WebhookSubscriptionResponse,
        CreatedWebhookSubscriptionResponse,
        WebhookSubscriptionListResponse,
        EventTypeInfo,
        EventTypeListResponse,
        TestDeliveryResponse,
        DeliveryLogResponse,
        DeliveryLogListResponse,
    )),
    modifiers(&SecurityAddon),
    tags((name = "Webhooks", description = "Outbound webhook subscriptions and delivery logs"))
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
