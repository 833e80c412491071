//! CRUD and test-delivery handlers for webhook subscriptions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use crm_core::{AuthenticatedUser, WebhookId};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{
    CreateWebhookSubscriptionRequest, CreatedWebhookSubscriptionResponse, EventTypeListResponse,
    TestDeliveryResponse, UpdateWebhookSubscriptionRequest, WebhookSubscriptionListResponse,
    WebhookSubscriptionResponse,
};
use crate::router::WebhooksState;

/// Register a webhook. The response includes the signing secret, once.
#[utoipa::path(
    post,
    path = "/webhooks",
    tag = "Webhooks",
    request_body = CreateWebhookSubscriptionRequest,
    responses(
        (status = 201, description = "Webhook created", body = CreatedWebhookSubscriptionResponse),
        (status = 400, description = "Invalid URL, event set or limits"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateWebhookSubscriptionRequest>,
) -> ApiResult<(StatusCode, Json<CreatedWebhookSubscriptionResponse>)> {
    let response = state
        .subscription_service
        .create_subscription(user.user_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// List the caller's webhooks, newest first.
#[utoipa::path(
    get,
    path = "/webhooks",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Webhook list", body = WebhookSubscriptionListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_subscriptions_handler(
    State(state): State<WebhooksState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<WebhookSubscriptionListResponse>> {
    let response = state
        .subscription_service
        .list_subscriptions(user.user_id)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/webhooks/{id}",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Webhook ID")),
    responses(
        (status = 200, description = "Webhook details", body = WebhookSubscriptionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Webhook not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookSubscriptionResponse>> {
    let response = state
        .subscription_service
        .get_subscription(user.user_id, WebhookId::from_uuid(id))
        .await?;
    Ok(Json(response))
}

/// Partially update a webhook. Absent fields are kept.
#[utoipa::path(
    patch,
    path = "/webhooks/{id}",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Webhook ID")),
    request_body = UpdateWebhookSubscriptionRequest,
    responses(
        (status = 200, description = "Webhook updated", body = WebhookSubscriptionResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Webhook not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateWebhookSubscriptionRequest>,
) -> ApiResult<Json<WebhookSubscriptionResponse>> {
    let response = state
        .subscription_service
        .update_subscription(user.user_id, WebhookId::from_uuid(id), request)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    delete,
    path = "/webhooks/{id}",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Webhook ID")),
    responses(
        (status = 204, description = "Webhook deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Webhook not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .subscription_service
        .delete_subscription(user.user_id, WebhookId::from_uuid(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Queue a synthetic `lead.created` delivery to this webhook.
///
/// Goes through the normal retry and logging pipeline; the outcome shows up
/// in the webhook's delivery logs.
#[utoipa::path(
    post,
    path = "/webhooks/{id}/test",
    tag = "Webhooks",
    params(("id" = Uuid, Path, description = "Webhook ID")),
    responses(
        (status = 202, description = "Test delivery queued", body = TestDeliveryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Webhook not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn test_subscription_handler(
    State(state): State<WebhooksState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TestDeliveryResponse>)> {
    let subscription = state
        .subscription_service
        .find_owned(user.user_id, WebhookId::from_uuid(id))
        .await?;

    state
        .dispatcher
        .dispatch_test(subscription, user.user_id)
        .await;

    Ok((
        StatusCode::ACCEPTED,
        Json(TestDeliveryResponse {
            webhook_id: id,
            message: "Test webhook queued for delivery".to_string(),
        }),
    ))
}

/// The event kinds a webhook can subscribe to.
#[utoipa::path(
    get,
    path = "/webhooks/event-types",
    tag = "Webhooks",
    responses(
        (status = 200, description = "Available event types", body = EventTypeListResponse),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_event_types_handler() -> Json<EventTypeListResponse> {
    Json(EventTypeListResponse::all())
}
