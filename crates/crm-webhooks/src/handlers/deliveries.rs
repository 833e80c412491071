//! Delivery log handlers.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use crm_core::{AuthenticatedUser, WebhookId};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{DeliveryLogListResponse, DeliveryLogResponse, ListDeliveryLogsQuery};
use crate::router::WebhooksState;

/// Delivery logs of one webhook, newest first.
#[utoipa::path(
    get,
    path = "/webhooks/{id}/logs",
    tag = "Webhooks",
    params(
        ("id" = Uuid, Path, description = "Webhook ID"),
        ListDeliveryLogsQuery,
    ),
    responses(
        (status = 200, description = "Delivery logs", body = DeliveryLogListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Webhook not found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_delivery_logs_handler(
    State(state): State<WebhooksState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListDeliveryLogsQuery>,
) -> ApiResult<Json<DeliveryLogListResponse>> {
    let webhook_id = WebhookId::from_uuid(id);

    // Ownership check; a foreign webhook is indistinguishable from a missing one.
    state
        .subscription_service
        .find_owned(user.user_id, webhook_id)
        .await?;

    let logs = state
        .delivery_logs
        .list_logs(webhook_id, query.effective_limit())
        .await?;

    let items: Vec<_> = logs.into_iter().map(DeliveryLogResponse::from).collect();
    Ok(Json(DeliveryLogListResponse {
        total: items.len(),
        items,
    }))
}
