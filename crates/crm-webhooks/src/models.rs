//! Event kinds, wire envelope and API request/response types.

use chrono::{DateTime, Utc};
use crm_db::models::{WebhookDeliveryLog, WebhookSubscription};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::error::WebhookError;

pub const DEFAULT_RETRY_COUNT: i32 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 30;
pub const MAX_RETRY_COUNT: i32 = 10;
pub const MAX_TIMEOUT_SECONDS: i32 = 300;

pub const DEFAULT_LOG_LIMIT: i64 = 50;
pub const MAX_LOG_LIMIT: i64 = 500;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// The fixed set of domain events a subscription can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum WebhookEventType {
    #[serde(rename = "lead.created")]
    LeadCreated,
    #[serde(rename = "lead.updated")]
    LeadUpdated,
    #[serde(rename = "lead.status_changed")]
    LeadStatusChanged,
    #[serde(rename = "lead.deleted")]
    LeadDeleted,
    #[serde(rename = "user.registered")]
    UserRegistered,
}

impl WebhookEventType {
    pub const ALL: [WebhookEventType; 5] = [
        WebhookEventType::LeadCreated,
        WebhookEventType::LeadUpdated,
        WebhookEventType::LeadStatusChanged,
        WebhookEventType::LeadDeleted,
        WebhookEventType::UserRegistered,
    ];

    /// Wire name, as sent in `X-Webhook-Event` and the envelope's `event` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            WebhookEventType::LeadCreated => "lead.created",
            WebhookEventType::LeadUpdated => "lead.updated",
            WebhookEventType::LeadStatusChanged => "lead.status_changed",
            WebhookEventType::LeadDeleted => "lead.deleted",
            WebhookEventType::UserRegistered => "user.registered",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == s)
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            WebhookEventType::LeadCreated => "A new lead was created",
            WebhookEventType::LeadUpdated => "A lead's fields were updated",
            WebhookEventType::LeadStatusChanged => "A lead moved to a different pipeline status",
            WebhookEventType::LeadDeleted => "A lead was deleted",
            WebhookEventType::UserRegistered => "A new user account was registered",
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event data and envelope
// ---------------------------------------------------------------------------

/// Event-specific data carried in an envelope.
///
/// Always a JSON object. Built from a `Serialize` value, so identifiers and
/// timestamps are already plain strings (uuid and chrono serialize that way)
/// by the time the data reaches the signer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventData(Map<String, Value>);

impl EventData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes `value`, which must produce a JSON object.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self, WebhookError> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(WebhookError::Validation(format!(
                "Event data must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Data for `lead.status_changed`: `{lead, old_status, new_status}`.
    pub fn status_change<T: Serialize + ?Sized>(
        lead: &T,
        old_status: &str,
        new_status: &str,
    ) -> Result<Self, WebhookError> {
        Ok(Self::new()
            .with("lead", serde_json::to_value(lead)?)
            .with("old_status", old_status)
            .with("new_status", new_status))
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The JSON body POSTed to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: WebhookEventType,
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
    pub webhook_id: Uuid,
}

impl WebhookEnvelope {
    pub fn to_value(&self) -> Result<Value, WebhookError> {
        Ok(serde_json::to_value(self)?)
    }
}

// ---------------------------------------------------------------------------
// Subscription requests / responses
// ---------------------------------------------------------------------------

/// Body of `POST /webhooks`.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateWebhookSubscriptionRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    /// Event names, e.g. `["lead.created", "lead.status_changed"]`.
    pub events: Vec<String>,
    #[validate(range(min = 1, max = 10))]
    pub retry_count: Option<i32>,
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: Option<i32>,
}

/// Body of `PUT|PATCH /webhooks/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateWebhookSubscriptionRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 2048))]
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub is_active: Option<bool>,
    #[validate(range(min = 1, max = 10))]
    pub retry_count: Option<i32>,
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: Option<i32>,
}

/// A subscription as returned by the API. Never carries the secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookSubscriptionResponse {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub retry_count: i32,
    pub timeout_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub total_triggers: i64,
    pub failed_triggers: i64,
}

impl From<&WebhookSubscription> for WebhookSubscriptionResponse {
    fn from(sub: &WebhookSubscription) -> Self {
        Self {
            id: sub.id,
            name: sub.name.clone(),
            url: sub.url.clone(),
            events: sub.event_types.clone(),
            is_active: sub.is_active,
            retry_count: sub.retry_count,
            timeout_seconds: sub.timeout_seconds,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
            last_triggered: sub.last_triggered,
            total_triggers: sub.total_triggers,
            failed_triggers: sub.failed_triggers,
        }
    }
}

/// Creation response: the only place the signing secret is ever returned.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedWebhookSubscriptionResponse {
    #[serde(flatten)]
    pub subscription: WebhookSubscriptionResponse,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookSubscriptionListResponse {
    pub items: Vec<WebhookSubscriptionResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeInfo {
    pub event: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeListResponse {
    pub items: Vec<EventTypeInfo>,
}

impl EventTypeListResponse {
    #[must_use]
    pub fn all() -> Self {
        Self {
            items: WebhookEventType::ALL
                .into_iter()
                .map(|e| EventTypeInfo {
                    event: e.as_str().to_string(),
                    description: e.description().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestDeliveryResponse {
    pub webhook_id: Uuid,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Delivery logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListDeliveryLogsQuery {
    /// Maximum number of logs to return (default 50, max 500).
    pub limit: Option<i64>,
}

impl ListDeliveryLogsQuery {
    #[must_use]
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LOG_LIMIT)
            .clamp(1, MAX_LOG_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryLogResponse {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: i32,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
}

impl From<WebhookDeliveryLog> for DeliveryLogResponse {
    fn from(log: WebhookDeliveryLog) -> Self {
        Self {
            id: log.id,
            webhook_id: log.webhook_id,
            event: log.event_type,
            payload: log.payload,
            response_status: log.response_status,
            response_body: log.response_body,
            error_message: log.error_message,
            attempt_count: log.attempt_count,
            triggered_at: log.triggered_at,
            completed_at: log.completed_at,
            success: log.success,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeliveryLogListResponse {
    pub items: Vec<DeliveryLogResponse>,
    pub total: usize,
}
