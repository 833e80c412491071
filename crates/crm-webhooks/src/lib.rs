//! Outbound webhooks for the CRM.
//!
//! Users register HTTP endpoints for domain events (`lead.created`,
//! `lead.status_changed`, ...). When a producer publishes an event, every
//! active subscription of that event's owner receives a signed POST:
//!
//! ```text
//! EventPublisher::publish ──► WebhookWorker ──► WebhookDispatcher::dispatch
//!                                                  │ one task per subscription
//!                                                  ▼
//!                       AuditLogger::record_start ─► RetryScheduler::deliver
//!                                                  │   └─ DeliveryService::attempt (signed POST)
//!                                                  ▼
//!                       AuditLogger::record_final + update_counters
//! ```
//!
//! The body is the canonical JSON envelope `{data, event, timestamp,
//! webhook_id}` and `X-Webhook-Signature` is `sha256=<hex HMAC-SHA256>` of
//! exactly those bytes, keyed by the subscription's secret.

pub mod crypto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod signer;
pub mod store;
pub mod validation;
pub mod worker;

pub use error::{ApiResult, WebhookError};
pub use models::{EventData, WebhookEnvelope, WebhookEventType};
pub use router::{webhooks_router, WebhooksState};
pub use services::{
    DeliveryOutcome, DeliveryService, EventPublisher, FinalOutcome, RetryPolicy,
    ShutdownOutcome, SubscriptionService, WebhookDispatcher, WebhookEvent,
};
pub use store::{DeliveryLogStore, InMemoryWebhookStore, PgWebhookStore, SubscriptionStore};
pub use worker::WebhookWorker;
