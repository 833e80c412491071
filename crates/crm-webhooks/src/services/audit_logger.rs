//! Delivery log and counter persistence for delivery pipelines.
//!
//! Every write here is best-effort: a store failure is logged and swallowed,
//! and never interrupts the pipeline or undoes a delivery already made.

use std::sync::Arc;

use chrono::Utc;
use crm_core::{DeliveryLogId, WebhookId};
use crm_db::models::{DeliveryLogUpdate, WebhookDeliveryLog, WebhookSubscription};
use serde_json::Value;

use super::delivery_service::DeliveryOutcome;
use super::retry::{AttemptObserver, FinalOutcome};
use crate::models::WebhookEnvelope;
use crate::store::{DeliveryLogStore, SubscriptionStore};

/// Identifies the log row owned by one running pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLogHandle {
    pub id: DeliveryLogId,
    pub webhook_id: WebhookId,
    /// False when the initial insert failed; later updates are then skipped.
    pub persisted: bool,
}

#[derive(Clone)]
pub struct AuditLogger {
    subscriptions: Arc<dyn SubscriptionStore>,
    logs: Arc<dyn DeliveryLogStore>,
}

impl AuditLogger {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, logs: Arc<dyn DeliveryLogStore>) -> Self {
        Self {
            subscriptions,
            logs,
        }
    }

    /// Insert the pipeline's log row before the first attempt and stamp the
    /// subscription's `last_triggered`.
    pub async fn record_start(
        &self,
        subscription: &WebhookSubscription,
        envelope: &WebhookEnvelope,
    ) -> DeliveryLogHandle {
        let webhook_id = WebhookId::from_uuid(subscription.id);
        let triggered_at = Utc::now();

        let payload = envelope.to_value().unwrap_or_else(|e| {
            tracing::error!(
                target: "webhook_delivery",
                webhook_id = %webhook_id,
                error = %e,
                "Failed to serialize envelope for delivery log"
            );
            Value::Null
        });

        let log = WebhookDeliveryLog::pending(
            subscription.id,
            envelope.event.as_str(),
            payload,
            triggered_at,
        );
        let id = DeliveryLogId::from_uuid(log.id);

        let persisted = match self.logs.insert_log(&log).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    webhook_id = %webhook_id,
                    log_id = %id,
                    error = %e,
                    "Failed to insert delivery log"
                );
                false
            }
        };

        if let Err(e) = self
            .subscriptions
            .set_last_triggered(webhook_id, triggered_at)
            .await
        {
            tracing::error!(
                target: "webhook_delivery",
                webhook_id = %webhook_id,
                error = %e,
                "Failed to update last_triggered"
            );
        }

        DeliveryLogHandle {
            id,
            webhook_id,
            persisted,
        }
    }

    /// Record the state after one attempt; the log stays open.
    pub async fn record_attempt(
        &self,
        handle: &DeliveryLogHandle,
        attempt_number: u32,
        outcome: &DeliveryOutcome,
    ) {
        let update = DeliveryLogUpdate {
            attempt_count: to_i32(attempt_number),
            response_status: outcome.status_code().map(i32::from),
            response_body: outcome.body().map(str::to_owned),
            error_message: outcome.error_message(),
            success: false,
            completed_at: None,
        };
        self.write(handle, &update, "Failed to record delivery attempt")
            .await;
    }

    /// Finalize the log with the pipeline's terminal outcome.
    pub async fn record_final(&self, handle: &DeliveryLogHandle, outcome: &FinalOutcome) {
        let update = DeliveryLogUpdate {
            attempt_count: to_i32(outcome.attempt_count),
            response_status: outcome.last.status_code().map(i32::from),
            response_body: outcome.last.body().map(str::to_owned),
            error_message: outcome.error_message(),
            success: outcome.success(),
            completed_at: Some(Utc::now()),
        };
        self.write(handle, &update, "Failed to finalize delivery log")
            .await;
    }

    /// `total_triggers += 1`, and `failed_triggers += 1` unless `success`.
    pub async fn update_counters(&self, webhook_id: WebhookId, success: bool) {
        if let Err(e) = self
            .subscriptions
            .increment_counters(webhook_id, success)
            .await
        {
            tracing::error!(
                target: "webhook_delivery",
                webhook_id = %webhook_id,
                success,
                error = %e,
                "Failed to update webhook counters"
            );
        }
    }

    /// An [`AttemptObserver`] that writes each attempt into `handle`'s row.
    #[must_use]
    pub fn attempt_recorder<'a>(&'a self, handle: &'a DeliveryLogHandle) -> LogAttemptRecorder<'a> {
        LogAttemptRecorder {
            audit: self,
            handle,
        }
    }

    async fn write(&self, handle: &DeliveryLogHandle, update: &DeliveryLogUpdate, failure: &str) {
        if !handle.persisted {
            return;
        }
        match self.logs.update_log(handle.id, update).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                target: "webhook_delivery",
                webhook_id = %handle.webhook_id,
                log_id = %handle.id,
                "Delivery log missing or already finalized; update skipped"
            ),
            Err(e) => tracing::error!(
                target: "webhook_delivery",
                webhook_id = %handle.webhook_id,
                log_id = %handle.id,
                error = %e,
                "{failure}"
            ),
        }
    }
}

pub struct LogAttemptRecorder<'a> {
    audit: &'a AuditLogger,
    handle: &'a DeliveryLogHandle,
}

#[async_trait::async_trait]
impl AttemptObserver for LogAttemptRecorder<'_> {
    async fn on_attempt(&self, attempt_number: u32, outcome: &DeliveryOutcome) {
        self.audit
            .record_attempt(self.handle, attempt_number, outcome)
            .await;
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
