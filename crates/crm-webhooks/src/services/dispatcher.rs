//! Fan-out of events to matching subscriptions.
//!
//! Each (subscription, event) pair becomes an independent pipeline on a
//! process-owned [`TaskTracker`], bounded by a semaphore. The pipeline's log
//! row is written at dispatch time, so queued pipelines are already audited.
//! Pipelines are never awaited by the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crm_core::{UserId, WebhookId};
use crm_db::models::WebhookSubscription;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::audit_logger::{AuditLogger, DeliveryLogHandle};
use super::delivery_service::{DeliveryOutcome, DeliveryService};
use super::event_publisher::WebhookEvent;
use super::retry::{FinalOutcome, RetryPolicy, RetryScheduler};
use crate::models::{EventData, WebhookEnvelope, WebhookEventType};
use crate::store::{DeliveryLogStore, SubscriptionStore};

pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 64;

/// After the drain window, abandoned pipelines get this long to finalize
/// their logs.
const ABANDON_GRACE: Duration = Duration::from_secs(5);

pub const TEST_DELIVERY_MESSAGE: &str = "This is a test webhook from CRM System";

/// How shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every pipeline reached its terminal outcome within the drain window.
    Drained,
    /// The drain window elapsed; this many pipelines were cancelled.
    Abandoned { pipelines: usize },
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    subscriptions: Arc<dyn SubscriptionStore>,
    scheduler: RetryScheduler,
    audit: AuditLogger,
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    active: Arc<watch::Sender<usize>>,
}

/// Counts one pipeline in `active` from dispatch until its task ends.
struct ActivePipeline(Arc<watch::Sender<usize>>);

impl ActivePipeline {
    fn enter(active: &Arc<watch::Sender<usize>>) -> Self {
        active.send_modify(|n| *n += 1);
        Self(active.clone())
    }
}

impl Drop for ActivePipeline {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl WebhookDispatcher {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        logs: Arc<dyn DeliveryLogStore>,
        delivery: DeliveryService,
    ) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            audit: AuditLogger::new(subscriptions.clone(), logs),
            subscriptions,
            scheduler: RetryScheduler::new(delivery).with_shutdown(shutdown.clone()),
            tracker: TaskTracker::new(),
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_DELIVERIES)),
            shutdown,
            active: Arc::new(watch::channel(0).0),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.scheduler = self.scheduler.with_policy(policy);
        self
    }

    /// Bound on pipelines making progress at once; extra pipelines queue.
    #[must_use]
    pub fn with_max_concurrent_deliveries(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Resolve `event`'s matching subscriptions and start one pipeline each.
    ///
    /// Awaits the subscription lookup and each pipeline's pending log row,
    /// never the deliveries. Returns the number of pipelines started; zero
    /// matches is not an error and has no effect.
    pub async fn dispatch(&self, event: &WebhookEvent) -> usize {
        let matches = match self
            .subscriptions
            .find_active(event.owner_id, event.event_type)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    owner_id = %event.owner_id,
                    error = %e,
                    "Failed to resolve webhook subscriptions"
                );
                return 0;
            }
        };

        if matches.is_empty() {
            tracing::debug!(
                target: "webhook_delivery",
                event_id = %event.event_id,
                event_type = %event.event_type,
                "No matching webhook subscriptions"
            );
            return 0;
        }

        tracing::info!(
            target: "webhook_delivery",
            event_id = %event.event_id,
            event_type = %event.event_type,
            subscription_count = matches.len(),
            "Dispatching event to webhook subscriptions"
        );

        let count = matches.len();
        for subscription in matches {
            let envelope = WebhookEnvelope {
                event: event.event_type,
                data: event.data.clone(),
                timestamp: event.timestamp,
                webhook_id: subscription.id,
            };
            self.spawn_pipeline(subscription, envelope).await;
        }
        count
    }

    /// Send a synthetic `lead.created` envelope to one subscription through
    /// the normal pipeline, regardless of its event filter or active flag.
    pub async fn dispatch_test(&self, subscription: WebhookSubscription, requested_by: UserId) {
        let now = Utc::now();
        let data = EventData::new()
            .with("test", true)
            .with("message", TEST_DELIVERY_MESSAGE)
            .with("timestamp", now.to_rfc3339())
            .with("user_id", requested_by.to_string());
        let envelope = WebhookEnvelope {
            event: WebhookEventType::LeadCreated,
            data,
            timestamp: now,
            webhook_id: subscription.id,
        };

        tracing::info!(
            target: "webhook_delivery",
            webhook_id = %subscription.id,
            "Queueing test delivery"
        );
        self.spawn_pipeline(subscription, envelope).await;
    }

    async fn spawn_pipeline(&self, subscription: WebhookSubscription, envelope: WebhookEnvelope) {
        let active = ActivePipeline::enter(&self.active);
        let handle = self.audit.record_start(&subscription, &envelope).await;
        let this = self.clone();
        self.tracker.spawn(async move {
            let _active = active;
            // Queued pipelines cancelled by shutdown run without a permit; the
            // scheduler then finalizes them as abandoned without sending.
            let _permit = tokio::select! {
                permit = this.permits.clone().acquire_owned() => permit.ok(),
                () = this.shutdown.cancelled() => None,
            };
            this.run_pipeline(&subscription, &envelope, &handle).await;
        });
    }

    /// Run one full pipeline inline: log start, attempts with retries, final
    /// log, counters.
    pub async fn deliver_now(
        &self,
        subscription: &WebhookSubscription,
        envelope: &WebhookEnvelope,
    ) -> FinalOutcome {
        let handle = self.audit.record_start(subscription, envelope).await;
        self.run_pipeline(subscription, envelope, &handle).await
    }

    async fn run_pipeline(
        &self,
        subscription: &WebhookSubscription,
        envelope: &WebhookEnvelope,
        handle: &DeliveryLogHandle,
    ) -> FinalOutcome {
        let outcome = match self.scheduler.delivery().prepare(subscription, envelope) {
            Ok(request) => {
                let recorder = self.audit.attempt_recorder(handle);
                self.scheduler.deliver(subscription, &request, &recorder).await
            }
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    webhook_id = %subscription.id,
                    error = %e,
                    "Failed to prepare webhook delivery"
                );
                FinalOutcome {
                    last: DeliveryOutcome::NetworkError(format!("Failed to prepare delivery: {e}")),
                    attempt_count: 0,
                    abandoned: false,
                    attempt_in_flight: false,
                }
            }
        };

        self.audit.record_final(handle, &outcome).await;
        self.audit
            .update_counters(WebhookId::from_uuid(subscription.id), outcome.success())
            .await;

        if outcome.success() {
            tracing::info!(
                target: "webhook_delivery",
                webhook_id = %subscription.id,
                event_type = %envelope.event,
                log_id = %handle.id,
                attempt_count = outcome.attempt_count,
                status_code = ?outcome.last.status_code(),
                "Webhook delivered"
            );
        } else {
            tracing::warn!(
                target: "webhook_delivery",
                webhook_id = %subscription.id,
                event_type = %envelope.event,
                log_id = %handle.id,
                attempt_count = outcome.attempt_count,
                abandoned = outcome.abandoned,
                error = %outcome.error_message().unwrap_or_default(),
                "Webhook delivery failed"
            );
        }

        outcome
    }

    /// Pipelines spawned and not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until no dispatched pipeline is running. Leaves the tracker
    /// untouched, so it is safe to call while `shutdown` runs.
    pub async fn wait_idle(&self) {
        let mut active = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = active.wait_for(|n| *n == 0).await;
    }

    /// Wait up to `drain_timeout` for in-flight pipelines. Whatever is still
    /// running afterwards is cancelled and finalizes its log as abandoned.
    ///
    /// Call once, after event intake has stopped.
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownOutcome {
        self.tracker.close();
        tracing::info!(
            target: "webhook_delivery",
            in_flight = self.tracker.len(),
            drain_timeout_secs = drain_timeout.as_secs(),
            "Draining webhook deliveries"
        );

        if tokio::time::timeout(drain_timeout, self.tracker.wait())
            .await
            .is_ok()
        {
            tracing::info!(target: "webhook_delivery", "Webhook deliveries drained");
            return ShutdownOutcome::Drained;
        }

        let pipelines = self.tracker.len();
        tracing::warn!(
            target: "webhook_delivery",
            pipelines,
            "Drain timeout elapsed; abandoning in-flight webhook deliveries"
        );
        self.shutdown.cancel();

        if tokio::time::timeout(ABANDON_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::error!(
                target: "webhook_delivery",
                remaining = self.tracker.len(),
                "Abandoned webhook deliveries did not finish finalizing"
            );
        }
        ShutdownOutcome::Abandoned { pipelines }
    }
}
