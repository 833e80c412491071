//! Retry scheduling with exponential backoff.
//!
//! Every failure kind is retried identically: non-2xx responses (4xx
//! included), timeouts and network errors. Attempts within one pipeline are
//! strictly sequential.

use std::time::Duration;

use crm_db::models::WebhookSubscription;
use tokio_util::sync::CancellationToken;

use super::delivery_service::{DeliveryOutcome, DeliveryService, SignedDelivery};

/// Backoff schedule: the wait before attempt `i` (0-indexed, `i >= 1`) is
/// `base_delay * 2^(i-1)`. No jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Wait before the attempt with the given 0-based index.
    #[must_use]
    pub fn delay_before(&self, attempt_index: u32) -> Duration {
        if attempt_index == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt_index - 1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Upper bound on a pipeline's duration for a subscription:
    /// every attempt timing out plus every backoff wait.
    #[must_use]
    pub fn worst_case(&self, retry_count: u32, timeout: Duration) -> Duration {
        let waits = (1..retry_count).fold(Duration::ZERO, |acc, i| {
            acc.saturating_add(self.delay_before(i))
        });
        timeout.saturating_mul(retry_count).saturating_add(waits)
    }
}

/// Terminal result of a delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutcome {
    /// The last observed attempt outcome.
    pub last: DeliveryOutcome,
    /// Number of attempts started, including one cancelled mid-request.
    pub attempt_count: u32,
    /// True if shutdown cut the pipeline short.
    pub abandoned: bool,
    /// True if shutdown cancelled an attempt already sent to the receiver.
    pub attempt_in_flight: bool,
}

impl FinalOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        !self.abandoned && self.last.is_success()
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        if self.abandoned {
            let mut message = String::from("Delivery abandoned during shutdown");
            if self.attempt_in_flight {
                message.push_str("; in-flight attempt cancelled");
            }
            let completed = self.attempt_count - u32::from(self.attempt_in_flight);
            if completed > 0 {
                if let Some(last) = self.last.error_message() {
                    message.push_str("; last error: ");
                    message.push_str(&last);
                }
            }
            return Some(message);
        }
        self.last.error_message()
    }
}

/// Notified after every attempt, before any backoff wait.
#[async_trait::async_trait]
pub trait AttemptObserver: Send + Sync {
    async fn on_attempt(&self, attempt_number: u32, outcome: &DeliveryOutcome);
}

#[async_trait::async_trait]
impl AttemptObserver for () {
    async fn on_attempt(&self, _attempt_number: u32, _outcome: &DeliveryOutcome) {}
}

/// Drives repeated [`DeliveryService::attempt`] calls until success or the
/// subscription's `retry_count` is exhausted.
#[derive(Clone)]
pub struct RetryScheduler {
    delivery: DeliveryService,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl RetryScheduler {
    #[must_use]
    pub fn new(delivery: DeliveryService) -> Self {
        Self {
            delivery,
            policy: RetryPolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Token that, once cancelled, makes in-flight pipelines stop at their
    /// next attempt or backoff wait.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    #[must_use]
    pub fn delivery(&self) -> &DeliveryService {
        &self.delivery
    }

    pub async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        request: &SignedDelivery,
        observer: &dyn AttemptObserver,
    ) -> FinalOutcome {
        let max_attempts = u32::try_from(subscription.retry_count.max(1)).unwrap_or(1);
        let mut last: Option<DeliveryOutcome> = None;

        for attempt_index in 0..max_attempts {
            if attempt_index > 0 {
                let delay = self.policy.delay_before(attempt_index);
                tracing::debug!(
                    target: "webhook_delivery",
                    webhook_id = %subscription.id,
                    attempt_number = attempt_index + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::select! {
                    () = self.shutdown.cancelled() => {
                        return abandoned(last, attempt_index, false);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            if self.shutdown.is_cancelled() {
                return abandoned(last, attempt_index, false);
            }
            let outcome = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    // The request may already have reached the receiver.
                    return abandoned(last, attempt_index + 1, true);
                }
                outcome = self.delivery.attempt(subscription, request) => outcome,
            };

            let attempt_number = attempt_index + 1;
            observer.on_attempt(attempt_number, &outcome).await;

            if outcome.is_success() {
                return FinalOutcome {
                    last: outcome,
                    attempt_count: attempt_number,
                    abandoned: false,
                    attempt_in_flight: false,
                };
            }

            tracing::warn!(
                target: "webhook_delivery",
                webhook_id = %subscription.id,
                event_type = %request.event,
                attempt_number,
                max_attempts,
                status_code = ?outcome.status_code(),
                error = %outcome.error_message().unwrap_or_default(),
                "Delivery attempt failed"
            );
            last = Some(outcome);
        }

        FinalOutcome {
            last: last.unwrap_or_else(|| DeliveryOutcome::NetworkError("No attempt made".into())),
            attempt_count: max_attempts,
            abandoned: false,
            attempt_in_flight: false,
        }
    }
}

fn abandoned(
    last: Option<DeliveryOutcome>,
    attempts_started: u32,
    attempt_in_flight: bool,
) -> FinalOutcome {
    FinalOutcome {
        last: last.unwrap_or_else(|| DeliveryOutcome::NetworkError("Not attempted".into())),
        attempt_count: attempts_started,
        abandoned: true,
        attempt_in_flight,
    }
}
