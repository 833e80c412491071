//! Background worker feeding published events to the dispatcher.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::services::dispatcher::{ShutdownOutcome, WebhookDispatcher};
use crate::services::event_publisher::WebhookEvent;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the receiving end of the event channel for the process lifetime.
///
/// Runs until `shutdown` is cancelled or every publisher is dropped, then
/// drains the dispatcher's in-flight pipelines.
pub struct WebhookWorker {
    dispatcher: WebhookDispatcher,
    receiver: mpsc::Receiver<WebhookEvent>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl WebhookWorker {
    #[must_use]
    pub fn new(
        dispatcher: WebhookDispatcher,
        receiver: mpsc::Receiver<WebhookEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            receiver,
            shutdown,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub async fn run(mut self) -> ShutdownOutcome {
        tracing::info!(target: "webhook_delivery", "Webhook worker started");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::info!(target: "webhook_delivery", "Webhook worker received shutdown signal");
                    break;
                }
                event = self.receiver.recv() => match event {
                    Some(event) => {
                        self.dispatcher.dispatch(&event).await;
                    }
                    None => {
                        tracing::info!(target: "webhook_delivery", "Webhook event channel closed");
                        break;
                    }
                },
            }
        }

        // Events still queued were accepted from producers; hand them over
        // before draining.
        self.receiver.close();
        while let Ok(event) = self.receiver.try_recv() {
            self.dispatcher.dispatch(&event).await;
        }

        let outcome = self.dispatcher.shutdown(self.drain_timeout).await;
        tracing::info!(target: "webhook_delivery", ?outcome, "Webhook worker stopped");
        outcome
    }
}
