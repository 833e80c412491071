//! Single-attempt webhook delivery.
//!
//! [`DeliveryService::prepare`] signs an envelope once per pipeline and
//! [`DeliveryService::attempt`] performs exactly one POST, classifying the
//! result. Retrying is the scheduler's job.

use std::time::{Duration, Instant};

use crm_db::models::WebhookSubscription;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;

use crate::crypto::SecretCipher;
use crate::error::WebhookError;
use crate::models::{WebhookEnvelope, WebhookEventType};
use crate::signer;

pub const DEFAULT_USER_AGENT: &str = "CRM-Webhook/1.0";

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// Response bodies are truncated to this many characters before logging.
pub const MAX_RESPONSE_BODY_CHARS: usize = 4096;

/// A signed, ready-to-send delivery for one (subscription, event) pair.
#[derive(Debug, Clone)]
pub struct SignedDelivery {
    pub event: WebhookEventType,
    /// Canonical JSON bytes; exactly what was signed.
    pub body: Vec<u8>,
    pub signature: String,
    /// The envelope as stored in the delivery log.
    pub payload: serde_json::Value,
}

/// Classified result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx response.
    Success { status_code: u16, body: String },
    /// Any other HTTP status.
    HttpFailure { status_code: u16, body: String },
    /// No response within the subscription's timeout.
    Timeout { timeout_seconds: u64 },
    /// Connection refused, DNS failure, TLS error and the like.
    NetworkError(String),
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success { .. })
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DeliveryOutcome::Success { status_code, .. }
            | DeliveryOutcome::HttpFailure { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Success { body, .. } | DeliveryOutcome::HttpFailure { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }

    /// Human-readable failure description; `None` on success.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Success { .. } => None,
            DeliveryOutcome::HttpFailure { status_code, body } => {
                Some(format!("HTTP {status_code}: {body}"))
            }
            DeliveryOutcome::Timeout { timeout_seconds } => {
                Some(format!("Request timeout ({timeout_seconds}s)"))
            }
            DeliveryOutcome::NetworkError(message) => Some(message.clone()),
        }
    }

    /// Classify a received HTTP status.
    #[must_use]
    pub fn from_response(status_code: u16, body: String) -> Self {
        if (200..300).contains(&status_code) {
            DeliveryOutcome::Success { status_code, body }
        } else {
            DeliveryOutcome::HttpFailure { status_code, body }
        }
    }
}

/// Issues signed webhook POSTs.
#[derive(Clone)]
pub struct DeliveryService {
    http_client: Client,
    cipher: SecretCipher,
}

impl DeliveryService {
    /// Create a delivery service with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(cipher: SecretCipher) -> Result<Self, WebhookError> {
        Self::with_user_agent(cipher, DEFAULT_USER_AGENT)
    }

    /// Like [`DeliveryService::new`] with a custom `User-Agent`.
    pub fn with_user_agent(cipher: SecretCipher, user_agent: &str) -> Result<Self, WebhookError> {
        // Per-attempt timeouts are set on each request from the subscription.
        let http_client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            cipher,
        })
    }

    /// Canonicalize and sign `envelope` with the subscription's secret.
    ///
    /// # Errors
    ///
    /// Fails if the stored secret cannot be decrypted or the envelope cannot
    /// be serialized.
    pub fn prepare(
        &self,
        subscription: &WebhookSubscription,
        envelope: &WebhookEnvelope,
    ) -> Result<SignedDelivery, WebhookError> {
        let secret = self.cipher.open(&subscription.secret_encrypted)?;
        let payload = envelope.to_value()?;
        let body = signer::canonical_json(&payload).into_bytes();
        let signature = signer::sign_bytes(&secret, &body);

        Ok(SignedDelivery {
            event: envelope.event,
            body,
            signature,
            payload,
        })
    }

    /// One POST to `subscription.url`, bounded by `subscription.timeout_seconds`.
    pub async fn attempt(
        &self,
        subscription: &WebhookSubscription,
        delivery: &SignedDelivery,
    ) -> DeliveryOutcome {
        let timeout_seconds = u64::try_from(subscription.timeout_seconds.max(1)).unwrap_or(1);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(EVENT_HEADER, HeaderValue::from_static(delivery.event.as_str()));
        match HeaderValue::from_str(&delivery.signature) {
            Ok(v) => {
                headers.insert(SIGNATURE_HEADER, v);
            }
            Err(e) => return DeliveryOutcome::NetworkError(format!("Invalid signature header: {e}")),
        }

        let start = Instant::now();
        let result = self
            .http_client
            .post(&subscription.url)
            .headers(headers)
            .timeout(Duration::from_secs(timeout_seconds))
            .body(delivery.body.clone())
            .send()
            .await;

        let outcome = match result {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let body = read_capped_body(response).await;
                DeliveryOutcome::from_response(status_code, body)
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::Timeout { timeout_seconds },
            Err(e) if e.is_connect() => DeliveryOutcome::NetworkError(format!("Connection failed: {e}")),
            Err(e) => DeliveryOutcome::NetworkError(format!("Request error: {e}")),
        };

        tracing::debug!(
            target: "webhook_delivery",
            webhook_id = %subscription.id,
            event_type = %delivery.event,
            status_code = ?outcome.status_code(),
            latency_ms = start.elapsed().as_millis() as u64,
            success = outcome.is_success(),
            "Delivery attempt finished"
        );

        outcome
    }
}

/// Read at most [`MAX_RESPONSE_BODY_CHARS`] characters of the response body
/// without buffering the rest. A body that fails mid-stream keeps what arrived.
async fn read_capped_body(mut response: reqwest::Response) -> String {
    // A UTF-8 character is at most 4 bytes.
    let byte_cap = MAX_RESPONSE_BODY_CHARS * 4;
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < byte_cap {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(byte_cap - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf)
        .chars()
        .take(MAX_RESPONSE_BODY_CHARS)
        .collect()
}
