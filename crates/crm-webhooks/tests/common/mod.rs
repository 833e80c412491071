//! Shared helpers for crm-webhooks integration tests.
//!
//! Everything runs against the in-memory store and `wiremock` receivers, so
//! no database is needed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use crm_core::{UserId, WebhookId};
use crm_db::models::{WebhookDeliveryLog, WebhookSubscription};
use crm_webhooks::crypto::SecretCipher;
use crm_webhooks::{
    DeliveryService, InMemoryWebhookStore, RetryPolicy, SubscriptionStore, WebhookDispatcher,
};
use uuid::Uuid;
use wiremock::{Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub const OWNER_A: UserId = UserId::from_uuid(Uuid::from_bytes([0xaa; 16]));
pub const OWNER_B: UserId = UserId::from_uuid(Uuid::from_bytes([0xbb; 16]));

pub const ENCRYPTION_KEY: [u8; 32] = [0x42; 32];
pub const SECRET: &str = "whsec_test_secret_key_12345";

/// Backoff base used by tests that don't measure the real schedule.
pub const FAST_BASE_DELAY: Duration = Duration::from_millis(10);

pub fn init_test_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

pub fn test_cipher() -> SecretCipher {
    SecretCipher::new(&ENCRYPTION_KEY).expect("valid test key")
}

/// A dispatcher wired to an in-memory store.
pub struct TestEngine {
    pub store: Arc<InMemoryWebhookStore>,
    pub dispatcher: WebhookDispatcher,
    pub cipher: SecretCipher,
}

impl TestEngine {
    /// Engine with a fast (10ms base) backoff.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::with_base_delay(FAST_BASE_DELAY))
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        init_test_logging();
        let store = Arc::new(InMemoryWebhookStore::new());
        let cipher = test_cipher();
        let delivery = DeliveryService::new(cipher.clone()).expect("http client");
        let dispatcher =
            WebhookDispatcher::new(store.clone(), store.clone(), delivery).with_retry_policy(policy);
        Self {
            store,
            dispatcher,
            cipher,
        }
    }

    /// Store an active subscription for `owner` signed with [`SECRET`].
    pub async fn subscribe(
        &self,
        owner: UserId,
        url: &str,
        events: &[&str],
        retry_count: i32,
        timeout_seconds: i32,
    ) -> WebhookSubscription {
        let now = Utc::now();
        let sub = WebhookSubscription {
            id: Uuid::new_v4(),
            user_id: owner.into_uuid(),
            name: "test hook".to_string(),
            url: url.to_string(),
            event_types: events.iter().map(|e| (*e).to_string()).collect(),
            secret_encrypted: self.cipher.seal(SECRET).expect("seal"),
            is_active: true,
            retry_count,
            timeout_seconds,
            created_at: now,
            updated_at: now,
            last_triggered: None,
            total_triggers: 0,
            failed_triggers: 0,
        };
        self.store
            .insert_subscription(&sub)
            .await
            .expect("insert subscription");
        sub
    }

    pub async fn reload(&self, sub: &WebhookSubscription) -> WebhookSubscription {
        self.store
            .subscription(WebhookId::from_uuid(sub.id))
            .await
            .expect("subscription exists")
    }

    pub async fn logs(&self, sub: &WebhookSubscription) -> Vec<WebhookDeliveryLog> {
        self.store.logs_for(WebhookId::from_uuid(sub.id)).await
    }
}

/// Poll until `sub` has `count` finalized logs, or panic after `timeout`.
pub async fn wait_for_finalized_logs(
    engine: &TestEngine,
    sub: &WebhookSubscription,
    count: usize,
    timeout: Duration,
) -> Vec<WebhookDeliveryLog> {
    let deadline = Instant::now() + timeout;
    loop {
        let logs = engine.logs(sub).await;
        if logs.iter().filter(|l| l.is_finalized()).count() >= count {
            return logs;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} finalized logs, have {logs:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// Captured requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub received_at: Instant,
}

impl CapturedRequest {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("body is JSON")
    }

    /// Header value by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn capture(request: &Request) -> CapturedRequest {
    CapturedRequest {
        body: request.body.clone(),
        headers: request
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect(),
        received_at: Instant::now(),
    }
}

// ---------------------------------------------------------------------------
// Responders
// ---------------------------------------------------------------------------

/// Records every request and answers with a fixed status.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: u16,
    body: String,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
            body: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.lock().unwrap().push(capture(request));
        ResponseTemplate::new(self.status).set_body_string(self.body.clone())
    }
}

/// Fails the first `n` requests, then succeeds.
#[derive(Clone)]
pub struct FailingResponder {
    attempts: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_status: u16,
}

impl FailingResponder {
    pub fn fail_times(n: u32) -> Self {
        Self::fail_times_with(n, 500)
    }

    pub fn fail_times_with(n: u32, failure_status: u16) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_status,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Respond for FailingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures_before_success {
            ResponseTemplate::new(self.failure_status).set_body_string("temporarily unavailable")
        } else {
            ResponseTemplate::new(200).set_body_string("ok")
        }
    }
}
