//! Fan-out, filtering, fire-and-forget dispatch and shutdown.

mod common;

use std::time::{Duration, Instant};

use common::*;
use crm_webhooks::services::dispatcher::TEST_DELIVERY_MESSAGE;
use crm_webhooks::{
    EventData, EventPublisher, ShutdownOutcome, SubscriptionStore, WebhookEvent,
    WebhookEventType, WebhookWorker,
};
use crm_db::models::UpdateWebhookSubscription;
use crm_core::WebhookId;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn lead_event(event_type: WebhookEventType) -> WebhookEvent {
    WebhookEvent::new(
        event_type,
        OWNER_A,
        EventData::new().with("name", "Ana").with("company", "Acme"),
    )
}

async fn capture_server(route: &str) -> (MockServer, CaptureResponder) {
    let server = MockServer::start().await;
    let responder = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(responder.clone())
        .mount(&server)
        .await;
    (server, responder)
}

#[tokio::test]
async fn no_matching_subscriptions_is_a_no_op() {
    let (server, responder) = capture_server("/hook").await;
    let engine = TestEngine::new();
    let sub = engine
        .subscribe(OWNER_A, &format!("{}/hook", server.uri()), &["lead.deleted"], 1, 5)
        .await;

    let started = Instant::now();
    let count = engine
        .dispatcher
        .dispatch(&lead_event(WebhookEventType::LeadCreated))
        .await;
    assert_eq!(count, 0);
    assert!(started.elapsed() < Duration::from_millis(500));

    engine.dispatcher.wait_idle().await;
    assert_eq!(responder.request_count(), 0);
    assert!(engine.logs(&sub).await.is_empty());
    assert_eq!(engine.store.log_count().await, 0);
}

#[tokio::test]
async fn event_filter_excludes_other_event_types() {
    let (server, created) = capture_server("/created").await;
    let updated = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/updated"))
        .respond_with(updated.clone())
        .mount(&server)
        .await;

    let engine = TestEngine::new();
    engine
        .subscribe(OWNER_A, &format!("{}/created", server.uri()), &["lead.created"], 1, 5)
        .await;
    engine
        .subscribe(OWNER_A, &format!("{}/updated", server.uri()), &["lead.updated"], 1, 5)
        .await;

    let count = engine
        .dispatcher
        .dispatch(&lead_event(WebhookEventType::LeadUpdated))
        .await;
    assert_eq!(count, 1);
    engine.dispatcher.wait_idle().await;

    assert_eq!(created.request_count(), 0);
    assert_eq!(updated.request_count(), 1);
    assert_eq!(
        updated.requests()[0].header("X-Webhook-Event"),
        Some("lead.updated")
    );
}

#[tokio::test]
async fn inactive_and_foreign_subscriptions_are_skipped() {
    let (server, responder) = capture_server("/hook").await;
    let url = format!("{}/hook", server.uri());

    let engine = TestEngine::new();
    let active = engine.subscribe(OWNER_A, &url, &["lead.created"], 1, 5).await;
    let inactive = engine.subscribe(OWNER_A, &url, &["lead.created"], 1, 5).await;
    engine
        .store
        .update_subscription(
            OWNER_A,
            WebhookId::from_uuid(inactive.id),
            &UpdateWebhookSubscription {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let foreign = engine.subscribe(OWNER_B, &url, &["lead.created"], 1, 5).await;

    let count = engine
        .dispatcher
        .dispatch(&lead_event(WebhookEventType::LeadCreated))
        .await;
    assert_eq!(count, 1);
    engine.dispatcher.wait_idle().await;

    let requests = responder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body_json()["webhook_id"], active.id.to_string());
    assert!(engine.logs(&inactive).await.is_empty());
    assert!(engine.logs(&foreign).await.is_empty());
    assert_eq!(engine.reload(&foreign).await.total_triggers, 0);
}

#[tokio::test]
async fn fans_out_with_per_subscription_envelopes() {
    let (server, responder) = capture_server("/hook").await;
    let url = format!("{}/hook", server.uri());

    let engine = TestEngine::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            engine
                .subscribe(OWNER_A, &url, &["lead.created", "lead.updated"], 1, 5)
                .await
                .id
                .to_string(),
        );
    }

    let event = lead_event(WebhookEventType::LeadCreated);
    assert_eq!(engine.dispatcher.dispatch(&event).await, 3);
    engine.dispatcher.wait_idle().await;

    let requests = responder.requests();
    assert_eq!(requests.len(), 3);
    let mut seen: Vec<String> = requests
        .iter()
        .map(|r| r.body_json()["webhook_id"].as_str().unwrap().to_string())
        .collect();
    seen.sort();
    ids.sort();
    assert_eq!(seen, ids);

    // Same event data and timestamp everywhere; only webhook_id differs.
    let first = requests[0].body_json();
    for request in &requests[1..] {
        let body = request.body_json();
        assert_eq!(body["data"], first["data"]);
        assert_eq!(body["timestamp"], first["timestamp"]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatch_does_not_wait_for_slow_receivers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let engine = TestEngine::new();
    let mut subs = Vec::new();
    for _ in 0..5 {
        subs.push(
            engine
                .subscribe(OWNER_A, &server.uri(), &["lead.created"], 1, 10)
                .await,
        );
    }

    let started = Instant::now();
    let count = engine
        .dispatcher
        .dispatch(&lead_event(WebhookEventType::LeadCreated))
        .await;
    assert_eq!(count, 5);
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "dispatch blocked for {:?}",
        started.elapsed()
    );
    assert!(engine.dispatcher.in_flight() > 0);

    engine.dispatcher.wait_idle().await;
    for sub in &subs {
        let logs = engine.logs(sub).await;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
    }
}

#[tokio::test]
async fn test_delivery_ignores_filter_and_active_flag() {
    let (server, responder) = capture_server("/hook").await;
    let engine = TestEngine::new();
    let mut sub = engine
        .subscribe(OWNER_A, &format!("{}/hook", server.uri()), &["lead.deleted"], 1, 5)
        .await;
    sub.is_active = false;

    engine.dispatcher.dispatch_test(sub.clone(), OWNER_A).await;
    let logs = wait_for_finalized_logs(&engine, &sub, 1, Duration::from_secs(5)).await;
    assert!(logs[0].success);
    assert_eq!(logs[0].event_type, "lead.created");

    let body = responder.requests()[0].body_json();
    assert_eq!(body["event"], "lead.created");
    assert_eq!(body["data"]["test"], true);
    assert_eq!(body["data"]["message"], TEST_DELIVERY_MESSAGE);
    assert_eq!(body["data"]["user_id"], OWNER_A.to_string());
    assert!(body["data"]["timestamp"].is_string());
}

#[tokio::test]
async fn published_events_reach_receivers_through_worker() {
    let (server, responder) = capture_server("/hook").await;
    let engine = TestEngine::new();
    let sub = engine
        .subscribe(
            OWNER_A,
            &format!("{}/hook", server.uri()),
            &["lead.status_changed"],
            1,
            5,
        )
        .await;

    let (publisher, receiver) = EventPublisher::new(16);
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(
        WebhookWorker::new(engine.dispatcher.clone(), receiver, shutdown.clone())
            .with_drain_timeout(Duration::from_secs(5))
            .run(),
    );

    let data = EventData::status_change(
        &serde_json::json!({"name": "Ana", "email": "ana@example.com"}),
        "novo",
        "qualificado",
    )
    .unwrap();
    publisher.publish(WebhookEventType::LeadStatusChanged, data, OWNER_A);

    wait_for_finalized_logs(&engine, &sub, 1, Duration::from_secs(5)).await;
    let body = responder.requests()[0].body_json();
    assert_eq!(body["event"], "lead.status_changed");
    assert_eq!(body["data"]["old_status"], "novo");
    assert_eq!(body["data"]["new_status"], "qualificado");

    shutdown.cancel();
    let outcome = worker.await.unwrap();
    assert_eq!(outcome, ShutdownOutcome::Drained);

    // Once the worker has stopped, publishing is a logged no-op.
    publisher.publish(WebhookEventType::LeadDeleted, EventData::new(), OWNER_A);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_abandons_pipelines_past_the_drain_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let engine = TestEngine::new();
    let sub = engine
        .subscribe(OWNER_A, &server.uri(), &["lead.created"], 3, 30)
        .await;

    assert_eq!(
        engine
            .dispatcher
            .dispatch(&lead_event(WebhookEventType::LeadCreated))
            .await,
        1
    );
    // Let the first attempt get on the wire.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let outcome = engine
        .dispatcher
        .shutdown(Duration::from_millis(200))
        .await;
    assert_eq!(outcome, ShutdownOutcome::Abandoned { pipelines: 1 });
    assert!(started.elapsed() < Duration::from_secs(5));

    let logs = engine.logs(&sub).await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].is_finalized());
    assert!(!logs[0].success);
    // The cancelled request was already on the wire, so it counts.
    assert_eq!(logs[0].attempt_count, 1);
    assert_eq!(
        logs[0].error_message.as_deref(),
        Some("Delivery abandoned during shutdown; in-flight attempt cancelled")
    );

    let sub = engine.reload(&sub).await;
    assert_eq!(sub.total_triggers, 1);
    assert_eq!(sub.failed_triggers, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_finalizes_pipelines_still_waiting_for_a_permit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let mut engine = TestEngine::new();
    engine.dispatcher = engine.dispatcher.clone().with_max_concurrent_deliveries(1);
    let sub = engine
        .subscribe(OWNER_A, &server.uri(), &["lead.created"], 3, 30)
        .await;

    for _ in 0..2 {
        engine
            .dispatcher
            .dispatch(&lead_event(WebhookEventType::LeadCreated))
            .await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = engine
        .dispatcher
        .shutdown(Duration::from_millis(200))
        .await;
    assert_eq!(outcome, ShutdownOutcome::Abandoned { pipelines: 2 });

    let logs = engine.logs(&sub).await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.is_finalized() && !l.success));
    let mut attempts: Vec<i32> = logs.iter().map(|l| l.attempt_count).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![0, 1]);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);

    let sub = engine.reload(&sub).await;
    assert_eq!(sub.total_triggers, 2);
    assert_eq!(sub.failed_triggers, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn waiting_for_idle_does_not_disturb_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let engine = TestEngine::new();
    engine
        .subscribe(OWNER_A, &server.uri(), &["lead.created"], 1, 5)
        .await;
    engine
        .dispatcher
        .dispatch(&lead_event(WebhookEventType::LeadCreated))
        .await;

    let observer = engine.dispatcher.clone();
    let idle = tokio::spawn(async move { observer.wait_idle().await });
    let started = Instant::now();
    let outcome = engine.dispatcher.shutdown(Duration::from_secs(3)).await;

    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert!(started.elapsed() < Duration::from_secs(2));
    tokio::time::timeout(Duration::from_secs(1), idle)
        .await
        .expect("wait_idle finished")
        .unwrap();
}

#[tokio::test]
async fn shutdown_with_nothing_in_flight_drains_immediately() {
    let engine = TestEngine::new();
    let outcome = engine.dispatcher.shutdown(Duration::from_secs(1)).await;
    assert_eq!(outcome, ShutdownOutcome::Drained);
}
