//! CRM API server.
//!
//! Serves the webhook management endpoints and runs the outbound delivery
//! worker for the lifetime of the process.

mod auth;
mod config;
mod logging;
mod openapi;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Json, Router};
use config::Config;
use crm_db::{run_migrations, DbPool};
use crm_webhooks::crypto::SecretCipher;
use crm_webhooks::services::event_publisher::DEFAULT_CHANNEL_CAPACITY;
use crm_webhooks::{
    webhooks_router, DeliveryService, EventPublisher, PgWebhookStore, SubscriptionService,
    WebhookDispatcher, WebhookWorker, WebhooksState,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{require_auth, JwtVerifier};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);
    info!(config = ?config, "Configuration loaded");
    if config.uses_insecure_webhook_key {
        tracing::warn!(
            "WEBHOOK_ENCRYPTION_KEY is unset or uses the development key; set a random 32-byte key in production"
        );
    }

    let pool = match DbPool::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = run_migrations(&pool).await {
        tracing::error!("Failed to run migrations: {e}");
        std::process::exit(1);
    }

    let cipher = match SecretCipher::new(&config.webhook_encryption_key) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Invalid webhook encryption key: {e}");
            std::process::exit(1);
        }
    };
    let delivery = match DeliveryService::with_user_agent(cipher.clone(), &config.webhook_user_agent)
    {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("Failed to create webhook delivery service: {e}");
            std::process::exit(1);
        }
    };

    let store = Arc::new(PgWebhookStore::new(pool));
    let dispatcher = WebhookDispatcher::new(store.clone(), store.clone(), delivery)
        .with_max_concurrent_deliveries(config.max_concurrent_deliveries);

    // Event intake: producers publish, the worker dispatches.
    let (event_publisher, event_rx) = EventPublisher::new(DEFAULT_CHANNEL_CAPACITY);
    let worker_token = CancellationToken::new();
    let worker = WebhookWorker::new(dispatcher.clone(), event_rx, worker_token.clone())
        .with_drain_timeout(config.drain_timeout);
    let worker_handle = tokio::spawn(worker.run());
    info!("Webhook delivery worker started");

    let subscription_service = SubscriptionService::new(store.clone(), cipher)
        .with_allow_private_hosts(config.allow_private_hosts);
    let webhooks_state = WebhooksState::new(subscription_service, dispatcher, store);

    let verifier = Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes()));
    let api_routes = webhooks_router(webhooks_state)
        .layer(axum::middleware::from_fn_with_state(verifier, require_auth));

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api", api_routes)
        .layer(Extension(event_publisher))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.cors_origins));

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, "Failed to bind: {e}");
            std::process::exit(1);
        }
    };
    info!(addr = %addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
    }

    // HTTP is down; let in-flight deliveries drain before exiting.
    worker_token.cancel();
    match worker_handle.await {
        Ok(outcome) => info!(?outcome, "Webhook worker finished"),
        Err(e) => tracing::error!("Webhook worker panicked: {e}"),
    }
    info!("Server shutdown complete");
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let is_wildcard = origins.is_empty() || origins.iter().any(|o| o == "*");

    let allow_origin = if is_wildcard {
        AllowOrigin::any()
    } else {
        let allowed: Vec<axum::http::HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(allowed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
