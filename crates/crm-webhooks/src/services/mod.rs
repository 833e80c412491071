//! Webhook services.

pub mod audit_logger;
pub mod delivery_service;
pub mod dispatcher;
pub mod event_publisher;
pub mod retry;
pub mod subscription_service;

pub use audit_logger::{AuditLogger, DeliveryLogHandle};
pub use delivery_service::{DeliveryOutcome, DeliveryService, SignedDelivery};
pub use dispatcher::{ShutdownOutcome, WebhookDispatcher};
pub use event_publisher::{EventPublisher, WebhookEvent};
pub use retry::{AttemptObserver, FinalOutcome, RetryPolicy, RetryScheduler};
pub use subscription_service::SubscriptionService;
