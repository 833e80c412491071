//! Row models.

pub mod webhook_delivery_log;
pub mod webhook_subscription;

pub use webhook_delivery_log::{DeliveryLogUpdate, WebhookDeliveryLog};
pub use webhook_subscription::{
    UpdateWebhookSubscription, WebhookSubscription, MAX_MATCHING_SUBSCRIPTIONS,
};
