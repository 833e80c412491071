//! Core types shared across the CRM backend crates.

pub mod identity;
pub mod ids;

pub use identity::AuthenticatedUser;
pub use ids::{DeliveryLogId, ParseIdError, UserId, WebhookId};
