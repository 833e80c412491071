pub mod deliveries;
pub mod subscriptions;
