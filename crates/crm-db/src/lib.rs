//! PostgreSQL persistence for the CRM webhook subsystem.
//!
//! Models expose their queries as associated async functions taking a
//! `&sqlx::PgPool`; [`DbPool`] owns the pool and [`run_migrations`] applies
//! the embedded schema.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::DbPool;
