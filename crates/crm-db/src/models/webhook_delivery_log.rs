//! Webhook delivery log model.
//!
//! One row per (subscription, event) delivery pipeline. The row is inserted
//! before the first attempt, updated after every attempt and finalized by
//! setting `completed_at`. Finalized rows are never written again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WebhookDeliveryLog {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    /// The exact envelope sent to the receiver.
    pub payload: serde_json::Value,
    pub response_status: Option<i32>,
    /// Truncated response body.
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: i32,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
}

/// Fields written after an attempt or at finalization.
///
/// Setting `completed_at` finalizes the row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLogUpdate {
    pub attempt_count: i32,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub success: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookDeliveryLog {
    /// A fresh, not yet attempted log row.
    #[must_use]
    pub fn pending(
        webhook_id: Uuid,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            event_type: event_type.into(),
            payload,
            response_status: None,
            response_body: None,
            error_message: None,
            attempt_count: 0,
            triggered_at,
            completed_at: None,
            success: false,
        }
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Applies an update in memory. Returns false, leaving the row untouched,
    /// if the row is already finalized.
    pub fn apply_update(&mut self, update: &DeliveryLogUpdate) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.attempt_count = update.attempt_count;
        self.response_status = update.response_status;
        self.response_body.clone_from(&update.response_body);
        self.error_message.clone_from(&update.error_message);
        self.success = update.success;
        self.completed_at = update.completed_at;
        true
    }

    pub async fn insert(&self, pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO webhook_delivery_logs (
                id, webhook_id, event_type, payload, response_status, response_body,
                error_message, attempt_count, triggered_at, completed_at, success
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(self.id)
        .bind(self.webhook_id)
        .bind(&self.event_type)
        .bind(&self.payload)
        .bind(self.response_status)
        .bind(&self.response_body)
        .bind(&self.error_message)
        .bind(self.attempt_count)
        .bind(self.triggered_at)
        .bind(self.completed_at)
        .bind(self.success)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Update an in-flight row. Returns false when the row is missing or
    /// already finalized.
    pub async fn update(
        pool: &sqlx::PgPool,
        id: Uuid,
        update: &DeliveryLogUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_delivery_logs
            SET attempt_count = $2,
                response_status = $3,
                response_body = $4,
                error_message = $5,
                success = $6,
                completed_at = $7
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(update.attempt_count)
        .bind(update.response_status)
        .bind(&update.response_body)
        .bind(&update.error_message)
        .bind(update.success)
        .bind(update.completed_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Logs of one subscription, newest first.
    pub async fn list_by_webhook(
        pool: &sqlx::PgPool,
        webhook_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_delivery_logs
            WHERE webhook_id = $1
            ORDER BY triggered_at DESC
            LIMIT $2
            "#,
        )
        .bind(webhook_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
