//! Webhook subscription model.
//!
//! A user-registered HTTP endpoint plus the event kinds it wants to receive,
//! along with its delivery settings and aggregate trigger counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Upper bound on subscriptions returned for a single event match.
pub const MAX_MATCHING_SUBSCRIPTIONS: i64 = 100;

/// A registered webhook subscription.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub url: String,
    /// Subscribed event kinds, e.g. `lead.created`. Never empty.
    pub event_types: Vec<String>,
    /// AES-256-GCM encrypted signing secret (base64 of nonce and ciphertext).
    pub secret_encrypted: String,
    pub is_active: bool,
    /// Maximum number of delivery attempts per event (>= 1).
    pub retry_count: i32,
    /// Per-attempt request timeout.
    pub timeout_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub total_triggers: i64,
    /// Always <= `total_triggers`.
    pub failed_triggers: i64,
}

/// Partial update of the owner-editable fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateWebhookSubscription {
    pub name: Option<String>,
    pub url: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub retry_count: Option<i32>,
    pub timeout_seconds: Option<i32>,
}

impl UpdateWebhookSubscription {
    /// True when no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.event_types.is_none()
            && self.is_active.is_none()
            && self.retry_count.is_none()
            && self.timeout_seconds.is_none()
    }
}

impl WebhookSubscription {
    /// Whether this subscription wants events of the given kind.
    #[must_use]
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|e| e == event_type)
    }

    /// Applies an update in memory, mirroring [`WebhookSubscription::update`].
    pub fn apply_update(&mut self, update: &UpdateWebhookSubscription, now: DateTime<Utc>) {
        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }
        if let Some(url) = &update.url {
            self.url.clone_from(url);
        }
        if let Some(event_types) = &update.event_types {
            self.event_types.clone_from(event_types);
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(timeout_seconds) = update.timeout_seconds {
            self.timeout_seconds = timeout_seconds;
        }
        self.updated_at = now;
    }

    /// Insert a fully-formed subscription.
    pub async fn insert(&self, pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions (
                id, user_id, name, url, event_types, secret_encrypted, is_active,
                retry_count, timeout_seconds, created_at, updated_at,
                last_triggered, total_triggers, failed_triggers
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(self.id)
        .bind(self.user_id)
        .bind(&self.name)
        .bind(&self.url)
        .bind(&self.event_types)
        .bind(&self.secret_encrypted)
        .bind(self.is_active)
        .bind(self.retry_count)
        .bind(self.timeout_seconds)
        .bind(self.created_at)
        .bind(self.updated_at)
        .bind(self.last_triggered)
        .bind(self.total_triggers)
        .bind(self.failed_triggers)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a subscription by ID, scoped to its owner.
    pub async fn find_by_id(
        pool: &sqlx::PgPool,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// List all subscriptions of an owner, newest first.
    pub async fn list_by_user(pool: &sqlx::PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Active subscriptions of an owner that include `event_type`.
    pub async fn find_active_for_event(
        pool: &sqlx::PgPool,
        user_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE user_id = $1
              AND is_active = TRUE
              AND $2 = ANY(event_types)
            ORDER BY created_at
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(event_type)
        .bind(MAX_MATCHING_SUBSCRIPTIONS)
        .fetch_all(pool)
        .await
    }

    /// Apply a partial update. Returns the updated row, or `None` if not found.
    pub async fn update(
        pool: &sqlx::PgPool,
        user_id: Uuid,
        id: Uuid,
        update: &UpdateWebhookSubscription,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE webhook_subscriptions
            SET name = COALESCE($3, name),
                url = COALESCE($4, url),
                event_types = COALESCE($5, event_types),
                is_active = COALESCE($6, is_active),
                retry_count = COALESCE($7, retry_count),
                timeout_seconds = COALESCE($8, timeout_seconds),
                updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(&update.name)
        .bind(&update.url)
        .bind(&update.event_types)
        .bind(update.is_active)
        .bind(update.retry_count)
        .bind(update.timeout_seconds)
        .fetch_optional(pool)
        .await
    }

    /// Delete a subscription. Returns whether a row was removed.
    pub async fn delete(pool: &sqlx::PgPool, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM webhook_subscriptions
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically bump the trigger counters after a terminal outcome.
    ///
    /// `total_triggers` always grows by one, `failed_triggers` only when
    /// `success` is false. Both happen in a single statement so concurrent
    /// pipelines never lose an increment.
    pub async fn increment_counters(
        pool: &sqlx::PgPool,
        id: Uuid,
        success: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET total_triggers = total_triggers + 1,
                failed_triggers = failed_triggers + CASE WHEN $2 THEN 0 ELSE 1 END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_last_triggered(
        pool: &sqlx::PgPool,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE webhook_subscriptions SET last_triggered = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> WebhookSubscription {
        let now = Utc::now();
        WebhookSubscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Zapier".to_string(),
            url: "https://hooks.example.com/crm".to_string(),
            event_types: vec!["lead.created".to_string(), "lead.updated".to_string()],
            secret_encrypted: "ciphertext".to_string(),
            is_active: true,
            retry_count: 3,
            timeout_seconds: 30,
            created_at: now,
            updated_at: now,
            last_triggered: None,
            total_triggers: 0,
            failed_triggers: 0,
        }
    }

    #[test]
    fn subscribes_to_matches_exact_event_names() {
        let sub = subscription();
        assert!(sub.subscribes_to("lead.created"));
        assert!(!sub.subscribes_to("lead.deleted"));
        assert!(!sub.subscribes_to("lead"));
    }

    #[test]
    fn apply_update_only_touches_provided_fields() {
        let mut sub = subscription();
        let before = sub.clone();
        let later = before.updated_at + chrono::Duration::seconds(5);

        sub.apply_update(
            &UpdateWebhookSubscription {
                is_active: Some(false),
                retry_count: Some(5),
                ..Default::default()
            },
            later,
        );

        assert!(!sub.is_active);
        assert_eq!(sub.retry_count, 5);
        assert_eq!(sub.name, before.name);
        assert_eq!(sub.url, before.url);
        assert_eq!(sub.event_types, before.event_types);
        assert_eq!(sub.secret_encrypted, before.secret_encrypted);
        assert_eq!(sub.updated_at, later);
    }

    #[test]
    fn empty_update_is_detected() {
        assert!(UpdateWebhookSubscription::default().is_empty());
        let update = UpdateWebhookSubscription {
            name: Some("x".into()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
