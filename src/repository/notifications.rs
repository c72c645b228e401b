use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{notification_status, Notification};

const NOTIFICATION_COLUMNS: &str = "id, tenant_id, invoice_id, type, channel, recipient, \
     message, status, sent_at, fail_reason, retry_count";

pub struct NewNotification<'a> {
    pub tenant_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub kind: &'a str,
    pub channel: &'a str,
    pub recipient: &'a str,
    pub message: &'a str,
    pub status: &'a str,
    pub sent_at: Option<DateTime<Utc>>,
    pub fail_reason: Option<&'a str>,
}

pub async fn insert(pool: &PgPool, new: NewNotification<'_>) -> AppResult<Notification> {
    sqlx::query_as::<_, Notification>(&format!(
        "INSERT INTO notifications
            (tenant_id, invoice_id, type, channel, recipient, message, status, sent_at,
             fail_reason, retry_count)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0)
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(new.tenant_id)
    .bind(new.invoice_id)
    .bind(new.kind)
    .bind(new.channel)
    .bind(new.recipient)
    .bind(new.message)
    .bind(new.status)
    .bind(new.sent_at)
    .bind(new.fail_reason)
    .fetch_one(pool)
    .await
    .map_err(AppError::Database)
}

/// Rows the 5-minute retry sweep picks up.
pub async fn due_for_retry(
    pool: &PgPool,
    max_retries: i32,
    limit: i64,
) -> AppResult<Vec<Notification>> {
    sqlx::query_as::<_, Notification>(&format!(
        "SELECT {NOTIFICATION_COLUMNS}
         FROM notifications
         WHERE status = ANY($1) AND retry_count < $2
         ORDER BY created_at ASC
         LIMIT $3"
    ))
    .bind(vec![
        notification_status::PENDING.to_string(),
        notification_status::FAILED.to_string(),
    ])
    .bind(max_retries)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)
}

pub async fn mark_sent(pool: &PgPool, id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE notifications SET status = $2, sent_at = now(), fail_reason = NULL WHERE id = $1",
    )
    .bind(id)
    .bind(notification_status::SENT)
    .execute(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, id: Uuid, reason: &str) -> AppResult<()> {
    sqlx::query(
        "UPDATE notifications
         SET status = $2, fail_reason = $3, retry_count = retry_count + 1
         WHERE id = $1",
    )
    .bind(id)
    .bind(notification_status::FAILED)
    .bind(reason)
    .execute(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

/// Count of notifications of the given types sent for an invoice since
/// `since`, the settlement engine's re-notify cooldown signal.
pub async fn sent_count_since(
    pool: &PgPool,
    invoice_id: Uuid,
    kinds: &[&str],
    since: DateTime<Utc>,
) -> AppResult<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM notifications
         WHERE invoice_id = $1 AND type = ANY($2) AND sent_at >= $3",
    )
    .bind(invoice_id)
    .bind(kinds.iter().map(|k| k.to_string()).collect::<Vec<_>>())
    .bind(since)
    .fetch_one(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(row.0)
}

/// Was a notification of this type already sent for the invoice inside the
/// given UTC window (a business calendar day)?
pub async fn sent_in_window(
    pool: &PgPool,
    invoice_id: Uuid,
    kind: &str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> AppResult<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (
            SELECT 1 FROM notifications
            WHERE invoice_id = $1 AND type = $2
              AND sent_at >= $3 AND sent_at < $4
         )",
    )
    .bind(invoice_id)
    .bind(kind)
    .bind(window_start)
    .bind(window_end)
    .fetch_one(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(row.0)
}
