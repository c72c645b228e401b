use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{payment_method, payment_status, Payment};

const PAYMENT_COLUMNS: &str = "id, tenant_id, invoice_id, amount, method, status, phone, \
     mpesa_receipt_number, mpesa_checkout_request_id, needs_reconciliation, \
     reconciliation_note, reconciled_at, reconciled_by, created_at";

/// Claim the payment row for an STK callback. The lock serializes duplicate
/// callback deliveries for the same checkout request.
pub async fn lock_by_checkout_request_id(
    conn: &mut PgConnection,
    checkout_request_id: &str,
) -> AppResult<Option<Payment>> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE mpesa_checkout_request_id = $1
         FOR UPDATE"
    ))
    .bind(checkout_request_id)
    .fetch_optional(conn)
    .await
    .map_err(AppError::Database)
}

pub async fn lock_by_id(conn: &mut PgConnection, payment_id: Uuid) -> AppResult<Option<Payment>> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
    ))
    .bind(payment_id)
    .fetch_optional(conn)
    .await
    .map_err(AppError::Database)
}

pub async fn exists_by_receipt_number(pool: &PgPool, receipt_number: &str) -> AppResult<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM payments WHERE mpesa_receipt_number = $1)",
    )
    .bind(receipt_number)
    .fetch_one(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(row.0)
}

/// PENDING row created before the STK push call to the provider, so a
/// provider timeout has a row to flip to FAILED.
pub async fn insert_pending_stk(
    pool: &PgPool,
    tenant_id: Uuid,
    amount: Decimal,
    phone: &str,
) -> AppResult<Payment> {
    sqlx::query_as::<_, Payment>(&format!(
        "INSERT INTO payments (tenant_id, amount, method, status, phone, needs_reconciliation)
         VALUES ($1, $2, $3, $4, $5, false)
         RETURNING {PAYMENT_COLUMNS}"
    ))
    .bind(tenant_id)
    .bind(amount)
    .bind(payment_method::MPESA_STK_PUSH)
    .bind(payment_status::PENDING)
    .bind(phone)
    .fetch_one(pool)
    .await
    .map_err(AppError::Database)
}

/// Attach the provider's idempotency key once initiation succeeds.
pub async fn set_checkout_request_id(
    pool: &PgPool,
    payment_id: Uuid,
    checkout_request_id: &str,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments SET mpesa_checkout_request_id = $2, updated_at = now() WHERE id = $1",
    )
    .bind(payment_id)
    .bind(checkout_request_id)
    .execute(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

/// COMPLETED row for an inbound paybill confirmation. `tenant_id = None`
/// parks the money for manual reconciliation.
pub async fn insert_completed_c2b(
    pool: &PgPool,
    tenant_id: Option<Uuid>,
    amount: Decimal,
    phone: Option<&str>,
    receipt_number: &str,
    note: Option<&str>,
) -> AppResult<Payment> {
    sqlx::query_as::<_, Payment>(&format!(
        "INSERT INTO payments (tenant_id, amount, method, status, phone,
                               mpesa_receipt_number, needs_reconciliation, reconciliation_note)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {PAYMENT_COLUMNS}"
    ))
    .bind(tenant_id)
    .bind(amount)
    .bind(payment_method::MPESA_PAYBILL)
    .bind(payment_status::COMPLETED)
    .bind(phone)
    .bind(receipt_number)
    .bind(tenant_id.is_none())
    .bind(note)
    .fetch_one(pool)
    .await
    .map_err(AppError::Database)
}

pub async fn mark_completed(
    conn: &mut PgConnection,
    payment_id: Uuid,
    receipt_number: &str,
    amount: Decimal,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments
         SET status = $2, mpesa_receipt_number = $3, amount = $4, updated_at = now()
         WHERE id = $1",
    )
    .bind(payment_id)
    .bind(payment_status::COMPLETED)
    .bind(receipt_number)
    .bind(amount)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn mark_failed(pool: &PgPool, payment_id: Uuid, note: &str) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments
         SET status = $2, reconciliation_note = $3, updated_at = now()
         WHERE id = $1",
    )
    .bind(payment_id)
    .bind(payment_status::FAILED)
    .bind(note)
    .execute(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn mark_failed_in_tx(
    conn: &mut PgConnection,
    payment_id: Uuid,
    note: &str,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments
         SET status = $2, reconciliation_note = $3, updated_at = now()
         WHERE id = $1",
    )
    .bind(payment_id)
    .bind(payment_status::FAILED)
    .bind(note)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn mark_reconciled(
    conn: &mut PgConnection,
    payment_id: Uuid,
    tenant_id: Uuid,
    reconciled_by: &str,
    note: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE payments
         SET tenant_id = $2, needs_reconciliation = false, reconciled_at = now(),
             reconciled_by = $3,
             reconciliation_note = COALESCE($4, reconciliation_note),
             updated_at = now()
         WHERE id = $1",
    )
    .bind(payment_id)
    .bind(tenant_id)
    .bind(reconciled_by)
    .bind(note)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

pub async fn list_unreconciled(pool: &PgPool, limit: i64) -> AppResult<Vec<Payment>> {
    sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLUMNS}
         FROM payments
         WHERE needs_reconciliation = true AND reconciled_at IS NULL AND status = $1
         ORDER BY created_at ASC
         LIMIT $2"
    ))
    .bind(payment_status::COMPLETED)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)
}

/// Stale PENDING push payments whose callback never arrived; swept to FAILED
/// after the timeout horizon so they are not stuck forever.
pub async fn expire_stale_pending(pool: &PgPool, older_than: DateTime<Utc>) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE payments
         SET status = $2, reconciliation_note = 'expired: no callback received',
             updated_at = now()
         WHERE status = $1 AND method = $3 AND created_at < $4",
    )
    .bind(payment_status::PENDING)
    .bind(payment_status::FAILED)
    .bind(payment_method::MPESA_STK_PUSH)
    .bind(older_than)
    .execute(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(result.rows_affected())
}
