use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Invoice, InvoiceStatus};

const INVOICE_COLUMNS: &str = "id, invoice_number, tenant_id, billing_month, rent_amount, \
     water_charge, electricity_charge, other_charges, other_charges_desc, subtotal, \
     penalty_amount, total_amount, amount_paid, balance_due, status, due_date, paid_at, \
     penalty_applied_at, created_at";

fn unsettled_statuses() -> Vec<String> {
    InvoiceStatus::UNSETTLED.iter().map(|s| s.to_string()).collect()
}

pub async fn exists_for_month(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    billing_month: NaiveDate,
) -> AppResult<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM invoices WHERE tenant_id = $1 AND billing_month = $2)",
    )
    .bind(tenant_id)
    .bind(billing_month)
    .fetch_one(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(row.0)
}

pub struct NewInvoice {
    pub invoice_number: String,
    pub tenant_id: Uuid,
    pub billing_month: NaiveDate,
    pub rent_amount: Decimal,
    pub water_charge: Decimal,
    pub electricity_charge: Decimal,
    pub other_charges: Decimal,
    pub other_charges_desc: Option<String>,
    pub due_date: DateTime<Utc>,
}

pub async fn insert(conn: &mut PgConnection, new: &NewInvoice) -> AppResult<Invoice> {
    let subtotal =
        new.rent_amount + new.water_charge + new.electricity_charge + new.other_charges;
    sqlx::query_as::<_, Invoice>(&format!(
        "INSERT INTO invoices (
            invoice_number, tenant_id, billing_month, rent_amount, water_charge,
            electricity_charge, other_charges, other_charges_desc, subtotal,
            penalty_amount, total_amount, amount_paid, balance_due, status, due_date
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $9, 0, $9, $10, $11)
         RETURNING {INVOICE_COLUMNS}"
    ))
    .bind(&new.invoice_number)
    .bind(new.tenant_id)
    .bind(new.billing_month)
    .bind(new.rent_amount)
    .bind(new.water_charge)
    .bind(new.electricity_charge)
    .bind(new.other_charges)
    .bind(&new.other_charges_desc)
    .bind(subtotal)
    .bind(InvoiceStatus::UNPAID)
    .bind(new.due_date)
    .fetch_one(conn)
    .await
    .map_err(AppError::Database)
}

/// Unsettled invoices for one tenant, oldest debt first, locked for the
/// duration of the settlement transaction. The secondary keys make the order
/// total when two invoices share a billing month.
pub async fn unsettled_for_tenant_locked(
    conn: &mut PgConnection,
    tenant_id: Uuid,
) -> AppResult<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS}
         FROM invoices
         WHERE tenant_id = $1 AND status = ANY($2) AND balance_due > 0
         ORDER BY billing_month ASC, created_at ASC, id ASC
         FOR UPDATE"
    ))
    .bind(tenant_id)
    .bind(unsettled_statuses())
    .fetch_all(conn)
    .await
    .map_err(AppError::Database)
}

pub async fn lock_by_id(conn: &mut PgConnection, invoice_id: Uuid) -> AppResult<Option<Invoice>> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE"
    ))
    .bind(invoice_id)
    .fetch_optional(conn)
    .await
    .map_err(AppError::Database)
}

/// Record a payment application inside the caller's locked transaction.
pub async fn apply_payment(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    amount_paid: Decimal,
    balance_due: Decimal,
    status: InvoiceStatus,
    paid_at: Option<DateTime<Utc>>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE invoices
         SET amount_paid = $2, balance_due = $3, status = $4, paid_at = $5, updated_at = now()
         WHERE id = $1",
    )
    .bind(invoice_id)
    .bind(amount_paid)
    .bind(balance_due)
    .bind(status.as_str())
    .bind(paid_at)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

/// Accrue one penalty increment. The caller holds the invoice row lock and
/// has already passed the per-business-day idempotency check.
pub async fn apply_penalty(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    penalty: Decimal,
    applied_at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE invoices
         SET penalty_amount = penalty_amount + $2,
             total_amount = total_amount + $2,
             balance_due = balance_due + $2,
             status = $3,
             penalty_applied_at = $4,
             updated_at = now()
         WHERE id = $1",
    )
    .bind(invoice_id)
    .bind(penalty)
    .bind(InvoiceStatus::OVERDUE)
    .bind(applied_at)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

/// Ids of invoices past due and still owing, the daily penalty candidates.
pub async fn overdue_candidate_ids(pool: &PgPool, now: DateTime<Utc>) -> AppResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM invoices
         WHERE status = ANY($1) AND due_date < $2 AND balance_due > 0
         ORDER BY due_date ASC",
    )
    .bind(unsettled_statuses())
    .bind(now)
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// All unsettled invoices, for the daily reminder pass.
pub async fn unsettled_all(pool: &PgPool, limit: i64) -> AppResult<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS}
         FROM invoices
         WHERE status = ANY($1) AND balance_due > 0
         ORDER BY due_date ASC
         LIMIT $2"
    ))
    .bind(unsettled_statuses())
    .bind(limit.clamp(1, 5000))
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)
}

pub async fn list_for_tenant(pool: &PgPool, tenant_id: Uuid, limit: i64) -> AppResult<Vec<Invoice>> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS}
         FROM invoices
         WHERE tenant_id = $1
         ORDER BY billing_month DESC
         LIMIT $2"
    ))
    .bind(tenant_id)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)
}
