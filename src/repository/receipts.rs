use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Receipt;

/// One receipt per invoice: updated in place when further partial payments
/// accumulate, created on first settlement.
pub async fn upsert(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    tenant_id: Uuid,
    receipt_number: &str,
    total_paid: Decimal,
) -> AppResult<Receipt> {
    sqlx::query_as::<_, Receipt>(
        "INSERT INTO receipts (receipt_number, invoice_id, tenant_id, total_paid)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (invoice_id)
         DO UPDATE SET total_paid = EXCLUDED.total_paid, updated_at = now()
         RETURNING id, receipt_number, invoice_id, tenant_id, total_paid",
    )
    .bind(receipt_number)
    .bind(invoice_id)
    .bind(tenant_id)
    .bind(total_paid)
    .fetch_one(conn)
    .await
    .map_err(AppError::Database)
}
