use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{WalletEntryKind, WalletTransaction};

const LEDGER_COLUMNS: &str = "id, tenant_id, type, amount, balance_before, balance_after, \
     reference, description, created_at";

/// Append one immutable ledger row. Caller holds the tenant row lock and has
/// already computed the running balance.
pub async fn insert(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    kind: WalletEntryKind,
    amount: Decimal,
    balance_before: Decimal,
    balance_after: Decimal,
    reference: Option<&str>,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    sqlx::query_as::<_, WalletTransaction>(&format!(
        "INSERT INTO wallet_transactions
            (tenant_id, type, amount, balance_before, balance_after, reference, description)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {LEDGER_COLUMNS}"
    ))
    .bind(tenant_id)
    .bind(kind.as_str())
    .bind(amount)
    .bind(balance_before)
    .bind(balance_after)
    .bind(reference)
    .bind(description)
    .fetch_one(conn)
    .await
    .map_err(AppError::Database)
}

pub async fn list_for_tenant(
    pool: &PgPool,
    tenant_id: Uuid,
    limit: i64,
) -> AppResult<Vec<WalletTransaction>> {
    sqlx::query_as::<_, WalletTransaction>(&format!(
        "SELECT {LEDGER_COLUMNS}
         FROM wallet_transactions
         WHERE tenant_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2"
    ))
    .bind(tenant_id)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)
}

pub async fn latest_for_tenant(
    pool: &PgPool,
    tenant_id: Uuid,
) -> AppResult<Option<WalletTransaction>> {
    sqlx::query_as::<_, WalletTransaction>(&format!(
        "SELECT {LEDGER_COLUMNS}
         FROM wallet_transactions
         WHERE tenant_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    ))
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)
}
