use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{map_sqlx_not_found, AppError, AppResult};
use crate::models::{tenant_status, Tenant};

const TENANT_COLUMNS: &str = "id, full_name, phone, email, unit_id, wallet_balance, \
     deposit_amount, deposit_status, status";

/// Acquire the pessimistic write lock on a tenant row.
///
/// Every code path that reads-then-writes `wallet_balance` goes through this:
/// the row lock is the sole serialization point between concurrent credits,
/// debits and settlements against one tenant.
pub async fn lock_for_update(conn: &mut PgConnection, tenant_id: Uuid) -> AppResult<Tenant> {
    sqlx::query_as::<_, Tenant>(&format!(
        "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1 FOR UPDATE"
    ))
    .bind(tenant_id)
    .fetch_one(conn)
    .await
    .map_err(|e| map_sqlx_not_found(e, "Tenant"))
}

pub async fn find(pool: &PgPool, tenant_id: Uuid) -> AppResult<Option<Tenant>> {
    sqlx::query_as::<_, Tenant>(&format!(
        "SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"
    ))
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)
}

/// Tenant joined with the unit fields invoicing needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillableTenant {
    pub id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub wallet_balance: Decimal,
    pub unit_number: String,
    pub rent_amount: Decimal,
}

/// Active tenants with an assigned unit, the population monthly invoicing
/// iterates over.
pub async fn active_with_unit(pool: &PgPool) -> AppResult<Vec<BillableTenant>> {
    sqlx::query_as::<_, BillableTenant>(
        "SELECT t.id, t.full_name, t.phone, t.email, t.wallet_balance,
                u.unit_number, u.rent_amount
         FROM tenants t
         JOIN units u ON u.id = t.unit_id
         WHERE t.status = $1
         ORDER BY u.unit_number ASC",
    )
    .bind(tenant_status::ACTIVE)
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)
}

/// Tenants the settlement sweep should visit: positive wallet and at least
/// one invoice still owing.
pub async fn with_wallet_and_debt(pool: &PgPool) -> AppResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT DISTINCT t.id
         FROM tenants t
         JOIN invoices i ON i.tenant_id = t.id
         WHERE t.wallet_balance > 0
           AND i.status = ANY($1)
           AND i.balance_due > 0",
    )
    .bind(
        crate::models::InvoiceStatus::UNSETTLED
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>(),
    )
    .fetch_all(pool)
    .await
    .map_err(AppError::Database)?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Must run inside the transaction that holds the tenant row lock.
pub async fn update_wallet_balance(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    balance: Decimal,
) -> AppResult<()> {
    sqlx::query("UPDATE tenants SET wallet_balance = $2, updated_at = now() WHERE id = $1")
        .bind(tenant_id)
        .bind(balance)
        .execute(conn)
        .await
        .map_err(AppError::Database)?;
    Ok(())
}

pub async fn set_deposit_collected(conn: &mut PgConnection, tenant_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE tenants SET deposit_status = $2, updated_at = now()
         WHERE id = $1 AND deposit_status = $3",
    )
    .bind(tenant_id)
    .bind(crate::models::deposit_status::COLLECTED)
    .bind(crate::models::deposit_status::PENDING)
    .execute(conn)
    .await
    .map_err(AppError::Database)?;
    Ok(())
}

/// Resolve a paybill account reference to an active tenant by unit number,
/// case-insensitively. Ambiguity cannot arise: unit numbers are unique and a
/// unit houses at most one active tenant.
pub async fn find_active_by_unit_number(
    pool: &PgPool,
    account_reference: &str,
) -> AppResult<Option<Tenant>> {
    let needle = account_reference.trim();
    if needle.is_empty() {
        return Ok(None);
    }
    sqlx::query_as::<_, Tenant>(
        "SELECT t.id, t.full_name, t.phone, t.email, t.unit_id, t.wallet_balance,
                t.deposit_amount, t.deposit_status, t.status
         FROM tenants t
         JOIN units u ON u.id = t.unit_id
         WHERE lower(u.unit_number) = lower($1) AND t.status = $2
         LIMIT 1",
    )
    .bind(needle)
    .bind(tenant_status::ACTIVE)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)
}
