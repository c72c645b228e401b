//! Wallet ledger primitives.
//!
//! The only code allowed to move `tenants.wallet_balance`. Every operation
//! runs inside a transaction that holds the tenant row lock, reads the
//! balance, appends the immutable `wallet_transactions` row and writes the
//! new balance. Concurrent operations against one tenant serialize on the
//! row lock, so no read-modify-write can be lost.

use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{WalletEntryKind, WalletTransaction};
use crate::repository::{tenants, wallet_transactions};

/// Credit a tenant's wallet in its own transaction.
pub async fn credit(
    pool: &PgPool,
    tenant_id: Uuid,
    amount: Decimal,
    kind: WalletEntryKind,
    reference: Option<&str>,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    if !kind.is_credit() {
        return Err(AppError::BadRequest("Credit requires a credit entry kind.".to_string()));
    }
    let mut tx = pool.begin().await.map_err(AppError::Database)?;
    let tenant = tenants::lock_for_update(&mut *tx, tenant_id).await?;
    let entry = credit_locked(
        &mut *tx,
        tenant_id,
        tenant.wallet_balance,
        amount,
        kind,
        reference,
        description,
    )
    .await?;
    tx.commit().await.map_err(AppError::Database)?;
    Ok(entry)
}

/// Debit a tenant's wallet in its own transaction. Callers compute the
/// amount first; an overdraw is a caller bug and is rejected here.
pub async fn debit(
    pool: &PgPool,
    tenant_id: Uuid,
    amount: Decimal,
    kind: WalletEntryKind,
    reference: Option<&str>,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    let mut tx = pool.begin().await.map_err(AppError::Database)?;
    let tenant = tenants::lock_for_update(&mut *tx, tenant_id).await?;
    let entry = debit_locked(
        &mut *tx,
        tenant_id,
        tenant.wallet_balance,
        amount,
        kind,
        reference,
        description,
    )
    .await?;
    tx.commit().await.map_err(AppError::Database)?;
    Ok(entry)
}

/// Credit within a caller-owned transaction that already holds the tenant
/// row lock. Returns the ledger entry; the caller keeps iterating with
/// `entry.balance_after`.
pub async fn credit_locked(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    balance_before: Decimal,
    amount: Decimal,
    kind: WalletEntryKind,
    reference: Option<&str>,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest("Credit amount must be positive.".to_string()));
    }
    let balance_after = balance_before + amount;
    let entry = wallet_transactions::insert(
        conn,
        tenant_id,
        kind,
        amount,
        balance_before,
        balance_after,
        reference,
        description,
    )
    .await?;
    tenants::update_wallet_balance(conn, tenant_id, balance_after).await?;
    Ok(entry)
}

/// Debit within a caller-owned transaction holding the tenant row lock.
pub async fn debit_locked(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    balance_before: Decimal,
    amount: Decimal,
    kind: WalletEntryKind,
    reference: Option<&str>,
    description: Option<&str>,
) -> AppResult<WalletTransaction> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest("Debit amount must be positive.".to_string()));
    }
    if kind.is_credit() {
        return Err(AppError::BadRequest("Debit requires a debit entry kind.".to_string()));
    }
    if amount > balance_before {
        return Err(AppError::Conflict(format!(
            "Debit of {amount} exceeds wallet balance {balance_before}."
        )));
    }
    let balance_after = balance_before - amount;
    let entry = wallet_transactions::insert(
        conn,
        tenant_id,
        kind,
        amount,
        balance_before,
        balance_after,
        reference,
        description,
    )
    .await?;
    tenants::update_wallet_balance(conn, tenant_id, balance_after).await?;
    Ok(entry)
}
