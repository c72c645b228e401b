use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_internal_key;
use crate::error::{AppError, AppResult};
use crate::models::WalletEntryKind;
use crate::repository::{tenants, wallet_transactions};
use crate::schemas::{
    clamp_limit_in_range, validate_input, ListQuery, TenantIdPath, WalletRefundInput,
};
use crate::services::{audit, wallet};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/tenants/{tenant_id}/wallet", axum::routing::get(get_wallet))
        .route(
            "/tenants/{tenant_id}/wallet/transactions",
            axum::routing::get(list_transactions),
        )
        .route(
            "/tenants/{tenant_id}/wallet/refund",
            axum::routing::post(refund_wallet),
        )
}

/// Pay wallet money back out to the tenant (vacating deposit returns,
/// overpayment refunds). The actual disbursement happens off-platform; this
/// records the ledger debit.
async fn refund_wallet(
    State(state): State<AppState>,
    Path(path): Path<TenantIdPath>,
    headers: HeaderMap,
    Json(payload): Json<WalletRefundInput>,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let entry = wallet::debit(
        pool,
        path.tenant_id,
        payload.amount,
        WalletEntryKind::Refund,
        None,
        payload.reason.as_deref(),
    )
    .await?;

    audit::write_audit_log(
        Some(pool),
        "wallet_refund",
        Some(&payload.performed_by),
        "tenant",
        &path.tenant_id.to_string(),
        &format!("wallet refund of {}", payload.amount),
        Some(json!({ "wallet_transaction_id": entry.id })),
    )
    .await;

    Ok(Json(json!({ "data": entry })))
}

async fn get_wallet(
    State(state): State<AppState>,
    Path(path): Path<TenantIdPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let pool = db_pool(&state)?;

    let tenant = tenants::find(pool, path.tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found.".to_string()))?;
    let latest = wallet_transactions::latest_for_tenant(pool, path.tenant_id).await?;

    Ok(Json(json!({
        "data": {
            "tenant_id": tenant.id,
            "wallet_balance": tenant.wallet_balance,
            "last_transaction": latest,
        }
    })))
}

async fn list_transactions(
    State(state): State<AppState>,
    Path(path): Path<TenantIdPath>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let pool = db_pool(&state)?;

    let rows = wallet_transactions::list_for_tenant(
        pool,
        path.tenant_id,
        clamp_limit_in_range(query.limit, 1, 200),
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state
        .db_pool
        .as_ref()
        .ok_or_else(|| AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string()))
}
