//! Admin triggers for the billing engines. Each endpoint runs the same job
//! body the scheduler invokes and returns its aggregate summary, even when
//! some sub-items failed (the logs carry the per-item detail).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_internal_key;
use crate::error::{AppError, AppResult};
use crate::repository::invoices;
use crate::schemas::{clamp_limit_in_range, GenerateInvoicesInput, ListQuery, TenantIdPath};
use crate::services::{invoicing, penalties, reminders, settings, settlement};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/billing/invoices/generate",
            axum::routing::post(generate_invoices),
        )
        .route(
            "/billing/penalties/apply",
            axum::routing::post(apply_penalties),
        )
        .route(
            "/billing/settlements/run",
            axum::routing::post(run_settlement),
        )
        .route("/billing/reminders/run", axum::routing::post(run_reminders))
        .route(
            "/tenants/{tenant_id}/invoices",
            axum::routing::get(list_tenant_invoices),
        )
}

async fn generate_invoices(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateInvoicesInput>,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let system_settings = settings::get_settings(&state).await;
    let summary =
        invoicing::generate_monthly_invoices(&state, &system_settings, payload.billing_month)
            .await;
    Ok(Json(json!({ "data": summary })))
}

async fn apply_penalties(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let summary = penalties::apply_penalties(&state).await;
    Ok(Json(json!({ "data": summary })))
}

async fn run_settlement(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let summary = settlement::settle_pending_invoices(&state).await;
    Ok(Json(json!({ "data": summary })))
}

async fn run_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let system_settings = settings::get_settings(&state).await;
    let summary = reminders::send_payment_reminders(&state, &system_settings).await;
    Ok(Json(json!({ "data": summary })))
}

async fn list_tenant_invoices(
    State(state): State<AppState>,
    Path(path): Path<TenantIdPath>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let pool = db_pool(&state)?;
    let rows = invoices::list_for_tenant(
        pool,
        path.tenant_id,
        clamp_limit_in_range(query.limit, 1, 100),
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
