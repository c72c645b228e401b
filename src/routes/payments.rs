//! Payment transport: STK push initiation, the three provider callbacks,
//! and the reconciliation surface for unmatched paybill money.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_internal_key;
use crate::error::{AppError, AppResult};
use crate::middleware::source_ip::is_allowed_callback_source;
use crate::repository::payments as payments_repo;
use crate::schemas::{
    clamp_limit_in_range, validate_input, ListQuery, PaymentIdPath, ReconcilePaymentInput,
    StkPushInput,
};
use crate::services::payment_ingestion;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/payments/stk-push", axum::routing::post(initiate_stk_push))
        .route("/payments/callback/stk", axum::routing::post(stk_callback))
        .route(
            "/payments/callback/confirmation",
            axum::routing::post(c2b_confirmation),
        )
        .route(
            "/payments/callback/validation",
            axum::routing::post(c2b_validation),
        )
        .route(
            "/payments/unreconciled",
            axum::routing::get(list_unreconciled),
        )
        .route(
            "/payments/{payment_id}/reconcile",
            axum::routing::post(reconcile_payment),
        )
}

async fn initiate_stk_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<StkPushInput>,
) -> AppResult<impl IntoResponse> {
    require_internal_key(&state, &headers)?;
    validate_input(&payload)?;

    let payment = payment_ingestion::initiate_push_payment(
        &state,
        payload.tenant_id,
        payload.amount,
        payload.phone.as_deref(),
    )
    .await?;

    Ok((axum::http::StatusCode::CREATED, Json(json!({ "data": payment }))))
}

/// The provider does not retry once it sees ResultCode 0, so the handlers
/// ack even when processing fails internally; idempotency keys make any
/// redelivery of a non-acked callback safe.
async fn stk_callback(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    guard_callback_source(&state, &peer)?;
    Ok(Json(payment_ingestion::handle_stk_callback(&state, &payload).await))
}

async fn c2b_confirmation(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    guard_callback_source(&state, &peer)?;
    Ok(Json(payment_ingestion::handle_c2b_confirmation(&state, &payload).await))
}

async fn c2b_validation(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(payload): Json<Value>,
) -> AppResult<Json<Value>> {
    guard_callback_source(&state, &peer)?;
    Ok(Json(payment_ingestion::handle_c2b_validation(&payload)))
}

async fn list_unreconciled(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    let pool = db_pool(&state)?;
    let rows =
        payments_repo::list_unreconciled(pool, clamp_limit_in_range(query.limit, 1, 200)).await?;
    Ok(Json(json!({ "data": rows })))
}

async fn reconcile_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentIdPath>,
    headers: HeaderMap,
    Json(payload): Json<ReconcilePaymentInput>,
) -> AppResult<Json<Value>> {
    require_internal_key(&state, &headers)?;
    validate_input(&payload)?;

    payment_ingestion::reconcile_payment(
        &state,
        path.payment_id,
        payload.tenant_id,
        &payload.performed_by,
        payload.note.as_deref(),
    )
    .await?;

    Ok(Json(json!({ "data": { "reconciled": true } })))
}

fn guard_callback_source(state: &AppState, peer: &SocketAddr) -> Result<(), AppError> {
    if is_allowed_callback_source(state, peer) {
        return Ok(());
    }
    tracing::warn!(peer = %peer, "Callback from unallowed source rejected");
    Err(AppError::Forbidden("Source address not allowed.".to_string()))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state
        .db_pool
        .as_ref()
        .ok_or_else(|| AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string()))
}
