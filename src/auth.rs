use axum::http::HeaderMap;

use crate::error::AppError;
use crate::state::AppState;

/// Guard for the admin surface (manual billing triggers, reconciliation,
/// STK initiation). Requests present the shared key in `x-internal-api-key`.
pub fn require_internal_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.config.internal_api_key.as_deref() else {
        return Err(AppError::Dependency(
            "INTERNAL_API_KEY is not configured; admin endpoints are disabled.".to_string(),
        ));
    };

    let provided = headers
        .get("x-internal-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if provided.is_empty() || provided != expected {
        return Err(AppError::Unauthorized("Invalid or missing internal API key.".to_string()));
    }
    Ok(())
}
