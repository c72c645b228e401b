use serde_json::Value;
use sqlx::PgPool;

/// Append an audit log row. Best-effort: failures are logged, never
/// propagated, so a missing audit row can never undo a financial mutation.
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    action: &str,
    performed_by: Option<&str>,
    target_type: &str,
    target_id: &str,
    details: &str,
    metadata: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let result = sqlx::query(
        "INSERT INTO audit_logs (action, performed_by, target_type, target_id, details, metadata)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(action)
    .bind(performed_by)
    .bind(target_type)
    .bind(target_id)
    .bind(details)
    .bind(metadata.unwrap_or(Value::Null))
    .execute(pool)
    .await;

    if let Err(error) = result {
        tracing::warn!(action, target_type, target_id, error = %error, "Audit log write failed");
    }
}
