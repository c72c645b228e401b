//! Daily late-payment penalty accrual.
//!
//! Each overdue invoice accrues a percentage of its rent once per business
//! calendar day. The penalty base is the rent, not the running balance, so
//! penalties never compound on earlier penalties.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::business_day;
use crate::error::{AppError, AppResult};
use crate::models::{notification_type, Invoice, InvoiceStatus};
use crate::repository::invoices;
use crate::services::{audit, notify};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PenaltyRunSummary {
    pub penalized: u32,
    pub skipped: u32,
    pub errors: u32,
    pub total_penalty: Decimal,
}

/// Penalty increment for one invoice: a fixed share of the rent, rounded to
/// cents.
pub fn penalty_for(rent_amount: Decimal, rate_percent: u32) -> Decimal {
    (rent_amount * Decimal::from(rate_percent) / Decimal::ONE_HUNDRED).round_dp(2)
}

/// An invoice is penalized at most once per business calendar day.
pub fn already_penalized_today(
    penalty_applied_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    penalty_applied_at
        .map(|applied| business_day::same_business_day(applied, now))
        .unwrap_or(false)
}

/// Daily sweep over due, unsettled invoices. Every invoice gets its own
/// transaction and row lock; one failure never stops the loop.
pub async fn apply_penalties(state: &AppState) -> PenaltyRunSummary {
    let mut summary = PenaltyRunSummary::default();
    let Some(pool) = state.db_pool.clone() else {
        return summary;
    };

    let now = Utc::now();
    let candidates = match invoices::overdue_candidate_ids(&pool, now).await {
        Ok(ids) => ids,
        Err(error) => {
            warn!(error = %error, "Failed to list penalty candidates");
            summary.errors += 1;
            return summary;
        }
    };

    for invoice_id in candidates {
        match penalize_invoice(state, invoice_id, now).await {
            Ok(Some(penalty)) => {
                summary.penalized += 1;
                summary.total_penalty += penalty;
            }
            Ok(None) => summary.skipped += 1,
            Err(error) => {
                warn!(invoice_id = %invoice_id, error = %error, "Penalty application failed");
                summary.errors += 1;
            }
        }
    }

    info!(
        penalized = summary.penalized,
        skipped = summary.skipped,
        errors = summary.errors,
        total_penalty = %summary.total_penalty,
        "Penalty sweep completed"
    );

    summary
}

/// Apply one day's penalty to one invoice. Returns the increment, or None
/// for an idempotent skip.
async fn penalize_invoice(
    state: &AppState,
    invoice_id: Uuid,
    now: DateTime<Utc>,
) -> AppResult<Option<Decimal>> {
    let pool = state
        .db_pool
        .as_ref()
        .ok_or_else(|| AppError::Dependency("Database is not configured.".to_string()))?;

    let mut tx = pool.begin().await.map_err(AppError::Database)?;

    let Some(invoice) = invoices::lock_by_id(&mut *tx, invoice_id).await? else {
        return Ok(None);
    };

    // Settled or cancelled since the candidate query ran.
    if invoice.balance_due <= Decimal::ZERO
        || matches!(
            invoice.status(),
            Some(InvoiceStatus::Paid) | Some(InvoiceStatus::Cancelled)
        )
    {
        return Ok(None);
    }

    if already_penalized_today(invoice.penalty_applied_at, now) {
        return Ok(None);
    }

    let penalty = penalty_for(invoice.rent_amount, state.config.penalty_rate_percent);
    if penalty <= Decimal::ZERO {
        return Ok(None);
    }

    invoices::apply_penalty(&mut *tx, invoice_id, penalty, now).await?;
    tx.commit().await.map_err(AppError::Database)?;

    audit::write_audit_log(
        state.db_pool.as_ref(),
        "apply_penalty",
        None,
        "invoice",
        &invoice_id.to_string(),
        &format!("late penalty of {penalty} applied"),
        Some(serde_json::json!({
            "invoice_number": invoice.invoice_number,
            "penalty": penalty.to_string(),
            "rent_amount": invoice.rent_amount.to_string(),
        })),
    )
    .await;

    dispatch_penalty_notice(state, &invoice, penalty);

    Ok(Some(penalty))
}

fn dispatch_penalty_notice(state: &AppState, invoice: &Invoice, penalty: Decimal) {
    let Some(pool) = state.db_pool.clone() else {
        return;
    };
    let client = state.http_client.clone();
    let config = state.config.clone();
    let invoice = invoice.clone();
    let new_balance = invoice.balance_due + penalty;

    tokio::spawn(async move {
        let Ok(Some(tenant)) = crate::repository::tenants::find(&pool, invoice.tenant_id).await
        else {
            return;
        };
        let body = format!(
            "Dear {}, a late payment penalty of KES {penalty} has been added to invoice {}. \
             The outstanding balance is now KES {new_balance}. Kindly clear it to avoid \
             further penalties.\n— Nyumbani",
            tenant.full_name, invoice.invoice_number
        );
        notify::dispatch(
            &pool,
            &client,
            &config,
            notify::OutboundMessage {
                tenant_id: tenant.id,
                invoice_id: Some(invoice.id),
                kind: notification_type::PENALTY_APPLIED,
                phone: Some(tenant.phone.clone()),
                email: tenant.email.clone(),
                subject: format!("Late payment penalty — {}", invoice.invoice_number),
                body,
            },
        )
        .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn penalty_is_share_of_rent_not_balance() {
        // Rent 40,000 with prior penalties pushing the balance to 50,000:
        // the new penalty is still 5% of rent.
        assert_eq!(penalty_for(dec!(40000), 5), dec!(2000));
    }

    #[test]
    fn penalty_rounds_to_cents() {
        assert_eq!(penalty_for(dec!(33333), 5), dec!(1666.65));
        assert_eq!(penalty_for(dec!(10001), 5), dec!(500.05));
    }

    #[test]
    fn zero_rate_yields_no_penalty() {
        assert_eq!(penalty_for(dec!(40000), 0), dec!(0));
    }

    #[test]
    fn same_business_day_is_idempotent() {
        // 22:00 UTC Mar 10 and 04:00 UTC Mar 11 are both Mar 11 in UTC+3.
        let applied = Utc.with_ymd_and_hms(2025, 3, 10, 22, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 11, 4, 0, 0).unwrap();
        assert!(already_penalized_today(Some(applied), now));
    }

    #[test]
    fn next_business_day_allows_new_penalty() {
        let applied = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 21, 30, 0).unwrap(); // Mar 11 EAT
        assert!(!already_penalized_today(Some(applied), now));
    }

    #[test]
    fn never_penalized_is_not_a_skip() {
        assert!(!already_penalized_today(None, Utc::now()));
    }
}
