//! Monthly invoice generation with inline wallet auto-settlement.
//!
//! Runs on the 1st of each month (or manually for any billing month). Each
//! tenant is processed in its own transaction under the tenant row lock, so
//! a payment credit arriving mid-generation cannot race the balance read,
//! and one failing tenant never aborts the rest of the run.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::business_day;
use crate::error::{AppError, AppResult};
use crate::models::notification_type;
use crate::repository::invoices::{self, NewInvoice};
use crate::repository::tenants::{self, BillableTenant};
use crate::services::settings::SystemSettings;
use crate::services::{audit, notify, settlement};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct InvoiceRunSummary {
    pub generated: u32,
    pub settled: u32,
    pub partial: u32,
    pub unpaid: u32,
    pub skipped: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GenerationOutcome {
    Skipped,
    Settled,
    Partial,
    Unpaid,
}

pub fn invoice_number(unit_number: &str, billing_month: NaiveDate) -> String {
    format!(
        "INV-{}-{}-{:02}",
        unit_number,
        billing_month.year(),
        billing_month.month()
    )
}

/// Due date: the configured day of the billing month, end of business day.
pub fn due_date_for(billing_month: NaiveDate, due_day: u32) -> chrono::DateTime<Utc> {
    let date = billing_month
        .with_day(due_day.clamp(1, 28))
        .unwrap_or(billing_month);
    business_day::end_of_business_day(date)
}

/// Generate invoices for every active tenant with a unit. Defaults to the
/// current business month; idempotent per `(tenant, billing_month)`.
pub async fn generate_monthly_invoices(
    state: &AppState,
    settings: &SystemSettings,
    billing_month: Option<NaiveDate>,
) -> InvoiceRunSummary {
    let mut summary = InvoiceRunSummary::default();
    let Some(pool) = state.db_pool.clone() else {
        return summary;
    };

    let month = billing_month
        .map(|m| m.with_day(1).unwrap_or(m))
        .unwrap_or_else(|| business_day::billing_month(Utc::now()));

    let billable = match tenants::active_with_unit(&pool).await {
        Ok(rows) => rows,
        Err(error) => {
            warn!(error = %error, "Failed to list billable tenants");
            summary.errors += 1;
            return summary;
        }
    };

    for tenant in &billable {
        match generate_for_tenant(state, settings, tenant, month).await {
            Ok(GenerationOutcome::Skipped) => summary.skipped += 1,
            Ok(outcome) => {
                summary.generated += 1;
                match outcome {
                    GenerationOutcome::Settled => summary.settled += 1,
                    GenerationOutcome::Partial => summary.partial += 1,
                    GenerationOutcome::Unpaid => summary.unpaid += 1,
                    GenerationOutcome::Skipped => {}
                }
            }
            Err(error) => {
                warn!(tenant_id = %tenant.id, error = %error, "Invoice generation failed");
                summary.errors += 1;
            }
        }
    }

    info!(
        month = %month,
        generated = summary.generated,
        settled = summary.settled,
        partial = summary.partial,
        unpaid = summary.unpaid,
        skipped = summary.skipped,
        errors = summary.errors,
        "Monthly invoice generation completed"
    );

    audit::write_audit_log(
        state.db_pool.as_ref(),
        "generate_monthly_invoices",
        None,
        "billing_run",
        &month.to_string(),
        "monthly invoice generation",
        serde_json::to_value(summary).ok(),
    )
    .await;

    summary
}

async fn generate_for_tenant(
    state: &AppState,
    settings: &SystemSettings,
    billable: &BillableTenant,
    month: NaiveDate,
) -> AppResult<GenerationOutcome> {
    let pool = state
        .db_pool
        .as_ref()
        .ok_or_else(|| AppError::Dependency("Database is not configured.".to_string()))?;

    let mut tx = pool.begin().await.map_err(AppError::Database)?;

    // Same lock domain as the wallet ledger: a concurrent payment credit
    // cannot slip between the balance read and the inline settlement below.
    let tenant = tenants::lock_for_update(&mut *tx, billable.id).await?;

    if invoices::exists_for_month(&mut *tx, billable.id, month).await? {
        return Ok(GenerationOutcome::Skipped);
    }

    let mut other_charges = Decimal::ZERO;
    let mut charge_names: Vec<&str> = Vec::new();
    for charge in settings.enabled_charges() {
        other_charges += charge.amount;
        charge_names.push(&charge.name);
    }
    let other_charges_desc =
        (!charge_names.is_empty()).then(|| charge_names.join(", "));

    let new_invoice = NewInvoice {
        invoice_number: invoice_number(&billable.unit_number, month),
        tenant_id: billable.id,
        billing_month: month,
        rent_amount: billable.rent_amount,
        water_charge: Decimal::ZERO,
        electricity_charge: Decimal::ZERO,
        other_charges,
        other_charges_desc,
        due_date: due_date_for(month, state.config.invoice_due_day),
    };
    let invoice = invoices::insert(&mut *tx, &new_invoice).await?;

    // Inline auto-settlement: single-invoice variant of the settlement
    // engine, inside the same lock scope.
    let plan = settlement::plan_settlement(tenant.wallet_balance, std::slice::from_ref(&invoice));
    let outcome = match plan.first() {
        Some(app) => {
            settlement::execute_application(&mut *tx, &tenant, &invoice, app, tenant.wallet_balance)
                .await?;
            if app.full {
                GenerationOutcome::Settled
            } else {
                GenerationOutcome::Partial
            }
        }
        None => GenerationOutcome::Unpaid,
    };

    tx.commit().await.map_err(AppError::Database)?;

    dispatch_generation_notice(state, &tenant.full_name, billable, &invoice.id, outcome, &invoice.invoice_number, invoice.total_amount);

    Ok(outcome)
}

/// Post-commit, fire-and-forget. A notification failure is a notification
/// row marked FAILED, never a rolled-back invoice.
fn dispatch_generation_notice(
    state: &AppState,
    tenant_name: &str,
    billable: &BillableTenant,
    invoice_id: &Uuid,
    outcome: GenerationOutcome,
    invoice_number: &str,
    total_amount: Decimal,
) {
    let (kind, subject, body) = match outcome {
        GenerationOutcome::Settled => (
            notification_type::RECEIPT_SENT,
            format!("Receipt {}", settlement::receipt_number_for(invoice_number)),
            format!(
                "Dear {tenant_name}, your rent invoice {invoice_number} of KES {total_amount} \
                 has been settled in full from your wallet balance. No action needed.\n— Nyumbani"
            ),
        ),
        GenerationOutcome::Partial => (
            notification_type::INVOICE_SENT,
            format!("Invoice {invoice_number}"),
            format!(
                "Dear {tenant_name}, your rent invoice {invoice_number} of KES {total_amount} \
                 has been partly covered by your wallet balance. Kindly pay the outstanding \
                 amount via the paybill using your unit number {} as the account.\n— Nyumbani",
                billable.unit_number
            ),
        ),
        GenerationOutcome::Unpaid => (
            notification_type::INVOICE_SENT,
            format!("Invoice {invoice_number}"),
            format!(
                "Dear {tenant_name}, your rent invoice {invoice_number} of KES {total_amount} \
                 is ready. Kindly pay via the paybill using your unit number {} as the \
                 account.\n— Nyumbani",
                billable.unit_number
            ),
        ),
        GenerationOutcome::Skipped => return,
    };

    let Some(pool) = state.db_pool.clone() else {
        return;
    };
    let client = state.http_client.clone();
    let config = state.config.clone();
    let msg = notify::OutboundMessage {
        tenant_id: billable.id,
        invoice_id: Some(*invoice_id),
        kind,
        phone: Some(billable.phone.clone()),
        email: billable.email.clone(),
        subject,
        body,
    };
    tokio::spawn(async move {
        notify::dispatch(&pool, &client, &config, msg).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn invoice_number_includes_unit_and_month() {
        let month = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(invoice_number("B12", month), "INV-B12-2025-06");
    }

    #[test]
    fn due_date_is_end_of_business_day() {
        let month = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let due = due_date_for(month, 5);
        // 23:59:59 on the 5th in UTC+3 is 20:59:59 UTC.
        assert_eq!(due, Utc.with_ymd_and_hms(2025, 6, 5, 20, 59, 59).unwrap());
    }

    #[test]
    fn due_day_is_clamped_to_safe_range() {
        let month = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let due = due_date_for(month, 31);
        assert_eq!(business_day::business_date(due).day(), 28);
    }
}
