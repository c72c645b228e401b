//! Wallet-to-invoice settlement.
//!
//! A bi-hourly sweep finds tenants holding both a positive wallet balance
//! and unsettled invoices, then applies the balance oldest invoice first.
//! The same per-tenant routine runs synchronously after every payment
//! credit, so money never sits in a wallet while an invoice is owing.

use std::sync::atomic::Ordering;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{notification_type, Invoice, InvoiceStatus, Tenant, WalletEntryKind};
use crate::repository::{invoices, notifications, receipts, tenants};
use crate::services::{notify, wallet};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SettlementRunSummary {
    pub tenants_processed: u32,
    pub invoices_settled: u32,
    pub invoices_partial: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TenantSettlement {
    pub settled: u32,
    pub partial: u32,
}

/// One planned application of wallet money against one invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedApplication {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub full: bool,
    pub new_amount_paid: Decimal,
    pub new_balance_due: Decimal,
}

/// Decide how a wallet balance is split across unsettled invoices:
/// oldest first, full settlements while the balance covers the debt, then at
/// most one partial application that exhausts the wallet.
pub fn plan_settlement(balance: Decimal, unsettled: &[Invoice]) -> Vec<PlannedApplication> {
    let mut remaining = balance;
    let mut plan = Vec::new();

    for invoice in unsettled {
        if remaining <= Decimal::ZERO {
            break;
        }
        if invoice.balance_due <= Decimal::ZERO {
            continue;
        }

        let full = remaining >= invoice.balance_due;
        let amount = if full { invoice.balance_due } else { remaining };
        plan.push(PlannedApplication {
            invoice_id: invoice.id,
            amount,
            full,
            new_amount_paid: invoice.amount_paid + amount,
            new_balance_due: invoice.balance_due - amount,
        });
        remaining -= amount;

        // Wallet exhausted mid-invoice: later invoices are untouched this run.
        if !full {
            break;
        }
    }

    plan
}

/// Receipt numbers mirror the invoice number.
pub fn receipt_number_for(invoice_number: &str) -> String {
    match invoice_number.strip_prefix("INV-") {
        Some(rest) => format!("RCT-{rest}"),
        None => format!("RCT-{invoice_number}"),
    }
}

fn mentions_security_deposit(desc: Option<&str>) -> bool {
    desc.map(|d| d.to_ascii_lowercase().contains("deposit"))
        .unwrap_or(false)
}

/// Apply one planned application inside the caller's locked transaction:
/// debit the wallet, move the invoice, upsert its receipt, flip a pending
/// security deposit on full settlement. Returns the wallet balance after.
pub async fn execute_application(
    conn: &mut PgConnection,
    tenant: &Tenant,
    invoice: &Invoice,
    app: &PlannedApplication,
    balance_before: Decimal,
) -> AppResult<Decimal> {
    let now = Utc::now();
    let entry = wallet::debit_locked(
        conn,
        tenant.id,
        balance_before,
        app.amount,
        WalletEntryKind::DebitInvoice,
        Some(&invoice.invoice_number),
        Some(&format!("Settlement of invoice {}", invoice.invoice_number)),
    )
    .await?;

    let status = if app.full {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::PartiallyPaid
    };
    invoices::apply_payment(
        conn,
        invoice.id,
        app.new_amount_paid,
        app.new_balance_due,
        status,
        app.full.then_some(now),
    )
    .await?;

    receipts::upsert(
        conn,
        invoice.id,
        tenant.id,
        &receipt_number_for(&invoice.invoice_number),
        app.new_amount_paid,
    )
    .await?;

    if app.full
        && mentions_security_deposit(invoice.other_charges_desc.as_deref())
        && tenant.deposit_status == crate::models::deposit_status::PENDING
    {
        tenants::set_deposit_collected(conn, tenant.id).await?;
    }

    Ok(entry.balance_after)
}

/// Settle one tenant's outstanding invoices from the wallet, in a single
/// transaction under the tenant row lock.
pub async fn settle_tenant_invoices(pool: &PgPool, tenant_id: Uuid) -> AppResult<TenantSettlement> {
    let mut tx = pool.begin().await.map_err(AppError::Database)?;
    let tenant = tenants::lock_for_update(&mut *tx, tenant_id).await?;

    let mut result = TenantSettlement::default();
    if tenant.wallet_balance <= Decimal::ZERO {
        return Ok(result);
    }

    let unsettled = invoices::unsettled_for_tenant_locked(&mut *tx, tenant_id).await?;
    let plan = plan_settlement(tenant.wallet_balance, &unsettled);
    if plan.is_empty() {
        return Ok(result);
    }

    let mut balance = tenant.wallet_balance;
    for app in plan {
        let Some(invoice) = unsettled.iter().find(|i| i.id == app.invoice_id) else {
            continue;
        };
        balance = execute_application(&mut *tx, &tenant, invoice, &app, balance).await?;
        if app.full {
            result.settled += 1;
        } else {
            result.partial += 1;
        }
    }

    tx.commit().await.map_err(AppError::Database)?;

    info!(
        tenant_id = %tenant_id,
        settled = result.settled,
        partial = result.partial,
        "Wallet settlement applied"
    );

    Ok(result)
}

/// Post-commit notification pass for a tenant's settlement outcome.
/// Fire-and-forget; a 24h cooldown per invoice suppresses the spam that
/// repeated small top-ups would otherwise generate.
pub async fn notify_settlement_outcome(state: AppState, tenant_id: Uuid) {
    let Some(pool) = state.db_pool.clone() else {
        return;
    };
    let tenant = match tenants::find(&pool, tenant_id).await {
        Ok(Some(t)) => t,
        _ => return,
    };
    let recent = match invoices::list_for_tenant(&pool, tenant_id, 12).await {
        Ok(list) => list,
        Err(_) => return,
    };
    let cooldown_start = Utc::now() - Duration::hours(24);

    for invoice in recent {
        let (kind, subject, body) = match invoice.status() {
            Some(InvoiceStatus::Paid) if invoice.paid_at.map(|t| t >= cooldown_start).unwrap_or(false) => (
                notification_type::RECEIPT_SENT,
                format!("Receipt {}", receipt_number_for(&invoice.invoice_number)),
                format!(
                    "Dear {}, your payment of KES {} for invoice {} has been received in full. \
                     Thank you.\n— Nyumbani",
                    tenant.full_name, invoice.amount_paid, invoice.invoice_number
                ),
            ),
            Some(InvoiceStatus::PartiallyPaid) => (
                notification_type::RECEIPT_SENT,
                format!("Payment received — {}", invoice.invoice_number),
                format!(
                    "Dear {}, we received a payment towards invoice {}. Paid so far: KES {}. \
                     Outstanding balance: KES {}.\n— Nyumbani",
                    tenant.full_name,
                    invoice.invoice_number,
                    invoice.amount_paid,
                    invoice.balance_due
                ),
            ),
            _ => continue,
        };

        let already = notifications::sent_count_since(
            &pool,
            invoice.id,
            &[notification_type::INVOICE_SENT, notification_type::RECEIPT_SENT],
            cooldown_start,
        )
        .await
        .unwrap_or(0);
        if already > 0 {
            continue;
        }

        notify::dispatch(
            &pool,
            &state.http_client,
            &state.config,
            notify::OutboundMessage {
                tenant_id,
                invoice_id: Some(invoice.id),
                kind,
                phone: Some(tenant.phone.clone()),
                email: tenant.email.clone(),
                subject,
                body,
            },
        )
        .await;
    }
}

/// Scheduled sweep over every tenant with money in the wallet and debt on
/// the books. Reentrant triggers are dropped, not queued.
pub async fn settle_pending_invoices(state: &AppState) -> SettlementRunSummary {
    let mut summary = SettlementRunSummary::default();

    let Some(pool) = state.db_pool.clone() else {
        return summary;
    };

    if state
        .settlement_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("Settlement sweep already running, skipping trigger");
        return summary;
    }

    let tenant_ids = match tenants::with_wallet_and_debt(&pool).await {
        Ok(ids) => ids,
        Err(error) => {
            warn!(error = %error, "Failed to list tenants for settlement sweep");
            state.settlement_running.store(false, Ordering::SeqCst);
            summary.errors += 1;
            return summary;
        }
    };

    for tenant_id in tenant_ids {
        match settle_tenant_invoices(&pool, tenant_id).await {
            Ok(result) => {
                summary.tenants_processed += 1;
                summary.invoices_settled += result.settled;
                summary.invoices_partial += result.partial;
                if result.settled > 0 || result.partial > 0 {
                    let state = state.clone();
                    tokio::spawn(notify_settlement_outcome(state, tenant_id));
                }
            }
            Err(error) => {
                warn!(tenant_id = %tenant_id, error = %error, "Tenant settlement failed");
                summary.errors += 1;
            }
        }
    }

    state.settlement_running.store(false, Ordering::SeqCst);

    info!(
        tenants = summary.tenants_processed,
        settled = summary.invoices_settled,
        partial = summary.invoices_partial,
        errors = summary.errors,
        "Settlement sweep completed"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn invoice(month: (i32, u32), balance_due: Decimal, amount_paid: Decimal) -> Invoice {
        let billing_month = NaiveDate::from_ymd_opt(month.0, month.1, 1).unwrap();
        Invoice {
            id: Uuid::new_v4(),
            invoice_number: format!("INV-A1-{}-{:02}", month.0, month.1),
            tenant_id: Uuid::new_v4(),
            billing_month,
            rent_amount: dec!(0),
            water_charge: dec!(0),
            electricity_charge: dec!(0),
            other_charges: dec!(0),
            other_charges_desc: None,
            subtotal: balance_due + amount_paid,
            penalty_amount: dec!(0),
            total_amount: balance_due + amount_paid,
            amount_paid,
            balance_due,
            status: InvoiceStatus::UNPAID.to_string(),
            due_date: Utc.with_ymd_and_hms(month.0, month.1, 5, 20, 59, 59).unwrap(),
            paid_at: None,
            penalty_applied_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pays_oldest_in_full_then_partial() {
        let jan = invoice((2025, 1), dec!(1000), dec!(0));
        let feb = invoice((2025, 2), dec!(2000), dec!(0));
        let plan = plan_settlement(dec!(1500), &[jan.clone(), feb.clone()]);

        assert_eq!(plan.len(), 2);
        assert!(plan[0].full);
        assert_eq!(plan[0].invoice_id, jan.id);
        assert_eq!(plan[0].amount, dec!(1000));
        assert!(!plan[1].full);
        assert_eq!(plan[1].invoice_id, feb.id);
        assert_eq!(plan[1].amount, dec!(500));
        assert_eq!(plan[1].new_balance_due, dec!(1500));
    }

    #[test]
    fn stops_after_partial_application() {
        let a = invoice((2025, 1), dec!(1000), dec!(0));
        let b = invoice((2025, 2), dec!(1000), dec!(0));
        let c = invoice((2025, 3), dec!(1000), dec!(0));
        let plan = plan_settlement(dec!(1200), &[a, b, c.clone()]);

        assert_eq!(plan.len(), 2);
        assert!(!plan[1].full);
        assert!(plan.iter().all(|p| p.invoice_id != c.id));
    }

    #[test]
    fn exact_balance_settles_in_full() {
        let only = invoice((2025, 4), dec!(35000), dec!(0));
        let plan = plan_settlement(dec!(35000), &[only.clone()]);

        assert_eq!(plan.len(), 1);
        assert!(plan[0].full);
        assert_eq!(plan[0].amount, dec!(35000));
        assert_eq!(plan[0].new_amount_paid, dec!(35000));
        assert_eq!(plan[0].new_balance_due, dec!(0));
    }

    #[test]
    fn empty_wallet_plans_nothing() {
        let only = invoice((2025, 4), dec!(5000), dec!(0));
        assert!(plan_settlement(dec!(0), &[only]).is_empty());
    }

    #[test]
    fn partial_payment_tracks_prior_amount_paid() {
        let partly = invoice((2025, 2), dec!(1500), dec!(500));
        let plan = plan_settlement(dec!(700), &[partly]);

        assert_eq!(plan.len(), 1);
        assert!(!plan[0].full);
        assert_eq!(plan[0].new_amount_paid, dec!(1200));
        assert_eq!(plan[0].new_balance_due, dec!(800));
    }

    #[test]
    fn receipt_number_mirrors_invoice_number() {
        assert_eq!(receipt_number_for("INV-A1-2025-06"), "RCT-A1-2025-06");
        assert_eq!(receipt_number_for("LEGACY-7"), "RCT-LEGACY-7");
    }

    #[test]
    fn detects_security_deposit_description() {
        assert!(mentions_security_deposit(Some("Security Deposit")));
        assert!(mentions_security_deposit(Some("security deposit + garbage")));
        assert!(!mentions_security_deposit(Some("Garbage collection")));
        assert!(!mentions_security_deposit(None));
    }
}
