//! Daily payment reminders, banded by the day of the business month.
//!
//! Day 1 is generation day and stays quiet. Days 2-5 are the grace window
//! with a friendly nudge. From day 6 the copy switches to an overdue notice
//! with the penalty breakdown. Each invoice is reminded at most once per
//! business calendar day.

use chrono::Utc;
use tracing::{info, warn};

use crate::business_day;
use crate::error::AppResult;
use crate::models::{notification_type, Invoice};
use crate::repository::{invoices, notifications, tenants};
use crate::services::settings::SystemSettings;
use crate::services::{audit, notify};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ReminderRunSummary {
    pub sent: u32,
    pub skipped: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderBand {
    Quiet,
    Grace,
    Overdue,
}

impl ReminderBand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Grace => "grace",
            Self::Overdue => "overdue",
        }
    }
}

pub fn reminder_band(day_of_month: u32) -> ReminderBand {
    match day_of_month {
        1 => ReminderBand::Quiet,
        2..=5 => ReminderBand::Grace,
        _ => ReminderBand::Overdue,
    }
}

/// Daily reminder pass over unsettled invoices.
pub async fn send_payment_reminders(
    state: &AppState,
    settings: &SystemSettings,
) -> ReminderRunSummary {
    let mut summary = ReminderRunSummary::default();
    let Some(pool) = state.db_pool.clone() else {
        return summary;
    };

    let now = Utc::now();
    let band = reminder_band(business_day::business_day_of_month(now));
    if band == ReminderBand::Quiet {
        info!("Reminder pass skipped: generation day");
        return summary;
    }

    let unsettled = match invoices::unsettled_all(&pool, 2000).await {
        Ok(rows) => rows,
        Err(error) => {
            warn!(error = %error, "Failed to list invoices for reminders");
            summary.errors += 1;
            return summary;
        }
    };

    let (window_start, window_end) = business_day::business_day_utc_bounds(now);

    for invoice in &unsettled {
        match remind_invoice(state, settings, invoice, band, window_start, window_end).await {
            Ok(true) => summary.sent += 1,
            Ok(false) => summary.skipped += 1,
            Err(error) => {
                warn!(invoice_id = %invoice.id, error = %error, "Reminder failed");
                summary.errors += 1;
            }
        }
    }

    info!(
        band = band.as_str(),
        sent = summary.sent,
        skipped = summary.skipped,
        errors = summary.errors,
        "Reminder pass completed"
    );

    summary
}

async fn remind_invoice(
    state: &AppState,
    settings: &SystemSettings,
    invoice: &Invoice,
    band: ReminderBand,
    window_start: chrono::DateTime<Utc>,
    window_end: chrono::DateTime<Utc>,
) -> AppResult<bool> {
    let Some(pool) = state.db_pool.as_ref() else {
        return Ok(false);
    };

    if notifications::sent_in_window(
        pool,
        invoice.id,
        notification_type::PAYMENT_REMINDER,
        window_start,
        window_end,
    )
    .await?
    {
        return Ok(false);
    }

    let Some(tenant) = tenants::find(pool, invoice.tenant_id).await? else {
        return Ok(false);
    };

    let platform = &settings.platform_name;
    let body = match band {
        ReminderBand::Grace => format!(
            "Hello {}, a friendly reminder that invoice {} has an outstanding balance of \
             KES {}, due by {}. Kindly pay via the paybill to keep your account in good \
             standing.\n— {platform}",
            tenant.full_name,
            invoice.invoice_number,
            invoice.balance_due,
            business_day::business_date(invoice.due_date)
        ),
        ReminderBand::Overdue => format!(
            "Hello {}, invoice {} is overdue. Amount billed: KES {}. Late penalties so far: \
             KES {}. Outstanding balance: KES {}. Kindly settle immediately to stop further \
             daily penalties.\n— {platform}",
            tenant.full_name,
            invoice.invoice_number,
            invoice.total_amount,
            invoice.penalty_amount,
            invoice.balance_due
        ),
        ReminderBand::Quiet => return Ok(false),
    };

    notify::dispatch(
        pool,
        &state.http_client,
        &state.config,
        notify::OutboundMessage {
            tenant_id: tenant.id,
            invoice_id: Some(invoice.id),
            kind: notification_type::PAYMENT_REMINDER,
            phone: Some(tenant.phone.clone()),
            email: tenant.email.clone(),
            subject: format!("Payment reminder — {}", invoice.invoice_number),
            body,
        },
    )
    .await;

    audit::write_audit_log(
        Some(pool),
        "payment_reminder",
        None,
        "invoice",
        &invoice.id.to_string(),
        "payment reminder dispatched",
        Some(serde_json::json!({
            "period": band.as_str(),
            "invoice_number": invoice.invoice_number,
            "balance_due": invoice.balance_due.to_string(),
        })),
    )
    .await;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_day_is_quiet() {
        assert_eq!(reminder_band(1), ReminderBand::Quiet);
    }

    #[test]
    fn days_two_to_five_are_grace() {
        for day in 2..=5 {
            assert_eq!(reminder_band(day), ReminderBand::Grace);
        }
    }

    #[test]
    fn day_six_onwards_is_overdue() {
        assert_eq!(reminder_band(6), ReminderBand::Overdue);
        assert_eq!(reminder_band(15), ReminderBand::Overdue);
        assert_eq!(reminder_band(31), ReminderBand::Overdue);
    }
}
