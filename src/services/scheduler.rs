//! Background scheduler for the billing cycle.
//!
//! One 15-second tick loop dispatches the named jobs on their calendar
//! triggers, each in its own `tokio::spawn` so a failing job never takes
//! down the loop or its siblings. Calendar checks use business time, so
//! "01:00 daily" means 01:00 in Nairobi regardless of server timezone.
//!
//! Jobs:
//!   monthly-invoice-generation  1st of month, from 00:00
//!   daily-penalty               daily, from 01:00
//!   daily-reminder              daily, from 08:00
//!   bi-hourly-settlement        even hours, from :30
//!   notification-retry          every 5 minutes
//!   stale-payment-expiry        hourly

use std::time::Duration;

use chrono::{Datelike, Utc};
use tokio::time::sleep;

use crate::business_day;
use crate::services::{invoicing, penalties, reminders, settings, settlement};
use crate::state::AppState;

pub async fn run_background_scheduler(state: AppState) {
    tracing::info!("Background scheduler started");

    if state.db_pool.is_none() {
        tracing::warn!("Scheduler: no database pool configured, exiting");
        return;
    }

    let retry_interval =
        Duration::from_secs(state.config.notification_retry_interval_seconds.max(60));
    let mut last_retry_run = tokio::time::Instant::now();
    let mut last_expiry_run = tokio::time::Instant::now();

    let mut last_invoice_month: Option<(i32, u32)> = None;
    let mut last_penalty_day: Option<u32> = None;
    let mut last_reminder_day: Option<u32> = None;
    let mut last_settlement_slot: Option<(u32, u32)> = None;

    loop {
        sleep(Duration::from_secs(15)).await;

        let now_instant = tokio::time::Instant::now();
        let now = Utc::now();
        let today = business_day::business_date(now);
        let (hour, minute) = business_day::business_hour_minute(now);

        // --- Notification retry (every N seconds) ---
        if now_instant.duration_since(last_retry_run) >= retry_interval {
            last_retry_run = now_instant;
            let st = state.clone();
            tokio::spawn(async move {
                if let Some(pool) = st.db_pool.as_ref() {
                    let (sent, failed) = crate::services::notify::process_pending_notifications(
                        pool,
                        &st.http_client,
                        &st.config,
                    )
                    .await;
                    if sent > 0 || failed > 0 {
                        tracing::info!(sent, failed, "Scheduler: notification retries processed");
                    }
                }
            });
        }

        // --- Stale STK payment expiry (hourly) ---
        if now_instant.duration_since(last_expiry_run) >= Duration::from_secs(3600) {
            last_expiry_run = now_instant;
            let st = state.clone();
            tokio::spawn(async move {
                if let Some(pool) = st.db_pool.as_ref() {
                    let horizon = Utc::now() - chrono::Duration::hours(2);
                    match crate::repository::payments::expire_stale_pending(pool, horizon).await {
                        Ok(0) => {}
                        Ok(expired) => {
                            tracing::info!(expired, "Scheduler: stale STK payments expired")
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "Scheduler: stale payment expiry failed")
                        }
                    }
                }
            });
        }

        // --- Monthly invoice generation (1st of month, 00:00 business time) ---
        let month_key = (today.year(), today.month());
        if today.day() == 1 && last_invoice_month != Some(month_key) {
            last_invoice_month = Some(month_key);
            let st = state.clone();
            tokio::spawn(async move {
                let settings = settings::get_settings(&st).await;
                let summary = invoicing::generate_monthly_invoices(&st, &settings, None).await;
                tracing::info!(
                    generated = summary.generated,
                    settled = summary.settled,
                    "Scheduler: monthly invoice generation completed"
                );
            });
        }

        // --- Daily penalty accrual (01:00 business time) ---
        if hour >= 1 && last_penalty_day != Some(today.ordinal()) {
            last_penalty_day = Some(today.ordinal());
            let st = state.clone();
            tokio::spawn(async move {
                let summary = penalties::apply_penalties(&st).await;
                tracing::info!(
                    penalized = summary.penalized,
                    "Scheduler: penalty sweep completed"
                );
            });
        }

        // --- Daily reminders (08:00 business time, after penalties) ---
        if hour >= 8 && last_reminder_day != Some(today.ordinal()) {
            last_reminder_day = Some(today.ordinal());
            let st = state.clone();
            tokio::spawn(async move {
                let settings = settings::get_settings(&st).await;
                let summary = reminders::send_payment_reminders(&st, &settings).await;
                tracing::info!(sent = summary.sent, "Scheduler: reminder pass completed");
            });
        }

        // --- Bi-hourly settlement sweep (even hours, offset :30) ---
        let settlement_slot = (today.ordinal(), hour);
        if hour % 2 == 0 && minute >= 30 && last_settlement_slot != Some(settlement_slot) {
            last_settlement_slot = Some(settlement_slot);
            let st = state.clone();
            tokio::spawn(async move {
                let summary = settlement::settle_pending_invoices(&st).await;
                if summary.invoices_settled > 0 || summary.invoices_partial > 0 {
                    tracing::info!(
                        settled = summary.invoices_settled,
                        partial = summary.invoices_partial,
                        "Scheduler: settlement sweep completed"
                    );
                }
            });
        }
    }
}
