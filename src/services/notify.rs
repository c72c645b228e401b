//! Notification gateway: SMS / email / WhatsApp delivery plus the
//! persistence of every attempt.
//!
//! All senders are non-throwing: provider failures come back as a flag and
//! are written into the notification row, never propagated into the billing
//! transaction that triggered them. A periodic sweep re-attempts FAILED and
//! PENDING rows up to the configured retry ceiling.

use reqwest::Client;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{notification_channel, notification_status, Notification};
use crate::repository::notifications::{self, NewNotification};

#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub success: bool,
    pub provider_id: Option<String>,
}

/// Send an SMS through the configured HTTP gateway. Never errors; a missing
/// configuration or provider failure is a `success: false` outcome.
pub async fn send_sms(client: &Client, config: &AppConfig, phone: &str, message: &str) -> SendOutcome {
    let (Some(api_url), Some(api_key)) = (config.sms_api_url.as_deref(), config.sms_api_key.as_deref())
    else {
        warn!("SMS_API_URL / SMS_API_KEY not configured, SMS not sent");
        return SendOutcome::default();
    };

    let response = client
        .post(api_url)
        .header("apiKey", api_key)
        .json(&json!({
            "from": config.sms_sender_id,
            "to": phone,
            "message": message,
        }))
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            SendOutcome {
                success: true,
                provider_id: body
                    .get("messageId")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
            }
        }
        Ok(resp) => {
            warn!(status = %resp.status(), "SMS gateway rejected message");
            SendOutcome::default()
        }
        Err(error) => {
            warn!(error = %error, "SMS gateway request failed");
            SendOutcome::default()
        }
    }
}

/// Send an email via the Resend API. Returns the provider message id on
/// success, None on any failure.
pub async fn send_email(
    client: &Client,
    config: &AppConfig,
    to: &str,
    subject: &str,
    html: &str,
) -> Option<String> {
    let api_key = config.resend_api_key.as_deref()?;

    let response = client
        .post("https://api.resend.com/emails")
        .bearer_auth(api_key)
        .json(&json!({
            "from": config.email_from_address,
            "to": [to],
            "subject": subject,
            "html": html,
        }))
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            let body: Value = resp.json().await.ok()?;
            body.get("id").and_then(Value::as_str).map(ToOwned::to_owned)
        }
        Ok(resp) => {
            warn!(status = %resp.status(), "Resend rejected email");
            None
        }
        Err(error) => {
            warn!(error = %error, "Resend request failed");
            None
        }
    }
}

/// Send a WhatsApp text through the Cloud API.
pub async fn send_whatsapp(
    client: &Client,
    config: &AppConfig,
    phone: &str,
    message: &str,
) -> SendOutcome {
    let (Some(phone_number_id), Some(access_token)) = (
        config.whatsapp_phone_number_id.as_deref(),
        config.whatsapp_access_token.as_deref(),
    ) else {
        return SendOutcome::default();
    };

    let url = format!("https://graph.facebook.com/v21.0/{phone_number_id}/messages");
    let response = client
        .post(url)
        .bearer_auth(access_token)
        .json(&json!({
            "messaging_product": "whatsapp",
            "to": phone,
            "type": "text",
            "text": { "body": message },
        }))
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => SendOutcome { success: true, provider_id: None },
        Ok(resp) => {
            warn!(status = %resp.status(), "WhatsApp Cloud API rejected message");
            SendOutcome::default()
        }
        Err(error) => {
            warn!(error = %error, "WhatsApp Cloud API request failed");
            SendOutcome::default()
        }
    }
}

/// One message to deliver on whichever of the tenant's channels exist.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub tenant_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub kind: &'static str,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub subject: String,
    pub body: String,
}

/// Attempt delivery and persist one notification row per channel attempted.
/// Always returns; fire-and-forget callers spawn this after their commit.
pub async fn dispatch(pool: &PgPool, client: &Client, config: &AppConfig, msg: OutboundMessage) {
    if let Some(phone) = msg.phone.as_deref().filter(|p| !p.is_empty()) {
        let outcome = send_sms(client, config, phone, &msg.body).await;
        record(
            pool,
            &msg,
            notification_channel::SMS,
            phone,
            outcome.success,
            if outcome.success { None } else { Some("sms send failed") },
        )
        .await;
    }

    if let Some(email) = msg.email.as_deref().filter(|e| !e.is_empty()) {
        let message_id = send_email(
            client,
            config,
            email,
            &msg.subject,
            &format!("<p>{}</p>", msg.body.replace('\n', "<br>")),
        )
        .await;
        record(
            pool,
            &msg,
            notification_channel::EMAIL,
            email,
            message_id.is_some(),
            if message_id.is_some() { None } else { Some("email send failed") },
        )
        .await;
    }
}

async fn record(
    pool: &PgPool,
    msg: &OutboundMessage,
    channel: &str,
    recipient: &str,
    success: bool,
    fail_reason: Option<&str>,
) {
    let status = if success {
        notification_status::SENT
    } else {
        notification_status::FAILED
    };
    let result = notifications::insert(
        pool,
        NewNotification {
            tenant_id: msg.tenant_id,
            invoice_id: msg.invoice_id,
            kind: msg.kind,
            channel,
            recipient,
            message: &msg.body,
            status,
            sent_at: success.then(chrono::Utc::now),
            fail_reason,
        },
    )
    .await;

    if let Err(error) = result {
        warn!(kind = msg.kind, channel, error = %error, "Failed to record notification");
    }
}

/// Periodic retry sweep over FAILED / PENDING notification rows. Ledger
/// correctness never depends on this; it only drains the delivery backlog.
pub async fn process_pending_notifications(
    pool: &PgPool,
    client: &Client,
    config: &AppConfig,
) -> (u32, u32) {
    let due = match notifications::due_for_retry(pool, config.notification_max_retries, 100).await {
        Ok(rows) => rows,
        Err(error) => {
            warn!(error = %error, "Failed to fetch notifications for retry");
            return (0, 0);
        }
    };

    let mut sent = 0u32;
    let mut failed = 0u32;

    for row in due {
        let delivered = attempt_channel(client, config, &row).await;
        let update = if delivered {
            sent += 1;
            notifications::mark_sent(pool, row.id).await
        } else {
            failed += 1;
            notifications::mark_failed(pool, row.id, "retry send failed").await
        };
        if let Err(error) = update {
            warn!(notification_id = %row.id, error = %error, "Failed to update notification row");
        }
    }

    if sent > 0 || failed > 0 {
        info!(sent, failed, "Notification retry sweep completed");
    }
    (sent, failed)
}

async fn attempt_channel(client: &Client, config: &AppConfig, row: &Notification) -> bool {
    match row.channel.as_str() {
        notification_channel::SMS => send_sms(client, config, &row.recipient, &row.message)
            .await
            .success,
        notification_channel::EMAIL => send_email(
            client,
            config,
            &row.recipient,
            "Nyumbani account update",
            &format!("<p>{}</p>", row.message.replace('\n', "<br>")),
        )
        .await
        .is_some(),
        notification_channel::WHATSAPP => {
            send_whatsapp(client, config, &row.recipient, &row.message)
                .await
                .success
        }
        other => {
            warn!(channel = other, "Unknown notification channel");
            false
        }
    }
}
