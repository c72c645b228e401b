//! Daraja (M-Pesa) API client: OAuth token fetch and STK push initiation.
//!
//! Every outbound call carries an explicit timeout; a hung provider call
//! must surface as an error the caller can turn into a FAILED payment, not
//! an eternally PENDING one.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct StkPushRequest {
    pub phone: String,
    pub amount_whole: i64,
    pub account_reference: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct StkPushResponse {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
}

/// Daraja wants local Kenya time in `YYYYMMDDHHMMSS`.
pub fn daraja_timestamp(at: chrono::DateTime<Utc>) -> String {
    crate::business_day::business_datetime(at)
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// STK password: base64(shortcode + passkey + timestamp).
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{shortcode}{passkey}{timestamp}"))
}

/// Fetch an OAuth access token from Daraja.
pub async fn fetch_access_token(client: &Client, config: &AppConfig) -> Result<String, String> {
    let (Some(consumer_key), Some(consumer_secret)) = (
        config.mpesa_consumer_key.as_deref(),
        config.mpesa_consumer_secret.as_deref(),
    ) else {
        return Err("MPESA_CONSUMER_KEY / MPESA_CONSUMER_SECRET not configured.".to_string());
    };

    let response = client
        .get(format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            config.mpesa_api_base_url
        ))
        .basic_auth(consumer_key, Some(consumer_secret))
        .timeout(Duration::from_secs(config.mpesa_request_timeout_seconds))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Daraja token request failed");
            "Daraja token request failed.".to_string()
        })?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if !status.is_success() {
        return Err(format!("Daraja token error ({status})"));
    }

    body.get("access_token")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| "Daraja token response missing access_token.".to_string())
}

/// Initiate an STK push. Returns the provider's request ids; the payment
/// lands later through the callback.
pub async fn initiate_stk_push(
    client: &Client,
    config: &AppConfig,
    request: &StkPushRequest,
) -> Result<StkPushResponse, String> {
    let shortcode = config
        .mpesa_shortcode
        .as_deref()
        .ok_or_else(|| "MPESA_SHORTCODE not configured.".to_string())?;
    let passkey = config
        .mpesa_passkey
        .as_deref()
        .ok_or_else(|| "MPESA_PASSKEY not configured.".to_string())?;

    let token = fetch_access_token(client, config).await?;
    let timestamp = daraja_timestamp(Utc::now());
    let callback_url = format!(
        "{}/v1/payments/callback/stk",
        config.mpesa_callback_base_url.trim_end_matches('/')
    );

    let response = client
        .post(format!(
            "{}/mpesa/stkpush/v1/processrequest",
            config.mpesa_api_base_url
        ))
        .bearer_auth(token)
        .timeout(Duration::from_secs(config.mpesa_request_timeout_seconds))
        .json(&json!({
            "BusinessShortCode": shortcode,
            "Password": stk_password(shortcode, passkey, &timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount_whole,
            "PartyA": request.phone,
            "PartyB": shortcode,
            "PhoneNumber": request.phone,
            "CallBackURL": callback_url,
            "AccountReference": request.account_reference,
            "TransactionDesc": request.description,
        }))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Daraja STK push request failed");
            "Daraja STK push request failed.".to_string()
        })?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .unwrap_or(json!({"error": "failed to parse response"}));

    if !status.is_success() {
        let detail = body
            .get("errorMessage")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Daraja error");
        return Err(format!("Daraja STK push error ({status}): {detail}"));
    }

    let merchant_request_id = body
        .get("MerchantRequestID")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let checkout_request_id = body
        .get("CheckoutRequestID")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if checkout_request_id.is_empty() {
        return Err("Daraja STK push response missing CheckoutRequestID.".to_string());
    }

    Ok(StkPushResponse {
        merchant_request_id,
        checkout_request_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_is_kenyan_local_time() {
        // 21:04:05 UTC is 00:04:05 the next day in Nairobi.
        let at = Utc.with_ymd_and_hms(2025, 6, 30, 21, 4, 5).unwrap();
        assert_eq!(daraja_timestamp(at), "20250701000405");
    }

    #[test]
    fn password_is_base64_of_concatenation() {
        let password = stk_password("174379", "key", "20250701000405");
        let decoded = BASE64.decode(password).unwrap();
        assert_eq!(decoded, b"174379key20250701000405");
    }
}
