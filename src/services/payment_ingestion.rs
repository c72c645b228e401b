//! Inbound mobile-money flows: STK push callbacks, C2B paybill
//! confirmations, and manual reconciliation of unmatched money.
//!
//! Both inbound flows are idempotent on provider-issued keys (the checkout
//! request id for push payments, the transaction id (receipt number) for
//! paybill confirmations), and both end the same way: credit the wallet,
//! then settle the tenant's oldest debt.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{payment_status, Payment, WalletEntryKind};
use crate::repository::{payments, tenants};
use crate::services::{audit, mpesa, settlement, wallet};
use crate::state::AppState;

/// Provider acknowledgement body. Daraja treats ResultCode 0 as final; any
/// other shape triggers redelivery, so internal failures still ack.
pub fn provider_ack(code: i64, desc: &str) -> Value {
    json!({ "ResultCode": code, "ResultDesc": desc })
}

#[derive(Debug, Clone, PartialEq)]
pub struct StkCallbackData {
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    pub receipt_number: Option<String>,
    pub amount: Option<Decimal>,
    pub phone: Option<String>,
}

/// Pull the interesting fields out of `Body.stkCallback`.
pub fn parse_stk_callback(payload: &Value) -> Option<StkCallbackData> {
    let callback = payload.get("Body")?.get("stkCallback")?;
    let checkout_request_id = callback
        .get("CheckoutRequestID")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();
    let result_code = callback.get("ResultCode")?.as_i64()?;
    let result_desc = callback
        .get("ResultDesc")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut receipt_number = None;
    let mut amount = None;
    let mut phone = None;
    if let Some(items) = callback
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(Value::as_array)
    {
        for item in items {
            let name = item.get("Name").and_then(Value::as_str).unwrap_or_default();
            let value = item.get("Value");
            match name {
                "MpesaReceiptNumber" => {
                    receipt_number = value
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToOwned::to_owned);
                }
                "Amount" => amount = value.and_then(decimal_from_value),
                "PhoneNumber" => {
                    phone = value.map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    Some(StkCallbackData {
        checkout_request_id,
        result_code,
        result_desc,
        receipt_number,
        amount,
        phone,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct C2bConfirmationData {
    pub trans_id: String,
    pub amount: Decimal,
    pub bill_ref_number: String,
    pub msisdn: Option<String>,
    pub payer_name: Option<String>,
}

pub fn parse_c2b_confirmation(payload: &Value) -> Option<C2bConfirmationData> {
    let trans_id = payload
        .get("TransID")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();
    let amount = payload.get("TransAmount").and_then(decimal_from_value)?;
    let bill_ref_number = payload
        .get("BillRefNumber")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let msisdn = payload.get("MSISDN").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let payer_name = payload
        .get("FirstName")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);

    Some(C2bConfirmationData {
        trans_id,
        amount,
        bill_ref_number,
        msisdn,
        payer_name,
    })
}

/// Daraja sends amounts as numbers or numeric strings depending on the API.
fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .map(|d| d.round_dp(2)),
        Value::String(s) => s.trim().parse::<Decimal>().ok().map(|d| d.round_dp(2)),
        _ => None,
    }
}

/// Credit the wallet for a completed payment, then settle oldest-first.
/// Called outside any payment-row lock.
async fn credit_and_settle(
    state: &AppState,
    pool: &PgPool,
    tenant_id: Uuid,
    amount: Decimal,
    kind: WalletEntryKind,
    reference: &str,
    description: &str,
) {
    match wallet::credit(pool, tenant_id, amount, kind, Some(reference), Some(description)).await {
        Ok(entry) => {
            info!(
                tenant_id = %tenant_id,
                amount = %amount,
                reference,
                balance_after = %entry.balance_after,
                "Wallet credited from payment"
            );
        }
        Err(error) => {
            warn!(tenant_id = %tenant_id, reference, error = %error, "Wallet credit failed");
            return;
        }
    }

    match settlement::settle_tenant_invoices(pool, tenant_id).await {
        Ok(result) if result.settled > 0 || result.partial > 0 => {
            tokio::spawn(settlement::notify_settlement_outcome(state.clone(), tenant_id));
        }
        Ok(_) => {}
        Err(error) => {
            warn!(tenant_id = %tenant_id, error = %error, "Post-payment settlement failed");
        }
    }
}

/// Process an STK push result callback. Always returns a provider ack.
pub async fn handle_stk_callback(state: &AppState, payload: &Value) -> Value {
    let Some(pool) = state.db_pool.clone() else {
        return provider_ack(0, "Accepted");
    };

    let Some(data) = parse_stk_callback(payload) else {
        warn!("Malformed STK callback payload, dropping");
        return provider_ack(0, "Accepted");
    };

    match process_stk_callback(state, &pool, &data).await {
        Ok(()) => {}
        Err(error) => {
            warn!(
                checkout_request_id = %data.checkout_request_id,
                error = %error,
                "STK callback processing failed"
            );
        }
    }

    provider_ack(0, "Accepted")
}

async fn process_stk_callback(
    state: &AppState,
    pool: &PgPool,
    data: &StkCallbackData,
) -> AppResult<()> {
    let mut tx = pool.begin().await.map_err(AppError::Database)?;

    let Some(payment) =
        payments::lock_by_checkout_request_id(&mut *tx, &data.checkout_request_id).await?
    else {
        info!(checkout_request_id = %data.checkout_request_id, "Unknown STK callback, dropping");
        return Ok(());
    };

    // Replays of an already-processed callback are a no-op.
    if payment.status != payment_status::PENDING {
        info!(payment_id = %payment.id, status = %payment.status, "STK callback already processed");
        return Ok(());
    }

    if data.result_code != 0 {
        payments::mark_failed_in_tx(
            &mut *tx,
            payment.id,
            &format!("stk result {}: {}", data.result_code, data.result_desc),
        )
        .await?;
        tx.commit().await.map_err(AppError::Database)?;
        info!(payment_id = %payment.id, result_code = data.result_code, "STK push failed");
        return Ok(());
    }

    let (Some(receipt_number), Some(amount)) = (data.receipt_number.as_deref(), data.amount) else {
        payments::mark_failed_in_tx(&mut *tx, payment.id, "stk success without receipt metadata")
            .await?;
        tx.commit().await.map_err(AppError::Database)?;
        return Ok(());
    };

    payments::mark_completed(&mut *tx, payment.id, receipt_number, amount).await?;
    tx.commit().await.map_err(AppError::Database)?;

    // Wallet credit and settlement run outside the payment-row lock.
    if let Some(tenant_id) = payment.tenant_id {
        credit_and_settle(
            state,
            pool,
            tenant_id,
            amount,
            WalletEntryKind::Credit,
            receipt_number,
            "M-Pesa STK push payment",
        )
        .await;
    }

    Ok(())
}

/// Process a C2B paybill confirmation. Always returns a provider ack.
pub async fn handle_c2b_confirmation(state: &AppState, payload: &Value) -> Value {
    let Some(pool) = state.db_pool.clone() else {
        return provider_ack(0, "Accepted");
    };

    let Some(data) = parse_c2b_confirmation(payload) else {
        warn!("Malformed C2B confirmation payload, dropping");
        return provider_ack(0, "Accepted");
    };

    if let Err(error) = process_c2b_confirmation(state, &pool, &data).await {
        warn!(trans_id = %data.trans_id, error = %error, "C2B confirmation processing failed");
    }

    provider_ack(0, "Accepted")
}

async fn process_c2b_confirmation(
    state: &AppState,
    pool: &PgPool,
    data: &C2bConfirmationData,
) -> AppResult<()> {
    // The receipt number is the idempotency key for paybill money.
    if payments::exists_by_receipt_number(pool, &data.trans_id).await? {
        info!(trans_id = %data.trans_id, "Duplicate C2B confirmation, dropping");
        return Ok(());
    }

    let tenant = tenants::find_active_by_unit_number(pool, &data.bill_ref_number).await?;

    match tenant {
        Some(tenant) => {
            payments::insert_completed_c2b(
                pool,
                Some(tenant.id),
                data.amount,
                data.msisdn.as_deref(),
                &data.trans_id,
                None,
            )
            .await?;
            credit_and_settle(
                state,
                pool,
                tenant.id,
                data.amount,
                WalletEntryKind::Credit,
                &data.trans_id,
                "M-Pesa paybill payment",
            )
            .await;
        }
        None => {
            // Money with no matching unit is held until a human reconciles it.
            let note = format!(
                "unmatched account reference '{}' from {}",
                data.bill_ref_number,
                data.payer_name.as_deref().unwrap_or("unknown payer")
            );
            let payment = payments::insert_completed_c2b(
                pool,
                None,
                data.amount,
                data.msisdn.as_deref(),
                &data.trans_id,
                Some(&note),
            )
            .await?;
            warn!(
                payment_id = %payment.id,
                trans_id = %data.trans_id,
                bill_ref = %data.bill_ref_number,
                "C2B payment held for reconciliation"
            );
            audit::write_audit_log(
                Some(pool),
                "payment_needs_reconciliation",
                None,
                "payment",
                &payment.id.to_string(),
                &note,
                None,
            )
            .await;
        }
    }

    Ok(())
}

/// C2B validation probe: accept everything. Unmatched money is held for
/// reconciliation instead of bounced at the till.
pub fn handle_c2b_validation(_payload: &Value) -> Value {
    provider_ack(0, "Accepted")
}

/// Kick off an STK push towards a tenant's phone. The PENDING payment row
/// exists before the provider call so a timeout can flip it to FAILED.
pub async fn initiate_push_payment(
    state: &AppState,
    tenant_id: Uuid,
    amount: Decimal,
    phone_override: Option<&str>,
) -> AppResult<Payment> {
    let pool = state
        .db_pool
        .clone()
        .ok_or_else(|| AppError::Dependency("Database is not configured.".to_string()))?;

    if amount < Decimal::ONE {
        return Err(AppError::BadRequest("Amount must be at least 1 KES.".to_string()));
    }

    let tenant = tenants::find(&pool, tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Tenant not found.".to_string()))?;
    let phone = phone_override
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(&tenant.phone)
        .to_string();
    if phone.is_empty() {
        return Err(AppError::BadRequest("Tenant has no phone number on file.".to_string()));
    }

    let payment = payments::insert_pending_stk(&pool, tenant_id, amount, &phone).await?;

    let amount_whole = amount
        .round()
        .to_i64()
        .ok_or_else(|| AppError::BadRequest("Amount out of range.".to_string()))?;
    let request = mpesa::StkPushRequest {
        phone: phone.clone(),
        amount_whole,
        account_reference: "RENT".to_string(),
        description: format!("Rent payment for {}", tenant.full_name),
    };

    match mpesa::initiate_stk_push(&state.http_client, &state.config, &request).await {
        Ok(response) => {
            payments::set_checkout_request_id(&pool, payment.id, &response.checkout_request_id)
                .await?;
            info!(
                payment_id = %payment.id,
                checkout_request_id = %response.checkout_request_id,
                merchant_request_id = %response.merchant_request_id,
                "STK push initiated"
            );
            Ok(payment)
        }
        Err(error) => {
            payments::mark_failed(&pool, payment.id, &format!("initiation failed: {error}"))
                .await?;
            Err(AppError::Dependency(error))
        }
    }
}

/// Manually attach an unmatched paybill payment to a tenant. Credits the
/// wallet under the reconciliation entry kind and settles immediately.
pub async fn reconcile_payment(
    state: &AppState,
    payment_id: Uuid,
    target_tenant_id: Uuid,
    reconciled_by: &str,
    note: Option<&str>,
) -> AppResult<()> {
    let pool = state
        .db_pool
        .clone()
        .ok_or_else(|| AppError::Dependency("Database is not configured.".to_string()))?;

    let mut tx = pool.begin().await.map_err(AppError::Database)?;

    let payment = payments::lock_by_id(&mut *tx, payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Payment not found.".to_string()))?;

    if payment.status != payment_status::COMPLETED {
        return Err(AppError::UnprocessableEntity(
            "Only completed payments can be reconciled.".to_string(),
        ));
    }
    if !payment.needs_reconciliation || payment.reconciled_at.is_some() {
        return Err(AppError::Conflict("Payment is already reconciled.".to_string()));
    }

    let tenant = tenants::lock_for_update(&mut *tx, target_tenant_id).await?;

    let reference = payment
        .mpesa_receipt_number
        .clone()
        .unwrap_or_else(|| payment.id.to_string());
    wallet::credit_locked(
        &mut *tx,
        tenant.id,
        tenant.wallet_balance,
        payment.amount,
        WalletEntryKind::CreditReconciliation,
        Some(&reference),
        Some("Reconciled paybill payment"),
    )
    .await?;
    payments::mark_reconciled(&mut *tx, payment.id, tenant.id, reconciled_by, note).await?;

    tx.commit().await.map_err(AppError::Database)?;

    audit::write_audit_log(
        Some(&pool),
        "reconcile_payment",
        Some(reconciled_by),
        "payment",
        &payment_id.to_string(),
        &format!("reconciled to tenant {target_tenant_id}"),
        Some(json!({ "amount": payment.amount.to_string(), "reference": reference })),
    )
    .await;

    match settlement::settle_tenant_invoices(&pool, target_tenant_id).await {
        Ok(result) if result.settled > 0 || result.partial > 0 => {
            tokio::spawn(settlement::notify_settlement_outcome(
                state.clone(),
                target_tenant_id,
            ));
        }
        Ok(_) => {}
        Err(error) => {
            warn!(tenant_id = %target_tenant_id, error = %error, "Post-reconciliation settlement failed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stk_payload(result_code: i64, with_metadata: bool) -> Value {
        let mut callback = json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResultCode": result_code,
            "ResultDesc": "ok",
        });
        if with_metadata {
            callback["CallbackMetadata"] = json!({
                "Item": [
                    { "Name": "Amount", "Value": 12500.0 },
                    { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                    { "Name": "TransactionDate", "Value": 20191219102115u64 },
                    { "Name": "PhoneNumber", "Value": 254708374149u64 },
                ]
            });
        }
        json!({ "Body": { "stkCallback": callback } })
    }

    #[test]
    fn parses_successful_stk_callback() {
        let data = parse_stk_callback(&stk_payload(0, true)).unwrap();
        assert_eq!(data.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(data.result_code, 0);
        assert_eq!(data.receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(data.amount, Some(dec!(12500)));
    }

    #[test]
    fn parses_failed_stk_callback_without_metadata() {
        let data = parse_stk_callback(&stk_payload(1032, false)).unwrap();
        assert_eq!(data.result_code, 1032);
        assert!(data.receipt_number.is_none());
        assert!(data.amount.is_none());
    }

    #[test]
    fn rejects_callback_without_checkout_request_id() {
        let payload = json!({ "Body": { "stkCallback": { "ResultCode": 0 } } });
        assert!(parse_stk_callback(&payload).is_none());
    }

    #[test]
    fn parses_c2b_confirmation_with_string_amount() {
        let payload = json!({
            "TransID": "RKTQDM7W6S",
            "TransAmount": "15000.00",
            "BusinessShortCode": "600638",
            "BillRefNumber": " a12 ",
            "MSISDN": "254708374149",
            "FirstName": "John",
        });
        let data = parse_c2b_confirmation(&payload).unwrap();
        assert_eq!(data.trans_id, "RKTQDM7W6S");
        assert_eq!(data.amount, dec!(15000));
        assert_eq!(data.bill_ref_number, "a12");
        assert_eq!(data.payer_name.as_deref(), Some("John"));
    }

    #[test]
    fn rejects_confirmation_without_trans_id() {
        let payload = json!({ "TransAmount": "100", "BillRefNumber": "A1" });
        assert!(parse_c2b_confirmation(&payload).is_none());
    }

    #[test]
    fn validation_always_accepts() {
        let ack = handle_c2b_validation(&json!({ "BillRefNumber": "NOPE" }));
        assert_eq!(ack["ResultCode"], 0);
    }

    #[test]
    fn decimal_parsing_handles_both_shapes() {
        assert_eq!(decimal_from_value(&json!(99.99)), Some(dec!(99.99)));
        assert_eq!(decimal_from_value(&json!("150")), Some(dec!(150)));
        assert_eq!(decimal_from_value(&json!(null)), None);
    }
}
