#![allow(dead_code)]

//! Domain rows and status vocabularies for the billing engine.
//!
//! Statuses are stored as TEXT; the row structs keep them as `String` and the
//! enums own the parsing, so every branch point works on a typed value while
//! the repositories stay plain `query_as` reads.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod tenant_status {
    pub const ACTIVE: &str = "ACTIVE";
    pub const NOTICE_PERIOD: &str = "NOTICE_PERIOD";
    pub const VACATED: &str = "VACATED";
}

pub mod deposit_status {
    pub const PENDING: &str = "PENDING";
    pub const COLLECTED: &str = "COLLECTED";
    pub const REFUNDED: &str = "REFUNDED";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const UNPAID: &'static str = "UNPAID";
    pub const PARTIALLY_PAID: &'static str = "PARTIALLY_PAID";
    pub const PAID: &'static str = "PAID";
    pub const OVERDUE: &'static str = "OVERDUE";
    pub const CANCELLED: &'static str = "CANCELLED";

    /// Statuses an invoice can hold while money is still owed.
    pub const UNSETTLED: &'static [&'static str] =
        &[Self::UNPAID, Self::PARTIALLY_PAID, Self::OVERDUE];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => Self::UNPAID,
            Self::PartiallyPaid => Self::PARTIALLY_PAID,
            Self::Paid => Self::PAID,
            Self::Overdue => Self::OVERDUE,
            Self::Cancelled => Self::CANCELLED,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            Self::UNPAID => Some(Self::Unpaid),
            Self::PARTIALLY_PAID => Some(Self::PartiallyPaid),
            Self::PAID => Some(Self::Paid),
            Self::OVERDUE => Some(Self::Overdue),
            Self::CANCELLED => Some(Self::Cancelled),
            _ => None,
        }
    }
}

pub mod payment_status {
    pub const PENDING: &str = "PENDING";
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";
    pub const REVERSED: &str = "REVERSED";
}

pub mod payment_method {
    pub const MPESA_PAYBILL: &str = "MPESA_PAYBILL";
    pub const MPESA_STK_PUSH: &str = "MPESA_STK_PUSH";
    pub const WALLET_DEDUCTION: &str = "WALLET_DEDUCTION";
    pub const MANUAL: &str = "MANUAL";
}

/// Wallet ledger entry kinds. Debits carry the reason they left the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEntryKind {
    Credit,
    DebitInvoice,
    DebitPenalty,
    Refund,
    CreditReconciliation,
}

impl WalletEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::DebitInvoice => "DEBIT_INVOICE",
            Self::DebitPenalty => "DEBIT_PENALTY",
            Self::Refund => "REFUND",
            Self::CreditReconciliation => "CREDIT_RECONCILIATION",
        }
    }

    pub fn is_credit(self) -> bool {
        matches!(self, Self::Credit | Self::Refund | Self::CreditReconciliation)
    }
}

pub mod notification_type {
    pub const INVOICE_SENT: &str = "INVOICE_SENT";
    pub const RECEIPT_SENT: &str = "RECEIPT_SENT";
    pub const PAYMENT_REMINDER: &str = "PAYMENT_REMINDER";
    pub const PENALTY_APPLIED: &str = "PENALTY_APPLIED";
}

pub mod notification_channel {
    pub const SMS: &str = "SMS";
    pub const EMAIL: &str = "EMAIL";
    pub const WHATSAPP: &str = "WHATSAPP";
}

pub mod notification_status {
    pub const PENDING: &str = "PENDING";
    pub const SENT: &str = "SENT";
    pub const FAILED: &str = "FAILED";
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub unit_id: Option<Uuid>,
    pub wallet_balance: Decimal,
    pub deposit_amount: Decimal,
    pub deposit_status: String,
    pub status: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub tenant_id: Uuid,
    pub billing_month: NaiveDate,
    pub rent_amount: Decimal,
    pub water_charge: Decimal,
    pub electricity_charge: Decimal,
    pub other_charges: Decimal,
    pub other_charges_desc: Option<String>,
    pub subtotal: Decimal,
    pub penalty_amount: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub status: String,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub penalty_applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> Option<InvoiceStatus> {
        InvoiceStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: String,
    pub status: String,
    pub phone: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub mpesa_checkout_request_id: Option<String>,
    pub needs_reconciliation: bool,
    pub reconciliation_note: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Receipt {
    pub id: Uuid,
    pub receipt_number: String,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub total_paid: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Option<Uuid>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: String,
    pub recipient: String,
    pub message: String,
    pub status: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub fail_reason: Option<String>,
    pub retry_count: i32,
}
