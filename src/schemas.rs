use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: Option<i64>, min: i64, max: i64) -> i64 {
    limit.unwrap_or(max).clamp(min, max)
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateInvoicesInput {
    /// Any date inside the target month; defaults to the current business month.
    pub billing_month: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StkPushInput {
    pub tenant_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 10, max = 15))]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReconcilePaymentInput {
    pub tenant_id: Uuid,
    #[validate(length(min = 1, max = 120))]
    pub performed_by: String,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WalletRefundInput {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 120))]
    pub performed_by: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenantIdPath {
    pub tenant_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIdPath {
    pub payment_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_limit() {
        assert_eq!(clamp_limit_in_range(None, 1, 100), 100);
        assert_eq!(clamp_limit_in_range(Some(7), 1, 100), 7);
        assert_eq!(clamp_limit_in_range(Some(0), 1, 100), 1);
        assert_eq!(clamp_limit_in_range(Some(5000), 1, 100), 100);
    }
}
