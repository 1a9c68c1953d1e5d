//! Payment detail log entries: individual collection events.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Supported collection methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Qr,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Qr => "qr",
        }
    }

    /// Prefix used on auto-generated receipt numbers.
    pub fn receipt_prefix(&self) -> &'static str {
        match self {
            Self::Cash => "EF",
            Self::Qr => "QR",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One collection event. Immutable once created.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PaymentDetail {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub installment_number: i32,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub receipt_number: Option<String>,
    pub bank: Option<String>,
    /// Gateway transaction id for QR entries; free text otherwise.
    pub reference: Option<String>,
    pub paid_date: NaiveDate,
    pub paid_time: NaiveTime,
    pub recorded_by: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a detail to a payment.
#[derive(Debug, Clone)]
pub struct NewDetail {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub receipt_number: Option<String>,
    pub bank: Option<String>,
    pub reference: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub paid_date: Option<NaiveDate>,
    pub paid_time: Option<NaiveTime>,
    pub notes: Option<String>,
}

/// Format an auto-generated receipt number: `{EF|QR}-{yyyymmdd}-{seq:04}`,
/// where the sequence restarts per method each day.
pub fn receipt_number(method: PaymentMethod, date: NaiveDate, sequence: i64) -> String {
    format!(
        "{}-{}-{:04}",
        method.receipt_prefix(),
        date.format("%Y%m%d"),
        sequence
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_number_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        assert_eq!(
            receipt_number(PaymentMethod::Cash, date, 1),
            "EF-20250312-0001"
        );
        assert_eq!(
            receipt_number(PaymentMethod::Qr, date, 42),
            "QR-20250312-0042"
        );
    }

    #[test]
    fn receipt_sequence_keeps_four_digits_past_9999() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
        assert_eq!(
            receipt_number(PaymentMethod::Cash, date, 10000),
            "EF-20250312-10000"
        );
    }
}
