//! In-flight QR transactions awaiting gateway confirmation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Pending,
    Completed,
    Rejected,
    Expired,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

/// One QR requested from the gateway. The stored amount is the source of
/// truth when a confirmation arrives, regardless of what the caller claims.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QrCharge {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub gateway_transaction_id: String,
    pub payment_reference: String,
    pub amount: Decimal,
    pub status: ChargeStatus,
    pub qr_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewQrCharge {
    pub payment_id: Uuid,
    pub gateway_transaction_id: String,
    pub payment_reference: String,
    pub amount: Decimal,
    pub qr_expires_at: Option<DateTime<Utc>>,
}
