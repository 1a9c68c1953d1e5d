//! Thin projections of the collaborating subsystems: work orders and staff.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderState {
    InProgress,
    Completed,
    Delivered,
}

impl WorkOrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Delivered => "delivered",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub code: String,
    pub state: WorkOrderState,
    pub total: Decimal,
    pub labor_cost: Decimal,
    pub parts_cost: Decimal,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub vehicle_plate: Option<String>,
    pub vehicle_label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWorkOrder {
    pub code: String,
    pub state: WorkOrderState,
    pub total: Decimal,
    pub labor_cost: Decimal,
    pub parts_cost: Decimal,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub vehicle_plate: Option<String>,
    pub vehicle_label: Option<String>,
}

/// Staff roles. Matched exhaustively wherever a role gates an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Client,
    Mechanic,
    Secretary,
    Owner,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Mechanic => "mechanic",
            Self::Secretary => "secretary",
            Self::Owner => "owner",
        }
    }

    /// Only counter staff may record payments on behalf of clients.
    pub fn can_record_payments(&self) -> bool {
        match self {
            Self::Secretary | Self::Owner => true,
            Self::Client | Self::Mechanic => false,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StaffUser {
    pub id: Uuid,
    pub name: String,
    pub role: StaffRole,
}

#[derive(Debug, Clone)]
pub struct NewStaffUser {
    pub name: String,
    pub role: StaffRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_counter_staff_record_payments() {
        assert!(StaffRole::Secretary.can_record_payments());
        assert!(StaffRole::Owner.can_record_payments());
        assert!(!StaffRole::Mechanic.can_record_payments());
        assert!(!StaffRole::Client.can_record_payments());
    }
}
