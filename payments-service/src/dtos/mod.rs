//! Request and response types for the HTTP surface. Every mutating request
//! is an explicit struct validated before it reaches the ledger.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    InstallmentLine, Payment, PaymentDetail, PaymentKind, PaymentMethod, PaymentState, StaffRole,
    WorkOrderState,
};
use crate::services::database::{DetailRow, PaymentListRow};
use crate::services::pagofacil::GatewayStatus;
use crate::services::reconciliation::{PollOutcome, QrChargeStarted};

// -----------------------------------------------------------------------------
// Requests
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterWorkOrderRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
    pub state: WorkOrderState,
    pub total: Decimal,
    #[serde(default)]
    pub labor_cost: Decimal,
    #[serde(default)]
    pub parts_cost: Decimal,
    #[validate(length(min = 1, max = 120))]
    pub client_name: String,
    #[validate(email)]
    pub client_email: Option<String>,
    #[validate(length(max = 30))]
    pub client_phone: Option<String>,
    #[validate(length(max = 20))]
    pub vehicle_plate: Option<String>,
    #[validate(length(max = 120))]
    pub vehicle_label: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterStaffRequest {
    pub id: Uuid,
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub role: StaffRole,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    pub work_order_id: Uuid,
    pub kind: PaymentKind,
    #[serde(default = "default_installment_count")]
    pub installment_count: i32,
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePaymentTermsRequest {
    pub kind: PaymentKind,
    #[serde(default = "default_installment_count")]
    pub installment_count: i32,
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

fn default_installment_count() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordDetailRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[validate(length(max = 50))]
    pub receipt_number: Option<String>,
    #[validate(length(max = 50))]
    pub bank: Option<String>,
    pub reference: Option<String>,
    pub recorded_by: Uuid,
    pub paid_date: Option<NaiveDate>,
    pub paid_time: Option<NaiveTime>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartQrChargeRequest {
    pub amount: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPaymentsQuery {
    pub state: Option<PaymentState>,
    pub kind: Option<PaymentKind>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

// -----------------------------------------------------------------------------
// Responses
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub code: String,
    pub work_order_id: Uuid,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub percentage_paid: Decimal,
    pub kind: PaymentKind,
    pub installment_count: i32,
    pub installments_paid: i32,
    pub state: PaymentState,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        let percentage_paid = p.percentage_paid();
        Self {
            id: p.id,
            code: p.code,
            work_order_id: p.work_order_id,
            total_amount: p.total_amount,
            paid_amount: p.paid_amount,
            pending_amount: p.pending_amount,
            percentage_paid,
            kind: p.kind,
            installment_count: p.installment_count,
            installments_paid: p.installments_paid,
            state: p.state,
            due_date: p.due_date,
            notes: p.notes,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentDetailResponse {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub installment_number: i32,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub receipt_number: Option<String>,
    pub bank: Option<String>,
    pub reference: Option<String>,
    pub paid_date: NaiveDate,
    pub paid_time: NaiveTime,
    pub recorded_by: Option<Uuid>,
    pub recorded_by_name: Option<String>,
    pub notes: Option<String>,
}

impl From<PaymentDetail> for PaymentDetailResponse {
    fn from(d: PaymentDetail) -> Self {
        Self {
            id: d.id,
            payment_id: d.payment_id,
            installment_number: d.installment_number,
            amount: d.amount,
            method: d.method,
            receipt_number: d.receipt_number,
            bank: d.bank,
            reference: d.reference,
            paid_date: d.paid_date,
            paid_time: d.paid_time,
            recorded_by: d.recorded_by,
            recorded_by_name: None,
            notes: d.notes,
        }
    }
}

impl From<DetailRow> for PaymentDetailResponse {
    fn from(row: DetailRow) -> Self {
        let mut response = Self::from(row.detail);
        response.recorded_by_name = row.recorded_by_name;
        response
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentShowResponse {
    #[serde(flatten)]
    pub payment: PaymentResponse,
    pub details: Vec<PaymentDetailResponse>,
    pub installment_plan: Vec<InstallmentLine>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentListItem {
    #[serde(flatten)]
    pub payment: PaymentResponse,
    pub work_order_code: String,
    pub client_name: String,
    pub vehicle_plate: Option<String>,
}

impl From<PaymentListRow> for PaymentListItem {
    fn from(row: PaymentListRow) -> Self {
        Self {
            payment: row.payment.into(),
            work_order_code: row.work_order_code,
            client_name: row.client_name,
            vehicle_plate: row.vehicle_plate,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListPaymentsResponse {
    pub payments: Vec<PaymentListItem>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordDetailResponse {
    pub payment: PaymentResponse,
    pub detail: PaymentDetailResponse,
    pub already_recorded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QrChargeResponse {
    pub payment_id: Uuid,
    /// Data URI ready for an <img> tag.
    pub qr_image: String,
    pub transaction_id: String,
    pub payment_reference: String,
    pub amount: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<QrChargeStarted> for QrChargeResponse {
    fn from(charge: QrChargeStarted) -> Self {
        Self {
            payment_id: charge.payment_id,
            qr_image: format!("data:image/png;base64,{}", charge.qr_base64),
            transaction_id: charge.transaction_id,
            payment_reference: charge.payment_reference,
            amount: charge.amount,
            expires_at: charge.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollStatusResponse {
    pub transaction_id: String,
    pub status: GatewayStatus,
    pub payment: PaymentResponse,
}

impl From<PollOutcome> for PollStatusResponse {
    fn from(outcome: PollOutcome) -> Self {
        Self {
            transaction_id: outcome.transaction_id,
            status: outcome.status,
            payment: outcome.payment.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SweepResponse {
    pub swept: u64,
}
