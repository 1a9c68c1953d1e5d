//! Payment ledger handlers: creation, listing, counter payments, terms
//! edits, cancellation, and the overdue sweep.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        CreatePaymentRequest, ListPaymentsQuery, ListPaymentsResponse, PaymentDetailResponse,
        PaymentListItem, PaymentResponse, PaymentShowResponse, RecordDetailRequest,
        RecordDetailResponse, RegisterStaffRequest, RegisterWorkOrderRequest, SweepResponse,
        UpdatePaymentTermsRequest,
    },
    error::PaymentError,
    models::{NewDetail, NewPayment, NewStaffUser, NewWorkOrder, PaymentTerms, StaffUser, WorkOrder},
    services::database::{PaymentFilter, PaymentStats},
    AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 15;

/// Register or refresh the projection of a work order owned by the workshop
/// subsystem.
pub async fn register_work_order(
    State(state): State<AppState>,
    Json(payload): Json<RegisterWorkOrderRequest>,
) -> Result<Json<WorkOrder>, AppError> {
    payload.validate()?;

    let order = state
        .db
        .upsert_work_order(&NewWorkOrder {
            code: payload.code,
            state: payload.state,
            total: payload.total,
            labor_cost: payload.labor_cost,
            parts_cost: payload.parts_cost,
            client_name: payload.client_name,
            client_email: payload.client_email,
            client_phone: payload.client_phone,
            vehicle_plate: payload.vehicle_plate,
            vehicle_label: payload.vehicle_label,
        })
        .await?;

    Ok(Json(order))
}

/// Register or refresh a staff identity projection.
pub async fn register_staff_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterStaffRequest>,
) -> Result<Json<StaffUser>, AppError> {
    payload.validate()?;

    let user = state
        .db
        .upsert_staff_user(
            payload.id,
            &NewStaffUser {
                name: payload.name,
                role: payload.role,
            },
        )
        .await?;

    Ok(Json(user))
}

/// Create the payment ledger for a completed work order.
pub async fn create_payment(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        work_order_id = %payload.work_order_id,
        kind = %payload.kind,
        installments = payload.installment_count,
        "Creating payment"
    );

    let payment = state
        .db
        .create_payment(&NewPayment {
            work_order_id: payload.work_order_id,
            kind: payload.kind,
            installment_count: payload.installment_count,
            due_date: payload.due_date,
            notes: payload.notes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(payment.into())))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<ListPaymentsResponse>, AppError> {
    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);
    let page = query.page.unwrap_or(1).max(1);

    let (rows, total) = state
        .db
        .list_payments(&PaymentFilter {
            state: query.state,
            kind: query.kind,
            search: query.search,
            limit: per_page,
            offset: (page - 1) * per_page,
        })
        .await?;

    Ok(Json(ListPaymentsResponse {
        payments: rows.into_iter().map(PaymentListItem::from).collect(),
        total,
        page,
        per_page,
    }))
}

pub async fn payment_stats(
    State(state): State<AppState>,
) -> Result<Json<PaymentStats>, AppError> {
    let stats = state.db.payment_stats().await?;
    Ok(Json(stats))
}

/// Ledger accessors plus the chronological detail log and the installment
/// plan, for the admin and client views.
pub async fn show_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentShowResponse>, AppError> {
    let payment = state
        .db
        .get_payment(payment_id)
        .await?
        .ok_or(PaymentError::PaymentNotFound)?;

    let rows = state.db.list_details(payment_id).await?;
    let details: Vec<_> = rows.iter().map(|r| r.detail.clone()).collect();
    let installment_plan = payment.installment_plan(&details);

    Ok(Json(PaymentShowResponse {
        payment: payment.into(),
        details: rows.into_iter().map(PaymentDetailResponse::from).collect(),
        installment_plan,
    }))
}

/// Administrative edit of the payment terms. Rejected once any installment
/// has been recorded.
pub async fn update_payment_terms(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentTermsRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    payload.validate()?;

    let payment = state
        .db
        .update_payment_terms(
            payment_id,
            &PaymentTerms {
                kind: payload.kind,
                installment_count: payload.installment_count,
                due_date: payload.due_date,
                notes: payload.notes,
            },
        )
        .await?;

    Ok(Json(payment.into()))
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = state.db.cancel_payment(payment_id).await?;
    Ok(Json(payment.into()))
}

/// Record a counter payment (cash, or a manually reconciled QR receipt).
pub async fn record_detail(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<RecordDetailRequest>,
) -> Result<(StatusCode, Json<RecordDetailResponse>), AppError> {
    payload.validate()?;

    let staff = state
        .db
        .get_staff_user(payload.recorded_by)
        .await?
        .ok_or_else(|| {
            PaymentError::InvalidTerms("recorded_by does not resolve to a staff user".to_string())
        })?;

    if !staff.role.can_record_payments() {
        return Err(PaymentError::Forbidden(format!(
            "{} is not allowed to record payments",
            staff.role.as_str()
        ))
        .into());
    }

    tracing::info!(
        payment_id = %payment_id,
        amount = %payload.amount,
        method = %payload.method,
        recorded_by = %staff.name,
        "Recording counter payment"
    );

    let recorded = state
        .db
        .record_payment(
            payment_id,
            &NewDetail {
                amount: payload.amount,
                method: payload.method,
                receipt_number: payload.receipt_number,
                bank: payload.bank,
                reference: payload.reference,
                recorded_by: Some(staff.id),
                paid_date: payload.paid_date,
                paid_time: payload.paid_time,
                notes: payload.notes,
            },
        )
        .await?;

    let status = if recorded.already_recorded {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(RecordDetailResponse {
            payment: recorded.payment.into(),
            detail: recorded.detail.into(),
            already_recorded: recorded.already_recorded,
        }),
    ))
}

/// Explicit reconciliation step: mark past-due open payments overdue.
pub async fn sweep_overdue(
    State(state): State<AppState>,
) -> Result<Json<SweepResponse>, AppError> {
    let swept = state.db.sweep_overdue().await?;
    Ok(Json(SweepResponse { swept }))
}
