//! QR charge handlers: start a gateway charge and poll its status.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{PollStatusResponse, QrChargeResponse, StartQrChargeRequest},
    AppState,
};

/// Ask the gateway for a QR covering part (or all) of the pending balance.
pub async fn start_qr_charge(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<StartQrChargeRequest>,
) -> Result<(StatusCode, Json<QrChargeResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        payment_id = %payment_id,
        amount = %payload.amount,
        "Starting QR charge"
    );

    let charge = state
        .reconciliation
        .start_qr_charge(payment_id, payload.amount)
        .await?;

    Ok((StatusCode::CREATED, Json(charge.into())))
}

/// Polling path of the reconciliation flow. A completed transaction is
/// recorded (exactly once) before answering; everything else reports the
/// normalized status without touching the ledger.
pub async fn poll_transaction_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<PollStatusResponse>, AppError> {
    let outcome = state
        .reconciliation
        .poll_transaction(&transaction_id)
        .await?;

    Ok(Json(outcome.into()))
}
