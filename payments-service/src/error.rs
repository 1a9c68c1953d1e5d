//! Domain error taxonomy for the payment ledger and reconciliation flow.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("work order not found")]
    WorkOrderNotFound,

    #[error("payment not found")]
    PaymentNotFound,

    #[error("no QR charge found for transaction {0}")]
    ChargeNotFound(String),

    #[error("work order is not completed")]
    InvalidOrderState,

    #[error("work order already has an active payment")]
    DuplicatePayment,

    #[error("amount {requested} exceeds pending balance {pending}")]
    Overpayment { requested: Decimal, pending: Decimal },

    #[error("payment is {0} and no longer accepts changes")]
    PaymentClosed(&'static str),

    #[error("payment terms cannot change once installments are recorded")]
    PaymentAlreadyStarted,

    #[error("invalid payment terms: {0}")]
    InvalidTerms(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::WorkOrderNotFound
            | PaymentError::PaymentNotFound
            | PaymentError::ChargeNotFound(_) => AppError::NotFound(anyhow::anyhow!("{err}")),
            PaymentError::InvalidOrderState | PaymentError::InvalidTerms(_) => {
                AppError::BadRequest(anyhow::anyhow!("{err}"))
            }
            PaymentError::Overpayment { .. } => AppError::Unprocessable(anyhow::anyhow!("{err}")),
            PaymentError::DuplicatePayment
            | PaymentError::PaymentClosed(_)
            | PaymentError::PaymentAlreadyStarted => AppError::Conflict(anyhow::anyhow!("{err}")),
            PaymentError::Forbidden(_) => AppError::Forbidden(anyhow::anyhow!("{err}")),
            PaymentError::GatewayUnavailable(msg) => {
                AppError::BadGateway(format!("payment gateway unavailable: {msg}"))
            }
            PaymentError::GatewayRejected(_) => AppError::BadRequest(anyhow::anyhow!("{err}")),
            PaymentError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
        }
    }
}
