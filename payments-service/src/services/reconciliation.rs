//! Reconciliation flow: the only component that turns a gateway-confirmed
//! transaction into a payment detail. Both the polling path and the webhook
//! callback converge on `on_status_confirmed`, which is idempotent per
//! gateway transaction id.

use crate::error::PaymentError;
use crate::models::{
    ChargeStatus, NewDetail, NewQrCharge, Payment, PaymentMethod, PaymentState, QrCharge,
};
use crate::services::database::{Database, RecordedPayment};
use crate::services::pagofacil::{
    build_payment_reference, parse_payment_reference, CallbackPayload, GatewayStatus,
    PagoFacilClient,
};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

const GATEWAY_BANK_LABEL: &str = "PagoFácil";

/// A freshly started QR charge, ready for the client to scan.
#[derive(Debug, Clone)]
pub struct QrChargeStarted {
    pub payment_id: Uuid,
    pub qr_base64: String,
    pub transaction_id: String,
    pub payment_reference: String,
    pub amount: Decimal,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

/// Result of one poll round against the gateway.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub transaction_id: String,
    pub status: GatewayStatus,
    pub payment: Payment,
}

/// Result of handling one webhook callback.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub status: GatewayStatus,
    pub payment_id: Uuid,
}

#[derive(Clone)]
pub struct ReconciliationService {
    db: Database,
    gateway: PagoFacilClient,
}

impl ReconciliationService {
    pub fn new(db: Database, gateway: PagoFacilClient) -> Self {
        Self { db, gateway }
    }

    /// Ask the gateway for a QR covering `amount` of the payment's pending
    /// balance, and remember the in-flight charge so later confirmations can
    /// be matched and amount-checked server-side.
    pub async fn start_qr_charge(
        &self,
        payment_id: Uuid,
        amount: Decimal,
    ) -> Result<QrChargeStarted, PaymentError> {
        let payment = self
            .db
            .get_payment(payment_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound)?;

        match payment.state {
            PaymentState::Cancelled => return Err(PaymentError::PaymentClosed("cancelled")),
            PaymentState::FullyPaid => return Err(PaymentError::PaymentClosed("fully_paid")),
            _ => {}
        }

        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidTerms(
                "amount must be positive".to_string(),
            ));
        }
        if amount > payment.pending_amount {
            return Err(PaymentError::Overpayment {
                requested: amount,
                pending: payment.pending_amount,
            });
        }

        let order = self
            .db
            .get_work_order(payment.work_order_id)
            .await?
            .ok_or(PaymentError::WorkOrderNotFound)?;

        let reference = build_payment_reference(payment.id, Utc::now());
        let qr = self.gateway.generate_qr(&order, amount, &reference).await?;

        let charge = self
            .db
            .create_qr_charge(&NewQrCharge {
                payment_id: payment.id,
                gateway_transaction_id: qr.transaction_id.clone(),
                payment_reference: reference.clone(),
                amount,
                qr_expires_at: qr.expires_at,
            })
            .await?;

        tracing::info!(
            payment_id = %payment.id,
            transaction_id = %charge.gateway_transaction_id,
            reference = %reference,
            %amount,
            "QR charge started"
        );

        Ok(QrChargeStarted {
            payment_id: payment.id,
            qr_base64: qr.qr_base64,
            transaction_id: qr.transaction_id,
            payment_reference: reference,
            amount,
            expires_at: qr.expires_at,
        })
    }

    /// Polling path: query the gateway and, on a completed transaction,
    /// record it. The amount comes from the stored charge, never from the
    /// poller.
    pub async fn poll_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<PollOutcome, PaymentError> {
        let charge = self
            .db
            .get_qr_charge_by_transaction(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::ChargeNotFound(transaction_id.to_string()))?;

        let reported = self.gateway.query_transaction_status(transaction_id).await?;

        let payment = match reported.status {
            GatewayStatus::Completed => {
                let recorded = self
                    .on_status_confirmed(&charge)
                    .await?;
                recorded.payment
            }
            GatewayStatus::Rejected => {
                self.db
                    .set_qr_charge_status(transaction_id, ChargeStatus::Rejected)
                    .await?;
                self.db
                    .get_payment(charge.payment_id)
                    .await?
                    .ok_or(PaymentError::PaymentNotFound)?
            }
            GatewayStatus::Pending => self
                .db
                .get_payment(charge.payment_id)
                .await?
                .ok_or(PaymentError::PaymentNotFound)?,
        };

        Ok(PollOutcome {
            transaction_id: transaction_id.to_string(),
            status: reported.status,
            payment,
        })
    }

    /// Webhook path: resolve the structured reference back to the in-flight
    /// charge, normalize the reported status, and record on completion.
    pub async fn handle_callback(
        &self,
        payload: &CallbackPayload,
    ) -> Result<CallbackOutcome, PaymentError> {
        let reference = payload
            .pedido_id
            .as_deref()
            .ok_or_else(|| PaymentError::InvalidTerms("PedidoID is required".to_string()))?;

        let payment_id = parse_payment_reference(reference).ok_or_else(|| {
            PaymentError::InvalidTerms(format!("unrecognized payment reference {reference}"))
        })?;

        let charge = self
            .db
            .get_qr_charge_by_reference(reference)
            .await?
            .ok_or_else(|| PaymentError::ChargeNotFound(reference.to_string()))?;

        // The reference embeds the payment id; a mismatch against the stored
        // charge means someone is guessing references.
        if charge.payment_id != payment_id {
            return Err(PaymentError::InvalidTerms(format!(
                "payment reference {reference} does not match its charge"
            )));
        }

        let status = GatewayStatus::from_code(&payload.estado);
        tracing::info!(
            reference = %reference,
            payment_id = %payment_id,
            status = %status.as_str(),
            method = payload.metodo_pago.as_deref().unwrap_or("-"),
            confirmed_at = %format!(
                "{} {}",
                payload.fecha.as_deref().unwrap_or("-"),
                payload.hora.as_deref().unwrap_or("-")
            ),
            "Gateway callback received"
        );

        match status {
            GatewayStatus::Completed => {
                self.on_status_confirmed(&charge).await?;
            }
            GatewayStatus::Rejected => {
                self.db
                    .set_qr_charge_status(&charge.gateway_transaction_id, ChargeStatus::Rejected)
                    .await?;
            }
            GatewayStatus::Pending => {}
        }

        Ok(CallbackOutcome { status, payment_id })
    }

    /// Idempotent convergence point for a confirmed gateway transaction.
    /// Appends at most one detail per transaction id; re-confirmations get
    /// the existing entry back.
    pub async fn on_status_confirmed(
        &self,
        charge: &QrCharge,
    ) -> Result<RecordedPayment, PaymentError> {
        let detail = NewDetail {
            amount: charge.amount,
            method: PaymentMethod::Qr,
            receipt_number: None,
            bank: Some(GATEWAY_BANK_LABEL.to_string()),
            reference: Some(charge.gateway_transaction_id.clone()),
            recorded_by: None,
            paid_date: None,
            paid_time: None,
            notes: Some(format!(
                "QR payment confirmed, reference {}",
                charge.payment_reference
            )),
        };

        let recorded = self.db.record_payment(charge.payment_id, &detail).await?;

        self.db
            .set_qr_charge_status(&charge.gateway_transaction_id, ChargeStatus::Completed)
            .await?;

        if recorded.already_recorded {
            tracing::info!(
                payment_id = %charge.payment_id,
                transaction_id = %charge.gateway_transaction_id,
                "Confirmation observed again, ledger unchanged"
            );
        } else if recorded.payment.state == PaymentState::FullyPaid {
            // Settled in full: hand the vehicle back.
            self.db
                .mark_work_order_delivered(recorded.payment.work_order_id)
                .await?;
        }

        Ok(recorded)
    }
}
