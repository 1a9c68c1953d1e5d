//! PagoFácil webhook handler.
//!
//! The gateway retries callbacks that do not get its acknowledgement
//! envelope back, so this handler always answers HTTP 200 with the envelope,
//! flagging failures inside it instead of via status codes.

use axum::{extract::State, http::StatusCode, Json};

use crate::{
    services::pagofacil::{CallbackAck, CallbackPayload, GatewayStatus},
    AppState,
};

pub async fn pagofacil_callback(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<CallbackAck>) {
    tracing::debug!(body = %body, "PagoFácil callback received");

    let payload: CallbackPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, body = %body, "Unparseable PagoFácil callback");
            return (
                StatusCode::OK,
                Json(CallbackAck::failed("unparseable callback payload")),
            );
        }
    };

    if payload.pedido_id.is_none() {
        tracing::error!(body = %body, "PagoFácil callback without PedidoID");
        return (
            StatusCode::OK,
            Json(CallbackAck::failed("PedidoID is required")),
        );
    }

    match state.reconciliation.handle_callback(&payload).await {
        Ok(outcome) => {
            let message = match outcome.status {
                GatewayStatus::Completed => "payment processed",
                GatewayStatus::Rejected => "payment rejected",
                GatewayStatus::Pending => "payment still pending",
            };
            (StatusCode::OK, Json(CallbackAck::ok(message)))
        }
        Err(e) => {
            // Acknowledge anyway; the error is ours to chase, not the
            // gateway's to retry.
            tracing::error!(error = %e, body = %body, "PagoFácil callback processing failed");
            (StatusCode::OK, Json(CallbackAck::failed(e.to_string())))
        }
    }
}
