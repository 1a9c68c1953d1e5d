//! PagoFácil payment gateway client.
//!
//! Wraps the provider's login, QR generation, and transaction status
//! endpoints, and owns the wire types for the webhook callback. Everything
//! the provider answers is treated defensively: unknown status codes are
//! pending, never completed.

use crate::config::PagoFacilConfig;
use crate::error::PaymentError;
use crate::models::WorkOrder;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

/// QR payment method code on the provider side.
const PAYMENT_METHOD_QR: u8 = 4;
/// Currency code for bolivianos.
const CURRENCY_BOB: u8 = 2;
/// Document type "CI".
const DOCUMENT_TYPE_CI: u8 = 1;
/// Minutes shaved off the provider's token lifetime before re-authing.
const TOKEN_EXPIRY_MARGIN_MINUTES: i64 = 5;
/// Contact fallbacks when the work order carries no client data.
const FALLBACK_EMAIL: &str = "info@taller.com";
const FALLBACK_PHONE: &str = "0";

/// Prefix of the structured payment reference sent as `paymentNumber`.
pub const REFERENCE_PREFIX: &str = "TALLER";

/// Build the payment reference embedded in every QR request:
/// `TALLER-{payment_id}-{unix_seconds}`.
pub fn build_payment_reference(payment_id: Uuid, issued_at: DateTime<Utc>) -> String {
    format!("{REFERENCE_PREFIX}-{payment_id}-{}", issued_at.timestamp())
}

/// Recover the payment id from a reference. Rejects anything that does not
/// match the exact `TALLER-{uuid}-{timestamp}` shape.
pub fn parse_payment_reference(reference: &str) -> Option<Uuid> {
    let rest = reference.strip_prefix(REFERENCE_PREFIX)?.strip_prefix('-')?;
    let (id, timestamp) = rest.rsplit_once('-')?;
    timestamp.parse::<i64>().ok()?;
    Uuid::parse_str(id).ok()
}

/// Normalized gateway transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Pending,
    Completed,
    Rejected,
}

impl GatewayStatus {
    /// Map a provider status code to the normalized status. The provider
    /// mixes numeric codes and case-varying strings; anything unrecognized
    /// stays pending so a garbled answer can never settle a payment.
    pub fn from_code(code: &serde_json::Value) -> Self {
        match code {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(2) | Some(5) => Self::Completed,
                Some(3) => Self::Rejected,
                _ => Self::Pending,
            },
            serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
                "2" | "5" | "completado" | "pagado" => Self::Completed,
                "3" | "rechazado" | "cancelado" => Self::Rejected,
                _ => Self::Pending,
            },
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

/// Process-wide auth token cache with TTL, injected into the client rather
/// than hidden in a static. Concurrent refreshes around expiry are allowed
/// to race; a duplicate login is harmless and nobody blocks on a fetch.
#[derive(Clone, Default)]
pub struct TokenCache {
    inner: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl TokenCache {
    pub async fn get(&self) -> Option<String> {
        let guard = self.inner.read().await;
        guard
            .as_ref()
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.token.clone())
    }

    pub async fn store(&self, token: String, ttl: Duration) {
        let mut guard = self.inner.write().await;
        *guard = Some(CachedToken {
            token,
            expires_at: Instant::now() + ttl,
        });
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    error: i64,
    message: Option<String>,
    values: Option<LoginValues>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginValues {
    access_token: String,
    expires_in_minutes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateQrRequest {
    payment_method: u8,
    client_name: String,
    document_type: u8,
    document_id: String,
    phone_number: String,
    email: String,
    payment_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: u8,
    client_code: String,
    callback_url: String,
    order_detail: Vec<OrderDetailLine>,
}

#[derive(Debug, Serialize)]
struct OrderDetailLine {
    serial: u32,
    product: String,
    quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    total: Decimal,
}

impl OrderDetailLine {
    fn new(serial: u32, product: String, amount: Decimal) -> Self {
        Self {
            serial,
            product,
            quantity: 1,
            price: amount,
            discount: Decimal::ZERO,
            total: amount,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateQrResponse {
    #[serde(default)]
    error: i64,
    message: Option<String>,
    values: Option<QrValues>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrValues {
    qr_base64: String,
    #[serde(deserialize_with = "string_or_number")]
    transaction_id: String,
    expiration_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryTransactionResponse {
    #[serde(default)]
    error: i64,
    message: Option<String>,
    values: Option<QueryValues>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryValues {
    #[serde(default)]
    payment_status: serde_json::Value,
    payment_date: Option<String>,
    payment_time: Option<String>,
}

/// A freshly generated QR, ready to hand to the client.
#[derive(Debug, Clone)]
pub struct QrData {
    pub qr_base64: String,
    pub transaction_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Transaction status as reported by the gateway.
#[derive(Debug, Clone)]
pub struct TransactionStatus {
    pub status: GatewayStatus,
    pub payment_date: Option<String>,
    pub payment_time: Option<String>,
}

/// Webhook payload the gateway posts to the callback URL. `Estado` arrives
/// as a number or a string depending on the provider's mood.
#[derive(Debug, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "PedidoID", default)]
    pub pedido_id: Option<String>,
    #[serde(rename = "Estado", default)]
    pub estado: serde_json::Value,
    #[serde(rename = "MetodoPago", default)]
    pub metodo_pago: Option<String>,
    #[serde(rename = "Fecha", default)]
    pub fecha: Option<String>,
    #[serde(rename = "Hora", default)]
    pub hora: Option<String>,
}

/// Acknowledgement envelope the gateway expects back from the webhook.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub error: u8,
    pub status: u8,
    pub message: String,
    pub values: bool,
}

impl CallbackAck {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            error: 0,
            status: 1,
            message: message.into(),
            values: true,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: 1,
            status: 0,
            message: message.into(),
            values: false,
        }
    }
}

/// PagoFácil client for the provider's HTTP API.
#[derive(Clone)]
pub struct PagoFacilClient {
    client: Client,
    config: PagoFacilConfig,
    token_cache: TokenCache,
}

impl PagoFacilClient {
    pub fn new(config: PagoFacilConfig, token_cache: TokenCache) -> Self {
        Self {
            client: Client::new(),
            config,
            token_cache,
        }
    }

    /// Whether credentials are configured for this environment.
    pub fn is_configured(&self) -> bool {
        !self.config.token_service.expose_secret().is_empty()
            && !self.config.token_secret.expose_secret().is_empty()
    }

    /// Obtain an access token, reusing the cached one while it is fresh.
    pub async fn authenticate(&self) -> Result<String, PaymentError> {
        if let Some(token) = self.token_cache.get().await {
            return Ok(token);
        }

        let url = format!("{}/login", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("tcTokenService", self.config.token_service.expose_secret())
            .header("tcTokenSecret", self.config.token_secret.expose_secret())
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_failure)?;

        tracing::debug!(status = %status, body = %body, "PagoFácil login response");

        if status.is_server_error() {
            tracing::error!(status = %status, body = %body, "PagoFácil login failed");
            return Err(PaymentError::GatewayUnavailable(format!(
                "login answered {status}"
            )));
        }

        let parsed: LoginResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, body = %body, "Malformed PagoFácil login response");
            PaymentError::GatewayRejected(format!("malformed login response: {e}"))
        })?;

        if !status.is_success() || parsed.error != 0 {
            let message = parsed.message.unwrap_or_else(|| body.clone());
            tracing::error!(status = %status, message = %message, "PagoFácil rejected login");
            return Err(PaymentError::GatewayRejected(message));
        }

        let values = parsed.values.ok_or_else(|| {
            PaymentError::GatewayRejected("login response missing values".to_string())
        })?;

        let ttl_minutes = values
            .expires_in_minutes
            .saturating_sub(TOKEN_EXPIRY_MARGIN_MINUTES);
        if ttl_minutes > 0 {
            self.token_cache
                .store(
                    values.access_token.clone(),
                    Duration::from_secs(ttl_minutes as u64 * 60),
                )
                .await;
        }

        tracing::info!(
            expires_in_minutes = values.expires_in_minutes,
            "PagoFácil token obtained"
        );

        Ok(values.access_token)
    }

    /// Request a QR for `amount` against `order`, identified by `reference`.
    pub async fn generate_qr(
        &self,
        order: &WorkOrder,
        amount: Decimal,
        reference: &str,
    ) -> Result<QrData, PaymentError> {
        let token = self.authenticate().await?;

        let vehicle = order.vehicle_label.as_deref().unwrap_or("vehículo");
        let plate = order.vehicle_plate.as_deref().unwrap_or("-");
        let request = GenerateQrRequest {
            payment_method: PAYMENT_METHOD_QR,
            client_name: order.client_name.clone(),
            document_type: DOCUMENT_TYPE_CI,
            document_id: "0".to_string(),
            phone_number: order
                .client_phone
                .clone()
                .unwrap_or_else(|| FALLBACK_PHONE.to_string()),
            email: order
                .client_email
                .clone()
                .unwrap_or_else(|| FALLBACK_EMAIL.to_string()),
            payment_number: reference.to_string(),
            amount,
            currency: CURRENCY_BOB,
            client_code: order.code.clone(),
            callback_url: self.config.callback_url.clone(),
            order_detail: vec![
                OrderDetailLine::new(
                    1,
                    format!("Orden: {} - {}", order.code, vehicle),
                    order.labor_cost,
                ),
                OrderDetailLine::new(2, "Repuestos".to_string(), order.parts_cost),
                OrderDetailLine::new(
                    3,
                    format!("Cliente: {} | Placa: {}", order.client_name, plate),
                    Decimal::ZERO,
                ),
            ],
        };

        let url = format!("{}/generate-qr", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .bearer_auth(&token)
            .json(&request)
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_failure)?;

        tracing::debug!(status = %status, body = %body, "PagoFácil generate-qr response");

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                reference = %reference,
                body = %body,
                "PagoFácil QR generation failed"
            );
            return Err(PaymentError::GatewayUnavailable(format!(
                "generate-qr answered {status}"
            )));
        }

        let parsed: GenerateQrResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, body = %body, "Malformed PagoFácil QR response");
            PaymentError::GatewayRejected(format!("malformed generate-qr response: {e}"))
        })?;

        if !status.is_success() || parsed.error != 0 {
            let message = parsed.message.unwrap_or_else(|| body.clone());
            tracing::error!(
                status = %status,
                reference = %reference,
                message = %message,
                "PagoFácil rejected QR generation"
            );
            return Err(PaymentError::GatewayRejected(message));
        }

        let values = parsed.values.ok_or_else(|| {
            PaymentError::GatewayRejected("generate-qr response missing values".to_string())
        })?;

        tracing::info!(
            transaction_id = %values.transaction_id,
            reference = %reference,
            %amount,
            "PagoFácil QR generated"
        );

        Ok(QrData {
            qr_base64: values.qr_base64,
            transaction_id: values.transaction_id,
            expires_at: values.expiration_date.as_deref().and_then(parse_expiration),
        })
    }

    /// Query the status of a transaction by the gateway's transaction id.
    pub async fn query_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionStatus, PaymentError> {
        let token = self.authenticate().await?;

        let url = format!("{}/query-transaction", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .bearer_auth(&token)
            .json(&serde_json::json!({ "pagofacilTransactionId": transaction_id }))
            .timeout(Duration::from_secs(self.config.status_timeout_secs))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_failure)?;

        tracing::debug!(status = %status, body = %body, "PagoFácil query-transaction response");

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                transaction_id = %transaction_id,
                body = %body,
                "PagoFácil status query failed"
            );
            return Err(PaymentError::GatewayUnavailable(format!(
                "query-transaction answered {status}"
            )));
        }

        let parsed: QueryTransactionResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, body = %body, "Malformed PagoFácil status response");
            PaymentError::GatewayRejected(format!("malformed query-transaction response: {e}"))
        })?;

        if !status.is_success() || parsed.error != 0 {
            let message = parsed.message.unwrap_or_else(|| body.clone());
            tracing::error!(
                transaction_id = %transaction_id,
                message = %message,
                "PagoFácil rejected status query"
            );
            return Err(PaymentError::GatewayRejected(message));
        }

        let Some(values) = parsed.values else {
            // No values block: the transaction is unknown to the provider.
            // That is not a confirmation of anything.
            tracing::warn!(
                transaction_id = %transaction_id,
                "PagoFácil status response missing values, treating as pending"
            );
            return Ok(TransactionStatus {
                status: GatewayStatus::Pending,
                payment_date: None,
                payment_time: None,
            });
        };

        Ok(TransactionStatus {
            status: GatewayStatus::from_code(&values.payment_status),
            payment_date: values.payment_date,
            payment_time: values.payment_time,
        })
    }
}

/// Transport-level failures (timeouts, refused connections, TLS) are
/// retryable, never a confirmed-failed payment.
fn transport_failure(err: reqwest::Error) -> PaymentError {
    tracing::error!(error = %err, "PagoFácil request failed");
    PaymentError::GatewayUnavailable(err.to_string())
}

fn parse_expiration(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s,
        StringOrNumber::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_status_codes_normalize() {
        assert_eq!(GatewayStatus::from_code(&json!(5)), GatewayStatus::Completed);
        assert_eq!(GatewayStatus::from_code(&json!(2)), GatewayStatus::Completed);
        assert_eq!(GatewayStatus::from_code(&json!(3)), GatewayStatus::Rejected);
        assert_eq!(GatewayStatus::from_code(&json!(0)), GatewayStatus::Pending);
        assert_eq!(GatewayStatus::from_code(&json!(99)), GatewayStatus::Pending);
    }

    #[test]
    fn string_status_codes_normalize_case_insensitively() {
        assert_eq!(
            GatewayStatus::from_code(&json!("Completado")),
            GatewayStatus::Completed
        );
        assert_eq!(
            GatewayStatus::from_code(&json!("PAGADO")),
            GatewayStatus::Completed
        );
        assert_eq!(
            GatewayStatus::from_code(&json!("5")),
            GatewayStatus::Completed
        );
        assert_eq!(
            GatewayStatus::from_code(&json!("rechazado")),
            GatewayStatus::Rejected
        );
        assert_eq!(
            GatewayStatus::from_code(&json!("cancelado")),
            GatewayStatus::Rejected
        );
    }

    #[test]
    fn unknown_status_codes_stay_pending() {
        assert_eq!(
            GatewayStatus::from_code(&json!("processing")),
            GatewayStatus::Pending
        );
        assert_eq!(
            GatewayStatus::from_code(&json!(null)),
            GatewayStatus::Pending
        );
        assert_eq!(
            GatewayStatus::from_code(&json!({"weird": true})),
            GatewayStatus::Pending
        );
    }

    #[test]
    fn payment_reference_round_trips() {
        let id = Uuid::new_v4();
        let reference = build_payment_reference(id, Utc::now());
        assert!(reference.starts_with("TALLER-"));
        assert_eq!(parse_payment_reference(&reference), Some(id));
    }

    #[test]
    fn malformed_references_are_rejected() {
        assert_eq!(parse_payment_reference(""), None);
        assert_eq!(parse_payment_reference("TALLER-"), None);
        assert_eq!(parse_payment_reference("TALLER-not-a-uuid-123"), None);
        assert_eq!(parse_payment_reference("OTHER-4fb6a7c2-0000"), None);
        let id = Uuid::new_v4();
        assert_eq!(
            parse_payment_reference(&format!("TALLER-{id}-not-a-timestamp")),
            None
        );
    }

    #[tokio::test]
    async fn token_cache_returns_fresh_tokens() {
        let cache = TokenCache::default();
        assert_eq!(cache.get().await, None);

        cache
            .store("token-1".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get().await, Some("token-1".to_string()));
    }

    #[tokio::test]
    async fn token_cache_drops_expired_tokens() {
        let cache = TokenCache::default();
        cache.store("stale".to_string(), Duration::ZERO).await;
        assert_eq!(cache.get().await, None);
    }

    #[test]
    fn callback_ack_envelope_shape() {
        let ok = serde_json::to_value(CallbackAck::ok("done")).unwrap();
        assert_eq!(ok, json!({"error": 0, "status": 1, "message": "done", "values": true}));

        let failed = serde_json::to_value(CallbackAck::failed("nope")).unwrap();
        assert_eq!(
            failed,
            json!({"error": 1, "status": 0, "message": "nope", "values": false})
        );
    }

    #[test]
    fn callback_estado_accepts_numbers_and_strings() {
        let numeric: CallbackPayload =
            serde_json::from_value(json!({"PedidoID": "TALLER-x-1", "Estado": 5})).unwrap();
        assert_eq!(
            GatewayStatus::from_code(&numeric.estado),
            GatewayStatus::Completed
        );

        let text: CallbackPayload =
            serde_json::from_value(json!({"PedidoID": "TALLER-x-1", "Estado": "Rechazado"}))
                .unwrap();
        assert_eq!(
            GatewayStatus::from_code(&text.estado),
            GatewayStatus::Rejected
        );
    }
}
