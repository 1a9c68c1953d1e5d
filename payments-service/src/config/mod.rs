use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pagofacil: PagoFacilConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// PagoFácil gateway settings. Credentials travel as headers on the login
/// call, so both tokens are kept secret.
#[derive(Deserialize, Clone, Debug)]
pub struct PagoFacilConfig {
    pub base_url: String,
    pub token_service: Secret<String>,
    pub token_secret: Secret<String>,
    pub callback_url: String,
    /// Timeout for login and QR generation calls.
    pub request_timeout_secs: u64,
    /// Timeout for transaction status queries; the provider is slow here.
    pub status_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("PAYMENTS_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PAYMENTS_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url = env::var("PAYMENTS_DATABASE_URL").expect("PAYMENTS_DATABASE_URL must be set");
        let max_connections = env::var("PAYMENTS_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("PAYMENTS_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let base_url = env::var("PAGOFACIL_BASE_URL")
            .unwrap_or_else(|_| "https://sandbox.pagofacil.com/api".to_string());
        let token_service =
            env::var("PAGOFACIL_TOKEN_SERVICE").expect("PAGOFACIL_TOKEN_SERVICE must be set");
        let token_secret =
            env::var("PAGOFACIL_TOKEN_SECRET").expect("PAGOFACIL_TOKEN_SECRET must be set");
        let callback_url = env::var("PAGOFACIL_CALLBACK_URL").unwrap_or_default();
        let request_timeout_secs = env::var("PAGOFACIL_TIMEOUT")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;
        let status_timeout_secs = env::var("PAGOFACIL_STATUS_TIMEOUT")
            .unwrap_or_else(|_| "90".to_string())
            .parse()?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            pagofacil: PagoFacilConfig {
                base_url,
                token_service: Secret::new(token_service),
                token_secret: Secret::new(token_secret),
                callback_url,
                request_timeout_secs,
                status_timeout_secs,
            },
            service_name: "payments-service".to_string(),
        })
    }
}
