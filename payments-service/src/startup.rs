//! Application startup and lifecycle management.

use crate::config::Config;
use crate::handlers;
use crate::services::{Database, PagoFacilClient, ReconciliationService, TokenCache};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub gateway: PagoFacilClient,
    pub reconciliation: ReconciliationService,
    pub config: Config,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        db.run_migrations().await?;

        let gateway = PagoFacilClient::new(config.pagofacil.clone(), TokenCache::default());
        if gateway.is_configured() {
            tracing::info!("PagoFácil client initialized");
        } else {
            tracing::warn!("PagoFácil credentials not configured - QR payments will be rejected");
        }

        let reconciliation = ReconciliationService::new(db.clone(), gateway.clone());

        let state = AppState {
            db,
            gateway,
            reconciliation,
            config: config.clone(),
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            // Collaborator projections
            .route("/work-orders", put(handlers::payments::register_work_order))
            .route("/staff-users", put(handlers::payments::register_staff_user))
            // Payment ledger
            .route(
                "/payments",
                post(handlers::payments::create_payment).get(handlers::payments::list_payments),
            )
            .route("/payments/stats", get(handlers::payments::payment_stats))
            .route(
                "/payments/overdue/sweep",
                post(handlers::payments::sweep_overdue),
            )
            .route(
                "/payments/qr/:transaction_id/status",
                get(handlers::qr::poll_transaction_status),
            )
            .route(
                "/payments/:id",
                get(handlers::payments::show_payment)
                    .patch(handlers::payments::update_payment_terms),
            )
            .route(
                "/payments/:id/cancel",
                post(handlers::payments::cancel_payment),
            )
            .route(
                "/payments/:id/details",
                post(handlers::payments::record_detail),
            )
            .route("/payments/:id/qr", post(handlers::qr::start_qr_charge))
            // Gateway callback
            .route("/webhooks/pagofacil", post(handlers::webhook::pagofacil_callback))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state.clone());

        // Port 0 binds a random free port, which the tests rely on.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        tracing::info!("Payments service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a handle to the database for test setup and teardown.
    pub fn db(&self) -> Database {
        self.state.db.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
