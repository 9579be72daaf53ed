//! Application startup and lifecycle management.

use crate::config::BillingConfig;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::services::{
    start_overdue_sweeper, AccountService, AgingAnalyzer, BillingRun, BillingStore, Database,
    InvoiceLedger, MemoryStore, RateResolver, UsageCalculator,
};
use axum::middleware::from_fn;
use axum::routing::{get, patch, post};
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: BillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub accounts: AccountService,
    pub rates: RateResolver,
    pub usage: UsageCalculator,
    pub ledger: InvoiceLedger,
    pub aging: AgingAnalyzer,
    pub billing_run: BillingRun,
}

impl AppState {
    /// Wire the billing components over one store.
    pub fn new(config: BillingConfig, store: Arc<dyn BillingStore>) -> Self {
        let rates = RateResolver::new(store.clone());
        let ledger = InvoiceLedger::new(store.clone(), rates.clone(), config.billing.ledger());
        Self {
            accounts: AccountService::new(store.clone()),
            usage: UsageCalculator::new(store.clone(), config.billing.anomaly_policy()),
            aging: AgingAnalyzer::new(store.clone()),
            billing_run: BillingRun::new(
                store.clone(),
                ledger.clone(),
                config.billing.run_concurrency,
            ),
            rates,
            ledger,
            store,
            config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_endpoint))
        // Accounts
        .route(
            "/subscription-types",
            post(handlers::accounts::create_subscription_type),
        )
        .route(
            "/subscription-types/:id",
            get(handlers::accounts::get_subscription_type),
        )
        .route(
            "/subscription-types/:id/deactivate",
            post(handlers::accounts::deactivate_subscription_type),
        )
        .route("/customers", post(handlers::accounts::create_customer))
        .route("/customers/:id", get(handlers::accounts::get_customer))
        .route(
            "/customers/:id/activate",
            post(handlers::accounts::activate_customer),
        )
        .route(
            "/customers/:id/deactivate",
            post(handlers::accounts::deactivate_customer),
        )
        .route(
            "/customers/:id/suspend",
            post(handlers::accounts::suspend_customer),
        )
        .route(
            "/customers/:id/usages",
            get(handlers::accounts::customer_usages),
        )
        .route(
            "/customers/:id/outstanding",
            get(handlers::accounts::customer_outstanding),
        )
        // Rates
        .route("/water-rates", post(handlers::rates::create_rate))
        .route(
            "/water-rates/history/:subscription_type_id",
            get(handlers::rates::rate_history),
        )
        .route("/water-rates/resolve", get(handlers::rates::resolve_rate))
        .route(
            "/water-rates/:id/activate",
            post(handlers::rates::activate_rate),
        )
        .route(
            "/water-rates/:id/deactivate",
            post(handlers::rates::deactivate_rate),
        )
        // Readings
        .route("/usages", post(handlers::usages::record_usage))
        .route("/usages/:id", patch(handlers::usages::update_usage))
        // Invoices
        .route(
            "/invoices",
            post(handlers::invoices::generate_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/invoices/overdue-sweep",
            post(handlers::invoices::overdue_sweep),
        )
        .route("/invoices/:id", get(handlers::invoices::get_invoice))
        .route(
            "/invoices/:id/payments",
            get(handlers::invoices::invoice_payments),
        )
        .route("/invoices/:id/void", post(handlers::invoices::void_invoice))
        .route(
            "/billing-runs",
            post(handlers::billing_runs::create_billing_run),
        )
        // Payments
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route("/payments/:id/void", post(handlers::payments::void_payment))
        // Reports
        .route(
            "/reports/outstanding",
            get(handlers::reports::outstanding_report),
        )
        .route("/reports/payments", get(handlers::reports::payment_summary))
        .route("/reports/revenue", get(handlers::reports::revenue_report))
        .route("/reports/usage", get(handlers::reports::usage_report))
        .route_layer(from_fn(http_metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    operator_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    sweeper: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl Application {
    /// Build the application. Runs on Postgres when a database is configured,
    /// in memory otherwise.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn BillingStore> = match &config.database {
            Some(db) => {
                let database = Database::new(&db.url, db.max_connections, db.min_connections)
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to connect to database: {}", e);
                        e
                    })?;
                database.run_migrations().await?;
                Arc::new(database)
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Build over an existing store.
    pub async fn build_with_store(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
    ) -> Result<Self, AppError> {
        let state = AppState::new(config.clone(), store);

        // Port 0 = random port for testing
        let addr = config.common.bind_address();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let sweeper = config.billing.overdue_sweep_interval().map(|interval| {
            let (tx, rx) = watch::channel(false);
            let handle = start_overdue_sweeper(state.ledger.clone(), interval, rx);
            (tx, handle)
        });

        tracing::info!(port, "Water billing service bound");

        Ok(Self {
            port,
            listener,
            state,
            sweeper,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve until the listener fails, then stop the sweeper.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);
        let result = axum::serve(self.listener, router).await;

        if let Some((tx, handle)) = self.sweeper {
            let _ = tx.send(true);
            let _ = handle.await;
        }

        result
    }
}
