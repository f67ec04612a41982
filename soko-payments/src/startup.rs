//! Application startup and lifecycle management.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use soko_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware},
    tracing::{request_id_middleware, RequestId},
};

use crate::config::Config;
use crate::handlers;
use crate::models::PaymentProvider;
use crate::providers::lygos::LygosAdapter;
use crate::providers::monetbil::MonetbilAdapter;
use crate::providers::ProviderAdapter;
use crate::services::metrics::init_metrics;
use crate::services::ExpirationSweeper;
use crate::store::mongo::{MongoAdStore, MongoAuditStore, MongoTransactionStore};
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    let limiter = create_ip_rate_limiter(state.config.security.ip_requests_per_minute, 60);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Payment lifecycle endpoints
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/verify",
            post(handlers::payments::verify_payment),
        )
        // Provider webhooks
        .route("/webhooks/lygos", post(handlers::webhooks::lygos_webhook))
        .route(
            "/webhooks/monetbil",
            post(handlers::webhooks::monetbil_webhook),
        )
        // Admin
        .route("/audit/export", get(handlers::audit::export_audit_log))
        // Metrics need the matched route template, so they sit inside
        // the router match.
        .route_layer(from_fn(metrics_middleware))
        .layer(from_fn_with_state(limiter, ip_rate_limit_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(RequestId::as_str)
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Outermost so the id exists before the trace span is built.
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    router: Router,
    sweeper: ExpirationSweeper,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        init_metrics();

        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("soko-payments".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let transactions = MongoTransactionStore::new(&db);
        transactions.init_indexes().await?;
        let audit_store = MongoAuditStore::new(&db);
        audit_store.init_indexes().await?;
        let ads = MongoAdStore::new(&db);

        let provider_timeout = Duration::from_secs(config.lifecycle.provider_timeout_seconds);
        let lygos = Arc::new(LygosAdapter::new(config.lygos.clone(), provider_timeout));
        let monetbil = Arc::new(MonetbilAdapter::new(
            config.monetbil.clone(),
            provider_timeout,
        ));

        let mut adapters: HashMap<PaymentProvider, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(PaymentProvider::Lygos, lygos.clone());
        adapters.insert(PaymentProvider::Monetbil, monetbil);

        let state = AppState::assemble(
            config.clone(),
            Arc::new(transactions),
            Arc::new(ads),
            Arc::new(audit_store),
            adapters,
            lygos,
        );

        let sweeper = ExpirationSweeper::new(
            state.transactions.clone(),
            state.ads.clone(),
            state.recorder.clone(),
            Duration::from_secs(config.lifecycle.sweep_interval_minutes * 60),
        );

        let router = build_router(state);

        Ok(Self {
            port: config.server.port,
            router,
            sweeper,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let cancel = CancellationToken::new();
        let sweeper_cancel = cancel.clone();
        let sweeper = self.sweeper;
        let sweeper_handle = tokio::spawn(async move {
            sweeper.run(sweeper_cancel).await;
        });

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await?;

        cancel.cancel();
        sweeper_handle.await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
