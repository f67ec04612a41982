pub mod client;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod services;
pub mod startup;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use config::Config;
use models::PaymentProvider;
use providers::lygos::LygosAdapter;
use providers::ProviderAdapter;
use services::{AuditRecorder, LifecycleManager, SecurityGate, StatusTracker};
use store::{AdStore, AuditStore, TransactionStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub transactions: Arc<dyn TransactionStore>,
    pub ads: Arc<dyn AdStore>,
    pub recorder: AuditRecorder,
    pub lifecycle: Arc<LifecycleManager>,
    pub gate: Arc<SecurityGate>,
    pub tracker: Arc<StatusTracker>,
    /// Kept concrete alongside the adapter registry for webhook
    /// signature verification.
    pub lygos: Arc<LygosAdapter>,
}

impl AppState {
    /// Wire the service graph over any store/adapter implementations.
    /// Production wiring lives in [`startup::Application::build`]; the
    /// test-suite assembles this over in-memory stores.
    pub fn assemble(
        config: Config,
        transactions: Arc<dyn TransactionStore>,
        ads: Arc<dyn AdStore>,
        audit_store: Arc<dyn AuditStore>,
        adapters: HashMap<PaymentProvider, Arc<dyn ProviderAdapter>>,
        lygos: Arc<LygosAdapter>,
    ) -> Self {
        let recorder = AuditRecorder::new(audit_store);
        let lifecycle = Arc::new(LifecycleManager::new(
            transactions.clone(),
            ads.clone(),
            recorder.clone(),
            adapters,
            config.lifecycle.payment_window_hours,
            config.lifecycle.premium_duration_days,
            config.server.webhook_base_url.clone(),
        ));
        let gate = Arc::new(SecurityGate::new(
            recorder.clone(),
            config.security.clone(),
        ));
        let tracker = Arc::new(StatusTracker::new(transactions.clone(), lifecycle.clone()));

        Self {
            config,
            transactions,
            ads,
            recorder,
            lifecycle,
            gate,
            tracker,
            lygos,
        }
    }
}
