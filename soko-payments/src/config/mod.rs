use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub lygos: LygosConfig,
    pub monetbil: MonetbilConfig,
    pub security: SecurityConfig,
    pub lifecycle: LifecycleConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL providers call back on, e.g. "https://api.soko.example".
    pub webhook_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LygosConfig {
    pub api_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct MonetbilConfig {
    pub service_key: String,
    pub service_secret: Secret<String>,
    pub api_base_url: String,
}

/// Sliding-window limits applied by the security gate, per action type.
#[derive(Deserialize, Clone, Debug)]
pub struct SecurityConfig {
    pub payment_creation: ActionLimit,
    pub login: ActionLimit,
    pub password_reset: ActionLimit,
    pub account_creation: ActionLimit,
    /// Per-IP limit enforced at the router edge (requests per minute).
    pub ip_requests_per_minute: u32,
}

#[derive(Deserialize, Clone, Debug, Copy)]
pub struct ActionLimit {
    pub max_requests: u64,
    pub window_minutes: i64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LifecycleConfig {
    /// How long a pending transaction stays payable (hours).
    pub payment_window_hours: i64,
    /// Expiration sweeper cadence (minutes).
    pub sweep_interval_minutes: u64,
    /// Outbound provider call timeout (seconds).
    pub provider_timeout_seconds: u64,
    /// How long a premium/featured listing stays boosted (days).
    pub premium_duration_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("PAYMENTS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PAYMENTS_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()
            .context("PAYMENTS_PORT must be a valid port number")?;
        let webhook_base_url =
            env::var("PAYMENTS_WEBHOOK_BASE_URL").context("PAYMENTS_WEBHOOK_BASE_URL must be set")?;

        let db_url = env::var("PAYMENTS_DATABASE_URL").context("PAYMENTS_DATABASE_URL must be set")?;
        let db_name =
            env::var("PAYMENTS_DATABASE_NAME").unwrap_or_else(|_| "soko_payments".to_string());

        let lygos_api_key = env::var("LYGOS_API_KEY").context("LYGOS_API_KEY must be set")?;
        let lygos_webhook_secret =
            env::var("LYGOS_WEBHOOK_SECRET").context("LYGOS_WEBHOOK_SECRET must be set")?;
        let lygos_base_url = env::var("LYGOS_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.lygosapp.com/v1".to_string());

        let monetbil_service_key =
            env::var("MONETBIL_SERVICE_KEY").context("MONETBIL_SERVICE_KEY must be set")?;
        let monetbil_service_secret =
            env::var("MONETBIL_SERVICE_SECRET").context("MONETBIL_SERVICE_SECRET must be set")?;
        let monetbil_base_url = env::var("MONETBIL_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.monetbil.com/widget/v2.1".to_string());

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                webhook_base_url,
            },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            lygos: LygosConfig {
                api_key: Secret::new(lygos_api_key),
                webhook_secret: Secret::new(lygos_webhook_secret),
                api_base_url: lygos_base_url,
            },
            monetbil: MonetbilConfig {
                service_key: monetbil_service_key,
                service_secret: Secret::new(monetbil_service_secret),
                api_base_url: monetbil_base_url,
            },
            security: SecurityConfig::default(),
            lifecycle: LifecycleConfig::default(),
            service_name: "soko-payments".to_string(),
        })
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            payment_creation: ActionLimit {
                max_requests: 5,
                window_minutes: 60,
            },
            login: ActionLimit {
                max_requests: 10,
                window_minutes: 15,
            },
            password_reset: ActionLimit {
                max_requests: 3,
                window_minutes: 60,
            },
            account_creation: ActionLimit {
                max_requests: 3,
                window_minutes: 1440,
            },
            ip_requests_per_minute: 120,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            payment_window_hours: 24,
            sweep_interval_minutes: 30,
            provider_timeout_seconds: 15,
            premium_duration_days: 30,
        }
    }
}
