//! Shared test harness: in-memory stores, a scripted provider adapter,
//! and a router wired exactly as production wires it.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use secrecy::Secret;
use serde_json::Value;
use sha2::Sha256;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use soko_payments::config::{
    Config, DatabaseConfig, LifecycleConfig, LygosConfig, MonetbilConfig, SecurityConfig,
    ServerConfig,
};
use mongodb::bson::DateTime;
use soko_payments::models::{
    Ad, AdDraft, AdType, CustomerInfo, PaymentData, PaymentProvider, Transaction,
    TransactionStatus,
};
use soko_payments::providers::lygos::LygosAdapter;
use soko_payments::services::audit::AuditContext;
use soko_payments::services::lifecycle::NewTransaction;
use soko_payments::providers::{
    CreatePaymentRequest, ProviderAdapter, ProviderError, ProviderPayment, ProviderVerification,
};
use soko_payments::startup::build_router;
use soko_payments::store::memory::{MemoryAdStore, MemoryAuditStore, MemoryTransactionStore};
use soko_payments::AppState;

pub const TEST_USER_ID: &str = "user-42";
pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            webhook_base_url: "https://api.soko.test".to_string(),
        },
        database: DatabaseConfig {
            url: Secret::new("mongodb://localhost:27017".to_string()),
            db_name: "soko_payments_test".to_string(),
        },
        lygos: LygosConfig {
            api_key: Secret::new("test-api-key".to_string()),
            webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
            api_base_url: "https://lygos.invalid".to_string(),
        },
        monetbil: MonetbilConfig {
            service_key: "test-service-key".to_string(),
            service_secret: Secret::new("test-service-secret".to_string()),
            api_base_url: "https://monetbil.invalid".to_string(),
        },
        security: SecurityConfig::default(),
        lifecycle: LifecycleConfig::default(),
        service_name: "soko-payments-test".to_string(),
    }
}

/// Scripted provider adapter: tests queue up responses in order.
#[derive(Default)]
pub struct MockAdapter {
    create_responses: Mutex<VecDeque<Result<ProviderPayment, ProviderError>>>,
    verify_responses: Mutex<VecDeque<Result<ProviderVerification, ProviderError>>>,
}

impl MockAdapter {
    pub fn push_create_ok(&self, external_id: &str, checkout_url: &str) {
        self.create_responses
            .lock()
            .unwrap()
            .push_back(Ok(ProviderPayment {
                external_payment_id: external_id.to_string(),
                checkout_url: checkout_url.to_string(),
                raw: serde_json::json!({ "id": external_id, "link": checkout_url }),
            }));
    }

    pub fn push_create_err(&self, message: &str) {
        self.create_responses
            .lock()
            .unwrap()
            .push_back(Err(ProviderError::Api {
                status: 502,
                body: message.to_string(),
            }));
    }

    pub fn push_verify_status(&self, raw_status: &str) {
        self.verify_responses
            .lock()
            .unwrap()
            .push_back(Ok(ProviderVerification {
                raw_status: raw_status.to_string(),
                raw_payload: serde_json::json!({ "status": raw_status }),
            }));
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Lygos
    }

    fn map_status(&self, raw_status: &str) -> TransactionStatus {
        match raw_status.to_ascii_lowercase().as_str() {
            "1" | "completed" | "success" | "paid" => TransactionStatus::Completed,
            "0" | "failed" | "error" | "cancelled" => TransactionStatus::Failed,
            "expired" => TransactionStatus::Expired,
            _ => TransactionStatus::Pending,
        }
    }

    async fn create_payment(
        &self,
        _request: &CreatePaymentRequest,
    ) -> Result<ProviderPayment, ProviderError> {
        self.create_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::InvalidResponse(
                    "no scripted create response".to_string(),
                ))
            })
    }

    async fn verify_payment(
        &self,
        _external_payment_id: &str,
    ) -> Result<ProviderVerification, ProviderError> {
        self.verify_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::InvalidResponse(
                    "no scripted verify response".to_string(),
                ))
            })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub transactions: Arc<MemoryTransactionStore>,
    pub ads: Arc<MemoryAdStore>,
    pub audit: Arc<MemoryAuditStore>,
    pub mock: Arc<MockAdapter>,
}

impl TestApp {
    pub fn build() -> Self {
        let config = test_config();
        let transactions = Arc::new(MemoryTransactionStore::new());
        let ads = Arc::new(MemoryAdStore::new());
        let audit = Arc::new(MemoryAuditStore::new());
        let mock = Arc::new(MockAdapter::default());
        let lygos = Arc::new(LygosAdapter::new(
            config.lygos.clone(),
            Duration::from_secs(5),
        ));

        let mut adapters: HashMap<PaymentProvider, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(PaymentProvider::Lygos, mock.clone());
        adapters.insert(PaymentProvider::Monetbil, mock.clone());

        let state = AppState::assemble(
            config,
            transactions.clone(),
            ads.clone(),
            audit.clone(),
            adapters,
            lygos,
        );
        let router = build_router(state.clone());

        Self {
            state,
            router,
            transactions,
            ads,
            audit,
            mock,
        }
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-User-Id", TEST_USER_ID)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header("X-User-Id", TEST_USER_ID)
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Deliver a signed Lygos webhook.
    pub async fn lygos_webhook(&self, body: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/lygos")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Lygos-Signature", sign_lygos(body))
            .body(Body::from(body.to_string()))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Deliver a form-encoded Monetbil webhook.
    pub async fn monetbil_webhook(&self, body: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri("/webhooks/monetbil")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create a pending 5000 XAF Lygos transaction through the API and
    /// return its ID.
    pub async fn create_pending_payment(&self) -> Uuid {
        self.mock.push_create_ok("pay_ext_1", "https://pay.lygos.test/checkout/1");
        let response = self
            .post_json("/payments", create_payment_body(5000, "lygos"))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        Uuid::parse_str(body["transaction_id"].as_str().unwrap()).unwrap()
    }
}

pub fn create_payment_body(amount: u64, provider: &str) -> Value {
    serde_json::json!({
        "amount": amount,
        "currency": "XAF",
        "provider": provider,
        "customer": {
            "name": "Achille N.",
            "email": "achille@example.com",
            "phone": "+237650000001"
        },
        "ad": {
            "title": "Mountain bike",
            "description": "Barely used, good brakes",
            "category": "vehicles",
            "price": 45000,
            "ad_type": "premium"
        }
    })
}

pub fn payment_data(ad_type: AdType) -> PaymentData {
    PaymentData {
        customer: CustomerInfo {
            name: "Achille N.".to_string(),
            email: "achille@example.com".to_string(),
            phone: "+237650000001".to_string(),
        },
        ad: AdDraft {
            title: "Mountain bike".to_string(),
            description: "Barely used, good brakes".to_string(),
            category: "vehicles".to_string(),
            price: 45000,
            ad_type,
        },
        checkout_url: None,
        provider_response: None,
    }
}

pub fn new_transaction_input(amount: u64, provider: PaymentProvider) -> NewTransaction {
    NewTransaction {
        user_id: TEST_USER_ID.to_string(),
        amount,
        currency: "XAF".to_string(),
        provider,
        payment_data: payment_data(AdType::Premium),
        idempotency_key: None,
        context: AuditContext::default(),
    }
}

/// A handcrafted pending row whose payment window closes `expires_in_ms`
/// milliseconds from now (negative for already overdue).
pub fn pending_transaction(provider: PaymentProvider, amount: u64, expires_in_ms: i64) -> Transaction {
    let now = DateTime::now();
    Transaction {
        id: Uuid::new_v4(),
        user_id: TEST_USER_ID.to_string(),
        amount,
        currency: "XAF".to_string(),
        status: TransactionStatus::Pending,
        provider,
        external_payment_id: Some("pay_ext_1".to_string()),
        payment_data: payment_data(AdType::Premium),
        idempotency_key: None,
        ad_id: None,
        created_at: now,
        expires_at: DateTime::from_millis(now.timestamp_millis() + expires_in_ms),
        completed_at: None,
    }
}

/// A live listing whose boost window closes `expires_in_ms` milliseconds
/// from now (negative for already lapsed).
pub fn premium_ad(expires_in_ms: i64) -> Ad {
    let now = DateTime::now();
    Ad {
        id: Uuid::new_v4(),
        user_id: TEST_USER_ID.to_string(),
        title: "Mountain bike".to_string(),
        description: "Barely used, good brakes".to_string(),
        category: "vehicles".to_string(),
        price: 45000,
        ad_type: AdType::Premium,
        is_active: true,
        premium_expires_at: Some(DateTime::from_millis(now.timestamp_millis() + expires_in_ms)),
        created_at: now,
    }
}

pub fn sign_lygos(body: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(TEST_WEBHOOK_SECRET.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn read_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
