//! Lygos payment provider adapter.
//!
//! JSON API with an `api-key` header; webhooks are signed with
//! HMAC-SHA256 over the raw body.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

use super::{
    CreatePaymentRequest, ProviderAdapter, ProviderError, ProviderPayment, ProviderVerification,
};
use crate::config::LygosConfig;
use crate::models::{PaymentProvider, TransactionStatus};

#[derive(Clone)]
pub struct LygosAdapter {
    client: Client,
    config: LygosConfig,
}

#[derive(Debug, Serialize)]
struct GatewayRequest<'a> {
    amount: u64,
    currency: &'a str,
    shop_name: &'a str,
    message: &'a str,
    order_id: &'a str,
    success_url: &'a str,
    failure_url: &'a str,
    webhook_url: &'a str,
    customer_name: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    id: String,
    link: String,
}

#[derive(Debug, Deserialize)]
struct PayinStatus {
    status: String,
}

impl LygosAdapter {
    pub fn new(config: LygosConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with static configuration");
        Self { client, config }
    }

    /// Verify a webhook signature: `HMAC-SHA256(request_body, webhook_secret)`,
    /// hex encoded.
    pub fn verify_webhook_signature(&self, body: &str, signature: &str) -> bool {
        let expected = compute_signature(body, self.config.webhook_secret.expose_secret());
        let is_valid = expected == signature;

        if !is_valid {
            tracing::warn!("Lygos webhook signature verification failed");
        }

        is_valid
    }
}

fn compute_signature(payload: &str, secret: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl ProviderAdapter for LygosAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Lygos
    }

    fn map_status(&self, raw_status: &str) -> TransactionStatus {
        match raw_status.to_ascii_lowercase().as_str() {
            "completed" | "success" | "successful" | "paid" => TransactionStatus::Completed,
            "failed" | "error" | "cancelled" | "canceled" => TransactionStatus::Failed,
            "expired" => TransactionStatus::Expired,
            _ => TransactionStatus::Pending,
        }
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<ProviderPayment, ProviderError> {
        let url = format!("{}/gateway", self.config.api_base_url);
        let body = GatewayRequest {
            amount: request.amount,
            currency: &request.currency,
            shop_name: "soko",
            message: &request.description,
            order_id: &request.external_reference,
            success_url: &request.return_url,
            failure_url: &request.cancel_url,
            webhook_url: &request.webhook_url,
            customer_name: &request.customer.name,
            customer_email: &request.customer.email,
            customer_phone: &request.customer.phone,
        };

        let response = self
            .client
            .post(&url)
            .header("api-key", self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw: Value = response.json().await?;
        let gateway: GatewayResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            external_payment_id = %gateway.id,
            order_id = %request.external_reference,
            "Lygos payment created"
        );

        Ok(ProviderPayment {
            external_payment_id: gateway.id,
            checkout_url: gateway.link,
            raw,
        })
    }

    async fn verify_payment(
        &self,
        external_payment_id: &str,
    ) -> Result<ProviderVerification, ProviderError> {
        let url = format!(
            "{}/gateway/payin/{}",
            self.config.api_base_url, external_payment_id
        );

        let response = self
            .client
            .get(&url)
            .header("api-key", self.config.api_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw: Value = response.json().await?;
        let payin: PayinStatus = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(ProviderVerification {
            raw_status: payin.status,
            raw_payload: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_adapter() -> LygosAdapter {
        LygosAdapter::new(
            LygosConfig {
                api_key: Secret::new("test_key".to_string()),
                webhook_secret: Secret::new("webhook_secret".to_string()),
                api_base_url: "https://api.lygosapp.com/v1".to_string(),
            },
            Duration::from_secs(15),
        )
    }

    #[test]
    fn maps_success_vocabulary() {
        let adapter = test_adapter();
        assert_eq!(adapter.map_status("completed"), TransactionStatus::Completed);
        assert_eq!(adapter.map_status("SUCCESS"), TransactionStatus::Completed);
        assert_eq!(adapter.map_status("paid"), TransactionStatus::Completed);
    }

    #[test]
    fn maps_failure_and_expiry() {
        let adapter = test_adapter();
        assert_eq!(adapter.map_status("failed"), TransactionStatus::Failed);
        assert_eq!(adapter.map_status("cancelled"), TransactionStatus::Failed);
        assert_eq!(adapter.map_status("expired"), TransactionStatus::Expired);
    }

    #[test]
    fn unknown_status_is_pending_never_completed() {
        let adapter = test_adapter();
        assert_eq!(adapter.map_status("initiated"), TransactionStatus::Pending);
        assert_eq!(adapter.map_status(""), TransactionStatus::Pending);
        assert_eq!(adapter.map_status("garbage"), TransactionStatus::Pending);
    }

    #[test]
    fn webhook_signature_roundtrip() {
        let adapter = test_adapter();
        let body = r#"{"payment_id":"pay_1","status":"completed"}"#;
        let signature = compute_signature(body, "webhook_secret");

        assert!(adapter.verify_webhook_signature(body, &signature));
        assert!(!adapter.verify_webhook_signature(body, "bogus"));

        let tampered = r#"{"payment_id":"pay_1","status":"failed"}"#;
        assert!(!adapter.verify_webhook_signature(tampered, &signature));
    }
}
