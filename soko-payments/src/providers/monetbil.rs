//! Monetbil payment provider adapter.
//!
//! Form-encoded widget API. Monetbil reports payment state both as named
//! statuses and as legacy single-character codes (`"1"` paid, `"0"`
//! failed, `"2"` pending); both vocabularies map here.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{
    CreatePaymentRequest, ProviderAdapter, ProviderError, ProviderPayment, ProviderVerification,
};
use crate::config::MonetbilConfig;
use crate::models::{PaymentProvider, TransactionStatus};

#[derive(Clone)]
pub struct MonetbilAdapter {
    client: Client,
    config: MonetbilConfig,
}

#[derive(Debug, Serialize)]
struct PlacePaymentForm<'a> {
    service: &'a str,
    amount: u64,
    currency: &'a str,
    item_ref: &'a str,
    user: &'a str,
    email: &'a str,
    phonenumber: &'a str,
    return_url: &'a str,
    notify_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct PlacePaymentResponse {
    #[serde(rename = "paymentId")]
    payment_id: String,
    payment_url: String,
}

#[derive(Debug, Deserialize)]
struct CheckPaymentResponse {
    transaction: CheckedTransaction,
}

#[derive(Debug, Deserialize)]
struct CheckedTransaction {
    status: Value,
}

impl MonetbilAdapter {
    pub fn new(config: MonetbilConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with static configuration");
        Self { client, config }
    }
}

#[async_trait]
impl ProviderAdapter for MonetbilAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Monetbil
    }

    fn map_status(&self, raw_status: &str) -> TransactionStatus {
        match raw_status.to_ascii_lowercase().as_str() {
            "1" | "success" | "successful" | "completed" | "paid" => TransactionStatus::Completed,
            "0" | "-1" | "failed" | "error" | "cancelled" | "canceled" => {
                TransactionStatus::Failed
            }
            "expired" => TransactionStatus::Expired,
            _ => TransactionStatus::Pending,
        }
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<ProviderPayment, ProviderError> {
        let url = format!("{}/{}", self.config.api_base_url, self.config.service_key);
        let form = PlacePaymentForm {
            service: &self.config.service_key,
            amount: request.amount,
            currency: &request.currency,
            item_ref: &request.external_reference,
            user: &request.customer.name,
            email: &request.customer.email,
            phonenumber: &request.customer.phone,
            return_url: &request.return_url,
            notify_url: &request.webhook_url,
        };

        let response = self.client.post(&url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw: Value = response.json().await?;
        let placed: PlacePaymentResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            external_payment_id = %placed.payment_id,
            item_ref = %request.external_reference,
            "Monetbil payment placed"
        );

        Ok(ProviderPayment {
            external_payment_id: placed.payment_id,
            checkout_url: placed.payment_url,
            raw,
        })
    }

    async fn verify_payment(
        &self,
        external_payment_id: &str,
    ) -> Result<ProviderVerification, ProviderError> {
        let url = format!("{}/checkPayment", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .form(&[
                ("paymentId", external_payment_id),
                ("service_secret", self.config.service_secret.expose_secret()),
            ])
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
        let checked: CheckPaymentResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        // Status may arrive as a bare number or a string.
        let raw_status = match &checked.transaction.status {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(ProviderError::InvalidResponse(format!(
                    "unrecognized status value: {other}"
                )))
            }
        };

        Ok(ProviderVerification {
            raw_status,
            raw_payload: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_adapter() -> MonetbilAdapter {
        MonetbilAdapter::new(
            MonetbilConfig {
                service_key: "svc_key".to_string(),
                service_secret: Secret::new("svc_secret".to_string()),
                api_base_url: "https://api.monetbil.com/widget/v2.1".to_string(),
            },
            Duration::from_secs(15),
        )
    }

    #[test]
    fn maps_legacy_numeric_codes() {
        let adapter = test_adapter();
        assert_eq!(adapter.map_status("1"), TransactionStatus::Completed);
        assert_eq!(adapter.map_status("0"), TransactionStatus::Failed);
        assert_eq!(adapter.map_status("-1"), TransactionStatus::Failed);
        assert_eq!(adapter.map_status("2"), TransactionStatus::Pending);
    }

    #[test]
    fn maps_named_statuses() {
        let adapter = test_adapter();
        assert_eq!(adapter.map_status("success"), TransactionStatus::Completed);
        assert_eq!(adapter.map_status("CANCELLED"), TransactionStatus::Failed);
        assert_eq!(adapter.map_status("expired"), TransactionStatus::Expired);
        assert_eq!(adapter.map_status("pending"), TransactionStatus::Pending);
    }

    #[test]
    fn unknown_status_is_pending() {
        let adapter = test_adapter();
        assert_eq!(adapter.map_status("whatever"), TransactionStatus::Pending);
    }
}
