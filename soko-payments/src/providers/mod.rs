//! Payment provider adapters.
//!
//! Each adapter normalizes one provider's request/response/webhook
//! vocabulary into the internal one, so the lifecycle manager never sees
//! provider-specific shapes. Adding a provider means implementing
//! [`ProviderAdapter`] and registering it under its
//! [`PaymentProvider`](crate::models::PaymentProvider) discriminant.

pub mod lygos;
pub mod monetbil;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{CustomerInfo, PaymentProvider, TransactionStatus};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// Outbound payment-creation request, common to all providers.
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub amount: u64,
    pub currency: String,
    pub description: String,
    pub customer: CustomerInfo,
    pub return_url: String,
    pub cancel_url: String,
    pub webhook_url: String,
    /// Our transaction ID, echoed back by the provider in webhooks.
    pub external_reference: String,
}

/// What the provider hands back when it accepts a payment.
#[derive(Debug, Clone)]
pub struct ProviderPayment {
    pub external_payment_id: String,
    pub checkout_url: String,
    pub raw: Value,
}

/// Result of actively polling the provider for a payment's status.
#[derive(Debug, Clone)]
pub struct ProviderVerification {
    pub raw_status: String,
    pub raw_payload: Value,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Map the provider's raw status vocabulary to the internal enum.
    ///
    /// Pure and exhaustive; unknown strings map to `Pending`, never to
    /// `Completed`.
    fn map_status(&self, raw_status: &str) -> TransactionStatus;

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<ProviderPayment, ProviderError>;

    async fn verify_payment(
        &self,
        external_payment_id: &str,
    ) -> Result<ProviderVerification, ProviderError>;
}
