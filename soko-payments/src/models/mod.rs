use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single payment attempt, from creation to terminal resolution.
///
/// Financial records are never deleted; rows only move forward through
/// the status state machine. `amount` and `currency` are immutable after
/// insert (no store operation updates them).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_id: String,
    /// Amount in minor currency units (XAF has none, so 5000 XAF == 5000).
    pub amount: u64,
    pub currency: String,
    pub status: TransactionStatus,
    pub provider: PaymentProvider,
    /// Provider-assigned identifier, set once the provider accepts the
    /// creation request.
    pub external_payment_id: Option<String>,
    pub payment_data: PaymentData,
    /// Client-generated key that makes `create_transaction` safe to replay.
    pub idempotency_key: Option<String>,
    /// Listing materialized on completion; never set at creation except
    /// for free-tier transactions which complete synchronously.
    pub ad_id: Option<Uuid>,
    pub created_at: DateTime,
    pub expires_at: DateTime,
    pub completed_at: Option<DateTime>,
}

impl Transaction {
    pub fn is_expired_at(&self, now: DateTime) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl TransactionStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Lygos,
    Monetbil,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Lygos => "lygos",
            PaymentProvider::Monetbil => "monetbil",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdType {
    Standard,
    Premium,
    Featured,
}

impl AdType {
    pub fn is_paid_tier(&self) -> bool {
        !matches!(self, AdType::Standard)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdType::Standard => "standard",
            AdType::Premium => "premium",
            AdType::Featured => "featured",
        }
    }
}

/// Staging payload for the completion side effect.
///
/// Captured and validated at creation time; the listing is materialized
/// from this snapshot, never from webhook contents.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentData {
    pub customer: CustomerInfo,
    pub ad: AdDraft,
    pub checkout_url: Option<String>,
    /// Raw provider response kept for dispute resolution.
    pub provider_response: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Snapshot of the listing to create once payment confirms.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdDraft {
    pub title: String,
    pub description: String,
    pub category: String,
    /// Asking price of the listed item, not the payment amount.
    pub price: u64,
    pub ad_type: AdType,
}

/// A marketplace listing, materialized exactly once on payment completion.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ad {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub price: u64,
    pub ad_type: AdType,
    pub is_active: bool,
    pub premium_expires_at: Option<DateTime>,
    pub created_at: DateTime,
}

/// Append-only audit record; the dispute-resolution trail.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEntry {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub security_flags: Vec<String>,
    pub created_at: DateTime,
}

/// Well-known audit event types.
pub mod events {
    pub const TRANSACTION_CREATED: &str = "transaction_created";
    pub const PAYMENT_INITIATED: &str = "payment_initiated";
    pub const PROVIDER_API_ERROR: &str = "provider_api_error";
    pub const STATUS_TRANSITION: &str = "status_transition";
    pub const WEBHOOK_PROCESSED: &str = "webhook_processed";
    pub const WEBHOOK_REPLAYED: &str = "webhook_replayed";
    pub const AMOUNT_MISMATCH: &str = "amount_mismatch";
    pub const SIDE_EFFECT_FAILED: &str = "side_effect_failed";
    pub const EXPIRED_BY_SWEEPER: &str = "expired_by_sweeper";
    pub const PREMIUM_ADS_EXPIRED: &str = "premium_ads_expired";
    pub const RETRY_ATTEMPT: &str = "retry_attempt";
    pub const RETRY_SUCCESS: &str = "retry_success";
    pub const RETRY_FAILED: &str = "retry_failed";
    pub const RATE_LIMIT_CHECK: &str = "rate_limit_check";
    pub const SUSPICIOUS_ACTIVITY: &str = "suspicious_activity";
}

/// How a provider status update reached the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Webhook,
    Poll,
    Manual,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Webhook => "webhook",
            UpdateSource::Poll => "poll",
            UpdateSource::Manual => "manual",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Expired.is_terminal());
    }

    #[test]
    fn paid_tiers() {
        assert!(!AdType::Standard.is_paid_tier());
        assert!(AdType::Premium.is_paid_tier());
        assert!(AdType::Featured.is_paid_tier());
    }
}
