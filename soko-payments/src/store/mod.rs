//! Storage seam for the lifecycle core.
//!
//! The state machine only touches storage through these traits. The two
//! `*_if_pending` operations are conditional writes: they succeed only
//! when the row is still `Pending`, which is what serializes concurrent
//! webhook and poll updates racing on the same transaction.

pub mod memory;
pub mod mongo;

use anyhow::Result;
use async_trait::async_trait;
use mongodb::bson::DateTime;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Ad, AuditEntry, Transaction, TransactionStatus};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, transaction: &Transaction) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;

    /// Find a still-pending transaction previously created with the same
    /// client idempotency key, so replays do not mint duplicate rows.
    async fn find_pending_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>>;

    /// Record what the provider assigned at initiation time.
    async fn set_provider_details(
        &self,
        id: Uuid,
        external_payment_id: &str,
        checkout_url: &str,
        provider_response: Value,
    ) -> Result<()>;

    /// Move a pending transaction to `to`. Returns `false` (no write)
    /// when the row is missing or already terminal.
    async fn transition_if_pending(&self, id: Uuid, to: TransactionStatus) -> Result<bool>;

    /// Complete a pending transaction and bind the materialized listing
    /// in the same conditional write. Returns `false` when the row is
    /// missing or already terminal.
    async fn complete_if_pending(
        &self,
        id: Uuid,
        ad_id: Uuid,
        completed_at: DateTime,
    ) -> Result<bool>;

    /// Escalation path: the side-effect materialization failed after the
    /// completion write landed, so the row must not stay `Completed` with
    /// no listing behind it. Returns `false` if the row was not `Completed`.
    async fn fail_after_completion(&self, id: Uuid) -> Result<bool>;

    async fn find_expired_pending(&self, now: DateTime) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait AdStore: Send + Sync {
    async fn insert_ad(&self, ad: &Ad) -> Result<()>;

    async fn find_expired_premium(&self, now: DateTime) -> Result<Vec<Ad>>;

    async fn downgrade_to_standard(&self, ids: &[Uuid]) -> Result<u64>;
}

/// Filter for audit export queries.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub from: Option<DateTime>,
    pub to: Option<DateTime>,
    pub event_type: Option<String>,
    pub transaction_id: Option<Uuid>,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append-only; there are deliberately no update or delete operations.
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;

    /// Count rate-limit check entries for an identifier/action pair since
    /// the given instant. Backs the security gate's sliding window.
    async fn count_checks_since(
        &self,
        identifier: &str,
        identifier_type: &str,
        action: &str,
        since: DateTime,
    ) -> Result<u64>;
}
