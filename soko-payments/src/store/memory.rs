//! In-memory stores backing the test-suite and local development.
//!
//! Transitions take the map lock for the whole check-and-set, giving the
//! same winner-takes-all semantics as the mongodb conditional updates.

use anyhow::{bail, Result};
use async_trait::async_trait;
use mongodb::bson::DateTime;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{AdStore, AuditFilter, AuditStore, TransactionStore};
use crate::models::{events, Ad, AdType, AuditEntry, Transaction, TransactionStatus};

#[derive(Default)]
pub struct MemoryTransactionStore {
    transactions: Mutex<HashMap<Uuid, Transaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn insert(&self, transaction: &Transaction) -> Result<()> {
        let mut transactions = self.transactions.lock().unwrap();
        // Mirrors the unique partial index on pending keyed rows.
        if transaction.status == TransactionStatus::Pending {
            if let Some(ref key) = transaction.idempotency_key {
                let duplicate = transactions.values().any(|t| {
                    t.user_id == transaction.user_id
                        && t.idempotency_key.as_deref() == Some(key.as_str())
                        && t.status == TransactionStatus::Pending
                });
                if duplicate {
                    bail!("duplicate pending transaction for idempotency key {key}");
                }
            }
        }
        transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.transactions.lock().unwrap().get(&id).cloned())
    }

    async fn find_pending_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .find(|t| {
                t.user_id == user_id
                    && t.idempotency_key.as_deref() == Some(key)
                    && t.status == TransactionStatus::Pending
            })
            .cloned())
    }

    async fn set_provider_details(
        &self,
        id: Uuid,
        external_payment_id: &str,
        checkout_url: &str,
        provider_response: Value,
    ) -> Result<()> {
        let mut transactions = self.transactions.lock().unwrap();
        if let Some(t) = transactions.get_mut(&id) {
            t.external_payment_id = Some(external_payment_id.to_string());
            t.payment_data.checkout_url = Some(checkout_url.to_string());
            t.payment_data.provider_response = Some(provider_response);
        }
        Ok(())
    }

    async fn transition_if_pending(&self, id: Uuid, to: TransactionStatus) -> Result<bool> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions.get_mut(&id) {
            Some(t) if t.status == TransactionStatus::Pending => {
                t.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_if_pending(
        &self,
        id: Uuid,
        ad_id: Uuid,
        completed_at: DateTime,
    ) -> Result<bool> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions.get_mut(&id) {
            Some(t) if t.status == TransactionStatus::Pending => {
                t.status = TransactionStatus::Completed;
                t.ad_id = Some(ad_id);
                t.completed_at = Some(completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_after_completion(&self, id: Uuid) -> Result<bool> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions.get_mut(&id) {
            Some(t) if t.status == TransactionStatus::Completed => {
                t.status = TransactionStatus::Failed;
                t.ad_id = None;
                t.completed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_expired_pending(&self, now: DateTime) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == TransactionStatus::Pending && now > t.expires_at)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryAdStore {
    ads: Mutex<HashMap<Uuid, Ad>>,
    fail_next_insert: AtomicBool,
}

impl MemoryAdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `insert_ad` fail, to exercise side-effect failure paths.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    pub fn get_ad(&self, id: Uuid) -> Option<Ad> {
        self.ads.lock().unwrap().get(&id).cloned()
    }

    pub fn ad_count(&self) -> usize {
        self.ads.lock().unwrap().len()
    }
}

#[async_trait]
impl AdStore for MemoryAdStore {
    async fn insert_ad(&self, ad: &Ad) -> Result<()> {
        if self.fail_next_insert.swap(false, Ordering::SeqCst) {
            bail!("injected ad store failure");
        }
        self.ads.lock().unwrap().insert(ad.id, ad.clone());
        Ok(())
    }

    async fn find_expired_premium(&self, now: DateTime) -> Result<Vec<Ad>> {
        Ok(self
            .ads
            .lock()
            .unwrap()
            .values()
            .filter(|ad| {
                ad.ad_type != AdType::Standard
                    && ad.premium_expires_at.map(|at| now > at).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn downgrade_to_standard(&self, ids: &[Uuid]) -> Result<u64> {
        let mut ads = self.ads.lock().unwrap();
        let mut changed = 0;
        for id in ids {
            if let Some(ad) = ads.get_mut(id) {
                if ad.ad_type != AdType::Standard {
                    ad.ad_type = AdType::Standard;
                    ad.premium_expires_at = None;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[derive(Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
    fail_counts: AtomicBool,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make window counts fail, to exercise the gate's fail-open path.
    pub fn fail_counts(&self) {
        self.fail_counts.store(true, Ordering::SeqCst);
    }

    pub fn entries_for(&self, transaction_id: Uuid, event_type: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.transaction_id == Some(transaction_id) && e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn entries_of_type(&self, event_type: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                filter.from.map(|from| e.created_at >= from).unwrap_or(true)
                    && filter.to.map(|to| e.created_at <= to).unwrap_or(true)
                    && filter
                        .event_type
                        .as_deref()
                        .map(|t| e.event_type == t)
                        .unwrap_or(true)
                    && filter
                        .transaction_id
                        .map(|id| e.transaction_id == Some(id))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn count_checks_since(
        &self,
        identifier: &str,
        identifier_type: &str,
        action: &str,
        since: DateTime,
    ) -> Result<u64> {
        if self.fail_counts.load(Ordering::SeqCst) {
            bail!("injected audit store failure");
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.event_type == events::RATE_LIMIT_CHECK
                    && e.created_at >= since
                    && e.event_data.get("identifier").and_then(|v| v.as_str()) == Some(identifier)
                    && e.event_data.get("identifier_type").and_then(|v| v.as_str())
                        == Some(identifier_type)
                    && e.event_data.get("action").and_then(|v| v.as_str()) == Some(action)
            })
            .count() as u64)
    }
}
