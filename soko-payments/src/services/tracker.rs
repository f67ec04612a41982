//! Status polling facade.
//!
//! Used when webhook delivery is delayed: actively asks the provider for
//! the payment's status and feeds the answer through the same
//! `apply_provider_update` path the webhook handler uses.

use anyhow::Result;
use mongodb::bson::DateTime;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{Transaction, TransactionStatus, UpdateSource};
use crate::services::lifecycle::{LifecycleManager, UpdateOutcome};
use crate::store::TransactionStore;

pub struct StatusTracker {
    transactions: Arc<dyn TransactionStore>,
    lifecycle: Arc<LifecycleManager>,
}

/// Seconds until the payment window closes; `None` once terminal,
/// zero when already past due.
pub fn time_remaining(transaction: &Transaction, now: DateTime) -> Option<u64> {
    if transaction.status.is_terminal() {
        return None;
    }
    let remaining_ms = transaction.expires_at.timestamp_millis() - now.timestamp_millis();
    Some((remaining_ms.max(0) / 1000) as u64)
}

impl StatusTracker {
    pub fn new(transactions: Arc<dyn TransactionStore>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            transactions,
            lifecycle,
        }
    }

    /// One verification round-trip against the provider.
    pub async fn poll_once(&self, transaction_id: Uuid) -> Result<UpdateOutcome> {
        let Some(transaction) = self.transactions.get(transaction_id).await? else {
            return Ok(UpdateOutcome::NotFound);
        };

        if transaction.status.is_terminal() {
            return Ok(UpdateOutcome::AlreadyTerminal(transaction.status));
        }

        let Some(ref external_id) = transaction.external_payment_id else {
            // Provider never acknowledged this payment; nothing to poll.
            return Ok(UpdateOutcome::StillPending);
        };

        let adapter = self.lifecycle.adapter(transaction.provider)?;
        let verification = adapter.verify_payment(external_id).await?;

        self.lifecycle
            .apply_provider_update(
                transaction_id,
                &verification.raw_status,
                verification.raw_payload,
                UpdateSource::Poll,
                None,
            )
            .await
    }

    /// Poll on an interval until the transaction resolves or the token
    /// is cancelled. Returns the last observed status.
    pub async fn track(
        &self,
        transaction_id: Uuid,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<TransactionStatus> {
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.poll_once(transaction_id).await {
                        Ok(UpdateOutcome::Applied { to, .. }) => return Ok(to),
                        Ok(UpdateOutcome::AlreadyTerminal(status)) => return Ok(status),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(
                                transaction_id = %transaction_id,
                                error = %e,
                                "Status poll failed; will retry on next tick"
                            );
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    return Ok(self
                        .transactions
                        .get(transaction_id)
                        .await?
                        .map(|t| t.status)
                        .unwrap_or(TransactionStatus::Pending));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AdDraft, AdType, CustomerInfo, PaymentData, PaymentProvider,
    };

    fn transaction(status: TransactionStatus, expires_in_secs: i64) -> Transaction {
        let now = chrono::Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            amount: 5000,
            currency: "XAF".to_string(),
            status,
            provider: PaymentProvider::Lygos,
            external_payment_id: None,
            payment_data: PaymentData {
                customer: CustomerInfo {
                    name: "Test".to_string(),
                    email: "test@example.com".to_string(),
                    phone: "+237600000000".to_string(),
                },
                ad: AdDraft {
                    title: "Bike".to_string(),
                    description: "Good bike".to_string(),
                    category: "vehicles".to_string(),
                    price: 45000,
                    ad_type: AdType::Standard,
                },
                checkout_url: None,
                provider_response: None,
            },
            idempotency_key: None,
            ad_id: None,
            created_at: DateTime::from_chrono(now),
            expires_at: DateTime::from_chrono(now + chrono::Duration::seconds(expires_in_secs)),
            completed_at: None,
        }
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let t = transaction(TransactionStatus::Pending, 3600);
        let remaining = time_remaining(&t, DateTime::now()).unwrap();
        assert!(remaining > 3590 && remaining <= 3600);

        let overdue = transaction(TransactionStatus::Pending, -60);
        assert_eq!(time_remaining(&overdue, DateTime::now()), Some(0));
    }

    #[test]
    fn terminal_transactions_have_no_countdown() {
        let t = transaction(TransactionStatus::Completed, 3600);
        assert_eq!(time_remaining(&t, DateTime::now()), None);
    }
}
