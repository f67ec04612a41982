//! Periodic expiry sweep.
//!
//! Two distinct concerns on one cadence: pending transactions whose
//! payment window closed move to `Expired`, and premium listings whose
//! boost window closed drop back to standard. Each sweep writes one
//! batch audit entry per category to bound log volume. Re-running is
//! harmless: the conditional transition skips rows another writer
//! already resolved.

use anyhow::Result;
use mongodb::bson::DateTime;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{events, TransactionStatus};
use crate::services::audit::AuditRecorder;
use crate::services::metrics;
use crate::store::{AdStore, TransactionStore};

#[derive(Debug, Default)]
pub struct SweepSummary {
    pub expired_transactions: Vec<Uuid>,
    pub downgraded_ads: Vec<Uuid>,
}

pub struct ExpirationSweeper {
    transactions: Arc<dyn TransactionStore>,
    ads: Arc<dyn AdStore>,
    audit: AuditRecorder,
    interval: Duration,
}

impl ExpirationSweeper {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        ads: Arc<dyn AdStore>,
        audit: AuditRecorder,
        interval: Duration,
    ) -> Self {
        Self {
            transactions,
            ads,
            audit,
            interval,
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepSummary> {
        let now = DateTime::now();
        let mut summary = SweepSummary::default();

        for transaction in self.transactions.find_expired_pending(now).await? {
            let won = self
                .transactions
                .transition_if_pending(transaction.id, TransactionStatus::Expired)
                .await?;
            if won {
                metrics::record_transaction(transaction.provider.as_str(), "expired");
                summary.expired_transactions.push(transaction.id);
            }
        }

        if !summary.expired_transactions.is_empty() {
            tracing::info!(
                count = summary.expired_transactions.len(),
                "Expired pending transactions past their payment window"
            );
            self.audit
                .record(
                    None,
                    events::EXPIRED_BY_SWEEPER,
                    json!({
                        "count": summary.expired_transactions.len(),
                        "transaction_ids": summary
                            .expired_transactions
                            .iter()
                            .map(|id| id.to_string())
                            .collect::<Vec<_>>(),
                    }),
                )
                .await?;
        }

        let expired_ads = self.ads.find_expired_premium(now).await?;
        if !expired_ads.is_empty() {
            let ids: Vec<Uuid> = expired_ads.iter().map(|ad| ad.id).collect();
            let downgraded = self.ads.downgrade_to_standard(&ids).await?;

            tracing::info!(count = downgraded, "Downgraded expired premium listings");
            self.audit
                .record(
                    None,
                    events::PREMIUM_ADS_EXPIRED,
                    json!({
                        "count": downgraded,
                        "ad_ids": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
                    }),
                )
                .await?;
            summary.downgraded_ads = ids;
        }

        Ok(summary)
    }

    /// Run until the token is cancelled. Sweep failures are logged and
    /// retried on the next tick rather than killing the loop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Expiration sweep failed");
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Expiration sweeper stopping");
                    break;
                }
            }
        }
    }
}
