//! Transaction lifecycle manager.
//!
//! Owns the state machine `pending -> {completed | failed | expired}`.
//! All provider status updates, whether they arrive by webhook, by
//! polling, or manually, flow through [`LifecycleManager::apply_provider_update`]
//! so the idempotency guard, expiry precedence, and side-effect
//! materialization behave identically regardless of ingress path.

use anyhow::{anyhow, Context, Result};
use mongodb::bson::DateTime;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    events, Ad, PaymentData, PaymentProvider, Transaction, TransactionStatus, UpdateSource,
};
use crate::providers::{CreatePaymentRequest, ProviderAdapter};
use crate::services::audit::{AuditContext, AuditRecorder};
use crate::services::metrics;
use crate::store::{AdStore, TransactionStore};

pub struct NewTransaction {
    pub user_id: String,
    pub amount: u64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub payment_data: PaymentData,
    pub idempotency_key: Option<String>,
    pub context: AuditContext,
}

/// Figures a webhook claims for the payment, validated against the
/// stored row before any `completed` signal is trusted.
#[derive(Debug, Clone)]
pub struct ReportedFigures {
    /// `None` when the webhook carried an amount that did not parse,
    /// which counts as a mismatch rather than an absent field.
    pub amount: Option<u64>,
    pub currency: String,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    /// The transition was applied by this call.
    Applied {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    /// The row was already terminal; replay absorbed as a no-op.
    AlreadyTerminal(TransactionStatus),
    /// Provider still reports a non-terminal status; nothing to do.
    StillPending,
    /// Reported figures disagree with the stored row; held for review.
    MismatchHeld,
    /// No such transaction.
    NotFound,
}

pub struct LifecycleManager {
    transactions: Arc<dyn TransactionStore>,
    ads: Arc<dyn AdStore>,
    audit: AuditRecorder,
    adapters: HashMap<PaymentProvider, Arc<dyn ProviderAdapter>>,
    payment_window: chrono::Duration,
    premium_duration: chrono::Duration,
    webhook_base_url: String,
}

impl LifecycleManager {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        ads: Arc<dyn AdStore>,
        audit: AuditRecorder,
        adapters: HashMap<PaymentProvider, Arc<dyn ProviderAdapter>>,
        payment_window_hours: i64,
        premium_duration_days: i64,
        webhook_base_url: String,
    ) -> Self {
        Self {
            transactions,
            ads,
            audit,
            adapters,
            payment_window: chrono::Duration::hours(payment_window_hours),
            premium_duration: chrono::Duration::days(premium_duration_days),
            webhook_base_url,
        }
    }

    pub fn adapter(&self, provider: PaymentProvider) -> Result<&Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&provider)
            .ok_or_else(|| anyhow!("no adapter registered for provider {provider}"))
    }

    /// Create a transaction and, for paid tiers, hand off to the provider.
    ///
    /// Free-tier requests (`amount == 0`) complete synchronously with the
    /// listing materialized in the same call; no provider is contacted.
    /// Provider failures leave the row in place as `Failed` so the
    /// attempt stays auditable; rows are never rolled back.
    pub async fn create_transaction(&self, new: NewTransaction) -> Result<Transaction> {
        if let Some(ref key) = new.idempotency_key {
            if let Some(existing) = self
                .transactions
                .find_pending_by_idempotency_key(&new.user_id, key)
                .await?
            {
                tracing::info!(
                    transaction_id = %existing.id,
                    idempotency_key = %key,
                    "Reusing pending transaction for replayed creation"
                );
                return Ok(existing);
            }
        }

        let now = chrono::Utc::now();
        let id = Uuid::new_v4();

        if new.amount == 0 {
            return self.create_free_transaction(id, new, now).await;
        }

        let transaction = Transaction {
            id,
            user_id: new.user_id.clone(),
            amount: new.amount,
            currency: new.currency.clone(),
            status: TransactionStatus::Pending,
            provider: new.provider,
            external_payment_id: None,
            payment_data: new.payment_data.clone(),
            idempotency_key: new.idempotency_key.clone(),
            ad_id: None,
            created_at: DateTime::from_chrono(now),
            expires_at: DateTime::from_chrono(now + self.payment_window),
            completed_at: None,
        };

        if let Err(e) = self.transactions.insert(&transaction).await {
            // Lost a concurrent creation race on the unique idempotency
            // index; hand back the row the winner inserted.
            if let Some(ref key) = new.idempotency_key {
                if let Some(existing) = self
                    .transactions
                    .find_pending_by_idempotency_key(&new.user_id, key)
                    .await?
                {
                    tracing::info!(
                        transaction_id = %existing.id,
                        idempotency_key = %key,
                        "Concurrent creation raced; reusing existing transaction"
                    );
                    return Ok(existing);
                }
            }
            return Err(e);
        }
        self.audit
            .record_flagged(
                Some(id),
                events::TRANSACTION_CREATED,
                json!({
                    "amount": new.amount,
                    "currency": new.currency,
                    "provider": new.provider.as_str(),
                    "ad_type": new.payment_data.ad.ad_type.as_str(),
                }),
                &new.context,
                Vec::new(),
            )
            .await?;

        let adapter = self.adapter(new.provider)?;
        let request = CreatePaymentRequest {
            amount: new.amount,
            currency: new.currency.clone(),
            description: format!("soko listing: {}", new.payment_data.ad.title),
            customer: new.payment_data.customer.clone(),
            return_url: format!("{}/payments/return", self.webhook_base_url),
            cancel_url: format!("{}/payments/cancel", self.webhook_base_url),
            webhook_url: format!("{}/webhooks/{}", self.webhook_base_url, new.provider),
            external_reference: id.to_string(),
        };

        match adapter.create_payment(&request).await {
            Ok(payment) => {
                self.transactions
                    .set_provider_details(
                        id,
                        &payment.external_payment_id,
                        &payment.checkout_url,
                        payment.raw,
                    )
                    .await?;
                self.audit
                    .record_flagged(
                        Some(id),
                        events::PAYMENT_INITIATED,
                        json!({
                            "provider": new.provider.as_str(),
                            "external_payment_id": payment.external_payment_id,
                        }),
                        &new.context,
                        Vec::new(),
                    )
                    .await?;
                metrics::record_transaction(new.provider.as_str(), "pending");

                let transaction = self
                    .transactions
                    .get(id)
                    .await?
                    .context("transaction vanished after provider handoff")?;
                Ok(transaction)
            }
            Err(e) => {
                tracing::error!(
                    transaction_id = %id,
                    provider = new.provider.as_str(),
                    error = %e,
                    "Provider rejected payment creation"
                );
                self.transactions
                    .transition_if_pending(id, TransactionStatus::Failed)
                    .await?;
                // Error text captured verbatim for postmortem.
                self.audit
                    .record_flagged(
                        Some(id),
                        events::PROVIDER_API_ERROR,
                        json!({
                            "provider": new.provider.as_str(),
                            "error": e.to_string(),
                        }),
                        &new.context,
                        Vec::new(),
                    )
                    .await?;
                metrics::record_transaction(new.provider.as_str(), "failed");

                let transaction = self
                    .transactions
                    .get(id)
                    .await?
                    .context("transaction vanished after provider failure")?;
                Ok(transaction)
            }
        }
    }

    async fn create_free_transaction(
        &self,
        id: Uuid,
        new: NewTransaction,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Transaction> {
        let ad = self.build_ad(&new.user_id, &new.payment_data, now);
        let materialized = self.ads.insert_ad(&ad).await;

        let (status, ad_id, completed_at) = match materialized {
            Ok(()) => (
                TransactionStatus::Completed,
                Some(ad.id),
                Some(DateTime::from_chrono(now)),
            ),
            Err(ref e) => {
                tracing::error!(transaction_id = %id, error = %e, "Free-tier listing creation failed");
                (TransactionStatus::Failed, None, None)
            }
        };

        let transaction = Transaction {
            id,
            user_id: new.user_id.clone(),
            amount: 0,
            currency: new.currency.clone(),
            status,
            provider: new.provider,
            external_payment_id: None,
            payment_data: new.payment_data.clone(),
            idempotency_key: new.idempotency_key.clone(),
            ad_id,
            created_at: DateTime::from_chrono(now),
            expires_at: DateTime::from_chrono(now),
            completed_at,
        };

        self.transactions.insert(&transaction).await?;
        self.audit
            .record_flagged(
                Some(id),
                events::TRANSACTION_CREATED,
                json!({
                    "amount": 0,
                    "currency": new.currency,
                    "free_tier": true,
                    "ad_id": ad_id.map(|a| a.to_string()),
                }),
                &new.context,
                Vec::new(),
            )
            .await?;

        if let Err(e) = materialized {
            self.audit
                .record_flagged(
                    Some(id),
                    events::SIDE_EFFECT_FAILED,
                    json!({ "error": e.to_string() }),
                    &new.context,
                    vec!["manual_review".to_string()],
                )
                .await?;
        }

        metrics::record_transaction(
            new.provider.as_str(),
            if ad_id.is_some() { "completed" } else { "failed" },
        );
        Ok(transaction)
    }

    /// Single entry point for provider status updates from any source.
    pub async fn apply_provider_update(
        &self,
        transaction_id: Uuid,
        raw_status: &str,
        raw_payload: Value,
        source: UpdateSource,
        reported: Option<ReportedFigures>,
    ) -> Result<UpdateOutcome> {
        let Some(transaction) = self.transactions.get(transaction_id).await? else {
            return Ok(UpdateOutcome::NotFound);
        };

        // Idempotency guard: terminal rows absorb replays as no-ops.
        if transaction.status.is_terminal() {
            tracing::info!(
                transaction_id = %transaction_id,
                status = transaction.status.as_str(),
                incoming = raw_status,
                source = source.as_str(),
                "Update for already-terminal transaction ignored"
            );
            self.audit
                .record(
                    Some(transaction_id),
                    events::WEBHOOK_REPLAYED,
                    json!({
                        "current_status": transaction.status.as_str(),
                        "incoming_status": raw_status,
                        "source": source.as_str(),
                    }),
                )
                .await?;
            return Ok(UpdateOutcome::AlreadyTerminal(transaction.status));
        }

        let now = DateTime::now();

        // Expiry takes precedence: a late "completed" after the window
        // closes is an anomaly, not a reactivation.
        if transaction.is_expired_at(now) {
            let won = self
                .transactions
                .transition_if_pending(transaction_id, TransactionStatus::Expired)
                .await?;
            if !won {
                return self.observe_terminal(transaction_id).await;
            }
            self.record_transition(
                &transaction,
                TransactionStatus::Expired,
                source,
                json!({
                    "incoming_status": raw_status,
                    "expired_before_update": true,
                }),
            )
            .await?;
            metrics::record_transaction(transaction.provider.as_str(), "expired");
            return Ok(UpdateOutcome::Applied {
                from: TransactionStatus::Pending,
                to: TransactionStatus::Expired,
            });
        }

        // Webhooks are untrusted input; never trust a "completed" signal
        // whose figures disagree with the stored row.
        if let Some(figures) = reported {
            if figures.amount != Some(transaction.amount) || figures.currency != transaction.currency
            {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    stored_amount = transaction.amount,
                    reported_amount = ?figures.amount,
                    stored_currency = %transaction.currency,
                    reported_currency = %figures.currency,
                    "Webhook figures disagree with stored transaction"
                );
                self.audit
                    .record_flagged(
                        Some(transaction_id),
                        events::AMOUNT_MISMATCH,
                        json!({
                            "stored_amount": transaction.amount,
                            "reported_amount": figures.amount,
                            "stored_currency": transaction.currency,
                            "reported_currency": figures.currency,
                            "incoming_status": raw_status,
                            "source": source.as_str(),
                        }),
                        &AuditContext::default(),
                        vec!["amount_mismatch".to_string(), "manual_review".to_string()],
                    )
                    .await?;
                return Ok(UpdateOutcome::MismatchHeld);
            }
        }

        let adapter = self.adapter(transaction.provider)?;
        let target = adapter.map_status(raw_status);

        match target {
            TransactionStatus::Pending => {
                self.record_transition(
                    &transaction,
                    TransactionStatus::Pending,
                    source,
                    json!({ "incoming_status": raw_status, "unchanged": true }),
                )
                .await?;
                Ok(UpdateOutcome::StillPending)
            }
            TransactionStatus::Completed => {
                self.complete(transaction, raw_status, raw_payload, source, now)
                    .await
            }
            to @ (TransactionStatus::Failed | TransactionStatus::Expired) => {
                let won = self
                    .transactions
                    .transition_if_pending(transaction.id, to)
                    .await?;
                if !won {
                    return self.observe_terminal(transaction.id).await;
                }
                self.record_transition(
                    &transaction,
                    to,
                    source,
                    json!({ "incoming_status": raw_status }),
                )
                .await?;
                metrics::record_transaction(
                    transaction.provider.as_str(),
                    match to {
                        TransactionStatus::Failed => "failed",
                        _ => "expired",
                    },
                );
                Ok(UpdateOutcome::Applied {
                    from: TransactionStatus::Pending,
                    to,
                })
            }
        }
    }

    /// Win the completion write, then materialize the listing from the
    /// data staged at creation time. The two are one unit of work: if
    /// the listing cannot be created the row is failed, not left as a
    /// completed payment with nothing behind it.
    async fn complete(
        &self,
        transaction: Transaction,
        raw_status: &str,
        raw_payload: Value,
        source: UpdateSource,
        now: DateTime,
    ) -> Result<UpdateOutcome> {
        let ad = self.build_ad(
            &transaction.user_id,
            &transaction.payment_data,
            now.to_chrono(),
        );

        let won = self
            .transactions
            .complete_if_pending(transaction.id, ad.id, now)
            .await?;
        if !won {
            return self.observe_terminal(transaction.id).await;
        }

        if let Err(e) = self.ads.insert_ad(&ad).await {
            tracing::error!(
                transaction_id = %transaction.id,
                error = %e,
                "Listing creation failed after completion; failing transaction"
            );
            self.transactions.fail_after_completion(transaction.id).await?;
            self.audit
                .record_flagged(
                    Some(transaction.id),
                    events::SIDE_EFFECT_FAILED,
                    json!({
                        "error": e.to_string(),
                        "incoming_status": raw_status,
                        "source": source.as_str(),
                    }),
                    &AuditContext::default(),
                    vec!["manual_review".to_string()],
                )
                .await?;
            metrics::record_transaction(transaction.provider.as_str(), "failed");
            return Ok(UpdateOutcome::Applied {
                from: TransactionStatus::Pending,
                to: TransactionStatus::Failed,
            });
        }

        tracing::info!(
            transaction_id = %transaction.id,
            ad_id = %ad.id,
            source = source.as_str(),
            "Payment completed, listing activated"
        );
        self.record_transition(
            &transaction,
            TransactionStatus::Completed,
            source,
            json!({
                "incoming_status": raw_status,
                "ad_id": ad.id.to_string(),
                "provider_payload": raw_payload,
            }),
        )
        .await?;
        metrics::record_transaction(transaction.provider.as_str(), "completed");

        Ok(UpdateOutcome::Applied {
            from: TransactionStatus::Pending,
            to: TransactionStatus::Completed,
        })
    }

    /// We lost a transition race; report what the winner wrote.
    async fn observe_terminal(&self, id: Uuid) -> Result<UpdateOutcome> {
        let current = self
            .transactions
            .get(id)
            .await?
            .context("transaction vanished during transition race")?;
        Ok(UpdateOutcome::AlreadyTerminal(current.status))
    }

    async fn record_transition(
        &self,
        transaction: &Transaction,
        to: TransactionStatus,
        source: UpdateSource,
        extra: Value,
    ) -> Result<()> {
        let event_type = match source {
            UpdateSource::Webhook => events::WEBHOOK_PROCESSED,
            UpdateSource::Poll | UpdateSource::Manual => events::STATUS_TRANSITION,
        };
        let mut data = json!({
            "previous_status": transaction.status.as_str(),
            "new_status": to.as_str(),
            "source": source.as_str(),
        });
        if let (Some(map), Some(extra_map)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_map {
                map.insert(k.clone(), v.clone());
            }
        }
        self.audit.record(Some(transaction.id), event_type, data).await
    }

    fn build_ad(
        &self,
        user_id: &str,
        payment_data: &PaymentData,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Ad {
        let draft = &payment_data.ad;
        let premium_expires_at = draft
            .ad_type
            .is_paid_tier()
            .then(|| DateTime::from_chrono(now + self.premium_duration));

        Ad {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            category: draft.category.clone(),
            price: draft.price,
            ad_type: draft.ad_type,
            is_active: true,
            premium_expires_at,
            created_at: DateTime::from_chrono(now),
        }
    }
}
