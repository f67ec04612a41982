//! mongodb-backed stores.
//!
//! Conditional transitions use a filtered `update_one` (`_id` + current
//! status) and report whether the write landed via `modified_count`.

use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use serde_json::Value;
use uuid::Uuid;

use super::{AdStore, AuditFilter, AuditStore, TransactionStore};
use crate::models::{events, Ad, AdType, AuditEntry, Transaction, TransactionStatus};

#[derive(Clone)]
pub struct MongoTransactionStore {
    collection: Collection<Transaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("transactions"),
        }
    }

    /// Initialize indexes for lookup paths the lifecycle depends on.
    pub async fn init_indexes(&self) -> Result<()> {
        // Unique over pending keyed rows so two concurrent creations
        // with the same idempotency key cannot both insert; the loser
        // gets a duplicate-key error and re-reads the winner's row.
        let idempotency_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "idempotency_key": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_idempotency_idx".to_string())
                    .unique(true)
                    .partial_filter_expression(doc! {
                        "status": pending_bson(),
                        "idempotency_key": { "$type": "string" },
                    })
                    .build(),
            )
            .build();

        let expiry_index = IndexModel::builder()
            .keys(doc! { "status": 1, "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_expiry_idx".to_string())
                    .build(),
            )
            .build();

        self.collection
            .create_indexes([idempotency_index, expiry_index], None)
            .await?;

        Ok(())
    }
}

fn pending_bson() -> mongodb::bson::Bson {
    mongodb::bson::to_bson(&TransactionStatus::Pending).expect("status serializes")
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn insert(&self, transaction: &Transaction) -> Result<()> {
        self.collection.insert_one(transaction, None).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        let filter = doc! { "_id": id.to_string() };
        Ok(self.collection.find_one(filter, None).await?)
    }

    async fn find_pending_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Transaction>> {
        let filter = doc! {
            "user_id": user_id,
            "idempotency_key": key,
            "status": pending_bson(),
        };
        Ok(self.collection.find_one(filter, None).await?)
    }

    async fn set_provider_details(
        &self,
        id: Uuid,
        external_payment_id: &str,
        checkout_url: &str,
        provider_response: Value,
    ) -> Result<()> {
        let filter = doc! { "_id": id.to_string() };
        let update = doc! {
            "$set": {
                "external_payment_id": external_payment_id,
                "payment_data.checkout_url": checkout_url,
                "payment_data.provider_response": mongodb::bson::to_bson(&provider_response)?,
            }
        };
        self.collection.update_one(filter, update, None).await?;
        Ok(())
    }

    async fn transition_if_pending(&self, id: Uuid, to: TransactionStatus) -> Result<bool> {
        let filter = doc! {
            "_id": id.to_string(),
            "status": pending_bson(),
        };
        let update = doc! {
            "$set": { "status": mongodb::bson::to_bson(&to)? }
        };
        let result = self.collection.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }

    async fn complete_if_pending(
        &self,
        id: Uuid,
        ad_id: Uuid,
        completed_at: DateTime,
    ) -> Result<bool> {
        let filter = doc! {
            "_id": id.to_string(),
            "status": pending_bson(),
        };
        let update = doc! {
            "$set": {
                "status": mongodb::bson::to_bson(&TransactionStatus::Completed)?,
                "ad_id": ad_id.to_string(),
                "completed_at": completed_at,
            }
        };
        let result = self.collection.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }

    async fn fail_after_completion(&self, id: Uuid) -> Result<bool> {
        let filter = doc! {
            "_id": id.to_string(),
            "status": mongodb::bson::to_bson(&TransactionStatus::Completed)?,
        };
        let update = doc! {
            "$set": {
                "status": mongodb::bson::to_bson(&TransactionStatus::Failed)?,
                "ad_id": mongodb::bson::Bson::Null,
                "completed_at": mongodb::bson::Bson::Null,
            }
        };
        let result = self.collection.update_one(filter, update, None).await?;
        Ok(result.modified_count == 1)
    }

    async fn find_expired_pending(&self, now: DateTime) -> Result<Vec<Transaction>> {
        let filter = doc! {
            "status": pending_bson(),
            "expires_at": { "$lt": now },
        };
        let cursor = self.collection.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[derive(Clone)]
pub struct MongoAdStore {
    collection: Collection<Ad>,
}

impl MongoAdStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("ads"),
        }
    }
}

#[async_trait]
impl AdStore for MongoAdStore {
    async fn insert_ad(&self, ad: &Ad) -> Result<()> {
        self.collection.insert_one(ad, None).await?;
        Ok(())
    }

    async fn find_expired_premium(&self, now: DateTime) -> Result<Vec<Ad>> {
        let filter = doc! {
            "ad_type": { "$ne": AdType::Standard.as_str() },
            "premium_expires_at": { "$lt": now },
        };
        let cursor = self.collection.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn downgrade_to_standard(&self, ids: &[Uuid]) -> Result<u64> {
        let id_strings: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let filter = doc! { "_id": { "$in": id_strings } };
        let update = doc! {
            "$set": {
                "ad_type": AdType::Standard.as_str(),
                "premium_expires_at": mongodb::bson::Bson::Null,
            }
        };
        let result = self.collection.update_many(filter, update, None).await?;
        Ok(result.modified_count)
    }
}

#[derive(Clone)]
pub struct MongoAuditStore {
    collection: Collection<AuditEntry>,
}

impl MongoAuditStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("audit_log"),
        }
    }

    pub async fn init_indexes(&self) -> Result<()> {
        let tx_index = IndexModel::builder()
            .keys(doc! { "transaction_id": 1, "event_type": 1 })
            .options(
                IndexOptions::builder()
                    .name("audit_transaction_idx".to_string())
                    .build(),
            )
            .build();

        let window_index = IndexModel::builder()
            .keys(doc! {
                "event_data.identifier": 1,
                "event_data.action": 1,
                "created_at": -1,
            })
            .options(
                IndexOptions::builder()
                    .name("audit_window_idx".to_string())
                    .build(),
            )
            .build();

        self.collection
            .create_indexes([tx_index, window_index], None)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl AuditStore for MongoAuditStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.collection.insert_one(entry, None).await?;
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut query = Document::new();

        let mut range = Document::new();
        if let Some(from) = filter.from {
            range.insert("$gte", from);
        }
        if let Some(to) = filter.to {
            range.insert("$lte", to);
        }
        if !range.is_empty() {
            query.insert("created_at", range);
        }
        if let Some(ref event_type) = filter.event_type {
            query.insert("event_type", event_type.as_str());
        }
        if let Some(transaction_id) = filter.transaction_id {
            query.insert("transaction_id", transaction_id.to_string());
        }

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self.collection.find(query, Some(options)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count_checks_since(
        &self,
        identifier: &str,
        identifier_type: &str,
        action: &str,
        since: DateTime,
    ) -> Result<u64> {
        let filter = doc! {
            "event_type": events::RATE_LIMIT_CHECK,
            "event_data.identifier": identifier,
            "event_data.identifier_type": identifier_type,
            "event_data.action": action,
            "created_at": { "$gte": since },
        };
        Ok(self.collection.count_documents(filter, None).await?)
    }
}
