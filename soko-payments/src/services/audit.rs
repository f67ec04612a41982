//! Audit trail recorder and CSV export.
//!
//! Every externally visible outcome is written here before it is
//! surfaced to any caller; the trail is the source of truth for dispute
//! resolution, independent of what the HTTP response claimed.

use anyhow::Result;
use mongodb::bson::DateTime;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::AuditEntry;
use crate::store::{AuditFilter, AuditStore};

/// Request-scoped attribution attached to audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub async fn record(
        &self,
        transaction_id: Option<Uuid>,
        event_type: &str,
        event_data: Value,
    ) -> Result<()> {
        self.record_flagged(
            transaction_id,
            event_type,
            event_data,
            &AuditContext::default(),
            Vec::new(),
        )
        .await
    }

    pub async fn record_flagged(
        &self,
        transaction_id: Option<Uuid>,
        event_type: &str,
        event_data: Value,
        context: &AuditContext,
        security_flags: Vec<String>,
    ) -> Result<()> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            transaction_id,
            event_type: event_type.to_string(),
            event_data,
            ip_address: context.ip_address.clone(),
            user_agent: context.user_agent.clone(),
            security_flags,
            created_at: DateTime::now(),
        };

        tracing::debug!(
            event_type = %entry.event_type,
            transaction_id = ?entry.transaction_id,
            "Audit entry recorded"
        );

        self.store.append(&entry).await
    }

    /// Render matching entries as CSV for the admin export.
    pub async fn export_csv(&self, filter: &AuditFilter) -> Result<String> {
        let entries = self.store.list(filter).await?;

        let mut out = String::from(
            "Date,TransactionID,EventType,IPAddress,UserAgent,EventData,SecurityFlags\n",
        );
        for entry in entries {
            let row = [
                entry.created_at.try_to_rfc3339_string().unwrap_or_default(),
                entry
                    .transaction_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                entry.event_type.clone(),
                entry.ip_address.clone().unwrap_or_default(),
                entry.user_agent.clone().unwrap_or_default(),
                entry.event_data.to_string(),
                serde_json::to_string(&entry.security_flags)?,
            ];
            let escaped: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
            out.push_str(&escaped.join(","));
            out.push('\n');
        }

        Ok(out)
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
