//! Inbound provider webhooks.
//!
//! Webhooks are untrusted input. Each handler extracts the transaction
//! reference (400 if absent, 404 if unknown), then hands the raw status
//! to the lifecycle manager, which owns the idempotency guard, expiry
//! precedence, and figure validation. Business-level "failures"
//! (replays, mismatches held for review) still answer 200 so providers
//! do not enter retry storms over cases that are actually fine.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use soko_core::error::AppError;
use uuid::Uuid;

use crate::models::{PaymentProvider, UpdateSource};
use crate::services::lifecycle::{ReportedFigures, UpdateOutcome};
use crate::services::metrics;
use crate::AppState;

/// Lygos webhook body (JSON).
#[derive(Debug, Deserialize)]
pub struct LygosWebhook {
    pub payment_id: Option<String>,
    pub status: Option<String>,
    pub external_reference: Option<String>,
    pub amount: Option<u64>,
    pub currency: Option<String>,
}

/// Monetbil webhook body (form-encoded).
#[derive(Debug, Deserialize)]
pub struct MonetbilWebhook {
    pub status: Option<String>,
    pub item_ref: Option<String>,
    pub transaction_id: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
}

pub async fn lygos_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let signature = headers
        .get("X-Lygos-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing X-Lygos-Signature header");
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    if !state.lygos.verify_webhook_signature(&body, signature) {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let payload: LygosWebhook = serde_json::from_str(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {e}")))?;

    let reference = payload.external_reference.as_deref().ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Webhook missing external_reference"))
    })?;
    let raw_status = payload.status.as_deref().unwrap_or_default().to_string();

    tracing::info!(
        external_reference = %reference,
        payment_id = ?payload.payment_id,
        status = %raw_status,
        "Received Lygos webhook"
    );

    let reported = match (payload.amount, payload.currency.clone()) {
        (Some(amount), Some(currency)) => Some(ReportedFigures {
            amount: Some(amount),
            currency,
        }),
        _ => None,
    };

    let raw_payload = serde_json::from_str(&body).unwrap_or(json!({}));
    process(
        &state,
        PaymentProvider::Lygos,
        reference,
        &raw_status,
        raw_payload,
        reported,
    )
    .await
}

pub async fn monetbil_webhook(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let payload: MonetbilWebhook = serde_urlencoded::from_str(&body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload: {e}")))?;

    let reference = payload
        .item_ref
        .as_deref()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Webhook missing item_ref")))?;
    let raw_status = payload.status.as_deref().unwrap_or_default().to_string();

    tracing::info!(
        item_ref = %reference,
        provider_transaction_id = ?payload.transaction_id,
        status = %raw_status,
        "Received Monetbil webhook"
    );

    // Monetbil posts the amount as a string. A present-but-non-numeric
    // amount is forwarded as unparseable so figure validation holds it,
    // instead of being dropped as if the field were absent.
    let reported = match (payload.amount.as_deref(), payload.currency.clone()) {
        (Some(raw_amount), Some(currency)) => Some(ReportedFigures {
            amount: raw_amount.parse::<u64>().ok(),
            currency,
        }),
        _ => None,
    };

    let raw_payload = json!({
        "status": payload.status,
        "item_ref": payload.item_ref,
        "transaction_id": payload.transaction_id,
        "amount": payload.amount,
        "currency": payload.currency,
    });

    process(
        &state,
        PaymentProvider::Monetbil,
        reference,
        &raw_status,
        raw_payload,
        reported,
    )
    .await
}

async fn process(
    state: &AppState,
    provider: PaymentProvider,
    reference: &str,
    raw_status: &str,
    raw_payload: serde_json::Value,
    reported: Option<ReportedFigures>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let transaction_id = Uuid::parse_str(reference).map_err(|_| {
        AppError::BadRequest(anyhow::anyhow!("Malformed transaction reference"))
    })?;

    // A webhook never creates state: unknown references are rejected
    // without touching the store or the audit log.
    let transaction = state
        .transactions
        .get(transaction_id)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Unknown transaction reference")))?;

    if transaction.provider != provider {
        tracing::warn!(
            transaction_id = %transaction_id,
            expected = transaction.provider.as_str(),
            received = provider.as_str(),
            "Webhook provider does not match transaction"
        );
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Unknown transaction reference"
        )));
    }

    let outcome = state
        .lifecycle
        .apply_provider_update(
            transaction_id,
            raw_status,
            raw_payload,
            UpdateSource::Webhook,
            reported,
        )
        .await
        .map_err(|e| {
            tracing::error!(transaction_id = %transaction_id, error = %e, "Webhook processing failed");
            AppError::InternalError(e)
        })?;

    let outcome_label = match outcome {
        UpdateOutcome::Applied { .. } => "applied",
        UpdateOutcome::AlreadyTerminal(_) => "replayed",
        UpdateOutcome::StillPending => "still_pending",
        UpdateOutcome::MismatchHeld => "mismatch_held",
        UpdateOutcome::NotFound => {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Unknown transaction reference"
            )))
        }
    };
    metrics::record_webhook(provider.as_str(), outcome_label);

    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}
