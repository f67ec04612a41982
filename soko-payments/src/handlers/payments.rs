//! Payment creation and status endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use soko_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::middleware::{ClientMeta, Principal};
use crate::models::{
    AdDraft, AdType, CustomerInfo, PaymentData, PaymentProvider, Transaction, TransactionStatus,
};
use crate::services::lifecycle::NewTransaction;
use crate::services::security::{ActionType, Admission, DenialReason, IdentifierType};
use crate::services::tracker::time_remaining;
use crate::services::UpdateOutcome;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    /// Amount in minor currency units; 0 selects the free tier.
    #[validate(range(max = 10_000_000))]
    pub amount: u64,
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,
    pub provider: PaymentProvider,
    /// Client-generated key making the request safe to replay.
    pub idempotency_key: Option<String>,
    #[validate(nested)]
    pub customer: CustomerDto,
    #[validate(nested)]
    pub ad: AdDto,
}

fn default_currency() -> String {
    "XAF".to_string()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CustomerDto {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 9, max = 20))]
    pub phone: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdDto {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
    pub price: u64,
    pub ad_type: AdType,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub checkout_url: Option<String>,
    pub expires_at: String,
    pub amount: u64,
    pub currency: String,
}

pub async fn create_payment(
    State(state): State<AppState>,
    principal: Principal,
    ClientMeta(context): ClientMeta,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    payload.validate()?;

    tracing::info!(
        user_id = %principal.user_id,
        amount = payload.amount,
        currency = %payload.currency,
        provider = payload.provider.as_str(),
        "Creating payment transaction"
    );

    let admission = state
        .gate
        .admit(
            &principal.user_id,
            IdentifierType::User,
            ActionType::PaymentCreation,
            &context,
        )
        .await;
    deny_if_blocked(&admission)?;

    if let Some(ref ip) = context.ip_address {
        let ip_admission = state
            .gate
            .admit(ip, IdentifierType::Ip, ActionType::PaymentCreation, &context)
            .await;
        deny_if_blocked(&ip_admission)?;
    }

    let payment_data = PaymentData {
        customer: CustomerInfo {
            name: payload.customer.name,
            email: payload.customer.email,
            phone: payload.customer.phone,
        },
        ad: AdDraft {
            title: payload.ad.title,
            description: payload.ad.description,
            category: payload.ad.category,
            price: payload.ad.price,
            ad_type: payload.ad.ad_type,
        },
        checkout_url: None,
        provider_response: None,
    };

    let transaction = state
        .lifecycle
        .create_transaction(NewTransaction {
            user_id: principal.user_id,
            amount: payload.amount,
            currency: payload.currency,
            provider: payload.provider,
            payment_data,
            idempotency_key: payload.idempotency_key,
            context,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create transaction");
            AppError::InternalError(e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            transaction_id: transaction.id,
            status: transaction.status,
            checkout_url: transaction.payment_data.checkout_url.clone(),
            expires_at: transaction
                .expires_at
                .try_to_rfc3339_string()
                .unwrap_or_default(),
            amount: transaction.amount,
            currency: transaction.currency,
        }),
    ))
}

fn deny_if_blocked(admission: &Admission) -> Result<(), AppError> {
    match admission.denial {
        None => Ok(()),
        Some(DenialReason::RateLimited) => {
            let retry_secs = admission.retry_after.map(|at| {
                let delta_ms = at.timestamp_millis() - mongodb::bson::DateTime::now().timestamp_millis();
                (delta_ms.max(0) / 1000) as u64
            });
            Err(AppError::TooManyRequests(
                "RATE_LIMIT_EXCEEDED",
                "Too many payment attempts. Please try again later.".to_string(),
                retry_secs,
            ))
        }
        Some(DenialReason::HighRisk) => Err(AppError::Forbidden(anyhow::anyhow!(
            "SUSPICIOUS_ACTIVITY: request blocked pending review"
        ))),
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub user_id: String,
    pub amount: u64,
    pub currency: String,
    pub status: TransactionStatus,
    pub provider: PaymentProvider,
    pub checkout_url: Option<String>,
    pub ad_id: Option<Uuid>,
    pub created_at: String,
    pub expires_at: String,
    pub completed_at: Option<String>,
    /// Seconds left on the payment window; absent once terminal.
    pub expires_in_seconds: Option<u64>,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        let expires_in_seconds = time_remaining(&t, mongodb::bson::DateTime::now());
        Self {
            id: t.id,
            user_id: t.user_id,
            amount: t.amount,
            currency: t.currency,
            status: t.status,
            provider: t.provider,
            checkout_url: t.payment_data.checkout_url,
            ad_id: t.ad_id,
            created_at: t.created_at.try_to_rfc3339_string().unwrap_or_default(),
            expires_at: t.expires_at.try_to_rfc3339_string().unwrap_or_default(),
            completed_at: t
                .completed_at
                .and_then(|at| at.try_to_rfc3339_string().ok()),
            expires_in_seconds,
        }
    }
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction = state
        .transactions
        .get(transaction_id)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    Ok(Json(TransactionResponse::from(transaction)))
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub outcome: &'static str,
}

/// Manually re-check the provider, for when webhook delivery lags.
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let outcome = state
        .tracker
        .poll_once(transaction_id)
        .await
        .map_err(|e| {
            tracing::error!(transaction_id = %transaction_id, error = %e, "Status poll failed");
            AppError::BadGateway(e.to_string())
        })?;

    let outcome_label = match outcome {
        UpdateOutcome::NotFound => {
            return Err(AppError::NotFound(anyhow::anyhow!("Transaction not found")))
        }
        UpdateOutcome::Applied { .. } => "applied",
        UpdateOutcome::AlreadyTerminal(_) => "already_terminal",
        UpdateOutcome::StillPending => "still_pending",
        UpdateOutcome::MismatchHeld => "held_for_review",
    };

    let transaction = state
        .transactions
        .get(transaction_id)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Transaction not found")))?;

    Ok(Json(VerifyPaymentResponse {
        transaction_id,
        status: transaction.status,
        outcome: outcome_label,
    }))
}
