//! Security gate for transaction creation.
//!
//! Sliding-window rate limiting keyed by (identifier, identifier type,
//! action), combined with a pluggable suspicious-activity score into a
//! 0-100 risk score. The gate fails OPEN when the backing store cannot
//! answer: the lifecycle manager's conditional writes are the real
//! financial safety net, so availability wins at this layer.

use mongodb::bson::DateTime;
use serde_json::json;
use std::sync::Arc;

use crate::config::{ActionLimit, SecurityConfig};
use crate::models::events;
use crate::services::audit::{AuditContext, AuditRecorder};

const ALERT_THRESHOLD: u8 = 75;
const CRITICAL_THRESHOLD: u8 = 90;

const USER_LIMIT_WEIGHT: f64 = 20.0;
const IP_LIMIT_WEIGHT: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    User,
    Ip,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::User => "user",
            IdentifierType::Ip => "ip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    PaymentCreation,
    Login,
    PasswordReset,
    AccountCreation,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::PaymentCreation => "payment_creation",
            ActionType::Login => "login",
            ActionType::PasswordReset => "password_reset",
            ActionType::AccountCreation => "account_creation",
        }
    }

    fn limit(&self, config: &SecurityConfig) -> ActionLimit {
        match self {
            ActionType::PaymentCreation => config.payment_creation,
            ActionType::Login => config.login,
            ActionType::PasswordReset => config.password_reset,
            ActionType::AccountCreation => config.account_creation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    RateLimited,
    HighRisk,
}

#[derive(Debug, Clone)]
pub struct Admission {
    pub allowed: bool,
    pub risk_score: u8,
    pub retry_after: Option<DateTime>,
    pub denial: Option<DenialReason>,
}

impl Admission {
    fn allowed(risk_score: u8) -> Self {
        Self {
            allowed: true,
            risk_score,
            retry_after: None,
            denial: None,
        }
    }
}

/// Independent detector consulted for each admission check.
///
/// The default implementation scores everything zero; deployments plug
/// in their own heuristics.
pub trait SuspiciousActivityDetector: Send + Sync {
    fn score(&self, identifier: &str, action: ActionType) -> u8;
}

pub struct NoopDetector;

impl SuspiciousActivityDetector for NoopDetector {
    fn score(&self, _identifier: &str, _action: ActionType) -> u8 {
        0
    }
}

pub struct SecurityGate {
    audit: AuditRecorder,
    config: SecurityConfig,
    detector: Arc<dyn SuspiciousActivityDetector>,
}

impl SecurityGate {
    pub fn new(audit: AuditRecorder, config: SecurityConfig) -> Self {
        Self::with_detector(audit, config, Arc::new(NoopDetector))
    }

    pub fn with_detector(
        audit: AuditRecorder,
        config: SecurityConfig,
        detector: Arc<dyn SuspiciousActivityDetector>,
    ) -> Self {
        Self {
            audit,
            config,
            detector,
        }
    }

    /// Decide whether `identifier` may perform `action` right now.
    pub async fn admit(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
        action: ActionType,
        context: &AuditContext,
    ) -> Admission {
        let limit = action.limit(&self.config);
        let now = chrono::Utc::now();
        let window_start =
            DateTime::from_chrono(now - chrono::Duration::minutes(limit.window_minutes));

        let prior = match self
            .audit
            .store()
            .count_checks_since(identifier, identifier_type.as_str(), action.as_str(), window_start)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    identifier = %identifier,
                    action = action.as_str(),
                    error = %e,
                    "Rate-limit window query failed; failing open"
                );
                self.record_check(identifier, identifier_type, action, context, 0)
                    .await;
                return Admission::allowed(0);
            }
        };

        self.record_check(identifier, identifier_type, action, context, prior)
            .await;

        if prior >= limit.max_requests {
            let retry_after =
                DateTime::from_chrono(now + chrono::Duration::minutes(limit.window_minutes));

            tracing::warn!(
                identifier = %identifier,
                identifier_type = identifier_type.as_str(),
                action = action.as_str(),
                attempts = prior,
                max = limit.max_requests,
                "Rate limit exceeded"
            );

            if let Err(e) = self
                .audit
                .record_flagged(
                    None,
                    events::SUSPICIOUS_ACTIVITY,
                    json!({
                        "identifier": identifier,
                        "identifier_type": identifier_type.as_str(),
                        "action": action.as_str(),
                        "reason": "rate_limit_exceeded",
                        "attempts": prior,
                    }),
                    context,
                    vec!["rate_limit_exceeded".to_string()],
                )
                .await
            {
                tracing::error!(error = %e, "Failed to audit rate-limit block");
            }

            return Admission {
                allowed: false,
                risk_score: 100,
                retry_after: Some(retry_after),
                denial: Some(DenialReason::RateLimited),
            };
        }

        let risk_score = self.risk_score(identifier, identifier_type, action, prior, limit);

        if risk_score >= CRITICAL_THRESHOLD {
            if let Err(e) = self
                .audit
                .record_flagged(
                    None,
                    events::SUSPICIOUS_ACTIVITY,
                    json!({
                        "identifier": identifier,
                        "identifier_type": identifier_type.as_str(),
                        "action": action.as_str(),
                        "risk_score": risk_score,
                        "reason": "risk_score_critical",
                    }),
                    context,
                    vec!["auto_blocked".to_string()],
                )
                .await
            {
                tracing::error!(error = %e, "Failed to audit risk block");
            }

            return Admission {
                allowed: false,
                risk_score,
                retry_after: None,
                denial: Some(DenialReason::HighRisk),
            };
        }

        if risk_score >= ALERT_THRESHOLD {
            if let Err(e) = self
                .audit
                .record_flagged(
                    None,
                    events::SUSPICIOUS_ACTIVITY,
                    json!({
                        "identifier": identifier,
                        "identifier_type": identifier_type.as_str(),
                        "action": action.as_str(),
                        "risk_score": risk_score,
                        "reason": "risk_score_elevated",
                    }),
                    context,
                    vec!["flagged_for_review".to_string()],
                )
                .await
            {
                tracing::error!(error = %e, "Failed to audit risk flag");
            }
        }

        Admission::allowed(risk_score)
    }

    fn risk_score(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
        action: ActionType,
        prior: u64,
        limit: ActionLimit,
    ) -> u8 {
        let weight = match identifier_type {
            IdentifierType::User => USER_LIMIT_WEIGHT,
            IdentifierType::Ip => IP_LIMIT_WEIGHT,
        };
        let proximity = (prior as f64 / limit.max_requests.max(1) as f64).min(1.0);
        let detector_score = self.detector.score(identifier, action) as f64;

        let score = proximity * weight + detector_score;
        score.clamp(0.0, 100.0) as u8
    }

    async fn record_check(
        &self,
        identifier: &str,
        identifier_type: IdentifierType,
        action: ActionType,
        context: &AuditContext,
        prior: u64,
    ) {
        if let Err(e) = self
            .audit
            .record_flagged(
                None,
                events::RATE_LIMIT_CHECK,
                json!({
                    "identifier": identifier,
                    "identifier_type": identifier_type.as_str(),
                    "action": action.as_str(),
                    "prior_attempts": prior,
                }),
                context,
                Vec::new(),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to record rate-limit check");
        }
    }
}
