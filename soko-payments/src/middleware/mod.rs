//! Request extractors for identity and attribution.
//!
//! Authentication lives in an upstream gateway; it forwards the verified
//! principal in headers. Headers are only trusted because the gateway
//! terminates the public edge.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use soko_core::error::AppError;

use crate::services::audit::AuditContext;

/// The authenticated principal, forwarded by the gateway.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing X-User-Id header (required from gateway)"
                ))
            })?;

        let span = tracing::Span::current();
        span.record("user_id", user_id);

        Ok(Principal {
            user_id: user_id.to_string(),
        })
    }
}

/// Caller attribution captured into the audit trail.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta(pub AuditContext);

#[async_trait]
impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string());

        let user_agent = parts
            .headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok(ClientMeta(AuditContext {
            ip_address,
            user_agent,
        }))
    }
}
