//! Audit export for dispute resolution and admin review.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use mongodb::bson::DateTime;
use serde::Deserialize;
use soko_core::error::AppError;
use uuid::Uuid;

use crate::store::AuditFilter;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditExportParams {
    /// RFC 3339 timestamps.
    pub from: Option<String>,
    pub to: Option<String>,
    pub event_type: Option<String>,
    pub transaction_id: Option<Uuid>,
}

fn parse_bound(value: &str, name: &str) -> Result<DateTime, AppError> {
    let parsed = chrono::DateTime::parse_from_rfc3339(value).map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!("Invalid {name} timestamp: {e}"))
    })?;
    Ok(DateTime::from_chrono(parsed.with_timezone(&chrono::Utc)))
}

pub async fn export_audit_log(
    State(state): State<AppState>,
    Query(params): Query<AuditExportParams>,
) -> Result<impl IntoResponse, AppError> {
    let filter = AuditFilter {
        from: params.from.as_deref().map(|v| parse_bound(v, "from")).transpose()?,
        to: params.to.as_deref().map(|v| parse_bound(v, "to")).transpose()?,
        event_type: params.event_type,
        transaction_id: params.transaction_id,
    };

    let csv = state.recorder.export_csv(&filter).await.map_err(|e| {
        tracing::error!(error = %e, "Audit export failed");
        AppError::InternalError(e)
    })?;

    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/csv; charset=utf-8"),
            (
                "content-disposition",
                "attachment; filename=\"audit_export.csv\"",
            ),
        ],
        csv,
    ))
}
