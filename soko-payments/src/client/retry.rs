//! Client-side retry orchestration for payment creation.
//!
//! Bounded attempts with exponential backoff, an audit row per attempt,
//! and a cancellation token so a caller going away clears pending
//! timers. This is a convenience wrapper, not a safety mechanism: the
//! operation it drives must itself be replay-safe (payment creation is,
//! via the idempotency key the lifecycle manager honors).

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::events;
use crate::services::audit::AuditRecorder;

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub backoff_delay: Duration,
    pub exponential: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1000),
            exponential: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("all {attempts} attempts failed: {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: anyhow::Error,
    },

    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

pub struct RetryController {
    audit: AuditRecorder,
    options: RetryOptions,
    cancel: CancellationToken,
    remaining: AtomicU32,
}

impl RetryController {
    pub fn new(audit: AuditRecorder, options: RetryOptions) -> Self {
        let remaining = AtomicU32::new(options.max_attempts);
        Self {
            audit,
            options,
            cancel: CancellationToken::new(),
            remaining,
        }
    }

    /// Token callers hold to abort in-flight backoff waits.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Attempts left before the failure becomes non-retryable; for UI
    /// feedback ("2 attempts remaining").
    pub fn remaining_attempts(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if self.options.exponential {
            // backoff_delay * 2^(attempt-1)
            self.options.backoff_delay * 2u32.saturating_pow(attempt - 1)
        } else {
            self.options.backoff_delay
        }
    }

    /// Drive `op` to success or exhaustion. `op` receives the 1-based
    /// attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        transaction_id: Option<Uuid>,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max = self.options.max_attempts.max(1);
        self.remaining.store(max, Ordering::SeqCst);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 1..=max {
            self.remaining.store(max - attempt, Ordering::SeqCst);
            self.audit_attempt(transaction_id, events::RETRY_ATTEMPT, attempt, None)
                .await;

            match op(attempt).await {
                Ok(value) => {
                    self.audit_attempt(transaction_id, events::RETRY_SUCCESS, attempt, None)
                        .await;
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "Payment attempt failed"
                    );
                    if attempt == max {
                        self.audit_attempt(
                            transaction_id,
                            events::RETRY_FAILED,
                            attempt,
                            Some(e.to_string()),
                        )
                        .await;
                        return Err(RetryError::Exhausted {
                            attempts: max,
                            last_error: e,
                        });
                    }
                    last_error = Some(e);
                }
            }

            let delay = self.delay_for(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    tracing::info!(attempt, "Retry cancelled during backoff");
                    self.audit_attempt(
                        transaction_id,
                        events::RETRY_FAILED,
                        attempt,
                        Some("cancelled".to_string()),
                    )
                    .await;
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }

        // max >= 1, so the loop always returns before this point.
        Err(RetryError::Exhausted {
            attempts: max,
            last_error: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts made")),
        })
    }

    async fn audit_attempt(
        &self,
        transaction_id: Option<Uuid>,
        event_type: &str,
        attempt: u32,
        error: Option<String>,
    ) {
        let mut data = serde_json::json!({
            "attempt": attempt,
            "max_attempts": self.options.max_attempts,
        });
        if let (Some(map), Some(err)) = (data.as_object_mut(), error) {
            map.insert("error".to_string(), serde_json::Value::String(err));
        }
        if let Err(e) = self.audit.record(transaction_id, event_type, data).await {
            tracing::warn!(error = %e, "Failed to audit retry attempt");
        }
    }
}
