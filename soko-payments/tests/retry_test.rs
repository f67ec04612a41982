//! Retry controller: exponential backoff pacing, audit trail per
//! attempt, exhaustion, and cancellation mid-backoff.
//!
//! Paused-clock tests: sleeps complete instantly while `Instant` still
//! reports the virtual time that elapsed.

mod common;

use anyhow::anyhow;
use common::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use soko_payments::client::{RetryController, RetryError, RetryOptions};
use soko_payments::models::events;
use soko_payments::services::AuditRecorder;
use soko_payments::store::memory::MemoryAuditStore;

fn controller(store: &Arc<MemoryAuditStore>, options: RetryOptions) -> RetryController {
    RetryController::new(AuditRecorder::new(store.clone()), options)
}

#[tokio::test(start_paused = true)]
async fn succeeds_on_the_third_attempt_after_backing_off() {
    let store = Arc::new(MemoryAuditStore::new());
    let retry = controller(&store, RetryOptions::default());
    let transaction_id = Uuid::new_v4();
    let calls = Arc::new(AtomicU32::new(0));

    let started = tokio::time::Instant::now();
    let result = retry
        .run(Some(transaction_id), |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(anyhow!("provider timeout"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 1s after the first failure, 2s after the second.
    assert!(started.elapsed() >= Duration::from_millis(3000));

    assert_eq!(
        store.entries_for(transaction_id, events::RETRY_ATTEMPT).len(),
        3
    );
    assert_eq!(
        store.entries_for(transaction_id, events::RETRY_SUCCESS).len(),
        1
    );
    assert!(store.entries_for(transaction_id, events::RETRY_FAILED).is_empty());
}

#[tokio::test(start_paused = true)]
async fn linear_backoff_waits_the_same_delay_each_time() {
    let store = Arc::new(MemoryAuditStore::new());
    let retry = controller(
        &store,
        RetryOptions {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(500),
            exponential: false,
        },
    );

    let started = tokio::time::Instant::now();
    let result = retry
        .run(None, |attempt| async move {
            if attempt < 3 {
                Err(anyhow!("busy"))
            } else {
                Ok(())
            }
        })
        .await;

    assert!(result.is_ok());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed < Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn exhaustion_surfaces_the_last_error() {
    let store = Arc::new(MemoryAuditStore::new());
    let retry = controller(&store, RetryOptions::default());
    let transaction_id = Uuid::new_v4();

    let result: Result<(), RetryError> = retry
        .run(Some(transaction_id), |attempt| async move {
            Err(anyhow!("attempt {attempt} refused"))
        })
        .await;

    match result {
        Err(RetryError::Exhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.to_string().contains("attempt 3 refused"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }

    assert_eq!(retry.remaining_attempts(), 0);
    assert_eq!(
        store.entries_for(transaction_id, events::RETRY_ATTEMPT).len(),
        3
    );
    let failed = store.entries_for(transaction_id, events::RETRY_FAILED);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].event_data["error"]
        .as_str()
        .unwrap()
        .contains("refused"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_the_backoff_wait() {
    let store = Arc::new(MemoryAuditStore::new());
    let retry = controller(&store, RetryOptions::default());
    let transaction_id = Uuid::new_v4();

    // Cancel up front: the first failure goes straight to the backoff
    // wait, which observes the cancelled token instead of sleeping.
    retry.cancellation_token().cancel();

    let result: Result<(), RetryError> = retry
        .run(Some(transaction_id), |_| async { Err(anyhow!("down")) })
        .await;

    match result {
        Err(RetryError::Cancelled { attempts }) => assert_eq!(attempts, 1),
        other => panic!("expected cancellation, got {other:?}"),
    }

    let failed = store.entries_for(transaction_id, events::RETRY_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].event_data["error"], serde_json::json!("cancelled"));
}

#[tokio::test(start_paused = true)]
async fn remaining_attempts_count_down_per_attempt() {
    let store = Arc::new(MemoryAuditStore::new());
    let retry = controller(&store, RetryOptions::default());
    let observed = Arc::new(Mutex::new(Vec::new()));

    let result: Result<(), RetryError> = retry
        .run(None, |_| {
            let remaining = retry.remaining_attempts();
            observed.lock().unwrap().push(remaining);
            async { Err(anyhow!("down")) }
        })
        .await;

    assert!(matches!(result, Err(RetryError::Exhausted { .. })));
    assert_eq!(*observed.lock().unwrap(), vec![2, 1, 0]);
}
