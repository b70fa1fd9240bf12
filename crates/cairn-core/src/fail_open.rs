//! Fail-open utilities for advisory writes
//!
//! Some writes only inform, like the metrics history. Losing them
//! must not abort a stage, so failures are logged and swallowed here.
//!
//! DO NOT use fail-open for:
//! - Context records (authoritative state)
//! - Stage result snapshots
//! - Workflow execution records

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;

/// Execute an advisory operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use cairn_core::fail_open::fail_open;
/// use cairn_core::Result;
///
/// async fn record_metrics() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let result = fail_open("metrics_history", || record_metrics()).await;
///     // result is None if record_metrics() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(operation = operation_name, error = %e, "advisory operation failed (fail-open)");
            None
        }
    }
}

/// Step of the linear backoff between attempts
pub const RETRY_STEP: Duration = Duration::from_millis(100);

/// Like [`fail_open`], retrying with a linear backoff of `RETRY_STEP * attempt`
///
/// The operation runs at least once and at most `max_attempts` times.
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_attempts: usize,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let error = match f().await {
            Ok(val) => return Some(val),
            Err(e) => e,
        };

        if attempt as usize >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "advisory operation gave up (fail-open)"
            );
            return None;
        }
        debug!(operation = operation_name, attempt, error = %error, "advisory operation failed, retrying");
        tokio::time::sleep(RETRY_STEP * attempt).await;
    }
}
